pub mod config;
pub mod mock;
pub mod pipeline;
pub mod prompts;
pub mod service;
pub mod studio;

pub use config::StudioConfig;
pub use mock::MockFallback;
pub use pipeline::{CancelToken, FailurePolicy, GenerationPipeline};
pub use service::{interpret_response, GeminiService, ImageService, ServiceCall};
pub use studio::{GenerationOutcome, Studio, StudioError, GUEST_FREE_GENERATIONS};
