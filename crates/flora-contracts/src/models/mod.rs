mod generation;
mod mode;
mod user;

pub use generation::{Fallback, GenerationRequest, GenerationResult, ResultSource, Submission};
pub use mode::{CostTable, Mode};
pub use user::{
    normalize_email, normalize_language, Role, Session, StylePreferences, UserProfile,
    DEFAULT_LANGUAGE, GUEST_OWNER_ID, SUPPORTED_LANGUAGES,
};
