use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use flora_contracts::errors::GenerationError;
use flora_contracts::models::{Fallback, GenerationRequest, GenerationResult, StylePreferences};
use flora_contracts::settings::Credential;

use crate::mock::MockFallback;
use crate::prompts::compose_instruction;
use crate::service::{interpret_response, ImageService, ServiceCall};

/// What to do when a real service call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Return the typed failure to the caller.
    Surface,
    /// Substitute the mock reference image.
    #[default]
    Fallback,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Surface => f.write_str("surface"),
            Self::Fallback => f.write_str("fallback"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "surface" => Ok(Self::Surface),
            "fallback" | "mock" => Ok(Self::Fallback),
            other => bail!("unknown failure policy '{other}' (expected surface or fallback)"),
        }
    }
}

/// Cooperative cancellation flag shared with the in-flight request.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Turns a validated request into an image.
///
/// Without a usable credential the network is never touched and the mock
/// reference is returned. With one, the service is called exactly once;
/// failures are either surfaced or absorbed by the mock according to the
/// [`FailurePolicy`]. The pipeline never touches the ledger or the
/// project store.
pub struct GenerationPipeline {
    service: Box<dyn ImageService>,
    mock: MockFallback,
    policy: FailurePolicy,
    model: String,
    request_timeout: Duration,
}

impl GenerationPipeline {
    pub fn new(
        service: Box<dyn ImageService>,
        mock: MockFallback,
        policy: FailurePolicy,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            service,
            mock,
            policy,
            model: model.into(),
            request_timeout,
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn mock_mut(&mut self) -> &mut MockFallback {
        &mut self.mock
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    pub fn run(
        &self,
        request: &GenerationRequest,
        credential: Option<&Credential>,
        preferences: Option<&StylePreferences>,
        cancel: &CancelToken,
    ) -> Result<GenerationResult, GenerationError> {
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }
        let instruction = compose_instruction(
            request.mode,
            &request.instruction,
            request.quality_hint,
            preferences,
        );

        let Some(credential) = credential else {
            tracing::info!(mode = %request.mode, "no usable credential; serving mock result");
            let image = self.mock.produce(cancel)?;
            return Ok(GenerationResult::from_mock(image, Fallback::NoCredential));
        };

        let call = ServiceCall {
            image: &request.source_image,
            instruction: &instruction,
            model: &self.model,
            timeout: self.request_timeout,
        };
        let outcome = self
            .service
            .generate(credential, &call)
            .and_then(|payload| interpret_response(&payload));
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }

        match outcome {
            Ok(image) => Ok(GenerationResult::from_service(image)),
            Err(err) => {
                tracing::warn!(
                    service = self.service.name(),
                    code = err.code(),
                    error = %err,
                    policy = %self.policy,
                    "image service call failed"
                );
                match self.policy {
                    FailurePolicy::Surface => Err(err),
                    FailurePolicy::Fallback => {
                        let image = self.mock.produce(cancel)?;
                        Ok(GenerationResult::from_mock(image, Fallback::Failure(err)))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use flora_contracts::errors::GenerationError;
    use flora_contracts::media::Image;
    use flora_contracts::models::{Fallback, GenerationRequest, Mode, ResultSource};
    use flora_contracts::settings::Credential;
    use serde_json::{json, Value};

    use super::{CancelToken, FailurePolicy, GenerationPipeline};
    use crate::mock::{embedded_reference, MockFallback};
    use crate::prompts::preamble;
    use crate::service::{ImageService, ServiceCall};

    /// In-process stand-in for the generative service.
    #[derive(Clone)]
    pub(crate) struct ScriptedService {
        reply: Result<Value, GenerationError>,
        pub(crate) calls: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedService {
        pub(crate) fn replying(reply: Result<Value, GenerationError>) -> Self {
            Self {
                reply,
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub(crate) fn with_image(image: &Image) -> Self {
            Self::replying(Ok(json!({
                "candidates": [{
                    "finishReason": "STOP",
                    "content": {"parts": [{"inlineData": {
                        "mimeType": image.encoding(),
                        "data": image.to_inline(),
                    }}]}
                }]
            })))
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
        }
    }

    impl ImageService for ScriptedService {
        fn name(&self) -> &str {
            "scripted"
        }

        fn generate(&self, _credential: &Credential, call: &ServiceCall<'_>) -> Result<Value, GenerationError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(call.instruction.to_string());
            }
            self.reply.clone()
        }
    }

    pub(crate) fn test_credential() -> Credential {
        Credential::parse("AIzaSyA-valid-looking-key-0001").unwrap_or_else(|| panic!("valid key"))
    }

    pub(crate) fn photo() -> Image {
        Image::new(vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3], "image/jpeg").unwrap_or_else(|err| panic!("{err}"))
    }

    fn pipeline(service: ScriptedService, policy: FailurePolicy, delay: Duration) -> anyhow::Result<GenerationPipeline> {
        Ok(GenerationPipeline::new(
            Box::new(service),
            MockFallback::new(None, delay)?,
            policy,
            "gemini-2.5-flash-image",
            Duration::from_secs(5),
        ))
    }

    fn request(mode: Mode, instruction: &str) -> GenerationRequest {
        GenerationRequest::new(photo(), instruction, mode, false).unwrap_or_else(|err| panic!("{err}"))
    }

    #[test]
    fn no_credential_serves_mock_without_calling_service() -> anyhow::Result<()> {
        let service = ScriptedService::with_image(&photo());
        let pipeline = pipeline(service.clone(), FailurePolicy::Surface, Duration::from_millis(40))?;
        for mode in Mode::ALL {
            let started = Instant::now();
            let result = pipeline.run(&request(mode, "anything at all"), None, None, &CancelToken::new())?;
            assert!(started.elapsed() >= Duration::from_millis(40));
            assert!(started.elapsed() < Duration::from_secs(2));
            assert_eq!(result.source, ResultSource::Mock);
            assert_eq!(result.fallback, Some(Fallback::NoCredential));
            assert_eq!(result.image, embedded_reference()?);
        }
        assert_eq!(service.call_count(), 0);
        Ok(())
    }

    #[test]
    fn service_image_is_returned_on_success() -> anyhow::Result<()> {
        let produced = Image::new(vec![42; 16], "image/png")?;
        let service = ScriptedService::with_image(&produced);
        let pipeline = pipeline(service.clone(), FailurePolicy::Fallback, Duration::ZERO)?;
        let credential = test_credential();
        let result = pipeline.run(&request(Mode::Create, "add tulips"), Some(&credential), None, &CancelToken::new())?;
        assert_eq!(result.source, ResultSource::Service);
        assert_eq!(result.image, produced);

        let calls = service.calls.lock().map(|calls| calls.clone()).unwrap_or_default();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with(preamble(Mode::Create)));
        assert!(calls[0].contains("add tulips"));
        Ok(())
    }

    #[test]
    fn failures_fall_back_silently_under_fallback_policy() -> anyhow::Result<()> {
        let credential = test_credential();
        let failures = [
            Err(GenerationError::TransportFailure("connection reset".to_string())),
            Err(GenerationError::RateLimited),
            Ok(json!({"candidates": [{"finishReason": "SAFETY"}]})),
            Ok(json!({"candidates": []})),
        ];
        for reply in failures {
            let service = ScriptedService::replying(reply);
            let pipeline = pipeline(service.clone(), FailurePolicy::Fallback, Duration::ZERO)?;
            let result = pipeline.run(&request(Mode::Edit, "lilies"), Some(&credential), None, &CancelToken::new())?;
            assert!(result.is_mock());
            assert!(matches!(result.fallback, Some(Fallback::Failure(_))));
            assert_eq!(service.call_count(), 1);
        }
        Ok(())
    }

    #[test]
    fn failures_surface_typed_under_surface_policy() -> anyhow::Result<()> {
        let credential = test_credential();
        let cases = [
            (Err(GenerationError::RateLimited), "rate_limited"),
            (Ok(json!({"candidates": [{"finishReason": "IMAGE_SAFETY"}]})), "safety_rejected"),
            (Ok(json!({"candidates": [{"content": {"parts": [{"text": "no"}]}}]})), "no_image_produced"),
            (Err(GenerationError::TransportFailure("dns".to_string())), "transport_failure"),
        ];
        for (reply, code) in cases {
            let pipeline = pipeline(ScriptedService::replying(reply), FailurePolicy::Surface, Duration::ZERO)?;
            let err = pipeline
                .run(&request(Mode::Edit, "lilies"), Some(&credential), None, &CancelToken::new())
                .err()
                .map(|err| err.code());
            assert_eq!(err, Some(code));
        }
        Ok(())
    }

    #[test]
    fn cancelled_before_start_never_calls_service() -> anyhow::Result<()> {
        let service = ScriptedService::with_image(&photo());
        let pipeline = pipeline(service.clone(), FailurePolicy::Fallback, Duration::ZERO)?;
        let cancel = CancelToken::new();
        cancel.cancel();
        let credential = test_credential();
        let err = pipeline
            .run(&request(Mode::Edit, "x"), Some(&credential), None, &cancel)
            .err();
        assert_eq!(err, Some(GenerationError::Cancelled));
        assert_eq!(service.call_count(), 0);
        Ok(())
    }

    #[test]
    fn failure_policy_parses() -> anyhow::Result<()> {
        assert_eq!("Surface".parse::<FailurePolicy>()?, FailurePolicy::Surface);
        assert_eq!("mock".parse::<FailurePolicy>()?, FailurePolicy::Fallback);
        assert!("retry".parse::<FailurePolicy>().is_err());
        Ok(())
    }
}
