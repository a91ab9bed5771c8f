//! User-facing failure taxonomy of a generation submission.
//!
//! Pre-flight variants are raised before any credit is charged or any
//! service call is made. Service variants come out of the pipeline and are
//! normally absorbed by the mock fallback.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Image,
    Instruction,
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => f.write_str("image"),
            Self::Instruction => f.write_str("instruction"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("missing required {0}")]
    MissingInput(InputKind),

    #[error("insufficient credits: balance {balance}, cost {cost}")]
    InsufficientCredits { balance: u64, cost: u64 },

    #[error("guest generation already used; sign in to continue")]
    AuthenticationRequired,

    #[error("service rejected the request: {reason}")]
    SafetyRejected { reason: String },

    #[error("service returned no image")]
    NoImageProduced,

    #[error("service rate limit reached")]
    RateLimited,

    #[error("service call failed: {0}")]
    TransportFailure(String),

    #[error("generation cancelled")]
    Cancelled,
}

impl GenerationError {
    /// Failures detected before the ledger or the service is touched.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::MissingInput(_) | Self::InsufficientCredits { .. } | Self::AuthenticationRequired
        )
    }

    /// Stable machine-readable code used in events and the usage log.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingInput(_) => "missing_input",
            Self::InsufficientCredits { .. } => "insufficient_credits",
            Self::AuthenticationRequired => "authentication_required",
            Self::SafetyRejected { .. } => "safety_rejected",
            Self::NoImageProduced => "no_image_produced",
            Self::RateLimited => "rate_limited",
            Self::TransportFailure(_) => "transport_failure",
            Self::Cancelled => "cancelled",
        }
    }

    /// Text shown to the user. Never includes transport or service detail.
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingInput(InputKind::Image) => {
                "Please upload a photo of the space first.".to_string()
            }
            Self::MissingInput(InputKind::Instruction) => {
                "Describe the floral change you would like to see.".to_string()
            }
            Self::InsufficientCredits { balance, cost } => format!(
                "This design needs {cost} credits but you have {balance}. Buy more credits to continue."
            ),
            Self::AuthenticationRequired => {
                "You have used your free design. Sign in to keep creating.".to_string()
            }
            Self::SafetyRejected { .. } => {
                "The request could not be processed. Try a simpler instruction or a different image."
                    .to_string()
            }
            Self::RateLimited => {
                "Usage limit reached. Please wait a moment and try again.".to_string()
            }
            Self::NoImageProduced | Self::TransportFailure(_) => {
                "The design could not be generated. Please try again.".to_string()
            }
            Self::Cancelled => "The design was cancelled.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{GenerationError, InputKind};

    #[test]
    fn preflight_classification() {
        assert!(GenerationError::MissingInput(InputKind::Image).is_preflight());
        assert!(GenerationError::InsufficientCredits { balance: 5, cost: 10 }.is_preflight());
        assert!(GenerationError::AuthenticationRequired.is_preflight());
        assert!(!GenerationError::RateLimited.is_preflight());
        assert!(!GenerationError::TransportFailure("reset".to_string()).is_preflight());
    }

    #[test]
    fn user_messages_hide_technical_detail() {
        let err = GenerationError::TransportFailure("tcp connect error: 127.0.0.1:9".to_string());
        assert!(!err.user_message().contains("127.0.0.1"));
        let err = GenerationError::SafetyRejected {
            reason: "IMAGE_SAFETY".to_string(),
        };
        assert!(!err.user_message().contains("IMAGE_SAFETY"));
        assert!(err.user_message().contains("simpler instruction"));
    }

    #[test]
    fn insufficient_credit_message_names_amounts() {
        let message = GenerationError::InsufficientCredits { balance: 5, cost: 10 }.user_message();
        assert!(message.contains("10 credits"));
        assert!(message.contains("you have 5"));
    }
}
