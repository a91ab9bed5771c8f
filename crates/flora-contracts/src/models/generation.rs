use serde::{Deserialize, Serialize};

use crate::errors::{GenerationError, InputKind};
use crate::media::{is_supported_encoding, Image};

use super::Mode;

/// What the user submitted, before pre-flight validation.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub image: Option<Image>,
    pub instruction: String,
    pub mode: Option<Mode>,
    pub quality_hint: bool,
}

impl Submission {
    pub fn new(image: Option<Image>, instruction: impl Into<String>, mode: Mode) -> Self {
        Self {
            image,
            instruction: instruction.into(),
            mode: Some(mode),
            quality_hint: false,
        }
    }

    pub fn with_quality_hint(mut self, quality_hint: bool) -> Self {
        self.quality_hint = quality_hint;
        self
    }
}

/// A validated request, built fresh per submission and never persisted.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub source_image: Image,
    pub instruction: String,
    pub mode: Mode,
    pub quality_hint: bool,
}

impl GenerationRequest {
    pub fn new(
        source_image: Image,
        instruction: impl Into<String>,
        mode: Mode,
        quality_hint: bool,
    ) -> Result<Self, GenerationError> {
        let instruction = instruction.into().trim().to_string();
        if mode.requires_instruction() && instruction.is_empty() {
            return Err(GenerationError::MissingInput(InputKind::Instruction));
        }
        Ok(Self {
            source_image,
            instruction,
            mode,
            quality_hint,
        })
    }
}

impl TryFrom<Submission> for GenerationRequest {
    type Error = GenerationError;

    fn try_from(submission: Submission) -> Result<Self, Self::Error> {
        let Some(image) = submission
            .image
            .filter(|image| !image.is_empty() && is_supported_encoding(image.encoding()))
        else {
            return Err(GenerationError::MissingInput(InputKind::Image));
        };
        let mode = submission.mode.unwrap_or(Mode::Edit);
        Self::new(image, submission.instruction, mode, submission.quality_hint)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Service,
    Mock,
}

/// Why a mock image stands in for a service result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fallback {
    NoCredential,
    Failure(GenerationError),
}

impl Fallback {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoCredential => "no_credential",
            Self::Failure(err) => err.code(),
        }
    }
}

/// Successful pipeline result. Always carries a complete image.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub image: Image,
    pub source: ResultSource,
    pub fallback: Option<Fallback>,
}

impl GenerationResult {
    pub fn from_service(image: Image) -> Self {
        Self {
            image,
            source: ResultSource::Service,
            fallback: None,
        }
    }

    pub fn from_mock(image: Image, fallback: Fallback) -> Self {
        Self {
            image,
            source: ResultSource::Mock,
            fallback: Some(fallback),
        }
    }

    pub fn is_mock(&self) -> bool {
        self.source == ResultSource::Mock
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{GenerationError, InputKind};
    use crate::media::Image;
    use crate::models::Mode;

    use super::{GenerationRequest, Submission};

    fn photo() -> Image {
        Image::new(vec![0xFF, 0xD8, 0xFF, 0xE0], "image/jpeg").unwrap_or_else(|err| panic!("{err}"))
    }

    #[test]
    fn submission_without_image_is_missing_input() {
        let err = GenerationRequest::try_from(Submission::new(None, "lilies", Mode::Edit))
            .err()
            .map(|err| err.code());
        assert_eq!(err, Some("missing_input"));
    }

    #[test]
    fn non_raster_upload_is_missing_input() -> anyhow::Result<()> {
        let document = Image::new(b"%PDF-1.7".to_vec(), "application/pdf")?;
        let err = GenerationRequest::try_from(Submission::new(Some(document), "lilies", Mode::Edit)).err();
        assert_eq!(err, Some(GenerationError::MissingInput(InputKind::Image)));
        Ok(())
    }

    #[test]
    fn edit_requires_instruction_but_humanize_does_not() {
        let err = GenerationRequest::new(photo(), "   ", Mode::Edit, false).err();
        assert_eq!(err, Some(GenerationError::MissingInput(InputKind::Instruction)));

        let request = GenerationRequest::new(photo(), "", Mode::Humanize, true);
        assert!(request.is_ok());
    }

    #[test]
    fn instruction_is_trimmed() -> anyhow::Result<()> {
        let request = GenerationRequest::try_from(
            Submission::new(Some(photo()), "  swap roses for lilies \n", Mode::Create)
                .with_quality_hint(true),
        )?;
        assert_eq!(request.instruction, "swap roses for lilies");
        assert!(request.quality_hint);
        assert_eq!(request.mode, Mode::Create);
        Ok(())
    }
}
