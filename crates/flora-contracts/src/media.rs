use std::path::Path;

use anyhow::{bail, Context};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Raw image bytes tagged with their MIME encoding.
///
/// Serialized as a data URL so persisted documents (projects, previews) stay
/// plain JSON strings.
#[derive(Clone, PartialEq, Eq)]
pub struct Image {
    bytes: Vec<u8>,
    encoding: String,
}

impl Image {
    pub fn new(bytes: Vec<u8>, encoding: impl Into<String>) -> anyhow::Result<Self> {
        if bytes.is_empty() {
            bail!("image payload is empty");
        }
        let encoding = encoding.into().trim().to_ascii_lowercase();
        if encoding.is_empty() {
            bail!("image encoding is empty");
        }
        Ok(Self { bytes, encoding })
    }

    /// Builds an image from bytes whose encoding is unknown, sniffing the
    /// format from the content.
    pub fn sniffed(bytes: Vec<u8>) -> anyhow::Result<Self> {
        let encoding = sniff_encoding(&bytes).context("unrecognized image format")?;
        Self::new(bytes, encoding)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let encoding = sniff_encoding(&bytes)
            .or_else(|| mime_for_path(path))
            .with_context(|| format!("{} is not a supported image", path.display()))?;
        Self::new(bytes, encoding)
    }

    /// Base64 payload and MIME type, the shape generative services accept
    /// for inline parts.
    pub fn from_inline(data: &str, encoding: &str) -> anyhow::Result<Self> {
        let bytes = BASE64
            .decode(data.trim().as_bytes())
            .context("inline image base64 decode failed")?;
        Self::new(bytes, encoding)
    }

    pub fn from_data_url(raw: &str) -> anyhow::Result<Self> {
        let Some(rest) = raw.trim().strip_prefix("data:") else {
            bail!("not a data URL");
        };
        let Some((header, data)) = rest.split_once(',') else {
            bail!("data URL has no payload separator");
        };
        let Some(encoding) = header.strip_suffix(";base64") else {
            bail!("data URL is not base64 encoded");
        };
        Self::from_inline(data, encoding)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_inline(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.encoding, self.to_inline())
    }

    /// Short content hash, stable across re-encodings of the same bytes.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.bytes);
        hex::encode(&digest[..8])
    }

    pub fn extension(&self) -> &'static str {
        match self.encoding.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            "image/bmp" => "bmp",
            _ => "png",
        }
    }

    pub fn write_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &self.bytes)
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("encoding", &self.encoding)
            .field("len", &self.bytes.len())
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl Serialize for Image {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_data_url())
    }
}

impl<'de> Deserialize<'de> for Image {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_data_url(&raw).map_err(serde::de::Error::custom)
    }
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

pub fn is_supported_encoding(encoding: &str) -> bool {
    matches!(
        encoding.trim().to_ascii_lowercase().as_str(),
        "image/png" | "image/jpeg" | "image/jpg" | "image/webp" | "image/gif" | "image/bmp"
    )
}

fn sniff_encoding(bytes: &[u8]) -> Option<&'static str> {
    let format = image::guess_format(bytes).ok()?;
    match format {
        image::ImageFormat::Png => Some("image/png"),
        image::ImageFormat::Jpeg => Some("image/jpeg"),
        image::ImageFormat::WebP => Some("image/webp"),
        image::ImageFormat::Gif => Some("image/gif"),
        image::ImageFormat::Bmp => Some("image/bmp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{is_supported_encoding, mime_for_path, Image};

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    #[test]
    fn data_url_keeps_encoding_and_bytes() -> anyhow::Result<()> {
        let image = Image::new(vec![1, 2, 3, 4], "image/JPEG")?;
        let url = image.to_data_url();
        assert!(url.starts_with("data:image/jpeg;base64,"));
        assert_eq!(Image::from_data_url(&url)?, image);
        Ok(())
    }

    #[test]
    fn rejects_empty_payloads_and_foreign_urls() {
        assert!(Image::new(Vec::new(), "image/png").is_err());
        assert!(Image::from_data_url("https://example.com/a.png").is_err());
        assert!(Image::from_data_url("data:image/png,plain").is_err());
    }

    #[test]
    fn sniffs_png_from_content() -> anyhow::Result<()> {
        let image = Image::sniffed(PNG_MAGIC.to_vec())?;
        assert_eq!(image.encoding(), "image/png");
        assert_eq!(image.extension(), "png");
        Ok(())
    }

    #[test]
    fn from_path_prefers_content_over_extension() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("mislabeled.jpg");
        std::fs::write(&path, PNG_MAGIC)?;
        assert_eq!(Image::from_path(&path)?.encoding(), "image/png");
        Ok(())
    }

    #[test]
    fn serde_uses_data_url_strings() -> anyhow::Result<()> {
        let image = Image::new(vec![9, 9], "image/webp")?;
        let value = serde_json::to_value(&image)?;
        assert_eq!(value.as_str(), Some(image.to_data_url().as_str()));
        let back: Image = serde_json::from_value(value)?;
        assert_eq!(back.fingerprint(), image.fingerprint());
        Ok(())
    }

    #[test]
    fn mime_lookup_covers_common_rasters() {
        assert_eq!(mime_for_path(Path::new("room.JPEG")), Some("image/jpeg"));
        assert_eq!(mime_for_path(Path::new("room.tiff")), None);
        assert!(is_supported_encoding("image/webp"));
        assert!(!is_supported_encoding("application/pdf"));
    }
}
