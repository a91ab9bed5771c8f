use std::io::Cursor;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use flora_contracts::errors::GenerationError;
use flora_contracts::media::Image;
use image::{ImageFormat, Rgb, RgbImage};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;

use crate::pipeline::CancelToken;

const REFERENCE_SIZE: u32 = 256;
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const MIN_FETCH_TIMEOUT: Duration = Duration::from_millis(250);
const CANCEL_POLL: Duration = Duration::from_millis(25);

/// Canned stand-in for a generation result.
///
/// Serves one fixed reference image: fetched once from `reference_url` when
/// configured, otherwise rendered in memory. The fetch runs inside the
/// artificial delay and its timeout is bounded by it.
pub struct MockFallback {
    reference_url: Option<String>,
    delay: Duration,
    http: HttpClient,
    embedded: Image,
    fetched: Mutex<Option<Image>>,
}

impl MockFallback {
    pub fn new(reference_url: Option<String>, delay: Duration) -> Result<Self> {
        Ok(Self {
            reference_url: reference_url.filter(|url| !url.trim().is_empty()),
            delay,
            http: HttpClient::new(),
            embedded: embedded_reference()?,
            fetched: Mutex::new(None),
        })
    }

    pub fn set_reference_url(&mut self, reference_url: Option<String>) {
        let reference_url = reference_url.filter(|url| !url.trim().is_empty());
        if reference_url != self.reference_url {
            self.reference_url = reference_url;
            if let Ok(mut fetched) = self.fetched.lock() {
                *fetched = None;
            }
        }
    }

    /// The fixed image this fallback serves. Never fails: a reference that
    /// cannot be fetched degrades to the embedded image.
    pub fn reference_image(&self) -> Image {
        let Some(url) = self.reference_url.as_deref() else {
            return self.embedded.clone();
        };
        if let Ok(guard) = self.fetched.lock() {
            if let Some(image) = guard.as_ref() {
                return image.clone();
            }
        }
        match self.fetch(url) {
            Ok(image) => {
                if let Ok(mut guard) = self.fetched.lock() {
                    *guard = Some(image.clone());
                }
                image
            }
            Err(err) => {
                tracing::warn!(%url, error = %format!("{err:#}"), "mock reference fetch failed; using embedded image");
                if let Ok(mut guard) = self.fetched.lock() {
                    *guard = Some(self.embedded.clone());
                }
                self.embedded.clone()
            }
        }
    }

    /// Resolves the reference image, then waits out what is left of the
    /// artificial delay.
    pub fn produce(&self, cancel: &CancelToken) -> Result<Image, GenerationError> {
        let started = Instant::now();
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }
        let image = self.reference_image();
        while started.elapsed() < self.delay {
            if cancel.is_cancelled() {
                return Err(GenerationError::Cancelled);
            }
            let remaining = self.delay.saturating_sub(started.elapsed());
            thread::sleep(remaining.min(CANCEL_POLL));
        }
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }
        Ok(image)
    }

    fn fetch(&self, url: &str) -> Result<Image> {
        let response = self
            .http
            .get(url)
            .timeout(self.delay.clamp(MIN_FETCH_TIMEOUT, FETCH_TIMEOUT))
            .send()
            .with_context(|| format!("mock reference request failed ({url})"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("mock reference request failed ({})", status.as_u16());
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or_default().trim().to_string());
        let bytes = response
            .bytes()
            .context("mock reference body read failed")?
            .to_vec();
        match content_type.filter(|value| value.starts_with("image/")) {
            Some(encoding) => Image::new(bytes, encoding),
            None => Image::sniffed(bytes),
        }
    }
}

/// Deterministic bouquet on a soft backdrop, encoded as PNG.
pub fn embedded_reference() -> Result<Image> {
    let size = REFERENCE_SIZE;
    let mut canvas = RgbImage::new(size, size);
    for (_, y, pixel) in canvas.enumerate_pixels_mut() {
        let shade = (y * 40 / size) as u8;
        *pixel = Rgb([236 - shade, 230 - shade, 220 - shade / 2]);
    }

    let blooms: [(f32, f32, f32, [u8; 3]); 5] = [
        (128.0, 96.0, 30.0, [214, 92, 120]),
        (88.0, 120.0, 24.0, [240, 180, 190]),
        (168.0, 120.0, 24.0, [250, 238, 236]),
        (108.0, 150.0, 20.0, [196, 60, 92]),
        (148.0, 150.0, 20.0, [244, 200, 120]),
    ];
    for (x, y, pixel) in canvas.enumerate_pixels_mut() {
        let (fx, fy) = (x as f32, y as f32);
        if (fx - 128.0).abs() < 3.0 && fy > 150.0 && fy < 230.0 {
            *pixel = Rgb([70, 120, 64]);
        }
        for (cx, cy, radius, color) in blooms {
            let dist = ((fx - cx).powi(2) + (fy - cy).powi(2)).sqrt();
            if dist < radius {
                let centre = dist < radius * 0.3;
                *pixel = if centre { Rgb([250, 214, 90]) } else { Rgb(color) };
            }
        }
    }

    let mut encoded = Cursor::new(Vec::new());
    canvas
        .write_to(&mut encoded, ImageFormat::Png)
        .context("failed to encode mock reference image")?;
    Image::new(encoded.into_inner(), "image/png")
}
