//! Upload validation.
//!
//! Both checks here run on the declared metadata and the byte count only,
//! so a rejected upload never reaches the decoder or the background remover.

use image::ImageFormat;

use crate::error::{Error, Result};

/// Content types accepted at intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// `image/jpeg` (or the non-standard `image/jpg`).
    Jpeg,
    /// `image/png`.
    Png,
}

impl ContentType {
    /// Parse a declared MIME type, ignoring case and parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedFormat`] for anything but JPEG or PNG.
    pub fn parse(declared: &str) -> Result<Self> {
        let essence = declared
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" => Ok(Self::Jpeg),
            "image/png" => Ok(Self::Png),
            _ => Err(Error::UnsupportedFormat(declared.to_string())),
        }
    }

    /// The matching `image` crate format.
    #[must_use]
    pub fn format(self) -> ImageFormat {
        match self {
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Png => ImageFormat::Png,
        }
    }

    /// The accepted type matching a sniffed image format, if any.
    #[must_use]
    pub fn from_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Jpeg => Some(Self::Jpeg),
            ImageFormat::Png => Some(Self::Png),
            _ => None,
        }
    }

    /// Canonical MIME string.
    #[must_use]
    pub fn mime(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

/// A validated upload: raw bytes plus their declared type.
#[derive(Debug, Clone)]
pub struct SourceImage {
    bytes: Vec<u8>,
    content_type: ContentType,
}

impl SourceImage {
    /// Validate an upload against the accepted types and the size ceiling.
    ///
    /// The content type is checked first, then the length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedFormat`] or [`Error::PayloadTooLarge`].
    pub fn new(bytes: Vec<u8>, content_type: &str, max_bytes: usize) -> Result<Self> {
        let content_type = ContentType::parse(content_type)?;
        if bytes.len() > max_bytes {
            return Err(Error::PayloadTooLarge {
                size: bytes.len(),
                limit: max_bytes,
            });
        }
        Ok(Self {
            bytes,
            content_type,
        })
    }

    /// The raw upload bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The declared content type.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.content_type
    }
}

/// Guess a content type from a file extension, as the CLI has no MIME header.
#[must_use]
pub fn content_type_for_path(path: &std::path::Path) -> Option<&'static str> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg" | "jpeg") => Some("image/jpeg"),
        Some("png") => Some("image/png"),
        _ => None,
    }
}
