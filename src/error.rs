//! Error types for the photo-enhance crate.

/// Who is to blame for a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The caller sent something we refuse to process.
    Client,
    /// Processing or storage failed on our side.
    Server,
}

/// Errors that can occur while validating, processing, or storing a photo.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The declared content type is not JPEG or PNG.
    #[error("unsupported content type: {0} (JPEG or PNG only)")]
    UnsupportedFormat(String),

    /// The upload exceeds the configured size ceiling.
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge {
        /// Size of the upload in bytes.
        size: usize,
        /// Configured ceiling in bytes.
        limit: usize,
    },

    /// Background removal failed and the fallback policy is fail-fast.
    #[error("background removal failed: {0}")]
    BackgroundRemovalFailed(String),

    /// The source bytes could not be decoded as an image.
    #[error("failed to decode source image: {0}")]
    Decode(#[source] image::ImageError),

    /// An intermediate or final buffer could not be encoded.
    #[error("failed to encode image: {0}")]
    EncodingFailed(#[source] image::ImageError),

    /// No stored artifact exists under the requested name.
    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    /// The API key is missing or wrong.
    #[error("invalid API key")]
    Unauthorized,

    /// The account has no credits left.
    #[error("no credits left for {0}")]
    InsufficientCredits(String),

    /// The configuration is invalid or could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify the error as a client or server fault.
    #[must_use]
    pub fn fault(&self) -> Fault {
        match self {
            Self::UnsupportedFormat(_)
            | Self::PayloadTooLarge { .. }
            | Self::ArtifactNotFound(_)
            | Self::Unauthorized
            | Self::InsufficientCredits(_) => Fault::Client,
            Self::BackgroundRemovalFailed(_)
            | Self::Decode(_)
            | Self::EncodingFailed(_)
            | Self::Config(_)
            | Self::Io(_) => Fault::Server,
        }
    }

    /// HTTP status code a front-end should answer with.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnsupportedFormat(_) => 400,
            Self::Unauthorized => 401,
            Self::InsufficientCredits(_) => 402,
            Self::ArtifactNotFound(_) => 404,
            Self::PayloadTooLarge { .. } => 413,
            _ => 500,
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
