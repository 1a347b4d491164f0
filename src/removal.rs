//! Background removal engines.
//!
//! An engine turns encoded image bytes into an RGBA cutout whose alpha is 0
//! where background was detected. Engines never raise: every failure comes
//! back as [`RemovalOutcome::Failed`] and the pipeline decides, in one place,
//! whether to fall back or abort.

use std::time::Duration;

use image::RgbaImage;

/// Default timeout for remote engines.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of one background removal attempt.
#[derive(Debug)]
pub enum RemovalOutcome {
    /// The subject with a transparent background.
    Cutout(RgbaImage),
    /// The engine could not produce a cutout.
    Failed {
        /// Human-readable cause.
        reason: String,
    },
}

impl RemovalOutcome {
    /// Shorthand for a failure.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Decode an engine's encoded reply into a cutout.
    #[must_use]
    pub fn from_encoded(bytes: &[u8]) -> Self {
        match image::load_from_memory(bytes) {
            Ok(img) => Self::Cutout(img.to_rgba8()),
            Err(e) => Self::failed(format!("undecodable engine output: {e}")),
        }
    }
}

/// A background removal capability shared by all in-flight requests.
pub trait BackgroundRemover: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &'static str;

    /// Whether the engine can be called at all.
    fn is_available(&self) -> bool {
        true
    }

    /// Cut the subject out of an encoded image.
    fn remove(&self, encoded: &[u8]) -> RemovalOutcome;
}

/// Stand-in used when no engine is configured; every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableRemover;

impl BackgroundRemover for UnavailableRemover {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn remove(&self, _encoded: &[u8]) -> RemovalOutcome {
        RemovalOutcome::failed("no background removal engine configured")
    }
}

/// Engine backed by an HTTP service.
///
/// The image is POSTed as the raw request body; the service answers with an
/// encoded RGBA image (normally PNG).
#[derive(Debug)]
pub struct RemoteRemover {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl RemoteRemover {
    /// Build a client for `endpoint` with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if the HTTP client cannot be built.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> crate::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| crate::Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    /// The configured endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl BackgroundRemover for RemoteRemover {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn remove(&self, encoded: &[u8]) -> RemovalOutcome {
        let mime = match image::guess_format(encoded) {
            Ok(image::ImageFormat::Png) => "image/png",
            _ => "image/jpeg",
        };
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, mime)
            .header(reqwest::header::ACCEPT, "image/png")
            .body(encoded.to_vec());
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }

        let response = match request.send() {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return RemovalOutcome::failed(format!("request to {} timed out", self.endpoint));
            }
            Err(e) => return RemovalOutcome::failed(format!("request failed: {e}")),
        };

        let status = response.status();
        if !status.is_success() {
            return RemovalOutcome::failed(format!("engine answered {status}"));
        }

        match response.bytes() {
            Ok(body) => RemovalOutcome::from_encoded(&body),
            Err(e) => RemovalOutcome::failed(format!("failed to read response body: {e}")),
        }
    }
}

#[cfg(feature = "onnx")]
pub use onnx::{OnnxModel, OnnxRemover};

#[cfg(feature = "onnx")]
mod onnx {
    //! Local saliency-model inference through ONNX Runtime.

    use std::path::Path;
    use std::sync::Mutex;

    use image::{GrayImage, Luma, Rgba, RgbImage, RgbaImage};
    use ndarray::Array4;
    use ort::session::Session;
    use ort::value::TensorRef;

    use super::{BackgroundRemover, RemovalOutcome};
    use crate::error::{Error, Result};
    use crate::resize;

    /// Supported segmentation models and their input resolution.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum OnnxModel {
        /// `u2net.onnx`, 320x320.
        U2Net,
        /// `u2netp.onnx`, the lightweight 320x320 variant.
        U2NetP,
        /// `rmbg-1.4.onnx`, 1024x1024.
        Rmbg14,
    }

    impl OnnxModel {
        /// Square input edge expected by the model.
        #[must_use]
        pub fn input_size(self) -> u32 {
            match self {
                Self::U2Net | Self::U2NetP => 320,
                Self::Rmbg14 => 1024,
            }
        }

        /// Guess the model from its file name.
        #[must_use]
        pub fn from_path(path: &Path) -> Self {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_ascii_lowercase();
            if name.starts_with("rmbg") {
                Self::Rmbg14
            } else if name.starts_with("u2netp") {
                Self::U2NetP
            } else {
                Self::U2Net
            }
        }
    }

    /// Engine running a segmentation model in-process.
    ///
    /// The session is loaded once; runs are serialized because the runtime
    /// needs exclusive access to execute.
    #[derive(Debug)]
    pub struct OnnxRemover {
        model: OnnxModel,
        session: Mutex<Session>,
        input_name: String,
    }

    impl OnnxRemover {
        /// Load a model file.
        ///
        /// # Errors
        ///
        /// Returns [`Error::Config`] if the file is missing or cannot be loaded.
        pub fn new(model_path: &Path) -> Result<Self> {
            if !model_path.exists() {
                return Err(Error::Config(format!(
                    "model file not found: {}",
                    model_path.display()
                )));
            }
            log::info!("Loading ONNX model from: {}", model_path.display());

            let session = Session::builder()
                .map_err(|e| Error::Config(format!("failed to create session: {e}")))?
                .commit_from_file(model_path)
                .map_err(|e| Error::Config(format!("failed to load model: {e}")))?;
            let input_name = session
                .inputs()
                .first()
                .map_or_else(|| "input".to_string(), |i| i.name().to_string());

            Ok(Self {
                model: OnnxModel::from_path(model_path),
                session: Mutex::new(session),
                input_name,
            })
        }

        fn mask(&self, image: &RgbImage) -> std::result::Result<GrayImage, String> {
            let size = self.model.input_size();
            let resized = resize::resize_exact(image, size, size);

            let side = size as usize;
            let mut input = Array4::<f32>::zeros((1, 3, side, side));
            for (x, y, px) in resized.enumerate_pixels() {
                for c in 0..3 {
                    input[[0, c, y as usize, x as usize]] = f32::from(px[c]) / 255.0;
                }
            }

            let tensor = TensorRef::from_array_view(input.view()).map_err(|e| e.to_string())?;
            let mut session = self
                .session
                .lock()
                .map_err(|_| "model session poisoned".to_string())?;
            let outputs = session
                .run(ort::inputs! { self.input_name.as_str() => tensor })
                .map_err(|e| e.to_string())?;
            let array = outputs[0]
                .try_extract_array::<f32>()
                .map_err(|e| e.to_string())?;

            let data: Vec<f32> = array.iter().copied().collect();
            if data.len() < side * side {
                return Err(format!("unexpected output shape {:?}", array.shape()));
            }
            let mask = GrayImage::from_fn(size, size, |x, y| {
                let v = data[y as usize * side + x as usize].clamp(0.0, 1.0);
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let alpha = (v * 255.0) as u8;
                Luma([alpha])
            });
            Ok(resize::resize_exact(&mask, image.width(), image.height()))
        }
    }

    impl BackgroundRemover for OnnxRemover {
        fn name(&self) -> &'static str {
            "onnx"
        }

        fn remove(&self, encoded: &[u8]) -> RemovalOutcome {
            let image = match image::load_from_memory(encoded) {
                Ok(img) => img.to_rgb8(),
                Err(e) => return RemovalOutcome::failed(format!("undecodable input: {e}")),
            };
            match self.mask(&image) {
                Ok(mask) => RemovalOutcome::Cutout(RgbaImage::from_fn(
                    image.width(),
                    image.height(),
                    |x, y| {
                        let p = image.get_pixel(x, y);
                        Rgba([p[0], p[1], p[2], mask.get_pixel(x, y)[0]])
                    },
                )),
                Err(reason) => RemovalOutcome::Failed { reason },
            }
        }
    }
}
