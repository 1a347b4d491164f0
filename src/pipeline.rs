//! The enhancement pipeline: decode, cut out, compose, enhance, resize, encode.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;

use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};

use crate::compose;
use crate::config::{CanvasLayout, FitMode, PipelineConfig, RemovalFallback};
use crate::decode::{self, DecodedSource};
use crate::enhance;
use crate::error::{Error, Result};
use crate::intake::SourceImage;
use crate::removal::{BackgroundRemover, RemovalOutcome};
use crate::resize;

/// The image pipeline holding its configuration and removal engine.
///
/// Create once and share across threads; every call is independent.
pub struct Pipeline {
    config: PipelineConfig,
    remover: Arc<dyn BackgroundRemover>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("remover", &self.remover.name())
            .finish()
    }
}

impl Pipeline {
    /// Create a pipeline after validating its configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn new(config: PipelineConfig, remover: Arc<dyn BackgroundRemover>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, remover })
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The background removal engine.
    #[must_use]
    pub fn remover(&self) -> &dyn BackgroundRemover {
        self.remover.as_ref()
    }

    /// Validate, process, and PNG-encode an upload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedFormat`] or [`Error::PayloadTooLarge`]
    /// before any decoding, otherwise any error from [`Pipeline::render`]
    /// or [`encode_png`].
    pub fn process(&self, bytes: Vec<u8>, content_type: &str) -> Result<Vec<u8>> {
        let source = SourceImage::new(bytes, content_type, self.config.max_upload_bytes)?;
        let image = self.render(&source)?;
        encode_png(&image)
    }

    /// Decode, cut out, compose, enhance, and resize a validated upload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedFormat`] if the bytes are neither JPEG nor
    /// PNG, [`Error::Decode`] for unreadable input, [`Error::EncodingFailed`]
    /// if the intermediate buffer cannot be encoded,
    /// [`Error::BackgroundRemovalFailed`] under the fail-fast policy, and
    /// [`Error::Config`] if the canvas would be too large.
    pub fn render(&self, source: &SourceImage) -> Result<RgbImage> {
        let started = Instant::now();

        let decoded = decode::decode(source)?.downscaled(self.config.pre_downscale);
        log::debug!(
            "decoded {}x{} (working {}x{}) in {:?}",
            decoded.original_dimensions.0,
            decoded.original_dimensions.1,
            decoded.working.width(),
            decoded.working.height(),
            started.elapsed()
        );

        let cutout = self.cut_out(&decoded.working)?;
        let layout = self.layout();
        let cutout = self.fit(&cutout, &decoded);

        let flat = compose::compose(&cutout, layout, self.config.shadow.as_ref())?;
        let enhanced = enhance::enhance(&flat, &self.config.enhancement);

        let (width, height) = match self.config.fit {
            FitMode::Original => decoded.original_dimensions,
            FitMode::Box(_) => (self.config.target_size, self.config.target_size),
        };
        let output = resize::resize_exact(&enhanced, width, height);

        log::debug!(
            "rendered {}x{} in {:?}",
            output.width(),
            output.height(),
            started.elapsed()
        );
        Ok(output)
    }

    /// Remove the background, applying the configured fallback on failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackgroundRemovalFailed`] when the engine fails and the
    /// policy is [`RemovalFallback::Fail`].
    pub fn cut_out(&self, working: &RgbImage) -> Result<RgbaImage> {
        let encoded = decode::encode_intermediate(working)?;
        let started = Instant::now();
        let outcome = self.remover.remove(&encoded);
        log::debug!(
            "background removal ({}) took {:?}",
            self.remover.name(),
            started.elapsed()
        );

        match (outcome, self.config.fallback) {
            (RemovalOutcome::Cutout(cutout), _) => Ok(cutout),
            (RemovalOutcome::Failed { reason }, RemovalFallback::Opaque) => {
                log::warn!("background removal failed, using opaque source: {reason}");
                Ok(DynamicImage::ImageRgb8(working.clone()).to_rgba8())
            }
            (RemovalOutcome::Failed { reason }, RemovalFallback::Fail) => {
                Err(Error::BackgroundRemovalFailed(reason))
            }
        }
    }

    /// Canvas layout for this run.
    ///
    /// A fixed square canvas cannot hold the source resolution, so in
    /// [`FitMode::Original`] the subject fills the whole canvas instead.
    fn layout(&self) -> CanvasLayout {
        match (self.config.fit, self.config.layout) {
            (FitMode::Original, CanvasLayout::Centered { .. }) => {
                CanvasLayout::Padded { padding: 0 }
            }
            (_, layout) => layout,
        }
    }

    /// Size the cutout according to the fit mode.
    ///
    /// In [`FitMode::Original`] the cutout takes the source size minus the
    /// border, so the padded canvas comes out at the source size.
    fn fit(&self, cutout: &RgbaImage, decoded: &DecodedSource) -> RgbaImage {
        match self.config.fit {
            FitMode::Box(max) => resize::fit_within(cutout, max),
            FitMode::Original => {
                let (w, h) = decoded.original_dimensions;
                let border = match self.layout() {
                    CanvasLayout::Padded { padding } => padding.saturating_mul(2),
                    CanvasLayout::Centered { .. } => 0,
                };
                let inner_w = w.saturating_sub(border).max(1);
                let inner_h = h.saturating_sub(border).max(1);
                resize::resize_exact(cutout, inner_w, inner_h)
            }
        }
    }
}

/// Encode the final raster as PNG.
///
/// # Errors
///
/// Returns [`Error::EncodingFailed`] if encoding fails.
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(Error::EncodingFailed)?;
    Ok(buf.into_inner())
}
