//! Pipeline configuration.
//!
//! Every numeric constant of the pipeline lives here so deployments can
//! tune them from a TOML file instead of recompiling.
//!
//! ```toml
//! max_upload_bytes = 10485760
//! pre_downscale = 1500
//! target_size = 1080
//! fallback = "fail"
//!
//! [fit]
//! box = 900
//!
//! [layout]
//! padded = { padding = 90 }
//!
//! [enhancement]
//! brightness = 1.15
//! contrast = 1.15
//! color = 1.20
//! sharpness = 1.10
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default upload ceiling: 10 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Largest accepted value for any configured edge length.
pub const MAX_EDGE: u32 = 16_384;

/// Largest accepted canvas border.
pub const MAX_PADDING: u32 = 4_096;

/// Largest accepted shadow blur sigma.
pub const MAX_BLUR_RADIUS: f32 = 500.0;

/// What to do when background removal fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalFallback {
    /// Use the source image as a fully opaque cutout and keep going.
    Opaque,
    /// Abort the request with [`Error::BackgroundRemovalFailed`].
    #[default]
    Fail,
}

/// How the cutout is sized before composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Shrink into an `n x n` box, keeping aspect ratio.
    Box(u32),
    /// Resize back to the decoded source resolution and skip the final resize.
    Original,
}

impl Default for FitMode {
    fn default() -> Self {
        Self::Box(900)
    }
}

/// Where the cutout lands on the white canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanvasLayout {
    /// Canvas is the cutout plus a uniform border.
    Padded {
        /// Border width in pixels on every side.
        padding: u32,
    },
    /// Fixed square canvas with the cutout centered.
    Centered {
        /// Canvas edge length in pixels.
        size: u32,
    },
}

impl Default for CanvasLayout {
    fn default() -> Self {
        Self::Padded { padding: 90 }
    }
}

/// Drop shadow painted behind the subject.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Gaussian blur sigma applied to the silhouette.
    pub blur_radius: f32,
    /// Horizontal offset from the subject position.
    pub offset_x: i64,
    /// Vertical offset from the subject position.
    pub offset_y: i64,
    /// Peak shadow opacity in `[0, 1]`.
    pub opacity: f32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            blur_radius: 20.0,
            offset_x: 10,
            offset_y: 15,
            opacity: 0.5,
        }
    }
}

/// Multipliers for the four enhancement steps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancementFactors {
    /// Brightness multiplier.
    pub brightness: f32,
    /// Contrast multiplier.
    pub contrast: f32,
    /// Color saturation multiplier.
    pub color: f32,
    /// Sharpness multiplier.
    pub sharpness: f32,
}

impl Default for EnhancementFactors {
    fn default() -> Self {
        Self {
            brightness: 1.15,
            contrast: 1.15,
            color: 1.20,
            sharpness: 1.10,
        }
    }
}

/// Complete configuration of the enhancement pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Largest accepted upload in bytes.
    pub max_upload_bytes: usize,
    /// Longest edge before background removal, `None` to skip.
    pub pre_downscale: Option<u32>,
    /// Cutout sizing policy.
    pub fit: FitMode,
    /// Canvas layout.
    pub layout: CanvasLayout,
    /// Optional drop shadow.
    pub shadow: Option<ShadowConfig>,
    /// Enhancement multipliers.
    pub enhancement: EnhancementFactors,
    /// Edge length of the square output.
    pub target_size: u32,
    /// Background removal failure policy.
    pub fallback: RemovalFallback,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            pre_downscale: Some(1500),
            fit: FitMode::default(),
            layout: CanvasLayout::default(),
            shadow: None,
            enhancement: EnhancementFactors::default(),
            target_size: 1080,
            fallback: RemovalFallback::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on malformed TOML or invalid values.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, otherwise as
    /// [`PipelineConfig::from_toml_str`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check that all sizes and factors are usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.max_upload_bytes == 0 {
            return Err(Error::Config("max_upload_bytes must be positive".into()));
        }
        let edges = [
            ("pre_downscale", self.pre_downscale),
            (
                "fit box",
                match self.fit {
                    FitMode::Box(n) => Some(n),
                    FitMode::Original => None,
                },
            ),
            (
                "centered canvas size",
                match self.layout {
                    CanvasLayout::Centered { size } => Some(size),
                    CanvasLayout::Padded { .. } => None,
                },
            ),
            ("target_size", Some(self.target_size)),
        ];
        for (name, edge) in edges {
            if let Some(edge) = edge {
                if !(1..=MAX_EDGE).contains(&edge) {
                    return Err(Error::Config(format!(
                        "{name} must be within 1..={MAX_EDGE}, got {edge}"
                    )));
                }
            }
        }
        if let CanvasLayout::Padded { padding } = self.layout {
            if padding > MAX_PADDING {
                return Err(Error::Config(format!(
                    "padding must be at most {MAX_PADDING}, got {padding}"
                )));
            }
        }

        let factors = [
            ("brightness", self.enhancement.brightness),
            ("contrast", self.enhancement.contrast),
            ("color", self.enhancement.color),
            ("sharpness", self.enhancement.sharpness),
        ];
        for (name, factor) in factors {
            if !factor.is_finite() || factor < 0.0 {
                return Err(Error::Config(format!(
                    "{name} factor must be a non-negative number, got {factor}"
                )));
            }
        }

        if let Some(shadow) = &self.shadow {
            if !(0.0..=MAX_BLUR_RADIUS).contains(&shadow.blur_radius) {
                return Err(Error::Config(format!(
                    "shadow blur_radius must be within 0..={MAX_BLUR_RADIUS}"
                )));
            }
            let max_offset = i64::from(MAX_EDGE);
            if shadow.offset_x.abs() > max_offset || shadow.offset_y.abs() > max_offset {
                return Err(Error::Config(format!(
                    "shadow offset must be within -{MAX_EDGE}..={MAX_EDGE}"
                )));
            }
            if !(0.0..=1.0).contains(&shadow.opacity) {
                return Err(Error::Config("shadow opacity must be within 0..=1".into()));
            }
        }

        Ok(())
    }
}
