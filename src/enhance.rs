//! Brightness, contrast, color, and sharpness adjustments.
//!
//! Each adjustment interpolates between a *degenerate* version of the image
//! and the image itself:
//!
//! `out = degenerate + factor * (current - degenerate)`
//!
//! A factor of 1.0 is the identity, values above 1.0 push away from the
//! degenerate image. The four adjustments run as a fold: each one sees the
//! output of the previous one, so their order changes the result.

use image::{Rgb, RgbImage};

use crate::config::EnhancementFactors;

/// One of the four adjustments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enhancement {
    /// Scale toward/away from black.
    Brightness,
    /// Scale toward/away from the mean gray level.
    Contrast,
    /// Scale toward/away from the per-pixel grayscale.
    Color,
    /// Scale toward/away from a smoothed copy.
    Sharpness,
}

/// The fixed application order.
pub const ORDER: [Enhancement; 4] = [
    Enhancement::Brightness,
    Enhancement::Contrast,
    Enhancement::Color,
    Enhancement::Sharpness,
];

impl Enhancement {
    /// Pick this adjustment's factor out of the configuration.
    #[must_use]
    pub fn factor(self, factors: &EnhancementFactors) -> f32 {
        match self {
            Self::Brightness => factors.brightness,
            Self::Contrast => factors.contrast,
            Self::Color => factors.color,
            Self::Sharpness => factors.sharpness,
        }
    }

    /// Apply this adjustment to `image`, producing a new buffer.
    #[must_use]
    pub fn apply(self, image: &RgbImage, factor: f32) -> RgbImage {
        let degenerate = match self {
            Self::Brightness => RgbImage::new(image.width(), image.height()),
            Self::Contrast => {
                let mean = mean_luma(image);
                RgbImage::from_pixel(image.width(), image.height(), Rgb([mean; 3]))
            }
            Self::Color => grayscale(image),
            Self::Sharpness => smooth(image),
        };
        blend(&degenerate, image, factor)
    }
}

/// Ordered `(adjustment, factor)` pairs for a configuration.
#[must_use]
pub fn steps(factors: &EnhancementFactors) -> [(Enhancement, f32); 4] {
    ORDER.map(|e| (e, e.factor(factors)))
}

/// Run the adjustments in order, each on the previous step's output.
#[must_use]
pub fn enhance_with(image: &RgbImage, steps: &[(Enhancement, f32)]) -> RgbImage {
    steps
        .iter()
        .fold(image.clone(), |current, &(step, factor)| step.apply(&current, factor))
}

/// Run all four adjustments in their fixed order.
#[must_use]
pub fn enhance(image: &RgbImage, factors: &EnhancementFactors) -> RgbImage {
    enhance_with(image, &steps(factors))
}

/// `degenerate + factor * (image - degenerate)`, clamped and truncated.
fn blend(degenerate: &RgbImage, image: &RgbImage, factor: f32) -> RgbImage {
    let mut out = RgbImage::new(image.width(), image.height());
    for ((o, d), i) in out.iter_mut().zip(degenerate.as_raw()).zip(image.as_raw()) {
        let d = f32::from(*d);
        let v = d + factor * (f32::from(*i) - d);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            *o = v.clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// ITU-R 601 luma in 16.16 fixed point.
fn luma(px: Rgb<u8>) -> u8 {
    let [r, g, b] = px.0;
    let l = (u32::from(r) * 19595 + u32::from(g) * 38470 + u32::from(b) * 7471 + 0x8000) >> 16;
    u8::try_from(l).unwrap_or(u8::MAX)
}

/// Rounded mean luma of the whole image.
fn mean_luma(image: &RgbImage) -> u8 {
    let count = u64::from(image.width()) * u64::from(image.height());
    if count == 0 {
        return 0;
    }
    let sum: u64 = image.pixels().map(|p| u64::from(luma(*p))).sum();
    u8::try_from((sum + count / 2) / count).unwrap_or(u8::MAX)
}

fn grayscale(image: &RgbImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        Rgb([luma(*image.get_pixel(x, y)); 3])
    })
}

/// 3x3 smoothing kernel `[1 1 1; 1 5 1; 1 1 1] / 13`; border pixels are copied.
fn smooth(image: &RgbImage) -> RgbImage {
    const KERNEL: [[f32; 3]; 3] = [[1.0, 1.0, 1.0], [1.0, 5.0, 1.0], [1.0, 1.0, 1.0]];
    const SCALE: f32 = 13.0;

    let (w, h) = image.dimensions();
    let mut out = image.clone();
    if w < 3 || h < 3 {
        return out;
    }

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let mut acc = [0.0_f32; 3];
            for (ky, row) in KERNEL.iter().enumerate() {
                for (kx, weight) in row.iter().enumerate() {
                    #[allow(clippy::cast_possible_truncation)]
                    let px = image.get_pixel(x + kx as u32 - 1, y + ky as u32 - 1);
                    for c in 0..3 {
                        acc[c] += weight * f32::from(px[c]);
                    }
                }
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let px = Rgb(acc.map(|v| (v / SCALE).round().clamp(0.0, 255.0) as u8));
            out.put_pixel(x, y, px);
        }
    }
    out
}
