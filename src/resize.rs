//! Aspect-preserving resampling helpers.
//!
//! All resizing in the pipeline goes through Lanczos3, the closest match to
//! a high-quality photographic downscale.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Pixel};

/// Filter used for every resize in the pipeline.
pub const FILTER: FilterType = FilterType::Lanczos3;

/// Compute the size of `width x height` shrunk to fit in a `max x max` box.
///
/// Images already inside the box keep their size; nothing is ever enlarged.
/// Neither output dimension drops below 1.
#[must_use]
pub fn fit_dimensions(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }

    let scale = f64::from(max) / f64::from(width.max(height));
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let scaled = |v: u32| ((f64::from(v) * scale).round() as u32).clamp(1, max);
    (scaled(width), scaled(height))
}

/// Shrink an image to fit in a `max x max` box, keeping aspect ratio.
///
/// Returns a copy unchanged when the image already fits.
#[must_use]
pub fn fit_within<P>(
    image: &ImageBuffer<P, Vec<P::Subpixel>>,
    max: u32,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel + 'static,
    P::Subpixel: 'static,
{
    let (w, h) = fit_dimensions(image.width(), image.height(), max);
    resize_exact(image, w, h)
}

/// Resize to exactly `width x height`, ignoring aspect ratio.
#[must_use]
pub fn resize_exact<P>(
    image: &ImageBuffer<P, Vec<P::Subpixel>>,
    width: u32,
    height: u32,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel + 'static,
    P::Subpixel: 'static,
{
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    imageops::resize(image, width, height, FILTER)
}
