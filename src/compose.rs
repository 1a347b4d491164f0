//! Canvas composition: layout, drop shadow, alpha paste, flattening.

use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};

use crate::config::{CanvasLayout, ShadowConfig};
use crate::error::{Error, Result};
use crate::resize;

/// Canvas and backfill color.
pub const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Color of the drop shadow before opacity is applied.
const SHADOW_COLOR: [u8; 3] = [0, 0, 0];

/// Extra margin around the silhouette, in sigmas, so the blur is not clipped.
const SHADOW_MARGIN_SIGMAS: f32 = 3.0;

/// Where a cutout goes on its canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Canvas width.
    pub canvas_width: u32,
    /// Canvas height.
    pub canvas_height: u32,
    /// Left edge of the subject.
    pub x: i64,
    /// Top edge of the subject.
    pub y: i64,
}

/// Compute canvas size and subject offset for a cutout of `width x height`.
///
/// For [`CanvasLayout::Centered`] the cutout must already fit in the canvas.
///
/// # Errors
///
/// Returns [`Error::Config`] if the padded canvas does not fit in `u32`.
pub fn place(layout: CanvasLayout, width: u32, height: u32) -> Result<Placement> {
    match layout {
        CanvasLayout::Padded { padding } => {
            let grow = |edge: u32| {
                padding
                    .checked_mul(2)
                    .and_then(|border| edge.checked_add(border))
                    .ok_or_else(|| too_large(width, height))
            };
            Ok(Placement {
                canvas_width: grow(width)?,
                canvas_height: grow(height)?,
                x: i64::from(padding),
                y: i64::from(padding),
            })
        }
        CanvasLayout::Centered { size } => Ok(Placement {
            canvas_width: size,
            canvas_height: size,
            x: (i64::from(size) - i64::from(width)) / 2,
            y: (i64::from(size) - i64::from(height)) / 2,
        }),
    }
}

fn too_large(width: u32, height: u32) -> Error {
    Error::Config(format!("canvas for a {width}x{height} cutout is too large"))
}

/// An RGBA working canvas, opaque white until something is painted on it.
#[derive(Debug, Clone)]
pub struct Canvas {
    pixels: RgbaImage,
}

impl Canvas {
    /// A white canvas of the given size.
    #[must_use]
    pub fn white(width: u32, height: u32) -> Self {
        Self {
            pixels: RgbaImage::from_pixel(width, height, WHITE),
        }
    }

    /// Paint `layer` with its own alpha as the mask, top-left at `(x, y)`.
    ///
    /// Parts of the layer outside the canvas are clipped.
    pub fn paint(&mut self, layer: &RgbaImage, x: i64, y: i64) {
        let (cw, ch) = self.pixels.dimensions();
        for (lx, ly, src) in layer.enumerate_pixels() {
            let cx = x + i64::from(lx);
            let cy = y + i64::from(ly);
            let (Ok(cx), Ok(cy)) = (u32::try_from(cx), u32::try_from(cy)) else {
                continue;
            };
            if cx >= cw || cy >= ch || src[3] == 0 {
                continue;
            }
            let dst = self.pixels.get_pixel_mut(cx, cy);
            *dst = source_over(*src, *dst);
        }
    }

    /// Composite onto opaque white and drop the alpha channel.
    #[must_use]
    pub fn flatten(&self) -> RgbImage {
        let (w, h) = self.pixels.dimensions();
        RgbImage::from_fn(w, h, |x, y| {
            let px = source_over(*self.pixels.get_pixel(x, y), WHITE);
            Rgb([px[0], px[1], px[2]])
        })
    }

    /// The raw RGBA pixels.
    #[must_use]
    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }
}

/// Porter-Duff source-over of one pixel.
fn source_over(src: Rgba<u8>, dst: Rgba<u8>) -> Rgba<u8> {
    let sa = f32::from(src[3]) / 255.0;
    let da = f32::from(dst[3]) / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = [0u8; 4];
    for c in 0..3 {
        let v = (f32::from(src[c]) * sa + f32::from(dst[c]) * da * (1.0 - sa)) / out_a;
        out[c] = to_u8(v);
    }
    out[3] = to_u8(out_a * 255.0);
    Rgba(out)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Build a blurred shadow layer from a cutout's alpha channel.
///
/// Returns the layer and how far its top-left sits above and left of the
/// cutout's own top-left corner.
///
/// # Errors
///
/// Returns [`Error::Config`] if the blur margin makes the layer too large.
pub fn shadow_layer(
    cutout: &RgbaImage,
    shadow: &ShadowConfig,
) -> Result<(RgbaImage, u32)> {
    let (w, h) = cutout.dimensions();
    let margin = (shadow.blur_radius * SHADOW_MARGIN_SIGMAS).ceil();
    if !(0.0..=f32::from(u16::MAX)).contains(&margin) {
        return Err(too_large(w, h));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let margin = margin as u32;
    let grow = |edge: u32| edge.checked_add(2 * margin).ok_or_else(|| too_large(w, h));

    let mut silhouette = GrayImage::new(grow(w)?, grow(h)?);
    for (x, y, px) in cutout.enumerate_pixels() {
        silhouette.put_pixel(x + margin, y + margin, Luma([px[3]]));
    }
    let blurred = if shadow.blur_radius > 0.0 {
        imageproc::filter::gaussian_blur_f32(&silhouette, shadow.blur_radius)
    } else {
        silhouette
    };

    let [r, g, b] = SHADOW_COLOR;
    let layer = RgbaImage::from_fn(blurred.width(), blurred.height(), |x, y| {
        let alpha = to_u8(f32::from(blurred.get_pixel(x, y)[0]) * shadow.opacity);
        Rgba([r, g, b, alpha])
    });
    Ok((layer, margin))
}

/// Lay a cutout out on a white canvas, shadow first, and flatten to RGB.
///
/// # Errors
///
/// Returns [`Error::Config`] if the canvas or shadow layer would be too large.
pub fn compose(
    cutout: &RgbaImage,
    layout: CanvasLayout,
    shadow: Option<&ShadowConfig>,
) -> Result<RgbImage> {
    let fitted;
    let cutout = match layout {
        CanvasLayout::Centered { size } if cutout.width() > size || cutout.height() > size => {
            fitted = resize::fit_within(cutout, size);
            &fitted
        }
        _ => cutout,
    };

    let at = place(layout, cutout.width(), cutout.height())?;
    let mut canvas = Canvas::white(at.canvas_width, at.canvas_height);

    if let Some(shadow) = shadow {
        let (layer, margin) = shadow_layer(cutout, shadow)?;
        let margin = i64::from(margin);
        canvas.paint(
            &layer,
            at.x + shadow.offset_x - margin,
            at.y + shadow.offset_y - margin,
        );
    }
    canvas.paint(cutout, at.x, at.y);

    Ok(canvas.flatten())
}
