//! Source decoding: orientation fix, RGB conversion, pre-downscale.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageDecoder, ImageReader, RgbImage};

use crate::error::{Error, Result};
use crate::intake::{ContentType, SourceImage};
use crate::resize;

/// JPEG quality of the buffer handed to the background remover.
const INTERMEDIATE_JPEG_QUALITY: u8 = 90;

/// A decoded, upright RGB source.
#[derive(Debug, Clone)]
pub struct DecodedSource {
    /// Dimensions after orientation correction, before any downscale.
    pub original_dimensions: (u32, u32),
    /// The image the rest of the pipeline works on.
    pub working: RgbImage,
}

/// Decode a validated upload and rotate it upright according to EXIF.
///
/// The byte signature wins over the declared content type when both are
/// JPEG or PNG; the declared type is only used when the signature is unknown.
///
/// # Errors
///
/// Returns [`Error::UnsupportedFormat`] if the bytes are some other image
/// format, and [`Error::Decode`] if they are not a readable image.
pub fn decode(source: &SourceImage) -> Result<DecodedSource> {
    let mut reader = ImageReader::new(Cursor::new(source.bytes()))
        .with_guessed_format()
        .map_err(|e| Error::Decode(image::ImageError::IoError(e)))?;
    match reader.format() {
        Some(format) if ContentType::from_format(format).is_none() => {
            return Err(Error::UnsupportedFormat(format.to_mime_type().to_string()));
        }
        Some(format) if format != source.content_type().format() => {
            log::debug!(
                "declared {} but bytes look like {format:?}",
                source.content_type().mime()
            );
        }
        Some(_) => {}
        None => reader.set_format(source.content_type().format()),
    }

    let mut decoder = reader.into_decoder().map_err(Error::Decode)?;
    let orientation = decoder.orientation().map_err(Error::Decode)?;
    let mut image = DynamicImage::from_decoder(decoder).map_err(Error::Decode)?;
    image.apply_orientation(orientation);

    let working = image.to_rgb8();
    Ok(DecodedSource {
        original_dimensions: working.dimensions(),
        working,
    })
}

impl DecodedSource {
    /// Bound the longest edge of the working image, if a limit is set.
    #[must_use]
    pub fn downscaled(self, limit: Option<u32>) -> Self {
        match limit {
            Some(max) => Self {
                working: resize::fit_within(&self.working, max),
                original_dimensions: self.original_dimensions,
            },
            None => self,
        }
    }
}

/// Encode the working image as the JPEG handed to the background remover.
///
/// # Errors
///
/// Returns [`Error::EncodingFailed`] if JPEG encoding fails.
pub fn encode_intermediate(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, INTERMEDIATE_JPEG_QUALITY);
    encoder.encode_image(image).map_err(Error::EncodingFailed)?;
    Ok(buf)
}
