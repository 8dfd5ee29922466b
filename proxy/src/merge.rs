//! Composition of multi-source layers.
use crate::format::OutputFormat;
use crate::output::Image;
use image::{DynamicImage, RgbaImage, imageops};
use std::io::Cursor;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum MergeError {
    #[error("nothing to merge")]
    Empty,
    #[error("could not decode image {index}: {reason}")]
    Decode { index: usize, reason: String },
    #[error("could not encode image: {0}")]
    Encode(String),
}

/// Stacks `images` in order, each one drawn over the previous ones, and
/// encodes the result in `format`.
///
/// Images are aligned at the top left corner. A single image is returned as
/// is, without decoding it.
pub fn merge(images: &[Image], format: OutputFormat) -> Result<Image, MergeError> {
    match images {
        [] => return Err(MergeError::Empty),
        [single] => return Ok(single.clone()),
        _ => {}
    }

    let mut canvas: Option<RgbaImage> = None;
    for (index, image) in images.iter().enumerate() {
        let layer = image::load_from_memory(&image.data)
            .map_err(|e| MergeError::Decode {
                index,
                reason: e.to_string(),
            })?
            .to_rgba8();

        match canvas.as_mut() {
            None => canvas = Some(layer),
            Some(canvas) => {
                if canvas.dimensions() != layer.dimensions() {
                    tracing::warn!(
                        index,
                        expected = ?canvas.dimensions(),
                        actual = ?layer.dimensions(),
                        "merging images of different size"
                    );
                }
                imageops::overlay(canvas, &layer, 0, 0);
            }
        }
    }

    let canvas = canvas.ok_or(MergeError::Empty)?;
    encode(DynamicImage::ImageRgba8(canvas), format)
}

pub fn encode(image: DynamicImage, format: OutputFormat) -> Result<Image, MergeError> {
    // JPEG has no alpha channel
    let image = match format {
        OutputFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
        _ => image,
    };

    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, format.image_format())
        .map_err(|e| MergeError::Encode(e.to_string()))?;
    Ok(Image::new(buffer.into_inner(), format.mime_type()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{half_png, solid_png};

    fn decode(image: &Image) -> RgbaImage {
        image::load_from_memory(&image.data).unwrap().to_rgba8()
    }

    #[test]
    fn test_single_image_is_unchanged() {
        let image = Image::new(&b"opaque bytes"[..], "image/gif");
        assert_eq!(merge(&[image.clone()], OutputFormat::Png).unwrap(), image);
    }

    #[test]
    fn test_empty() {
        assert_eq!(merge(&[], OutputFormat::Png), Err(MergeError::Empty));
    }

    #[test]
    fn test_later_images_are_on_top() {
        let red = Image::new(solid_png([255, 0, 0, 255], 8, 8), "image/png");
        let blue = Image::new(solid_png([0, 0, 255, 255], 8, 8), "image/png");

        let merged = merge(&[red.clone(), blue.clone()], OutputFormat::Png).unwrap();
        assert_eq!(merged.content_type, "image/png");
        assert_eq!(decode(&merged).get_pixel(3, 3).0, [0, 0, 255, 255]);

        let merged = merge(&[blue, red], OutputFormat::Png).unwrap();
        assert_eq!(decode(&merged).get_pixel(3, 3).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_transparent_areas_show_lower_images() {
        let red = Image::new(solid_png([255, 0, 0, 255], 8, 8), "image/png");
        // Left half green, right half transparent
        let green_left = Image::new(half_png([0, 255, 0, 255], 8, 8), "image/png");

        let merged = decode(&merge(&[red, green_left], OutputFormat::Png).unwrap());
        assert_eq!(merged.get_pixel(1, 4).0, [0, 255, 0, 255]);
        assert_eq!(merged.get_pixel(6, 4).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_encode_jpeg() {
        let red = Image::new(solid_png([255, 0, 0, 255], 8, 8), "image/png");
        let white = Image::new(half_png([255, 255, 255, 255], 8, 8), "image/png");

        let merged = merge(&[red, white], OutputFormat::Jpeg).unwrap();
        assert_eq!(merged.content_type, "image/jpeg");
        assert_eq!(
            image::guess_format(&merged.data).unwrap(),
            image::ImageFormat::Jpeg
        );
    }

    #[test]
    fn test_decode_error_names_index() {
        let red = Image::new(solid_png([255, 0, 0, 255], 8, 8), "image/png");
        let broken = Image::new(&b"<ServiceException/>"[..], "image/png");

        assert!(matches!(
            merge(&[red, broken], OutputFormat::Png),
            Err(MergeError::Decode { index: 1, .. })
        ));
    }
}
