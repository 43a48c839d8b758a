//! Image variant production.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;

use crate::TranscodeError;

const JPEG_QUALITY: u8 = 90;

fn encode_jpeg(img: &DynamicImage) -> Result<Vec<u8>, TranscodeError> {
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut out), JPEG_QUALITY);
    // JPEG has no alpha channel
    img.to_rgb8()
        .write_with_encoder(encoder)
        .map_err(|e| TranscodeError::ImageDecode(format!("jpeg encode: {e}")))?;
    Ok(out)
}

/// Decode an image payload.
pub fn decode(data: &[u8]) -> Result<DynamicImage, TranscodeError> {
    image::load_from_memory(data).map_err(|e| TranscodeError::ImageDecode(e.to_string()))
}

/// Fill-crop to an exact square: scale to cover, center-crop.
pub fn resize_square(img: &DynamicImage, box_size: u32) -> Result<Vec<u8>, TranscodeError> {
    let resized = img.resize_to_fill(box_size, box_size, FilterType::Lanczos3);
    encode_jpeg(&resized)
}

/// Resize to a target width, preserving aspect ratio.
pub fn resize_width(img: &DynamicImage, width: u32) -> Result<Vec<u8>, TranscodeError> {
    let height =
        ((img.height() as f64) * (width as f64) / (img.width() as f64)).round().max(1.0) as u32;
    let resized = img.resize_exact(width, height, FilterType::Lanczos3);
    encode_jpeg(&resized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn test_image(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_fn(w, h, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }))
    }

    #[test]
    fn square_fill_crop_is_exact() {
        let img = test_image(800, 600);
        for target in [150u32, 480] {
            let jpeg = resize_square(&img, target).unwrap();
            let out = image::load_from_memory(&jpeg).unwrap();
            assert_eq!((out.width(), out.height()), (target, target));
        }
    }

    #[test]
    fn square_fill_crop_handles_portrait_sources() {
        let img = test_image(300, 900);
        let jpeg = resize_square(&img, 150).unwrap();
        let out = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((out.width(), out.height()), (150, 150));
    }

    #[test]
    fn width_resize_preserves_aspect_ratio() {
        let img = test_image(1280, 720);
        let jpeg = resize_width(&img, 640).unwrap();
        let out = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(out.width(), 640);
        assert_eq!(out.height(), 360);
    }

    #[test]
    fn output_is_jpeg() {
        let img = test_image(64, 64);
        let jpeg = resize_square(&img, 32).unwrap();
        assert_eq!(&jpeg[..3], &[0xff, 0xd8, 0xff]);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(decode(b"definitely not an image").is_err());
    }
}
