use std::io::Cursor;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageFormat, imageops::FilterType};
use thiserror::Error;
use tracing::trace;

/// Failure to turn a stored payload back into pixels.
#[derive(Debug, Error)]
pub enum ImagingError {
    #[error("invalid base64 image payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Decode a base64 image payload (PNG as written by the editor, but any
/// format the `image` crate recognizes is accepted).
pub fn decode_base64_image(payload: &str) -> Result<DynamicImage, ImagingError> {
    let bytes = STANDARD.decode(payload.trim())?;
    let img = image::load_from_memory(&bytes)?;
    trace!(
        target: "aimacro::imaging",
        width = img.width(),
        height = img.height(),
        "Decoded base64 image"
    );
    Ok(img)
}

/// Encode an image as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

/// Encode an image as a base64 PNG payload, the form stored in macro lines.
pub fn encode_base64_png(img: &DynamicImage) -> Result<String, image::ImageError> {
    Ok(STANDARD.encode(encode_png(img)?))
}

/// Upscale `img` (keeping its aspect ratio) until it is at least
/// `min_width` x `min_height`. Larger images are returned unchanged.
pub fn upscale_min_size(img: DynamicImage, min_width: u32, min_height: u32) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    if w == 0 || h == 0 || (w >= min_width && h >= min_height) {
        return img;
    }
    let factor = f64::max(
        f64::from(min_width) / f64::from(w),
        f64::from(min_height) / f64::from(h),
    );
    let new_w = (f64::from(w) * factor).ceil() as u32;
    let new_h = (f64::from(h) * factor).ceil() as u32;
    trace!(
        target: "aimacro::imaging",
        from = ?(w, h),
        to = ?(new_w, new_h),
        "Upscaling capture"
    );
    img.resize_exact(new_w, new_h, FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn sample(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, 90])
        }))
    }

    #[test]
    fn base64_png_survives_encoding() {
        let img = sample(12, 7);
        let payload = encode_base64_png(&img).unwrap();
        let back = decode_base64_image(&payload).unwrap();
        assert_eq!(back.to_rgb8(), img.to_rgb8());
    }

    #[test]
    fn garbage_payload_is_an_error() {
        assert!(matches!(
            decode_base64_image("not base64!!"),
            Err(ImagingError::Base64(_))
        ));
        let not_an_image = STANDARD.encode(b"hello");
        assert!(matches!(
            decode_base64_image(&not_an_image),
            Err(ImagingError::Decode(_))
        ));
    }

    #[test]
    fn small_captures_are_upscaled() {
        let out = upscale_min_size(sample(10, 25), 50, 50);
        assert_eq!((out.width(), out.height()), (50, 125));
        let untouched = upscale_min_size(sample(80, 60), 50, 50);
        assert_eq!((untouched.width(), untouched.height()), (80, 60));
    }
}
