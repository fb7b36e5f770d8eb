//! Decoded camera frames.
//!
//! Frames arrive as base64 data URLs (`data:image/jpeg;base64,...`) from the
//! browser client. They are decoded once per request into packed RGB8 pixels
//! and dropped when the request completes.

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use std::io::Cursor;

/// Upper bounds applied while decoding untrusted images.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_width: u32,
    pub max_height: u32,
    /// Largest single allocation the decoder may make.
    pub max_alloc_bytes: u64,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_width: 4096,
            max_height: 4096,
            max_alloc_bytes: 128 * 1024 * 1024,
        }
    }
}

impl FrameLimits {
    fn to_image_limits(self) -> image::Limits {
        let mut limits = image::Limits::default();
        limits.max_image_width = Some(self.max_width);
        limits.max_image_height = Some(self.max_height);
        limits.max_alloc = Some(self.max_alloc_bytes);
        limits
    }
}

/// Packed RGB8 frame. Row-major, three bytes per pixel.
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap already decoded RGB8 pixels.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        if width == 0 || height == 0 {
            return Err(anyhow!("frame must not be empty"));
        }
        Ok(Self {
            pixels,
            width,
            height,
        })
    }

    /// Decode an encoded image (JPEG, PNG or WebP) under the default limits.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::decode_with_limits(bytes, &FrameLimits::default())
    }

    /// Decode an encoded image, refusing oversized dimensions before any
    /// pixel buffer is allocated.
    pub fn decode_with_limits(bytes: &[u8], limits: &FrameLimits) -> Result<Self> {
        let mut reader = image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .context("failed to read image header")?;
        reader.limits(limits.to_image_limits());
        let image = reader.decode().context("failed to decode image")?;
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self::from_rgb(rgb.into_raw(), width, height)
    }

    /// Decode a data URL. A bare base64 payload without the `data:` header is
    /// accepted too.
    pub fn from_data_url(data_url: &str) -> Result<Self> {
        Self::from_data_url_with_limits(data_url, &FrameLimits::default())
    }

    pub fn from_data_url_with_limits(data_url: &str, limits: &FrameLimits) -> Result<Self> {
        let payload = match data_url.split_once(',') {
            Some((_, payload)) => payload,
            None => data_url,
        };
        let payload = payload.trim();
        if payload.is_empty() {
            return Err(anyhow!("image payload is empty"));
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .context("image payload is not valid base64")?;
        Self::decode_with_limits(&bytes, limits)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Borrow the pixels as an image view without copying them.
    pub fn as_image(&self) -> Option<image::ImageBuffer<image::Rgb<u8>, &[u8]>> {
        image::ImageBuffer::from_raw(self.width, self.height, self.pixels())
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Pixel data is never printed.
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 10) as u8, (y * 10) as u8, 200])
        });
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    fn png_data_url(width: u32, height: u32) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes(width, height));
        format!("data:image/png;base64,{encoded}")
    }

    #[test]
    fn decodes_data_url() -> Result<()> {
        let frame = Frame::from_data_url(&png_data_url(4, 3))?;
        assert_eq!((frame.width, frame.height), (4, 3));
        assert_eq!(frame.pixels().len(), 4 * 3 * 3);
        // pixel (1, 2)
        let idx = (2 * 4 + 1) * 3;
        assert_eq!(&frame.pixels()[idx..idx + 3], &[10, 20, 200]);
        Ok(())
    }

    #[test]
    fn accepts_bare_base64() -> Result<()> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes(2, 2));
        let frame = Frame::from_data_url(&encoded)?;
        assert_eq!((frame.width, frame.height), (2, 2));
        Ok(())
    }

    #[test]
    fn rejects_bad_payloads() {
        assert!(Frame::from_data_url("").is_err());
        assert!(Frame::from_data_url("data:image/png;base64,").is_err());
        assert!(Frame::from_data_url("data:image/png;base64,@@@").is_err());
        // valid base64, not an image
        assert!(Frame::from_data_url("data:image/png;base64,aGVsbG8=").is_err());
    }

    #[test]
    fn oversized_images_are_refused() -> Result<()> {
        let limits = FrameLimits {
            max_width: 32,
            max_height: 32,
            ..FrameLimits::default()
        };
        let err = Frame::decode_with_limits(&png_bytes(64, 8), &limits).unwrap_err();
        assert!(format!("{err:#}").contains("decode"), "{err:#}");
        assert!(Frame::decode_with_limits(&png_bytes(8, 64), &limits).is_err());

        let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes(40, 40));
        assert!(Frame::from_data_url_with_limits(&encoded, &limits).is_err());

        let frame = Frame::decode_with_limits(&png_bytes(32, 32), &limits)?;
        assert_eq!((frame.width, frame.height), (32, 32));
        Ok(())
    }

    #[test]
    fn image_view_borrows_pixels() -> Result<()> {
        let frame = Frame::decode(&png_bytes(3, 2))?;
        let view = frame.as_image().expect("matching dimensions");
        assert_eq!(view.dimensions(), (3, 2));
        assert_eq!(view.get_pixel(2, 1).0, [20, 10, 200]);
        Ok(())
    }

    #[test]
    fn rgb_length_is_validated() {
        assert!(Frame::from_rgb(vec![0u8; 11], 2, 2).is_err());
        assert!(Frame::from_rgb(vec![], 0, 0).is_err());
        assert!(Frame::from_rgb(vec![0u8; 12], 2, 2).is_ok());
    }
}
