//! Encoded raster bytes ⇄ pixel buffers.
//!
//! Decoding and encoding live at the edge of the engine: the pipeline
//! itself only ever sees [`PixelImage`] / [`ImageOutput`]. Buffers
//! are converted between the image crate's RGB(A) layout and the
//! host-side BGR(A) ordering the pipeline uses.

use std::io::Cursor;

use image::{DynamicImage, ImageBuffer, ImageFormat};

use crate::error::{Error, Result};
use crate::types::{ImageOutput, PixelImage};

/// Decode an encoded raster image into interleaved f32 samples in the
/// source integer range. Gray+alpha inputs are widened to RGBA.
pub fn decode(bytes: &[u8]) -> Result<PixelImage> {
    let decoded = image::load_from_memory(bytes).map_err(|e| Error::Decode(e.to_string()))?;
    let width = decoded.width() as usize;
    let height = decoded.height() as usize;

    let (data, channels) = match decoded {
        DynamicImage::ImageLuma8(img) => {
            (img.into_raw().iter().map(|&v| v as f32).collect(), 1)
        }
        DynamicImage::ImageLuma16(img) => {
            (img.into_raw().iter().map(|&v| v as f32).collect(), 1)
        }
        DynamicImage::ImageLumaA8(img) => (widen_luma_alpha(img.into_raw()), 4),
        DynamicImage::ImageLumaA16(img) => (widen_luma_alpha(img.into_raw()), 4),
        DynamicImage::ImageRgb8(img) => (rgb_to_bgr(img.into_raw(), 3), 3),
        DynamicImage::ImageRgb16(img) => (rgb_to_bgr(img.into_raw(), 3), 3),
        DynamicImage::ImageRgba8(img) => (rgb_to_bgr(img.into_raw(), 4), 4),
        DynamicImage::ImageRgba16(img) => (rgb_to_bgr(img.into_raw(), 4), 4),
        other => (rgb_to_bgr(other.to_rgba8().into_raw(), 4), 4),
    };

    PixelImage::new(data, width, height, channels)
}

/// Encode a denormalized pixel buffer into the requested format.
pub fn encode(output: &ImageOutput, format: ImageFormat) -> Result<Vec<u8>> {
    let dynamic = to_dynamic(output)?;
    let mut cursor = Cursor::new(Vec::new());
    dynamic
        .write_to(&mut cursor, format)
        .map_err(|e| Error::Encode(e.to_string()))?;
    Ok(cursor.into_inner())
}

/// Interleave a gray+alpha sample stream as BGRA with replicated gray.
fn widen_luma_alpha<T: Copy + Into<f32>>(raw: Vec<T>) -> Vec<f32> {
    let mut data = Vec::with_capacity(raw.len() * 2);
    for pair in raw.chunks_exact(2) {
        let l: f32 = pair[0].into();
        data.extend_from_slice(&[l, l, l, pair[1].into()]);
    }
    data
}

/// Swap channels 0 and 2 of an interleaved RGB(A) stream into the
/// pipeline's BGR(A) host ordering.
fn rgb_to_bgr<T: Copy + Into<f32>>(raw: Vec<T>, channels: usize) -> Vec<f32> {
    let mut data: Vec<f32> = raw.iter().map(|&v| v.into()).collect();
    for pixel in data.chunks_exact_mut(channels) {
        pixel.swap(0, 2);
    }
    data
}

/// Swap channels 0 and 2 back for the image crate's RGB(A) layout.
fn bgr_to_rgb<T: Copy>(data: &[T], channels: usize) -> Vec<T> {
    let mut out = data.to_vec();
    if channels >= 3 {
        for pixel in out.chunks_exact_mut(channels) {
            pixel.swap(0, 2);
        }
    }
    out
}

pub(crate) fn to_dynamic(output: &ImageOutput) -> Result<DynamicImage> {
    let size_error = || Error::Encode("pixel buffer does not match its dimensions".to_string());
    let (w, h) = (output.width() as u32, output.height() as u32);

    Ok(match output {
        ImageOutput::Bit8 {
            data, channels, ..
        } => {
            let rgb = bgr_to_rgb(data, *channels);
            match channels {
                1 => DynamicImage::ImageLuma8(
                    ImageBuffer::from_raw(w, h, rgb).ok_or_else(size_error)?,
                ),
                3 => DynamicImage::ImageRgb8(
                    ImageBuffer::from_raw(w, h, rgb).ok_or_else(size_error)?,
                ),
                4 => DynamicImage::ImageRgba8(
                    ImageBuffer::from_raw(w, h, rgb).ok_or_else(size_error)?,
                ),
                other => {
                    return Err(Error::Encode(format!(
                        "cannot encode {other}-channel output"
                    )))
                }
            }
        }
        ImageOutput::Bit16 {
            data, channels, ..
        } => {
            let rgb = bgr_to_rgb(data, *channels);
            match channels {
                1 => DynamicImage::ImageLuma16(
                    ImageBuffer::from_raw(w, h, rgb).ok_or_else(size_error)?,
                ),
                3 => DynamicImage::ImageRgb16(
                    ImageBuffer::from_raw(w, h, rgb).ok_or_else(size_error)?,
                ),
                4 => DynamicImage::ImageRgba16(
                    ImageBuffer::from_raw(w, h, rgb).ok_or_else(size_error)?,
                ),
                other => {
                    return Err(Error::Encode(format!(
                        "cannot encode {other}-channel output"
                    )))
                }
            }
        }
    })
}

pub(crate) fn from_dynamic(decoded: DynamicImage) -> Result<ImageOutput> {
    let width = decoded.width() as usize;
    let height = decoded.height() as usize;

    Ok(match decoded {
        DynamicImage::ImageLuma8(img) => ImageOutput::Bit8 {
            data: img.into_raw(),
            width,
            height,
            channels: 1,
        },
        DynamicImage::ImageRgb8(img) => ImageOutput::Bit8 {
            data: bgr_to_rgb(&img.into_raw(), 3),
            width,
            height,
            channels: 3,
        },
        DynamicImage::ImageRgba8(img) => ImageOutput::Bit8 {
            data: bgr_to_rgb(&img.into_raw(), 4),
            width,
            height,
            channels: 4,
        },
        DynamicImage::ImageLuma16(img) => ImageOutput::Bit16 {
            data: img.into_raw(),
            width,
            height,
            channels: 1,
        },
        DynamicImage::ImageRgb16(img) => ImageOutput::Bit16 {
            data: bgr_to_rgb(&img.into_raw(), 3),
            width,
            height,
            channels: 3,
        },
        DynamicImage::ImageRgba16(img) => ImageOutput::Bit16 {
            data: bgr_to_rgb(&img.into_raw(), 4),
            width,
            height,
            channels: 4,
        },
        other => {
            return Err(Error::Encode(format!(
                "unsupported resample buffer: {other:?}"
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_rgb_png(pixels: &[u8], w: u32, h: u32) -> Vec<u8> {
        let img: ImageBuffer<image::Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_raw(w, h, pixels.to_vec()).unwrap();
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut cursor, ImageFormat::Png)
            .unwrap();
        cursor.into_inner()
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(decode(b"not an image"), Err(Error::Decode(_))));
    }

    #[test]
    fn decode_converts_rgb_to_host_bgr_order() {
        let bytes = encode_rgb_png(&[10, 20, 30], 1, 1);
        let image = decode(&bytes).unwrap();
        assert_eq!((image.width, image.height, image.channels), (1, 1, 3));
        // Decoded R=10 lands at host index 2.
        assert_eq!(image.data, vec![30.0, 20.0, 10.0]);
    }

    #[test]
    fn encode_decode_round_trips_8bit_rgb() {
        let output = ImageOutput::Bit8 {
            data: vec![30, 20, 10, 1, 2, 3],
            width: 2,
            height: 1,
            channels: 3,
        };
        let bytes = encode(&output, ImageFormat::Png).unwrap();
        let back = decode(&bytes).unwrap();
        assert_eq!(back.data, vec![30.0, 20.0, 10.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn luma_alpha_widens_to_four_channels() {
        let mut cursor = Cursor::new(Vec::new());
        let img: ImageBuffer<image::LumaA<u8>, Vec<u8>> =
            ImageBuffer::from_raw(1, 1, vec![80, 200]).unwrap();
        DynamicImage::ImageLumaA8(img)
            .write_to(&mut cursor, ImageFormat::Png)
            .unwrap();

        let image = decode(&cursor.into_inner()).unwrap();
        assert_eq!(image.channels, 4);
        assert_eq!(image.data, vec![80.0, 80.0, 80.0, 200.0]);
    }

    #[test]
    fn to_dynamic_rejects_mismatched_buffer() {
        let output = ImageOutput::Bit8 {
            data: vec![0; 5],
            width: 2,
            height: 1,
            channels: 3,
        };
        assert!(matches!(to_dynamic(&output), Err(Error::Encode(_))));
    }
}
