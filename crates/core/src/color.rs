//! Color-mode detection, bit-depth normalization and alpha handling.
//!
//! The network consumes channel index 0 as what the host calls index
//! 2: a plain channel reversal between BGR host order and RGB network
//! order, not a color-space transform. Grayscale is replicated to
//! three channels on the way in and collapsed by luma weighting on
//! the way out.

use ndarray::{Array2, Array4};

use crate::error::Result;
use crate::types::{ColorMode, ImageOutput, PixelImage};

/// Luma weights applied to the network's (R, G, B) output when
/// collapsing to a single channel.
const LUMA: [f32; 3] = [0.299, 0.587, 0.114];

/// Source sample range, detected from buffer contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRange {
    Bit8,
    Bit16,
}

impl SampleRange {
    /// Any sample above 256 marks the buffer as 16-bit.
    pub fn detect(image: &PixelImage) -> Self {
        if image.max_sample() > 256.0 {
            Self::Bit16
        } else {
            Self::Bit8
        }
    }

    /// Normalization divisor: samples become `[0, 1)` after dividing.
    pub fn divisor(&self) -> f32 {
        match self {
            Self::Bit8 => 256.0,
            Self::Bit16 => 65536.0,
        }
    }

    /// Denormalization factor applied on output.
    pub fn max_value(&self) -> f32 {
        match self {
            Self::Bit8 => 255.0,
            Self::Bit16 => 65535.0,
        }
    }
}

/// A normalized image ready for inference.
pub struct NormalizedImage {
    /// Color plane in network channel order, NCHW, values in `[0, 1)`.
    /// Grayscale inputs arrive here replicated to three channels.
    pub tensor: Array4<f32>,
    pub mode: ColorMode,
    /// Normalized alpha plane of an RGBA input.
    pub alpha: Option<Array2<f32>>,
    pub range: SampleRange,
}

/// Normalize a decoded image: scale samples into `[0, 1)`, split the
/// alpha plane, expand grayscale and reverse the channel order for
/// the network.
pub fn normalize(image: &PixelImage) -> Result<NormalizedImage> {
    let mode = ColorMode::from_channels(image.channels)?;
    let range = SampleRange::detect(image);
    let divisor = range.divisor();
    let (h, w, ch) = (image.height, image.width, image.channels);

    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for y in 0..h {
        for x in 0..w {
            let src = (y * w + x) * ch;
            match mode {
                ColorMode::L => {
                    let v = image.data[src] / divisor;
                    for c in 0..3 {
                        tensor[[0, c, y, x]] = v;
                    }
                }
                // Host channel 2 lands on network channel 0 and vice versa.
                ColorMode::Rgb | ColorMode::Rgba => {
                    for c in 0..3 {
                        tensor[[0, c, y, x]] = image.data[src + (2 - c)] / divisor;
                    }
                }
            }
        }
    }

    let alpha = match mode {
        ColorMode::Rgba => {
            let mut plane = Array2::<f32>::zeros((h, w));
            for y in 0..h {
                for x in 0..w {
                    plane[[y, x]] = image.data[(y * w + x) * ch + 3] / divisor;
                }
            }
            Some(plane)
        }
        _ => None,
    };

    Ok(NormalizedImage {
        tensor,
        mode,
        alpha,
        range,
    })
}

/// Replicate an alpha plane into the three network channels so it can
/// run through the exact same padded/tiled pipeline as the color
/// plane.
pub fn alpha_to_tensor(alpha: &Array2<f32>) -> Array4<f32> {
    let (h, w) = alpha.dim();
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for y in 0..h {
        for x in 0..w {
            let v = alpha[[y, x]];
            for c in 0..3 {
                tensor[[0, c, y, x]] = v;
            }
        }
    }
    tensor
}

/// Collapse a network output back to a single alpha plane, clamped to
/// `[0, 1]`.
pub fn tensor_to_alpha(tensor: &Array4<f32>) -> Array2<f32> {
    let (_, _, h, w) = tensor.dim();
    let mut plane = Array2::<f32>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let v = LUMA[0] * tensor[[0, 0, y, x]]
                + LUMA[1] * tensor[[0, 1, y, x]]
                + LUMA[2] * tensor[[0, 2, y, x]];
            plane[[y, x]] = v.clamp(0.0, 1.0);
        }
    }
    plane
}

/// Denormalize a network output tensor into host pixel layout: clamp
/// to `[0, 1]`, reverse the channel order back, collapse grayscale,
/// reattach alpha, and scale/round into the integer range the input
/// arrived in.
pub fn denormalize(
    tensor: &Array4<f32>,
    mode: ColorMode,
    alpha: Option<&Array2<f32>>,
    range: SampleRange,
) -> ImageOutput {
    let (_, _, h, w) = tensor.dim();
    let channels = mode.channels();
    let mut samples = vec![0.0f32; h * w * channels];

    for y in 0..h {
        for x in 0..w {
            let dst = (y * w + x) * channels;
            match mode {
                ColorMode::L => {
                    let v = LUMA[0] * tensor[[0, 0, y, x]]
                        + LUMA[1] * tensor[[0, 1, y, x]]
                        + LUMA[2] * tensor[[0, 2, y, x]];
                    samples[dst] = v.clamp(0.0, 1.0);
                }
                ColorMode::Rgb | ColorMode::Rgba => {
                    for k in 0..3 {
                        samples[dst + k] = tensor[[0, 2 - k, y, x]].clamp(0.0, 1.0);
                    }
                    if channels == 4 {
                        samples[dst + 3] = alpha
                            .map(|plane| plane[[y, x]].clamp(0.0, 1.0))
                            .unwrap_or(1.0);
                    }
                }
            }
        }
    }

    let max = range.max_value();
    match range {
        SampleRange::Bit8 => ImageOutput::Bit8 {
            data: samples
                .iter()
                .map(|v| (v * max).round().clamp(0.0, 255.0) as u8)
                .collect(),
            width: w,
            height: h,
            channels,
        },
        SampleRange::Bit16 => ImageOutput::Bit16 {
            data: samples
                .iter()
                .map(|v| (v * max).round().clamp(0.0, 65535.0) as u16)
                .collect(),
            width: w,
            height: h,
            channels,
        },
    }
}

/// Bilinear resample of a normalized alpha plane, used by the
/// `resize` alpha mode to bypass the network.
pub fn resize_alpha_bilinear(alpha: &Array2<f32>, dst_w: usize, dst_h: usize) -> Array2<f32> {
    let (src_h, src_w) = alpha.dim();
    let mut dst = Array2::<f32>::zeros((dst_h, dst_w));

    for dst_y in 0..dst_h {
        // Map destination pixel center to source coordinates
        let src_yf = (dst_y as f64 + 0.5) * src_h as f64 / dst_h as f64 - 0.5;
        let src_y0 = src_yf.floor().max(0.0) as usize;
        let src_y1 = (src_y0 + 1).min(src_h - 1);
        let fy = (src_yf - src_y0 as f64).clamp(0.0, 1.0);

        for dst_x in 0..dst_w {
            let src_xf = (dst_x as f64 + 0.5) * src_w as f64 / dst_w as f64 - 0.5;
            let src_x0 = src_xf.floor().max(0.0) as usize;
            let src_x1 = (src_x0 + 1).min(src_w - 1);
            let fx = (src_xf - src_x0 as f64).clamp(0.0, 1.0);

            let p00 = alpha[[src_y0, src_x0]] as f64;
            let p10 = alpha[[src_y0, src_x1]] as f64;
            let p01 = alpha[[src_y1, src_x0]] as f64;
            let p11 = alpha[[src_y1, src_x1]] as f64;

            let top = p00 * (1.0 - fx) + p10 * fx;
            let bot = p01 * (1.0 - fx) + p11 * fx;
            dst[[dst_y, dst_x]] = (top * (1.0 - fy) + bot * fy) as f32;
        }
    }

    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb_image(data: Vec<f32>, w: usize, h: usize) -> PixelImage {
        PixelImage::new(data, w, h, 3).unwrap()
    }

    #[test]
    fn detects_16bit_from_wide_samples() {
        let image = rgb_image(vec![100.0, 200.0, 3000.0], 1, 1);
        assert_eq!(SampleRange::detect(&image), SampleRange::Bit16);
        let image = rgb_image(vec![100.0, 200.0, 255.0], 1, 1);
        assert_eq!(SampleRange::detect(&image), SampleRange::Bit8);
    }

    #[test]
    fn normalize_reverses_channel_order() {
        // Host BGR pixel (b=64, g=128, r=192): network ch0 must see r.
        let image = rgb_image(vec![64.0, 128.0, 192.0], 1, 1);
        let norm = normalize(&image).unwrap();
        assert_eq!(norm.mode, ColorMode::Rgb);
        assert_eq!(norm.tensor[[0, 0, 0, 0]], 192.0 / 256.0);
        assert_eq!(norm.tensor[[0, 1, 0, 0]], 128.0 / 256.0);
        assert_eq!(norm.tensor[[0, 2, 0, 0]], 64.0 / 256.0);
    }

    #[test]
    fn normalize_expands_grayscale_to_three_channels() {
        let image = PixelImage::new(vec![128.0, 64.0], 2, 1, 1).unwrap();
        let norm = normalize(&image).unwrap();
        assert_eq!(norm.mode, ColorMode::L);
        for c in 0..3 {
            assert_eq!(norm.tensor[[0, c, 0, 0]], 0.5);
            assert_eq!(norm.tensor[[0, c, 0, 1]], 0.25);
        }
    }

    #[test]
    fn normalize_splits_alpha() {
        let image = PixelImage::new(vec![10.0, 20.0, 30.0, 128.0], 1, 1, 4).unwrap();
        let norm = normalize(&image).unwrap();
        assert_eq!(norm.mode, ColorMode::Rgba);
        let alpha = norm.alpha.unwrap();
        assert_eq!(alpha[[0, 0]], 0.5);
    }

    #[test]
    fn denormalize_round_trips_low_8bit_samples() {
        // v/256 * 255 rounds back to v for the lower half of the range.
        let data = vec![0.0, 17.0, 64.0, 100.0, 127.0, 128.0];
        let image = PixelImage::new(data.clone(), 2, 1, 3).unwrap();
        let norm = normalize(&image).unwrap();
        let out = denormalize(&norm.tensor, norm.mode, None, norm.range);
        match out {
            ImageOutput::Bit8 {
                data: bytes,
                width,
                height,
                channels,
            } => {
                assert_eq!((width, height, channels), (2, 1, 3));
                let expected: Vec<u8> = data.iter().map(|v| *v as u8).collect();
                assert_eq!(bytes, expected);
            }
            _ => panic!("expected 8-bit output"),
        }
    }

    #[test]
    fn denormalize_full_range_is_within_one_lsb() {
        let data: Vec<f32> = (0..=255).map(|v| v as f32).collect();
        let image = PixelImage::new(data.clone(), 256, 1, 1).unwrap();
        let norm = normalize(&image).unwrap();
        let out = denormalize(&norm.tensor, norm.mode, None, norm.range);
        match out {
            ImageOutput::Bit8 { data: bytes, .. } => {
                for (expected, got) in data.iter().zip(bytes.iter()) {
                    assert!((*expected - *got as f32).abs() <= 1.0);
                }
            }
            _ => panic!("expected 8-bit output"),
        }
    }

    #[test]
    fn denormalize_round_trips_low_16bit_samples() {
        let data = vec![0.0, 300.0, 1024.0, 16384.0, 32700.0, 32768.0];
        let image = PixelImage::new(data.clone(), 2, 1, 3).unwrap();
        let norm = normalize(&image).unwrap();
        assert_eq!(norm.range, SampleRange::Bit16);
        let out = denormalize(&norm.tensor, norm.mode, None, norm.range);
        match out {
            ImageOutput::Bit16 { data: words, .. } => {
                let expected: Vec<u16> = data.iter().map(|v| *v as u16).collect();
                assert_eq!(words, expected);
            }
            _ => panic!("expected 16-bit output"),
        }
    }

    #[test]
    fn alpha_tensor_round_trip() {
        let mut alpha = Array2::<f32>::zeros((2, 2));
        alpha[[0, 0]] = 0.25;
        alpha[[1, 1]] = 0.75;
        let tensor = alpha_to_tensor(&alpha);
        // Replicated channels collapse back to the same plane: the
        // luma weights sum to one.
        let back = tensor_to_alpha(&tensor);
        for y in 0..2 {
            for x in 0..2 {
                assert!((back[[y, x]] - alpha[[y, x]]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn bilinear_resize_identity() {
        let mut alpha = Array2::<f32>::zeros((3, 3));
        for y in 0..3 {
            for x in 0..3 {
                alpha[[y, x]] = (y * 3 + x) as f32 / 10.0;
            }
        }
        let same = resize_alpha_bilinear(&alpha, 3, 3);
        for y in 0..3 {
            for x in 0..3 {
                assert!((same[[y, x]] - alpha[[y, x]]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn bilinear_resize_constant_plane() {
        let alpha = Array2::<f32>::from_elem((4, 4), 0.5);
        let up = resize_alpha_bilinear(&alpha, 8, 8);
        assert_eq!(up.dim(), (8, 8));
        for v in up.iter() {
            assert!((v - 0.5).abs() < 1e-6);
        }
    }
}
