//! Data carriers shared between pipeline stages.
//!
//! All entities here live for exactly one upscale request: they are
//! created, handed stage to stage by value, and dropped with the call.

use crate::error::{Error, Result};

/// Color mode detected from an input's channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    /// Single-channel grayscale.
    L,
    /// Three channels.
    Rgb,
    /// Four channels, alpha at channel index 3.
    Rgba,
}

impl ColorMode {
    pub fn from_channels(channels: usize) -> Result<Self> {
        match channels {
            1 => Ok(Self::L),
            3 => Ok(Self::Rgb),
            4 => Ok(Self::Rgba),
            other => Err(Error::Decode(format!(
                "unsupported channel count: {other} (expected 1, 3 or 4)"
            ))),
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            Self::L => 1,
            Self::Rgb => 3,
            Self::Rgba => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L => "L",
            Self::Rgb => "RGB",
            Self::Rgba => "RGBA",
        }
    }
}

impl std::fmt::Display for ColorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the alpha plane of an RGBA input is upscaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlphaMode {
    /// Replicate the alpha plane to three channels and run it through
    /// the network exactly like the color plane.
    #[default]
    Network,
    /// Resample the alpha plane with a plain bilinear filter,
    /// bypassing the network.
    Resize,
}

impl AlphaMode {
    /// Parse from string (case-insensitive). Returns `Network` for
    /// unknown values.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "resize" | "bilinear" => Self::Resize,
            _ => Self::Network,
        }
    }
}

impl std::fmt::Display for AlphaMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Resize => write!(f, "resize"),
        }
    }
}

/// A decoded raster image: interleaved HWC samples held as f32 in
/// their source integer range (0–255 or 0–65535, never normalized).
///
/// Multi-channel data uses OpenCV-style BGR(A) host ordering; the
/// color pipeline reverses it into the network's RGB order at entry
/// and back at exit.
#[derive(Debug, Clone)]
pub struct PixelImage {
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

impl PixelImage {
    pub fn new(data: Vec<f32>, width: usize, height: usize, channels: usize) -> Result<Self> {
        if data.len() != width * height * channels {
            return Err(Error::Decode(format!(
                "pixel buffer length mismatch: expected {} ({width}x{height}x{channels}), got {}",
                width * height * channels,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            channels,
        })
    }

    /// Largest sample value; drives 8- vs 16-bit range detection.
    pub fn max_sample(&self) -> f32 {
        self.data.iter().copied().fold(0.0, f32::max)
    }
}

/// Final denormalized pixel buffer, interleaved HWC in the same BGR(A)
/// host ordering as [`PixelImage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutput {
    Bit8 {
        data: Vec<u8>,
        width: usize,
        height: usize,
        channels: usize,
    },
    Bit16 {
        data: Vec<u16>,
        width: usize,
        height: usize,
        channels: usize,
    },
}

impl ImageOutput {
    pub fn width(&self) -> usize {
        match self {
            Self::Bit8 { width, .. } | Self::Bit16 { width, .. } => *width,
        }
    }

    pub fn height(&self) -> usize {
        match self {
            Self::Bit8 { height, .. } | Self::Bit16 { height, .. } => *height,
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            Self::Bit8 { channels, .. } | Self::Bit16 { channels, .. } => *channels,
        }
    }
}

/// Outcome of one upscale request.
#[derive(Debug, Clone)]
pub struct UpscaleResult {
    pub image: ImageOutput,
    pub mode: ColorMode,
}
