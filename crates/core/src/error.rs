//! Typed error hierarchy for the engine.
//!
//! Library-grade errors use `thiserror`; the CLI wraps these in
//! `anyhow::Result` at call sites.

pub type Result<T> = std::result::Result<T, Error>;

/// All errors surfaced by the upscale engine.
///
/// Per-tile inference failures are deliberately absent: the tile
/// scheduler recovers them locally (logged, region left black) and
/// never fails the request over a single tile.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid engine configuration: zero memory budget, bad option
    /// combination. Fatal, no retry.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The requested accelerator backend is not present or not
    /// initialized. The caller may fall back to CPU.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A device identity the engine does not know about.
    #[error("unsupported device: {0}")]
    UnsupportedDevice(String),

    /// Input bytes or buffers do not form a valid image. Aborts the
    /// whole request before any tile is processed.
    #[error("decode error: {0}")]
    Decode(String),

    /// Output pixels could not be encoded to the requested format.
    #[error("encode error: {0}")]
    Encode(String),

    /// ONNX Runtime error from a whole-image forward pass or session
    /// construction.
    #[error("inference error: {0}")]
    Inference(#[from] ort::Error),

    /// Tensor geometry did not match its declared shape.
    #[error("tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}
