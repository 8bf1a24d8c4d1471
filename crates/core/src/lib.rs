//! Memory-aware tiled super-resolution inference.
//!
//! An [`engine::UpscaleEngine`] wraps a fixed pretrained
//! [`network::Network`] and a [`device::MemoryProbe`], estimates a
//! tile budget per request, and runs direct or tiled inference with
//! reflection and modulus padding. Color handling, bit-depth
//! normalization and alpha modes live in [`color`]; encoded image I/O
//! in [`codec`].

pub mod budget;
pub mod codec;
pub mod color;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod logging;
pub mod network;
pub mod tiling;
pub mod types;
