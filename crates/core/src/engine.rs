//! Request orchestration: normalize, pad, budget, run, composite,
//! denormalize.
//!
//! The engine holds only long-lived resources (the network and the
//! memory probe). Everything derived from one input image travels
//! through the call as arguments and return values, so a single engine
//! handles back-to-back requests of different geometry without
//! cross-request state.

use std::sync::Arc;

use image::imageops::FilterType;
use ndarray::Array4;
use tracing::{debug, info};

use crate::budget::{tiles_required, DEFAULT_PIXEL_COST_BYTES};
use crate::codec;
use crate::color::{
    alpha_to_tensor, denormalize, normalize, resize_alpha_bilinear, tensor_to_alpha,
};
use crate::device::MemoryProbe;
use crate::error::Result;
use crate::network::Network;
use crate::tiling::{post_process, pre_process, run_direct, run_tiled, tile_edge_for_count};
use crate::types::{AlphaMode, ColorMode, PixelImage, UpscaleResult};

/// Per-engine tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Context padding around each tile's core region, input pixels.
    pub tile_pad: usize,
    /// Base reflection padding applied to the whole input.
    pub pad: usize,
    /// Estimated peak-memory cost per pixel·channel.
    pub pixel_cost_bytes: u64,
    /// When false, skip the budget estimate and always run one pass.
    pub calc_tiles: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            tile_pad: 10,
            pad: 10,
            pixel_cost_bytes: DEFAULT_PIXEL_COST_BYTES,
            calc_tiles: true,
        }
    }
}

/// The long-lived upscaler: a network plus the memory probe of the
/// device it runs on.
pub struct UpscaleEngine {
    network: Arc<dyn Network>,
    probe: Box<dyn MemoryProbe>,
    options: EngineOptions,
}

impl UpscaleEngine {
    pub fn new(
        network: Arc<dyn Network>,
        probe: Box<dyn MemoryProbe>,
        options: EngineOptions,
    ) -> Self {
        Self {
            network,
            probe,
            options,
        }
    }

    /// The network's fixed integer scale factor.
    pub fn scale(&self) -> usize {
        self.network.scale()
    }

    /// Upscale one decoded image. `outscale` resamples the network
    /// output to `round(input_dim * outscale)` when it differs from
    /// the network's own factor; `None` keeps the network output size.
    pub fn upscale(
        &self,
        image: &PixelImage,
        outscale: Option<f32>,
        alpha_mode: AlphaMode,
    ) -> Result<UpscaleResult> {
        let scale = self.network.scale();
        let norm = normalize(image)?;
        debug!(
            width = image.width,
            height = image.height,
            mode = %norm.mode,
            %alpha_mode,
            "upscale request"
        );

        let color = self.run_pipeline(&norm.tensor)?;

        let alpha = match (&norm.alpha, alpha_mode) {
            (Some(plane), AlphaMode::Network) => {
                let tensor = self.run_pipeline(&alpha_to_tensor(plane))?;
                Some(tensor_to_alpha(&tensor))
            }
            (Some(plane), AlphaMode::Resize) => Some(resize_alpha_bilinear(
                plane,
                image.width * scale,
                image.height * scale,
            )),
            (None, _) => None,
        };

        let mut output = denormalize(&color, norm.mode, alpha.as_ref(), norm.range);

        if let Some(factor) = outscale {
            let target_w = (image.width as f32 * factor).round() as usize;
            let target_h = (image.height as f32 * factor).round() as usize;
            if target_w != output.width() || target_h != output.height() {
                debug!(target_w, target_h, "resampling to requested outscale");
                let resampled = codec::to_dynamic(&output)?.resize_exact(
                    target_w as u32,
                    target_h as u32,
                    FilterType::Lanczos3,
                );
                output = codec::from_dynamic(resampled)?;
            }
        }

        info!(
            width = output.width(),
            height = output.height(),
            mode = %norm.mode,
            "upscale complete"
        );

        Ok(UpscaleResult {
            image: output,
            mode: norm.mode,
        })
    }

    /// Decode, upscale and re-encode in one call. Returns the encoded
    /// bytes and the detected color mode.
    pub fn upscale_bytes(
        &self,
        bytes: &[u8],
        format: image::ImageFormat,
        outscale: Option<f32>,
        alpha_mode: AlphaMode,
    ) -> Result<(Vec<u8>, ColorMode)> {
        let image = codec::decode(bytes)?;
        let result = self.upscale(&image, outscale, alpha_mode)?;
        let encoded = codec::encode(&result.image, format)?;
        Ok((encoded, result.mode))
    }

    /// Pad, pick direct or tiled execution against the current memory
    /// budget, run, and crop the padding back off.
    fn run_pipeline(&self, tensor: &Array4<f32>) -> Result<Array4<f32>> {
        let scale = self.network.scale();
        let (padded, spec) = pre_process(tensor, self.options.pad, scale);
        let (batch, channels, height, width) = padded.dim();

        let tile_count = if self.options.calc_tiles {
            // Queried fresh per request; free memory moves between calls.
            let budget = self.probe.available_bytes()?;
            let count = tiles_required(
                batch,
                channels,
                height,
                width,
                self.options.pixel_cost_bytes,
                budget,
            )?;
            debug!(budget, count, "memory budget estimate");
            count
        } else {
            1
        };

        let output = if tile_count > 1 {
            let tile_edge = tile_edge_for_count(tile_count);
            let (canvas, _failed) = run_tiled(
                self.network.as_ref(),
                &padded,
                tile_edge,
                self.options.tile_pad,
            );
            canvas
        } else {
            run_direct(self.network.as_ref(), &padded)?
        };

        Ok(post_process(output, spec, scale))
    }
}
