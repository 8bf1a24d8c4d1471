//! Tile-count estimation against a device memory budget.
//!
//! The estimate is intentionally coarse: a per-pixel·channel cost
//! constant, empirically tuned, stands in for the network's real peak
//! allocation. It over-counts slightly rather than risking OOM.

use crate::error::{Error, Result};

/// Default peak-memory cost per pixel·channel, in bytes (~50 KiB,
/// tuned for Real-ESRGAN-class networks).
pub const DEFAULT_PIXEL_COST_BYTES: u64 = 50 * 1024;

/// Estimate how many tiles are needed to process a
/// `batch × channels × height × width` tensor within
/// `memory_limit_bytes`.
///
/// Returns 1 when a single forward pass fits. The result is a tile
/// *count* estimate, not an edge length; the scheduler derives an
/// actual edge from it ([`crate::tiling::tile_edge_for_count`]).
pub fn tiles_required(
    batch: usize,
    channels: usize,
    height: usize,
    width: usize,
    per_pixel_cost_bytes: u64,
    memory_limit_bytes: u64,
) -> Result<u64> {
    if memory_limit_bytes == 0 {
        return Err(Error::Configuration(
            "memory limit must be positive".to_string(),
        ));
    }
    let pixels = batch as u64 * channels as u64 * height as u64 * width as u64;
    let required_bytes = pixels.saturating_mul(per_pixel_cost_bytes);
    Ok(required_bytes.div_ceil(memory_limit_bytes).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_image_fits_in_one_pass() {
        let count = tiles_required(1, 3, 100, 100, DEFAULT_PIXEL_COST_BYTES, u64::MAX).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn count_is_ceiling_of_required_over_limit() {
        // 1*3*100*100 pixels * 1024 B = 30_720_000 B; / 5_200_000 B -> ceil(5.9) = 6
        let count = tiles_required(1, 3, 100, 100, 1024, 5_200_000).unwrap();
        assert_eq!(count, 6);
    }

    #[test]
    fn exact_multiple_does_not_round_up() {
        // 1*1*10*10 * 100 = 10_000; / 2_500 = 4 exactly
        let count = tiles_required(1, 1, 10, 10, 100, 2_500).unwrap();
        assert_eq!(count, 4);
    }

    #[test]
    fn zero_limit_is_a_configuration_error() {
        let result = tiles_required(1, 3, 16, 16, DEFAULT_PIXEL_COST_BYTES, 0);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
