//! Geometric bookkeeping for padded, tiled inference.
//!
//! The whole request stays on the stack: tensors and pad bookkeeping
//! travel as explicit arguments and return values, so one engine can
//! serve sequential requests without cross-request interference.

use ndarray::{s, Array4};
use tracing::{debug, warn};

use crate::network::Network;

/// Padding applied before inference, recorded so [`post_process`] can
/// crop it back off after the network scales everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PadSpec {
    /// Base reflection padding on the trailing height/width edges.
    pub pad: usize,
    /// Extra rows making the padded height divisible by the modulus.
    pub mod_pad_h: usize,
    /// Extra columns making the padded width divisible by the modulus.
    pub mod_pad_w: usize,
}

/// Stride modulus the padded dimensions must divide by: 2 for network
/// scale 2, 4 for scale 1, none otherwise.
pub fn mod_scale_for(scale: usize) -> Option<usize> {
    match scale {
        2 => Some(2),
        1 => Some(4),
        _ => None,
    }
}

/// Reflection-pad the trailing height/width edges of an NCHW tensor.
/// Mirrors adjacent interior pixels, excluding the border pixel
/// itself.
fn reflect_pad(arr: &Array4<f32>, pad_h: usize, pad_w: usize) -> Array4<f32> {
    let (batch, channels, h, w) = arr.dim();
    let new_h = h + pad_h;
    let new_w = w + pad_w;
    let mut padded = Array4::<f32>::zeros((batch, channels, new_h, new_w));

    padded.slice_mut(s![.., .., ..h, ..w]).assign(arr);

    for y in 0..pad_h {
        let src_y = if h >= 2 + y { h - 2 - y } else { 0 };
        for b in 0..batch {
            for c in 0..channels {
                for x in 0..w {
                    padded[[b, c, h + y, x]] = arr[[b, c, src_y, x]];
                }
            }
        }
    }

    // Mirror columns of the already row-padded tensor so the corner
    // region reflects in both axes.
    for x in 0..pad_w {
        let src_x = if w >= 2 + x { w - 2 - x } else { 0 };
        for b in 0..batch {
            for c in 0..channels {
                for y in 0..new_h {
                    padded[[b, c, y, w + x]] = padded[[b, c, y, src_x]];
                }
            }
        }
    }

    padded
}

/// Apply the fixed base padding and then the modulus padding for the
/// network's stride requirement. Returns the padded tensor and the
/// exact pad amounts for [`post_process`] to invert.
pub fn pre_process(img: &Array4<f32>, pad: usize, scale: usize) -> (Array4<f32>, PadSpec) {
    let mut out = if pad > 0 {
        reflect_pad(img, pad, pad)
    } else {
        img.clone()
    };
    let mut spec = PadSpec {
        pad,
        ..PadSpec::default()
    };

    if let Some(modulus) = mod_scale_for(scale) {
        let (_, _, h, w) = out.dim();
        spec.mod_pad_h = (modulus - h % modulus) % modulus;
        spec.mod_pad_w = (modulus - w % modulus) % modulus;
        if spec.mod_pad_h > 0 || spec.mod_pad_w > 0 {
            out = reflect_pad(&out, spec.mod_pad_h, spec.mod_pad_w);
        }
        debug!(
            mod_pad_h = spec.mod_pad_h,
            mod_pad_w = spec.mod_pad_w,
            "applied modulus padding"
        );
    }

    (out, spec)
}

/// Derive a tile edge length from a tile-count estimate.
pub fn tile_edge_for_count(count: u64) -> usize {
    if count > 5 {
        (count * 2) as usize
    } else {
        10
    }
}

/// One grid cell of a tiled pass. Coordinates are input-space with
/// exclusive ends; output-space equivalents are these multiplied by
/// the network scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileJob {
    pub row: usize,
    pub col: usize,
    /// Core region. The core regions of all jobs partition the image.
    pub x0: usize,
    pub x1: usize,
    pub y0: usize,
    pub y1: usize,
    /// Core region expanded by the context padding, clamped to image
    /// bounds. Padded regions of neighboring tiles may overlap.
    pub px0: usize,
    pub px1: usize,
    pub py0: usize,
    pub py1: usize,
}

/// Build the tile grid covering a `height × width` input.
pub fn tile_grid(height: usize, width: usize, tile_edge: usize, tile_pad: usize) -> Vec<TileJob> {
    let tiles_x = width.div_ceil(tile_edge);
    let tiles_y = height.div_ceil(tile_edge);
    let mut jobs = Vec::with_capacity(tiles_x * tiles_y);

    for row in 0..tiles_y {
        for col in 0..tiles_x {
            let x0 = col * tile_edge;
            let y0 = row * tile_edge;
            let x1 = (x0 + tile_edge).min(width);
            let y1 = (y0 + tile_edge).min(height);
            jobs.push(TileJob {
                row,
                col,
                x0,
                x1,
                y0,
                y1,
                px0: x0.saturating_sub(tile_pad),
                px1: (x1 + tile_pad).min(width),
                py0: y0.saturating_sub(tile_pad),
                py1: (y1 + tile_pad).min(height),
            });
        }
    }

    jobs
}

/// Single forward pass over the whole padded tensor.
pub fn run_direct(network: &dyn Network, input: &Array4<f32>) -> crate::error::Result<Array4<f32>> {
    debug!(shape = ?input.dim(), "direct inference");
    network.forward(input)
}

/// Tiled pass: sequential per-tile forward passes composited onto a
/// zero-initialized canvas. A tile whose forward pass fails is logged
/// and its canvas region left black; the request continues. Returns
/// the canvas and the failed-tile count.
pub fn run_tiled(
    network: &dyn Network,
    input: &Array4<f32>,
    tile_edge: usize,
    tile_pad: usize,
) -> (Array4<f32>, usize) {
    let scale = network.scale();
    let (batch, channels, height, width) = input.dim();
    let mut output = Array4::<f32>::zeros((batch, channels, height * scale, width * scale));

    let jobs = tile_grid(height, width, tile_edge, tile_pad);
    debug!(
        tile_edge,
        tile_pad,
        tiles = jobs.len(),
        height,
        width,
        "starting tiled inference"
    );

    let mut failed = 0usize;
    for job in &jobs {
        let tile_input = input
            .slice(s![.., .., job.py0..job.py1, job.px0..job.px1])
            .to_owned();

        let tile_output = match network.forward(&tile_input) {
            Ok(tensor) => tensor,
            Err(error) => {
                warn!(
                    row = job.row,
                    col = job.col,
                    %error,
                    "tile forward pass failed; region left black"
                );
                failed += 1;
                continue;
            }
        };

        // Strip the scaled context padding, then place the core region.
        let crop_x0 = (job.x0 - job.px0) * scale;
        let crop_y0 = (job.y0 - job.py0) * scale;
        let out_w = (job.x1 - job.x0) * scale;
        let out_h = (job.y1 - job.y0) * scale;

        output
            .slice_mut(s![
                ..,
                ..,
                job.y0 * scale..job.y1 * scale,
                job.x0 * scale..job.x1 * scale
            ])
            .assign(&tile_output.slice(s![
                ..,
                ..,
                crop_y0..crop_y0 + out_h,
                crop_x0..crop_x0 + out_w
            ]));
    }

    if failed > 0 {
        warn!(
            failed,
            total = jobs.len(),
            "tiled pass completed with failed tiles; output quality degraded"
        );
    }

    (output, failed)
}

/// Crop the modulus padding and then the base padding, both scaled by
/// the network factor, recovering `(h_in * scale, w_in * scale)`.
pub fn post_process(output: Array4<f32>, spec: PadSpec, scale: usize) -> Array4<f32> {
    let mut out = output;

    if spec.mod_pad_h > 0 || spec.mod_pad_w > 0 {
        let (_, _, h, w) = out.dim();
        out = out
            .slice(s![
                ..,
                ..,
                ..h - spec.mod_pad_h * scale,
                ..w - spec.mod_pad_w * scale
            ])
            .to_owned();
    }

    if spec.pad > 0 {
        let (_, _, h, w) = out.dim();
        out = out
            .slice(s![.., .., ..h - spec.pad * scale, ..w - spec.pad * scale])
            .to_owned();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mod_scale_follows_network_scale() {
        assert_eq!(mod_scale_for(2), Some(2));
        assert_eq!(mod_scale_for(1), Some(4));
        assert_eq!(mod_scale_for(4), None);
        assert_eq!(mod_scale_for(3), None);
    }

    #[test]
    fn tile_edge_heuristic_is_preserved_verbatim() {
        assert_eq!(tile_edge_for_count(1), 10);
        assert_eq!(tile_edge_for_count(5), 10);
        assert_eq!(tile_edge_for_count(6), 12);
        assert_eq!(tile_edge_for_count(20), 40);
    }

    #[test]
    fn grid_for_130px_padded_image_with_edge_12() {
        let jobs = tile_grid(130, 130, 12, 10);
        // ceil(130 / 12) = 11 per axis
        assert_eq!(jobs.len(), 11 * 11);
        assert_eq!(jobs.last().unwrap().x1, 130);
        assert_eq!(jobs.last().unwrap().y1, 130);
    }

    #[test]
    fn grid_core_regions_partition_the_image() {
        for (h, w, edge, pad) in [(130, 130, 12, 10), (37, 53, 10, 4), (8, 8, 10, 10), (64, 1, 7, 3)]
        {
            let jobs = tile_grid(h, w, edge, pad);
            let mut covered = vec![0u8; h * w];
            for job in &jobs {
                assert!(job.px0 <= job.x0 && job.x1 <= job.px1);
                assert!(job.py0 <= job.y0 && job.y1 <= job.py1);
                for y in job.y0..job.y1 {
                    for x in job.x0..job.x1 {
                        covered[y * w + x] += 1;
                    }
                }
            }
            // no gaps, no overlaps, no duplicated writes
            assert!(covered.iter().all(|&count| count == 1));
        }
    }

    #[test]
    fn reflect_pad_mirrors_interior_pixels() {
        let mut arr = Array4::<f32>::zeros((1, 1, 3, 3));
        for y in 0..3 {
            for x in 0..3 {
                arr[[0, 0, y, x]] = (y * 3 + x) as f32;
            }
        }
        let padded = reflect_pad(&arr, 2, 2);
        assert_eq!(padded.dim(), (1, 1, 5, 5));
        // Rows: new row 3 mirrors row 1, new row 4 mirrors row 0.
        assert_eq!(padded[[0, 0, 3, 0]], arr[[0, 0, 1, 0]]);
        assert_eq!(padded[[0, 0, 4, 0]], arr[[0, 0, 0, 0]]);
        // Columns: new col 3 mirrors col 1.
        assert_eq!(padded[[0, 0, 0, 3]], arr[[0, 0, 0, 1]]);
        // Corner reflects in both axes.
        assert_eq!(padded[[0, 0, 3, 3]], arr[[0, 0, 1, 1]]);
    }

    #[test]
    fn pre_process_records_invertible_pad_amounts() {
        let img = Array4::<f32>::zeros((1, 3, 13, 17));
        let (padded, spec) = pre_process(&img, 10, 2);
        // 13+10=23 -> +1 to reach 24; 17+10=27 -> +1 to reach 28
        assert_eq!(spec, PadSpec { pad: 10, mod_pad_h: 1, mod_pad_w: 1 });
        assert_eq!(padded.dim(), (1, 3, 24, 28));
    }

    #[test]
    fn pre_process_skips_modulus_padding_for_scale_4() {
        let img = Array4::<f32>::zeros((1, 3, 13, 17));
        let (padded, spec) = pre_process(&img, 10, 4);
        assert_eq!(spec, PadSpec { pad: 10, mod_pad_h: 0, mod_pad_w: 0 });
        assert_eq!(padded.dim(), (1, 3, 23, 27));
    }

    #[test]
    fn post_process_inverts_pre_process_dimensions() {
        for pad in [0usize, 10] {
            for scale in [1usize, 2, 4] {
                let img = Array4::<f32>::zeros((1, 3, 13, 17));
                let (padded, spec) = pre_process(&img, pad, scale);
                let (_, _, ph, pw) = padded.dim();
                // Stand-in for the network: scale spatial dims.
                let upscaled = Array4::<f32>::zeros((1, 3, ph * scale, pw * scale));
                let out = post_process(upscaled, spec, scale);
                assert_eq!(out.dim(), (1, 3, 13 * scale, 17 * scale));
            }
        }
    }
}
