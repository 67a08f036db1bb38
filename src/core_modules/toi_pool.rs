// THEORY:
// Tube-of-interest pooling is the bridge from a linked tube to the classification
// stage. A clip's feature volume has shape [C, D, H, W], where D is the temporal depth
// left after the convolutional stages and H x W is the feature map. Because tubes
// differ in size and position, the pooled output must have a fixed shape no matter
// which tube was linked.
//
// Key architectural principles:
// 1.  **Explicit Calibration**: Boxes live in input-image coordinates while the volume
//     lives in feature coordinates. `FeatureScale` states the two resolutions and
//     derives the stride from them, instead of baking scale factors into the code.
// 2.  **Spatial Then Temporal**: Every feature slice is first max-pooled inside the
//     box of the frame it belongs to (slice `z` of `D` maps to frame `z * N / D`),
//     into a `height x width` grid. The slices are then max-pooled along time into
//     `depth` bins.
// 3.  **No Empty Bins**: Boxes are clamped to the feature map and always cover at
//     least one cell, and bin edges are floored/ceiled so every bin reads at least
//     one value. A tube that drifts off-screen still produces a well-defined output.

use ndarray::{Array4, ArrayView4, s};
use serde::{Deserialize, Serialize};

use crate::core_modules::bbox::BBox;
use crate::core_modules::proposal::Tube;
use crate::error::{LinkError, LinkResult};

/// Input resolution and feature-map resolution of one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureScale {
    pub input_width: u32,
    pub input_height: u32,
    pub feature_width: u32,
    pub feature_height: u32,
}

impl FeatureScale {
    pub fn new(input_width: u32, input_height: u32, feature_width: u32, feature_height: u32) -> Self {
        Self {
            input_width,
            input_height,
            feature_width,
            feature_height,
        }
    }

    pub fn validate(&self) -> LinkResult<()> {
        if self.input_width == 0 || self.input_height == 0 || self.feature_width == 0 || self.feature_height == 0 {
            return Err(LinkError::InvalidConfiguration(format!(
                "feature scale dimensions must be non-zero, got {:?}",
                self
            )));
        }
        Ok(())
    }

    /// Input pixels per feature cell, horizontally.
    pub fn stride_x(&self) -> f64 {
        self.input_width as f64 / self.feature_width as f64
    }

    /// Input pixels per feature cell, vertically.
    pub fn stride_y(&self) -> f64 {
        self.input_height as f64 / self.feature_height as f64
    }

    /// Maps a box from input-image coordinates to feature-map coordinates.
    pub fn to_feature(&self, bbox: &BBox) -> BBox {
        bbox.scaled(1.0 / self.stride_x(), 1.0 / self.stride_y())
    }
}

/// Max-pools a feature volume along a tube into a fixed `[C, depth, height, width]` output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToiPool {
    pub depth: usize,
    pub height: usize,
    pub width: usize,
}

impl ToiPool {
    pub fn new(depth: usize, height: usize, width: usize) -> LinkResult<Self> {
        if depth == 0 || height == 0 || width == 0 {
            return Err(LinkError::InvalidConfiguration(format!(
                "pooled output must be non-empty, got {}x{}x{}",
                depth, height, width
            )));
        }
        Ok(Self { depth, height, width })
    }

    pub fn pool(&self, volume: ArrayView4<'_, f32>, tube: &Tube, scale: &FeatureScale) -> LinkResult<Array4<f32>> {
        scale.validate()?;
        let (channels, vol_depth, vol_height, vol_width) = volume.dim();
        if vol_height != scale.feature_height as usize || vol_width != scale.feature_width as usize {
            return Err(LinkError::InvalidConfiguration(format!(
                "feature volume is {}x{} but feature scale expects {}x{}",
                vol_height, vol_width, scale.feature_height, scale.feature_width
            )));
        }
        if vol_depth == 0 || channels == 0 {
            return Err(LinkError::InvalidConfiguration(format!(
                "feature volume has no data, shape {:?}",
                volume.dim()
            )));
        }
        if tube.is_empty() {
            return Err(LinkError::EmptyInput { frame: 0 });
        }

        // --- 1. Spatial pooling of every slice inside its frame's box ---
        let mut spatial = Array4::<f32>::zeros((channels, vol_depth, self.height, self.width));
        for z in 0..vol_depth {
            let frame = z * tube.len() / vol_depth;
            let fb = scale.to_feature(&tube.proposals[frame].bbox);
            let (x_start, x_end) = cell_span(fb.x0.min(fb.x1), fb.x0.max(fb.x1), vol_width);
            let (y_start, y_end) = cell_span(fb.y0.min(fb.y1), fb.y0.max(fb.y1), vol_height);

            for oh in 0..self.height {
                let (ys, ye) = bin(y_start, y_end - y_start, oh, self.height);
                for ow in 0..self.width {
                    let (xs, xe) = bin(x_start, x_end - x_start, ow, self.width);
                    for c in 0..channels {
                        spatial[[c, z, oh, ow]] = volume
                            .slice(s![c, z, ys..ye, xs..xe])
                            .fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
                    }
                }
            }
        }

        // --- 2. Temporal pooling of the slices into depth bins ---
        let mut pooled = Array4::<f32>::zeros((channels, self.depth, self.height, self.width));
        for od in 0..self.depth {
            let (zs, ze) = bin(0, vol_depth, od, self.depth);
            for c in 0..channels {
                for oh in 0..self.height {
                    for ow in 0..self.width {
                        pooled[[c, od, oh, ow]] = spatial
                            .slice(s![c, zs..ze, oh, ow])
                            .fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
                    }
                }
            }
        }
        Ok(pooled)
    }
}

/// Integer cell range `[start, end)` covered by `lo..hi`, clamped to `0..limit` and at
/// least one cell wide.
fn cell_span(lo: f64, hi: f64, limit: usize) -> (usize, usize) {
    let max_start = (limit - 1) as f64;
    let start = lo.floor().clamp(0.0, max_start) as usize;
    let end = (hi.ceil().clamp(0.0, limit as f64) as usize).max(start + 1);
    (start, end)
}

/// Bin `i` of `n` over a span of `len` cells beginning at `offset`. Never empty.
fn bin(offset: usize, len: usize, i: usize, n: usize) -> (usize, usize) {
    let start = offset + (i * len) / n;
    let end = offset + ((i + 1) * len).div_ceil(n);
    (start, end.max(start + 1))
}
