//! YuNet detector post-processing.
//!
//! YuNet is anchor-free: every cell of the stride 8, 16 and 32 feature grids
//! predicts one candidate face. The network emits twelve tensors, grouped by
//! kind and then by stride:
//!
//! `cls_8, cls_16, cls_32, obj_8, obj_16, obj_32, bbox_8, bbox_16, bbox_32, kps_8, kps_16, kps_32`
//!
//! with shapes `[1, H*W, 1]` for cls/obj, `[1, H*W, 4]` for bbox and
//! `[1, H*W, 10]` for the five landmarks. A cell at grid `(row, col)` decodes as
//!
//! ```text
//! cx = (col + dx) * stride      w = dw * stride
//! cy = (row + dy) * stride      h = dh * stride
//! ```
//!
//! cls and obj are already probabilities; a cell scores
//! `sqrt(cls * obj)`, each clamped to `[0, 1]`.
//!
//! All coordinates returned here are normalized to the square network input.

use anyhow::{bail, Result};
use ndarray::Array2;

pub const STRIDES: [usize; 3] = [8, 16, 32];

#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h (normalized [0,1])
    pub score: f32,
    pub landmarks: [f32; 10],
}

/// Decoded tensors for a single stride.
#[derive(Debug, Clone)]
pub struct StrideOutput {
    pub stride: usize,
    /// `[cells, 1]` geometric mean of class and objectness.
    pub scores: Array2<f32>,
    /// `[cells, 4]` box deltas.
    pub boxes: Array2<f32>,
    /// `[cells, 10]` landmark deltas.
    pub landmarks: Array2<f32>,
}

impl StrideOutput {
    fn grid_side(&self, input_size: usize) -> usize {
        input_size / self.stride
    }
}

fn take_tensor(
    outputs: &[(&[i64], &[f32])],
    index: usize,
    cells: usize,
    width: usize,
) -> Result<Array2<f32>> {
    let Some((shape, data)) = outputs.get(index) else {
        bail!("YuNet output {} is missing", index);
    };
    let expected = [1, cells as i64, width as i64];
    if shape[..] != expected[..] {
        bail!(
            "YuNet output {} has shape {:?}, expected {:?}",
            index,
            shape,
            expected
        );
    }
    Ok(Array2::from_shape_vec((cells, width), data.to_vec())?)
}

/// Group the twelve raw YuNet tensors into one [`StrideOutput`] per stride.
pub fn parse_outputs(
    outputs: &[(&[i64], &[f32])],
    input_size: usize,
) -> Result<Vec<StrideOutput>> {
    if outputs.len() < STRIDES.len() * 4 {
        bail!(
            "YuNet produced {} outputs, expected {}",
            outputs.len(),
            STRIDES.len() * 4
        );
    }

    STRIDES
        .iter()
        .enumerate()
        .map(|(i, &stride)| {
            let side = input_size / stride;
            let cells = side * side;
            let cls = take_tensor(outputs, i, cells, 1)?;
            let obj = take_tensor(outputs, i + 3, cells, 1)?;
            Ok(StrideOutput {
                stride,
                scores: combine_scores(&cls, &obj),
                boxes: take_tensor(outputs, i + 6, cells, 4)?,
                landmarks: take_tensor(outputs, i + 9, cells, 10)?,
            })
        })
        .collect()
}

fn combine_scores(cls: &Array2<f32>, obj: &Array2<f32>) -> Array2<f32> {
    let mut scores = cls.mapv(|c| c.clamp(0.0, 1.0));
    scores.zip_mut_with(obj, |s, &o| *s = (*s * o.clamp(0.0, 1.0)).sqrt());
    scores
}

/// Decode every grid cell scoring at least `score_threshold`.
pub fn decode(
    outputs: &[StrideOutput],
    score_threshold: f32,
    input_size: usize,
) -> Result<Vec<RawDetection>> {
    let norm = input_size as f32;
    let mut detections = Vec::new();

    for out in outputs {
        let side = out.grid_side(input_size);
        let cells = out.scores.nrows();
        if cells != side * side {
            bail!(
                "stride {} expects a {}x{} grid, got {} cells",
                out.stride,
                side,
                side,
                cells
            );
        }

        let stride = out.stride as f32;
        for idx in 0..cells {
            let score = out.scores[[idx, 0]];
            if score < score_threshold {
                continue;
            }
            let row = (idx / side) as f32;
            let col = (idx % side) as f32;

            let cx = (col + out.boxes[[idx, 0]]) * stride / norm;
            let cy = (row + out.boxes[[idx, 1]]) * stride / norm;
            let w = out.boxes[[idx, 2]] * stride / norm;
            let h = out.boxes[[idx, 3]] * stride / norm;

            let mut landmarks = [0.0f32; 10];
            for k in 0..5 {
                landmarks[k * 2] = (col + out.landmarks[[idx, k * 2]]) * stride / norm;
                landmarks[k * 2 + 1] = (row + out.landmarks[[idx, k * 2 + 1]]) * stride / norm;
            }

            detections.push(RawDetection {
                bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                score,
                landmarks,
            });
        }
    }

    Ok(detections)
}
