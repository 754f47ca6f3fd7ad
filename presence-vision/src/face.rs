use std::path::Path;

use crate::yunet;
use anyhow::{Context, Result};
use image::{imageops, RgbImage};
use ndarray::Array4;
use ort::{session::Session, value::Value};

/// YuNet expects a fixed `[1, 3, 640, 640]` input.
pub const INPUT_SIZE: u32 = 640;

/// One face found in a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h in frame pixels
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5
}

/// Anything able to find faces in a frame.
///
/// Implementations may keep inference state between calls, hence `&mut self`.
pub trait FaceDetector: Send {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>>;
}

/// How a frame was scaled and padded onto the square network input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl Letterbox {
    pub fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = target as f32 / width.max(height) as f32;
        let new_width = (width as f32 * scale) as u32;
        let new_height = (height as f32 * scale) as u32;
        Self {
            scale,
            offset_x: (target - new_width) / 2,
            offset_y: (target - new_height) / 2,
        }
    }

    /// Map a point normalized to the square input back to frame pixels.
    pub fn unmap(&self, x: f32, y: f32, target: u32) -> (f32, f32) {
        (
            (x * target as f32 - self.offset_x as f32) / self.scale,
            (y * target as f32 - self.offset_y as f32) / self.scale,
        )
    }

    pub fn unmap_len(&self, len: f32, target: u32) -> f32 {
        len * target as f32 / self.scale
    }
}

/// Pad `frame` to a square, resize it to `target` and lay it out as planar BGR.
pub fn preprocess(frame: &RgbImage, target: u32) -> Result<(Array4<f32>, Letterbox)> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        anyhow::bail!("empty frame");
    }
    let letterbox = Letterbox::fit(width, height, target);
    let new_width = ((width as f32 * letterbox.scale) as u32).max(1);
    let new_height = ((height as f32 * letterbox.scale) as u32).max(1);

    let resized = imageops::resize(frame, new_width, new_height, imageops::FilterType::Triangle);
    let mut canvas = RgbImage::new(target, target);
    imageops::overlay(
        &mut canvas,
        &resized,
        letterbox.offset_x as i64,
        letterbox.offset_y as i64,
    );

    let side = target as usize;
    let mut input = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in canvas.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        input[[0, 0, y, x]] = pixel[2] as f32;
        input[[0, 1, y, x]] = pixel[1] as f32;
        input[[0, 2, y, x]] = pixel[0] as f32;
    }

    Ok((input, letterbox))
}

/// Detect faces in a frame using a YuNet session.
pub fn detect_faces(
    session: &mut Session,
    frame: &RgbImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let (input, letterbox) = preprocess(frame, INPUT_SIZE)?;
    let input_tensor = Value::from_array(input)?;

    let outputs = session.run(ort::inputs![input_tensor])?;

    let mut output_data: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        output_data.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let output_refs: Vec<(&[i64], &[f32])> = output_data
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let strides = yunet::parse_outputs(&output_refs, INPUT_SIZE as usize)?;
    let raw = yunet::decode(&strides, score_threshold, INPUT_SIZE as usize)?;

    let detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| to_frame_space(&d, &letterbox))
        .collect();

    if nms_threshold < 1.0 {
        Ok(nms(&detections, nms_threshold))
    } else {
        Ok(detections)
    }
}

fn to_frame_space(raw: &yunet::RawDetection, letterbox: &Letterbox) -> Detection {
    let (x, y) = letterbox.unmap(raw.bbox[0], raw.bbox[1], INPUT_SIZE);
    let mut landmarks = [0.0f32; 10];
    for (out, point) in landmarks
        .chunks_exact_mut(2)
        .zip(raw.landmarks.chunks_exact(2))
    {
        let (lx, ly) = letterbox.unmap(point[0], point[1], INPUT_SIZE);
        out[0] = lx;
        out[1] = ly;
    }
    Detection {
        bbox: [
            x,
            y,
            letterbox.unmap_len(raw.bbox[2], INPUT_SIZE),
            letterbox.unmap_len(raw.bbox[3], INPUT_SIZE),
        ],
        score: raw.score,
        landmarks,
    }
}

/// Non-maximum suppression, highest score first.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in sorted {
        if keep
            .iter()
            .all(|kept| compute_iou(&kept.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// YuNet face detector backed by an ONNX Runtime session.
pub struct YuNetDetector {
    session: Session,
    score_threshold: f32,
    nms_threshold: f32,
}

impl YuNetDetector {
    pub fn new(session: Session, score_threshold: f32, nms_threshold: f32) -> Self {
        Self {
            session,
            score_threshold,
            nms_threshold,
        }
    }

    pub fn from_file(model: &Path, score_threshold: f32, nms_threshold: f32) -> Result<Self> {
        let session = crate::model::detector_session(model)
            .with_context(|| format!("loading detector from {}", model.display()))?;
        Ok(Self::new(session, score_threshold, nms_threshold))
    }
}

impl FaceDetector for YuNetDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
        detect_faces(
            &mut self.session,
            frame,
            self.score_threshold,
            self.nms_threshold,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn det(bbox: [f32; 4], score: f32) -> Detection {
        Detection {
            bbox,
            score,
            landmarks: [0.0; 10],
        }
    }

    #[test]
    fn test_iou() {
        let a = [10.0, 10.0, 20.0, 20.0];
        let b = [15.0, 15.0, 20.0, 20.0];
        let iou = compute_iou(&a, &b);
        assert!(iou > 0.0 && iou < 1.0);
        assert!((compute_iou(&a, &a) - 1.0).abs() < 1e-6);

        let c = [100.0, 100.0, 10.0, 10.0];
        assert_eq!(compute_iou(&a, &c), 0.0);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let detections = vec![
            det([12.0, 12.0, 20.0, 20.0], 0.8),
            det([10.0, 10.0, 20.0, 20.0], 0.9),
            det([100.0, 100.0, 20.0, 20.0], 0.85),
        ];

        let result = nms(&detections, 0.3);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].score, 0.9);
        assert_eq!(result[1].score, 0.85);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(&[], 0.3).is_empty());
    }

    #[rstest]
    #[case::vga(640, 480, 1.0, 0, 80)]
    #[case::hd(1280, 720, 0.5, 0, 140)]
    #[case::portrait(480, 640, 1.0, 80, 0)]
    #[case::small_square(320, 320, 2.0, 0, 0)]
    fn test_letterbox_fit(
        #[case] width: u32,
        #[case] height: u32,
        #[case] scale: f32,
        #[case] offset_x: u32,
        #[case] offset_y: u32,
    ) {
        let lb = Letterbox::fit(width, height, 640);
        assert!((lb.scale - scale).abs() < 1e-6);
        assert_eq!((lb.offset_x, lb.offset_y), (offset_x, offset_y));

        // center of the square input is the center of the frame
        let (x, y) = lb.unmap(0.5, 0.5, 640);
        assert!((x - width as f32 / 2.0).abs() < 1e-3);
        assert!((y - height as f32 / 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_unmap_len_undoes_scale() {
        let lb = Letterbox::fit(1280, 720, 640);
        assert!((lb.unmap_len(0.1, 640) - 128.0).abs() < 1e-3);
    }

    #[test]
    fn test_preprocess_is_planar_bgr() {
        let frame = RgbImage::from_pixel(8, 8, image::Rgb([10, 20, 30]));
        let (input, lb) = preprocess(&frame, 16).unwrap();
        assert_eq!(input.shape(), &[1, 3, 16, 16]);
        assert_eq!(lb.offset_x, 0);
        assert_eq!(input[[0, 0, 5, 5]], 30.0);
        assert_eq!(input[[0, 1, 5, 5]], 20.0);
        assert_eq!(input[[0, 2, 5, 5]], 10.0);
    }

    #[test]
    fn test_preprocess_rejects_empty_frame() {
        assert!(preprocess(&RgbImage::new(0, 0), 16).is_err());
    }
}
