use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};

use crate::face::Detection;

const BOX_COLOR: Rgb<u8> = Rgb([0, 128, 255]);
const LANDMARK_COLOR: Rgb<u8> = Rgb([255, 64, 64]);

/// Draws detection results for a frame somewhere a human can see them.
pub trait Renderer: Send {
    fn render(&mut self, frame: &RgbImage, detections: &[Detection]) -> Result<()>;

    /// Remove whatever was drawn; called when tracking stops.
    fn clear(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes an annotated copy of the latest frame to a single image file.
pub struct OverlayRenderer {
    path: PathBuf,
}

impl OverlayRenderer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Renderer for OverlayRenderer {
    fn render(&mut self, frame: &RgbImage, detections: &[Detection]) -> Result<()> {
        let mut canvas = frame.clone();
        draw_detections(&mut canvas, detections);
        canvas
            .save(&self.path)
            .with_context(|| format!("writing overlay {}", self.path.display()))
    }

    fn clear(&mut self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing overlay {}", self.path.display())),
        }
    }
}

/// Outline every detection box and mark its landmarks, clipped to the image.
pub fn draw_detections(img: &mut RgbImage, detections: &[Detection]) {
    for det in detections {
        let [x, y, w, h] = det.bbox;
        draw_rect(img, x, y, x + w, y + h);
        for point in det.landmarks.chunks_exact(2) {
            draw_dot(img, point[0], point[1]);
        }
    }
}

fn put(img: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_rect(img: &mut RgbImage, x0: f32, y0: f32, x1: f32, y1: f32) {
    let (x0, y0, x1, y1) = (
        x0.round() as i64,
        y0.round() as i64,
        x1.round() as i64,
        y1.round() as i64,
    );
    for x in x0..=x1 {
        put(img, x, y0, BOX_COLOR);
        put(img, x, y1, BOX_COLOR);
    }
    for y in y0..=y1 {
        put(img, x0, y, BOX_COLOR);
        put(img, x1, y, BOX_COLOR);
    }
}

fn draw_dot(img: &mut RgbImage, x: f32, y: f32) {
    let (cx, cy) = (x.round() as i64, y.round() as i64);
    for dy in -1..=1 {
        for dx in -1..=1 {
            put(img, cx + dx, cy + dy, LANDMARK_COLOR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection() -> Detection {
        let mut landmarks = [0.0; 10];
        landmarks[0] = 5.0;
        landmarks[1] = 5.0;
        Detection {
            bbox: [2.0, 2.0, 6.0, 6.0],
            score: 0.9,
            landmarks,
        }
    }

    #[test]
    fn draws_box_edges_and_landmarks() {
        let mut img = RgbImage::new(12, 12);
        draw_detections(&mut img, &[detection()]);

        assert_eq!(*img.get_pixel(2, 2), BOX_COLOR);
        assert_eq!(*img.get_pixel(8, 4), BOX_COLOR);
        assert_eq!(*img.get_pixel(5, 5), LANDMARK_COLOR);
        assert_eq!(*img.get_pixel(10, 10), Rgb([0, 0, 0]));
    }

    #[test]
    fn boxes_outside_the_frame_are_clipped() {
        let mut img = RgbImage::new(4, 4);
        let det = Detection {
            bbox: [-10.0, -10.0, 100.0, 100.0],
            score: 0.9,
            landmarks: [-50.0; 10],
        };
        draw_detections(&mut img, &[det]);
        assert!(img.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }
}
