use anyhow::{Context, Result};
use image::RgbImage;

use crate::face::{Detection, FaceDetector};
use crate::overlay::Renderer;

/// Per-frame work: detect faces, then optionally draw them.
pub struct Pipeline {
    detector: Box<dyn FaceDetector>,
    renderer: Option<Box<dyn Renderer>>,
}

impl Pipeline {
    pub fn new(detector: Box<dyn FaceDetector>) -> Self {
        Self {
            detector,
            renderer: None,
        }
    }

    pub fn with_renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.set_renderer(renderer);
        self
    }

    pub fn set_detector(&mut self, detector: Box<dyn FaceDetector>) {
        self.detector = detector;
    }

    pub fn set_renderer(&mut self, renderer: Box<dyn Renderer>) {
        self.renderer = Some(renderer);
    }

    pub fn has_renderer(&self) -> bool {
        self.renderer.is_some()
    }

    /// Detect faces in `frame`; draw them too when `render` is set.
    ///
    /// Overlay failures are logged and never fail the frame.
    pub fn process(&mut self, frame: &RgbImage, render: bool) -> Result<Vec<Detection>> {
        let detections = self.detector.detect(frame).context("detecting faces")?;

        if render {
            if let Some(renderer) = self.renderer.as_mut() {
                if let Err(e) = renderer.render(frame, &detections) {
                    log::warn!("overlay: {:#}", e);
                }
            }
        }

        Ok(detections)
    }

    pub fn clear_overlay(&mut self) {
        if let Some(renderer) = self.renderer.as_mut() {
            if let Err(e) = renderer.clear() {
                log::warn!("overlay: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Fixed(usize);

    impl FaceDetector for Fixed {
        fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>> {
            Ok(vec![
                Detection {
                    bbox: [0.0, 0.0, 1.0, 1.0],
                    score: 0.9,
                    landmarks: [0.0; 10],
                };
                self.0
            ])
        }
    }

    #[derive(Default, Clone)]
    struct Recorder(Arc<Mutex<Vec<usize>>>);

    impl Renderer for Recorder {
        fn render(&mut self, _frame: &RgbImage, detections: &[Detection]) -> Result<()> {
            self.0.lock().unwrap().push(detections.len());
            Ok(())
        }
    }

    #[test]
    fn renders_only_when_asked() {
        let recorder = Recorder::default();
        let mut pipeline =
            Pipeline::new(Box::new(Fixed(2))).with_renderer(Box::new(recorder.clone()));
        let frame = RgbImage::new(4, 4);

        assert_eq!(pipeline.process(&frame, false).unwrap().len(), 2);
        assert!(recorder.0.lock().unwrap().is_empty());

        pipeline.process(&frame, true).unwrap();
        assert_eq!(*recorder.0.lock().unwrap(), vec![2]);
    }

    #[test]
    fn render_without_renderer_is_a_noop() {
        let mut pipeline = Pipeline::new(Box::new(Fixed(0)));
        assert!(!pipeline.has_renderer());
        assert!(pipeline.process(&RgbImage::new(4, 4), true).unwrap().is_empty());
    }
}
