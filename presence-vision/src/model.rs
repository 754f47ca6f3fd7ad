use std::path::Path;

use anyhow::{Context, Result};
use ort::{
    ep::{self, ExecutionProvider},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
};

use crate::face::{FaceDetector, YuNetDetector};
use crate::resolver::ModelSource;

pub const DETECTOR_MODEL: &str = "face_detection_yunet_2023mar.onnx";

pub fn session_builder() -> Result<SessionBuilder> {
    #[allow(unused_mut)]
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

pub fn detector_session(model: &Path) -> Result<Session> {
    session_builder()?
        .commit_from_file(model)
        .context("load detector model")
}

/// Produces a ready face detector, typically by loading model files.
pub trait ModelLoader {
    /// Names of the model resources that must resolve before loading.
    fn required_models(&self) -> &[&'static str];

    fn load(&self) -> Result<Box<dyn FaceDetector>>;
}

/// Loads the YuNet detector from a directory or base URL.
#[derive(Debug, Clone)]
pub struct YuNetLoader {
    pub source: ModelSource,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl YuNetLoader {
    pub fn new(source: ModelSource) -> Self {
        Self {
            source,
            score_threshold: 0.5,
            nms_threshold: 0.3,
        }
    }

    pub fn with_thresholds(mut self, score_threshold: f32, nms_threshold: f32) -> Self {
        self.score_threshold = score_threshold;
        self.nms_threshold = nms_threshold;
        self
    }
}

impl ModelLoader for YuNetLoader {
    fn required_models(&self) -> &[&'static str] {
        &[DETECTOR_MODEL]
    }

    fn load(&self) -> Result<Box<dyn FaceDetector>> {
        let paths = self
            .source
            .resolve_all(self.required_models())
            .with_context(|| format!("resolving models from {}", self.source))?;
        let detector =
            YuNetDetector::from_file(&paths[0], self.score_threshold, self.nms_threshold)?;
        log::info!("models loaded from {}", self.source);
        Ok(Box::new(detector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_dir_fails_before_onnx() {
        let loader = YuNetLoader::new(ModelSource::Dir("/nonexistent/presence/models".into()));
        let err = loader.load().err().expect("load should fail");
        assert!(format!("{:#}", err).contains(DETECTOR_MODEL));
    }

    #[test]
    fn thresholds_have_defaults() {
        let loader = YuNetLoader::new(ModelSource::Dir("models".into()));
        assert_eq!(loader.score_threshold, 0.5);
        assert_eq!(loader.nms_threshold, 0.3);

        let loader = loader.with_thresholds(0.7, 0.4);
        assert_eq!(loader.score_threshold, 0.7);
        assert_eq!(loader.nms_threshold, 0.4);
    }
}
