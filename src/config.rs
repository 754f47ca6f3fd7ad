use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use presence_vision::ModelSource;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::PresenceError;
use crate::session::StartOptions;

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("PRESENCE_CONFIG_PATH").unwrap_or("/usr/local/etc/presence/config.toml"))
});

pub static MODEL_PATH: Lazy<&'static str> =
    Lazy::new(|| option_env!("PRESENCE_MODEL_PATH").unwrap_or("/usr/local/share/presence/models"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: String,
    pub width: u32,
    pub height: u32,
    /// Directory or http(s) base URL holding the model files.
    pub model_path: String,
    pub detection_interval_ms: u64,
    pub user_not_present_threshold_ms: u64,
    pub use_canvas: bool,
    pub overlay_path: PathBuf,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            model_path: MODEL_PATH.to_string(),
            detection_interval_ms: 100,
            user_not_present_threshold_ms: 20_000,
            use_canvas: false,
            overlay_path: PathBuf::from("/tmp/presence-overlay.png"),
            score_threshold: 0.5,
            nms_threshold: 0.3,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), PresenceError> {
        if self.detection_interval_ms == 0 {
            return Err(PresenceError::InvalidConfig(
                "detection_interval_ms must be greater than zero".to_string(),
            ));
        }
        for (name, value) in [
            ("score_threshold", self.score_threshold),
            ("nms_threshold", self.nms_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PresenceError::InvalidConfig(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    pub fn start_options(&self) -> StartOptions {
        StartOptions {
            tick_interval: Duration::from_millis(self.detection_interval_ms),
            absence_threshold: Duration::from_millis(self.user_not_present_threshold_ms),
            use_canvas: self.use_canvas,
        }
    }

    pub fn model_source(&self) -> ModelSource {
        ModelSource::parse(&self.model_path)
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let cfg = load_config(Some(&tmp.path().join("nope.toml"))).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.detection_interval_ms, 100);
        assert_eq!(cfg.user_not_present_threshold_ms, 20_000);
        assert!(!cfg.use_canvas);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            "camera = \"/dev/video2\"\nuser_not_present_threshold_ms = 5000\n",
        )
        .unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.camera, "/dev/video2");
        assert_eq!(cfg.user_not_present_threshold_ms, 5000);
        assert_eq!(cfg.width, 640);
        assert_eq!(cfg.score_threshold, 0.5);
    }

    #[test]
    fn save_then_load_preserves_values() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.toml");
        let cfg = Config {
            use_canvas: true,
            model_path: "https://example.com/models".to_string(),
            ..Config::default()
        };
        save_config(&cfg, Some(&path)).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap(), cfg);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "detection_interval_ms = 0\n").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("detection_interval_ms"));
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let cfg = Config {
            score_threshold: 1.5,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(PresenceError::InvalidConfig(_))));
    }

    #[test]
    fn start_options_carry_timings() {
        let cfg = Config {
            detection_interval_ms: 250,
            user_not_present_threshold_ms: 1000,
            use_canvas: true,
            ..Config::default()
        };
        let opts = cfg.start_options();
        assert_eq!(opts.tick_interval, Duration::from_millis(250));
        assert_eq!(opts.absence_threshold, Duration::from_secs(1));
        assert!(opts.use_canvas);
    }

    #[test]
    fn model_source_follows_model_path() {
        let cfg = Config {
            model_path: "https://example.com/models".to_string(),
            ..Config::default()
        };
        assert!(matches!(cfg.model_source(), ModelSource::Url(_)));
        assert!(matches!(Config::default().model_source(), ModelSource::Dir(_)));
    }
}
