use thiserror::Error;

#[derive(Error, Debug)]
pub enum PresenceError {
    #[error("failed to load face detection models: {0:#}")]
    ModelLoad(anyhow::Error),
    #[error("models not loaded, call load_models() first")]
    NotReady,
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("failed to acquire camera stream: {0:#}")]
    MediaAcquisition(anyhow::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T, E = PresenceError> = std::result::Result<T, E>;
