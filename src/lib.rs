pub mod config;
pub mod error;
pub mod observer;
pub mod session;
pub mod tracker;

pub use error::PresenceError;
pub use observer::{LogObserver, PresenceObserver};
pub use session::{PresenceDetector, Session, StartOptions};
pub use tracker::{PresenceState, PresenceTracker};

// Re-export vision types for convenience
pub use presence_vision::{
    Detection, DeviceCamera, FaceDetector, FrameSource, ModelLoader, ModelSource, OverlayRenderer,
    Renderer, StreamSource, YuNetLoader,
};
