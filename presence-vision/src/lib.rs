pub mod face;
pub mod model;
pub mod overlay;
pub mod pipeline;
pub mod resolver;
pub mod video;
pub mod yunet;

// Re-export commonly used types
pub use face::{Detection, FaceDetector, YuNetDetector};
pub use model::{ModelLoader, YuNetLoader};
pub use overlay::{OverlayRenderer, Renderer};
pub use pipeline::Pipeline;
pub use resolver::ModelSource;
pub use video::{Camera, DeviceCamera, FrameSource, StreamSource};
