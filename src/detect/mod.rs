mod backend;
pub mod backends;
mod labels;
mod result;

pub use backend::Detector;
pub use backends::ScriptedDetector;
#[cfg(feature = "backend-tract")]
pub use backends::TractDetector;
pub use labels::{LabelMap, UNKNOWN_LABEL};
pub use result::{BoundingBox, Detection};
