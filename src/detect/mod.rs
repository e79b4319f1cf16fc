mod backend;
mod backends;
mod registry;
mod result;

pub use backend::DetectionSource;
pub use backends::{ReplaySource, StubSource};
pub use registry::{SourceRegistry, SourceRun};
pub use result::{BoundingBox, DetectionRecord, PpeClass, RawDetection, SourceId, SourceReport};
