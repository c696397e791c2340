mod backend;
mod backends;
mod registry;
mod result;

pub use backend::{InferenceEngine, ModelLoader, TrackParams};
pub use backends::{SyntheticEngine, SyntheticLoader};
pub use registry::LoaderRegistry;
pub use result::{BoundingBox, TrackedDetection};
