pub mod synthetic;

pub use synthetic::{SyntheticEngine, SyntheticLoader};
