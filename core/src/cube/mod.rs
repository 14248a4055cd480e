pub mod quality;
pub mod sample_cube;

pub use quality::QualityFlags;
pub use sample_cube::{CubeDims, DetectorMut, SampleCube};
