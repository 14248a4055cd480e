//! Detector time-series cleaning core for the SCUBA-2 reduction suite.
//!
//! A raw [`cube::SampleCube`] is flagged, detrended, step-repaired,
//! sigma-clipped and Fourier filtered in place by a
//! [`processing::CleaningPipeline`], which hands back a
//! [`processing::RunReport`].

pub mod cube;
pub mod math;
pub mod prelude;
pub mod processing;
pub mod telemetry;

pub use cube::{CubeDims, QualityFlags, SampleCube};
pub use prelude::{CleanConfig, CleanError, CleanResult, CleaningStage, StageSummary};
pub use processing::{AbortSignal, CleaningPipeline, PipelineState, RunReport};
