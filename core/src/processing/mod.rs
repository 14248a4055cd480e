pub mod abort;
pub mod detrend;
pub mod filter;
pub mod flagger;
pub mod pipeline;
pub mod report;
pub mod spikes;
pub mod steps;

pub use abort::AbortSignal;
pub use detrend::BaselineDetrender;
pub use filter::FrequencyFilter;
pub use flagger::QualityFlagger;
pub use pipeline::{CleaningPipeline, PipelineState};
pub use report::RunReport;
pub use spikes::SpikeFlagger;
pub use steps::StepRepairer;
