use crate::cube::SampleCube;
use crate::prelude::{CleanConfig, CleanError, CleanResult, CleaningStage};
use crate::processing::abort::AbortSignal;
use crate::processing::detrend::BaselineDetrender;
use crate::processing::filter::FrequencyFilter;
use crate::processing::flagger::QualityFlagger;
use crate::processing::report::RunReport;
use crate::processing::spikes::SpikeFlagger;
use crate::processing::steps::StepRepairer;
use crate::telemetry::log::LogManager;
use crate::telemetry::metrics::MetricsRecorder;
use serde::{Deserialize, Serialize};

/// Orchestrator states, in the order a run visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    Idle,
    Flagging,
    Detrending,
    StepRepair,
    SpikeFlag,
    FreqFilter,
    Done,
}

/// Sequences the cleaning stages over one cube.
pub struct CleaningPipeline {
    config: CleanConfig,
    abort: AbortSignal,
    state: PipelineState,
    metrics: MetricsRecorder,
    logger: LogManager,
}

impl CleaningPipeline {
    /// Validates `config`; a malformed configuration never reaches a stage.
    pub fn new(config: CleanConfig) -> CleanResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            abort: AbortSignal::new(),
            state: PipelineState::Idle,
            metrics: MetricsRecorder::new(),
            logger: LogManager::new("pipeline"),
        })
    }

    pub fn with_abort_signal(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    pub fn config(&self) -> &CleanConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    fn stages() -> Vec<Box<dyn CleaningStage>> {
        vec![
            Box::new(QualityFlagger::new()),
            Box::new(BaselineDetrender::new()),
            Box::new(StepRepairer::new()),
            Box::new(SpikeFlagger::new()),
            Box::new(FrequencyFilter::new()),
        ]
    }

    /// Runs every enabled stage over `cube` in place.
    pub fn run(&mut self, cube: &mut SampleCube) -> CleanResult<RunReport> {
        self.run_stages(cube, Self::stages())
    }

    fn run_stages(
        &mut self,
        cube: &mut SampleCube,
        stages: Vec<Box<dyn CleaningStage>>,
    ) -> CleanResult<RunReport> {
        self.state = PipelineState::Idle;
        let mut report = RunReport::new();
        self.logger.record(&format!(
            "cleaning {} detectors x {} samples",
            cube.n_detectors(),
            cube.n_time()
        ));

        for mut stage in stages {
            stage.initialize(&self.config)?;
            if !stage.is_enabled() {
                log::debug!("{} disabled by configuration", stage.name());
                continue;
            }
            if self.abort.is_raised() {
                return Err(CleanError::Aborted {
                    stage: stage.name(),
                });
            }

            self.state = stage.state();
            report.enter(self.state);
            let summary = stage.execute(cube, &self.abort);
            stage.cleanup();
            let summary = summary?;
            if self.abort.is_raised() {
                return Err(CleanError::Interrupted {
                    stage: stage.name(),
                });
            }

            self.metrics
                .record_stage(summary.detectors_processed, summary.detectors_flagged_bad);
            report.absorb(self.state, &summary);
        }

        self.state = PipelineState::Done;
        report.enter(self.state);
        self.logger.record(&format!(
            "done: {} detectors bad, {} steps, {} spikes",
            report.detectors_flagged_bad, report.steps_repaired, report.spikes_flagged
        ));
        Ok(report)
    }
}
