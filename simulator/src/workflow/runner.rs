use crate::generator::profile::build_cube_from_config;
use crate::workflow::config::WorkflowConfig;
use anyhow::Context;
use sc2core::math::StatsHelper;
use sc2core::processing::{AbortSignal, CleaningPipeline, RunReport};
use sc2core::SampleCube;

pub struct WorkflowResult {
    pub report: RunReport,
    pub cube: SampleCube,
    pub excluded_detectors: usize,
    pub residual_rms: f64,
}

#[derive(Clone)]
pub struct Runner {
    config: WorkflowConfig,
    abort: AbortSignal,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self {
            config,
            abort: AbortSignal::new(),
        }
    }

    pub fn with_abort_signal(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    pub fn execute(&self) -> anyhow::Result<WorkflowResult> {
        let cube = build_cube_from_config(&self.config.generator)
            .context("synthesising raw cube")?;
        self.clean(cube)
    }

    pub fn clean(&self, mut cube: SampleCube) -> anyhow::Result<WorkflowResult> {
        let mut pipeline = CleaningPipeline::new(self.config.to_clean_config())
            .context("validating cleaning configuration")?
            .with_abort_signal(self.abort.clone());
        let report = pipeline
            .run(&mut cube)
            .context("running cleaning pipeline")?;

        let residuals: Vec<f64> = (0..cube.n_detectors())
            .filter(|&d| !cube.is_detector_excluded(d))
            .flat_map(|d| {
                cube.detector_samples(d)
                    .iter()
                    .zip(cube.detector_flags(d).iter())
                    .filter(|(_, f)| f.is_valid())
                    .map(|(&v, _)| v)
                    .collect::<Vec<_>>()
            })
            .collect();
        let residual_rms = StatsHelper::rms(&residuals);
        let excluded_detectors = cube.excluded_detectors();

        Ok(WorkflowResult {
            report,
            cube,
            excluded_detectors,
            residual_rms,
        })
    }
}
