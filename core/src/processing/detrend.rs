use crate::cube::{DetectorMut, SampleCube};
use crate::math::matrix::MatrixHelper;
use crate::prelude::{CleanConfig, CleanError, CleanResult, CleaningStage, StageSummary};
use crate::processing::abort::AbortSignal;
use crate::processing::pipeline::PipelineState;
use crate::telemetry::log::LogManager;
use ndarray::{Array1, Array2, Axis};

/// Removes a per-detector polynomial baseline fitted to the valid samples.
pub struct BaselineDetrender {
    order: Option<usize>,
    logger: LogManager,
}

enum DetrendOutcome {
    Skipped,
    Fitted,
    Rejected(CleanError),
}

impl BaselineDetrender {
    pub fn new() -> Self {
        Self {
            order: None,
            logger: LogManager::new("detrend"),
        }
    }
}

impl Default for BaselineDetrender {
    fn default() -> Self {
        Self::new()
    }
}

fn detrend_detector(mut det: DetectorMut<'_>, basis: &Array2<f64>) -> DetrendOutcome {
    if det.is_excluded() {
        return DetrendOutcome::Skipped;
    }
    let terms = basis.ncols();
    let valid: Vec<usize> = det
        .flags
        .iter()
        .enumerate()
        .filter(|(_, f)| f.is_valid())
        .map(|(t, _)| t)
        .collect();
    if valid.len() <= terms {
        det.mark_bad();
        return DetrendOutcome::Rejected(CleanError::DataInsufficient {
            valid: valid.len(),
            required: terms,
        });
    }

    let design = basis.select(Axis(0), &valid);
    let rhs: Array1<f64> = valid.iter().map(|&t| det.samples[t]).collect();
    match MatrixHelper::least_squares(design.view(), rhs.view()) {
        Ok(coeffs) => {
            let baseline = basis.dot(&coeffs);
            for (sample, fit) in det.samples.iter_mut().zip(baseline.iter()) {
                *sample -= fit;
            }
            DetrendOutcome::Fitted
        }
        Err(err) => {
            det.mark_bad();
            DetrendOutcome::Rejected(err)
        }
    }
}

impl CleaningStage for BaselineDetrender {
    fn name(&self) -> &'static str {
        "BaselineDetrender"
    }

    fn state(&self) -> PipelineState {
        PipelineState::Detrending
    }

    fn initialize(&mut self, config: &CleanConfig) -> CleanResult<()> {
        self.order = Some(config.order);
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.order.is_some()
    }

    fn execute(&mut self, cube: &mut SampleCube, abort: &AbortSignal) -> CleanResult<StageSummary> {
        let order = self
            .order
            .ok_or_else(|| CleanError::Internal("stage not initialized".into()))?;

        let abscissa = MatrixHelper::scaled_abscissa(cube.n_time());
        let basis = MatrixHelper::legendre_design(&abscissa, order);
        let outcomes = cube.par_map_detectors(abort, |det| {
            let index = det.index;
            let outcome = detrend_detector(det, &basis);
            if let DetrendOutcome::Rejected(err) = &outcome {
                log::debug!("detector {} rejected: {}", index, err);
            }
            outcome
        })?;

        let fitted = outcomes
            .iter()
            .flatten()
            .filter(|o| matches!(o, DetrendOutcome::Fitted))
            .count();
        let rejected = outcomes
            .iter()
            .flatten()
            .filter(|o| matches!(o, DetrendOutcome::Rejected(_)))
            .count();
        let skipped = outcomes
            .iter()
            .flatten()
            .filter(|o| matches!(o, DetrendOutcome::Skipped))
            .count();

        self.logger.record(&format!(
            "order {} baseline removed from {} detectors ({} already bad)",
            order, fitted, skipped
        ));
        if rejected > 0 {
            self.logger.degrade(&format!(
                "{} detectors could not be fitted and were marked bad",
                rejected
            ));
        }

        Ok(StageSummary {
            detectors_processed: fitted,
            detectors_flagged_bad: rejected,
            notes: vec![format!("order {}", order)],
            ..Default::default()
        })
    }

    fn cleanup(&mut self) {
        self.order = None;
    }
}
