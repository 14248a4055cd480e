use crate::cube::{DetectorMut, QualityFlags, SampleCube};
use crate::math::stats::StatsHelper;
use crate::prelude::{CleanConfig, CleanError, CleanResult, CleaningStage, StageSummary};
use crate::processing::abort::AbortSignal;
use crate::processing::pipeline::PipelineState;
use crate::telemetry::log::LogManager;

#[derive(Debug, Clone, Copy)]
struct StepParams {
    thresh: f64,
    half: usize,
    max_steps: usize,
}

/// Detects discrete level shifts with a sliding two-sided window and
/// removes them by cumulative offset correction.
pub struct StepRepairer {
    params: Option<StepParams>,
    enabled: bool,
    logger: LogManager,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum StepOutcome {
    Skipped,
    Repaired(usize),
    Rejected(usize),
}

/// Mean difference across index `at` and the noise of that difference.
#[derive(Debug, Clone, Copy)]
struct Contrast {
    diff: f64,
    sigma: f64,
}

impl StepRepairer {
    pub fn new() -> Self {
        Self {
            params: None,
            enabled: false,
            logger: LogManager::new("steps"),
        }
    }
}

impl Default for StepRepairer {
    fn default() -> Self {
        Self::new()
    }
}

/// Compares `[at - half, at)` with `[at, at + half)` over valid samples.
/// `noise` is the per-sample sigma of the whole detector.
fn contrast(
    series: &[f64],
    flags: &[QualityFlags],
    at: usize,
    half: usize,
    noise: f64,
) -> Option<Contrast> {
    let window = |range: std::ops::Range<usize>| {
        StatsHelper::moments(
            series[range.clone()]
                .iter()
                .zip(&flags[range])
                .filter(|(_, f)| f.is_valid())
                .map(|(&v, _)| v),
        )
    };
    let lead = window(at - half..at);
    let trail = window(at..at + half);
    if lead.count < 2 || trail.count < 2 {
        return None;
    }
    let sigma = noise * (1.0 / lead.count as f64 + 1.0 / trail.count as f64).sqrt();
    Some(Contrast {
        diff: trail.mean - lead.mean,
        sigma,
    })
}

/// Returns the step indices found; `series` is corrected in place.
fn find_and_remove_steps(series: &mut [f64], flags: &[QualityFlags], params: StepParams) -> Vec<usize> {
    let half = params.half;
    let n = series.len();
    let mut steps = Vec::new();
    if n < 2 * half {
        return steps;
    }
    let noise = StatsHelper::difference_noise(series, flags);
    let last = n - half;
    let mut at = half;
    while at <= last {
        let trigger = match contrast(series, flags, at, half, noise) {
            Some(c) if c.diff.abs() > params.thresh * c.sigma => c,
            _ => {
                at += 1;
                continue;
            }
        };
        let search_end = (at + half).min(last + 1);
        let (peak, offset) = (at..search_end)
            .filter_map(|j| {
                contrast(series, flags, j, half, noise).map(|c| (j, c.diff))
            })
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .unwrap_or((at, trigger.diff));
        for value in series[peak..].iter_mut() {
            *value -= offset;
        }
        steps.push(peak);
        at = peak + 1;
    }
    steps
}

fn repair_detector(mut det: DetectorMut<'_>, params: StepParams) -> StepOutcome {
    if det.is_excluded() {
        return StepOutcome::Skipped;
    }
    let mut corrected = det.samples.to_vec();
    let steps = find_and_remove_steps(&mut corrected, det.flags, params);
    if params.max_steps > 0 && steps.len() > params.max_steps {
        det.mark_bad();
        return StepOutcome::Rejected(steps.len());
    }
    det.samples.copy_from_slice(&corrected);
    for &index in &steps {
        det.flags[index].insert(QualityFlags::STEP);
    }
    StepOutcome::Repaired(steps.len())
}

impl CleaningStage for StepRepairer {
    fn name(&self) -> &'static str {
        "StepRepairer"
    }

    fn state(&self) -> PipelineState {
        PipelineState::StepRepair
    }

    fn initialize(&mut self, config: &CleanConfig) -> CleanResult<()> {
        self.enabled = config.steps_enabled();
        self.params = Some(StepParams {
            thresh: config.dc_thresh,
            half: (config.dc_box / 2).max(1),
            max_steps: config.dc_max_steps,
        });
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn execute(&mut self, cube: &mut SampleCube, abort: &AbortSignal) -> CleanResult<StageSummary> {
        let params = self
            .params
            .ok_or_else(|| CleanError::Internal("stage not initialized".into()))?;

        let outcomes = cube.par_map_detectors(abort, |det| repair_detector(det, params))?;

        let mut processed = 0;
        let mut repaired = 0;
        let mut rejected = 0;
        for outcome in outcomes.iter().flatten() {
            match *outcome {
                StepOutcome::Skipped => {}
                StepOutcome::Repaired(count) => {
                    processed += 1;
                    repaired += count;
                }
                StepOutcome::Rejected(count) => {
                    rejected += 1;
                    log::debug!("detector rejected after {} steps", count);
                }
            }
        }

        self.logger.record(&format!(
            "{} steps repaired across {} detectors",
            repaired, processed
        ));
        if rejected > 0 {
            self.logger.degrade(&format!(
                "{} detectors exceeded {} steps and were marked bad",
                rejected, params.max_steps
            ));
        }

        Ok(StageSummary {
            detectors_processed: processed,
            detectors_flagged_bad: rejected,
            steps_repaired: Some(repaired),
            notes: vec![format!(
                "dc_thresh {:.2} dc_box {}",
                params.thresh,
                params.half * 2
            )],
            ..Default::default()
        })
    }

    fn cleanup(&mut self) {
        self.params = None;
        self.enabled = false;
    }
}
