use crate::cube::{DetectorMut, QualityFlags, SampleCube};
use crate::math::stats::StatsHelper;
use crate::prelude::{CleanConfig, CleanError, CleanResult, CleaningStage, StageSummary};
use crate::processing::abort::AbortSignal;
use crate::processing::pipeline::PipelineState;
use crate::telemetry::log::LogManager;

#[derive(Debug, Clone, Copy)]
struct SpikeParams {
    thresh: f64,
    passes: usize,
    converge: bool,
}

/// Iterative sigma-clipping of outlying samples.
pub struct SpikeFlagger {
    params: Option<SpikeParams>,
    logger: LogManager,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClipOutcome {
    passes: usize,
    flagged: usize,
    converged: bool,
}

impl SpikeFlagger {
    pub fn new() -> Self {
        Self {
            params: None,
            logger: LogManager::new("spikes"),
        }
    }
}

impl Default for SpikeFlagger {
    fn default() -> Self {
        Self::new()
    }
}

fn clip_detector(det: DetectorMut<'_>, params: SpikeParams) -> Option<ClipOutcome> {
    if det.is_excluded() {
        return None;
    }
    let mut outcome = ClipOutcome {
        passes: 0,
        flagged: 0,
        converged: true,
    };
    while outcome.passes < params.passes {
        let moments = StatsHelper::masked_moments(det.samples, det.flags);
        if moments.count < 2 {
            outcome.converged = true;
            break;
        }
        outcome.passes += 1;
        let limit = params.thresh * moments.std_dev();
        let mut newly = 0;
        for (value, flag) in det.samples.iter().zip(det.flags.iter_mut()) {
            let outlying = params.thresh == 0.0 || (value - moments.mean).abs() > limit;
            if flag.is_valid() && outlying {
                flag.insert(QualityFlags::SPIKE | QualityFlags::BAD_SAMPLE);
                newly += 1;
            }
        }
        outcome.flagged += newly;
        outcome.converged = newly == 0;
        if newly == 0 {
            break;
        }
    }
    if !params.converge {
        outcome.converged = true;
    }
    Some(outcome)
}

impl CleaningStage for SpikeFlagger {
    fn name(&self) -> &'static str {
        "SpikeFlagger"
    }

    fn state(&self) -> PipelineState {
        PipelineState::SpikeFlag
    }

    fn initialize(&mut self, config: &CleanConfig) -> CleanResult<()> {
        self.params = config.spike_thresh.map(|thresh| {
            let converge = config.spike_iter == 0;
            let passes = if converge {
                config.max_iter
            } else {
                config.spike_iter.min(config.max_iter)
            };
            SpikeParams {
                thresh,
                passes,
                converge,
            }
        });
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.params.is_some()
    }

    fn execute(&mut self, cube: &mut SampleCube, abort: &AbortSignal) -> CleanResult<StageSummary> {
        let params = self
            .params
            .ok_or_else(|| CleanError::Internal("stage not initialized".into()))?;

        let outcomes = cube.par_map_detectors(abort, |det| clip_detector(det, params))?;

        let clipped: Vec<ClipOutcome> = outcomes.into_iter().flatten().flatten().collect();
        let iterations = clipped.iter().map(|o| o.passes).max().unwrap_or(0);
        let flagged: usize = clipped.iter().map(|o| o.flagged).sum();
        let unconverged = clipped.iter().filter(|o| !o.converged).count();

        self.logger.record(&format!(
            "{} spikes flagged in at most {} passes over {} detectors",
            flagged,
            iterations,
            clipped.len()
        ));
        if unconverged > 0 {
            self.logger.degrade(&format!(
                "{} detectors still flagging after {} passes",
                unconverged, params.passes
            ));
        }

        Ok(StageSummary {
            detectors_processed: clipped.len(),
            spike_iterations: Some(iterations),
            spikes_flagged: Some(flagged),
            unconverged_detectors: Some(unconverged),
            notes: vec![format!("spike_thresh {:.2}", params.thresh)],
            ..Default::default()
        })
    }

    fn cleanup(&mut self) {
        self.params = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::CubeDims;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::f64::consts::PI;

    fn gaussian_series(n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
                let u2: f64 = rng.gen();
                (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
            })
            .collect()
    }

    fn run(cube: &mut SampleCube, config: &CleanConfig) -> StageSummary {
        let mut stage = SpikeFlagger::new();
        stage.initialize(config).unwrap();
        let summary = stage.execute(cube, &AbortSignal::new()).unwrap();
        stage.cleanup();
        summary
    }

    fn spike_config(thresh: f64, spike_iter: usize, max_iter: usize) -> CleanConfig {
        CleanConfig {
            spike_thresh: Some(thresh),
            spike_iter,
            max_iter,
            ..Default::default()
        }
    }

    #[test]
    fn huge_threshold_flags_nothing() {
        let mut cube =
            SampleCube::with_clear_flags(CubeDims::new(500, 1, 1), gaussian_series(500, 1))
                .unwrap();
        let summary = run(&mut cube, &spike_config(1e9, 0, 10));
        assert_eq!(summary.spikes_flagged, Some(0));
        assert_eq!(summary.spike_iterations, Some(1));
    }

    #[test]
    fn zero_threshold_flags_every_valid_sample_in_one_pass() {
        let mut cube =
            SampleCube::with_clear_flags(CubeDims::new(200, 1, 1), gaussian_series(200, 2))
                .unwrap();
        for t in 0..10 {
            cube.flag_sample(t, 0, QualityFlags::BAD_SAMPLE);
        }
        let summary = run(&mut cube, &spike_config(0.0, 1, 10));
        assert_eq!(summary.spikes_flagged, Some(190));
        assert_eq!(summary.spike_iterations, Some(1));
        assert!(cube.detector_flags(0).iter().all(|f| !f.is_valid()));
    }

    #[test]
    fn zero_threshold_flags_samples_at_the_mean_and_flat_series() {
        let samples = vec![1.0, 2.0, 3.0, 4.0, 4.0, 4.0];
        let mut cube = SampleCube::with_clear_flags(CubeDims::new(3, 1, 2), samples).unwrap();
        let summary = run(&mut cube, &spike_config(0.0, 0, 10));
        assert_eq!(summary.spikes_flagged, Some(6));
        assert_eq!(summary.spike_iterations, Some(1));
        assert_eq!(summary.unconverged_detectors, Some(0));
        assert!(cube.flags().iter().all(|f| f.contains(QualityFlags::SPIKE)));
    }

    #[test]
    fn twenty_sigma_outlier_is_flagged_and_clipping_converges() {
        let mut samples = gaussian_series(1000, 3);
        samples[417] = 20.0;
        let mut cube = SampleCube::with_clear_flags(CubeDims::new(1000, 1, 1), samples).unwrap();

        let summary = run(&mut cube, &spike_config(5.0, 0, 10));
        assert!(cube.flags_at(417, 0).contains(QualityFlags::SPIKE));
        assert!(cube.flags_at(417, 0).contains(QualityFlags::BAD_SAMPLE));
        assert_eq!(summary.spikes_flagged, Some(1));
        // Pass one catches the outlier, pass two flags nothing.
        assert_eq!(summary.spike_iterations, Some(2));
        assert_eq!(summary.unconverged_detectors, Some(0));
    }

    #[test]
    fn pass_cap_reports_non_convergence() {
        // Geometric ramp: every pass clips the largest remaining sample.
        let samples: Vec<f64> = (0..40).map(|t| 2f64.powi(t)).collect();
        let mut cube = SampleCube::with_clear_flags(CubeDims::new(40, 1, 1), samples).unwrap();
        let summary = run(&mut cube, &spike_config(3.0, 0, 2));
        assert_eq!(summary.spike_iterations, Some(2));
        assert_eq!(summary.unconverged_detectors, Some(1));
    }

    #[test]
    fn exact_pass_count_is_capped_by_max_iter() {
        let samples: Vec<f64> = (0..40).map(|t| 2f64.powi(t)).collect();
        let mut cube = SampleCube::with_clear_flags(CubeDims::new(40, 1, 1), samples).unwrap();
        let summary = run(&mut cube, &spike_config(3.0, 8, 3));
        assert_eq!(summary.spike_iterations, Some(3));
        assert_eq!(summary.unconverged_detectors, Some(0));
    }
}
