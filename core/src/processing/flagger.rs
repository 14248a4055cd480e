use crate::cube::{DetectorMut, SampleCube};
use crate::prelude::{CleanConfig, CleanError, CleanResult, CleaningStage, StageSummary};
use crate::processing::abort::AbortSignal;
use crate::processing::pipeline::PipelineState;
use crate::telemetry::log::LogManager;

/// Marks whole detectors bad once too many of their samples are excluded.
pub struct QualityFlagger {
    bad_frac: Option<f64>,
    logger: LogManager,
}

impl QualityFlagger {
    pub fn new() -> Self {
        Self {
            bad_frac: None,
            logger: LogManager::new("flagger"),
        }
    }
}

impl Default for QualityFlagger {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns true when the detector was newly marked bad.
fn flag_detector(mut det: DetectorMut<'_>, bad_frac: f64) -> bool {
    if det.is_excluded() {
        return false;
    }
    let bad = det.flags.len() - det.valid_count();
    let fraction = bad as f64 / det.flags.len() as f64;
    if fraction > bad_frac {
        log::debug!(
            "detector {} bad fraction {:.3} exceeds {:.3}",
            det.index,
            fraction,
            bad_frac
        );
        det.mark_bad();
        true
    } else {
        false
    }
}

impl CleaningStage for QualityFlagger {
    fn name(&self) -> &'static str {
        "QualityFlagger"
    }

    fn state(&self) -> PipelineState {
        PipelineState::Flagging
    }

    fn initialize(&mut self, config: &CleanConfig) -> CleanResult<()> {
        self.bad_frac = Some(config.bad_frac);
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.bad_frac.is_some()
    }

    fn execute(&mut self, cube: &mut SampleCube, abort: &AbortSignal) -> CleanResult<StageSummary> {
        let bad_frac = self
            .bad_frac
            .ok_or_else(|| CleanError::Internal("stage not initialized".into()))?;

        let outcomes = cube.par_map_detectors(abort, |det| flag_detector(det, bad_frac))?;
        let processed = outcomes.iter().flatten().count();
        let flagged = outcomes.iter().flatten().filter(|&&newly| newly).count();

        self.logger.record(&format!(
            "{} of {} detectors exceed bad fraction {:.3}",
            flagged, processed, bad_frac
        ));

        Ok(StageSummary {
            detectors_processed: processed,
            detectors_flagged_bad: flagged,
            notes: vec![format!("bad_frac {:.3}", bad_frac)],
            ..Default::default()
        })
    }

    fn cleanup(&mut self) {
        self.bad_frac = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::{CubeDims, QualityFlags};

    fn cube_with_preflagged(bad_per_detector: &[usize], n_time: usize) -> SampleCube {
        let dims = CubeDims::new(n_time, 1, bad_per_detector.len());
        let mut cube = SampleCube::with_clear_flags(dims, vec![0.0; dims.len()]).unwrap();
        for (det, &bad) in bad_per_detector.iter().enumerate() {
            for t in 0..bad {
                cube.flag_sample(t, det, QualityFlags::BAD_SAMPLE);
            }
        }
        cube
    }

    #[test]
    fn flagger_marks_only_detectors_over_fraction() {
        let mut cube = cube_with_preflagged(&[60, 40], 100);
        let mut stage = QualityFlagger::new();
        stage
            .initialize(&CleanConfig {
                bad_frac: 0.5,
                ..Default::default()
            })
            .unwrap();

        let summary = stage.execute(&mut cube, &AbortSignal::new()).unwrap();
        assert_eq!(summary.detectors_flagged_bad, 1);
        assert!(cube.is_detector_excluded(0));
        assert!(!cube.is_detector_excluded(1));
        assert!(cube
            .detector_flags(0)
            .iter()
            .all(|f| f.contains(QualityFlags::BAD_DETECTOR)));
        stage.cleanup();
    }

    #[test]
    fn flagger_does_not_recount_bad_detectors() {
        let mut cube = cube_with_preflagged(&[8], 10);
        let mut stage = QualityFlagger::new();
        stage
            .initialize(&CleanConfig {
                bad_frac: 0.2,
                ..Default::default()
            })
            .unwrap();
        let abort = AbortSignal::new();
        assert_eq!(stage.execute(&mut cube, &abort).unwrap().detectors_flagged_bad, 1);
        assert_eq!(stage.execute(&mut cube, &abort).unwrap().detectors_flagged_bad, 0);
    }

    #[test]
    fn flagger_requires_initialization() {
        let mut cube = cube_with_preflagged(&[0], 4);
        let mut stage = QualityFlagger::new();
        assert!(matches!(
            stage.execute(&mut cube, &AbortSignal::new()),
            Err(CleanError::Internal(_))
        ));
    }
}
