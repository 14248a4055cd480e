use crate::cube::{DetectorMut, QualityFlags, SampleCube};
use crate::math::fft::FftHelper;
use crate::math::stats::StatsHelper;
use crate::prelude::{CleanConfig, CleanError, CleanResult, CleaningStage, StageSummary};
use crate::processing::abort::AbortSignal;
use crate::processing::pipeline::PipelineState;
use crate::telemetry::log::LogManager;

#[derive(Debug, Clone, PartialEq)]
struct FilterParams {
    edge_low: f64,
    edge_high: f64,
    notches: Vec<(f64, f64)>,
    sample_rate: f64,
    fill_gaps: bool,
}

impl FilterParams {
    fn passes(&self, freq: f64) -> bool {
        let above_low = self.edge_low <= 0.0 || freq >= self.edge_low;
        let below_high = self.edge_high <= 0.0 || freq <= self.edge_high;
        let notched = self
            .notches
            .iter()
            .any(|&(low, high)| freq >= low && freq <= high);
        above_low && below_high && !notched
    }

    /// Hard-edged weights for bins `0..=n_time / 2`.
    fn transfer(&self, n_time: usize) -> Vec<f64> {
        let df = self.sample_rate / n_time as f64;
        (0..n_time / 2 + 1)
            .map(|k| if self.passes(k as f64 * df) { 1.0 } else { 0.0 })
            .collect()
    }
}

/// Edge and notch filtering in the Fourier domain.
pub struct FrequencyFilter {
    params: Option<FilterParams>,
    enabled: bool,
    logger: LogManager,
}

impl FrequencyFilter {
    pub fn new() -> Self {
        Self {
            params: None,
            enabled: false,
            logger: LogManager::new("filter"),
        }
    }
}

impl Default for FrequencyFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Replaces excluded samples by linear interpolation between the nearest
/// valid neighbours, holding the end values constant. Returns false when the
/// series has no valid sample at all.
pub fn fill_gaps(samples: &mut [f64], flags: &[QualityFlags]) -> bool {
    let valid: Vec<usize> = flags
        .iter()
        .enumerate()
        .filter(|(_, f)| f.is_valid())
        .map(|(t, _)| t)
        .collect();
    let (Some(&first), Some(&last)) = (valid.first(), valid.last()) else {
        return false;
    };
    let head = samples[first];
    samples[..first].iter_mut().for_each(|v| *v = head);
    let tail = samples[last];
    samples[last + 1..].iter_mut().for_each(|v| *v = tail);
    for pair in valid.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b - a < 2 {
            continue;
        }
        let (va, vb) = (samples[a], samples[b]);
        let span = (b - a) as f64;
        for (step, value) in samples[a + 1..b].iter_mut().enumerate() {
            *value = va + (vb - va) * (step + 1) as f64 / span;
        }
    }
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOutcome {
    Skipped,
    Filtered,
    Rejected,
}

fn filter_detector(
    mut det: DetectorMut<'_>,
    fft: &FftHelper,
    transfer: &[f64],
    gaps: bool,
) -> FilterOutcome {
    if det.is_excluded() {
        return FilterOutcome::Skipped;
    }
    if gaps && !fill_gaps(det.samples, det.flags) {
        det.mark_bad();
        return FilterOutcome::Rejected;
    }
    fft.apply_transfer(det.samples, transfer);
    FilterOutcome::Filtered
}

impl CleaningStage for FrequencyFilter {
    fn name(&self) -> &'static str {
        "FrequencyFilter"
    }

    fn state(&self) -> PipelineState {
        PipelineState::FreqFilter
    }

    fn initialize(&mut self, config: &CleanConfig) -> CleanResult<()> {
        if config.filter_enabled() && !(config.sample_rate > 0.0) {
            return Err(CleanError::Config(format!(
                "sample_rate must be positive, got {}",
                config.sample_rate
            )));
        }
        self.enabled = config.filter_enabled();
        self.params = Some(FilterParams {
            edge_low: config.edge_low,
            edge_high: config.edge_high,
            notches: config.notch_bands().collect(),
            sample_rate: config.sample_rate,
            fill_gaps: config.fill_gaps,
        });
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn execute(&mut self, cube: &mut SampleCube, abort: &AbortSignal) -> CleanResult<StageSummary> {
        let params = self
            .params
            .as_ref()
            .ok_or_else(|| CleanError::Internal("stage not initialized".into()))?;

        let n_time = cube.n_time();
        let fft = FftHelper::new(n_time);
        let transfer = params.transfer(n_time);
        let kept = transfer.iter().filter(|&&w| w > 0.0).count();
        let gaps = params.fill_gaps;

        let outcomes =
            cube.par_map_detectors(abort, |det| filter_detector(det, &fft, &transfer, gaps))?;
        let count = |wanted: FilterOutcome| {
            outcomes
                .iter()
                .flatten()
                .filter(|&&outcome| outcome == wanted)
                .count()
        };
        let filtered = count(FilterOutcome::Filtered);
        let rejected = count(FilterOutcome::Rejected);

        let rms = StatsHelper::rms(&transfer);
        self.logger.record(&format!(
            "{} detectors filtered, {} of {} bins passed (transfer RMS {:.3})",
            filtered,
            kept,
            transfer.len(),
            rms
        ));
        if rejected > 0 {
            self.logger.degrade(&format!(
                "{} detectors had no valid sample to interpolate from and were marked bad",
                rejected
            ));
        }

        Ok(StageSummary {
            detectors_processed: filtered,
            detectors_flagged_bad: rejected,
            notes: vec![format!(
                "edges [{:.3}, {:.3}] Hz, {} notches",
                params.edge_low,
                params.edge_high,
                params.notches.len()
            )],
            ..Default::default()
        })
    }

    fn cleanup(&mut self) {
        self.params = None;
        self.enabled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::CubeDims;
    use std::f64::consts::PI;

    const RATE: f64 = 20.0;
    const N: usize = 2000;

    fn tone(freq: f64) -> Vec<f64> {
        (0..N)
            .map(|t| (2.0 * PI * freq * t as f64 / RATE).sin())
            .collect()
    }

    fn amplitude(series: &[f64], freq: f64) -> f64 {
        let (mut s, mut c) = (0.0f64, 0.0f64);
        for (t, v) in series.iter().enumerate() {
            let phase = 2.0 * PI * freq * t as f64 / RATE;
            s += v * phase.sin();
            c += v * phase.cos();
        }
        2.0 * (s * s + c * c).sqrt() / series.len() as f64
    }

    fn three_tone_cube(n_detectors: usize) -> SampleCube {
        let mix: Vec<f64> = tone(0.01)
            .iter()
            .zip(tone(0.5))
            .zip(tone(5.0))
            .map(|((a, b), c)| a + b + c)
            .collect();
        let samples = mix.repeat(n_detectors);
        SampleCube::with_clear_flags(CubeDims::new(N, 1, n_detectors), samples).unwrap()
    }

    fn run(cube: &mut SampleCube, config: &CleanConfig) -> StageSummary {
        let mut stage = FrequencyFilter::new();
        stage.initialize(config).unwrap();
        assert!(stage.is_enabled());
        let summary = stage.execute(cube, &AbortSignal::new()).unwrap();
        stage.cleanup();
        summary
    }

    #[test]
    fn band_pass_keeps_mid_tone_and_rejects_others() {
        let mut cube = three_tone_cube(1);
        let config = CleanConfig {
            edge_low: 0.1,
            edge_high: 1.0,
            sample_rate: RATE,
            ..Default::default()
        };
        run(&mut cube, &config);

        let series = cube.detector_samples(0).to_vec();
        assert!((amplitude(&series, 0.5) - 1.0).abs() < 0.01);
        assert!(amplitude(&series, 0.01) < 0.05);
        assert!(amplitude(&series, 5.0) < 0.05);
    }

    #[test]
    fn notch_removes_only_its_band() {
        let mut cube = three_tone_cube(1);
        let config = CleanConfig {
            notch_low: vec![4.9],
            notch_high: vec![5.1],
            sample_rate: RATE,
            ..Default::default()
        };
        run(&mut cube, &config);

        let series = cube.detector_samples(0).to_vec();
        assert!(amplitude(&series, 5.0) < 0.05);
        assert!((amplitude(&series, 0.5) - 1.0).abs() < 0.01);
        assert!((amplitude(&series, 0.01) - 1.0).abs() < 0.01);
    }

    #[test]
    fn bad_detectors_are_skipped() {
        let mut cube = three_tone_cube(2);
        for t in 0..N {
            cube.flag_sample(t, 1, QualityFlags::BAD_DETECTOR);
        }
        let before = cube.detector_samples(1).to_vec();
        let config = CleanConfig {
            edge_high: 1.0,
            sample_rate: RATE,
            ..Default::default()
        };
        let summary = run(&mut cube, &config);
        assert_eq!(summary.detectors_processed, 1);
        assert_eq!(cube.detector_samples(1).to_vec(), before);
        assert!(amplitude(&cube.detector_samples(0).to_vec(), 5.0) < 0.05);
    }

    #[test]
    fn detector_without_valid_samples_is_marked_bad() {
        let mut cube = three_tone_cube(1);
        for t in 0..N {
            cube.flag_sample(t, 0, QualityFlags::SPIKE | QualityFlags::BAD_SAMPLE);
        }
        let before = cube.detector_samples(0).to_vec();
        let config = CleanConfig {
            edge_low: 1.0,
            sample_rate: RATE,
            ..Default::default()
        };
        let summary = run(&mut cube, &config);
        assert_eq!(summary.detectors_processed, 0);
        assert_eq!(summary.detectors_flagged_bad, 1);
        assert!(cube.is_detector_excluded(0));
        assert_eq!(cube.detector_samples(0).to_vec(), before);
    }

    #[test]
    fn gaps_are_interpolated_before_filtering() {
        let mut samples = vec![0.0, 1.0, 99.0, 99.0, 4.0, 5.0, 99.0];
        let mut flags = vec![QualityFlags::empty(); 7];
        flags[2] = QualityFlags::SPIKE | QualityFlags::BAD_SAMPLE;
        flags[3] = QualityFlags::BAD_SAMPLE;
        flags[6] = QualityFlags::BAD_SAMPLE;
        assert!(fill_gaps(&mut samples, &flags));
        assert_eq!(samples, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 5.0]);
    }

    #[test]
    fn transfer_function_is_hard_edged() {
        let params = FilterParams {
            edge_low: 1.0,
            edge_high: 3.0,
            notches: vec![(2.0, 2.0)],
            sample_rate: 10.0,
            fill_gaps: false,
        };
        // df = 0.5 Hz over 20 samples
        let transfer = params.transfer(20);
        let expected = [0., 0., 1., 1., 0., 1., 1., 0., 0., 0., 0.];
        assert_eq!(transfer, expected.to_vec());
    }
}
