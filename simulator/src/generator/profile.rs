use crate::generator::template::{gaussian, sine_wave};
use anyhow::Context;
use rand::{rngs::StdRng, Rng, SeedableRng};
use sc2core::{CubeDims, QualityFlags, SampleCube};
use serde::{Deserialize, Serialize};

/// Configuration for synthesising a raw detector cube.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub n_time: usize,
    pub n_rows: usize,
    pub n_cols: usize,
    pub sample_rate: f64,
    pub noise: f64,
    /// Polynomial drift coefficients over normalised time `[0, 1)`.
    pub drift: Vec<f64>,
    /// Probability that a detector carries one level shift.
    pub step_rate: f64,
    pub step_size: f64,
    /// Expected spikes per detector.
    pub spikes_per_detector: f64,
    pub spike_size: f64,
    /// Interference lines as `(frequency Hz, amplitude)`.
    pub lines: Vec<(f64, f64)>,
    /// Fraction of detectors arriving with most samples pre-flagged.
    pub dead_fraction: f64,
    pub seed: u64,
    pub description: Option<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            n_time: 4000,
            n_rows: 8,
            n_cols: 8,
            sample_rate: 200.0,
            noise: 0.05,
            drift: vec![1.0, 0.4, -0.3],
            step_rate: 0.25,
            step_size: 3.0,
            spikes_per_detector: 2.0,
            spike_size: 30.0,
            lines: vec![(50.0, 0.2)],
            dead_fraction: 0.05,
            seed: 0,
            description: None,
        }
    }
}

impl GeneratorConfig {
    pub fn dims(&self) -> CubeDims {
        CubeDims::new(self.n_time.max(1), self.n_rows.max(1), self.n_cols.max(1))
    }
}

fn polynomial(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

/// Builds the detector-major sample and flag buffers.
fn build_detector_buffers(config: &GeneratorConfig) -> anyhow::Result<(Vec<f64>, Vec<QualityFlags>)> {
    let dims = config.dims();
    let sample_count = dims
        .n_time
        .checked_mul(dims.n_detectors())
        .context("overflow computing sample count for generator")?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut samples = Vec::with_capacity(sample_count);
    let mut flags = vec![QualityFlags::empty(); sample_count];
    let lines: Vec<Vec<f64>> = config
        .lines
        .iter()
        .map(|&(freq, amp)| sine_wave(dims.n_time, freq, config.sample_rate, amp))
        .collect();

    for det in 0..dims.n_detectors() {
        let offset = rng.gen_range(-1.0..1.0);
        let step_at = if rng.gen_bool(config.step_rate.clamp(0.0, 1.0)) {
            Some(rng.gen_range(dims.n_time / 4..(3 * dims.n_time / 4).max(dims.n_time / 4 + 1)))
        } else {
            None
        };
        let spike_prob = (config.spikes_per_detector / dims.n_time as f64).clamp(0.0, 1.0);

        for t in 0..dims.n_time {
            let x = t as f64 / dims.n_time as f64;
            let mut value = offset + polynomial(&config.drift, x) + config.noise * gaussian(&mut rng);
            if step_at.is_some_and(|at| t >= at) {
                value += config.step_size;
            }
            if rng.gen_bool(spike_prob) {
                value += config.spike_size;
            }
            value += lines.iter().map(|line| line[t]).sum::<f64>();
            samples.push(value);
        }

        if rng.gen_bool(config.dead_fraction.clamp(0.0, 1.0)) {
            let start = det * dims.n_time;
            for flag in &mut flags[start..start + dims.n_time * 9 / 10] {
                flag.insert(QualityFlags::BAD_SAMPLE);
            }
        }
    }

    Ok((samples, flags))
}

pub fn build_cube_from_config(config: &GeneratorConfig) -> anyhow::Result<SampleCube> {
    let (samples, flags) = build_detector_buffers(config)?;
    let cube = SampleCube::new(config.dims(), samples, flags)
        .context("assembling synthetic sample cube")?;
    log::info!(
        "synthesised {} detectors x {} samples (seed {})",
        cube.n_detectors(),
        cube.n_time(),
        config.seed
    );
    Ok(cube)
}
