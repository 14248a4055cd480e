use num_complex::Complex64;
use rustfft::{num_traits::Zero, Fft, FftPlanner};
use std::sync::Arc;

/// Forward/inverse plan pair for real series of one fixed length.
///
/// The transform length is the series length itself: no padding or
/// truncation is applied, so bin `k` sits at exactly `k * rate / len`.
pub struct FftHelper {
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
    len: usize,
}

impl FftHelper {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        Self {
            forward,
            inverse,
            len: size,
        }
    }

    /// Number of non-negative frequency bins, `len / 2 + 1`.
    pub fn half_spectrum_len(&self) -> usize {
        self.len / 2 + 1
    }

    pub fn forward(&self, input: &[f64]) -> Vec<Complex64> {
        let mut buffer: Vec<Complex64> = input
            .iter()
            .map(|&value| Complex64::new(value, 0.0))
            .collect();
        buffer.resize(self.len, Complex64::zero());
        self.forward.process(&mut buffer);
        buffer
    }

    /// Normalised inverse transform keeping the real part.
    pub fn inverse_real(&self, mut spectrum: Vec<Complex64>) -> Vec<f64> {
        spectrum.resize(self.len, Complex64::zero());
        self.inverse.process(&mut spectrum);
        let scale = 1.0 / self.len as f64;
        spectrum.iter().map(|c| c.re * scale).collect()
    }

    /// Filters `samples` in place by a real transfer function sampled on the
    /// non-negative bins. Bins `k` and `len - k` get the same weight.
    pub fn apply_transfer(&self, samples: &mut [f64], transfer: &[f64]) {
        let mut spectrum = self.forward(samples);
        for (k, bin) in spectrum.iter_mut().enumerate() {
            let mirrored = k.min(self.len - k);
            *bin *= transfer.get(mirrored).copied().unwrap_or(0.0);
        }
        let filtered = self.inverse_real(spectrum);
        for (sample, value) in samples.iter_mut().zip(filtered) {
            *sample = value;
        }
    }
}
