use rand::Rng;
use std::f64::consts::PI;

/// Sinusoid of `freq` Hz sampled at `rate` Hz.
pub fn sine_wave(length: usize, freq: f64, rate: f64, amplitude: f64) -> Vec<f64> {
    (0..length)
        .map(|i| amplitude * (2.0 * PI * freq * i as f64 / rate).sin())
        .collect()
}

/// Standard normal deviate by the Box-Muller transform.
pub fn gaussian<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}
