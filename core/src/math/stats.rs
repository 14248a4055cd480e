use crate::cube::QualityFlags;

/// Count, mean and sum of squared deviations of a sample set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments {
    pub count: usize,
    pub mean: f64,
    pub sum_sq_dev: f64,
}

impl Moments {
    /// Population standard deviation.
    pub fn std_dev(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        (self.sum_sq_dev / self.count as f64).sqrt()
    }
}

pub struct StatsHelper;

impl StatsHelper {
    pub fn rms(samples: &[f64]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = samples.iter().map(|&v| v * v).sum();
        (sum_sq / samples.len() as f64).sqrt()
    }

    /// Welford accumulation over an arbitrary sequence of values.
    pub fn moments<I>(values: I) -> Moments
    where
        I: IntoIterator<Item = f64>,
    {
        let mut count = 0usize;
        let mut mean = 0.0;
        let mut sum_sq_dev = 0.0;
        for value in values {
            count += 1;
            let delta = value - mean;
            mean += delta / count as f64;
            sum_sq_dev += delta * (value - mean);
        }
        Moments {
            count,
            mean,
            sum_sq_dev,
        }
    }

    /// Moments over the valid samples of a detector series.
    pub fn masked_moments(samples: &[f64], flags: &[QualityFlags]) -> Moments {
        Self::moments(
            samples
                .iter()
                .zip(flags)
                .filter(|(_, f)| f.is_valid())
                .map(|(&v, _)| v),
        )
    }

    /// White-noise sigma of a series from the RMS of its first differences,
    /// scaled by `1 / sqrt(2)`. Only pairs of adjacent valid samples count;
    /// a series with no such pair yields zero.
    pub fn difference_noise(samples: &[f64], flags: &[QualityFlags]) -> f64 {
        let (count, sum_sq) = samples
            .windows(2)
            .zip(flags.windows(2))
            .filter(|(_, f)| f[0].is_valid() && f[1].is_valid())
            .fold((0usize, 0.0), |(count, sum_sq), (pair, _)| {
                let delta = pair[1] - pair[0];
                (count + 1, sum_sq + delta * delta)
            });
        if count == 0 {
            return 0.0;
        }
        (sum_sq / (2.0 * count as f64)).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rms_zero_sequence_yields_zero() {
        assert_eq!(StatsHelper::rms(&[]), 0.0);
        assert_eq!(StatsHelper::rms(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn rms_handles_single_value() {
        assert_eq!(StatsHelper::rms(&[4.0]), 4.0);
    }

    #[test]
    fn masked_moments_ignore_excluded_samples() {
        let samples = [1.0, 2.0, 3.0, 100.0];
        let flags = [
            QualityFlags::empty(),
            QualityFlags::STEP,
            QualityFlags::empty(),
            QualityFlags::SPIKE,
        ];
        let m = StatsHelper::masked_moments(&samples, &flags);
        assert_eq!(m.count, 3);
        assert_relative_eq!(m.mean, 2.0);
        assert_relative_eq!(m.std_dev(), (2.0f64 / 3.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn difference_noise_skips_pairs_touching_invalid_samples() {
        let samples = [0.0, 2.0, 0.0, 50.0, 2.0];
        let mut flags = [QualityFlags::empty(); 5];
        flags[3] = QualityFlags::BAD_SAMPLE;
        // Pairs (0,1) and (1,2) only: each difference is 2.
        assert_relative_eq!(
            StatsHelper::difference_noise(&samples, &flags),
            2.0f64.sqrt(),
            epsilon = 1e-12
        );
        assert_eq!(StatsHelper::difference_noise(&[1.0], &flags[..1]), 0.0);
    }
}
