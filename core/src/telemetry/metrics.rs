use std::sync::Mutex;

/// Counters accumulated across the stages of one or more pipeline runs.
pub struct MetricsRecorder {
    inner: Mutex<Metrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metrics {
    pub stages_run: usize,
    pub detectors_processed: usize,
    pub detectors_degraded: usize,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Metrics::default()),
        }
    }

    pub fn record_stage(&self, processed: usize, degraded: usize) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.stages_run += 1;
            metrics.detectors_processed += processed;
            metrics.detectors_degraded += degraded;
        }
    }

    pub fn snapshot(&self) -> Metrics {
        if let Ok(metrics) = self.inner.lock() {
            *metrics
        } else {
            Metrics::default()
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
