use crate::cube::SampleCube;
use crate::processing::abort::AbortSignal;
use crate::processing::pipeline::PipelineState;
use serde::{Deserialize, Serialize};

/// Run parameters shared by every cleaning stage.
///
/// A zero threshold or window leaves the corresponding optional stage
/// disabled. `spike_thresh` is optional so that a threshold of exactly zero
/// (flag everything) stays expressible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanConfig {
    pub bad_frac: f64,
    pub order: usize,
    pub dc_thresh: f64,
    pub dc_box: usize,
    pub dc_max_steps: usize,
    pub spike_thresh: Option<f64>,
    pub spike_iter: usize,
    pub max_iter: usize,
    pub edge_low: f64,
    pub edge_high: f64,
    pub notch_low: Vec<f64>,
    pub notch_high: Vec<f64>,
    pub sample_rate: f64,
    pub fill_gaps: bool,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            bad_frac: 1.0,
            order: 1,
            dc_thresh: 0.0,
            dc_box: 0,
            dc_max_steps: 0,
            spike_thresh: None,
            spike_iter: 0,
            max_iter: 5,
            edge_low: 0.0,
            edge_high: 0.0,
            notch_low: Vec::new(),
            notch_high: Vec::new(),
            sample_rate: 200.0,
            fill_gaps: true,
        }
    }
}

impl CleanConfig {
    pub fn steps_enabled(&self) -> bool {
        self.dc_thresh > 0.0 && self.dc_box > 0
    }

    pub fn spikes_enabled(&self) -> bool {
        self.spike_thresh.is_some()
    }

    pub fn filter_enabled(&self) -> bool {
        self.edge_low > 0.0 || self.edge_high > 0.0 || !self.notch_low.is_empty()
    }

    /// Notch bands as `(low, high)` pairs in Hz.
    pub fn notch_bands(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.notch_low
            .iter()
            .copied()
            .zip(self.notch_high.iter().copied())
    }

    /// Rejects malformed configurations before any stage touches the cube.
    pub fn validate(&self) -> CleanResult<()> {
        if !(0.0..=1.0).contains(&self.bad_frac) {
            return Err(CleanError::Config(format!(
                "bad_frac must lie in [0, 1], got {}",
                self.bad_frac
            )));
        }
        if !(self.dc_thresh >= 0.0) {
            return Err(CleanError::Config(format!(
                "dc_thresh must be non-negative, got {}",
                self.dc_thresh
            )));
        }
        if self.steps_enabled() && self.dc_box < 2 {
            return Err(CleanError::Config(format!(
                "dc_box must span at least 2 samples, got {}",
                self.dc_box
            )));
        }
        if let Some(thresh) = self.spike_thresh {
            if !(thresh >= 0.0) {
                return Err(CleanError::Config(format!(
                    "spike_thresh must be non-negative, got {}",
                    thresh
                )));
            }
        }
        if self.max_iter == 0 {
            return Err(CleanError::Config("max_iter must be at least 1".into()));
        }
        if !(self.edge_low >= 0.0) || !(self.edge_high >= 0.0) {
            return Err(CleanError::Config(format!(
                "filter edges must be non-negative, got low {} high {}",
                self.edge_low, self.edge_high
            )));
        }
        if self.edge_low > 0.0 && self.edge_high > 0.0 && self.edge_low > self.edge_high {
            return Err(CleanError::Config(format!(
                "edge_low {} exceeds edge_high {}",
                self.edge_low, self.edge_high
            )));
        }
        if self.notch_low.len() != self.notch_high.len() {
            return Err(CleanError::Config(format!(
                "notch_low has {} entries but notch_high has {}",
                self.notch_low.len(),
                self.notch_high.len()
            )));
        }
        for (low, high) in self.notch_bands() {
            if !(low >= 0.0) || !(high >= low) {
                return Err(CleanError::Config(format!(
                    "invalid notch band [{}, {}]",
                    low, high
                )));
            }
        }
        if self.filter_enabled() && !(self.sample_rate > 0.0) {
            return Err(CleanError::Config(format!(
                "sample_rate must be positive when filtering, got {}",
                self.sample_rate
            )));
        }
        Ok(())
    }
}

/// Statistics a stage hands back to the orchestrator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageSummary {
    pub detectors_processed: usize,
    pub detectors_flagged_bad: usize,
    pub steps_repaired: Option<usize>,
    pub spike_iterations: Option<usize>,
    pub spikes_flagged: Option<usize>,
    pub unconverged_detectors: Option<usize>,
    pub notes: Vec<String>,
}

/// Common error type for the cleaning core.
#[derive(thiserror::Error, Debug)]
pub enum CleanError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("insufficient data: {valid} valid samples, need more than {required}")]
    DataInsufficient { valid: usize, required: usize },
    #[error("numeric degeneracy: {0}")]
    NumericDegeneracy(String),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("run aborted before {stage}")]
    Aborted { stage: &'static str },
    #[error("run aborted during {stage}")]
    Interrupted { stage: &'static str },
    #[error("internal failure: {0}")]
    Internal(String),
}

pub type CleanResult<T> = Result<T, CleanError>;

/// A cleaning stage driven by the orchestrator over the whole cube.
pub trait CleaningStage {
    fn name(&self) -> &'static str;
    fn state(&self) -> PipelineState;
    fn initialize(&mut self, config: &CleanConfig) -> CleanResult<()>;
    /// Whether the initialized parameters ask for this stage at all.
    fn is_enabled(&self) -> bool;
    fn execute(&mut self, cube: &mut SampleCube, abort: &AbortSignal)
        -> CleanResult<StageSummary>;
    fn cleanup(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid_and_optional_stages_are_off() {
        let config = CleanConfig::default();
        config.validate().unwrap();
        assert!(!config.steps_enabled());
        assert!(!config.spikes_enabled());
        assert!(!config.filter_enabled());
    }

    #[test]
    fn mismatched_notch_lengths_are_rejected() {
        let config = CleanConfig {
            notch_low: vec![1.0, 2.0],
            notch_high: vec![1.5],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CleanError::Config(_))));
    }

    #[test]
    fn negative_thresholds_are_rejected() {
        let config = CleanConfig {
            dc_thresh: -1.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CleanError::Config(_))));

        let config = CleanConfig {
            spike_thresh: Some(-3.0),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CleanError::Config(_))));
    }

    #[test]
    fn out_of_range_fraction_and_inverted_edges_are_rejected() {
        let config = CleanConfig {
            bad_frac: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CleanConfig {
            edge_low: 2.0,
            edge_high: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CleanConfig {
            edge_high: 1.0,
            sample_rate: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_reads_partial_json() {
        let config: CleanConfig =
            serde_json::from_str(r#"{"order": 3, "spike_thresh": 5.0}"#).unwrap();
        assert_eq!(config.order, 3);
        assert_eq!(config.spike_thresh, Some(5.0));
        assert_eq!(config.max_iter, 5);
    }
}
