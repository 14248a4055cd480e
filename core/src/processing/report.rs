use crate::prelude::StageSummary;
use crate::processing::pipeline::PipelineState;
use serde::{Deserialize, Serialize};

/// Statistics accumulated over one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Detectors newly marked BAD_DETECTOR by any stage.
    pub detectors_flagged_bad: usize,
    pub steps_repaired: usize,
    pub spike_iterations_used: usize,
    pub spikes_flagged: usize,
    /// False when converging spike clipping hit the pass cap on some detector.
    pub spike_converged: bool,
    pub unconverged_detectors: usize,
    pub detectors_detrended: usize,
    pub detectors_filtered: usize,
    pub states: Vec<PipelineState>,
    pub notes: Vec<String>,
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            detectors_flagged_bad: 0,
            steps_repaired: 0,
            spike_iterations_used: 0,
            spikes_flagged: 0,
            spike_converged: true,
            unconverged_detectors: 0,
            detectors_detrended: 0,
            detectors_filtered: 0,
            states: vec![PipelineState::Idle],
            notes: Vec::new(),
        }
    }

    pub fn enter(&mut self, state: PipelineState) {
        self.states.push(state);
    }

    pub fn absorb(&mut self, state: PipelineState, summary: &StageSummary) {
        self.detectors_flagged_bad += summary.detectors_flagged_bad;
        match state {
            PipelineState::Detrending => self.detectors_detrended += summary.detectors_processed,
            PipelineState::FreqFilter => self.detectors_filtered += summary.detectors_processed,
            _ => {}
        }
        if let Some(steps) = summary.steps_repaired {
            self.steps_repaired += steps;
        }
        if let Some(iterations) = summary.spike_iterations {
            self.spike_iterations_used = self.spike_iterations_used.max(iterations);
        }
        if let Some(spikes) = summary.spikes_flagged {
            self.spikes_flagged += spikes;
        }
        if let Some(unconverged) = summary.unconverged_detectors {
            self.unconverged_detectors += unconverged;
            self.spike_converged = self.unconverged_detectors == 0;
        }
        self.notes.extend(
            summary
                .notes
                .iter()
                .map(|note| format!("{:?}: {}", state, note)),
        );
    }

    pub fn stage_ran(&self, state: PipelineState) -> bool {
        self.states.contains(&state)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
