use crate::generator::profile::GeneratorConfig;
use anyhow::Context;
use sc2core::prelude::CleanConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Everything one offline run needs: how to synthesise the cube and how to clean it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub generator: GeneratorConfig,
    pub cleaning: CleanConfig,
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    /// Keeps the generator and the filter on the same sample rate.
    pub fn from_args(generator: GeneratorConfig, mut cleaning: CleanConfig) -> Self {
        cleaning.sample_rate = generator.sample_rate;
        Self {
            generator,
            cleaning,
        }
    }

    pub fn to_clean_config(&self) -> CleanConfig {
        self.cleaning.clone()
    }
}
