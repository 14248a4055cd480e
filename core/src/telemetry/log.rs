use log::{info, warn};

/// Stage-level logging front for the cleaning core.
pub struct LogManager {
    scope: &'static str,
}

impl LogManager {
    pub fn new(scope: &'static str) -> Self {
        Self { scope }
    }

    pub fn record(&self, message: &str) {
        info!("[{}] {}", self.scope, message);
    }

    pub fn degrade(&self, message: &str) {
        warn!("[{}] {}", self.scope, message);
    }
}
