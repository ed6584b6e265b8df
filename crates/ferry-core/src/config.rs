//! Engine configuration.

use std::time::Duration;

/// Tuning knobs for running migrations.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Error investigator threads per migration.
    pub investigator_workers: usize,
    /// How long an idle investigator worker waits before re-checking for stop.
    pub investigator_poll_interval: Duration,
    /// Checkpoint progress after every migration, not only at the end of a run.
    pub checkpoint_after_each_migration: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            investigator_workers: available_parallelism(),
            investigator_poll_interval: Duration::from_millis(100),
            checkpoint_after_each_migration: true,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the investigator pool size (at least one).
    pub fn with_investigator_workers(mut self, workers: usize) -> Self {
        self.investigator_workers = workers.max(1);
        self
    }

    /// Set the investigator poll interval.
    pub fn with_investigator_poll_interval(mut self, interval: Duration) -> Self {
        self.investigator_poll_interval = interval;
        self
    }

    /// Enable or disable per-migration checkpoints.
    pub fn with_checkpoint_after_each_migration(mut self, enabled: bool) -> Self {
        self.checkpoint_after_each_migration = enabled;
        self
    }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .max(1)
}
