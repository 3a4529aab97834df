//! Core configuration.
//!
//! Every component receives its configuration and store handle explicitly;
//! there are no process-wide singletons.

/// Tunables for a memory core instance.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Identity of this core, used as `source_core_id` on synthetic events.
    pub core_id: String,
    /// Upper bound on the chunk candidate set considered per query.
    pub candidate_limit: usize,
    /// Hard cap on a single sync-feed batch.
    pub max_sync_batch: usize,
    /// Result count when the caller does not pass `k`.
    pub default_k: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            core_id: "memcore".to_string(),
            candidate_limit: 400,
            max_sync_batch: 500,
            default_k: 8,
        }
    }
}
