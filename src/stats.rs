//! Pipeline statistics.
//!
//! Counters for every path a title can take through the pipeline, including
//! the ones that produce nothing (stale results, timeouts, rejected
//! confidences). Window titles themselves are never recorded here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

macro_rules! counters {
    ($($field:ident => $record:ident),* $(,)?) => {
        /// Atomic pipeline counters.
        #[derive(Debug)]
        pub struct PipelineStats {
            $($field: AtomicU64,)*
            started_at: DateTime<Utc>,
            persist_path: Option<PathBuf>,
        }

        /// Snapshot of the pipeline counters.
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct StatsSnapshot {
            $(pub $field: u64,)*
        }

        impl PipelineStats {
            pub fn new() -> Self {
                Self {
                    $($field: AtomicU64::new(0),)*
                    started_at: Utc::now(),
                    persist_path: None,
                }
            }

            $(
                pub fn $record(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }

            fn restore(&self, saved: &StatsSnapshot) {
                $(self.$field.store(saved.$field, Ordering::Relaxed);)*
            }

            /// Reset all counters.
            pub fn reset(&self) {
                $(self.$field.store(0, Ordering::Relaxed);)*
            }
        }
    };
}

counters! {
    observations => record_observation,
    rule_hits => record_rule_hit,
    remote_successes => record_remote_success,
    remote_no_match => record_remote_no_match,
    remote_failures => record_remote_failure,
    remote_timeouts => record_remote_timeout,
    heuristic_fallbacks => record_heuristic_fallback,
    no_suggestion => record_no_suggestion,
    stale_discards => record_stale_discard,
    switch_commands => record_switch,
    start_commands => record_start,
    manual_routings => record_manual,
    dropped_same_activity => record_dropped,
    invalid_transitions => record_invalid_transition,
    sessions_persisted => record_session_persisted,
    persist_failures => record_persist_failure,
}

impl PipelineStats {
    /// Create stats that load from and save to `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            debug!(error = %e, "could not load previous pipeline stats");
        }

        stats
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "Pipeline Statistics:\n\
             - Titles observed: {}\n\
             - Rule hits: {}\n\
             - Remote answers: {} ({} without a match)\n\
             - Remote failures: {} ({} timeouts)\n\
             - Heuristic fallbacks: {}\n\
             - Stale results discarded: {}\n\
             \n\
             Decisions:\n\
             - Switches: {}\n\
             - Timer starts: {}\n\
             - Sent to manual queue: {}\n\
             - Already active: {}\n\
             - Rejected timer actions: {}\n\
             - Sessions saved: {} ({} save failures)",
            s.observations,
            s.rule_hits,
            s.remote_successes,
            s.remote_no_match,
            s.remote_failures,
            s.remote_timeouts,
            s.heuristic_fallbacks,
            s.stale_discards,
            s.switch_commands,
            s.start_commands,
            s.manual_routings,
            s.dropped_same_activity,
            s.invalid_transitions,
            s.sessions_persisted,
            s.persist_failures,
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let persisted = PersistedStats {
                counters: self.snapshot(),
                last_updated: Utc::now(),
            };
            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;
                self.restore(&persisted.counters);
            }
        }
        Ok(())
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    #[serde(flatten)]
    counters: StatsSnapshot,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared stats.
pub type SharedStats = Arc<PipelineStats>;
