//! Priority-ordered classification of observed titles.
//!
//! For every [`WindowObservation`] the dispatcher tries, in order:
//!
//! 1. the [`RuleStore`], which short-circuits with confidence 100;
//! 2. the remote classifier, when one is configured, under a hard deadline;
//! 3. the heuristic scorer, which is started before the remote call so its
//!    answer is ready whenever the remote tier fails or runs out of time.
//!
//! Each observation gets a sequence number. A remote answer that arrives
//! after a newer observation was issued is dropped.

use crate::classify::heuristic;
use crate::classify::rules::RuleStore;
use crate::classify::types::{Suggestion, SuggestionSource, MAX_CONFIDENCE};
use crate::engine::runtime::EngineInput;
use crate::observer::WindowObservation;
use crate::remote::{RemoteClassifier, RemoteError};
use crate::repository::ActivityRepository;
use crate::stats::SharedStats;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Classifier variants, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierTier {
    RuleExactMatch,
    Remote,
    Heuristic,
}

impl fmt::Display for ClassifierTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClassifierTier::RuleExactMatch => "rule",
            ClassifierTier::Remote => "remote",
            ClassifierTier::Heuristic => "heuristic",
        };
        f.write_str(name)
    }
}

struct RemoteTier {
    classifier: Arc<dyn RemoteClassifier>,
    timeout: Duration,
}

/// Turns observations into suggestions.
pub struct ClassifierDispatcher {
    rules: Arc<RuleStore>,
    activities: Arc<dyn ActivityRepository>,
    remote: Option<RemoteTier>,
    latest_sequence: AtomicU64,
    stats: SharedStats,
}

impl ClassifierDispatcher {
    /// A dispatcher with the rule and heuristic tiers.
    pub fn new(
        rules: Arc<RuleStore>,
        activities: Arc<dyn ActivityRepository>,
        stats: SharedStats,
    ) -> Self {
        Self {
            rules,
            activities,
            remote: None,
            latest_sequence: AtomicU64::new(0),
            stats,
        }
    }

    /// Add the remote tier, bounded by `timeout`.
    #[must_use]
    pub fn with_remote(mut self, classifier: Arc<dyn RemoteClassifier>, timeout: Duration) -> Self {
        self.remote = Some(RemoteTier {
            classifier,
            timeout,
        });
        self
    }

    /// Enabled tiers in priority order.
    pub fn tiers(&self) -> Vec<ClassifierTier> {
        let mut tiers = vec![ClassifierTier::RuleExactMatch];
        if self.remote.is_some() {
            tiers.push(ClassifierTier::Remote);
        }
        tiers.push(ClassifierTier::Heuristic);
        tiers
    }

    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    /// Issue the next sequence number. Everything issued earlier becomes stale.
    pub fn next_sequence(&self) -> u64 {
        self.latest_sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn latest_sequence(&self) -> u64 {
        self.latest_sequence.load(Ordering::SeqCst)
    }

    fn is_stale(&self, sequence: u64) -> bool {
        sequence < self.latest_sequence()
    }

    /// Classify one observation with a fresh sequence number.
    pub async fn classify(&self, observation: &WindowObservation) -> Option<Suggestion> {
        let sequence = self.next_sequence();
        self.classify_sequenced(sequence, observation).await
    }

    /// Classify `observation` as sequence `sequence`.
    ///
    /// Returns `None` when no tier produced a suggestion or when the remote
    /// answer came back after a newer observation was issued.
    pub async fn classify_sequenced(
        &self,
        sequence: u64,
        observation: &WindowObservation,
    ) -> Option<Suggestion> {
        self.stats.record_observation();
        let title = observation.normalized_title.as_str();

        if let Some(activity_id) = self.rules.lookup(title) {
            self.stats.record_rule_hit();
            debug!(seq = sequence, %activity_id, "rule hit");
            return Some(Suggestion::new(
                sequence,
                activity_id,
                MAX_CONFIDENCE,
                SuggestionSource::Rule,
                title,
            ));
        }

        let activities = match self.activities.list_activities() {
            Ok(activities) => activities,
            Err(e) => {
                warn!(error = %e, "could not load activities");
                Vec::new()
            }
        };
        if activities.is_empty() {
            self.stats.record_no_suggestion();
            return None;
        }

        let Some(remote) = &self.remote else {
            let result = heuristic::classify(title, &activities)
                .map(|m| m.into_suggestion(sequence, title));
            self.record_heuristic(sequence, result.as_ref());
            return result;
        };

        // Baseline first, so it is ready whenever the remote tier gives up.
        let baseline = {
            let title = title.to_string();
            let activities = activities.clone();
            tokio::task::spawn_blocking(move || heuristic::classify(&title, &activities))
        };

        let remote_result = tokio::time::timeout(
            remote.timeout,
            remote
                .classifier
                .classify(&observation.raw_title, &activities, remote.timeout),
        )
        .await
        .unwrap_or(Err(RemoteError::Timeout(remote.timeout)));

        if self.is_stale(sequence) {
            self.stats.record_stale_discard();
            debug!(seq = sequence, latest = self.latest_sequence(), "discarding stale result");
            return None;
        }

        match remote_result {
            Ok(Some(verdict)) => {
                self.stats.record_remote_success();
                debug!(seq = sequence, activity_id = %verdict.activity_id, confidence = verdict.confidence, "remote verdict");
                baseline.abort();
                return Some(Suggestion::new(
                    sequence,
                    verdict.activity_id,
                    verdict.confidence,
                    SuggestionSource::Remote,
                    title,
                ));
            }
            Ok(None) => {
                self.stats.record_remote_no_match();
                debug!(seq = sequence, "remote found no matching activity");
            }
            Err(RemoteError::Timeout(after)) => {
                self.stats.record_remote_timeout();
                warn!(seq = sequence, timeout_ms = after.as_millis() as u64, "remote classifier timed out, using heuristic");
            }
            Err(e) => {
                self.stats.record_remote_failure();
                warn!(seq = sequence, error = %e, "remote classifier failed, using heuristic");
            }
        }

        let result = baseline
            .await
            .ok()
            .flatten()
            .map(|m| m.into_suggestion(sequence, title));
        self.record_heuristic(sequence, result.as_ref());
        result
    }

    fn record_heuristic(&self, sequence: u64, result: Option<&Suggestion>) {
        match result {
            Some(s) => {
                self.stats.record_heuristic_fallback();
                debug!(seq = sequence, activity_id = %s.activity_id, confidence = s.confidence, "heuristic suggestion");
            }
            None => {
                self.stats.record_no_suggestion();
                debug!(seq = sequence, "no suggestion");
            }
        }
    }

    /// Consume observations until the channel closes, forwarding suggestions
    /// to the engine.
    ///
    /// Sequence numbers are issued in arrival order; classification of each
    /// observation runs as its own task so a slow remote call never holds up
    /// newer titles.
    pub async fn run(
        self: Arc<Self>,
        mut observations: mpsc::Receiver<WindowObservation>,
        engine: mpsc::Sender<EngineInput>,
    ) {
        while let Some(observation) = observations.recv().await {
            let sequence = self.next_sequence();
            debug!(seq = sequence, title = %observation.normalized_title, "title observed");

            let dispatcher = Arc::clone(&self);
            let engine = engine.clone();
            tokio::spawn(async move {
                if let Some(suggestion) = dispatcher.classify_sequenced(sequence, &observation).await
                {
                    // Engine gone means shutdown.
                    let _ = engine.send(EngineInput::Suggestion(suggestion)).await;
                }
            });
        }
        debug!("observation channel closed, dispatcher stopping");
    }
}
