//! Activity and suggestion types shared by every classifier tier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identifier of a user-defined activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityId(pub i64);

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user-defined category of work. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub name: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Activity {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id: ActivityId(id),
            name: name.into(),
            tags: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Which classifier tier produced a suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionSource {
    Rule,
    Remote,
    Heuristic,
}

impl fmt::Display for SuggestionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SuggestionSource::Rule => "rule",
            SuggestionSource::Remote => "remote",
            SuggestionSource::Heuristic => "heuristic",
        };
        f.write_str(name)
    }
}

/// Highest possible confidence.
pub const MAX_CONFIDENCE: u8 = 100;

/// Clamp a raw confidence into `0..=100`.
///
/// Returns `None` for values that are not numbers at all.
pub fn clamp_confidence(raw: f64) -> Option<u8> {
    if raw.is_nan() {
        return None;
    }
    Some(raw.round().clamp(0.0, f64::from(MAX_CONFIDENCE)) as u8)
}

/// One classification result for one observed title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    /// Sequence number of the observation this answers
    pub sequence: u64,
    pub activity_id: ActivityId,
    /// Always within `0..=100`
    pub confidence: u8,
    pub source: SuggestionSource,
    /// Normalized title that was classified
    pub for_title: String,
    pub produced_at: DateTime<Utc>,
}

impl Suggestion {
    pub fn new(
        sequence: u64,
        activity_id: ActivityId,
        confidence: u8,
        source: SuggestionSource,
        for_title: impl Into<String>,
    ) -> Self {
        Self {
            sequence,
            activity_id,
            confidence: confidence.min(MAX_CONFIDENCE),
            source,
            for_title: for_title.into(),
            produced_at: Utc::now(),
        }
    }
}
