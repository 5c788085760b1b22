//! Observation types produced by the window observer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single confirmed foreground-window title change.
///
/// Produced by the observer after debouncing, consumed once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowObservation {
    /// Title exactly as the platform reported it
    pub raw_title: String,
    /// Lowercased, trimmed title used as the classification key
    pub normalized_title: String,
    /// When the title was confirmed
    pub observed_at: DateTime<Utc>,
}

impl WindowObservation {
    pub fn new(raw_title: impl Into<String>) -> Self {
        let raw_title = raw_title.into();
        Self {
            normalized_title: normalize_title(&raw_title),
            raw_title,
            observed_at: Utc::now(),
        }
    }
}

/// Normalize a window title: trim surrounding whitespace and lowercase.
pub fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

/// Errors returned by a platform foreground-window API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// The platform has no usable foreground-window API. Permanent.
    #[error("foreground window API unavailable: {0}")]
    Unavailable(String),

    /// A single query failed; the next poll may succeed.
    #[error("foreground window query failed: {0}")]
    QueryFailed(String),
}

/// Source of the current foreground window title.
pub trait ForegroundWindowApi: Send + 'static {
    /// Returns the title of the foreground window, or `None` when there is no
    /// foreground window or it has no title.
    fn foreground_title(&mut self) -> Result<Option<String>, PlatformError>;
}

impl<F> ForegroundWindowApi for F
where
    F: FnMut() -> Result<Option<String>, PlatformError> + Send + 'static,
{
    fn foreground_title(&mut self) -> Result<Option<String>, PlatformError> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  Editor - Main.py \n"), "editor - main.py");
        assert_eq!(normalize_title(""), "");
    }

    #[test]
    fn test_observation_normalizes() {
        let obs = WindowObservation::new(" Microsoft Word - Doc1 ");
        assert_eq!(obs.raw_title, " Microsoft Word - Doc1 ");
        assert_eq!(obs.normalized_title, "microsoft word - doc1");
    }
}
