//! Fallback foreground-window API for platforms without one.
//!
//! This exists so the crate (and binary) compile everywhere. The observer
//! sees `Unavailable` on the first poll and goes inert.

use crate::observer::types::{ForegroundWindowApi, PlatformError};

/// A platform API that never reports a window.
#[derive(Debug, Default)]
pub struct NoopForegroundApi;

impl NoopForegroundApi {
    pub fn new() -> Self {
        Self
    }
}

impl ForegroundWindowApi for NoopForegroundApi {
    fn foreground_title(&mut self) -> Result<Option<String>, PlatformError> {
        Err(PlatformError::Unavailable(format!(
            "no foreground window support on {}",
            std::env::consts::OS
        )))
    }
}

/// Always false: there is nothing to grant access to.
pub fn check_permission() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_reports_unavailable() {
        let mut api = NoopForegroundApi::new();
        assert!(matches!(
            api.foreground_title(),
            Err(PlatformError::Unavailable(_))
        ));
    }

    #[test]
    fn test_noop_reports_no_permission() {
        assert!(!check_permission());
    }
}
