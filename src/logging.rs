//! `tracing` subscriber setup.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

/// Directive used when `RUST_LOG` does not say otherwise.
pub const DEFAULT_DIRECTIVE: &str = "activity_autoswitch=info";

fn filter(level: Option<&str>) -> EnvFilter {
    let directive = level
        .map(|l| format!("activity_autoswitch={l}"))
        .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_string());
    EnvFilter::from_default_env().add_directive(
        directive
            .parse()
            .unwrap_or_else(|_| Directive::from(tracing::Level::INFO)),
    )
}

/// Install the global subscriber.
///
/// With `log_file`, output is appended to that file without ANSI colours;
/// otherwise it goes to stderr. Calling this twice is harmless.
pub fn init(level: Option<&str>, log_file: Option<&Path>) -> std::io::Result<()> {
    let filter = filter(level);

    let result = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init()
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    };

    // Already initialised elsewhere, e.g. by a test harness.
    let _ = result;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_with_file_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("autoswitch.log");
        init(Some("debug"), Some(&path)).unwrap();
        init(None, None).unwrap();
        assert!(path.exists());
    }
}
