//! Foreground window observation.
//!
//! This module polls the platform for the title of the foreground window,
//! debounces noisy changes and emits one [`WindowObservation`] per confirmed
//! change.

pub mod debounce;
pub mod poller;
pub mod types;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub mod noop;

// Re-export commonly used types
pub use debounce::{DebounceOutcome, Debouncer};
pub use poller::{AutoDetectToggle, ObserverConfig, ObserverError, WindowObserver};
pub use types::{normalize_title, ForegroundWindowApi, PlatformError, WindowObservation};

#[cfg(target_os = "macos")]
pub use macos::{check_permission, MacOSForegroundApi};

/// Platform-native foreground window API
#[cfg(target_os = "macos")]
pub type PlatformWindowApi = MacOSForegroundApi;

#[cfg(target_os = "windows")]
pub use windows::{check_permission, WindowsForegroundApi};

/// Platform-native foreground window API
#[cfg(target_os = "windows")]
pub type PlatformWindowApi = WindowsForegroundApi;

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub use noop::{check_permission, NoopForegroundApi};

/// Platform-native foreground window API
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub type PlatformWindowApi = NoopForegroundApi;
