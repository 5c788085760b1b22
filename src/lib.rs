//! Activity Autoswitch - foreground-window activity classification.
//!
//! This library watches the title of the foreground window, works out which
//! user-defined activity it belongs to and, when confident enough, switches
//! the time-tracking session to that activity.
//!
//! # Pipeline
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────────────────┐   ┌─────────────┐
//! │   Window    │──▶│       Classifier Dispatcher      │──▶│  Decision   │
//! │  Observer   │   │  rule ─▶ remote ─▶ heuristic     │   │   Engine    │
//! │ (debounced) │   │  (sequence-tagged, deadline)     │   │   + Timer   │
//! └─────────────┘   └──────────────────────────────────┘   └──────┬──────┘
//!                                                                 │
//!                          switch / start / manual queue events ◀─┘
//! ```
//!
//! - **Observer**: a dedicated thread polls the platform window API and
//!   only reports titles that stayed put for several polls.
//! - **Dispatcher**: exact rules answer immediately with confidence 100.
//!   Otherwise the remote classifier (if an API key is configured) gets a
//!   hard deadline while the heuristic runs alongside as the fallback.
//! - **Engine**: one task owns the timer. Suggestions and user actions are
//!   applied strictly in arrival order.
//!
//! # Example
//!
//! ```no_run
//! use activity_autoswitch::{
//!     Activity, ClassifierDispatcher, MemoryActivityRepository, PipelineStats, RuleStore,
//!     WindowObservation,
//! };
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let activities = MemoryActivityRepository::new(vec![Activity::new(1, "Coding")]);
//! let dispatcher = ClassifierDispatcher::new(
//!     Arc::new(RuleStore::new()),
//!     Arc::new(activities),
//!     Arc::new(PipelineStats::new()),
//! );
//!
//! let suggestion = dispatcher
//!     .classify(&WindowObservation::new("Coding notes - Editor"))
//!     .await;
//! println!("{suggestion:?}");
//! # }
//! ```

pub mod classify;
pub mod config;
pub mod engine;
pub mod logging;
pub mod observer;
pub mod remote;
pub mod repository;
pub mod stats;

// Re-export key types at crate root for convenience
pub use classify::{
    Activity, ActivityId, ClassifierDispatcher, ClassifierTier, RuleStore, Suggestion,
    SuggestionSource,
};
pub use config::{Config, ConfigError};
pub use engine::{
    Engine, EngineEvent, EngineHandle, EngineInput, ManualReason, Policy, TimerSession,
    TimerSnapshot, TimerState,
};
pub use observer::{AutoDetectToggle, ObserverConfig, WindowObservation, WindowObserver};
pub use remote::{GeminiClassifier, RemoteClassifier, RemoteConfig, RemoteError, RemoteVerdict};
pub use repository::{
    ActivityRepository, JsonActivityRepository, JsonRuleRepository, JsonSessionRepository,
    MemoryActivityRepository, MemoryRuleRepository, MemorySessionRepository, RepositoryError,
    RuleMapping, RuleRepository, SessionRepository,
};
pub use stats::{PipelineStats, SharedStats, StatsSnapshot};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
