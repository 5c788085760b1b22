//! Title classification: exact rules, the remote tier and the local heuristic.

pub mod dispatcher;
pub mod heuristic;
pub mod rules;
pub mod types;

pub use dispatcher::{ClassifierDispatcher, ClassifierTier};
pub use heuristic::HeuristicMatch;
pub use rules::RuleStore;
pub use types::{clamp_confidence, Activity, ActivityId, Suggestion, SuggestionSource};
