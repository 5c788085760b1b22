//! Confidence-gated auto-switch policy.
//!
//! A pure function of the policy settings, the current timer snapshot and
//! one suggestion.

use crate::classify::types::Suggestion;
use crate::engine::timer::{TimerSnapshot, TimerState};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Policy settings taken from the settings store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub auto_switch_enabled: bool,
    /// 0-100
    pub confidence_threshold: u8,
    pub start_timer_on_switch: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            auto_switch_enabled: false,
            confidence_threshold: 65,
            start_timer_on_switch: false,
        }
    }
}

/// Why a suggestion was left for the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualReason {
    /// A session is running for another activity
    SessionRunning,
    AutoSwitchDisabled,
    BelowThreshold,
}

impl fmt::Display for ManualReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ManualReason::SessionRunning => "a session is running for another activity",
            ManualReason::AutoSwitchDisabled => "auto switch is disabled",
            ManualReason::BelowThreshold => "confidence below threshold",
        };
        f.write_str(text)
    }
}

/// Outcome for one suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Already the active activity
    Drop,
    /// Switch, and start the timer when `start` is set
    Switch { start: bool },
    /// Route to the manual suggestion queue
    Manual(ManualReason),
}

pub fn decide(policy: &Policy, timer: &TimerSnapshot, suggestion: &Suggestion) -> Decision {
    let state = timer.state();
    let target = suggestion.activity_id;

    if timer.live_activity() == Some(target) {
        return Decision::Drop;
    }

    // Running time for another activity is never discarded automatically.
    if state == TimerState::Running {
        return Decision::Manual(ManualReason::SessionRunning);
    }

    let can_start = policy.start_timer_on_switch
        && matches!(state, TimerState::Idle | TimerState::Stopped);
    // Selected but not timed: only worth acting on if it would start the timer.
    if timer.selected_activity == Some(target) && !can_start {
        return Decision::Drop;
    }

    if !policy.auto_switch_enabled {
        return Decision::Manual(ManualReason::AutoSwitchDisabled);
    }
    if suggestion.confidence < policy.confidence_threshold {
        return Decision::Manual(ManualReason::BelowThreshold);
    }

    Decision::Switch { start: can_start }
}
