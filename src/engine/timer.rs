//! Timer session state machine.
//!
//! The only owner of "current activity" state. Lives inside the engine task,
//! every other component sees it through [`TimerSnapshot`]s.

use crate::classify::types::ActivityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle state of a timer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerState {
    Idle,
    Running,
    Paused,
    Stopped,
}

impl TimerState {
    /// Running or Paused.
    pub fn is_live(self) -> bool {
        matches!(self, TimerState::Running | TimerState::Paused)
    }
}

impl fmt::Display for TimerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimerState::Idle => "idle",
            TimerState::Running => "running",
            TimerState::Paused => "paused",
            TimerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Requested timer transition, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    Start,
    Pause,
    Resume,
    Stop,
}

impl fmt::Display for TimerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimerAction::Start => "start",
            TimerAction::Pause => "pause",
            TimerAction::Resume => "resume",
            TimerAction::Stop => "stop",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimerError {
    #[error("cannot {action} while {from}")]
    InvalidTransition { from: TimerState, action: TimerAction },
}

/// A pause; `end` is `None` while the pause is ongoing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PausedInterval {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

/// One tracked session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSession {
    pub id: Uuid,
    pub activity_id: Option<ActivityId>,
    pub state: TimerState,
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub paused_intervals: Vec<PausedInterval>,
    pub stopped_at: Option<DateTime<Utc>>,
    /// Active time in milliseconds, set only once the session is stopped
    pub total_duration_ms: Option<u64>,
}

impl TimerSession {
    /// A fresh, idle session with no activity.
    pub fn idle() -> Self {
        Self {
            id: Uuid::new_v4(),
            activity_id: None,
            state: TimerState::Idle,
            started_at: None,
            paused_intervals: Vec::new(),
            stopped_at: None,
            total_duration_ms: None,
        }
    }

    /// Active time up to `now`, excluding pauses. Open pauses count up to `now`.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        let Some(started_at) = self.started_at else {
            return Duration::ZERO;
        };
        let end = self.stopped_at.unwrap_or(now);
        let paused: chrono::Duration = self
            .paused_intervals
            .iter()
            .map(|p| p.end.unwrap_or(end) - p.start)
            .fold(chrono::Duration::zero(), |acc, d| acc + d);

        (end - started_at - paused).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn total_duration(&self) -> Option<Duration> {
        self.total_duration_ms.map(Duration::from_millis)
    }
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Read-only view of the timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    pub session: TimerSession,
    /// Activity the user (or an auto switch) picked most recently
    pub selected_activity: Option<ActivityId>,
    pub elapsed_ms: u64,
}

impl TimerSnapshot {
    pub fn state(&self) -> TimerState {
        self.session.state
    }

    /// Activity of the Running or Paused session, if any.
    pub fn live_activity(&self) -> Option<ActivityId> {
        if self.session.state.is_live() {
            self.session.activity_id
        } else {
            None
        }
    }
}

/// Owns the single live [`TimerSession`].
pub struct TimerStateMachine {
    clock: Arc<dyn Clock>,
    session: TimerSession,
    selected_activity: Option<ActivityId>,
}

impl TimerStateMachine {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            session: TimerSession::idle(),
            selected_activity: None,
        }
    }

    pub fn state(&self) -> TimerState {
        self.session.state
    }

    pub fn selected_activity(&self) -> Option<ActivityId> {
        self.selected_activity
    }

    /// Change the selected activity. Never touches a live session.
    pub fn select_activity(&mut self, activity_id: ActivityId) {
        self.selected_activity = Some(activity_id);
    }

    fn reject(&self, action: TimerAction) -> TimerError {
        TimerError::InvalidTransition {
            from: self.session.state,
            action,
        }
    }

    /// Idle or Stopped -> Running with a new session for `activity_id`.
    pub fn start(&mut self, activity_id: ActivityId) -> Result<(), TimerError> {
        if self.session.state.is_live() {
            return Err(self.reject(TimerAction::Start));
        }
        self.session = TimerSession {
            activity_id: Some(activity_id),
            state: TimerState::Running,
            started_at: Some(self.clock.now()),
            ..TimerSession::idle()
        };
        self.selected_activity = Some(activity_id);
        Ok(())
    }

    /// Running -> Paused.
    pub fn pause(&mut self) -> Result<(), TimerError> {
        if self.session.state != TimerState::Running {
            return Err(self.reject(TimerAction::Pause));
        }
        self.session.paused_intervals.push(PausedInterval {
            start: self.clock.now(),
            end: None,
        });
        self.session.state = TimerState::Paused;
        Ok(())
    }

    /// Paused -> Running.
    pub fn resume(&mut self) -> Result<(), TimerError> {
        if self.session.state != TimerState::Paused {
            return Err(self.reject(TimerAction::Resume));
        }
        let now = self.clock.now();
        if let Some(open) = self.session.paused_intervals.last_mut() {
            open.end.get_or_insert(now);
        }
        self.session.state = TimerState::Running;
        Ok(())
    }

    /// Running or Paused -> Stopped, then back to a fresh Idle session.
    ///
    /// Returns the finalized session for persistence.
    pub fn stop(&mut self) -> Result<TimerSession, TimerError> {
        if !self.session.state.is_live() {
            return Err(self.reject(TimerAction::Stop));
        }
        let now = self.clock.now();
        if let Some(open) = self.session.paused_intervals.last_mut() {
            open.end.get_or_insert(now);
        }

        let mut finished = std::mem::replace(&mut self.session, TimerSession::idle());
        finished.stopped_at = Some(now);
        finished.state = TimerState::Stopped;
        finished.total_duration_ms = Some(finished.elapsed(now).as_millis() as u64);
        Ok(finished)
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            session: self.session.clone(),
            selected_activity: self.selected_activity,
            elapsed_ms: self.session.elapsed(self.clock.now()).as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn machine() -> (TimerStateMachine, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
        (TimerStateMachine::new(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_full_lifecycle_excludes_pauses() {
        let (mut timer, clock) = machine();
        timer.start(ActivityId(1)).unwrap();
        clock.advance(Duration::from_secs(60));
        timer.pause().unwrap();
        clock.advance(Duration::from_secs(30));
        timer.resume().unwrap();
        clock.advance(Duration::from_secs(15));

        let finished = timer.stop().unwrap();
        assert_eq!(finished.state, TimerState::Stopped);
        assert_eq!(finished.activity_id, Some(ActivityId(1)));
        assert_eq!(finished.total_duration(), Some(Duration::from_secs(75)));
        assert_eq!(finished.paused_intervals.len(), 1);

        assert_eq!(timer.state(), TimerState::Idle);
        assert_eq!(timer.snapshot().session.activity_id, None);
    }

    #[test]
    fn test_stop_while_paused_closes_interval() {
        let (mut timer, clock) = machine();
        timer.start(ActivityId(2)).unwrap();
        clock.advance(Duration::from_secs(10));
        timer.pause().unwrap();
        clock.advance(Duration::from_secs(50));

        let finished = timer.stop().unwrap();
        assert_eq!(finished.total_duration(), Some(Duration::from_secs(10)));
        assert!(finished.paused_intervals[0].end.is_some());
    }

    #[test]
    fn test_invalid_transitions_are_rejected_without_change() {
        let (mut timer, _clock) = machine();
        assert_eq!(
            timer.pause(),
            Err(TimerError::InvalidTransition {
                from: TimerState::Idle,
                action: TimerAction::Pause
            })
        );
        assert!(timer.resume().is_err());
        assert!(timer.stop().is_err());
        assert_eq!(timer.state(), TimerState::Idle);

        timer.start(ActivityId(1)).unwrap();
        let before = timer.snapshot();
        assert!(timer.start(ActivityId(2)).is_err());
        assert!(timer.resume().is_err());
        assert_eq!(timer.snapshot().session, before.session);
    }

    #[test]
    fn test_select_does_not_touch_live_session() {
        let (mut timer, _clock) = machine();
        timer.start(ActivityId(1)).unwrap();
        timer.pause().unwrap();
        timer.select_activity(ActivityId(4));

        let snap = timer.snapshot();
        assert_eq!(snap.selected_activity, Some(ActivityId(4)));
        assert_eq!(snap.live_activity(), Some(ActivityId(1)));
        assert_eq!(snap.state(), TimerState::Paused);
    }

    #[test]
    fn test_elapsed_while_running() {
        let (mut timer, clock) = machine();
        assert_eq!(timer.snapshot().elapsed_ms, 0);
        timer.start(ActivityId(1)).unwrap();
        clock.advance(Duration::from_millis(1500));
        assert_eq!(timer.snapshot().elapsed_ms, 1500);
    }

    #[test]
    fn test_error_message() {
        let err = TimerError::InvalidTransition {
            from: TimerState::Idle,
            action: TimerAction::Pause,
        };
        assert_eq!(err.to_string(), "cannot pause while idle");
    }
}
