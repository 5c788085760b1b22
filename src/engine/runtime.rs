//! Single-writer engine task.
//!
//! Suggestions from the dispatcher and actions from the user arrive on one
//! ordered channel and are applied one at a time. The timer state machine
//! lives here and nowhere else; everybody else reads [`TimerSnapshot`]s from
//! a watch channel or consumes [`EngineEvent`]s.

use crate::classify::rules::RuleStore;
use crate::classify::types::{ActivityId, Suggestion};
use crate::engine::decision::{decide, Decision, ManualReason, Policy};
use crate::engine::timer::{Clock, TimerSession, TimerSnapshot, TimerState, TimerStateMachine};
use crate::repository::SessionRepository;
use crate::stats::SharedStats;
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything the engine can be asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineInput {
    /// Classifier output
    Suggestion(Suggestion),
    Start(ActivityId),
    Pause,
    Resume,
    Stop,
    SelectActivity(ActivityId),
    /// User accepted a suggestion from the manual queue
    AcceptSuggestion(Suggestion),
    /// User accepted and asked to always map this title
    AlwaysMap(Suggestion),
    DismissSuggestion(Suggestion),
    /// New policy from the settings store
    UpdatePolicy(Policy),
}

/// What the engine tells the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    SwitchCommand(ActivityId),
    StartCommand(ActivityId),
    ManualSuggestion {
        suggestion: Suggestion,
        reason: ManualReason,
    },
    RuleCreated {
        title: String,
        activity_id: ActivityId,
    },
    /// A session was finalized; `persisted` is false while it waits for retry
    SessionStopped {
        session: TimerSession,
        persisted: bool,
    },
}

/// The decision engine plus the timer it owns.
pub struct Engine {
    timer: TimerStateMachine,
    policy: Policy,
    rules: Arc<RuleStore>,
    sessions: Box<dyn SessionRepository>,
    pending: Vec<TimerSession>,
    last_sequence: Option<u64>,
    stats: SharedStats,
    events: Sender<EngineEvent>,
    snapshots: watch::Sender<TimerSnapshot>,
}

impl Engine {
    /// Create an engine and the receiver for its events.
    pub fn new(
        policy: Policy,
        rules: Arc<RuleStore>,
        sessions: Box<dyn SessionRepository>,
        clock: Arc<dyn Clock>,
        stats: SharedStats,
    ) -> (Self, Receiver<EngineEvent>) {
        let timer = TimerStateMachine::new(clock);
        let (snapshots, _) = watch::channel(timer.snapshot());
        let (events, events_rx) = crossbeam_channel::unbounded();

        let engine = Self {
            timer,
            policy,
            rules,
            sessions,
            pending: Vec::new(),
            last_sequence: None,
            stats,
            events,
            snapshots,
        };
        (engine, events_rx)
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        self.timer.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerSnapshot> {
        self.snapshots.subscribe()
    }

    /// Sessions whose persistence failed and will be retried.
    pub fn pending_sessions(&self) -> &[TimerSession] {
        &self.pending
    }

    fn emit(&self, event: EngineEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Apply one input. Never fails; rejected actions are logged and counted.
    pub fn handle(&mut self, input: EngineInput) {
        match input {
            EngineInput::Suggestion(s) => self.on_suggestion(s),
            EngineInput::Start(activity_id) => self.start(activity_id),
            EngineInput::Pause => {
                if let Err(e) = self.timer.pause() {
                    self.reject(e);
                }
            }
            EngineInput::Resume => {
                if let Err(e) = self.timer.resume() {
                    self.reject(e);
                }
            }
            EngineInput::Stop => self.stop(),
            EngineInput::SelectActivity(activity_id) => self.timer.select_activity(activity_id),
            EngineInput::AcceptSuggestion(s) => self.accept(&s),
            EngineInput::AlwaysMap(s) => {
                match self.rules.upsert(&s.for_title, s.activity_id) {
                    Ok(()) => {
                        info!(activity_id = %s.activity_id, "rule created from suggestion");
                        self.emit(EngineEvent::RuleCreated {
                            title: s.for_title.clone(),
                            activity_id: s.activity_id,
                        });
                    }
                    Err(e) => warn!(error = %e, "could not save rule"),
                }
                self.accept(&s);
            }
            EngineInput::DismissSuggestion(s) => {
                debug!(seq = s.sequence, activity_id = %s.activity_id, "suggestion dismissed");
            }
            EngineInput::UpdatePolicy(policy) => {
                if policy != self.policy {
                    debug!(?policy, "policy updated");
                    self.policy = policy;
                }
            }
        }
        self.snapshots.send_replace(self.timer.snapshot());
    }

    fn reject(&self, error: crate::engine::timer::TimerError) {
        self.stats.record_invalid_transition();
        warn!(error = %error, "ignoring timer action");
    }

    fn on_suggestion(&mut self, suggestion: Suggestion) {
        if self.last_sequence.is_some_and(|last| suggestion.sequence < last) {
            self.stats.record_stale_discard();
            debug!(seq = suggestion.sequence, "discarding out-of-order suggestion");
            return;
        }
        self.last_sequence = Some(suggestion.sequence);

        match decide(&self.policy, &self.timer.snapshot(), &suggestion) {
            Decision::Drop => {
                self.stats.record_dropped();
                debug!(seq = suggestion.sequence, activity_id = %suggestion.activity_id, "already active");
            }
            Decision::Switch { start } => self.switch(suggestion.activity_id, start),
            Decision::Manual(reason) => {
                self.stats.record_manual();
                debug!(seq = suggestion.sequence, activity_id = %suggestion.activity_id, %reason, "routed to manual queue");
                self.emit(EngineEvent::ManualSuggestion { suggestion, reason });
            }
        }
    }

    fn switch(&mut self, activity_id: ActivityId, start: bool) {
        self.timer.select_activity(activity_id);
        self.stats.record_switch();
        info!(%activity_id, "switching activity");
        self.emit(EngineEvent::SwitchCommand(activity_id));

        if start {
            self.start(activity_id);
        }
    }

    fn start(&mut self, activity_id: ActivityId) {
        match self.timer.start(activity_id) {
            Ok(()) => {
                self.stats.record_start();
                info!(%activity_id, "timer started");
                self.emit(EngineEvent::StartCommand(activity_id));
            }
            Err(e) => self.reject(e),
        }
    }

    /// User acceptance is a switch without the confidence and policy gates.
    fn accept(&mut self, suggestion: &Suggestion) {
        let snapshot = self.timer.snapshot();
        let target = suggestion.activity_id;
        if snapshot.live_activity() == Some(target) {
            return;
        }
        let start = self.policy.start_timer_on_switch
            && matches!(snapshot.state(), TimerState::Idle | TimerState::Stopped);
        if snapshot.selected_activity == Some(target) && !start {
            return;
        }
        self.switch(target, start);
    }

    fn stop(&mut self) {
        let session = match self.timer.stop() {
            Ok(session) => session,
            Err(e) => {
                self.reject(e);
                return;
            }
        };
        info!(
            activity_id = ?session.activity_id,
            total_ms = session.total_duration_ms.unwrap_or(0),
            "timer stopped"
        );

        self.flush_pending();
        let persisted = self.persist(&session);
        if !persisted {
            self.pending.push(session.clone());
        }
        self.emit(EngineEvent::SessionStopped { session, persisted });
    }

    fn persist(&mut self, session: &TimerSession) -> bool {
        match self.sessions.save_session(session) {
            Ok(()) => {
                self.stats.record_session_persisted();
                true
            }
            Err(e) => {
                self.stats.record_persist_failure();
                warn!(session = %session.id, error = %e, "could not save session, will retry");
                false
            }
        }
    }

    /// Retry sessions whose earlier save failed.
    pub fn flush_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for session in pending {
            if !self.persist(&session) {
                self.pending.push(session);
            }
        }
    }

    /// Process inputs until every sender is dropped, then retry pending saves.
    pub async fn run(mut self, mut inputs: mpsc::Receiver<EngineInput>) -> Self {
        while let Some(input) = inputs.recv().await {
            self.handle(input);
        }
        self.flush_pending();
        if !self.pending.is_empty() {
            warn!(count = self.pending.len(), "sessions left unsaved at shutdown");
        }
        debug!("engine input channel closed");
        self
    }

    /// Spawn the engine on the current tokio runtime.
    pub fn spawn(self, capacity: usize) -> (EngineHandle, JoinHandle<Engine>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = EngineHandle {
            inputs: tx,
            snapshots: self.subscribe(),
        };
        (handle, tokio::spawn(self.run(rx)))
    }
}

/// Cloneable front door to a running [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineHandle {
    inputs: mpsc::Sender<EngineInput>,
    snapshots: watch::Receiver<TimerSnapshot>,
}

impl EngineHandle {
    /// Queue an input. Returns false once the engine has shut down.
    pub async fn send(&self, input: EngineInput) -> bool {
        self.inputs.send(input).await.is_ok()
    }

    /// Sender for the dispatcher.
    pub fn sender(&self) -> mpsc::Sender<EngineInput> {
        self.inputs.clone()
    }

    /// Latest published timer snapshot.
    pub fn snapshot(&self) -> TimerSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<TimerSnapshot> {
        self.snapshots.clone()
    }
}
