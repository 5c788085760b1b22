//! End-to-end tests for the classification and auto-switch pipeline

use activity_autoswitch::engine::{ManualClock, SystemClock};
use activity_autoswitch::observer::{AutoDetectToggle, ObserverConfig, PlatformError, WindowObserver};
use activity_autoswitch::remote::{RemoteClassifier, RemoteError, RemoteVerdict};
use activity_autoswitch::{
    Activity, ActivityId, ClassifierDispatcher, Engine, EngineEvent, EngineHandle, EngineInput,
    JsonRuleRepository, ManualReason, MemoryActivityRepository, MemorySessionRepository,
    PipelineStats, Policy, RuleStore, SharedStats, Suggestion, SuggestionSource, TimerState,
    WindowObservation,
};
use async_trait::async_trait;
use chrono::Utc;
use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const CODING: ActivityId = ActivityId(1);
const READING: ActivityId = ActivityId(2);
const WRITING: ActivityId = ActivityId(3);

fn activities() -> MemoryActivityRepository {
    MemoryActivityRepository::new(vec![
        Activity::new(1, "Coding").with_tags(["main.py", "vscode"]),
        Activity::new(2, "Reading").with_tags(["pdf"]),
        Activity::new(3, "Writing"),
    ])
}

fn auto_policy() -> Policy {
    Policy {
        auto_switch_enabled: true,
        confidence_threshold: 65,
        start_timer_on_switch: true,
    }
}

struct Running {
    handle: EngineHandle,
    events: Receiver<EngineEvent>,
    rules: Arc<RuleStore>,
    stats: SharedStats,
}

fn start_engine(policy: Policy) -> Running {
    let rules = Arc::new(RuleStore::new());
    let stats: SharedStats = Arc::new(PipelineStats::new());
    let (engine, events) = Engine::new(
        policy,
        rules.clone(),
        Box::new(MemorySessionRepository::default()),
        Arc::new(ManualClock::new(Utc::now())),
        stats.clone(),
    );
    let (handle, _task) = engine.spawn(32);
    Running {
        handle,
        events,
        rules,
        stats,
    }
}

/// Wait up to `limit` for the next engine event.
async fn next_event(events: &Receiver<EngineEvent>, limit: Duration) -> Option<EngineEvent> {
    let deadline = Instant::now() + limit;
    loop {
        if let Ok(event) = events.try_recv() {
            return Some(event);
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until the engine has applied everything sent so far.
async fn settle(handle: &EngineHandle) {
    // A no-op input; once it is processed, everything before it is too.
    handle
        .send(EngineInput::DismissSuggestion(heuristic(0, CODING, 0)))
        .await;
    tokio::time::sleep(Duration::from_millis(20)).await;
}

fn heuristic(seq: u64, activity: ActivityId, confidence: u8) -> Suggestion {
    Suggestion::new(
        seq,
        activity,
        confidence,
        SuggestionSource::Heuristic,
        "editor - main.py",
    )
}

#[tokio::test]
async fn test_scenario_a_confident_suggestion_switches_and_starts() {
    let run = start_engine(auto_policy());

    run.handle
        .send(EngineInput::Suggestion(heuristic(1, CODING, 72)))
        .await;

    let wait = Duration::from_secs(2);
    assert_eq!(
        next_event(&run.events, wait).await,
        Some(EngineEvent::SwitchCommand(CODING))
    );
    assert_eq!(
        next_event(&run.events, wait).await,
        Some(EngineEvent::StartCommand(CODING))
    );

    settle(&run.handle).await;
    let snapshot = run.handle.snapshot();
    assert_eq!(snapshot.state(), TimerState::Running);
    assert_eq!(snapshot.live_activity(), Some(CODING));
}

#[tokio::test]
async fn test_scenario_b_low_confidence_goes_to_manual_queue() {
    let run = start_engine(auto_policy());

    run.handle
        .send(EngineInput::Suggestion(heuristic(1, CODING, 50)))
        .await;

    match next_event(&run.events, Duration::from_secs(2)).await {
        Some(EngineEvent::ManualSuggestion { suggestion, reason }) => {
            assert_eq!(suggestion.activity_id, CODING);
            assert_eq!(reason, ManualReason::BelowThreshold);
        }
        other => panic!("expected a manual suggestion, got {other:?}"),
    }
    assert_eq!(next_event(&run.events, Duration::from_millis(100)).await, None);

    settle(&run.handle).await;
    assert_eq!(run.handle.snapshot().state(), TimerState::Idle);
}

#[tokio::test]
async fn test_scenario_c_running_session_is_never_switched() {
    let run = start_engine(auto_policy());
    let wait = Duration::from_secs(2);

    run.handle.send(EngineInput::Start(WRITING)).await;
    assert_eq!(
        next_event(&run.events, wait).await,
        Some(EngineEvent::StartCommand(WRITING))
    );

    run.handle
        .send(EngineInput::Suggestion(heuristic(1, CODING, 90)))
        .await;
    match next_event(&run.events, wait).await {
        Some(EngineEvent::ManualSuggestion { suggestion, reason }) => {
            assert_eq!(suggestion.activity_id, CODING);
            assert_eq!(reason, ManualReason::SessionRunning);
        }
        other => panic!("expected a manual suggestion, got {other:?}"),
    }

    settle(&run.handle).await;
    let snapshot = run.handle.snapshot();
    assert_eq!(snapshot.state(), TimerState::Running);
    assert_eq!(snapshot.live_activity(), Some(WRITING));
    assert_eq!(run.stats.snapshot().switch_commands, 0);
}

#[tokio::test]
async fn test_rule_round_trip_through_dispatcher() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.json");
    let stats: SharedStats = Arc::new(PipelineStats::new());

    let rules = Arc::new(
        RuleStore::with_repository(Box::new(JsonRuleRepository::new(path.clone()))).unwrap(),
    );
    let dispatcher = ClassifierDispatcher::new(rules.clone(), Arc::new(activities()), stats);

    rules.upsert("Quarterly Report - Notes", READING).unwrap();
    let s = dispatcher
        .classify(&WindowObservation::new("quarterly report - notes"))
        .await
        .unwrap();
    assert_eq!(s.activity_id, READING);
    assert_eq!(s.confidence, 100);
    assert_eq!(s.source, SuggestionSource::Rule);

    // Survives a restart.
    let reloaded = RuleStore::with_repository(Box::new(JsonRuleRepository::new(path))).unwrap();
    assert_eq!(reloaded.lookup("QUARTERLY REPORT - NOTES"), Some(READING));
}

#[tokio::test]
async fn test_always_map_feeds_back_into_rules() {
    let run = start_engine(Policy::default());
    let dispatcher = ClassifierDispatcher::new(
        run.rules.clone(),
        Arc::new(activities()),
        run.stats.clone(),
    );

    run.handle
        .send(EngineInput::AlwaysMap(heuristic(1, CODING, 40)))
        .await;
    settle(&run.handle).await;

    let s = dispatcher
        .classify(&WindowObservation::new("Editor - main.py"))
        .await
        .unwrap();
    assert_eq!(s.source, SuggestionSource::Rule);
    assert_eq!(s.activity_id, CODING);
}

/// Remote fake whose delay and answer depend on the title.
struct ScriptedRemote {
    calls: AtomicUsize,
}

#[async_trait]
impl RemoteClassifier for ScriptedRemote {
    async fn classify(
        &self,
        title: &str,
        _activities: &[Activity],
        _timeout: Duration,
    ) -> Result<Option<RemoteVerdict>, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let title = title.to_lowercase();
        if title.contains("hang") {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if title.contains("slow") {
            tokio::time::sleep(Duration::from_millis(300)).await;
            return Ok(Some(RemoteVerdict {
                activity_id: READING,
                confidence: 95,
            }));
        }
        Ok(Some(RemoteVerdict {
            activity_id: CODING,
            confidence: 90,
        }))
    }
}

fn scripted_remote() -> Arc<ScriptedRemote> {
    Arc::new(ScriptedRemote {
        calls: AtomicUsize::new(0),
    })
}

#[tokio::test]
async fn test_deadline_bounds_dispatcher_latency() {
    let timeout = Duration::from_millis(300);
    let dispatcher = ClassifierDispatcher::new(
        Arc::new(RuleStore::new()),
        Arc::new(activities()),
        Arc::new(PipelineStats::new()),
    )
    .with_remote(scripted_remote(), timeout);

    let started = Instant::now();
    let s = dispatcher
        .classify(&WindowObservation::new("hang - Editor - main.py"))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(s.source, SuggestionSource::Heuristic);
    assert_eq!(s.activity_id, CODING);
    assert!(elapsed + Duration::from_millis(5) >= timeout);
    assert!(
        elapsed < timeout + Duration::from_millis(250),
        "took {elapsed:?}"
    );
}

#[tokio::test]
async fn test_stale_remote_answer_never_reaches_engine() {
    let run = start_engine(Policy {
        start_timer_on_switch: false,
        ..auto_policy()
    });
    let remote = scripted_remote();
    let dispatcher = Arc::new(
        ClassifierDispatcher::new(
            Arc::new(RuleStore::new()),
            Arc::new(activities()),
            run.stats.clone(),
        )
        .with_remote(remote.clone(), Duration::from_secs(2)),
    );

    let (tx, rx) = mpsc::channel(8);
    let dispatch_task = tokio::spawn(dispatcher.clone().run(rx, run.handle.sender()));

    // The slow answer for the first title arrives after the second title.
    tx.send(WindowObservation::new("slow - report.pdf")).await.unwrap();
    tx.send(WindowObservation::new("Editor - main.py")).await.unwrap();

    assert_eq!(
        next_event(&run.events, Duration::from_secs(2)).await,
        Some(EngineEvent::SwitchCommand(CODING))
    );
    assert_eq!(next_event(&run.events, Duration::from_millis(600)).await, None);

    assert_eq!(remote.calls.load(Ordering::SeqCst), 2);
    assert_eq!(run.stats.snapshot().stale_discards, 1);
    assert_eq!(run.handle.snapshot().selected_activity, Some(CODING));

    drop(tx);
    dispatch_task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_observer_to_timer_end_to_end() {
    let rules = Arc::new(RuleStore::new());
    let stats: SharedStats = Arc::new(PipelineStats::new());
    let (engine, events) = Engine::new(
        auto_policy(),
        rules.clone(),
        Box::new(MemorySessionRepository::default()),
        Arc::new(SystemClock),
        stats.clone(),
    );
    let (handle, _engine_task) = engine.spawn(32);

    let dispatcher = Arc::new(ClassifierDispatcher::new(
        rules,
        Arc::new(activities()),
        stats.clone(),
    ));
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(dispatcher.run(rx, handle.sender()));

    // Window flickers once, then settles on the editor.
    let mut polls = vec!["Start Menu", "Editor - main.py"].into_iter();
    let api = move || -> Result<Option<String>, PlatformError> {
        Ok(Some(polls.next().unwrap_or("Editor - main.py").to_string()))
    };

    let mut observer = WindowObserver::new(
        ObserverConfig {
            poll_interval: Duration::from_millis(10),
            debounce_polls: 2,
            min_title_len: 2,
        },
        AutoDetectToggle::new(true),
    );
    observer.start(api, tx).unwrap();

    let wait = Duration::from_secs(3);
    assert_eq!(
        next_event(&events, wait).await,
        Some(EngineEvent::SwitchCommand(CODING))
    );
    assert_eq!(
        next_event(&events, wait).await,
        Some(EngineEvent::StartCommand(CODING))
    );
    observer.stop();

    settle(&handle).await;
    assert_eq!(handle.snapshot().state(), TimerState::Running);
    // Only the stable title was classified.
    assert_eq!(stats.snapshot().observations, 1);
}
