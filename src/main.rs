//! Activity Autoswitch CLI
//!
//! Watches the foreground window and switches the tracked activity.

use activity_autoswitch::{
    classify::ClassifierDispatcher,
    config::{resolve_api_key, Config},
    engine::{Engine, EngineEvent, EngineHandle, EngineInput, SystemClock, TimerState},
    logging,
    observer::{check_permission, AutoDetectToggle, PlatformWindowApi, WindowObserver},
    remote::{redact, GeminiClassifier},
    repository::{
        ActivityRepository, JsonActivityRepository, JsonRuleRepository, JsonSessionRepository,
        RuleRepository,
    },
    Activity, ActivityId, PipelineStats, RuleStore, SharedStats, Suggestion, WindowObservation,
    VERSION,
};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "autoswitch")]
#[command(version = VERSION)]
#[command(about = "Classify the foreground window and switch the tracked activity", long_about = None)]
struct Cli {
    /// Log level for this crate (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine in the foreground until Ctrl+C
    Run {
        /// Remote classifier API key (defaults to AUTOSWITCH_API_KEY)
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Classify a single title and print the suggestion
    Classify {
        title: String,

        /// Remote classifier API key (defaults to AUTOSWITCH_API_KEY)
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Manage exact title rules
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },

    /// Manage activities
    Activities {
        #[command(subcommand)]
        action: ActivitiesAction,
    },

    /// Turn window polling on or off, including for a running engine
    AutoDetect {
        #[arg(value_enum)]
        state: Toggle,
    },

    /// Show current status and statistics
    Status,

    /// Show configuration
    Config,
}

#[derive(Subcommand)]
enum RulesAction {
    /// List all rules
    List,
    /// Map a title to an activity (id or name)
    Add { title: String, activity: String },
    /// Remove the rule for a title
    Remove { title: String },
}

#[derive(Subcommand)]
enum ActivitiesAction {
    /// List all activities
    List,
    /// Add an activity
    Add {
        name: String,
        /// Comma-separated tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level.as_deref(), cli.log_file.as_deref())
        .context("Failed to initialise logging")?;

    match cli.command {
        Commands::Run { api_key } => cmd_run(api_key),
        Commands::Classify { title, api_key } => cmd_classify(&title, api_key),
        Commands::Rules { action } => cmd_rules(action),
        Commands::Activities { action } => cmd_activities(action),
        Commands::AutoDetect { state } => cmd_auto_detect(state),
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
    }
}

fn load_config() -> Result<Config> {
    let config = Config::load().context("Failed to load configuration")?;
    config
        .ensure_directories()
        .context("Failed to create data directory")?;
    Ok(config)
}

fn open_rules(config: &Config) -> Result<Arc<RuleStore>> {
    let repository = JsonRuleRepository::new(config.rules_path());
    let store = RuleStore::with_repository(Box::new(repository)).context("Failed to load rules")?;
    Ok(Arc::new(store))
}

/// Build the dispatcher, adding the remote tier when a key is available.
fn build_dispatcher(
    config: &Config,
    rules: Arc<RuleStore>,
    stats: SharedStats,
    api_key: Option<String>,
) -> Result<ClassifierDispatcher> {
    let activities = JsonActivityRepository::new(config.activities_path());
    let dispatcher = ClassifierDispatcher::new(rules, Arc::new(activities), stats);

    match resolve_api_key(api_key) {
        Some(key) => {
            info!(api_key = %redact(Some(&key)), "remote classifier enabled");
            let remote = GeminiClassifier::new(config.remote.clone(), key)
                .context("Failed to create remote classifier")?;
            Ok(dispatcher.with_remote(Arc::new(remote), config.remote.timeout))
        }
        None => {
            info!("no API key, remote classifier disabled");
            Ok(dispatcher)
        }
    }
}

fn activity_label(activities: &[Activity], id: ActivityId) -> String {
    activities
        .iter()
        .find(|a| a.id == id)
        .map(|a| format!("{} (#{})", a.name, a.id))
        .unwrap_or_else(|| format!("#{id}"))
}

/// Accept either a numeric id or a case-insensitive name.
fn resolve_activity(activities: &[Activity], key: &str) -> Result<ActivityId> {
    if let Ok(id) = key.parse::<i64>() {
        if activities.iter().any(|a| a.id.0 == id) {
            return Ok(ActivityId(id));
        }
    }
    activities
        .iter()
        .find(|a| a.name.eq_ignore_ascii_case(key.trim()))
        .map(|a| a.id)
        .ok_or_else(|| anyhow!("Unknown activity: {key}"))
}

fn cmd_run(api_key: Option<String>) -> Result<()> {
    println!("Activity Autoswitch v{VERSION}");
    println!();

    if !check_permission() {
        eprintln!("Warning: the foreground window API is not accessible.");
        eprintln!("Window titles will not be observed; manual commands still work.");
    }

    let config = load_config()?;
    let activity_repo = JsonActivityRepository::new(config.activities_path());
    let activities = activity_repo.list_activities()?;
    if activities.is_empty() {
        eprintln!("Warning: no activities defined. Add some with `autoswitch activities add`.");
    }

    let stats: SharedStats = Arc::new(PipelineStats::with_persistence(config.stats_path()));
    let rules = open_rules(&config)?;
    let dispatcher = build_dispatcher(&config, rules.clone(), stats.clone(), api_key)?;

    println!("  Classifiers: {}", tier_names(&dispatcher));
    println!(
        "  Auto switch: {} (threshold {}, start timer: {})",
        on_off(config.auto_switch_enabled),
        config.confidence_threshold,
        on_off(config.start_timer_on_switch)
    );
    println!("  Auto detect: {}", on_off(config.auto_detect_enabled));
    println!("  Poll interval: {}ms", config.poll_interval.as_millis());
    println!();
    println!("Commands: accept | map | dismiss | start <activity> | select <activity> | pause | resume | stop");
    println!("Press Ctrl+C to quit");
    println!();

    let (engine, events) = Engine::new(
        config.policy(),
        rules,
        Box::new(JsonSessionRepository::new(config.sessions_path())),
        Arc::new(SystemClock),
        stats.clone(),
    );

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(async {
        let (handle, engine_task) = engine.spawn(64);
        let (observation_tx, observation_rx) = mpsc::channel(16);
        let dispatcher_task =
            tokio::spawn(Arc::new(dispatcher).run(observation_rx, handle.sender()));

        let toggle = AutoDetectToggle::new(config.auto_detect_enabled);
        let mut observer = WindowObserver::new(config.observer_config(), toggle.clone());
        observer
            .start(PlatformWindowApi::new(), observation_tx)
            .context("Failed to start window observer")?;

        let last_manual: Arc<Mutex<Option<Suggestion>>> = Arc::new(Mutex::new(None));
        let printer = spawn_event_printer(events, activities.clone(), last_manual.clone());
        spawn_command_reader(&handle, activities, last_manual);

        // Reload config periodically so `autoswitch auto-detect` and edits
        // to config.json reach the running engine.
        let mut last_config_check = Instant::now();
        while running.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if last_config_check.elapsed() < Duration::from_secs(1) {
                continue;
            }
            last_config_check = Instant::now();
            match Config::load() {
                Ok(cfg) => {
                    if cfg.auto_detect_enabled != toggle.is_enabled() {
                        println!(
                            "Auto detect {}",
                            if cfg.auto_detect_enabled { "resumed" } else { "paused" }
                        );
                        toggle.set(cfg.auto_detect_enabled);
                    }
                    handle.send(EngineInput::UpdatePolicy(cfg.policy())).await;
                }
                Err(e) => warn!(error = %e, "could not reload configuration"),
            }
        }

        println!();
        println!("Shutting down...");
        observer.stop();

        // Finalize a live session so it is saved rather than lost.
        if handle.snapshot().state().is_live() {
            handle.send(EngineInput::Stop).await;
        }
        drop(handle);

        let grace = config.remote.timeout + Duration::from_secs(1);
        if tokio::time::timeout(grace, dispatcher_task).await.is_err() {
            warn!("dispatcher did not stop in time");
        }
        let engine_stopped = match tokio::time::timeout(grace, engine_task).await {
            Ok(Ok(engine)) => {
                if !engine.pending_sessions().is_empty() {
                    eprintln!(
                        "Warning: {} session(s) could not be saved",
                        engine.pending_sessions().len()
                    );
                }
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, "engine task failed");
                true
            }
            Err(_) => {
                warn!("engine did not stop in time");
                false
            }
        };
        // The printer ends once the engine, and with it the event sender, is gone.
        if engine_stopped {
            let _ = printer.join();
        }
        Ok::<(), anyhow::Error>(())
    })?;

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save statistics: {e}");
    }
    println!();
    println!("{}", stats.summary());
    Ok(())
}

fn tier_names(dispatcher: &ClassifierDispatcher) -> String {
    dispatcher
        .tiers()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

/// Print engine events until the engine goes away.
fn spawn_event_printer(
    events: crossbeam_channel::Receiver<EngineEvent>,
    activities: Vec<Activity>,
    last_manual: Arc<Mutex<Option<Suggestion>>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for event in events.iter() {
            let now = chrono::Local::now().format("%H:%M:%S");
            match event {
                EngineEvent::SwitchCommand(id) => {
                    println!("[{now}] Switched to {}", activity_label(&activities, id));
                }
                EngineEvent::StartCommand(id) => {
                    println!("[{now}] Timer started for {}", activity_label(&activities, id));
                }
                EngineEvent::ManualSuggestion { suggestion, reason } => {
                    println!(
                        "[{now}] Suggestion: {} ({}%, {}) - {reason}. Type accept, map or dismiss.",
                        activity_label(&activities, suggestion.activity_id),
                        suggestion.confidence,
                        suggestion.source,
                    );
                    *last_manual.lock().unwrap_or_else(|p| p.into_inner()) = Some(suggestion);
                }
                EngineEvent::RuleCreated { title, activity_id } => {
                    println!(
                        "[{now}] Rule saved: '{title}' -> {}",
                        activity_label(&activities, activity_id)
                    );
                }
                EngineEvent::SessionStopped { session, persisted } => {
                    let minutes = session.total_duration_ms.unwrap_or(0) as f64 / 60_000.0;
                    println!(
                        "[{now}] Session stopped after {minutes:.1} min{}",
                        if persisted { "" } else { " (save pending)" }
                    );
                }
            }
        }
    })
}

/// Read manual commands from stdin and forward them to the engine.
fn spawn_command_reader(
    handle: &EngineHandle,
    activities: Vec<Activity>,
    last_manual: Arc<Mutex<Option<Suggestion>>>,
) {
    // Weak, so a reader blocked on stdin never keeps the engine alive.
    let sender = handle.sender().downgrade();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines().map_while(Result::ok) {
            let mut parts = line.trim().splitn(2, ' ');
            let command = parts.next().unwrap_or("").to_lowercase();
            let argument = parts.next().unwrap_or("").trim();

            let take_manual = || last_manual.lock().unwrap_or_else(|p| p.into_inner()).take();
            let input = match command.as_str() {
                "" => continue,
                "pause" => Some(EngineInput::Pause),
                "resume" => Some(EngineInput::Resume),
                "stop" => Some(EngineInput::Stop),
                "accept" => take_manual().map(EngineInput::AcceptSuggestion),
                "map" => take_manual().map(EngineInput::AlwaysMap),
                "dismiss" => take_manual().map(EngineInput::DismissSuggestion),
                "start" | "select" => match resolve_activity(&activities, argument) {
                    Ok(id) if command == "start" => Some(EngineInput::Start(id)),
                    Ok(id) => Some(EngineInput::SelectActivity(id)),
                    Err(e) => {
                        eprintln!("{e}");
                        continue;
                    }
                },
                other => {
                    eprintln!("Unknown command: {other}");
                    continue;
                }
            };

            match input {
                Some(input) => {
                    let Some(sender) = sender.upgrade() else {
                        break;
                    };
                    if sender.blocking_send(input).is_err() {
                        break;
                    }
                }
                None => eprintln!("No pending suggestion"),
            }
        }
    });
}

fn cmd_classify(title: &str, api_key: Option<String>) -> Result<()> {
    let config = load_config()?;
    let activities = JsonActivityRepository::new(config.activities_path()).list_activities()?;
    let stats: SharedStats = Arc::new(PipelineStats::new());
    let dispatcher = build_dispatcher(&config, open_rules(&config)?, stats, api_key)?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let suggestion = runtime.block_on(dispatcher.classify(&WindowObservation::new(title)));

    match suggestion {
        Some(s) => {
            println!(
                "{} ({}%, source: {})",
                activity_label(&activities, s.activity_id),
                s.confidence,
                s.source
            );
            println!("{}", serde_json::to_string_pretty(&s)?);
        }
        None => println!("No suggestion for this title."),
    }
    Ok(())
}

fn cmd_rules(action: RulesAction) -> Result<()> {
    let config = load_config()?;
    let rules = open_rules(&config)?;
    let activities = JsonActivityRepository::new(config.activities_path()).list_activities()?;

    match action {
        RulesAction::List => {
            let all = rules.list();
            if all.is_empty() {
                println!("No rules defined.");
            }
            for rule in all {
                println!(
                    "{:<50} -> {}",
                    rule.normalized_title,
                    activity_label(&activities, rule.activity_id)
                );
            }
        }
        RulesAction::Add { title, activity } => {
            if title.trim().is_empty() {
                bail!("Title must not be empty");
            }
            let id = resolve_activity(&activities, &activity)?;
            rules.upsert(&title, id)?;
            println!("Mapped '{}' to {}", title.trim(), activity_label(&activities, id));
        }
        RulesAction::Remove { title } => {
            if rules.delete(&title)? {
                println!("Removed rule for '{}'", title.trim());
            } else {
                println!("No rule for '{}'", title.trim());
            }
        }
    }
    Ok(())
}

fn cmd_activities(action: ActivitiesAction) -> Result<()> {
    let config = load_config()?;
    let repo = JsonActivityRepository::new(config.activities_path());

    match action {
        ActivitiesAction::List => {
            let activities = repo.list_activities()?;
            if activities.is_empty() {
                println!("No activities defined.");
            }
            for a in activities {
                let tags: Vec<&str> = a.tags.iter().map(String::as_str).collect();
                println!("#{:<4} {:<24} {}", a.id, a.name, tags.join(", "));
            }
        }
        ActivitiesAction::Add { name, tags } => {
            let name = name.trim();
            if name.is_empty() {
                bail!("Activity name must not be empty");
            }
            if resolve_activity(&repo.list_activities()?, name).is_ok() {
                bail!("Activity already exists: {name}");
            }
            let tags = tags
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
            let activity = repo.add_activity(name, tags)?;
            println!("Added activity #{} {}", activity.id, activity.name);
        }
    }
    Ok(())
}

fn cmd_auto_detect(state: Toggle) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    config.auto_detect_enabled = matches!(state, Toggle::On);
    config.save().context("Failed to save configuration")?;
    println!("Auto detect {}.", on_off(config.auto_detect_enabled));
    Ok(())
}

fn cmd_status() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    println!("Activity Autoswitch Status");
    println!("==========================");
    println!();
    println!(
        "Foreground window access: {}",
        if check_permission() {
            "Available ✓"
        } else {
            "Unavailable ✗"
        }
    );
    println!(
        "Remote classifier: {}",
        match resolve_api_key(None) {
            Some(key) => format!("configured ({})", redact(Some(&key))),
            None => "not configured".to_string(),
        }
    );
    println!();

    println!("Configuration:");
    println!("  Auto detect: {}", on_off(config.auto_detect_enabled));
    println!("  Auto switch: {}", on_off(config.auto_switch_enabled));
    println!("  Confidence threshold: {}", config.confidence_threshold);
    println!("  Start timer on switch: {}", on_off(config.start_timer_on_switch));
    println!();

    let activities = JsonActivityRepository::new(config.activities_path()).list_activities()?;
    let rules = JsonRuleRepository::new(config.rules_path());
    let rule_count = rules.load_rules()?.len();
    println!("Activities: {}", activities.len());
    println!("Rules: {rule_count}");

    let sessions = JsonSessionRepository::new(config.sessions_path()).load_sessions()?;
    println!("Saved sessions: {}", sessions.len());
    if let Some(last) = sessions.iter().rev().find(|s| s.state == TimerState::Stopped) {
        let label = last
            .activity_id
            .map(|id| activity_label(&activities, id))
            .unwrap_or_else(|| "no activity".to_string());
        println!(
            "  Last: {label}, {:.1} min",
            last.total_duration_ms.unwrap_or(0) as f64 / 60_000.0
        );
    }
    println!();

    if config.stats_path().exists() {
        println!("{}", PipelineStats::with_persistence(config.stats_path()).summary());
    } else {
        println!("No previous run statistics found.");
    }
    Ok(())
}

fn cmd_config() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")
}
