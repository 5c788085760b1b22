//! The polling loop that turns foreground-window titles into observations.
//!
//! The loop runs on its own thread so a slow platform call never stalls the
//! async runtime or a UI thread. Confirmed changes are pushed, in order, into
//! a tokio channel for the single dispatcher consuming them. A full channel
//! is retried once per poll interval and never blocks a stop request.

use crate::observer::debounce::{DebounceOutcome, Debouncer};
use crate::observer::types::{normalize_title, ForegroundWindowApi, PlatformError, WindowObservation};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Observer tuning.
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    pub poll_interval: Duration,
    pub debounce_polls: u32,
    /// Titles shorter than this (after trimming) are ignored.
    pub min_title_len: usize,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(700),
            debounce_polls: 2,
            min_title_len: 2,
        }
    }
}

/// Errors from controlling the observer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObserverError {
    #[error("observer is already running")]
    AlreadyRunning,
    #[error("failed to spawn observer thread: {0}")]
    Spawn(String),
}

/// Shared on/off switch for polling, backed by the auto-detect setting.
#[derive(Debug, Clone)]
pub struct AutoDetectToggle(Arc<AtomicBool>);

impl AutoDetectToggle {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Foreground-window observer.
pub struct WindowObserver {
    config: ObserverConfig,
    toggle: AutoDetectToggle,
    running: Arc<AtomicBool>,
    inert: Arc<AtomicBool>,
    stop_tx: Option<Sender<()>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl WindowObserver {
    pub fn new(config: ObserverConfig, toggle: AutoDetectToggle) -> Self {
        Self {
            config,
            toggle,
            running: Arc::new(AtomicBool::new(false)),
            inert: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            thread_handle: None,
        }
    }

    /// Start polling `api` on a background thread.
    ///
    /// Observations are sent on `sender`. The thread exits when [`stop`] is
    /// called, when the receiving side is dropped, or when the platform turns
    /// out to be unsupported.
    ///
    /// [`stop`]: WindowObserver::stop
    pub fn start<A: ForegroundWindowApi>(
        &mut self,
        api: A,
        sender: mpsc::Sender<WindowObservation>,
    ) -> Result<(), ObserverError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(ObserverError::AlreadyRunning);
        }
        if self.inert.load(Ordering::SeqCst) {
            debug!("observer is inert; not starting poll loop");
            return Ok(());
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let worker = PollWorker {
            config: self.config.clone(),
            toggle: self.toggle.clone(),
            inert: self.inert.clone(),
            debouncer: Debouncer::new(self.config.debounce_polls),
        };
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("window-observer".to_string())
            .spawn(move || {
                worker.run(api, sender, stop_rx);
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                ObserverError::Spawn(e.to_string())
            })?;

        self.stop_tx = Some(stop_tx);
        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop polling and join the thread.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// True once the platform reported it cannot supply window titles.
    pub fn is_inert(&self) -> bool {
        self.inert.load(Ordering::SeqCst)
    }

    pub fn toggle(&self) -> &AutoDetectToggle {
        &self.toggle
    }
}

impl Drop for WindowObserver {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PollWorker {
    config: ObserverConfig,
    toggle: AutoDetectToggle,
    inert: Arc<AtomicBool>,
    debouncer: Debouncer,
}

impl PollWorker {
    fn run<A: ForegroundWindowApi>(
        mut self,
        mut api: A,
        sender: mpsc::Sender<WindowObservation>,
        stop_rx: crossbeam_channel::Receiver<()>,
    ) {
        info!(
            interval_ms = self.config.poll_interval.as_millis() as u64,
            debounce_polls = self.debouncer.required_polls(),
            "window observer started"
        );
        let mut was_enabled = true;

        loop {
            match stop_rx.recv_timeout(self.config.poll_interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            if !self.toggle.is_enabled() {
                if was_enabled {
                    debug!("auto-detect disabled; polling suspended");
                    self.debouncer.reset_candidate();
                    was_enabled = false;
                }
                continue;
            }
            if !was_enabled {
                debug!("auto-detect enabled; polling resumed");
                was_enabled = true;
            }

            match api.foreground_title() {
                Ok(Some(raw)) => {
                    if let Some(observation) = self.process_title(raw) {
                        if !self.deliver(&sender, observation, &stop_rx) {
                            break;
                        }
                    }
                }
                Ok(None) => {}
                Err(PlatformError::Unavailable(reason)) => {
                    warn!(%reason, "foreground window API unavailable; auto-detect is inert");
                    self.inert.store(true, Ordering::SeqCst);
                    break;
                }
                Err(err @ PlatformError::QueryFailed(_)) => {
                    debug!(error = %err, "foreground window poll failed");
                }
            }
        }

        info!("window observer stopped");
    }

    /// Send one observation, waiting out a full channel without missing a
    /// stop request. Returns false when the loop should exit.
    fn deliver(
        &self,
        sender: &mpsc::Sender<WindowObservation>,
        mut observation: WindowObservation,
        stop_rx: &crossbeam_channel::Receiver<()>,
    ) -> bool {
        loop {
            match sender.try_send(observation) {
                Ok(()) => return true,
                Err(TrySendError::Closed(_)) => {
                    debug!("observation receiver dropped; observer exiting");
                    return false;
                }
                Err(TrySendError::Full(back)) => {
                    observation = back;
                    match stop_rx.recv_timeout(self.config.poll_interval) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => return false,
                        Err(RecvTimeoutError::Timeout) => {
                            debug!("observation channel full; retrying");
                        }
                    }
                }
            }
        }
    }

    fn process_title(&mut self, raw: String) -> Option<WindowObservation> {
        if raw.trim().chars().count() < self.config.min_title_len.max(1) {
            return None;
        }
        let normalized = normalize_title(&raw);
        match self.debouncer.observe(&normalized) {
            DebounceOutcome::Confirmed(_) => {
                debug!(title = %normalized, "foreground title confirmed");
                Some(WindowObservation::new(raw))
            }
            DebounceOutcome::Pending | DebounceOutcome::Unchanged => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn fast_config(debounce_polls: u32) -> ObserverConfig {
        ObserverConfig {
            poll_interval: Duration::from_millis(5),
            debounce_polls,
            min_title_len: 2,
        }
    }

    /// Replays a fixed script, then repeats the last entry forever.
    fn scripted(titles: &[&str]) -> impl ForegroundWindowApi {
        let script: Mutex<VecDeque<String>> =
            Mutex::new(titles.iter().map(|t| t.to_string()).collect());
        let last = Mutex::new(String::new());
        move || -> Result<Option<String>, PlatformError> {
            let mut script = script.lock().unwrap();
            let mut last = last.lock().unwrap();
            if let Some(next) = script.pop_front() {
                *last = next;
            }
            Ok(Some(last.clone()))
        }
    }

    #[test]
    fn test_worker_filters_short_titles() {
        let mut worker = PollWorker {
            config: fast_config(1),
            toggle: AutoDetectToggle::new(true),
            inert: Arc::new(AtomicBool::new(false)),
            debouncer: Debouncer::new(1),
        };
        assert!(worker.process_title(" x ".to_string()).is_none());
        let obs = worker.process_title("Editor - main.py".to_string()).unwrap();
        assert_eq!(obs.normalized_title, "editor - main.py");
        assert!(worker.process_title("EDITOR - main.py ".to_string()).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_observer_emits_only_stable_titles() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut observer = WindowObserver::new(fast_config(3), AutoDetectToggle::new(true));
        observer
            .start(scripted(&["Editor", "Editor", "Editor", "Popup", "Editor", "Browser"]), tx)
            .unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.normalized_title, "editor");

        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        // "Popup" was seen for a single poll and must never be emitted.
        assert_eq!(second.normalized_title, "browser");

        observer.stop();
        assert!(!observer.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unavailable_platform_goes_inert() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let api = move || -> Result<Option<String>, PlatformError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(PlatformError::Unavailable("test".to_string()))
        };

        let (tx, mut rx) = mpsc::channel(4);
        let mut observer = WindowObserver::new(fast_config(1), AutoDetectToggle::new(true));
        observer.start(api, tx).unwrap();

        // The sender is dropped when the thread exits.
        let next = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert!(next.is_none());
        assert!(observer.is_inert());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!observer.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_disabled_observer_does_not_poll() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let api = move || -> Result<Option<String>, PlatformError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Some("Editor".to_string()))
        };

        let toggle = AutoDetectToggle::new(false);
        let (tx, mut rx) = mpsc::channel(4);
        let mut observer = WindowObserver::new(fast_config(1), toggle.clone());
        observer.start(api, tx).unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        toggle.set(true);
        let obs = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(obs.normalized_title, "editor");
        observer.stop();
    }

    #[test]
    fn test_stop_returns_while_channel_is_full() {
        let polls = AtomicUsize::new(0);
        let flapping = move || -> Result<Option<String>, PlatformError> {
            let n = polls.fetch_add(1, Ordering::SeqCst);
            let title = if n % 2 == 0 { "Editor" } else { "Browser" };
            Ok(Some(title.to_string()))
        };

        // Receiver stays alive but is never drained.
        let (tx, _rx) = mpsc::channel(1);
        let mut observer = WindowObserver::new(fast_config(1), AutoDetectToggle::new(true));
        observer.start(flapping, tx).unwrap();
        thread::sleep(Duration::from_millis(50));

        let started = std::time::Instant::now();
        observer.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!observer.is_running());
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let (tx, _rx) = mpsc::channel(4);
        let mut observer = WindowObserver::new(fast_config(1), AutoDetectToggle::new(false));
        let idle = || -> Result<Option<String>, PlatformError> { Ok(None) };
        observer.start(idle, tx.clone()).unwrap();
        assert_eq!(
            observer.start(idle, tx),
            Err(ObserverError::AlreadyRunning)
        );
        observer.stop();
    }
}
