//! Collaborator repositories: activities, title rules and finished sessions.
//!
//! The engine only talks to the traits. In-memory versions back tests and
//! embedding; the JSON-file versions back the CLI and live under the
//! configured data directory.

use crate::classify::types::{Activity, ActivityId};
use crate::engine::timer::TimerSession;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Repository errors.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Repository unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        RepositoryError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A user-confirmed exact title to activity mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleMapping {
    /// Unique, case-insensitive key
    pub normalized_title: String,
    pub activity_id: ActivityId,
    pub created_at: DateTime<Utc>,
}

/// Read-only source of activities.
pub trait ActivityRepository: Send + Sync {
    fn list_activities(&self) -> Result<Vec<Activity>, RepositoryError>;
}

/// Backing store for title rules.
pub trait RuleRepository: Send {
    fn load_rules(&self) -> Result<Vec<RuleMapping>, RepositoryError>;
    fn upsert_rule(&mut self, rule: &RuleMapping) -> Result<(), RepositoryError>;
    fn delete_rule(&mut self, normalized_title: &str) -> Result<(), RepositoryError>;
}

/// Receiver of finalized timer sessions.
pub trait SessionRepository: Send {
    fn save_session(&mut self, session: &TimerSession) -> Result<(), RepositoryError>;
}

// ---------------------------------------------------------------------------
// In-memory implementations

/// Fixed list of activities.
#[derive(Debug, Clone, Default)]
pub struct MemoryActivityRepository {
    activities: Vec<Activity>,
}

impl MemoryActivityRepository {
    pub fn new(activities: Vec<Activity>) -> Self {
        Self { activities }
    }
}

impl ActivityRepository for MemoryActivityRepository {
    fn list_activities(&self) -> Result<Vec<Activity>, RepositoryError> {
        Ok(self.activities.clone())
    }
}

/// Shared in-memory rules. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryRuleRepository {
    rules: Arc<Mutex<BTreeMap<String, RuleMapping>>>,
}

impl RuleRepository for MemoryRuleRepository {
    fn load_rules(&self) -> Result<Vec<RuleMapping>, RepositoryError> {
        let rules = self.rules.lock().unwrap_or_else(|p| p.into_inner());
        Ok(rules.values().cloned().collect())
    }

    fn upsert_rule(&mut self, rule: &RuleMapping) -> Result<(), RepositoryError> {
        let mut rules = self.rules.lock().unwrap_or_else(|p| p.into_inner());
        rules.insert(rule.normalized_title.clone(), rule.clone());
        Ok(())
    }

    fn delete_rule(&mut self, normalized_title: &str) -> Result<(), RepositoryError> {
        let mut rules = self.rules.lock().unwrap_or_else(|p| p.into_inner());
        rules.remove(normalized_title);
        Ok(())
    }
}

/// Shared in-memory session log. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionRepository {
    sessions: Arc<Mutex<Vec<TimerSession>>>,
}

impl MemorySessionRepository {
    pub fn sessions(&self) -> Vec<TimerSession> {
        self.sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl SessionRepository for MemorySessionRepository {
    fn save_session(&mut self, session: &TimerSession) -> Result<(), RepositoryError> {
        self.sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(session.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON file implementations

fn read_json_or_default<T>(path: &Path) -> Result<T, RepositoryError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let content = fs::read_to_string(path).map_err(|e| RepositoryError::io(path, e))?;
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(&content)?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), RepositoryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| RepositoryError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    // Write to a sibling and rename so a crash never leaves a truncated file.
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| RepositoryError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| RepositoryError::io(path, e))
}

/// Activities stored as a JSON array.
#[derive(Debug, Clone)]
pub struct JsonActivityRepository {
    path: PathBuf,
}

impl JsonActivityRepository {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append a new activity, assigning the next free id.
    pub fn add_activity(
        &self,
        name: &str,
        tags: Vec<String>,
    ) -> Result<Activity, RepositoryError> {
        let mut activities: Vec<Activity> = read_json_or_default(&self.path)?;
        let next_id = activities.iter().map(|a| a.id.0).max().unwrap_or(0) + 1;
        let activity = Activity::new(next_id, name).with_tags(tags);
        activities.push(activity.clone());
        write_json(&self.path, &activities)?;
        Ok(activity)
    }
}

impl ActivityRepository for JsonActivityRepository {
    fn list_activities(&self) -> Result<Vec<Activity>, RepositoryError> {
        read_json_or_default(&self.path)
    }
}

/// Rules stored as a JSON array, rewritten on every change.
#[derive(Debug, Clone)]
pub struct JsonRuleRepository {
    path: PathBuf,
}

impl JsonRuleRepository {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl RuleRepository for JsonRuleRepository {
    fn load_rules(&self) -> Result<Vec<RuleMapping>, RepositoryError> {
        read_json_or_default(&self.path)
    }

    fn upsert_rule(&mut self, rule: &RuleMapping) -> Result<(), RepositoryError> {
        let mut rules = self.load_rules()?;
        rules.retain(|r| r.normalized_title != rule.normalized_title);
        rules.push(rule.clone());
        write_json(&self.path, &rules)
    }

    fn delete_rule(&mut self, normalized_title: &str) -> Result<(), RepositoryError> {
        let mut rules = self.load_rules()?;
        rules.retain(|r| r.normalized_title != normalized_title);
        write_json(&self.path, &rules)
    }
}

/// Finished sessions appended as JSON lines.
#[derive(Debug, Clone)]
pub struct JsonSessionRepository {
    path: PathBuf,
}

impl JsonSessionRepository {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Read every stored session, skipping unreadable lines.
    pub fn load_sessions(&self) -> Result<Vec<TimerSession>, RepositoryError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path).map_err(|e| RepositoryError::io(&self.path, e))?;
        let sessions = BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect();
        Ok(sessions)
    }
}

impl SessionRepository for JsonSessionRepository {
    fn save_session(&mut self, session: &TimerSession) -> Result<(), RepositoryError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| RepositoryError::io(parent, e))?;
        }
        let line = serde_json::to_string(session)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| RepositoryError::io(&self.path, e))?;
        writeln!(file, "{line}").map_err(|e| RepositoryError::io(&self.path, e))
    }
}
