//! Exact-match title rules.
//!
//! Reads take a cheap `Arc` clone of the current map and never wait on a
//! writer for more than the pointer swap. Writers are serialized through
//! their own mutex, build the next map off to the side and only then swap it
//! in, so the read lock is never held across persistence I/O.

use crate::classify::types::ActivityId;
use crate::observer::normalize_title;
use crate::repository::{RepositoryError, RuleMapping, RuleRepository};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

type RuleMap = HashMap<String, RuleMapping>;

/// Concurrent exact-match cache of normalized title to activity.
pub struct RuleStore {
    current: RwLock<Arc<RuleMap>>,
    writer: Mutex<Option<Box<dyn RuleRepository>>>,
}

impl RuleStore {
    /// An empty store with no backing repository.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(HashMap::new())),
            writer: Mutex::new(None),
        }
    }

    /// Load every mapping from `repository` and persist future writes to it.
    pub fn with_repository(repository: Box<dyn RuleRepository>) -> Result<Self, RepositoryError> {
        let mut map = HashMap::new();
        for rule in repository.load_rules()? {
            let key = normalize_title(&rule.normalized_title);
            map.insert(
                key.clone(),
                RuleMapping {
                    normalized_title: key,
                    ..rule
                },
            );
        }
        info!(rules = map.len(), "rule store loaded");

        Ok(Self {
            current: RwLock::new(Arc::new(map)),
            writer: Mutex::new(Some(repository)),
        })
    }

    fn snapshot(&self) -> Arc<RuleMap> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn swap(&self, next: RuleMap) {
        let next = Arc::new(next);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Look up the activity mapped to `title`. The title is normalized first.
    pub fn lookup(&self, title: &str) -> Option<ActivityId> {
        self.snapshot()
            .get(&normalize_title(title))
            .map(|rule| rule.activity_id)
    }

    /// Map `title` to `activity_id`, overwriting any existing mapping.
    pub fn upsert(&self, title: &str, activity_id: ActivityId) -> Result<(), RepositoryError> {
        let key = normalize_title(title);
        let mut writer = self.writer.lock().unwrap_or_else(|p| p.into_inner());

        let rule = RuleMapping {
            normalized_title: key.clone(),
            activity_id,
            created_at: Utc::now(),
        };
        if let Some(repository) = writer.as_mut() {
            repository.upsert_rule(&rule)?;
        }

        let mut next = (*self.snapshot()).clone();
        let replaced = next.insert(key.clone(), rule).is_some();
        self.swap(next);
        debug!(title = %key, %activity_id, replaced, "rule upserted");
        Ok(())
    }

    /// Remove the mapping for `title`. Returns whether one existed.
    pub fn delete(&self, title: &str) -> Result<bool, RepositoryError> {
        let key = normalize_title(title);
        let mut writer = self.writer.lock().unwrap_or_else(|p| p.into_inner());

        if !self.snapshot().contains_key(&key) {
            return Ok(false);
        }
        if let Some(repository) = writer.as_mut() {
            repository.delete_rule(&key)?;
        }

        let mut next = (*self.snapshot()).clone();
        next.remove(&key);
        self.swap(next);
        debug!(title = %key, "rule deleted");
        Ok(true)
    }

    /// All mappings, sorted by title.
    pub fn list(&self) -> Vec<RuleMapping> {
        let mut rules: Vec<RuleMapping> = self.snapshot().values().cloned().collect();
        rules.sort_by(|a, b| a.normalized_title.cmp(&b.normalized_title));
        rules
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}
