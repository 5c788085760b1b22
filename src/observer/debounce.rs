//! Title debouncing.
//!
//! A new title is confirmed only after it has been seen on `required_polls`
//! consecutive polls. Anything that flickers for fewer polls (alt-tab
//! previews, transient dialogs, a title that updates mid-load) never reaches
//! the classifier.

/// Outcome of feeding one poll result to the debouncer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebounceOutcome {
    /// The title changed and is now confirmed.
    Confirmed(String),
    /// Still waiting for the candidate to stabilise.
    Pending,
    /// Same as the confirmed title.
    Unchanged,
}

/// Consecutive-poll debouncer keyed on normalized titles.
#[derive(Debug, Clone)]
pub struct Debouncer {
    required_polls: u32,
    confirmed: Option<String>,
    candidate: Option<String>,
    streak: u32,
}

impl Debouncer {
    /// Create a debouncer. `required_polls` below 1 is treated as 1.
    pub fn new(required_polls: u32) -> Self {
        Self {
            required_polls: required_polls.max(1),
            confirmed: None,
            candidate: None,
            streak: 0,
        }
    }

    /// Feed one normalized title.
    pub fn observe(&mut self, title: &str) -> DebounceOutcome {
        if self.confirmed.as_deref() == Some(title) {
            // Returning to the confirmed title cancels any pending candidate.
            self.candidate = None;
            self.streak = 0;
            return DebounceOutcome::Unchanged;
        }

        if self.candidate.as_deref() == Some(title) {
            self.streak = self.streak.saturating_add(1);
        } else {
            self.candidate = Some(title.to_string());
            self.streak = 1;
        }

        if self.streak >= self.required_polls {
            self.confirmed = self.candidate.take();
            self.streak = 0;
            DebounceOutcome::Confirmed(title.to_string())
        } else {
            DebounceOutcome::Pending
        }
    }

    /// Forget the pending candidate while keeping the confirmed title.
    ///
    /// Used when polling is suspended so a stale half-built streak does not
    /// carry over into the resumed session.
    pub fn reset_candidate(&mut self) {
        self.candidate = None;
        self.streak = 0;
    }

    /// The last confirmed title.
    pub fn confirmed(&self) -> Option<&str> {
        self.confirmed.as_deref()
    }

    pub fn required_polls(&self) -> u32 {
        self.required_polls
    }
}
