//! Local, always-available title scorer.
//!
//! Each activity is scored against the title from two signals:
//!
//! - **Containment**: the activity name (or one of its tags) appears in the
//!   title. A whole-word phrase counts more than a bare substring, and a name
//!   hit counts more than a tag hit.
//! - **Token overlap**: the share of the activity's keywords (name and tag
//!   words, stopwords removed) that also occur in the title.
//!
//! The best-scoring activity wins; ties go to the earlier activity in the
//! input order. Nothing here touches the clock, the network or shared state,
//! so the same inputs always give the same answer.

use crate::classify::types::{clamp_confidence, Activity, ActivityId, Suggestion, SuggestionSource};
use std::collections::BTreeSet;

const NAME_CONTAINED: f64 = 60.0;
const TAG_CONTAINED: f64 = 45.0;
const NAME_SUBSTRING: f64 = 50.0;
const TAG_SUBSTRING: f64 = 35.0;
/// Shorter needles match inside too many unrelated words.
const MIN_SUBSTRING_LEN: usize = 3;
const OVERLAP_WEIGHT: f64 = 40.0;

/// Scores below this are not worth suggesting.
pub const MIN_SCORE: u8 = 20;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "as", "at", "be", "by", "for", "from", "in", "into", "is", "it", "new",
    "of", "on", "or", "page", "tab", "the", "this", "to", "untitled", "window", "with",
];

/// Result of a heuristic match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeuristicMatch {
    pub activity_id: ActivityId,
    pub confidence: u8,
}

impl HeuristicMatch {
    pub fn into_suggestion(self, sequence: u64, for_title: &str) -> Suggestion {
        Suggestion::new(
            sequence,
            self.activity_id,
            self.confidence,
            SuggestionSource::Heuristic,
            for_title,
        )
    }
}

/// Split into lowercase alphanumeric words, keeping order.
fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn keywords<'a, I>(words: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a String>,
{
    words
        .into_iter()
        .filter(|w| w.chars().count() > 1 && !STOPWORDS.contains(&w.as_str()))
        .cloned()
        .collect()
}

/// Whether `phrase` occurs in `title` as a contiguous run of whole words.
fn contains_phrase(title: &[String], phrase: &[String]) -> bool {
    if phrase.is_empty() || phrase.len() > title.len() {
        return false;
    }
    title.windows(phrase.len()).any(|window| window == phrase)
}

/// Whether `needle` occurs anywhere in the lowercased title.
fn contains_substring(lowered_title: &str, needle: &str) -> bool {
    let needle = needle.trim().to_lowercase();
    needle.chars().count() >= MIN_SUBSTRING_LEN && lowered_title.contains(&needle)
}

/// Score one activity against the tokenized title, in `0.0..=100.0`.
fn score(
    lowered_title: &str,
    title_words: &[String],
    title_keywords: &BTreeSet<String>,
    activity: &Activity,
) -> f64 {
    let name_words = words(&activity.name);
    let tag_words: Vec<Vec<String>> = activity.tags.iter().map(|t| words(t)).collect();

    let containment = if contains_phrase(title_words, &name_words) {
        NAME_CONTAINED
    } else if contains_substring(lowered_title, &activity.name) {
        NAME_SUBSTRING
    } else if tag_words.iter().any(|tag| contains_phrase(title_words, tag)) {
        TAG_CONTAINED
    } else if activity.tags.iter().any(|tag| contains_substring(lowered_title, tag)) {
        TAG_SUBSTRING
    } else {
        0.0
    };

    let activity_keywords = keywords(name_words.iter().chain(tag_words.iter().flatten()));
    let overlap = if activity_keywords.is_empty() {
        0.0
    } else {
        let shared = activity_keywords.intersection(title_keywords).count();
        shared as f64 / activity_keywords.len() as f64
    };

    (containment + OVERLAP_WEIGHT * overlap).min(100.0)
}

/// Pick the activity that best matches `title`.
///
/// Returns `None` when there are no activities or nothing reaches
/// [`MIN_SCORE`].
pub fn classify(title: &str, activities: &[Activity]) -> Option<HeuristicMatch> {
    let title_words = words(title);
    if title_words.is_empty() {
        return None;
    }
    let title_keywords = keywords(title_words.iter());
    let lowered = title.to_lowercase();

    let mut best: Option<HeuristicMatch> = None;
    for activity in activities {
        let Some(confidence) = clamp_confidence(score(&lowered, &title_words, &title_keywords, activity))
        else {
            continue;
        };
        if best.map_or(true, |b| confidence > b.confidence) {
            best = Some(HeuristicMatch {
                activity_id: activity.id,
                confidence,
            });
        }
    }

    best.filter(|m| m.confidence >= MIN_SCORE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activities() -> Vec<Activity> {
        vec![
            Activity::new(1, "Coding").with_tags(["main.py", "vscode"]),
            Activity::new(2, "Reading").with_tags(["word", "pdf"]),
            Activity::new(3, "Writing"),
        ]
    }

    #[test]
    fn test_name_containment_wins() {
        let m = classify("coding notes - obsidian", &activities()).unwrap();
        assert_eq!(m.activity_id, ActivityId(1));
        assert!(m.confidence >= 60);
    }

    #[test]
    fn test_tag_containment_with_partial_overlap() {
        // Tag "main.py" is contained; 2 of 4 keywords (main, py) overlap.
        let m = classify("editor - main.py", &activities()).unwrap();
        assert_eq!(m.activity_id, ActivityId(1));
        assert_eq!(m.confidence, 65);
    }

    #[test]
    fn test_substring_containment_matches() {
        let m = classify("mycoding-project", &activities()).unwrap();
        assert_eq!(m.activity_id, ActivityId(1));
        assert_eq!(m.confidence, 50);
    }

    #[test]
    fn test_whole_word_beats_substring() {
        let acts = vec![Activity::new(8, "Art"), Activity::new(9, "Start")];
        let m = classify("start menu", &acts).unwrap();
        assert_eq!(m.activity_id, ActivityId(9));

        let inner = classify("start menu", &acts[..1]).unwrap();
        assert!(inner.confidence < m.confidence);
    }

    #[test]
    fn test_short_names_need_whole_words() {
        let acts = vec![Activity::new(7, "Go")];
        assert_eq!(classify("google search", &acts), None);
        assert!(classify("go - main.go", &acts).is_some());
    }

    #[test]
    fn test_below_floor_returns_none() {
        assert_eq!(classify("system settings", &activities()), None);
        assert_eq!(classify("", &activities()), None);
        assert_eq!(classify("anything", &[]), None);
    }

    #[test]
    fn test_deterministic() {
        let acts = activities();
        let first = classify("microsoft word - report.pdf", &acts);
        for _ in 0..50 {
            assert_eq!(classify("microsoft word - report.pdf", &acts), first);
        }
        assert_eq!(first.unwrap().activity_id, ActivityId(2));
    }

    #[test]
    fn test_tie_prefers_earlier_activity() {
        let acts = vec![Activity::new(5, "Docs"), Activity::new(6, "docs")];
        let m = classify("docs", &acts).unwrap();
        assert_eq!(m.activity_id, ActivityId(5));
    }

    #[test]
    fn test_into_suggestion_tags_source() {
        let s = HeuristicMatch {
            activity_id: ActivityId(1),
            confidence: 72,
        }
        .into_suggestion(4, "editor - main.py");
        assert_eq!(s.source, SuggestionSource::Heuristic);
        assert_eq!(s.sequence, 4);
        assert_eq!(s.confidence, 72);
    }
}
