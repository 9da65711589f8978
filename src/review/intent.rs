//! Rule-based intent router: free text to a review command.
//!
//! Only the phrases that open review screens are recognised. Anything else
//! gets the help screen.

use std::collections::HashSet;

use regex::Regex;
use tracing::debug;

use crate::error::ConfigError;

/// Phrases that always mean "show the status report".
const STATUS_PHRASES: &[&str] = &[
    "daily status card",
    "status report card",
    "show status card",
    "daily report card",
];

/// Phrases that ask for a review screen even without the word "job".
const REVIEW_PHRASES: &[&str] = &["show card", "review card"];

/// What a message asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewIntent {
    /// Show the status summary.
    Status,
    /// Review these ids (upper-cased, first occurrence kept).
    ReviewItems(Vec<String>),
    /// Not a review command.
    Help,
}

pub struct IntentRouter {
    item_id: Regex,
}

impl IntentRouter {
    /// Build a router matching item ids with `pattern`, case-insensitively.
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let item_id = Regex::new(&format!("(?i){}", pattern)).map_err(|e| {
            ConfigError::InvalidValue {
                key: "item_id_pattern".into(),
                message: e.to_string(),
            }
        })?;
        Ok(Self { item_id })
    }

    pub fn route(&self, text: &str) -> ReviewIntent {
        let lower = text.trim().to_lowercase();

        if is_status_request(&lower) {
            debug!("Routed message to status report");
            return ReviewIntent::Status;
        }

        if is_review_request(&lower) {
            let ids = self.extract_ids(text);
            if !ids.is_empty() {
                debug!(count = ids.len(), "Routed message to review");
                return ReviewIntent::ReviewItems(ids);
            }
        }

        ReviewIntent::Help
    }

    /// Item ids in order of appearance, upper-cased, repeats dropped.
    pub fn extract_ids(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.item_id
            .find_iter(text)
            .map(|m| m.as_str().to_uppercase())
            .filter(|id| seen.insert(id.clone()))
            .collect()
    }
}

fn is_status_request(lower: &str) -> bool {
    STATUS_PHRASES.iter().any(|p| lower.contains(p))
        || (lower.contains("status") && lower.contains("card"))
}

fn is_review_request(lower: &str) -> bool {
    (lower.contains("review") && lower.contains("job"))
        || REVIEW_PHRASES.iter().any(|p| lower.contains(p))
}
