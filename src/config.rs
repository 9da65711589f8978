//! Configuration types.

use std::path::PathBuf;

use regex::Regex;
use tracing::warn;

use crate::error::ConfigError;

/// Default audit note recorded when an item is excluded without a note.
pub const DEFAULT_EXCLUDE_NOTE: &str = "Marked during individual review";

/// Default pattern for item ids mentioned in free text.
pub const DEFAULT_ITEM_ID_PATTERN: &str = r"J\d{6}";

/// Review service configuration.
#[derive(Debug, Clone)]
pub struct ReviewConfig {
    /// HTTP port for the action/message endpoints.
    pub port: u16,
    /// Path of the libSQL item store.
    pub db_path: PathBuf,
    /// Optional JSON file of items loaded into the store at startup.
    pub seed_file: Option<PathBuf>,
    /// Max in-flight initiations during a bulk send (1 = sequential).
    pub batch_concurrency: usize,
    /// Regex used to pick item ids out of free text.
    pub item_id_pattern: String,
    /// Note recorded on `exclude` when the reviewer leaves none.
    pub default_exclude_note: String,
    /// Max items opened by the dashboard's "review pending" drill-down.
    pub pending_review_limit: usize,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: PathBuf::from("./data/rfi-review.db"),
            seed_file: None,
            batch_concurrency: 1,
            item_id_pattern: DEFAULT_ITEM_ID_PATTERN.to_string(),
            default_exclude_note: DEFAULT_EXCLUDE_NOTE.to_string(),
            pending_review_limit: 10,
        }
    }
}

impl ReviewConfig {
    /// Load configuration from `RFI_REVIEW_*` environment variables.
    ///
    /// Unparsable numbers fall back to their defaults. An item id pattern
    /// that does not compile is rejected.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = parse_env("RFI_REVIEW_PORT", defaults.port);

        let db_path = std::env::var("RFI_REVIEW_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let seed_file = std::env::var("RFI_REVIEW_SEED_FILE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let batch_concurrency =
            parse_env("RFI_REVIEW_BATCH_CONCURRENCY", defaults.batch_concurrency).max(1);

        let item_id_pattern = std::env::var("RFI_REVIEW_ITEM_ID_PATTERN")
            .unwrap_or(defaults.item_id_pattern);
        Regex::new(&item_id_pattern).map_err(|e| ConfigError::InvalidValue {
            key: "RFI_REVIEW_ITEM_ID_PATTERN".into(),
            message: e.to_string(),
        })?;

        let default_exclude_note = std::env::var("RFI_REVIEW_EXCLUDE_NOTE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.default_exclude_note);

        let pending_review_limit =
            parse_env("RFI_REVIEW_PENDING_LIMIT", defaults.pending_review_limit).max(1);

        Ok(Self {
            port,
            db_path,
            seed_file,
            batch_concurrency,
            item_id_pattern,
            default_exclude_note,
            pending_review_limit,
        })
    }
}

fn parse_env<T: std::str::FromStr + Copy + std::fmt::Debug>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, default = ?default, "Invalid config value, using default");
            default
        }),
        Err(_) => default,
    }
}
