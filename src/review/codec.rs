//! Continuation codec: review state carried through the client as a flat
//! string map.
//!
//! The client holds the only copy of a review's state. Decoding never
//! fails; missing or malformed fields degrade to a batch of size 1 at
//! position 1.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::model::{ReviewAction, ReviewBatch};

/// Wire keys of the action payload.
pub mod keys {
    pub const ACTION: &str = "action";
    pub const JOB_ID: &str = "jobId";
    pub const ALL_JOB_IDS: &str = "allJobIds";
    pub const EXCLUDED_JOBS: &str = "excludedJobs";
    pub const CURRENT_INDEX: &str = "currentIndex";
    pub const TOTAL_CONTACTS: &str = "totalContacts";
    pub const JOB_COUNT: &str = "jobCount";
    pub const PARTNER_NOTES: &str = "partnerNotes";
    pub const STATE_VERSION: &str = "stateVersion";
}

/// Version written by [`encode`].
pub const STATE_VERSION: &str = "1";

const ID_DELIMITER: char = ',';

/// Flat string-keyed action payload as exchanged with the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionPayload(BTreeMap<String, String>);

impl ActionPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coerce an arbitrary JSON value into a payload.
    ///
    /// Strings are kept, numbers and booleans are rendered, arrays are
    /// joined with commas (multi-select inputs), nulls are dropped. Anything
    /// other than an object yields an empty payload.
    pub fn from_json(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            debug!("Action payload is not an object; treating as empty");
            return Self::default();
        };

        let map = obj
            .iter()
            .filter_map(|(k, v)| coerce(v).map(|s| (k.clone(), s)))
            .collect();
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Trimmed value, `None` if absent or blank.
    pub fn non_blank(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Raw verb as sent by the client.
    pub fn action(&self) -> Option<&str> {
        self.non_blank(keys::ACTION)
    }

    pub fn job_id(&self) -> Option<&str> {
        self.non_blank(keys::JOB_ID)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }
}

fn coerce(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(whole_number(n).unwrap_or_else(|| n.to_string())),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(coerce)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Object(_) => Some(value.to_string()),
    }
}

/// `2.0` renders as `2`; clients that send counters as JSON floats still
/// round-trip.
fn whole_number(n: &serde_json::Number) -> Option<String> {
    if n.is_i64() || n.is_u64() {
        return None;
    }
    let f = n.as_f64()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
        Some(format!("{}", f as i64))
    } else {
        None
    }
}

/// Encode a batch's navigation state.
pub fn encode(batch: &ReviewBatch) -> ActionPayload {
    let mut payload = ActionPayload::new()
        .with(keys::STATE_VERSION, STATE_VERSION)
        .with(keys::ALL_JOB_IDS, join_ids(&batch.item_ids))
        .with(keys::CURRENT_INDEX, batch.current_index.to_string())
        .with(keys::TOTAL_CONTACTS, batch.total.to_string())
        .with(keys::JOB_COUNT, batch.total.to_string());

    if !batch.excluded_ids.is_empty() {
        payload.insert(keys::EXCLUDED_JOBS, join_ids(&batch.excluded_ids));
    }
    if let Some(note) = &batch.note {
        payload.insert(keys::PARTNER_NOTES, note.clone());
    }
    payload
}

/// Payload for a screen action: the batch state plus the verb.
pub fn encode_action(action: ReviewAction, batch: &ReviewBatch) -> ActionPayload {
    encode(batch).with(keys::ACTION, action.as_str())
}

/// Payload for a single-item verb on the batch's current item.
pub fn encode_item_action(
    action: ReviewAction,
    item_id: &str,
    batch: &ReviewBatch,
) -> ActionPayload {
    encode_action(action, batch).with(keys::JOB_ID, item_id)
}

/// Rebuild a batch from a payload. Never fails.
pub fn decode(payload: &ActionPayload) -> ReviewBatch {
    match payload.non_blank(keys::STATE_VERSION) {
        Some(version) if version != STATE_VERSION => {
            debug!(version, "Unknown continuation version, decoding best-effort");
        }
        _ => {}
    }

    let item_ids = split_ids(payload.get(keys::ALL_JOB_IDS));
    let excluded = split_ids(payload.get(keys::EXCLUDED_JOBS));

    let current_index = parse_count(payload.get(keys::CURRENT_INDEX));
    let total = parse_count(
        payload
            .non_blank(keys::TOTAL_CONTACTS)
            .or_else(|| payload.non_blank(keys::JOB_COUNT)),
    );

    let note = payload.get(keys::PARTNER_NOTES).map(str::to_string);

    ReviewBatch {
        item_ids,
        current_index,
        total,
        excluded_ids: Vec::new(),
        note: None,
    }
    .with_excluded(excluded)
    .with_note(note)
}

fn join_ids(ids: &[String]) -> String {
    ids.join(",")
}

fn split_ids(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(ID_DELIMITER)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// 1-based counter; absent, unparsable, or zero reads as 1.
fn parse_count(raw: Option<&str>) -> usize {
    raw.and_then(|s| s.trim().parse::<usize>().ok())
        .unwrap_or(1)
        .max(1)
}
