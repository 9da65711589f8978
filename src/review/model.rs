//! Review data model: batches, verbs, outcomes, and navigation.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::provider::{AtRiskItem, ItemDetails, ReasonCode};

/// Human-readable labels for what an action did.
pub mod labels {
    pub const RFI_SENT: &str = "RFI Sent";
    pub const SKIPPED: &str = "Skipped";
    pub const DO_NOT_SEND: &str = "Do Not Send";
    pub const FLOW_STOPPED: &str = "RFI Flow Stopped";
    pub const REVIEW_NEXT: &str = "Review Next";
    pub const REVIEW_COMPLETE: &str = "Review Complete";
    pub const SEND_ALL: &str = "Send RFI Multi";
    pub const REVIEW_INDIVIDUAL: &str = "Review Individual";
    pub const REVIEW_PENDING: &str = "Review Pending";
    pub const REVIEW_AT_RISK: &str = "At-Risk Jobs";
    pub const CANCELLED: &str = "Cancelled";
    pub const UNKNOWN: &str = "Unknown Action";
}

/// Who is acting on the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    /// Display name recorded against provider actions.
    #[serde(default)]
    pub name: String,
    /// Optional contact address (email).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
}

impl Requester {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contact: None,
        }
    }

    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        self.contact = Some(contact.into());
        self
    }
}

/// Navigation state of a review, rebuilt from every inbound payload.
///
/// `current_index` is 1-based; `len + 1` means the batch is complete.
/// `total` is the declared batch size carried by the client, which for a
/// batch built with [`ReviewBatch::new`] equals `item_ids.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewBatch {
    pub item_ids: Vec<String>,
    pub current_index: usize,
    pub total: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ReviewBatch {
    /// A fresh batch positioned on its first item.
    pub fn new<I, S>(item_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let item_ids: Vec<String> = item_ids.into_iter().map(Into::into).collect();
        Self {
            total: item_ids.len().max(1),
            item_ids,
            current_index: 1,
            excluded_ids: Vec::new(),
            note: None,
        }
    }

    /// A batch of exactly one item.
    pub fn single(item_id: impl Into<String>) -> Self {
        Self::new([item_id.into()])
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.current_index = index.max(1);
        self
    }

    pub fn with_excluded<I, S>(mut self, excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_ids = excluded.into_iter().map(Into::into).collect();
        self
    }

    /// Attach a note. Blank notes are treated as no note.
    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note.filter(|n| !n.trim().is_empty());
        self
    }

    pub fn len(&self) -> usize {
        self.item_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.item_ids.is_empty()
    }

    /// Item at a 1-based position.
    pub fn item_at(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.item_ids.get(i))
            .map(String::as_str)
    }

    pub fn current_item(&self) -> Option<&str> {
        self.item_at(self.current_index)
    }

    /// Whether the position is still short of the declared total.
    pub fn has_more(&self) -> bool {
        self.current_index < self.total
    }

    pub fn is_complete(&self) -> bool {
        self.current_index > self.item_ids.len()
    }

    /// Copy of this batch one position further on.
    pub fn advanced(&self) -> Self {
        Self {
            current_index: self.current_index + 1,
            ..self.clone()
        }
    }

    /// Copy of this batch reframed for one-by-one review from the start.
    pub fn restarted(&self) -> Self {
        Self {
            current_index: 1,
            total: self.item_ids.len().max(1),
            ..self.clone()
        }
    }

    /// Case-insensitive membership in the exclusion list.
    pub fn is_excluded(&self, item_id: &str) -> bool {
        self.excluded_ids
            .iter()
            .any(|ex| ex.eq_ignore_ascii_case(item_id))
    }

    /// Ids a bulk action processes: batch order, excluded ids removed,
    /// repeated ids kept once.
    pub fn effective_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.item_ids
            .iter()
            .filter(|id| !self.is_excluded(id))
            .filter(|id| seen.insert(id.to_ascii_uppercase()))
            .cloned()
            .collect()
    }

    /// Batch ids the caller excluded, in batch order, each once.
    pub fn excluded_in_batch(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.item_ids
            .iter()
            .filter(|id| self.is_excluded(id))
            .filter(|id| seen.insert(id.to_ascii_uppercase()))
            .cloned()
            .collect()
    }
}

/// Verbs a screen action can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewAction {
    Send,
    Skip,
    Exclude,
    StopFlow,
    Advance,
    Complete,
    BatchSend,
    BatchSwitchToIndividual,
    BatchCancel,
    ReviewPending,
    ReviewAtRisk,
}

impl ReviewAction {
    /// Canonical wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Skip => "skip",
            Self::Exclude => "exclude",
            Self::StopFlow => "stop-flow",
            Self::Advance => "advance",
            Self::Complete => "complete",
            Self::BatchSend => "batch-send",
            Self::BatchSwitchToIndividual => "batch-switch-to-individual",
            Self::BatchCancel => "batch-cancel",
            Self::ReviewPending => "review-pending",
            Self::ReviewAtRisk => "review-at-risk",
        }
    }
}

impl std::fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReviewAction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "send" | "send_rfi" => Ok(Self::Send),
            "skip" => Ok(Self::Skip),
            "exclude" | "do_not_send" => Ok(Self::Exclude),
            "stop-flow" | "stop_rfi_flow" => Ok(Self::StopFlow),
            "advance" | "review_next" => Ok(Self::Advance),
            "complete" | "review_complete" => Ok(Self::Complete),
            "batch-send" | "send_rfi_multi" => Ok(Self::BatchSend),
            "batch-switch-to-individual" | "review_individual_multi" => {
                Ok(Self::BatchSwitchToIndividual)
            }
            "batch-cancel" | "cancel_multi_review" => Ok(Self::BatchCancel),
            "review-pending" | "view_preworkin_jobs" => Ok(Self::ReviewPending),
            "review-at-risk" | "view_at_risk_clients" => Ok(Self::ReviewAtRisk),
            other => Err(format!("Unknown action: {}", other)),
        }
    }
}

/// Result of one atomic operation against one item. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub item_id: String,
    pub succeeded: bool,
    pub message: String,
    pub action_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ReasonCode>,
}

impl ActionOutcome {
    pub fn success(
        item_id: impl Into<String>,
        action_label: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            succeeded: true,
            message: message.into(),
            action_label: action_label.into(),
            reason: None,
        }
    }

    pub fn failure(
        item_id: impl Into<String>,
        action_label: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            succeeded: false,
            message: message.into(),
            action_label: action_label.into(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: Option<ReasonCode>) -> Self {
        self.reason = reason;
        self
    }
}

/// Aggregate over the outcomes of one bulk send.
///
/// Every batch id lands in exactly one of succeeded, failed, or excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub success_count: usize,
    pub failed_count: usize,
    pub succeeded_ids: Vec<String>,
    pub failed_ids: Vec<String>,
    pub excluded_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outcomes: Vec<ActionOutcome>,
}

impl BatchSummary {
    pub fn new(excluded_ids: Vec<String>) -> Self {
        Self {
            excluded_ids,
            ..Self::default()
        }
    }

    /// Fold one outcome in, preserving arrival order.
    pub fn record(&mut self, outcome: ActionOutcome) {
        if outcome.succeeded {
            self.success_count += 1;
            self.succeeded_ids.push(outcome.item_id.clone());
        } else {
            self.failed_count += 1;
            self.failed_ids.push(outcome.item_id.clone());
        }
        self.outcomes.push(outcome);
    }

    pub fn total_considered(&self) -> usize {
        self.success_count + self.failed_count + self.excluded_ids.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed_count == 0
    }

    /// One-line summary in the form shown to reviewers.
    pub fn message(&self) -> String {
        if self.failed_count == 0 {
            format!("Successfully sent RFI for {} job(s)", self.success_count)
        } else {
            format!(
                "Sent RFI for {} job(s). Failed: {} ({})",
                self.success_count,
                self.failed_count,
                self.failed_ids.join(", ")
            )
        }
    }
}

/// Whether a "next card" should be offered after an action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationDecision {
    pub has_next: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_index: Option<usize>,
}

impl NavigationDecision {
    /// `has_next` iff the action succeeded and the pre-action index was
    /// still short of the declared total.
    pub fn after(succeeded: bool, current_index: usize, total: usize) -> Self {
        if succeeded && current_index < total {
            Self {
                has_next: true,
                next_index: Some(current_index + 1),
            }
        } else {
            Self::none()
        }
    }

    pub fn none() -> Self {
        Self {
            has_next: false,
            next_index: None,
        }
    }
}

/// Screen data for the item a navigation lands on.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationScreen {
    /// Batch positioned on the target item.
    pub batch: ReviewBatch,
    pub item_id: String,
    /// `None` when the provider could not supply the record.
    pub details: Option<ItemDetails>,
}

/// What the dispatcher produced for one inbound action.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchResult {
    /// A single-item decision (or a rejected transition) and where to go next.
    Outcome {
        outcome: ActionOutcome,
        navigation: NavigationDecision,
        batch: ReviewBatch,
    },
    /// A bulk send finished.
    Summary(BatchSummary),
    /// Show the item at a new position.
    Navigate(NavigationScreen),
    /// Open a whole-batch review.
    BatchReview {
        batch: ReviewBatch,
        items: Vec<ItemDetails>,
    },
    /// Workflows waiting too long for a client response.
    AtRisk(Vec<AtRiskItem>),
    /// The review ended; nothing further is offered.
    Terminal { label: String, message: String },
}
