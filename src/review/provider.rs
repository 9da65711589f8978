//! Item data provider boundary: the store that owns items and their RFI
//! workflows, seen from the review core.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::model::Requester;
use crate::error::ProviderError;

/// Substrings that mark a bare provider result string as a failure.
///
/// Only consulted by [`ProviderReply::from_text`]; typed replies are never sniffed.
pub const FAILURE_MARKERS: &[&str] = &["Error", "failed"];

/// Outcome of a provider write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Succeeded,
    Failed,
}

/// Structured reason for a failed provider write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    AlreadyInitiated,
    NotEligible,
    NotFound,
    MissingContactEmail,
    MissingRequester,
    AlreadyExcluded,
    NoActiveWorkflow,
    Other,
}

/// Typed result of a provider write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderReply {
    pub status: ReplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ReasonCode>,
    pub message: String,
}

impl ProviderReply {
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Succeeded,
            reason: None,
            message: message.into(),
        }
    }

    pub fn failed(reason: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Failed,
            reason: Some(reason),
            message: message.into(),
        }
    }

    /// Classify a bare result string from a provider that cannot return a
    /// typed reply: any [`FAILURE_MARKERS`] substring means failure.
    pub fn from_text(text: impl Into<String>) -> Self {
        let message = text.into();
        if FAILURE_MARKERS.iter().any(|m| message.contains(m)) {
            Self {
                status: ReplyStatus::Failed,
                reason: Some(infer_reason(&message)),
                message,
            }
        } else {
            Self::succeeded(message)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReplyStatus::Succeeded
    }
}

fn infer_reason(text: &str) -> ReasonCode {
    let lower = text.to_lowercase();
    if lower.contains("already initiated") {
        ReasonCode::AlreadyInitiated
    } else if lower.contains("no active") {
        ReasonCode::NoActiveWorkflow
    } else if lower.contains("not found") {
        ReasonCode::NotFound
    } else if lower.contains("not eligible") {
        ReasonCode::NotEligible
    } else if lower.contains("email") {
        ReasonCode::MissingContactEmail
    } else {
        ReasonCode::Other
    }
}

/// Lifecycle state of an item (a job).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    PreWorkIn,
    RfiInitiated,
    DoNotSend,
    WorkIn,
    Complete,
}

impl ItemState {
    pub const ALL: [ItemState; 5] = [
        Self::PreWorkIn,
        Self::RfiInitiated,
        Self::DoNotSend,
        Self::WorkIn,
        Self::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreWorkIn => "pre_work_in",
            Self::RfiInitiated => "rfi_initiated",
            Self::DoNotSend => "do_not_send",
            Self::WorkIn => "work_in",
            Self::Complete => "complete",
        }
    }

    /// Display label for reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::PreWorkIn => "Pre Work In",
            Self::RfiInitiated => "RFI Requested",
            Self::DoNotSend => "Do Not Send",
            Self::WorkIn => "Work In",
            Self::Complete => "Complete",
        }
    }
}

impl std::fmt::Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pre_work_in" => Ok(Self::PreWorkIn),
            "rfi_initiated" => Ok(Self::RfiInitiated),
            "do_not_send" => Ok(Self::DoNotSend),
            "work_in" => Ok(Self::WorkIn),
            "complete" => Ok(Self::Complete),
            _ => Err(format!("Unknown item state: {}", s)),
        }
    }
}

/// Status of an item's RFI workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Initiated,
    Responded,
    Stopped,
    DoNotSend,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Responded => "responded",
            Self::Stopped => "stopped",
            Self::DoNotSend => "do_not_send",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Initiated => "Initiated",
            Self::Responded => "Responded",
            Self::Stopped => "Stopped",
            Self::DoNotSend => "Do Not Send",
        }
    }

    /// Whether the workflow still sends reminders.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Initiated)
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(Self::Initiated),
            "responded" => Ok(Self::Responded),
            "stopped" => Ok(Self::Stopped),
            "do_not_send" => Ok(Self::DoNotSend),
            _ => Err(format!("Unknown workflow status: {}", s)),
        }
    }
}

/// A client entity covered by the same job as the billing client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
}

/// Full detail record for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDetails {
    pub item_id: String,
    /// Job name.
    pub name: String,
    pub state: ItemState,
    /// Billing entity name.
    pub client_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager_name: Option<String>,
    /// Lodgement due date of the billing client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub bookkeeping: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<RelatedEntity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_status: Option<WorkflowStatus>,
}

impl ItemDetails {
    /// Minimal pre-work-in record, mostly for tests and seeding.
    pub fn new(
        item_id: impl Into<String>,
        name: impl Into<String>,
        client_name: impl Into<String>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            name: name.into(),
            state: ItemState::PreWorkIn,
            client_name: client_name.into(),
            client_group: None,
            group_reference: None,
            contact_email: None,
            contact_phone: None,
            partner_name: None,
            manager_name: None,
            due_date: None,
            bookkeeping: false,
            related: Vec::new(),
            workflow_status: None,
        }
    }

    pub fn with_contact_email(mut self, email: impl Into<String>) -> Self {
        self.contact_email = Some(email.into());
        self
    }

    pub fn with_due_date(mut self, due: NaiveDate) -> Self {
        self.due_date = Some(due);
        self
    }

    pub fn with_state(mut self, state: ItemState) -> Self {
        self.state = state;
        self
    }

    pub fn with_group(mut self, group: impl Into<String>, reference: impl Into<String>) -> Self {
        self.client_group = Some(group.into());
        self.group_reference = Some(reference.into());
        self
    }

    /// Earliest due date across the billing client and related entities.
    pub fn earliest_due_date(&self) -> Option<NaiveDate> {
        self.related
            .iter()
            .filter_map(|r| r.due_date)
            .chain(self.due_date)
            .min()
    }
}

/// A labelled count in a status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCount {
    pub label: String,
    pub count: usize,
}

/// Reminders falling due today, by stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemindersDue {
    pub first: usize,
    pub second: usize,
    pub final_notice: usize,
}

impl RemindersDue {
    pub fn total(&self) -> usize {
        self.first + self.second + self.final_notice
    }
}

/// Dashboard summary of items and workflows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub generated_at: DateTime<Utc>,
    pub item_states: Vec<StateCount>,
    pub workflow_states: Vec<StateCount>,
    pub at_risk_count: usize,
    pub approaching_deadline_count: usize,
    pub reminders_due: RemindersDue,
}

impl StatusSummary {
    pub fn total_items(&self) -> usize {
        self.item_states.iter().map(|s| s.count).sum()
    }

    pub fn has_attention_items(&self) -> bool {
        self.at_risk_count > 0 || self.approaching_deadline_count > 0
    }
}

/// An initiated workflow whose client has not answered for
/// [`AT_RISK_AFTER_DAYS`] days or more.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtRiskItem {
    pub item_id: String,
    pub name: String,
    pub client_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    pub days_since_initiated: i64,
}

/// Days without a response after which an initiated RFI is at risk.
pub const AT_RISK_AFTER_DAYS: i64 = 21;

/// The store that owns items and performs RFI actions on them.
///
/// Business failures come back as a failed [`ProviderReply`]; an `Err`
/// means the provider itself could not answer.
#[async_trait]
pub trait ItemDataProvider: Send + Sync {
    /// Start an RFI workflow for the item.
    async fn initiate(
        &self,
        item_id: &str,
        requester: &Requester,
        note: Option<&str>,
    ) -> Result<ProviderReply, ProviderError>;

    /// Mark the item as "do not send".
    async fn exclude(
        &self,
        item_id: &str,
        requester: &Requester,
        note: Option<&str>,
    ) -> Result<ProviderReply, ProviderError>;

    /// Stop the item's active workflow and cancel its pending reminders.
    async fn stop_flow(
        &self,
        item_id: &str,
        requester: &Requester,
        reason: Option<&str>,
    ) -> Result<ProviderReply, ProviderError>;

    /// Full record for the item, or `None` if it does not exist.
    async fn fetch_details(&self, item_id: &str) -> Result<Option<ItemDetails>, ProviderError>;

    /// Dashboard summary.
    async fn fetch_status_summary(&self) -> Result<StatusSummary, ProviderError>;

    /// Ids of items awaiting a decision, most urgent first.
    async fn list_pending(&self, _limit: usize) -> Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }

    /// Unanswered workflows past [`AT_RISK_AFTER_DAYS`], longest waiting first.
    async fn list_at_risk(&self, _limit: usize) -> Result<Vec<AtRiskItem>, ProviderError> {
        Ok(Vec::new())
    }

    /// Whether `initiate` may run for different ids at the same time.
    fn supports_concurrent_writes(&self) -> bool {
        false
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_with_failure_marker_is_failure() {
        let reply = ProviderReply::from_text("**RFI Initiation Failed** Reason: RFI already initiated");
        assert!(!reply.is_success());
        assert_eq!(reply.reason, Some(ReasonCode::AlreadyInitiated));

        let reply = ProviderReply::from_text("Error initiating RFI: connection reset");
        assert!(!reply.is_success());
        assert_eq!(reply.reason, Some(ReasonCode::Other));

        let reply = ProviderReply::from_text("Stop failed: no active RFI workflow for job J000001");
        assert_eq!(reply.reason, Some(ReasonCode::NoActiveWorkflow));
    }

    #[test]
    fn markers_are_case_sensitive() {
        assert!(ProviderReply::from_text("no error here").is_success());
        assert!(ProviderReply::from_text("FAILED loudly").is_success());
    }

    #[test]
    fn marker_shim_misreads_benign_failed() {
        // Known limitation of bare-text classification.
        assert!(!ProviderReply::from_text("RFI queued; 0 reminders failed").is_success());
    }

    #[test]
    fn earliest_due_date_spans_related_entities() {
        let d = |m, day| NaiveDate::from_ymd_opt(2026, m, day).unwrap();
        let mut item = ItemDetails::new("J000001", "2026 Tax Return", "Smith Trust")
            .with_due_date(d(3, 31));
        item.related.push(RelatedEntity {
            name: "Smith Pty Ltd".into(),
            due_date: Some(d(2, 15)),
        });
        item.related.push(RelatedEntity {
            name: "John Smith".into(),
            due_date: None,
        });
        assert_eq!(item.earliest_due_date(), Some(d(2, 15)));
    }

    #[test]
    fn item_state_roundtrips_through_str() {
        for state in ItemState::ALL {
            assert_eq!(state.as_str().parse::<ItemState>().unwrap(), state);
        }
        assert!("lodged".parse::<ItemState>().is_err());
    }
}
