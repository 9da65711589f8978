//! Screen renderer: pure functions from review data to displayable screens.
//!
//! Every action a screen offers embeds the continuation payload needed to
//! resume from exactly this screen. Rendering never touches the provider.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::codec::{self, keys, ActionPayload};
use super::model::{
    ActionOutcome, BatchSummary, DispatchResult, NavigationDecision, NavigationScreen,
    ReviewAction, ReviewBatch,
};
use super::provider::{
    AtRiskItem, ItemDetails, ItemState, ReasonCode, StatusSummary, AT_RISK_AFTER_DAYS,
};

/// Date format used on every screen (`05 Mar 2026`).
pub const DATE_FORMAT: &str = "%d %b %Y";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenKind {
    ItemReview,
    BatchReview,
    Confirmation,
    BatchSummary,
    Terminal,
    StatusSummary,
    AtRiskList,
    Error,
    Help,
}

/// Colour hint for a piece of content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    #[default]
    Default,
    Good,
    Warning,
    Attention,
    Accent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub label: String,
    pub value: String,
    #[serde(default)]
    pub tone: Tone,
}

impl Fact {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            tone: Tone::Default,
        }
    }

    pub fn toned(mut self, tone: Tone) -> Self {
        self.tone = tone;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub facts: Vec<Fact>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub text: Vec<String>,
}

impl Section {
    pub fn titled(heading: impl Into<String>) -> Self {
        Self {
            heading: Some(heading.into()),
            ..Self::default()
        }
    }

    pub fn fact(mut self, fact: Fact) -> Self {
        self.facts.push(fact);
        self
    }

    pub fn line(mut self, text: impl Into<String>) -> Self {
        self.text.push(text.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Text,
    MultiSelect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub value: String,
    pub title: String,
}

/// A client-side input whose value is merged into the action payload
/// under `id` when an action is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenInput {
    pub id: String,
    pub label: String,
    pub kind: InputKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStyle {
    #[default]
    Default,
    Positive,
    Destructive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenAction {
    pub title: String,
    #[serde(default)]
    pub style: ActionStyle,
    pub verb: ReviewAction,
    pub data: ActionPayload,
}

impl ScreenAction {
    fn new(title: impl Into<String>, style: ActionStyle, data: ActionPayload) -> Option<Self> {
        let verb = data.action()?.parse().ok()?;
        Some(Self {
            title: title.into(),
            style,
            verb,
            data,
        })
    }
}

/// A rendered screen: content plus the actions it offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screen {
    pub kind: ScreenKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub tone: Tone,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<Section>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<ScreenInput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ScreenAction>,
}

impl Screen {
    fn new(kind: ScreenKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            subtitle: None,
            tone: Tone::Default,
            sections: Vec::new(),
            inputs: Vec::new(),
            actions: Vec::new(),
        }
    }

    fn action(&mut self, title: &str, style: ActionStyle, data: ActionPayload) {
        if let Some(action) = ScreenAction::new(title, style, data) {
            self.actions.push(action);
        }
    }

    /// First action carrying `verb`.
    pub fn find_action(&self, verb: ReviewAction) -> Option<&ScreenAction> {
        self.actions.iter().find(|a| a.verb == verb)
    }

    /// Whether any section text contains `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.title.contains(needle)
            || self.sections.iter().any(|s| {
                s.text.iter().any(|t| t.contains(needle))
                    || s.facts.iter().any(|f| f.value.contains(needle))
            })
    }
}

/// `dd Mon yyyy`, or `N/A`.
pub fn format_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format(DATE_FORMAT).to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

/// Urgency colour of a due date relative to `today`.
pub fn due_tone(due: Option<NaiveDate>, today: NaiveDate) -> Tone {
    let Some(due) = due else {
        return Tone::Default;
    };
    match (due - today).num_days() {
        d if d < 0 => Tone::Attention,
        d if d <= 7 => Tone::Warning,
        d if d <= 21 => Tone::Default,
        _ => Tone::Good,
    }
}

/// Order items by earliest due date; undated items go last, otherwise stable.
pub fn sort_by_due(items: &mut [ItemDetails]) {
    items.sort_by_key(|item| (item.earliest_due_date().is_none(), item.earliest_due_date()));
}

fn optional(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "N/A".to_string())
}

fn notes_input() -> ScreenInput {
    ScreenInput {
        id: keys::PARTNER_NOTES.to_string(),
        label: "Notes (optional)".to_string(),
        kind: InputKind::Text,
        placeholder: Some("Add a note for the client or the file".to_string()),
        choices: Vec::new(),
    }
}

/// Review screen for one item of a batch.
pub fn item_review(
    item_id: &str,
    details: Option<&ItemDetails>,
    batch: &ReviewBatch,
    today: NaiveDate,
) -> Screen {
    let mut screen = Screen::new(ScreenKind::ItemReview, format!("Job Review: {}", item_id));
    if batch.total > 1 {
        screen.subtitle = Some(format!("Job {} of {}", batch.current_index, batch.total));
    }

    match details {
        Some(item) => {
            let due = item.earliest_due_date();
            let email = match &item.contact_email {
                Some(email) => Fact::new("Contact Email", email.clone()),
                None => Fact::new("Contact Email", "Missing").toned(Tone::Attention),
            };
            let mut job = Section::titled("Job Details")
                .fact(Fact::new("Job Name", item.name.clone()))
                .fact(Fact::new("Client", item.client_name.clone()))
                .fact(Fact::new("Client Group", optional(&item.client_group)))
                .fact(Fact::new("Partner", optional(&item.partner_name)))
                .fact(Fact::new("Manager", optional(&item.manager_name)))
                .fact(email)
                .fact(Fact::new("Phone", optional(&item.contact_phone)))
                .fact(Fact::new("Due Date", format_date(due)).toned(due_tone(due, today)))
                .fact(Fact::new(
                    "Bookkeeping",
                    if item.bookkeeping { "Yes" } else { "No" },
                ))
                .fact(Fact::new("State", item.state.label()));
            if let Some(status) = item.workflow_status {
                job = job.fact(Fact::new("RFI Workflow", status.label()));
            }

            if item.state != ItemState::PreWorkIn {
                job = job.line(format!(
                    "This job is {}. Only Pre Work In jobs can receive an RFI.",
                    item.state.label()
                ));
            }
            screen.sections.push(job);

            if !item.related.is_empty() {
                let mut related = Section::titled("Related Entities");
                for entity in &item.related {
                    related = related.fact(
                        Fact::new(entity.name.clone(), format_date(entity.due_date))
                            .toned(due_tone(entity.due_date, today)),
                    );
                }
                screen.sections.push(related);
            }
        }
        None => {
            screen.tone = Tone::Warning;
            screen.sections.push(Section::default().line(format!(
                "Details for job {} are unavailable. You can still skip it or mark it Do Not Send.",
                item_id
            )));
        }
    }

    screen.inputs.push(notes_input());
    screen.action(
        "Send RFI",
        ActionStyle::Positive,
        codec::encode_item_action(ReviewAction::Send, item_id, batch),
    );
    screen.action(
        "Skip",
        ActionStyle::Default,
        codec::encode_item_action(ReviewAction::Skip, item_id, batch),
    );
    screen.action(
        "Do Not Send",
        ActionStyle::Destructive,
        codec::encode_item_action(ReviewAction::Exclude, item_id, batch),
    );
    if details
        .and_then(|item| item.workflow_status)
        .is_some_and(|status| status.is_active())
    {
        screen.action(
            "Stop RFI Flow",
            ActionStyle::Destructive,
            codec::encode_item_action(ReviewAction::StopFlow, item_id, batch),
        );
    }
    screen
}

/// Whole-batch review: every item at a glance, bulk send or one-by-one.
///
/// `items` are shown in the order given; ids in the batch with no record
/// are listed in a notice.
pub fn batch_review(batch: &ReviewBatch, items: &[ItemDetails], today: NaiveDate) -> Screen {
    let mut screen = Screen::new(
        ScreenKind::BatchReview,
        format!("Multi-Job Review ({} jobs)", batch.len()),
    );

    let earliest = items.iter().filter_map(ItemDetails::earliest_due_date).min();
    screen.sections.push(
        Section::default()
            .fact(Fact::new("Jobs", batch.len().to_string()))
            .fact(Fact::new("Earliest Due", format_date(earliest)).toned(due_tone(earliest, today))),
    );

    for item in items {
        let due = item.earliest_due_date();
        let contact = item
            .contact_email
            .clone()
            .unwrap_or_else(|| "No contact email".to_string());
        screen.sections.push(
            Section::titled(format!("{} - {}", item.item_id, item.client_name))
                .fact(Fact::new("Job", item.name.clone()))
                .fact(Fact::new("Due Date", format_date(due)).toned(due_tone(due, today)))
                .fact(Fact::new("Contact", contact)),
        );
    }

    let missing: Vec<&str> = batch
        .item_ids
        .iter()
        .filter(|id| !items.iter().any(|i| i.item_id.eq_ignore_ascii_case(id)))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        screen.tone = Tone::Warning;
        screen
            .sections
            .push(Section::titled("Not Found").line(missing.join(", ")));
    }

    screen.inputs.push(ScreenInput {
        id: keys::EXCLUDED_JOBS.to_string(),
        label: "Exclude from bulk send".to_string(),
        kind: InputKind::MultiSelect,
        placeholder: None,
        choices: batch
            .item_ids
            .iter()
            .map(|id| Choice {
                value: id.clone(),
                title: items
                    .iter()
                    .find(|i| &i.item_id == id)
                    .map(|i| format!("{} - {}", id, i.client_name))
                    .unwrap_or_else(|| id.clone()),
            })
            .collect(),
    });
    screen.inputs.push(notes_input());

    screen.action(
        "Send RFI to All",
        ActionStyle::Positive,
        codec::encode_action(ReviewAction::BatchSend, batch),
    );
    screen.action(
        "Review Individually",
        ActionStyle::Default,
        codec::encode_action(ReviewAction::BatchSwitchToIndividual, &batch.restarted()),
    );
    screen.action(
        "Cancel",
        ActionStyle::Destructive,
        codec::encode_action(ReviewAction::BatchCancel, batch),
    );
    screen
}

/// What a reviewer can do about a failure with this reason.
pub fn reason_hints(reason: ReasonCode) -> &'static [&'static str] {
    match reason {
        ReasonCode::AlreadyInitiated => &[
            "View the job details to check the existing RFI.",
            "Use Stop RFI Flow to cancel the existing RFI before starting a new one.",
        ],
        ReasonCode::NotFound | ReasonCode::NotEligible => &[
            "Check the job id.",
            "Only jobs in Pre Work In can receive an RFI.",
        ],
        ReasonCode::MissingContactEmail => &[
            "Update the client's contact details with an email address, then send again.",
        ],
        ReasonCode::MissingRequester => &["Sign in again so the request can be attributed."],
        ReasonCode::AlreadyExcluded => &["No further action is needed."],
        ReasonCode::NoActiveWorkflow => &["This job has no RFI in progress, so nothing was changed."],
        ReasonCode::Other => &[],
    }
}

/// Confirmation after a single-item action or a rejected transition.
///
/// Offers "next" and "finish" together only when there is a next item.
pub fn confirmation(
    outcome: &ActionOutcome,
    navigation: &NavigationDecision,
    batch: &ReviewBatch,
) -> Screen {
    let mut screen = Screen::new(ScreenKind::Confirmation, outcome.action_label.clone());
    screen.tone = if outcome.succeeded {
        Tone::Good
    } else {
        Tone::Attention
    };

    let mut body = Section::default().line(outcome.message.clone());
    if batch.total > 1 {
        let reviewed = batch.current_index.min(batch.total);
        body = body.line(format!("Progress: {} of {} reviewed", reviewed, batch.total));
    }
    screen.sections.push(body);

    if !outcome.succeeded {
        let hints = outcome.reason.map(reason_hints).unwrap_or_default();
        if !hints.is_empty() {
            let mut section = Section::titled("What you can do");
            for hint in hints {
                section = section.line(*hint);
            }
            screen.sections.push(section);
        }
    }

    if outcome.reason == Some(ReasonCode::AlreadyInitiated) && !outcome.item_id.is_empty() {
        screen.action(
            "Stop RFI Flow",
            ActionStyle::Destructive,
            codec::encode_item_action(ReviewAction::StopFlow, &outcome.item_id, batch),
        );
    }

    if navigation.has_next {
        screen.action(
            "Review Next",
            ActionStyle::Positive,
            codec::encode_action(ReviewAction::Advance, batch),
        );
        screen.action(
            "Finish Review",
            ActionStyle::Default,
            codec::encode_action(ReviewAction::Complete, batch),
        );
    }
    screen
}

/// Results of a bulk send.
pub fn batch_summary(summary: &BatchSummary) -> Screen {
    let mut screen = Screen::new(ScreenKind::BatchSummary, "Bulk RFI Results");
    screen.tone = if summary.all_succeeded() {
        Tone::Good
    } else if summary.success_count == 0 {
        Tone::Attention
    } else {
        Tone::Warning
    };

    screen.sections.push(
        Section::default()
            .line(summary.message())
            .fact(Fact::new("Considered", summary.total_considered().to_string()))
            .fact(Fact::new("Sent", summary.success_count.to_string()).toned(Tone::Good))
            .fact(Fact::new("Failed", summary.failed_count.to_string()).toned(
                if summary.failed_count > 0 {
                    Tone::Attention
                } else {
                    Tone::Default
                },
            ))
            .fact(Fact::new("Excluded", summary.excluded_ids.len().to_string())),
    );

    if !summary.failed_ids.is_empty() {
        let mut failed = Section::titled("Failed");
        for outcome in summary.outcomes.iter().filter(|o| !o.succeeded) {
            failed = failed.fact(Fact::new(outcome.item_id.clone(), outcome.message.clone()));
        }
        screen.sections.push(failed);

        let retry = ReviewBatch::new(summary.failed_ids.iter().cloned());
        screen.action(
            "Review Failed Jobs",
            ActionStyle::Default,
            codec::encode_action(ReviewAction::BatchSwitchToIndividual, &retry),
        );
    }

    if !summary.excluded_ids.is_empty() {
        screen
            .sections
            .push(Section::titled("Excluded").line(summary.excluded_ids.join(", ")));
    }
    screen
}

/// End of a review; nothing further is offered.
pub fn terminal(label: &str, message: &str) -> Screen {
    let mut screen = Screen::new(ScreenKind::Terminal, label);
    screen.sections.push(Section::default().line(message));
    screen
}

/// Dashboard of items and workflows.
pub fn status_summary(summary: &StatusSummary) -> Screen {
    let mut screen = Screen::new(ScreenKind::StatusSummary, "RFI Status Report");
    screen.subtitle = Some(format!(
        "Generated {}",
        summary.generated_at.format("%d %b %Y %H:%M UTC")
    ));
    if summary.has_attention_items() {
        screen.tone = Tone::Warning;
    }

    let mut jobs = Section::titled("Jobs by State");
    for state in &summary.item_states {
        jobs = jobs.fact(Fact::new(state.label.clone(), state.count.to_string()));
    }
    screen
        .sections
        .push(jobs.fact(Fact::new("Total", summary.total_items().to_string())));

    if !summary.workflow_states.is_empty() {
        let mut flows = Section::titled("RFI Workflows");
        for state in &summary.workflow_states {
            flows = flows.fact(Fact::new(state.label.clone(), state.count.to_string()));
        }
        screen.sections.push(flows);
    }

    let count_tone = |n: usize, tone: Tone| if n > 0 { tone } else { Tone::Good };
    screen.sections.push(
        Section::titled("Needs Attention")
            .fact(
                Fact::new("At Risk (21+ days, no response)", summary.at_risk_count.to_string())
                    .toned(count_tone(summary.at_risk_count, Tone::Attention)),
            )
            .fact(
                Fact::new(
                    "Due within 14 days",
                    summary.approaching_deadline_count.to_string(),
                )
                .toned(count_tone(summary.approaching_deadline_count, Tone::Warning)),
            ),
    );

    let reminders = summary.reminders_due;
    screen.sections.push(
        Section::titled("Reminders Due Today")
            .fact(Fact::new("First (day 7)", reminders.first.to_string()))
            .fact(Fact::new("Second (day 14)", reminders.second.to_string()))
            .fact(Fact::new("Final notice (day 21)", reminders.final_notice.to_string())),
    );

    screen.action(
        "Review Pending Jobs",
        ActionStyle::Positive,
        ActionPayload::new().with(keys::ACTION, ReviewAction::ReviewPending.as_str()),
    );
    if summary.at_risk_count > 0 {
        screen.action(
            "View At-Risk Jobs",
            ActionStyle::Default,
            ActionPayload::new().with(keys::ACTION, ReviewAction::ReviewAtRisk.as_str()),
        );
    }
    screen
}

/// Workflows with no client response, each with its own stop action.
pub fn at_risk_list(items: &[AtRiskItem], today: NaiveDate) -> Screen {
    let mut screen = Screen::new(ScreenKind::AtRiskList, "At-Risk Jobs");
    screen.subtitle = Some(format!(
        "{} job(s) with no response for {}+ days",
        items.len(),
        AT_RISK_AFTER_DAYS
    ));
    screen.tone = Tone::Attention;

    for item in items {
        screen.sections.push(
            Section::titled(format!("{} - {}", item.item_id, item.client_name))
                .fact(Fact::new("Job", item.name.clone()))
                .fact(
                    Fact::new("Days Waiting", item.days_since_initiated.to_string())
                        .toned(Tone::Attention),
                )
                .fact(Fact::new("Contact Email", optional(&item.contact_email)))
                .fact(Fact::new("Phone", optional(&item.contact_phone)))
                .fact(Fact::new("Partner", optional(&item.partner_name)))
                .fact(
                    Fact::new("Due Date", format_date(item.due_date))
                        .toned(due_tone(item.due_date, today)),
                ),
        );
        screen.action(
            &format!("Stop RFI Flow: {}", item.item_id),
            ActionStyle::Destructive,
            codec::encode_item_action(
                ReviewAction::StopFlow,
                &item.item_id,
                &ReviewBatch::single(item.item_id.clone()),
            ),
        );
    }
    screen
}

pub fn error(title: &str, message: &str) -> Screen {
    let mut screen = Screen::new(ScreenKind::Error, title);
    screen.tone = Tone::Attention;
    screen.sections.push(Section::default().line(message));
    screen
}

pub fn help() -> Screen {
    let mut screen = Screen::new(ScreenKind::Help, "RFI Review");
    screen.sections.push(
        Section::titled("Try")
            .line("review job J012345")
            .line("review jobs J012345, J012346 and J012347")
            .line("show status card"),
    );
    screen
}

/// Render whatever the dispatcher produced.
pub fn render(result: &DispatchResult, today: NaiveDate) -> Screen {
    match result {
        DispatchResult::Outcome {
            outcome,
            navigation,
            batch,
        } => confirmation(outcome, navigation, batch),
        DispatchResult::Summary(summary) => batch_summary(summary),
        DispatchResult::Navigate(NavigationScreen {
            batch,
            item_id,
            details,
        }) => item_review(item_id, details.as_ref(), batch, today),
        DispatchResult::BatchReview { batch, items } => batch_review(batch, items, today),
        DispatchResult::AtRisk(items) => at_risk_list(items, today),
        DispatchResult::Terminal { label, message } => terminal(label, message),
    }
}
