//! Action dispatcher: the review state machine.
//!
//! There is no stored state: every inbound payload names its transition and
//! carries its own position. The dispatcher checks that transition against
//! the decoded batch, runs it, and reports where the reviewer goes next.
//! Nothing here returns an error; every failure becomes a failed outcome.

use std::sync::Arc;

use tracing::{info, warn};

use super::aggregator::{initiate_item, outcome_from, BatchAggregator, BatchRun};
use super::codec::{self, ActionPayload};
use super::model::{
    labels, ActionOutcome, DispatchResult, NavigationDecision, NavigationScreen, Requester,
    ReviewAction, ReviewBatch,
};
use super::provider::{ItemDataProvider, ItemDetails};
use crate::config::ReviewConfig;

pub const REVIEW_COMPLETED: &str = "Review session completed";
pub const REVIEW_CANCELLED: &str = "Multi-job review cancelled";
pub const NO_PENDING: &str = "No pending items to review";
pub const NO_AT_RISK: &str = "No clients have gone more than 21 days without responding";

pub struct ActionDispatcher {
    provider: Arc<dyn ItemDataProvider>,
    aggregator: BatchAggregator,
    exclude_note: String,
    pending_limit: usize,
}

impl ActionDispatcher {
    pub fn new(provider: Arc<dyn ItemDataProvider>, config: &ReviewConfig) -> Self {
        Self {
            aggregator: BatchAggregator::new(Arc::clone(&provider), config.batch_concurrency),
            provider,
            exclude_note: config.default_exclude_note.clone(),
            pending_limit: config.pending_review_limit.max(1),
        }
    }

    /// Decode the payload, run the named transition, and report the result.
    pub async fn handle(&self, payload: &ActionPayload, requester: &Requester) -> DispatchResult {
        let batch = codec::decode(payload);
        let raw = payload.action().unwrap_or_default();

        let action = match raw.parse::<ReviewAction>() {
            Ok(action) => action,
            Err(message) => {
                warn!(verb = raw, "Unrecognized review action");
                let item_id = payload.job_id().unwrap_or_default().to_string();
                return rejected(
                    ActionOutcome::failure(item_id, labels::UNKNOWN, message),
                    batch,
                );
            }
        };

        info!(
            action = %action,
            index = batch.current_index,
            total = batch.total,
            items = batch.len(),
            "Dispatching review action"
        );

        match action {
            ReviewAction::Send
            | ReviewAction::Skip
            | ReviewAction::Exclude
            | ReviewAction::StopFlow => {
                self.single_item(action, payload, batch, requester).await
            }
            ReviewAction::Advance => self.advance(batch).await,
            ReviewAction::Complete => DispatchResult::Terminal {
                label: labels::REVIEW_COMPLETE.to_string(),
                message: REVIEW_COMPLETED.to_string(),
            },
            ReviewAction::BatchSend => match self.aggregator.send_all(&batch, requester).await {
                BatchRun::Summary(summary) => DispatchResult::Summary(summary),
                BatchRun::NothingToDo(outcome) => rejected(outcome, batch),
            },
            ReviewAction::BatchSwitchToIndividual => self.switch_to_individual(batch).await,
            ReviewAction::BatchCancel => DispatchResult::Terminal {
                label: labels::CANCELLED.to_string(),
                message: REVIEW_CANCELLED.to_string(),
            },
            ReviewAction::ReviewPending => self.review_pending().await,
            ReviewAction::ReviewAtRisk => self.review_at_risk().await,
        }
    }

    async fn single_item(
        &self,
        action: ReviewAction,
        payload: &ActionPayload,
        batch: ReviewBatch,
        requester: &Requester,
    ) -> DispatchResult {
        let label = match action {
            ReviewAction::Send => labels::RFI_SENT,
            ReviewAction::Exclude => labels::DO_NOT_SEND,
            ReviewAction::StopFlow => labels::FLOW_STOPPED,
            _ => labels::SKIPPED,
        };

        let item_id = payload
            .job_id()
            .or_else(|| batch.current_item())
            .map(str::to_string);
        let Some(item_id) = item_id else {
            warn!(action = %action, "Single-item action without a job id");
            return rejected(
                ActionOutcome::failure("", label, format!("No job id provided for {}", action)),
                batch,
            );
        };

        let note = batch.note.as_deref();
        let outcome = match action {
            ReviewAction::Send => {
                initiate_item(self.provider.as_ref(), &item_id, requester, note).await
            }
            ReviewAction::Exclude => {
                let note = note.unwrap_or(self.exclude_note.as_str());
                let result = self.provider.exclude(&item_id, requester, Some(note)).await;
                outcome_from(
                    &item_id,
                    label,
                    result,
                    format!("Job {} marked as Do Not Send", item_id),
                )
            }
            ReviewAction::StopFlow => {
                let result = self.provider.stop_flow(&item_id, requester, note).await;
                outcome_from(
                    &item_id,
                    label,
                    result,
                    format!("RFI flow stopped for job {}", item_id),
                )
            }
            _ => ActionOutcome::success(&item_id, label, format!("Skipped job {}", item_id)),
        };

        let navigation =
            NavigationDecision::after(outcome.succeeded, batch.current_index, batch.total);
        info!(
            item_id = %item_id,
            succeeded = outcome.succeeded,
            has_next = navigation.has_next,
            "Single-item action resolved"
        );

        DispatchResult::Outcome {
            outcome,
            navigation,
            batch,
        }
    }

    async fn advance(&self, batch: ReviewBatch) -> DispatchResult {
        if !batch.has_more() {
            warn!(
                index = batch.current_index,
                total = batch.total,
                "Advance requested past the end of the batch"
            );
            let message = format!(
                "No more jobs to review (position {} of {})",
                batch.current_index, batch.total
            );
            let item_id = batch.current_item().unwrap_or_default().to_string();
            return rejected(
                ActionOutcome::failure(item_id, labels::REVIEW_NEXT, message),
                batch,
            );
        }

        let next = batch.advanced();
        let Some(item_id) = next.current_item().map(str::to_string) else {
            warn!(
                index = next.current_index,
                items = next.len(),
                "Advance target missing from payload"
            );
            let message = format!("No job at position {} of {}", next.current_index, next.total);
            return rejected(
                ActionOutcome::failure("", labels::REVIEW_NEXT, message),
                batch,
            );
        };

        let details = self.details_or_none(&item_id).await;
        DispatchResult::Navigate(NavigationScreen {
            batch: next,
            item_id,
            details,
        })
    }

    async fn switch_to_individual(&self, batch: ReviewBatch) -> DispatchResult {
        let batch = batch.restarted();
        let first = batch.current_item().map(str::to_string);
        let Some(item_id) = first else {
            warn!("Switch to individual review on an empty batch");
            return rejected(
                ActionOutcome::failure("", labels::REVIEW_INDIVIDUAL, "No jobs to review"),
                batch,
            );
        };

        let details = self.details_or_none(&item_id).await;
        DispatchResult::Navigate(NavigationScreen {
            batch,
            item_id,
            details,
        })
    }

    async fn review_pending(&self) -> DispatchResult {
        let ids = match self.provider.list_pending(self.pending_limit).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Could not list pending items");
                return rejected(
                    ActionOutcome::failure("", labels::REVIEW_PENDING, e.to_string()),
                    ReviewBatch::new(Vec::<String>::new()),
                );
            }
        };

        if ids.is_empty() {
            return rejected(
                ActionOutcome::failure("", labels::REVIEW_PENDING, NO_PENDING),
                ReviewBatch::new(Vec::<String>::new()),
            );
        }

        let batch = ReviewBatch::new(ids);
        let items = self.fetch_all(&batch.item_ids).await;
        info!(
            listed = batch.len(),
            resolved = items.len(),
            "Opened pending review"
        );
        DispatchResult::BatchReview { batch, items }
    }

    async fn review_at_risk(&self) -> DispatchResult {
        match self.provider.list_at_risk(self.pending_limit).await {
            Ok(items) if items.is_empty() => DispatchResult::Terminal {
                label: labels::REVIEW_AT_RISK.to_string(),
                message: NO_AT_RISK.to_string(),
            },
            Ok(items) => {
                info!(count = items.len(), "Opened at-risk review");
                DispatchResult::AtRisk(items)
            }
            Err(e) => {
                warn!(error = %e, "Could not list at-risk items");
                rejected(
                    ActionOutcome::failure("", labels::REVIEW_AT_RISK, e.to_string()),
                    ReviewBatch::new(Vec::<String>::new()),
                )
            }
        }
    }

    /// Details for every id the provider can resolve, in id order.
    pub async fn fetch_all(&self, ids: &[String]) -> Vec<ItemDetails> {
        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(details) = self.details_or_none(id).await {
                items.push(details);
            }
        }
        items
    }

    async fn details_or_none(&self, item_id: &str) -> Option<ItemDetails> {
        match self.provider.fetch_details(item_id).await {
            Ok(Some(details)) => Some(details),
            Ok(None) => {
                warn!(item_id, "Item not found while building review screen");
                None
            }
            Err(e) => {
                warn!(item_id, error = %e, "Failed to fetch item details");
                None
            }
        }
    }
}

/// A failed transition: no navigation, batch unchanged.
fn rejected(outcome: ActionOutcome, batch: ReviewBatch) -> DispatchResult {
    DispatchResult::Outcome {
        outcome,
        navigation: NavigationDecision::none(),
        batch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::codec::keys;
    use crate::review::provider::testing::{Script, ScriptedProvider};
    use crate::review::provider::{AtRiskItem, ProviderReply, ReasonCode};

    fn setup(provider: ScriptedProvider) -> (ActionDispatcher, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let dispatcher = ActionDispatcher::new(provider.clone(), &ReviewConfig::default());
        (dispatcher, provider)
    }

    fn requester() -> Requester {
        Requester::new("Pat Partner").with_contact("pat@example.com")
    }

    fn payload(action: &str) -> ActionPayload {
        ActionPayload::new().with(keys::ACTION, action)
    }

    #[tokio::test]
    async fn skip_succeeds_and_navigates_from_supplied_position() {
        let (dispatcher, provider) = setup(ScriptedProvider::new());
        let p = payload("skip")
            .with(keys::JOB_ID, "J1")
            .with(keys::CURRENT_INDEX, "1")
            .with(keys::TOTAL_CONTACTS, "2");

        match dispatcher.handle(&p, &requester()).await {
            DispatchResult::Outcome {
                outcome,
                navigation,
                ..
            } => {
                assert!(outcome.succeeded);
                assert_eq!(outcome.action_label, "Skipped");
                assert_eq!(outcome.message, "Skipped job J1");
                assert!(navigation.has_next);
                assert_eq!(navigation.next_index, Some(2));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn skip_on_last_item_has_no_next() {
        let (dispatcher, _) = setup(ScriptedProvider::new());
        let p = payload("skip")
            .with(keys::JOB_ID, "J1")
            .with(keys::CURRENT_INDEX, "2")
            .with(keys::TOTAL_CONTACTS, "2");
        let DispatchResult::Outcome { navigation, .. } = dispatcher.handle(&p, &requester()).await
        else {
            panic!("expected an outcome");
        };
        assert!(!navigation.has_next);
    }

    #[tokio::test]
    async fn send_failure_text_is_surfaced_and_blocks_navigation() {
        let (dispatcher, provider) = setup(
            ScriptedProvider::new().text("J1", "**RFI Initiation Failed** RFI already initiated"),
        );
        let p = payload("send_rfi")
            .with(keys::JOB_ID, "J1")
            .with(keys::TOTAL_CONTACTS, "3")
            .with(keys::PARTNER_NOTES, "please expedite");

        let DispatchResult::Outcome {
            outcome,
            navigation,
            ..
        } = dispatcher.handle(&p, &requester()).await
        else {
            panic!("expected an outcome");
        };
        assert!(!outcome.succeeded);
        assert!(outcome.message.contains("already initiated"));
        assert_eq!(outcome.reason, Some(ReasonCode::AlreadyInitiated));
        assert!(!navigation.has_next);

        let calls = provider.calls();
        assert_eq!(calls[0].op, "initiate");
        assert_eq!(calls[0].note.as_deref(), Some("please expedite"));
    }

    #[tokio::test]
    async fn send_success_uses_fixed_message() {
        let (dispatcher, _) = setup(ScriptedProvider::new());
        let p = payload("send").with(keys::JOB_ID, "J7");
        let DispatchResult::Outcome { outcome, .. } = dispatcher.handle(&p, &requester()).await
        else {
            panic!("expected an outcome");
        };
        assert!(outcome.succeeded);
        assert_eq!(outcome.message, "RFI initiated for job J7");
    }

    #[tokio::test]
    async fn provider_error_becomes_failed_outcome() {
        let (dispatcher, _) = setup(ScriptedProvider::new().raise("J1", "database locked"));
        let p = payload("send").with(keys::JOB_ID, "J1");
        let DispatchResult::Outcome { outcome, .. } = dispatcher.handle(&p, &requester()).await
        else {
            panic!("expected an outcome");
        };
        assert!(!outcome.succeeded);
        assert!(outcome.message.contains("database locked"));
    }

    #[tokio::test]
    async fn exclude_uses_default_note_when_none_given() {
        let (dispatcher, provider) = setup(ScriptedProvider::new());
        let p = payload("do_not_send").with(keys::JOB_ID, "J1");
        let DispatchResult::Outcome { outcome, .. } = dispatcher.handle(&p, &requester()).await
        else {
            panic!("expected an outcome");
        };
        assert!(outcome.succeeded);
        assert_eq!(outcome.action_label, "Do Not Send");
        assert_eq!(outcome.message, "Job J1 marked as Do Not Send");

        let calls = provider.calls();
        assert_eq!(calls[0].op, "exclude");
        assert_eq!(
            calls[0].note.as_deref(),
            Some("Marked during individual review")
        );
    }

    #[tokio::test]
    async fn missing_job_id_falls_back_to_current_item() {
        let (dispatcher, provider) = setup(ScriptedProvider::new());
        let p = payload("send")
            .with(keys::ALL_JOB_IDS, "J1,J2")
            .with(keys::CURRENT_INDEX, "2");
        dispatcher.handle(&p, &requester()).await;
        assert_eq!(provider.calls()[0].item_id, "J2");
    }

    #[tokio::test]
    async fn missing_job_id_without_batch_is_rejected() {
        let (dispatcher, provider) = setup(ScriptedProvider::new());
        let DispatchResult::Outcome {
            outcome,
            navigation,
            ..
        } = dispatcher.handle(&payload("send"), &requester()).await
        else {
            panic!("expected an outcome");
        };
        assert!(!outcome.succeeded);
        assert!(!navigation.has_next);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn advance_moves_to_next_item_with_details() {
        let (dispatcher, _) = setup(
            ScriptedProvider::new().detail(ItemDetails::new("J2", "2026 ITR", "Jones Family Trust")),
        );
        let p = payload("review_next")
            .with(keys::ALL_JOB_IDS, "J1,J2,J3")
            .with(keys::CURRENT_INDEX, "1")
            .with(keys::TOTAL_CONTACTS, "3");

        let DispatchResult::Navigate(screen) = dispatcher.handle(&p, &requester()).await else {
            panic!("expected navigation");
        };
        assert_eq!(screen.item_id, "J2");
        assert_eq!(screen.batch.current_index, 2);
        assert_eq!(
            screen.details.map(|d| d.client_name),
            Some("Jones Family Trust".to_string())
        );
    }

    #[tokio::test]
    async fn advance_at_end_is_rejected_without_index_change() {
        let (dispatcher, _) = setup(ScriptedProvider::new());
        let p = payload("advance")
            .with(keys::ALL_JOB_IDS, "J1,J2")
            .with(keys::CURRENT_INDEX, "2")
            .with(keys::TOTAL_CONTACTS, "2");

        let DispatchResult::Outcome {
            outcome,
            navigation,
            batch,
        } = dispatcher.handle(&p, &requester()).await
        else {
            panic!("expected a rejected outcome");
        };
        assert!(!outcome.succeeded);
        assert!(!navigation.has_next);
        assert_eq!(batch.current_index, 2);
    }

    #[tokio::test]
    async fn advance_to_unknown_item_still_navigates() {
        let (dispatcher, _) = setup(ScriptedProvider::new());
        let p = payload("advance")
            .with(keys::ALL_JOB_IDS, "J1,J2")
            .with(keys::TOTAL_CONTACTS, "2");
        let DispatchResult::Navigate(screen) = dispatcher.handle(&p, &requester()).await else {
            panic!("expected navigation");
        };
        assert_eq!(screen.item_id, "J2");
        assert!(screen.details.is_none());
    }

    #[tokio::test]
    async fn unknown_verb_is_echoed() {
        let (dispatcher, _) = setup(ScriptedProvider::new());
        let p = payload("frobnicate")
            .with(keys::ALL_JOB_IDS, "A,B")
            .with(keys::CURRENT_INDEX, "2");
        let DispatchResult::Outcome {
            outcome,
            navigation,
            batch,
        } = dispatcher.handle(&p, &requester()).await
        else {
            panic!("expected an outcome");
        };
        assert!(!outcome.succeeded);
        assert!(outcome.message.contains("frobnicate"));
        assert!(!navigation.has_next);
        assert_eq!(batch.current_index, 2);
        assert_eq!(batch.item_ids, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn batch_send_produces_summary() {
        let (dispatcher, _) = setup(ScriptedProvider::new().text("C", "Error: no email"));
        let p = payload("batch-send")
            .with(keys::ALL_JOB_IDS, "A,B,C")
            .with(keys::EXCLUDED_JOBS, "b");
        let DispatchResult::Summary(summary) = dispatcher.handle(&p, &requester()).await else {
            panic!("expected a summary");
        };
        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.failed_ids, vec!["C"]);
        assert_eq!(summary.excluded_ids, vec!["B"]);
    }

    #[tokio::test]
    async fn batch_send_with_everything_excluded_is_rejected() {
        let (dispatcher, _) = setup(ScriptedProvider::new());
        let p = payload("send_rfi_multi")
            .with(keys::ALL_JOB_IDS, "A,B")
            .with(keys::EXCLUDED_JOBS, "A,B");
        let DispatchResult::Outcome { outcome, .. } = dispatcher.handle(&p, &requester()).await
        else {
            panic!("expected an outcome");
        };
        assert_eq!(
            outcome.message,
            "No jobs selected for RFI (all jobs were excluded)"
        );
    }

    #[tokio::test]
    async fn switch_to_individual_restarts_at_first_item() {
        let (dispatcher, _) = setup(ScriptedProvider::new());
        let p = payload("batch-switch-to-individual")
            .with(keys::ALL_JOB_IDS, "A,B,C")
            .with(keys::CURRENT_INDEX, "3")
            .with(keys::JOB_COUNT, "3");
        let DispatchResult::Navigate(screen) = dispatcher.handle(&p, &requester()).await else {
            panic!("expected navigation");
        };
        assert_eq!(screen.item_id, "A");
        assert_eq!(screen.batch.current_index, 1);
        assert_eq!(screen.batch.total, 3);
        assert!(screen.batch.has_more());
    }

    #[tokio::test]
    async fn terminal_verbs_offer_nothing_further() {
        let (dispatcher, _) = setup(ScriptedProvider::new());
        match dispatcher.handle(&payload("complete"), &requester()).await {
            DispatchResult::Terminal { message, .. } => assert_eq!(message, REVIEW_COMPLETED),
            other => panic!("unexpected {:?}", other),
        }
        match dispatcher.handle(&payload("cancel_multi_review"), &requester()).await {
            DispatchResult::Terminal { message, .. } => assert_eq!(message, REVIEW_CANCELLED),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn review_pending_opens_batch_or_reports_none() {
        let (dispatcher, _) = setup(ScriptedProvider::new());
        let DispatchResult::Outcome { outcome, .. } =
            dispatcher.handle(&payload("review-pending"), &requester()).await
        else {
            panic!("expected an outcome");
        };
        assert_eq!(outcome.message, NO_PENDING);

        let mut provider = ScriptedProvider::new()
            .detail(ItemDetails::new("J1", "ITR", "Smith"))
            .detail(ItemDetails::new("J2", "ITR", "Jones"));
        provider.pending = vec!["J2".into(), "J1".into(), "J9".into()];
        let (dispatcher, _) = setup(provider);
        let DispatchResult::BatchReview { batch, items } =
            dispatcher.handle(&payload("view_preworkin_jobs"), &requester()).await
        else {
            panic!("expected a batch review");
        };
        assert_eq!(batch.item_ids, vec!["J2", "J1", "J9"]);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].item_id, "J2");
    }

    #[tokio::test]
    async fn stop_flow_passes_note_as_reason() {
        let (dispatcher, provider) = setup(ScriptedProvider::new());
        let p = payload("stop_rfi_flow")
            .with(keys::JOB_ID, "J1")
            .with(keys::PARTNER_NOTES, "client called in");
        let DispatchResult::Outcome {
            outcome,
            navigation,
            ..
        } = dispatcher.handle(&p, &requester()).await
        else {
            panic!("expected an outcome");
        };
        assert!(outcome.succeeded);
        assert_eq!(outcome.action_label, "RFI Flow Stopped");
        assert_eq!(outcome.message, "RFI flow stopped for job J1");
        assert!(!navigation.has_next);

        let calls = provider.calls();
        assert_eq!(calls[0].op, "stop_flow");
        assert_eq!(calls[0].note.as_deref(), Some("client called in"));
    }

    #[tokio::test]
    async fn stop_flow_without_active_workflow_keeps_reason() {
        let (dispatcher, _) = setup(ScriptedProvider::new().script(
            "J1",
            Script::Reply(ProviderReply::failed(
                ReasonCode::NoActiveWorkflow,
                "Stop RFI flow failed for job J1: no active RFI workflow",
            )),
        ));
        let p = payload("stop-flow").with(keys::JOB_ID, "J1");
        let DispatchResult::Outcome { outcome, .. } = dispatcher.handle(&p, &requester()).await
        else {
            panic!("expected an outcome");
        };
        assert!(!outcome.succeeded);
        assert_eq!(outcome.reason, Some(ReasonCode::NoActiveWorkflow));
    }

    #[tokio::test]
    async fn review_at_risk_lists_items_or_reports_none() {
        let (dispatcher, _) = setup(ScriptedProvider::new());
        match dispatcher.handle(&payload("review-at-risk"), &requester()).await {
            DispatchResult::Terminal { message, .. } => assert_eq!(message, NO_AT_RISK),
            other => panic!("unexpected {:?}", other),
        }

        let mut provider = ScriptedProvider::new();
        provider.at_risk = vec![AtRiskItem {
            item_id: "J1".into(),
            name: "2026 ITR".into(),
            client_name: "Smith Family Trust".into(),
            contact_email: Some("smith@example.com".into()),
            contact_phone: None,
            partner_name: Some("Pat Partner".into()),
            due_date: None,
            days_since_initiated: 25,
        }];
        let (dispatcher, _) = setup(provider);
        let DispatchResult::AtRisk(items) = dispatcher
            .handle(&payload("view_at_risk_clients"), &requester())
            .await
        else {
            panic!("expected an at-risk list");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].days_since_initiated, 25);
    }
}
