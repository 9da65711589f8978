//! Batch aggregator: one `initiate` per effective id, folded into a summary.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use super::model::{labels, ActionOutcome, BatchSummary, Requester, ReviewBatch};
use super::provider::{ItemDataProvider, ProviderReply};
use crate::error::ProviderError;

/// Failure message when a bulk send has nothing left after exclusions.
pub const ALL_EXCLUDED: &str = "No jobs selected for RFI (all jobs were excluded)";

/// Failure message when a bulk send carries no ids at all.
pub const NO_ITEMS: &str = "No jobs selected for RFI";

/// Result of a bulk send.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchRun {
    Summary(BatchSummary),
    /// Nothing was attempted.
    NothingToDo(ActionOutcome),
}

pub struct BatchAggregator {
    provider: Arc<dyn ItemDataProvider>,
    concurrency: usize,
}

impl BatchAggregator {
    pub fn new(provider: Arc<dyn ItemDataProvider>, concurrency: usize) -> Self {
        Self {
            provider,
            concurrency: concurrency.max(1),
        }
    }

    /// In-flight initiations allowed for one run.
    fn width(&self) -> usize {
        if self.concurrency > 1 && self.provider.supports_concurrent_writes() {
            self.concurrency
        } else {
            1
        }
    }

    /// Send an RFI for every effective id of the batch.
    ///
    /// Individual failures never stop the run. Outcomes, and therefore
    /// `failed_ids`, follow effective-id order whatever the concurrency.
    pub async fn send_all(&self, batch: &ReviewBatch, requester: &Requester) -> BatchRun {
        let ids = batch.effective_ids();
        if ids.is_empty() {
            let message = if batch.is_empty() { NO_ITEMS } else { ALL_EXCLUDED };
            warn!(
                items = batch.len(),
                excluded = batch.excluded_ids.len(),
                "Bulk send has no effective items"
            );
            return BatchRun::NothingToDo(ActionOutcome::failure(
                batch.item_ids.join(","),
                labels::SEND_ALL,
                message,
            ));
        }

        let note = batch.note.as_deref();
        let width = self.width();
        let provider = self.provider.as_ref();

        let outcomes: Vec<ActionOutcome> = if width > 1 {
            stream::iter(ids.iter().cloned())
                .map(|id| async move { initiate_item(provider, &id, requester, note).await })
                .buffered(width)
                .collect()
                .await
        } else {
            let mut outcomes = Vec::with_capacity(ids.len());
            for id in &ids {
                outcomes.push(initiate_item(provider, id, requester, note).await);
            }
            outcomes
        };

        let mut summary = BatchSummary::new(batch.excluded_in_batch());
        for outcome in outcomes {
            summary.record(outcome);
        }

        info!(
            succeeded = summary.success_count,
            failed = summary.failed_count,
            excluded = summary.excluded_ids.len(),
            width,
            "Bulk send finished"
        );
        BatchRun::Summary(summary)
    }
}

/// Initiate one item and turn whatever comes back into an outcome.
pub async fn initiate_item(
    provider: &dyn ItemDataProvider,
    item_id: &str,
    requester: &Requester,
    note: Option<&str>,
) -> ActionOutcome {
    let result = provider.initiate(item_id, requester, note).await;
    outcome_from(
        item_id,
        labels::RFI_SENT,
        result,
        format!("RFI initiated for job {}", item_id),
    )
}

/// Fold a provider result into an outcome.
///
/// A failed reply or a provider error is carried verbatim.
pub fn outcome_from(
    item_id: &str,
    label: &str,
    result: Result<ProviderReply, ProviderError>,
    success_message: String,
) -> ActionOutcome {
    match result {
        Ok(reply) if reply.is_success() => ActionOutcome::success(item_id, label, success_message),
        Ok(reply) => {
            warn!(item_id, reason = ?reply.reason, "Provider rejected action");
            ActionOutcome::failure(item_id, label, reply.message).with_reason(reply.reason)
        }
        Err(e) => {
            warn!(item_id, error = %e, "Provider error");
            ActionOutcome::failure(item_id, label, e.to_string())
        }
    }
}
