//! Review service: the single entry point the transport talks to.
//!
//! Wires the dispatcher, the intent router, and the renderer together.
//! Every call yields a [`Screen`], failures included.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use super::codec::ActionPayload;
use super::dispatcher::ActionDispatcher;
use super::intent::{IntentRouter, ReviewIntent};
use super::model::{DispatchResult, Requester, ReviewBatch};
use super::provider::{ItemDataProvider, ItemDetails};
use super::screen::{self, Screen};
use crate::config::ReviewConfig;
use crate::error::ConfigError;

pub struct ReviewService {
    provider: Arc<dyn ItemDataProvider>,
    dispatcher: ActionDispatcher,
    router: IntentRouter,
}

impl ReviewService {
    pub fn new(
        provider: Arc<dyn ItemDataProvider>,
        config: &ReviewConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            dispatcher: ActionDispatcher::new(Arc::clone(&provider), config),
            router: IntentRouter::new(&config.item_id_pattern)?,
            provider,
        })
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    /// Handle a submitted screen action.
    pub async fn handle_action(&self, payload: &ActionPayload, requester: &Requester) -> Screen {
        let result = match self.dispatcher.handle(payload, requester).await {
            DispatchResult::BatchReview { batch, items } => {
                let (batch, items) = order_for_review(&batch.item_ids, items);
                DispatchResult::BatchReview { batch, items }
            }
            other => other,
        };
        screen::render(&result, Self::today())
    }

    /// Handle a free-text message.
    pub async fn handle_message(&self, text: &str) -> Screen {
        match self.router.route(text) {
            ReviewIntent::Status => self.status_screen().await,
            ReviewIntent::ReviewItems(ids) if ids.len() == 1 => self.single_review(&ids[0]).await,
            ReviewIntent::ReviewItems(ids) => self.batch_review(&ids).await,
            ReviewIntent::Help => screen::help(),
        }
    }

    /// Dashboard screen.
    pub async fn status_screen(&self) -> Screen {
        match self.provider.fetch_status_summary().await {
            Ok(summary) => screen::status_summary(&summary),
            Err(e) => {
                warn!(error = %e, "Status summary unavailable");
                screen::error("Status unavailable", &e.to_string())
            }
        }
    }

    async fn single_review(&self, item_id: &str) -> Screen {
        match self.provider.fetch_details(item_id).await {
            Ok(Some(details)) => {
                info!(item_id, "Opening single-item review");
                let batch = ReviewBatch::single(details.item_id.clone());
                screen::item_review(&details.item_id, Some(&details), &batch, Self::today())
            }
            Ok(None) => screen::error("Job not found", &format!("Job {} was not found.", item_id)),
            Err(e) => {
                warn!(item_id, error = %e, "Failed to load item for review");
                screen::error("Could not load job", &e.to_string())
            }
        }
    }

    async fn batch_review(&self, ids: &[String]) -> Screen {
        let items = self.dispatcher.fetch_all(ids).await;
        if items.is_empty() {
            return screen::error(
                "No jobs found",
                &format!("None of these jobs were found: {}", ids.join(", ")),
            );
        }

        info!(requested = ids.len(), found = items.len(), "Opening batch review");
        let (batch, items) = order_for_review(ids, items);
        screen::batch_review(&batch, &items, Self::today())
    }
}

/// Sort items by due date and build the batch in that order; ids with no
/// record follow in their original order.
fn order_for_review(ids: &[String], mut items: Vec<ItemDetails>) -> (ReviewBatch, Vec<ItemDetails>) {
    screen::sort_by_due(&mut items);
    let missing = ids
        .iter()
        .filter(|id| !items.iter().any(|i| i.item_id.eq_ignore_ascii_case(id)))
        .cloned();
    let ordered: Vec<String> = items
        .iter()
        .map(|i| i.item_id.clone())
        .chain(missing)
        .collect();
    (ReviewBatch::new(ordered), items)
}
