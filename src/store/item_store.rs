//! libSQL item store: items, related entities, and RFI workflows.
//!
//! Implements [`ItemDataProvider`] with the eligibility rules of the RFI
//! process. Business rule violations come back as failed replies with a
//! reason code; only database faults become errors.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{params, Connection, Database as LibSqlDatabase, Transaction};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DatabaseError, ProviderError};
use crate::review::model::Requester;
use crate::review::provider::{
    AT_RISK_AFTER_DAYS, AtRiskItem, ItemDataProvider, ItemDetails, ItemState, ProviderReply, ReasonCode, RelatedEntity,
    RemindersDue, StateCount, StatusSummary, WorkflowStatus,
};
use crate::store::migrations;

/// Pending items due within this many days count as approaching deadline.
pub const APPROACHING_DEADLINE_DAYS: i64 = 14;
/// Reminder schedule, in days since initiation.
pub const FIRST_REMINDER_DAY: i64 = 7;
pub const SECOND_REMINDER_DAY: i64 = 14;
pub const FINAL_NOTICE_DAY: i64 = 21;

const DATE_FORMAT: &str = "%Y-%m-%d";

const ITEM_COLUMNS: &str = "id, name, state, client_name, client_group, group_reference, \
    contact_email, contact_phone, partner_name, manager_name, due_date, bookkeeping";

/// libSQL-backed item store.
///
/// Holds one connection reused for all operations. Multi-statement writes
/// run in a transaction taken under `write_lock`.
pub struct ItemStore {
    _db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl ItemStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Item store opened");
        Ok(store)
    }

    /// Create an in-memory store (for tests and demos).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            _db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open a transaction on the shared connection. The guard must be held
    /// until the transaction is finished.
    async fn begin(&self) -> Result<(MutexGuard<'_, ()>, Transaction), DatabaseError> {
        let guard = self.write_lock.lock().await;
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("begin: {e}")))?;
        Ok((guard, tx))
    }

    // ── Items ───────────────────────────────────────────────────────

    /// Insert or replace an item and its related entities.
    pub async fn upsert_item(&self, item: &ItemDetails) -> Result<(), DatabaseError> {
        let (_write, tx) = self.begin().await?;
        let result = write_item(&tx, item).await;
        finish(tx, result).await?;

        debug!(item_id = %item.item_id, related = item.related.len(), "Item upserted");
        Ok(())
    }

    /// Load a JSON array of item records. Returns how many were stored.
    pub async fn seed_from_file(&self, path: &Path) -> Result<usize, DatabaseError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            DatabaseError::Serialization(format!("Failed to read seed file {}: {e}", path.display()))
        })?;
        let items: Vec<ItemDetails> = serde_json::from_str(&raw).map_err(|e| {
            DatabaseError::Serialization(format!("Invalid seed file {}: {e}", path.display()))
        })?;

        for item in &items {
            self.upsert_item(item).await?;
        }
        info!(path = %path.display(), count = items.len(), "Seeded item store");
        Ok(items.len())
    }

    async fn load_item(&self, item_id: &str) -> Result<Option<ItemDetails>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1"),
                params![item_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_item: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_item(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("load_item: {e}"))),
        }
    }

    async fn load_related(&self, item_id: &str) -> Result<Vec<RelatedEntity>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT name, due_date FROM related_entities WHERE item_id = ?1 ORDER BY position",
                params![item_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_related: {e}")))?;

        let mut related = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let name: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("load_related row: {e}")))?;
            let due: Option<String> = row.get(1).ok();
            related.push(RelatedEntity {
                name,
                due_date: due.as_deref().and_then(parse_date),
            });
        }
        Ok(related)
    }

    /// Status of the most recent workflow for an item.
    async fn latest_workflow_status(
        &self,
        item_id: &str,
    ) -> Result<Option<WorkflowStatus>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT status FROM workflows WHERE item_id = ?1 \
                 ORDER BY initiated_at DESC, rowid DESC LIMIT 1",
                params![item_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("latest_workflow_status: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let status: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("latest_workflow_status row: {e}")))?;
                Ok(status.parse().ok())
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("latest_workflow_status: {e}"))),
        }
    }

    /// Id of the item's initiated, unanswered workflow, if any.
    async fn active_workflow_id(&self, item_id: &str) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id FROM workflows WHERE item_id = ?1 AND status = 'initiated' LIMIT 1",
                params![item_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("active_workflow_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("active_workflow_id: {e}"))),
        }
    }

    // ── Reporting ───────────────────────────────────────────────────

    /// Status summary as of `now`.
    pub async fn status_summary_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<StatusSummary, DatabaseError> {
        let today = now.date_naive();

        let state_counts = self
            .grouped_counts("SELECT state, COUNT(*) FROM items GROUP BY state")
            .await?;
        let item_states = ItemState::ALL
            .iter()
            .map(|s| StateCount {
                label: s.label().to_string(),
                count: state_counts.get(s.as_str()).copied().unwrap_or(0),
            })
            .collect();

        let workflow_counts = self
            .grouped_counts("SELECT status, COUNT(*) FROM workflows GROUP BY status")
            .await?;
        let workflow_states = [
            WorkflowStatus::Initiated,
            WorkflowStatus::Responded,
            WorkflowStatus::Stopped,
            WorkflowStatus::DoNotSend,
        ]
        .iter()
        .filter_map(|s| {
            workflow_counts
                .get(s.as_str())
                .filter(|n| **n > 0)
                .map(|n| StateCount {
                    label: s.label().to_string(),
                    count: *n,
                })
        })
        .collect();

        let mut at_risk_count = 0;
        let mut reminders_due = RemindersDue::default();
        let mut rows = self
            .conn()
            .query(
                "SELECT initiated_at, first_reminder_at, second_reminder_at, final_notice_at \
                 FROM workflows WHERE status = 'initiated' AND responded_at IS NULL",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("status_summary workflows: {e}")))?;
        while let Ok(Some(row)) = rows.next().await {
            let initiated: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("status_summary row: {e}")))?;
            let sent = |i: i32| row.get::<String>(i).is_ok();
            let days = (today - parse_datetime(&initiated).date_naive()).num_days();

            if days >= AT_RISK_AFTER_DAYS {
                at_risk_count += 1;
            }
            if days >= FINAL_NOTICE_DAY && !sent(3) {
                reminders_due.final_notice += 1;
            } else if days >= SECOND_REMINDER_DAY && !sent(2) {
                reminders_due.second += 1;
            } else if days >= FIRST_REMINDER_DAY && !sent(1) {
                reminders_due.first += 1;
            }
        }

        let mut approaching_deadline_count = 0;
        let mut rows = self
            .conn()
            .query(
                "SELECT due_date FROM items WHERE state = 'pre_work_in' AND due_date IS NOT NULL",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("status_summary items: {e}")))?;
        while let Ok(Some(row)) = rows.next().await {
            let due = row.get::<String>(0).ok();
            if let Some(due) = due.as_deref().and_then(parse_date) {
                if (due - today).num_days() <= APPROACHING_DEADLINE_DAYS {
                    approaching_deadline_count += 1;
                }
            }
        }

        Ok(StatusSummary {
            generated_at: now,
            item_states,
            workflow_states,
            at_risk_count,
            approaching_deadline_count,
            reminders_due,
        })
    }

    /// Unanswered workflows initiated at least [`AT_RISK_AFTER_DAYS`] before
    /// `now`, longest waiting first.
    pub async fn at_risk_at(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AtRiskItem>, DatabaseError> {
        let today = now.date_naive();
        let mut rows = self
            .conn()
            .query(
                "SELECT i.id, i.name, i.client_name, i.contact_email, i.contact_phone, \
                    i.partner_name, i.due_date, w.initiated_at \
                 FROM workflows w JOIN items i ON i.id = w.item_id \
                 WHERE w.status = 'initiated' AND w.responded_at IS NULL \
                 ORDER BY w.initiated_at, w.rowid",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("at_risk: {e}")))?;

        let mut items = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            if items.len() >= limit {
                break;
            }
            let text = |i: i32| -> Result<String, DatabaseError> {
                row.get::<String>(i)
                    .map_err(|e| DatabaseError::Query(format!("at_risk row column {i}: {e}")))
            };
            let opt = |i: i32| row.get::<String>(i).ok();

            let days = (today - parse_datetime(&text(7)?).date_naive()).num_days();
            if days < AT_RISK_AFTER_DAYS {
                continue;
            }
            items.push(AtRiskItem {
                item_id: text(0)?,
                name: text(1)?,
                client_name: text(2)?,
                contact_email: opt(3),
                contact_phone: opt(4),
                partner_name: opt(5),
                due_date: opt(6).as_deref().and_then(parse_date),
                days_since_initiated: days,
            });
        }
        Ok(items)
    }

    async fn grouped_counts(&self, sql: &str) -> Result<HashMap<String, usize>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, ())
            .await
            .map_err(|e| DatabaseError::Query(format!("grouped_counts: {e}")))?;

        let mut counts = HashMap::new();
        while let Ok(Some(row)) = rows.next().await {
            let key: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("grouped_counts row: {e}")))?;
            let count = row.get::<i64>(1).unwrap_or(0).max(0) as usize;
            counts.insert(key, count);
        }
        Ok(counts)
    }
}

#[async_trait]
impl ItemDataProvider for ItemStore {
    async fn initiate(
        &self,
        item_id: &str,
        requester: &Requester,
        note: Option<&str>,
    ) -> Result<ProviderReply, ProviderError> {
        if requester.name.trim().is_empty() {
            return Ok(ProviderReply::failed(
                ReasonCode::MissingRequester,
                "RFI initiation failed: requester name is required",
            ));
        }

        let Some(item) = self.load_item(item_id).await? else {
            return Ok(ProviderReply::failed(
                ReasonCode::NotFound,
                format!("RFI initiation failed for job {item_id}: job not found"),
            ));
        };
        let id = item.item_id.as_str();

        if let Some(workflow_id) = self.active_workflow_id(id).await? {
            return Ok(ProviderReply::failed(
                ReasonCode::AlreadyInitiated,
                format!("RFI initiation failed for job {id}: RFI already initiated (workflow {workflow_id})"),
            ));
        }

        if item.state != ItemState::PreWorkIn {
            return Ok(ProviderReply::failed(
                ReasonCode::NotEligible,
                format!(
                    "RFI initiation failed for job {id}: job is not eligible (state: {})",
                    item.state.label()
                ),
            ));
        }

        let Some(email) = item
            .contact_email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
        else {
            return Ok(ProviderReply::failed(
                ReasonCode::MissingContactEmail,
                format!("RFI initiation failed for job {id}: client has no contact email"),
            ));
        };

        let recorded = {
            let (_write, tx) = self.begin().await?;
            let result = claim_and_record(&tx, id, requester, email, note).await;
            finish(tx, result).await?
        };
        let Some(workflow_id) = recorded else {
            return Ok(ProviderReply::failed(
                ReasonCode::AlreadyInitiated,
                format!("RFI initiation failed for job {id}: RFI already initiated"),
            ));
        };

        info!(item_id = id, workflow_id = %workflow_id, requested_by = %requester.name, "RFI initiated");
        Ok(ProviderReply::succeeded(format!(
            "RFI initiated for job {id}. Workflow {workflow_id} will email {email}."
        )))
    }

    async fn exclude(
        &self,
        item_id: &str,
        requester: &Requester,
        note: Option<&str>,
    ) -> Result<ProviderReply, ProviderError> {
        if requester.name.trim().is_empty() {
            return Ok(ProviderReply::failed(
                ReasonCode::MissingRequester,
                "Do Not Send failed: requester name is required",
            ));
        }

        let Some(item) = self.load_item(item_id).await? else {
            return Ok(ProviderReply::failed(
                ReasonCode::NotFound,
                format!("Do Not Send failed for job {item_id}: job not found"),
            ));
        };
        let id = item.item_id.as_str();

        match item.state {
            ItemState::DoNotSend => {
                return Ok(ProviderReply::failed(
                    ReasonCode::AlreadyExcluded,
                    format!("Do Not Send failed for job {id}: already marked Do Not Send"),
                ));
            }
            ItemState::PreWorkIn | ItemState::RfiInitiated => {}
            other => {
                return Ok(ProviderReply::failed(
                    ReasonCode::NotEligible,
                    format!(
                        "Do Not Send failed for job {id}: job is not eligible (state: {})",
                        other.label()
                    ),
                ));
            }
        }

        let stopped = {
            let (_write, tx) = self.begin().await?;
            let result = record_exclusion(&tx, id, requester, note).await;
            finish(tx, result).await?
        };

        info!(item_id = id, stopped_workflows = stopped, requested_by = %requester.name, "Item marked Do Not Send");
        Ok(ProviderReply::succeeded(format!(
            "Job {id} marked as Do Not Send"
        )))
    }

    async fn stop_flow(
        &self,
        item_id: &str,
        requester: &Requester,
        reason: Option<&str>,
    ) -> Result<ProviderReply, ProviderError> {
        if requester.name.trim().is_empty() {
            return Ok(ProviderReply::failed(
                ReasonCode::MissingRequester,
                "Stop RFI flow failed: requester name is required",
            ));
        }

        let Some(item) = self.load_item(item_id).await? else {
            return Ok(ProviderReply::failed(
                ReasonCode::NotFound,
                format!("Stop RFI flow failed for job {item_id}: job not found"),
            ));
        };
        let id = item.item_id.as_str();
        let no_active = || {
            ProviderReply::failed(
                ReasonCode::NoActiveWorkflow,
                format!("Stop RFI flow failed for job {id}: no active RFI workflow"),
            )
        };

        let Some(workflow_id) = self.active_workflow_id(id).await? else {
            return Ok(no_active());
        };

        let stopped = {
            let (_write, tx) = self.begin().await?;
            let result = record_stop(&tx, id, &workflow_id, requester, reason).await;
            finish(tx, result).await?
        };
        if !stopped {
            return Ok(no_active());
        }

        info!(item_id = id, workflow_id = %workflow_id, stopped_by = %requester.name, "RFI flow stopped");
        Ok(ProviderReply::succeeded(format!(
            "RFI flow stopped for job {id}. Workflow {workflow_id} will send no further reminders."
        )))
    }

    async fn fetch_details(&self, item_id: &str) -> Result<Option<ItemDetails>, ProviderError> {
        let Some(mut item) = self.load_item(item_id).await? else {
            return Ok(None);
        };
        item.related = self.load_related(&item.item_id).await?;
        item.workflow_status = self.latest_workflow_status(&item.item_id).await?;
        Ok(Some(item))
    }

    async fn fetch_status_summary(&self) -> Result<StatusSummary, ProviderError> {
        Ok(self.status_summary_at(Utc::now()).await?)
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<String>, ProviderError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id FROM items WHERE state = 'pre_work_in' \
                 ORDER BY due_date IS NULL, due_date, id LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_pending: {e}")))?;

        let mut ids = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            if let Ok(id) = row.get::<String>(0) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    async fn list_at_risk(&self, limit: usize) -> Result<Vec<AtRiskItem>, ProviderError> {
        Ok(self.at_risk_at(Utc::now(), limit).await?)
    }

    fn supports_concurrent_writes(&self) -> bool {
        true
    }
}

// ── Transactional writes ────────────────────────────────────────────

/// Commit on success, roll back on failure.
async fn finish<T>(tx: Transaction, result: Result<T, DatabaseError>) -> Result<T, DatabaseError> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| DatabaseError::Query(format!("commit: {e}")))?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}

async fn write_item(conn: &Connection, item: &ItemDetails) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO items (id, name, state, client_name, client_group, group_reference, \
            contact_email, contact_phone, partner_name, manager_name, due_date, bookkeeping, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13) \
         ON CONFLICT(id) DO UPDATE SET \
            name = excluded.name, state = excluded.state, client_name = excluded.client_name, \
            client_group = excluded.client_group, group_reference = excluded.group_reference, \
            contact_email = excluded.contact_email, contact_phone = excluded.contact_phone, \
            partner_name = excluded.partner_name, manager_name = excluded.manager_name, \
            due_date = excluded.due_date, bookkeeping = excluded.bookkeeping, \
            updated_at = excluded.updated_at",
        params![
            item.item_id.clone(),
            item.name.clone(),
            item.state.as_str(),
            item.client_name.clone(),
            opt_text(item.client_group.as_deref()),
            opt_text(item.group_reference.as_deref()),
            opt_text(item.contact_email.as_deref()),
            opt_text(item.contact_phone.as_deref()),
            opt_text(item.partner_name.as_deref()),
            opt_text(item.manager_name.as_deref()),
            opt_date(item.due_date),
            item.bookkeeping as i64,
            Utc::now().to_rfc3339(),
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("upsert_item: {e}")))?;

    conn.execute(
        "DELETE FROM related_entities WHERE item_id = ?1",
        params![item.item_id.clone()],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("upsert_item related: {e}")))?;

    for (position, entity) in item.related.iter().enumerate() {
        conn.execute(
            "INSERT INTO related_entities (item_id, position, name, due_date) VALUES (?1, ?2, ?3, ?4)",
            params![
                item.item_id.clone(),
                position as i64,
                entity.name.clone(),
                opt_date(entity.due_date),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_item related: {e}")))?;
    }
    Ok(())
}

/// Move the item to `rfi_initiated` and record its workflow. `None` when the
/// item was no longer pre-work-in, i.e. another initiation claimed it first.
async fn claim_and_record(
    conn: &Connection,
    item_id: &str,
    requester: &Requester,
    recipient: &str,
    note: Option<&str>,
) -> Result<Option<Uuid>, DatabaseError> {
    let claimed = conn
        .execute(
            "UPDATE items SET state = 'rfi_initiated', updated_at = ?2 \
             WHERE id = ?1 AND state = 'pre_work_in'",
            params![item_id, Utc::now().to_rfc3339()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("initiate claim: {e}")))?;
    if claimed == 0 {
        return Ok(None);
    }

    insert_workflow(
        conn,
        item_id,
        WorkflowStatus::Initiated,
        requester,
        Some(recipient),
        note,
    )
    .await
    .map(Some)
}

/// Stop any active workflow, record the exclusion, and mark the item.
/// Returns how many workflows were stopped.
async fn record_exclusion(
    conn: &Connection,
    item_id: &str,
    requester: &Requester,
    note: Option<&str>,
) -> Result<u64, DatabaseError> {
    let now = Utc::now().to_rfc3339();
    let stopped = conn
        .execute(
            "UPDATE workflows SET status = 'stopped', stopped_by = ?2, stop_reason = ?3, updated_at = ?4 \
             WHERE item_id = ?1 AND status = 'initiated'",
            params![item_id, requester.name.clone(), opt_text(note), now.clone()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("exclude stop workflows: {e}")))?;

    insert_workflow(conn, item_id, WorkflowStatus::DoNotSend, requester, None, note).await?;

    conn.execute(
        "UPDATE items SET state = 'do_not_send', updated_at = ?2 WHERE id = ?1",
        params![item_id, now],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("exclude update item: {e}")))?;
    Ok(stopped)
}

/// Stop one workflow and hand its item back to pre-work-in. `false` when
/// the workflow was no longer active.
async fn record_stop(
    conn: &Connection,
    item_id: &str,
    workflow_id: &str,
    requester: &Requester,
    reason: Option<&str>,
) -> Result<bool, DatabaseError> {
    let now = Utc::now().to_rfc3339();
    let stopped = conn
        .execute(
            "UPDATE workflows SET status = 'stopped', stopped_by = ?2, stop_reason = ?3, updated_at = ?4 \
             WHERE id = ?1 AND status = 'initiated'",
            params![workflow_id, requester.name.clone(), opt_text(reason), now.clone()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("stop_flow workflow: {e}")))?;
    if stopped == 0 {
        return Ok(false);
    }

    conn.execute(
        "UPDATE items SET state = 'pre_work_in', updated_at = ?2 \
         WHERE id = ?1 AND state = 'rfi_initiated'",
        params![item_id, now],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("stop_flow item: {e}")))?;
    Ok(true)
}

async fn insert_workflow(
    conn: &Connection,
    item_id: &str,
    status: WorkflowStatus,
    requester: &Requester,
    recipient: Option<&str>,
    note: Option<&str>,
) -> Result<Uuid, DatabaseError> {
    let id = Uuid::new_v4();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO workflows (id, item_id, status, requested_by, requester_contact, \
            recipient, note, initiated_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id.to_string(),
            item_id,
            status.as_str(),
            requester.name.clone(),
            opt_text(requester.contact.as_deref()),
            opt_text(recipient),
            opt_text(note),
            now.clone(),
            now,
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("insert_workflow: {e}")))?;
    Ok(id)
}

// ── Helper functions ────────────────────────────────────────────────

/// Map a row in `ITEM_COLUMNS` order to an item (without related entities).
fn row_to_item(row: &libsql::Row) -> Result<ItemDetails, DatabaseError> {
    let text = |i: i32| -> Result<String, DatabaseError> {
        row.get::<String>(i)
            .map_err(|e| DatabaseError::Query(format!("item row column {i}: {e}")))
    };
    let opt = |i: i32| row.get::<String>(i).ok();

    let state_str = text(2)?;
    let state = state_str
        .parse::<ItemState>()
        .map_err(DatabaseError::Serialization)?;

    Ok(ItemDetails {
        item_id: text(0)?,
        name: text(1)?,
        state,
        client_name: text(3)?,
        client_group: opt(4),
        group_reference: opt(5),
        contact_email: opt(6),
        contact_phone: opt(7),
        partner_name: opt(8),
        manager_name: opt(9),
        due_date: opt(10).as_deref().and_then(parse_date),
        bookkeeping: row.get::<i64>(11).unwrap_or(0) != 0,
        related: Vec::new(),
        workflow_status: None,
    })
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_date(d: Option<NaiveDate>) -> libsql::Value {
    match d {
        Some(d) => libsql::Value::Text(d.format(DATE_FORMAT).to_string()),
        None => libsql::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn test_store() -> ItemStore {
        ItemStore::new_memory().await.unwrap()
    }

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, m, d).unwrap()
    }

    fn partner() -> Requester {
        Requester::new("Pat Partner").with_contact("pat@example.com")
    }

    fn eligible(id: &str) -> ItemDetails {
        ItemDetails::new(id, "2026 Income Tax Return", format!("Client {id}"))
            .with_contact_email(format!("{}@client.example", id.to_lowercase()))
    }

    #[tokio::test]
    async fn initiate_moves_item_and_blocks_repeat() {
        let store = test_store().await;
        store.upsert_item(&eligible("J000001")).await.unwrap();

        let reply = store
            .initiate("J000001", &partner(), Some("first pass"))
            .await
            .unwrap();
        assert!(reply.is_success(), "{}", reply.message);
        assert!(reply.message.contains("j000001@client.example"));

        let item = store.fetch_details("J000001").await.unwrap().unwrap();
        assert_eq!(item.state, ItemState::RfiInitiated);
        assert_eq!(item.workflow_status, Some(WorkflowStatus::Initiated));

        let again = store.initiate("J000001", &partner(), None).await.unwrap();
        assert!(!again.is_success());
        assert_eq!(again.reason, Some(ReasonCode::AlreadyInitiated));
    }

    #[tokio::test]
    async fn initiate_is_case_insensitive_on_ids() {
        let store = test_store().await;
        store.upsert_item(&eligible("J000001")).await.unwrap();
        let reply = store.initiate("j000001", &partner(), None).await.unwrap();
        assert!(reply.is_success());
    }

    #[tokio::test]
    async fn initiate_rejects_ineligible_items() {
        let store = test_store().await;
        store
            .upsert_item(&ItemDetails::new("J000002", "ITR", "No Email Pty Ltd"))
            .await
            .unwrap();
        store
            .upsert_item(&eligible("J000003").with_state(ItemState::WorkIn))
            .await
            .unwrap();

        let cases = [
            ("J000002", partner(), ReasonCode::MissingContactEmail),
            ("J000003", partner(), ReasonCode::NotEligible),
            ("J999999", partner(), ReasonCode::NotFound),
            ("J000002", Requester::new("  "), ReasonCode::MissingRequester),
        ];
        for (id, requester, reason) in cases {
            let reply = store.initiate(id, &requester, None).await.unwrap();
            assert!(!reply.is_success());
            assert_eq!(reply.reason, Some(reason), "{id}: {}", reply.message);
            assert!(reply.message.contains("failed"));
        }

        let untouched = store.fetch_details("J000002").await.unwrap().unwrap();
        assert_eq!(untouched.state, ItemState::PreWorkIn);
    }

    #[tokio::test]
    async fn exclude_stops_active_workflow() {
        let store = test_store().await;
        store.upsert_item(&eligible("J000001")).await.unwrap();
        store.initiate("J000001", &partner(), None).await.unwrap();

        let reply = store
            .exclude("J000001", &partner(), Some("client prefers phone"))
            .await
            .unwrap();
        assert!(reply.is_success());

        let item = store.fetch_details("J000001").await.unwrap().unwrap();
        assert_eq!(item.state, ItemState::DoNotSend);
        assert_eq!(item.workflow_status, Some(WorkflowStatus::DoNotSend));

        let summary = store.status_summary_at(Utc::now()).await.unwrap();
        let stopped = summary
            .workflow_states
            .iter()
            .find(|s| s.label == "Stopped")
            .map(|s| s.count);
        assert_eq!(stopped, Some(1));

        let again = store.exclude("J000001", &partner(), None).await.unwrap();
        assert_eq!(again.reason, Some(ReasonCode::AlreadyExcluded));
    }

    const REJECT_WORKFLOWS: &str = "CREATE TRIGGER reject_workflows BEFORE INSERT ON workflows \
        BEGIN SELECT RAISE(ABORT, 'disk full'); END;";

    #[tokio::test]
    async fn failed_workflow_insert_leaves_item_eligible() {
        let store = test_store().await;
        store.upsert_item(&eligible("J000001")).await.unwrap();
        store.conn().execute_batch(REJECT_WORKFLOWS).await.unwrap();

        let err = store.initiate("J000001", &partner(), None).await.unwrap_err();
        assert!(matches!(err, ProviderError::Database(_)));
        assert!(err.to_string().contains("disk full"), "{err}");

        let item = store.fetch_details("J000001").await.unwrap().unwrap();
        assert_eq!(item.state, ItemState::PreWorkIn);
        assert_eq!(item.workflow_status, None);
        assert_eq!(store.list_pending(10).await.unwrap(), vec!["J000001"]);

        store
            .conn()
            .execute_batch("DROP TRIGGER reject_workflows;")
            .await
            .unwrap();
        let retry = store.initiate("J000001", &partner(), None).await.unwrap();
        assert!(retry.is_success(), "{}", retry.message);
    }

    #[tokio::test]
    async fn failed_exclusion_keeps_workflow_active() {
        let store = test_store().await;
        store.upsert_item(&eligible("J000001")).await.unwrap();
        store.initiate("J000001", &partner(), None).await.unwrap();
        store.conn().execute_batch(REJECT_WORKFLOWS).await.unwrap();

        assert!(store.exclude("J000001", &partner(), None).await.is_err());

        let item = store.fetch_details("J000001").await.unwrap().unwrap();
        assert_eq!(item.state, ItemState::RfiInitiated);
        assert_eq!(item.workflow_status, Some(WorkflowStatus::Initiated));
    }

    #[tokio::test]
    async fn stop_flow_returns_item_to_pending() {
        let store = test_store().await;
        store.upsert_item(&eligible("J000001")).await.unwrap();
        store.initiate("J000001", &partner(), None).await.unwrap();

        let reply = store
            .stop_flow("J000001", &partner(), Some("client called in"))
            .await
            .unwrap();
        assert!(reply.is_success(), "{}", reply.message);
        assert!(reply.message.contains("no further reminders"));

        let item = store.fetch_details("J000001").await.unwrap().unwrap();
        assert_eq!(item.state, ItemState::PreWorkIn);
        assert_eq!(item.workflow_status, Some(WorkflowStatus::Stopped));

        let mut rows = store
            .conn()
            .query(
                "SELECT stopped_by, stop_reason FROM workflows WHERE item_id = 'J000001'",
                (),
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<String>(0).unwrap(), "Pat Partner");
        assert_eq!(row.get::<String>(1).unwrap(), "client called in");

        let again = store.stop_flow("J000001", &partner(), None).await.unwrap();
        assert_eq!(again.reason, Some(ReasonCode::NoActiveWorkflow));

        let restarted = store.initiate("J000001", &partner(), None).await.unwrap();
        assert!(restarted.is_success(), "{}", restarted.message);
    }

    #[tokio::test]
    async fn stop_flow_rejects_unknown_items_and_anonymous_requests() {
        let store = test_store().await;
        store.upsert_item(&eligible("J000001")).await.unwrap();

        let missing = store.stop_flow("J999999", &partner(), None).await.unwrap();
        assert_eq!(missing.reason, Some(ReasonCode::NotFound));
        let anonymous = store
            .stop_flow("J000001", &Requester::new(""), None)
            .await
            .unwrap();
        assert_eq!(anonymous.reason, Some(ReasonCode::MissingRequester));
        let idle = store.stop_flow("J000001", &partner(), None).await.unwrap();
        assert_eq!(idle.reason, Some(ReasonCode::NoActiveWorkflow));
    }

    #[tokio::test]
    async fn at_risk_lists_longest_waiting_first() {
        let store = test_store().await;
        let now = Utc::now();
        for id in ["J000001", "J000002", "J000003"] {
            store.upsert_item(&eligible(id)).await.unwrap();
            store.initiate(id, &partner(), None).await.unwrap();
        }
        for (id, days) in [("J000001", 22), ("J000002", 5), ("J000003", 30)] {
            store
                .conn()
                .execute(
                    "UPDATE workflows SET initiated_at = ?2 WHERE item_id = ?1",
                    params![id, (now - Duration::days(days)).to_rfc3339()],
                )
                .await
                .unwrap();
        }

        let at_risk = store.at_risk_at(now, 10).await.unwrap();
        let ids: Vec<_> = at_risk.iter().map(|i| i.item_id.as_str()).collect();
        assert_eq!(ids, vec!["J000003", "J000001"]);
        assert_eq!(at_risk[0].days_since_initiated, 30);
        assert_eq!(
            at_risk[0].contact_email.as_deref(),
            Some("j000003@client.example")
        );
        assert_eq!(store.at_risk_at(now, 1).await.unwrap().len(), 1);

        store.stop_flow("J000003", &partner(), None).await.unwrap();
        let remaining = store.list_at_risk(10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].item_id, "J000001");
    }

    #[tokio::test]
    async fn fetch_details_includes_related_entities() {
        let store = test_store().await;
        let mut item = eligible("J000001").with_due_date(day(5, 15));
        item.related = vec![
            RelatedEntity {
                name: "Smith Super Fund".into(),
                due_date: Some(day(3, 31)),
            },
            RelatedEntity {
                name: "Jane Smith".into(),
                due_date: None,
            },
        ];
        store.upsert_item(&item).await.unwrap();

        let fetched = store.fetch_details("J000001").await.unwrap().unwrap();
        assert_eq!(fetched.related, item.related);
        assert_eq!(fetched.due_date, Some(day(5, 15)));
        assert_eq!(fetched.earliest_due_date(), Some(day(3, 31)));
        assert!(store.fetch_details("J404404").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_pending_orders_by_due_date() {
        let store = test_store().await;
        store.upsert_item(&eligible("J000001")).await.unwrap();
        store
            .upsert_item(&eligible("J000002").with_due_date(day(6, 1)))
            .await
            .unwrap();
        store
            .upsert_item(&eligible("J000003").with_due_date(day(2, 1)))
            .await
            .unwrap();
        store
            .upsert_item(&eligible("J000004").with_state(ItemState::Complete))
            .await
            .unwrap();

        let ids = store.list_pending(10).await.unwrap();
        assert_eq!(ids, vec!["J000003", "J000002", "J000001"]);
        assert_eq!(store.list_pending(1).await.unwrap(), vec!["J000003"]);
    }

    #[tokio::test]
    async fn status_summary_counts_risk_and_reminders() {
        let store = test_store().await;
        let now = Utc::now();
        let today = now.date_naive();

        for id in ["J000001", "J000002", "J000003"] {
            store.upsert_item(&eligible(id)).await.unwrap();
            store.initiate(id, &partner(), None).await.unwrap();
        }
        store
            .upsert_item(&eligible("J000004").with_due_date(today + Duration::days(10)))
            .await
            .unwrap();
        store
            .upsert_item(&eligible("J000005").with_due_date(today + Duration::days(60)))
            .await
            .unwrap();

        let backdate = |days: i64| (now - Duration::days(days)).to_rfc3339();
        let conn = store.conn();
        conn.execute(
            "UPDATE workflows SET initiated_at = ?1 WHERE item_id = 'J000001'",
            params![backdate(8)],
        )
        .await
        .unwrap();
        conn.execute(
            "UPDATE workflows SET initiated_at = ?1, first_reminder_at = ?2 WHERE item_id = 'J000002'",
            params![backdate(15), backdate(8)],
        )
        .await
        .unwrap();
        conn.execute(
            "UPDATE workflows SET initiated_at = ?1 WHERE item_id = 'J000003'",
            params![backdate(22)],
        )
        .await
        .unwrap();

        let summary = store.status_summary_at(now).await.unwrap();
        assert_eq!(summary.at_risk_count, 1);
        assert_eq!(summary.approaching_deadline_count, 1);
        assert_eq!(
            summary.reminders_due,
            RemindersDue {
                first: 1,
                second: 1,
                final_notice: 1
            }
        );
        assert_eq!(summary.total_items(), 5);
        let initiated = summary
            .item_states
            .iter()
            .find(|s| s.label == ItemState::RfiInitiated.label())
            .unwrap();
        assert_eq!(initiated.count, 3);
    }

    #[tokio::test]
    async fn seed_file_loads_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.json");
        std::fs::write(
            &path,
            r#"[
                {"item_id": "J000010", "name": "2026 ITR", "state": "pre_work_in",
                 "client_name": "Lee Family Trust", "contact_email": "lee@example.com",
                 "due_date": "2026-05-15",
                 "related": [{"name": "Lee Pty Ltd", "due_date": "2026-02-28"}]},
                {"item_id": "J000011", "name": "2026 FBT", "state": "work_in",
                 "client_name": "Ng Holdings"}
            ]"#,
        )
        .unwrap();

        let store = test_store().await;
        assert_eq!(store.seed_from_file(&path).await.unwrap(), 2);
        let item = store.fetch_details("J000010").await.unwrap().unwrap();
        assert_eq!(item.related.len(), 1);
        assert_eq!(store.list_pending(10).await.unwrap(), vec!["J000010"]);

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            store.seed_from_file(&path).await,
            Err(DatabaseError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn local_store_persists_between_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("review.db");
        {
            let store = ItemStore::new_local(&path).await.unwrap();
            store.upsert_item(&eligible("J000001")).await.unwrap();
        }
        let store = ItemStore::new_local(&path).await.unwrap();
        assert!(store.fetch_details("J000001").await.unwrap().is_some());
    }
}
