//! Scheduled drain — one pass over the due, unsent notification queue.
//!
//! Each record runs through a linear pipeline: claim → resolve → dispatch →
//! reconcile. Records are processed sequentially (no fan-out) to keep
//! provider-response-to-record correlation unambiguous and to bound provider
//! rate usage. A failure in one record never aborts the rest of the batch.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use steeple_common::error::AppError;
use steeple_common::types::{DeliveryStatus, NotificationRecord};

use crate::provider::{PushClient, PushMessage};
use crate::resolver::{TargetResolver, TargetSpec};
use crate::store::NotificationStore;

/// Drives drain passes over the notification queue.
pub struct DrainProcessor {
    pool: PgPool,
    client: PushClient,
    batch_size: i64,
}

/// Aggregate result of one drain pass.
#[derive(Debug, Default, Serialize)]
pub struct DrainSummary {
    pub fetched: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Records another concurrent drain claimed first.
    pub already_claimed: usize,
    pub outcomes: Vec<RecordOutcome>,
}

/// Terminal outcome written for one record.
#[derive(Debug, Serialize)]
pub struct RecordOutcome {
    pub id: Uuid,
    pub status: DeliveryStatus,
    pub provider_id: Option<String>,
    pub detail: Option<String>,
}

impl DrainProcessor {
    pub fn new(pool: PgPool, client: PushClient, batch_size: i64) -> Self {
        Self {
            pool,
            client,
            batch_size,
        }
    }

    /// Process up to `batch_size` due notifications.
    ///
    /// Only whole-invocation errors (the initial due-records query) escalate;
    /// per-record errors are contained, recorded as `failed`, and reported in
    /// the summary.
    pub async fn run_once(&self) -> Result<DrainSummary, AppError> {
        let due = NotificationStore::fetch_due(&self.pool, self.batch_size).await?;

        let mut summary = DrainSummary {
            fetched: due.len(),
            ..Default::default()
        };

        if due.is_empty() {
            tracing::debug!("No pending notifications to process");
            return Ok(summary);
        }

        tracing::info!(count = due.len(), "Processing due notifications");

        for record in &due {
            let outcome = match self.process_record(record).await {
                Ok(Some(outcome)) => outcome,
                Ok(None) => {
                    summary.already_claimed += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!(
                        notification_id = %record.id,
                        error = %e,
                        "Failed to process notification"
                    );
                    let reason = format!("dispatch error: {e}");
                    if let Err(e) =
                        NotificationStore::mark_failed(&self.pool, record.id, &reason).await
                    {
                        tracing::error!(
                            notification_id = %record.id,
                            error = %e,
                            "Failed to record dispatch failure"
                        );
                    }
                    RecordOutcome {
                        id: record.id,
                        status: DeliveryStatus::Failed,
                        provider_id: None,
                        detail: Some(reason),
                    }
                }
            };

            match outcome.status {
                DeliveryStatus::Sent => summary.sent += 1,
                DeliveryStatus::Failed => summary.failed += 1,
                DeliveryStatus::Skipped => summary.skipped += 1,
                DeliveryStatus::Pending => {}
            }
            summary.outcomes.push(outcome);
        }

        tracing::info!(
            fetched = summary.fetched,
            sent = summary.sent,
            failed = summary.failed,
            skipped = summary.skipped,
            already_claimed = summary.already_claimed,
            "Drain pass complete"
        );

        Ok(summary)
    }

    /// Run one record through claim → resolve → dispatch → reconcile.
    ///
    /// Returns `None` when the record was claimed by a concurrent drain
    /// between the due-records query and the claim update.
    async fn process_record(
        &self,
        record: &NotificationRecord,
    ) -> Result<Option<RecordOutcome>, AppError> {
        // Claim before dispatching: flipping is_push_sent first closes the
        // double-send window between overlapping drains.
        if !NotificationStore::claim(&self.pool, record.id).await? {
            tracing::debug!(notification_id = %record.id, "Record claimed by another drain");
            return Ok(None);
        }

        let target = TargetResolver::resolve(&self.pool, record).await?;
        if target == TargetSpec::Unresolvable {
            let reason = "no delivery target";
            NotificationStore::mark_skipped(&self.pool, record.id, reason).await?;
            return Ok(Some(RecordOutcome {
                id: record.id,
                status: DeliveryStatus::Skipped,
                provider_id: None,
                detail: Some(reason.to_string()),
            }));
        }

        let message = build_message(record, target);
        let result = self.client.send(&message).await?;
        NotificationStore::mark_result(&self.pool, record.id, &result).await?;

        Ok(Some(RecordOutcome {
            id: record.id,
            status: if result.ok {
                DeliveryStatus::Sent
            } else {
                DeliveryStatus::Failed
            },
            provider_id: result.provider_id.clone(),
            detail: (!result.ok).then(|| result.failure_reason()),
        }))
    }
}

/// Build the outbound message for a record, injecting its correlation id
/// into the provider data payload so responses can be traced back to rows.
fn build_message(record: &NotificationRecord, target: TargetSpec) -> PushMessage {
    PushMessage {
        title: record.title.clone(),
        message: record.message.clone(),
        data: with_correlation_id(&record.data, record.correlation_id),
        target,
        send_after: None,
    }
}

/// Return `data` with a `_correlation_id` entry added. Non-object payloads
/// are replaced by a fresh object.
pub fn with_correlation_id(data: &serde_json::Value, correlation_id: Uuid) -> serde_json::Value {
    let mut data = match data {
        serde_json::Value::Object(map) => serde_json::Value::Object(map.clone()),
        _ => serde_json::json!({}),
    };
    data["_correlation_id"] = serde_json::Value::String(correlation_id.to_string());
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_id_added_to_object_payload() {
        let id = Uuid::new_v4();
        let data = serde_json::json!({"kind": "meeting", "meeting_id": "m-1"});
        let tagged = with_correlation_id(&data, id);

        assert_eq!(tagged["kind"], "meeting");
        assert_eq!(tagged["_correlation_id"], id.to_string());
    }

    #[test]
    fn test_correlation_id_replaces_non_object_payload() {
        let id = Uuid::new_v4();
        let tagged = with_correlation_id(&serde_json::Value::Null, id);

        assert_eq!(tagged["_correlation_id"], id.to_string());
        assert_eq!(tagged.as_object().unwrap().len(), 1);
    }
}
