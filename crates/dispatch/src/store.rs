//! Notification store — all reads and writes against the `notifications`
//! table.
//!
//! Writes enforce the lifecycle invariants: `is_push_sent` is flipped once
//! and never reset, and `delivery_status` only moves from `pending` to a
//! terminal state. Every status update is guarded by
//! `delivery_status = 'pending'`, which makes reconciliation idempotent.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use steeple_common::error::AppError;
use steeple_common::types::{DeliveryStatus, NotificationRecord};

use crate::provider::DispatchResult;

/// Parameters for inserting a notification on the immediate-send path.
///
/// Immediate records are inserted pre-claimed (`is_push_sent = true`) so an
/// overlapping scheduled drain can never pick them up.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
    /// Future delivery time; defaults to now.
    pub scheduled_for: Option<DateTime<Utc>>,
    pub correlation_id: Uuid,
}

/// Service layer for notification persistence.
pub struct NotificationStore;

impl NotificationStore {
    /// Fetch up to `limit` due records: pending, unclaimed, and scheduled at
    /// or before now. Oldest first.
    pub async fn fetch_due(
        pool: &PgPool,
        limit: i64,
    ) -> Result<Vec<NotificationRecord>, AppError> {
        let records: Vec<NotificationRecord> = sqlx::query_as(
            r#"
            SELECT *
            FROM notifications
            WHERE delivery_status = 'pending'
              AND is_push_sent = false
              AND scheduled_for <= NOW()
            ORDER BY scheduled_for ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(records)
    }

    /// Atomically claim a record for dispatch by flipping `is_push_sent`
    /// from false to true. Returns false when another drain already claimed
    /// it — the affected-row count is the concurrency guard between
    /// overlapping drain invocations.
    pub async fn claim(pool: &PgPool, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET is_push_sent = true, updated_at = NOW()
            WHERE id = $1 AND is_push_sent = false
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Write a dispatch outcome back to a single record.
    pub async fn mark_result(
        pool: &PgPool,
        id: Uuid,
        result: &DispatchResult,
    ) -> Result<(), AppError> {
        let (status, failure_reason) = if result.ok {
            (DeliveryStatus::Sent, None)
        } else {
            (DeliveryStatus::Failed, Some(result.failure_reason()))
        };

        sqlx::query(
            r#"
            UPDATE notifications
            SET delivery_status = $2,
                provider_id = $3,
                failure_reason = $4,
                sent_at = $5,
                updated_at = NOW()
            WHERE id = $1 AND delivery_status = 'pending'
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(&result.provider_id)
        .bind(&failure_reason)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        tracing::info!(
            notification_id = %id,
            status = %status,
            http_status = result.http_status,
            "Notification reconciled"
        );

        Ok(())
    }

    /// Write a dispatch outcome back to every still-pending record sharing a
    /// correlation id (one multi-user dispatch, several originating rows).
    /// Returns the number of records reconciled.
    pub async fn mark_result_by_correlation(
        pool: &PgPool,
        correlation_id: Uuid,
        result: &DispatchResult,
    ) -> Result<u64, AppError> {
        let (status, failure_reason) = if result.ok {
            (DeliveryStatus::Sent, None)
        } else {
            (DeliveryStatus::Failed, Some(result.failure_reason()))
        };

        let updated = sqlx::query(
            r#"
            UPDATE notifications
            SET delivery_status = $2,
                provider_id = $3,
                failure_reason = $4,
                sent_at = $5,
                updated_at = NOW()
            WHERE correlation_id = $1 AND delivery_status = 'pending'
            "#,
        )
        .bind(correlation_id)
        .bind(status.to_string())
        .bind(&result.provider_id)
        .bind(&failure_reason)
        .bind(Utc::now())
        .execute(pool)
        .await?
        .rows_affected();

        tracing::info!(
            correlation_id = %correlation_id,
            records = updated,
            status = %status,
            "Correlated notifications reconciled"
        );

        Ok(updated)
    }

    /// Mark a record skipped — a target-resolution dead-end, not an error.
    pub async fn mark_skipped(pool: &PgPool, id: Uuid, reason: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE notifications
            SET delivery_status = 'skipped', failure_reason = $2, updated_at = NOW()
            WHERE id = $1 AND delivery_status = 'pending'
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(pool)
        .await?;

        tracing::warn!(notification_id = %id, reason, "Notification skipped");
        Ok(())
    }

    /// Mark a record failed without a provider response (transport or
    /// processing error before reconciliation).
    pub async fn mark_failed(pool: &PgPool, id: Uuid, reason: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE notifications
            SET delivery_status = 'failed', failure_reason = $2, updated_at = NOW()
            WHERE id = $1 AND delivery_status = 'pending'
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Mark every still-pending record under a correlation id failed.
    pub async fn fail_by_correlation(
        pool: &PgPool,
        correlation_id: Uuid,
        reason: &str,
    ) -> Result<u64, AppError> {
        let updated = sqlx::query(
            r#"
            UPDATE notifications
            SET delivery_status = 'failed', failure_reason = $2, updated_at = NOW()
            WHERE correlation_id = $1 AND delivery_status = 'pending'
            "#,
        )
        .bind(correlation_id)
        .bind(reason)
        .execute(pool)
        .await?
        .rows_affected();

        Ok(updated)
    }

    /// Insert a pre-claimed record for the immediate-send path.
    pub async fn insert_claimed(
        pool: &PgPool,
        params: &NewNotification,
    ) -> Result<NotificationRecord, AppError> {
        let record: NotificationRecord = sqlx::query_as(
            r#"
            INSERT INTO notifications
                (id, user_id, title, message, data, target_type, correlation_id,
                 scheduled_for, is_push_sent, delivery_status)
            VALUES ($1, $2, $3, $4, $5, 'user', $6, $7, true, 'pending')
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&params.user_id)
        .bind(&params.title)
        .bind(&params.message)
        .bind(&params.data)
        .bind(params.correlation_id)
        .bind(params.scheduled_for.unwrap_or_else(Utc::now))
        .fetch_one(pool)
        .await?;

        Ok(record)
    }
}
