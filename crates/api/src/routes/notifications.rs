//! Notification ingestion routes: immediate send and the scheduled drain
//! trigger.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use steeple_common::error::AppError;
use steeple_dispatch::processor::{DrainProcessor, DrainSummary, with_correlation_id};
use steeple_dispatch::provider::{DispatchResult, PushMessage};
use steeple_dispatch::resolver::{TargetResolver, TargetSpec};
use steeple_dispatch::store::{NewNotification, NotificationStore};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/notifications/send", post(send_notification))
        .route("/api/notifications/process-due", post(process_due))
}

/// Request body for the immediate-send endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationRequest {
    #[serde(default)]
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    pub data: Option<serde_json::Value>,
    /// Deliver at this time instead of immediately. Forwarded to the
    /// provider and recorded as the rows' scheduled time.
    pub send_after: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationResponse {
    /// Whether the provider accepted the dispatch.
    pub success: bool,
    pub provider_id: Option<String>,
    /// External ids the provider call targeted.
    pub target_ids: Vec<String>,
    /// Number of notification records reconciled under this dispatch.
    pub notified: u64,
}

/// POST /api/notifications/send — immediate push to an explicit user list.
///
/// One record per user is inserted under a shared correlation id, then a
/// single provider call covers the whole list and the outcome is reconciled
/// back per record by that id. Validation failures respond 400 before any
/// record is written or any provider call is made.
async fn send_notification(
    State(state): State<AppState>,
    Json(req): Json<SendNotificationRequest>,
) -> Result<Json<SendNotificationResponse>, AppError> {
    let user_ids: Vec<String> = req
        .user_ids
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();

    if user_ids.is_empty() {
        return Err(AppError::Validation(
            "userIds array is required and must not be empty".to_string(),
        ));
    }
    if req.title.trim().is_empty() || req.message.trim().is_empty() {
        return Err(AppError::Validation(
            "title and message are required".to_string(),
        ));
    }

    let correlation_id = Uuid::new_v4();
    let data = with_correlation_id(
        &req.data.clone().unwrap_or_else(|| serde_json::json!({})),
        correlation_id,
    );

    // The inserted rows are pre-claimed, so any failure past the first
    // insert must still drive them to a terminal state: the drain never
    // revisits a claimed row.
    let (target_ids, result) =
        match dispatch_to_users(&state, &user_ids, &req, &data, correlation_id).await {
            Ok(ok) => ok,
            Err(e) => {
                let reason = format!("dispatch error: {e}");
                if let Err(cleanup) =
                    NotificationStore::fail_by_correlation(&state.pool, correlation_id, &reason)
                        .await
                {
                    tracing::error!(
                        correlation_id = %correlation_id,
                        error = %cleanup,
                        "Failed to record dispatch failure"
                    );
                }
                return Err(e);
            }
        };

    let notified =
        NotificationStore::mark_result_by_correlation(&state.pool, correlation_id, &result)
            .await?;

    Ok(Json(SendNotificationResponse {
        success: result.ok,
        provider_id: result.provider_id,
        target_ids,
        notified,
    }))
}

/// Insert the pre-claimed records, resolve the audience, and make the
/// provider call. The caller reconciles the outcome (or the failure) back
/// to the rows by correlation id.
async fn dispatch_to_users(
    state: &AppState,
    user_ids: &[String],
    req: &SendNotificationRequest,
    data: &serde_json::Value,
    correlation_id: Uuid,
) -> Result<(Vec<String>, DispatchResult), AppError> {
    // Records are inserted pre-claimed so an overlapping scheduled drain
    // cannot pick them up mid-flight.
    for user_id in user_ids {
        NotificationStore::insert_claimed(
            &state.pool,
            &NewNotification {
                user_id: user_id.clone(),
                title: req.title.clone(),
                message: req.message.clone(),
                data: data.clone(),
                scheduled_for: req.send_after,
                correlation_id,
            },
        )
        .await?;
    }

    let target_ids = TargetResolver::resolve_users(&state.pool, user_ids).await?;

    tracing::info!(
        correlation_id = %correlation_id,
        users = user_ids.len(),
        targets = target_ids.len(),
        "Dispatching immediate notification"
    );

    let message = PushMessage {
        title: req.title.clone(),
        message: req.message.clone(),
        data: data.clone(),
        target: TargetSpec::ExplicitIds(target_ids.clone()),
        send_after: req.send_after,
    };

    let result = state.push.send(&message).await?;
    Ok((target_ids, result))
}

/// POST /api/notifications/process-due — run one drain pass.
///
/// Invoked by the external scheduler. Per-record failures are reported in
/// the summary, not as a top-level error.
async fn process_due(State(state): State<AppState>) -> Result<Json<DrainSummary>, AppError> {
    let processor = DrainProcessor::new(
        state.pool.clone(),
        state.push.clone(),
        state.config.drain_batch_size,
    );
    let summary = processor.run_once().await?;
    Ok(Json(summary))
}
