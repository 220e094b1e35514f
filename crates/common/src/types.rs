use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Addressing mode of a notification record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    User,
    Branch,
    Global,
}

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetType::User => write!(f, "user"),
            TargetType::Branch => write!(f, "branch"),
            TargetType::Global => write!(f, "global"),
        }
    }
}

/// Notification delivery status.
///
/// Transitions only `pending → {sent, failed, skipped}`; each of the three
/// is terminal for that record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
    Skipped,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Sent => write!(f, "sent"),
            DeliveryStatus::Failed => write!(f, "failed"),
            DeliveryStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// A notification queued for push delivery.
///
/// Created by application logic when an event warrants a notification;
/// mutated only by the dispatch pipeline; never deleted by this service.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationRecord {
    pub id: Uuid,
    /// Owning user. Doubles as the provider external id fallback when the
    /// user has no active device registration.
    pub user_id: Option<String>,
    pub title: String,
    pub message: String,
    /// Arbitrary structured payload forwarded to the provider.
    pub data: serde_json::Value,
    pub target_type: Option<TargetType>,
    /// Branch identifier for `target_type = branch`.
    pub target_value: Option<String>,
    /// Client-generated identifier correlating provider responses back to
    /// originating records when one dispatch covers several rows.
    pub correlation_id: Uuid,
    pub scheduled_for: DateTime<Utc>,
    /// Once true, never reset — a record is dispatched at most once.
    pub is_push_sent: bool,
    pub delivery_status: DeliveryStatus,
    pub failure_reason: Option<String>,
    /// Notification id assigned by the push provider on success.
    pub provider_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user's registered device, owned by the device-registration subsystem.
/// Read-only from the dispatch pipeline's perspective.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeviceRegistration {
    pub id: Uuid,
    pub user_id: String,
    /// External user id the push provider addresses this device by.
    pub external_id: Option<String>,
    pub device_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
