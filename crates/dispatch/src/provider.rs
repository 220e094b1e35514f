//! Push provider client — builds OneSignal REST payloads and sends them.
//!
//! Exactly one HTTPS call per invocation, no retries: redelivery policy
//! belongs to the callers, and the claim-before-dispatch guard in the drain
//! keeps re-polls from double-sending.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use steeple_common::config::AppConfig;
use steeple_common::error::AppError;

use crate::resolver::TargetSpec;

/// Delivery hints applied to every outbound notification. Fixed policy,
/// not caller-configurable.
const PRIORITY: u8 = 10;
const TTL_SECONDS: u32 = 86_400;
const DEFAULT_SOUND: &str = "default";
/// Android `visibility` 1 = public lockscreen visibility.
const ANDROID_VISIBILITY: u8 = 1;
/// Provider segment targeted by global broadcasts.
const SUBSCRIBED_SEGMENT: &str = "Subscribed Users";

/// One notification to deliver: content plus a resolved target.
#[derive(Debug, Clone)]
pub struct PushMessage {
    pub title: String,
    pub message: String,
    /// Structured payload forwarded verbatim in the provider `data` field.
    /// A string `url` entry is additionally lifted into the provider's
    /// deep-link field.
    pub data: serde_json::Value,
    pub target: TargetSpec,
    /// Deliver at this time instead of immediately.
    pub send_after: Option<DateTime<Utc>>,
}

/// Outcome of one provider call.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    /// Whether the provider accepted the notification (2xx response).
    pub ok: bool,
    /// Notification id assigned by the provider, when present.
    pub provider_id: Option<String>,
    pub http_status: u16,
    /// Full response body, preserved for diagnostics.
    pub raw_response: serde_json::Value,
}

impl DispatchResult {
    /// Human-readable reason for a failed dispatch, suitable for the
    /// record's `failure_reason` column.
    pub fn failure_reason(&self) -> String {
        let detail = self
            .raw_response
            .get("errors")
            .map(|e| e.to_string())
            .unwrap_or_else(|| self.raw_response.to_string());
        format!("provider returned HTTP {}: {}", self.http_status, detail)
    }
}

#[derive(Debug, Serialize)]
struct LocalizedText {
    en: String,
}

#[derive(Debug, Serialize)]
struct TagFilterClause {
    field: &'static str,
    key: String,
    relation: &'static str,
    value: String,
}

/// OneSignal `POST /notifications` request body. Exactly one of the three
/// targeting field groups is set.
#[derive(Debug, Serialize)]
struct ProviderRequest {
    app_id: String,
    headings: LocalizedText,
    contents: LocalizedText,
    data: serde_json::Value,
    priority: u8,
    ttl: u32,
    android_sound: &'static str,
    ios_sound: &'static str,
    android_visibility: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    include_external_user_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_for_external_user_ids: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filters: Option<Vec<TagFilterClause>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    included_segments: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    send_after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

/// HTTP client for the push provider REST API.
#[derive(Clone)]
pub struct PushClient {
    http: reqwest::Client,
    app_id: String,
    api_key: String,
    base_url: String,
}

impl PushClient {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            app_id: config.onesignal_app_id.clone(),
            api_key: config.onesignal_api_key.clone(),
            base_url: config.onesignal_api_url.trim_end_matches('/').to_string(),
        })
    }

    /// Send one notification to the provider.
    ///
    /// A non-2xx provider response is a normal `DispatchResult` with
    /// `ok = false` and the body preserved; only transport failures (DNS,
    /// connect, timeout) surface as `Err(AppError::Transport)`.
    pub async fn send(&self, message: &PushMessage) -> Result<DispatchResult, AppError> {
        let body = self.build_request(message)?;

        let response = self
            .http
            .post(format!("{}/notifications", self.base_url))
            .header("Authorization", format!("Basic {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let http_status = response.status().as_u16();
        let ok = response.status().is_success();
        let text = response.text().await?;
        let raw_response: serde_json::Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(_) => json!({ "raw": text }),
        };

        let provider_id = raw_response
            .get("id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        if ok {
            tracing::info!(
                provider_id = provider_id.as_deref().unwrap_or("-"),
                "Push accepted by provider"
            );
        } else {
            tracing::warn!(http_status, body = %raw_response, "Push rejected by provider");
        }

        Ok(DispatchResult {
            ok,
            provider_id,
            http_status,
            raw_response,
        })
    }

    fn build_request(&self, message: &PushMessage) -> Result<ProviderRequest, AppError> {
        let mut request = ProviderRequest {
            app_id: self.app_id.clone(),
            headings: LocalizedText {
                en: message.title.clone(),
            },
            contents: LocalizedText {
                en: message.message.clone(),
            },
            data: message.data.clone(),
            priority: PRIORITY,
            ttl: TTL_SECONDS,
            android_sound: DEFAULT_SOUND,
            ios_sound: DEFAULT_SOUND,
            android_visibility: ANDROID_VISIBILITY,
            include_external_user_ids: None,
            channel_for_external_user_ids: None,
            filters: None,
            included_segments: None,
            send_after: message.send_after.map(|t| t.to_rfc3339()),
            url: message
                .data
                .get("url")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        };

        match &message.target {
            TargetSpec::ExplicitIds(ids) => {
                request.include_external_user_ids = Some(ids.clone());
                request.channel_for_external_user_ids = Some("push");
            }
            TargetSpec::TagFilter { key, value } => {
                request.filters = Some(vec![TagFilterClause {
                    field: "tag",
                    key: key.clone(),
                    relation: "=",
                    value: value.clone(),
                }]);
            }
            TargetSpec::Broadcast => {
                request.included_segments = Some(vec![SUBSCRIBED_SEGMENT]);
            }
            TargetSpec::Unresolvable => {
                return Err(AppError::Internal(
                    "unresolvable target passed to dispatcher".to_string(),
                ));
            }
        }

        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> PushClient {
        PushClient::new(&AppConfig {
            database_url: "unused".to_string(),
            onesignal_app_id: "test-app-id".to_string(),
            onesignal_api_key: "test-api-key".to_string(),
            onesignal_api_url: base_url.to_string(),
            drain_batch_size: 50,
            drain_interval_secs: 60,
            db_max_connections: 5,
            api_port: 3000,
        })
        .unwrap()
    }

    fn user_message(ids: &[&str]) -> PushMessage {
        PushMessage {
            title: "Sunday Service".to_string(),
            message: "Starts at 10am".to_string(),
            data: json!({}),
            target: TargetSpec::ExplicitIds(ids.iter().map(|s| s.to_string()).collect()),
            send_after: None,
        }
    }

    #[test]
    fn test_explicit_ids_payload_shape() {
        let client = test_client("https://onesignal.com/api/v1");
        let request = client.build_request(&user_message(&["u1", "u2"])).unwrap();
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["app_id"], "test-app-id");
        assert_eq!(body["headings"]["en"], "Sunday Service");
        assert_eq!(body["contents"]["en"], "Starts at 10am");
        assert_eq!(body["include_external_user_ids"], json!(["u1", "u2"]));
        assert_eq!(body["channel_for_external_user_ids"], "push");
        assert_eq!(body["priority"], 10);
        assert_eq!(body["ttl"], 86_400);
        assert_eq!(body["android_visibility"], 1);
        assert!(body.get("filters").is_none());
        assert!(body.get("included_segments").is_none());
        assert!(body.get("send_after").is_none());
    }

    #[test]
    fn test_tag_filter_payload_shape() {
        let client = test_client("https://onesignal.com/api/v1");
        let message = PushMessage {
            target: TargetSpec::TagFilter {
                key: "branch_id".to_string(),
                value: "branch-42".to_string(),
            },
            ..user_message(&[])
        };
        let body = serde_json::to_value(client.build_request(&message).unwrap()).unwrap();

        assert_eq!(
            body["filters"],
            json!([{"field": "tag", "key": "branch_id", "relation": "=", "value": "branch-42"}])
        );
        assert!(body.get("include_external_user_ids").is_none());
    }

    #[test]
    fn test_broadcast_payload_shape() {
        let client = test_client("https://onesignal.com/api/v1");
        let message = PushMessage {
            target: TargetSpec::Broadcast,
            ..user_message(&[])
        };
        let body = serde_json::to_value(client.build_request(&message).unwrap()).unwrap();

        assert_eq!(body["included_segments"], json!(["Subscribed Users"]));
        assert!(body.get("include_external_user_ids").is_none());
        assert!(body.get("filters").is_none());
    }

    #[test]
    fn test_deep_link_url_lifted_from_data() {
        let client = test_client("https://onesignal.com/api/v1");
        let message = PushMessage {
            data: json!({"url": "app://meetings/7", "kind": "meeting"}),
            ..user_message(&["u1"])
        };
        let body = serde_json::to_value(client.build_request(&message).unwrap()).unwrap();

        assert_eq!(body["url"], "app://meetings/7");
        assert_eq!(body["data"]["kind"], "meeting");
    }

    #[test]
    fn test_send_after_serialized_rfc3339() {
        let client = test_client("https://onesignal.com/api/v1");
        let at = "2026-09-01T09:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let message = PushMessage {
            send_after: Some(at),
            ..user_message(&["u1"])
        };
        let body = serde_json::to_value(client.build_request(&message).unwrap()).unwrap();

        assert_eq!(body["send_after"], "2026-09-01T09:00:00+00:00");
    }

    #[test]
    fn test_unresolvable_target_rejected_before_io() {
        let client = test_client("https://onesignal.com/api/v1");
        let message = PushMessage {
            target: TargetSpec::Unresolvable,
            ..user_message(&[])
        };
        assert!(client.build_request(&message).is_err());
    }

    #[tokio::test]
    async fn test_send_success_returns_provider_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/notifications"))
            .and(header("Authorization", "Basic test-api-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "prov-123", "recipients": 2})),
            )
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let result = client.send(&user_message(&["u1", "u2"])).await.unwrap();

        assert!(result.ok);
        assert_eq!(result.provider_id.as_deref(), Some("prov-123"));
        assert_eq!(result.http_status, 200);
    }

    #[tokio::test]
    async fn test_send_non_2xx_preserves_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/notifications"))
            .and(body_partial_json(json!({"app_id": "test-app-id"})))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"errors": ["Invalid external ids"]})),
            )
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let result = client.send(&user_message(&["bad"])).await.unwrap();

        assert!(!result.ok);
        assert_eq!(result.http_status, 400);
        assert_eq!(result.raw_response["errors"][0], "Invalid external ids");
        assert!(result.failure_reason().contains("HTTP 400"));
        assert!(result.failure_reason().contains("Invalid external ids"));
    }

    #[tokio::test]
    async fn test_send_transport_error_surfaces() {
        // Nothing is listening on this port.
        let client = test_client("http://127.0.0.1:9");
        let result = client.send(&user_message(&["u1"])).await;

        assert!(matches!(result, Err(AppError::Transport(_))));
    }
}
