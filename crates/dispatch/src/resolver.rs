//! Target resolution — computes the delivery audience for a notification.
//!
//! A record addressed to a specific user resolves to that user's active
//! device registrations (falling back to the raw user id when none exist,
//! so every record gets at least one delivery attempt). Branch and global
//! records resolve to provider-side audience filters rather than explicit
//! device rows.

use std::collections::HashMap;
use std::collections::HashSet;

use sqlx::PgPool;

use steeple_common::error::AppError;
use steeple_common::types::{NotificationRecord, TargetType};

/// Resolved addressing mode for one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    /// Explicit provider external user ids, de-duplicated.
    ExplicitIds(Vec<String>),
    /// All audiences tagged with `key = value` on the provider side.
    TagFilter { key: String, value: String },
    /// All subscribed audiences.
    Broadcast,
    /// No valid delivery target; the caller must mark the record skipped
    /// without calling the dispatcher.
    Unresolvable,
}

/// Resolves notification records to delivery targets.
pub struct TargetResolver;

impl TargetResolver {
    /// Provider-side tag key that branch audiences are registered under.
    pub const BRANCH_TAG_KEY: &str = "branch_id";

    /// Resolve a notification record to its delivery target.
    pub async fn resolve(
        pool: &PgPool,
        record: &NotificationRecord,
    ) -> Result<TargetSpec, AppError> {
        if let Some(user_id) = &record.user_id
            && !user_id.trim().is_empty()
        {
            let ids = Self::active_external_ids(pool, user_id).await?;
            if ids.is_empty() {
                // Device registration may be delayed or missing; address the
                // raw user id so the attempt is still made.
                return Ok(TargetSpec::ExplicitIds(vec![user_id.clone()]));
            }
            return Ok(TargetSpec::ExplicitIds(ids));
        }

        match (record.target_type, &record.target_value) {
            (Some(TargetType::Branch), Some(value)) if !value.trim().is_empty() => {
                Ok(TargetSpec::TagFilter {
                    key: Self::BRANCH_TAG_KEY.to_string(),
                    value: value.clone(),
                })
            }
            (Some(TargetType::Global), _) => Ok(TargetSpec::Broadcast),
            _ => Ok(TargetSpec::Unresolvable),
        }
    }

    /// Resolve a list of user ids to provider external ids for a single
    /// multi-user dispatch (the immediate-send path).
    ///
    /// Users with active device registrations contribute their external ids;
    /// users without any contribute their raw id. Blank entries are dropped
    /// and the combined set is de-duplicated preserving input order.
    pub async fn resolve_users(
        pool: &PgPool,
        user_ids: &[String],
    ) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT user_id, external_id
            FROM user_devices
            WHERE user_id = ANY($1)
              AND is_active = true
              AND external_id IS NOT NULL
              AND external_id <> ''
            "#,
        )
        .bind(user_ids)
        .fetch_all(pool)
        .await?;

        let mut by_user: HashMap<String, Vec<String>> = HashMap::new();
        for (user_id, external_id) in rows {
            by_user.entry(user_id).or_default().push(external_id);
        }

        let mut targets = Vec::new();
        for user_id in user_ids {
            if user_id.trim().is_empty() {
                continue;
            }
            match by_user.get(user_id) {
                Some(ids) => targets.extend(ids.iter().cloned()),
                None => targets.push(user_id.clone()),
            }
        }

        Ok(dedup_preserving_order(targets))
    }

    /// Fetch the external ids of a user's active devices, de-duplicated.
    async fn active_external_ids(pool: &PgPool, user_id: &str) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT external_id
            FROM user_devices
            WHERE user_id = $1
              AND is_active = true
              AND external_id IS NOT NULL
              AND external_id <> ''
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(dedup_preserving_order(
            rows.into_iter().map(|(id,)| id).collect(),
        ))
    }
}

/// Remove duplicate ids, keeping the first occurrence of each.
/// A user with the same external id registered on several devices must not
/// receive the notification twice.
fn dedup_preserving_order(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_preserves_first_occurrence_order() {
        let ids = vec![
            "dev-a".to_string(),
            "dev-b".to_string(),
            "dev-a".to_string(),
            "dev-c".to_string(),
            "dev-b".to_string(),
        ];
        assert_eq!(
            dedup_preserving_order(ids),
            vec!["dev-a", "dev-b", "dev-c"]
        );
    }

    #[test]
    fn test_dedup_empty() {
        assert!(dedup_preserving_order(vec![]).is_empty());
    }
}
