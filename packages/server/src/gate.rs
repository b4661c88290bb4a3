//! Access gate: decides whether a viewer's earlier artifact for an item is
//! still fresh enough to hand out again.

use chrono::{DateTime, Duration, Utc};
use common::AccessKind;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use tracing::info;

use crate::entity::access_log;
use crate::error::VaultError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevealDecision {
    /// Serve the artifact of this completed job again.
    ReuseExisting { completed_job_id: String },
    MustProcess,
}

/// Pure freshness rule over a (viewer, item) access history.
///
/// Only the newest entry counts. It is fresh while strictly younger than
/// `window`; an entry exactly `window` old is stale.
pub fn decide(history: &[access_log::Model], now: DateTime<Utc>, window: Duration) -> RevealDecision {
    match history.iter().max_by_key(|e| e.created_at) {
        Some(latest) if now - latest.created_at < window => RevealDecision::ReuseExisting {
            completed_job_id: latest.completed_job_id.clone(),
        },
        _ => RevealDecision::MustProcess,
    }
}

/// Newest access entry for (viewer, item).
pub async fn latest_entry<C: ConnectionTrait>(
    conn: &C,
    viewer_id: &str,
    item_id: &str,
) -> Result<Option<access_log::Model>, VaultError> {
    Ok(access_log::Entity::find()
        .filter(access_log::Column::ViewerId.eq(viewer_id))
        .filter(access_log::Column::ItemId.eq(item_id))
        .order_by_desc(access_log::Column::CreatedAt)
        .one(conn)
        .await?)
}

/// Append one reveal to the access log.
pub async fn record_reveal<C: ConnectionTrait>(
    conn: &C,
    viewer_id: &str,
    item_id: &str,
    completed_job_id: &str,
    access_kind: AccessKind,
) -> Result<access_log::Model, VaultError> {
    let entry = access_log::ActiveModel {
        id: Set(uuid::Uuid::now_v7().to_string()),
        viewer_id: Set(viewer_id.to_string()),
        item_id: Set(item_id.to_string()),
        completed_job_id: Set(completed_job_id.to_string()),
        access_kind: Set(access_kind),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;

    info!(
        access_log_id = %entry.id,
        viewer_id,
        item_id,
        completed_job_id,
        access_kind = %access_kind,
        "Recorded reveal"
    );
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(completed_job_id: &str, at: DateTime<Utc>) -> access_log::Model {
        access_log::Model {
            id: uuid::Uuid::now_v7().to_string(),
            viewer_id: "42".into(),
            item_id: "item".into(),
            completed_job_id: completed_job_id.into(),
            access_kind: AccessKind::FirstView,
            created_at: at,
        }
    }

    #[test]
    fn empty_history_must_process() {
        assert_eq!(decide(&[], Utc::now(), Duration::days(7)), RevealDecision::MustProcess);
    }

    #[test]
    fn freshness_boundary_is_exclusive() {
        let now = Utc::now();
        let window = Duration::days(7);

        let just_fresh = [entry("c1", now - window + Duration::seconds(1))];
        assert_eq!(
            decide(&just_fresh, now, window),
            RevealDecision::ReuseExisting {
                completed_job_id: "c1".into()
            }
        );

        let exactly = [entry("c1", now - window)];
        assert_eq!(decide(&exactly, now, window), RevealDecision::MustProcess);

        let stale = [entry("c1", now - window - Duration::seconds(1))];
        assert_eq!(decide(&stale, now, window), RevealDecision::MustProcess);
    }

    #[test]
    fn newest_entry_wins() {
        let now = Utc::now();
        let history = [
            entry("old", now - Duration::days(30)),
            entry("new", now - Duration::hours(1)),
            entry("mid", now - Duration::days(8)),
        ];
        assert_eq!(
            decide(&history, now, Duration::days(7)),
            RevealDecision::ReuseExisting {
                completed_job_id: "new".into()
            }
        );
    }
}
