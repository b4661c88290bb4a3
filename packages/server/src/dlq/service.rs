use chrono::Utc;
use common::{DlqEnvelope, DlqErrorCode};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, Set, SqlErr,
};

use crate::entity::dead_letter_message;

/// Dead-letter table access for terminally failed watermark jobs.
pub struct DlqService<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> DlqService<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Persist a failed job. A second envelope for the same job returns the
    /// existing row.
    pub async fn send_to_dlq(
        &self,
        envelope: &DlqEnvelope,
    ) -> Result<dead_letter_message::Model, DbErr> {
        let first_failed_at = envelope
            .retry_history
            .first()
            .map(|r| r.timestamp)
            .unwrap_or_else(Utc::now);

        let model = dead_letter_message::ActiveModel {
            message_id: Set(envelope.message_id.clone()),
            item_id: Set(envelope.item_id.clone()),
            payload: Set(envelope.payload.clone()),
            error_message: Set(envelope.error_message.clone()),
            error_code: Set(envelope.error_code.to_string()),
            retry_count: Set(envelope.retry_history.len() as i32),
            retry_history: Set(serde_json::to_value(&envelope.retry_history).unwrap_or_default()),
            first_failed_at: Set(first_failed_at),
            created_at: Set(Utc::now()),
            resolved: Set(false),
            resolved_at: Set(None),
            ..Default::default()
        };

        match model.insert(self.conn).await {
            Ok(inserted) => Ok(inserted),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                dead_letter_message::Entity::find()
                    .filter(dead_letter_message::Column::MessageId.eq(&envelope.message_id))
                    .one(self.conn)
                    .await?
                    .ok_or_else(|| {
                        DbErr::Custom(
                            "UniqueConstraintViolation but existing row not found".to_string(),
                        )
                    })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn find_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<dead_letter_message::Model>, DbErr> {
        dead_letter_message::Entity::find()
            .filter(dead_letter_message::Column::MessageId.eq(message_id))
            .one(self.conn)
            .await
    }

    pub async fn count_unresolved(&self, error_code: Option<DlqErrorCode>) -> Result<u64, DbErr> {
        let mut query =
            dead_letter_message::Entity::find().filter(dead_letter_message::Column::Resolved.eq(false));
        if let Some(code) = error_code {
            query = query.filter(dead_letter_message::Column::ErrorCode.eq(code.as_str()));
        }
        query.count(self.conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::memory_db;
    use common::retry::RetryAttempt;

    fn envelope(job_id: &str) -> DlqEnvelope {
        DlqEnvelope {
            message_id: job_id.into(),
            item_id: Some("item-1".into()),
            payload: serde_json::json!({"job_id": job_id}),
            error_code: DlqErrorCode::MaxRetriesExceeded,
            error_message: "worker crashed".into(),
            retry_history: vec![
                RetryAttempt::new(1, "WORKER_CRASH", "signal 9"),
                RetryAttempt::new(2, "WORKER_CRASH", "signal 9"),
            ],
        }
    }

    #[tokio::test]
    async fn dead_letters_are_idempotent_per_job() {
        let db = memory_db().await;
        let dlq = DlqService::new(&db);

        let first = dlq.send_to_dlq(&envelope("job-1")).await.unwrap();
        assert_eq!(first.retry_count, 2);
        assert_eq!(first.error_code, "MAX_RETRIES_EXCEEDED");

        let second = dlq.send_to_dlq(&envelope("job-1")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(dlq.count_unresolved(None).await.unwrap(), 1);
    }
}
