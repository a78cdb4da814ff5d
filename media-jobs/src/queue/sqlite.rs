//! Durable queue backed by the `queue_message` table.
//!
//! Consumers `receive` a batch (which hides it for the visibility timeout)
//! and `ack` each message once handled. A message that is received but never
//! acknowledged becomes visible again, giving at-least-once delivery.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use std::time::Duration;

use super::{EnqueueOutcome, QueueError, QueueGateway, QueueName, validate_body};
use crate::database::time::now_ms;
use crate::Result;

/// Default time a received message stays hidden from other consumers.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(6 * 60);

/// A message handed to a consumer.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub id: i64,
    pub body: String,
    pub receive_count: i64,
}

pub struct SqliteQueue {
    write_pool: SqlitePool,
    visibility_timeout: Duration,
}

impl SqliteQueue {
    pub fn new(write_pool: SqlitePool) -> Self {
        Self {
            write_pool,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Take up to `max` visible messages from `queue`, oldest first.
    pub async fn receive(&self, queue: QueueName, max: u32) -> Result<Vec<QueueMessage>> {
        let now = now_ms();
        let visible_before = now - self.visibility_timeout.as_millis() as i64;

        let mut messages = sqlx::query_as::<_, QueueMessage>(
            r#"
            UPDATE queue_message
            SET received_at = ?, receive_count = receive_count + 1
            WHERE id IN (
                SELECT id FROM queue_message
                WHERE queue = ?
                  AND (received_at IS NULL OR received_at <= ?)
                ORDER BY id
                LIMIT ?
            )
            RETURNING id, body, receive_count
            "#,
        )
        .bind(now)
        .bind(queue.as_str())
        .bind(visible_before)
        .bind(max as i64)
        .fetch_all(&self.write_pool)
        .await?;

        // RETURNING order is unspecified.
        messages.sort_by_key(|m| m.id);
        Ok(messages)
    }

    /// Delete a handled message. Returns false if it was already gone.
    pub async fn ack(&self, message_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM queue_message WHERE id = ?")
            .bind(message_id)
            .execute(&self.write_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of messages on `queue`, received or not.
    pub async fn depth(&self, queue: QueueName) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_message WHERE queue = ?")
            .bind(queue.as_str())
            .fetch_one(&self.write_pool)
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl QueueGateway for SqliteQueue {
    async fn enqueue(
        &self,
        queue: QueueName,
        ids: &[String],
    ) -> std::result::Result<Vec<EnqueueOutcome>, QueueError> {
        let unavailable = |e: sqlx::Error| QueueError::Unavailable {
            queue,
            reason: e.to_string(),
        };

        let mut tx = self.write_pool.begin().await.map_err(unavailable)?;
        let now = now_ms();
        let mut outcomes = Vec::with_capacity(ids.len());

        for id in ids {
            if let Err(reason) = validate_body(id) {
                outcomes.push(EnqueueOutcome::Failed {
                    id: id.clone(),
                    reason,
                });
                continue;
            }

            sqlx::query("INSERT INTO queue_message (queue, body, enqueued_at) VALUES (?, ?, ?)")
                .bind(queue.as_str())
                .bind(id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(unavailable)?;
            outcomes.push(EnqueueOutcome::Accepted { id: id.clone() });
        }

        tx.commit().await.map_err(unavailable)?;
        Ok(outcomes)
    }
}
