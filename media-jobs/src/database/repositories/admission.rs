//! Shared-ceiling bookkeeping across the process and convert stages.
//!
//! Counting in-flight units and reserving slots happen in one
//! `BEGIN IMMEDIATE` transaction on the write pool, so two admitters can never
//! both see the same free slot.

use async_trait::async_trait;
use sqlx::SqliteConnection;

use crate::database::models::Stage;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::database::{WritePool, begin_immediate};
use crate::Result;

/// Units holding a slot: queued or running jobs, plus queued or converting
/// merged formats whose job is still live.
const COUNT_IN_FLIGHT_SQL: &str = r#"
    SELECT
        (SELECT COUNT(*) FROM job
         WHERE status IN ('queued-processing', 'processing'))
      + (SELECT COUNT(*) FROM merged_format m
         WHERE m.status IN ('queued-converting', 'converting')
           AND NOT EXISTS (
               SELECT 1 FROM job j WHERE j.id = m.job_id AND j.status = 'cancelled'
           ))
"#;

/// Result of a reservation attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reservation {
    /// Units observed in flight before reserving.
    pub in_flight: u64,
    /// Free slots observed before reserving.
    pub available: u64,
    /// IDs moved to the queued status, in candidate order.
    pub reserved: Vec<String>,
    /// Candidates that were no longer in the pending status.
    pub skipped: Vec<String>,
}

#[async_trait]
pub trait AdmissionRepository: Send + Sync {
    async fn count_in_flight(&self) -> Result<u64>;
    /// Move candidates from the stage's pending to queued status, in order,
    /// until `ceiling` would be exceeded.
    async fn reserve(&self, stage: Stage, candidates: &[String], ceiling: u64)
    -> Result<Reservation>;
    /// Put reserved IDs back into the pending status. Returns the IDs moved.
    async fn release(&self, stage: Stage, ids: &[String]) -> Result<Vec<String>>;
    /// Move still-queued IDs to the stage's rejected status. Returns the IDs moved.
    async fn reject(&self, stage: Stage, ids: &[String]) -> Result<Vec<String>>;
}

pub struct SqlxAdmissionRepository {
    write_pool: WritePool,
}

impl SqlxAdmissionRepository {
    pub fn new(write_pool: WritePool) -> Self {
        Self { write_pool }
    }

    /// Conditional batch move between two statuses of a stage.
    async fn move_queued(&self, stage: Stage, ids: &[String], to: &str) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            UPDATE {} SET status = ?, updated_at = ?
            WHERE status = ? AND id IN (SELECT value FROM json_each(?))
            RETURNING id
            "#,
            stage.table()
        );
        let ids_json = serde_json::to_string(ids)?;

        retry_on_sqlite_busy("move_queued", || async {
            let moved: Vec<String> = sqlx::query_scalar(&sql)
                .bind(to)
                .bind(now_ms())
                .bind(stage.queued_status())
                .bind(&ids_json)
                .fetch_all(&self.write_pool)
                .await?;
            Ok(moved)
        })
        .await
    }
}

async fn count_in_flight_on(conn: &mut SqliteConnection) -> Result<u64> {
    let count: i64 = sqlx::query_scalar(COUNT_IN_FLIGHT_SQL)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count.max(0) as u64)
}

/// Update statement reserving one unit. Merged formats of a cancelled job are
/// never admitted.
fn reserve_sql(stage: Stage) -> String {
    match stage {
        Stage::Process => {
            "UPDATE job SET status = ?, updated_at = ? WHERE id = ? AND status = ?".to_string()
        }
        Stage::Convert => r#"
            UPDATE merged_format SET status = ?, updated_at = ?
            WHERE id = ? AND status = ?
              AND NOT EXISTS (
                  SELECT 1 FROM job j
                  WHERE j.id = merged_format.job_id AND j.status = 'cancelled'
              )
            "#
        .to_string(),
    }
}

#[async_trait]
impl AdmissionRepository for SqlxAdmissionRepository {
    async fn count_in_flight(&self) -> Result<u64> {
        let mut conn = self.write_pool.acquire().await?;
        count_in_flight_on(&mut conn).await
    }

    async fn reserve(
        &self,
        stage: Stage,
        candidates: &[String],
        ceiling: u64,
    ) -> Result<Reservation> {
        let sql = reserve_sql(stage);

        retry_on_sqlite_busy("reserve_slots", || async {
            let mut tx = begin_immediate(&self.write_pool).await?;
            let in_flight = count_in_flight_on(&mut tx).await?;
            let available = ceiling.saturating_sub(in_flight);

            let mut reservation = Reservation {
                in_flight,
                available,
                ..Default::default()
            };

            for id in candidates {
                if reservation.reserved.len() as u64 >= available {
                    break;
                }
                let result = sqlx::query(&sql)
                    .bind(stage.queued_status())
                    .bind(now_ms())
                    .bind(id)
                    .bind(stage.pending_status())
                    .execute(&mut *tx)
                    .await?;
                if result.rows_affected() == 1 {
                    reservation.reserved.push(id.clone());
                } else {
                    reservation.skipped.push(id.clone());
                }
            }

            tx.commit().await?;
            Ok(reservation)
        })
        .await
    }

    async fn release(&self, stage: Stage, ids: &[String]) -> Result<Vec<String>> {
        self.move_queued(stage, ids, stage.pending_status()).await
    }

    async fn reject(&self, stage: Stage, ids: &[String]) -> Result<Vec<String>> {
        self.move_queued(stage, ids, stage.rejected_status()).await
    }
}
