//! Request and job repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{JobDbModel, JobStatus, NewFormat, RequestDbModel};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::{Error, Result};

/// Outcome of a status update applied to a list of IDs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStatusUpdate {
    /// IDs whose row was updated, in input order.
    pub updated: Vec<String>,
    /// IDs with no matching row.
    pub missing: Vec<String>,
}

impl BatchStatusUpdate {
    fn split(ids: &[String], updated: Vec<String>) -> Self {
        let mut result = Self::default();
        for id in ids {
            if updated.contains(id) {
                if !result.updated.contains(id) {
                    result.updated.push(id.clone());
                }
            } else if !result.missing.contains(id) {
                result.missing.push(id.clone());
            }
        }
        result
    }
}

/// Job repository trait.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create_request(&self) -> Result<RequestDbModel>;
    async fn get_request(&self, id: &str) -> Result<RequestDbModel>;
    /// Insert one job per URL under `request_id`, in order.
    async fn create_jobs(&self, request_id: &str, urls: &[String]) -> Result<Vec<JobDbModel>>;
    async fn get_job(&self, id: &str) -> Result<JobDbModel>;
    /// Jobs of a request, oldest first, cancelled jobs excluded.
    async fn list_jobs_by_request(&self, request_id: &str) -> Result<Vec<JobDbModel>>;
    /// IDs in `waiting-to-process`, oldest first.
    async fn list_waiting_job_ids(&self) -> Result<Vec<String>>;
    async fn update_job_status(&self, id: &str, status: JobStatus) -> Result<JobDbModel>;
    async fn batch_update_job_status(
        &self,
        ids: &[String],
        status: JobStatus,
    ) -> Result<BatchStatusUpdate>;
    /// Move every job of a request, cancelled ones included, back to
    /// `waiting-to-process`.
    async fn reset_jobs_by_request(&self, request_id: &str) -> Result<Vec<String>>;
    /// Set `to` only if the job currently has one of the `from` statuses.
    ///
    /// Returns false when the row exists in another status.
    async fn transition_job_status(
        &self,
        id: &str,
        from: &[JobStatus],
        to: JobStatus,
    ) -> Result<bool>;
    /// Record the processing result and replace the job's formats.
    ///
    /// Discarded (returns false) if the job was cancelled meanwhile.
    async fn finish_processing(
        &self,
        id: &str,
        title: Option<&str>,
        formats: Vec<NewFormat>,
    ) -> Result<bool>;
}

/// SQLx implementation of JobRepository.
pub struct SqlxJobRepository {
    pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqlxJobRepository {
    pub fn new(pool: SqlitePool, write_pool: SqlitePool) -> Self {
        Self { pool, write_pool }
    }

    async fn job_exists(&self, id: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM job WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.write_pool)
            .await?;
        Ok(found.is_some())
    }
}

fn status_list(statuses: &[JobStatus]) -> Result<String> {
    let values: Vec<&str> = statuses.iter().map(JobStatus::as_str).collect();
    Ok(serde_json::to_string(&values)?)
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn create_request(&self) -> Result<RequestDbModel> {
        let request = RequestDbModel::new();
        sqlx::query("INSERT INTO request (id, created_at) VALUES (?, ?)")
            .bind(&request.id)
            .bind(request.created_at)
            .execute(&self.write_pool)
            .await?;
        Ok(request)
    }

    async fn get_request(&self, id: &str) -> Result<RequestDbModel> {
        sqlx::query_as::<_, RequestDbModel>("SELECT * FROM request WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Request", id))
    }

    async fn create_jobs(&self, request_id: &str, urls: &[String]) -> Result<Vec<JobDbModel>> {
        let jobs: Vec<JobDbModel> = urls
            .iter()
            .map(|url| JobDbModel::new(request_id, url.as_str()))
            .collect();

        retry_on_sqlite_busy("create_jobs", || async {
            let mut tx = self.write_pool.begin().await?;
            for job in &jobs {
                sqlx::query(
                    r#"
                    INSERT INTO job (id, request_id, url, title, status, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&job.id)
                .bind(&job.request_id)
                .bind(&job.url)
                .bind(&job.title)
                .bind(&job.status)
                .bind(job.created_at)
                .bind(job.updated_at)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            Ok(())
        })
        .await?;

        Ok(jobs)
    }

    async fn get_job(&self, id: &str) -> Result<JobDbModel> {
        sqlx::query_as::<_, JobDbModel>("SELECT * FROM job WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Job", id))
    }

    async fn list_jobs_by_request(&self, request_id: &str) -> Result<Vec<JobDbModel>> {
        let jobs = sqlx::query_as::<_, JobDbModel>(
            r#"
            SELECT * FROM job
            WHERE request_id = ? AND status != 'cancelled'
            ORDER BY created_at, rowid
            "#,
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn list_waiting_job_ids(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT id FROM job WHERE status = 'waiting-to-process' ORDER BY created_at, rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn update_job_status(&self, id: &str, status: JobStatus) -> Result<JobDbModel> {
        sqlx::query_as::<_, JobDbModel>(
            "UPDATE job SET status = ?, updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(status.as_str())
        .bind(now_ms())
        .bind(id)
        .fetch_optional(&self.write_pool)
        .await?
        .ok_or_else(|| Error::not_found("Job", id))
    }

    async fn batch_update_job_status(
        &self,
        ids: &[String],
        status: JobStatus,
    ) -> Result<BatchStatusUpdate> {
        if ids.is_empty() {
            return Ok(BatchStatusUpdate::default());
        }
        let ids_json = serde_json::to_string(ids)?;

        let updated: Vec<String> = sqlx::query_scalar(
            r#"
            UPDATE job SET status = ?, updated_at = ?
            WHERE id IN (SELECT value FROM json_each(?))
            RETURNING id
            "#,
        )
        .bind(status.as_str())
        .bind(now_ms())
        .bind(&ids_json)
        .fetch_all(&self.write_pool)
        .await?;

        Ok(BatchStatusUpdate::split(ids, updated))
    }

    async fn reset_jobs_by_request(&self, request_id: &str) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar(
            r#"
            UPDATE job SET status = 'waiting-to-process', updated_at = ?
            WHERE request_id = ?
            RETURNING id
            "#,
        )
        .bind(now_ms())
        .bind(request_id)
        .fetch_all(&self.write_pool)
        .await?;
        Ok(ids)
    }

    async fn transition_job_status(
        &self,
        id: &str,
        from: &[JobStatus],
        to: JobStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job SET status = ?, updated_at = ?
            WHERE id = ? AND status IN (SELECT value FROM json_each(?))
            "#,
        )
        .bind(to.as_str())
        .bind(now_ms())
        .bind(id)
        .bind(status_list(from)?)
        .execute(&self.write_pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if self.job_exists(id).await? {
            Ok(false)
        } else {
            Err(Error::not_found("Job", id))
        }
    }

    async fn finish_processing(
        &self,
        id: &str,
        title: Option<&str>,
        formats: Vec<NewFormat>,
    ) -> Result<bool> {
        let formats: Vec<_> = formats.into_iter().map(|f| f.into_model(id)).collect();
        let mut tx = self.write_pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE job SET status = 'finished-processing', title = COALESCE(?, title), updated_at = ?
            WHERE id = ? AND status != 'cancelled'
            "#,
        )
        .bind(title)
        .bind(now_ms())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return if self.job_exists(id).await? {
                Ok(false)
            } else {
                Err(Error::not_found("Job", id))
            };
        }

        // Reprocessing replaces the previous result; merged formats cascade.
        sqlx::query("DELETE FROM format WHERE job_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        for format in &formats {
            sqlx::query(
                r#"
                INSERT INTO format (
                    id, job_id, format_id, ext, resolution, acodec, vcodec, filesize, tbr,
                    url, language, format_note, download_url, download_status, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&format.id)
            .bind(&format.job_id)
            .bind(&format.format_id)
            .bind(&format.ext)
            .bind(&format.resolution)
            .bind(&format.acodec)
            .bind(&format.vcodec)
            .bind(format.filesize)
            .bind(&format.tbr)
            .bind(&format.url)
            .bind(&format.language)
            .bind(&format.format_note)
            .bind(&format.download_url)
            .bind(&format.download_status)
            .bind(format.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}
