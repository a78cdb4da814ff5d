//! Format and merged format repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{
    ConvertFormatStatus, DownloadStatus, FormatDbModel, MergedFormatDbModel,
};
use crate::database::time::now_ms;
use crate::{Error, Result};

/// Format repository trait.
#[async_trait]
pub trait FormatRepository: Send + Sync {
    async fn get_format(&self, id: &str) -> Result<FormatDbModel>;
    async fn list_formats_by_job(&self, job_id: &str) -> Result<Vec<FormatDbModel>>;
    async fn list_formats_by_jobs(&self, job_ids: &[String]) -> Result<Vec<FormatDbModel>>;
    /// Overwrite the download status. `None` clears it.
    async fn set_download_status(
        &self,
        id: &str,
        status: Option<DownloadStatus>,
    ) -> Result<FormatDbModel>;
    /// Set `to` only if the current download status is one of `from`.
    async fn transition_download_status(
        &self,
        id: &str,
        from: &[DownloadStatus],
        to: DownloadStatus,
    ) -> Result<bool>;
    /// Record a finished download unless it was cancelled meanwhile.
    async fn finish_download(&self, id: &str, download_url: &str) -> Result<bool>;

    /// Insert a merged format, or return the existing one for the same
    /// (job, video format) pair.
    async fn insert_merged_format(
        &self,
        merged: &MergedFormatDbModel,
    ) -> Result<MergedFormatDbModel>;
    async fn get_merged_format(&self, id: &str) -> Result<MergedFormatDbModel>;
    async fn find_merged_format(
        &self,
        job_id: &str,
        video_format_id: &str,
    ) -> Result<Option<MergedFormatDbModel>>;
    async fn list_merged_formats_by_jobs(
        &self,
        job_ids: &[String],
    ) -> Result<Vec<MergedFormatDbModel>>;
    /// IDs in `waiting-to-convert` whose job is not cancelled, oldest first.
    async fn list_waiting_merged_ids(&self) -> Result<Vec<String>>;
    /// Set `to` only if the current convert status is one of `from`.
    async fn transition_merged_status(
        &self,
        id: &str,
        from: &[ConvertFormatStatus],
        to: ConvertFormatStatus,
    ) -> Result<bool>;
    /// Record a finished conversion if the row is still queued or converting.
    async fn finish_converting(&self, id: &str, download_url: &str) -> Result<bool>;
}

/// SQLx implementation of FormatRepository.
pub struct SqlxFormatRepository {
    pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqlxFormatRepository {
    pub fn new(pool: SqlitePool, write_pool: SqlitePool) -> Self {
        Self { pool, write_pool }
    }

    async fn exists(&self, table: &str, id: &str) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar(&format!("SELECT 1 FROM {} WHERE id = ?", table))
                .bind(id)
                .fetch_optional(&self.write_pool)
                .await?;
        Ok(found.is_some())
    }

    /// Map a zero-row conditional update to `false` or NotFound.
    async fn applied_or_missing(
        &self,
        rows_affected: u64,
        table: &str,
        entity: &str,
        id: &str,
    ) -> Result<bool> {
        if rows_affected > 0 {
            Ok(true)
        } else if self.exists(table, id).await? {
            Ok(false)
        } else {
            Err(Error::not_found(entity, id))
        }
    }
}

#[async_trait]
impl FormatRepository for SqlxFormatRepository {
    async fn get_format(&self, id: &str) -> Result<FormatDbModel> {
        sqlx::query_as::<_, FormatDbModel>("SELECT * FROM format WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Format", id))
    }

    async fn list_formats_by_job(&self, job_id: &str) -> Result<Vec<FormatDbModel>> {
        let formats = sqlx::query_as::<_, FormatDbModel>(
            "SELECT * FROM format WHERE job_id = ? ORDER BY created_at, rowid",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(formats)
    }

    async fn list_formats_by_jobs(&self, job_ids: &[String]) -> Result<Vec<FormatDbModel>> {
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }
        let formats = sqlx::query_as::<_, FormatDbModel>(
            r#"
            SELECT * FROM format
            WHERE job_id IN (SELECT value FROM json_each(?))
            ORDER BY created_at, rowid
            "#,
        )
        .bind(serde_json::to_string(job_ids)?)
        .fetch_all(&self.pool)
        .await?;
        Ok(formats)
    }

    async fn set_download_status(
        &self,
        id: &str,
        status: Option<DownloadStatus>,
    ) -> Result<FormatDbModel> {
        sqlx::query_as::<_, FormatDbModel>(
            "UPDATE format SET download_status = ? WHERE id = ? RETURNING *",
        )
        .bind(status.map(|s| s.as_str()))
        .bind(id)
        .fetch_optional(&self.write_pool)
        .await?
        .ok_or_else(|| Error::not_found("Format", id))
    }

    async fn transition_download_status(
        &self,
        id: &str,
        from: &[DownloadStatus],
        to: DownloadStatus,
    ) -> Result<bool> {
        let from: Vec<&str> = from.iter().map(DownloadStatus::as_str).collect();
        let result = sqlx::query(
            r#"
            UPDATE format SET download_status = ?
            WHERE id = ? AND download_status IN (SELECT value FROM json_each(?))
            "#,
        )
        .bind(to.as_str())
        .bind(id)
        .bind(serde_json::to_string(&from)?)
        .execute(&self.write_pool)
        .await?;

        self.applied_or_missing(result.rows_affected(), "format", "Format", id)
            .await
    }

    async fn finish_download(&self, id: &str, download_url: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE format SET download_status = 'finished-downloading', download_url = ?
            WHERE id = ? AND download_status IN ('queued-downloading', 'downloading')
            "#,
        )
        .bind(download_url)
        .bind(id)
        .execute(&self.write_pool)
        .await?;

        self.applied_or_missing(result.rows_affected(), "format", "Format", id)
            .await
    }

    async fn insert_merged_format(
        &self,
        merged: &MergedFormatDbModel,
    ) -> Result<MergedFormatDbModel> {
        sqlx::query(
            r#"
            INSERT INTO merged_format (
                id, job_id, audio_format_id, video_format_id, status, download_url,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (job_id, video_format_id) DO NOTHING
            "#,
        )
        .bind(&merged.id)
        .bind(&merged.job_id)
        .bind(&merged.audio_format_id)
        .bind(&merged.video_format_id)
        .bind(&merged.status)
        .bind(&merged.download_url)
        .bind(merged.created_at)
        .bind(merged.updated_at)
        .execute(&self.write_pool)
        .await?;

        sqlx::query_as::<_, MergedFormatDbModel>(
            "SELECT * FROM merged_format WHERE job_id = ? AND video_format_id = ?",
        )
        .bind(&merged.job_id)
        .bind(&merged.video_format_id)
        .fetch_optional(&self.write_pool)
        .await?
        .ok_or_else(|| Error::not_found("MergedFormat", &merged.id))
    }

    async fn get_merged_format(&self, id: &str) -> Result<MergedFormatDbModel> {
        sqlx::query_as::<_, MergedFormatDbModel>("SELECT * FROM merged_format WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("MergedFormat", id))
    }

    async fn find_merged_format(
        &self,
        job_id: &str,
        video_format_id: &str,
    ) -> Result<Option<MergedFormatDbModel>> {
        let merged = sqlx::query_as::<_, MergedFormatDbModel>(
            "SELECT * FROM merged_format WHERE job_id = ? AND video_format_id = ?",
        )
        .bind(job_id)
        .bind(video_format_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(merged)
    }

    async fn list_merged_formats_by_jobs(
        &self,
        job_ids: &[String],
    ) -> Result<Vec<MergedFormatDbModel>> {
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }
        let merged = sqlx::query_as::<_, MergedFormatDbModel>(
            r#"
            SELECT * FROM merged_format
            WHERE job_id IN (SELECT value FROM json_each(?))
            ORDER BY created_at, rowid
            "#,
        )
        .bind(serde_json::to_string(job_ids)?)
        .fetch_all(&self.pool)
        .await?;
        Ok(merged)
    }

    async fn list_waiting_merged_ids(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT m.id FROM merged_format m
            JOIN job j ON j.id = m.job_id
            WHERE m.status = 'waiting-to-convert' AND j.status != 'cancelled'
            ORDER BY m.created_at, m.rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn transition_merged_status(
        &self,
        id: &str,
        from: &[ConvertFormatStatus],
        to: ConvertFormatStatus,
    ) -> Result<bool> {
        let from: Vec<&str> = from.iter().map(ConvertFormatStatus::as_str).collect();
        let result = sqlx::query(
            r#"
            UPDATE merged_format SET status = ?, updated_at = ?
            WHERE id = ? AND status IN (SELECT value FROM json_each(?))
            "#,
        )
        .bind(to.as_str())
        .bind(now_ms())
        .bind(id)
        .bind(serde_json::to_string(&from)?)
        .execute(&self.write_pool)
        .await?;

        self.applied_or_missing(result.rows_affected(), "merged_format", "MergedFormat", id)
            .await
    }

    async fn finish_converting(&self, id: &str, download_url: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE merged_format
            SET status = 'finished-converting', download_url = ?, updated_at = ?
            WHERE id = ? AND status IN ('queued-converting', 'converting')
            "#,
        )
        .bind(download_url)
        .bind(now_ms())
        .bind(id)
        .execute(&self.write_pool)
        .await?;

        self.applied_or_missing(result.rows_affected(), "merged_format", "MergedFormat", id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database;
    use crate::database::models::{JobStatus, NewFormat};
    use crate::database::repositories::{JobRepository, SqlxJobRepository};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        jobs: SqlxJobRepository,
        formats: SqlxFormatRepository,
    }

    async fn setup() -> Fixture {
        let dir = TempDir::new().unwrap();
        let url = format!(
            "sqlite:{}?mode=rwc",
            dir.path().join("formats.db").to_string_lossy().replace('\\', "/")
        );
        let (pool, write_pool) = database::connect(&url).await.unwrap();
        Fixture {
            _dir: dir,
            jobs: SqlxJobRepository::new(pool.clone(), write_pool.clone()),
            formats: SqlxFormatRepository::new(pool, write_pool),
        }
    }

    /// A finished job with one video-only and one audio-only format.
    async fn finished_job(f: &Fixture) -> (String, Vec<FormatDbModel>) {
        let request = f.jobs.create_request().await.unwrap();
        let jobs = f
            .jobs
            .create_jobs(&request.id, &["https://example.com/v".to_string()])
            .await
            .unwrap();
        let job_id = jobs[0].id.clone();
        let formats = vec![
            NewFormat {
                format_id: "137".to_string(),
                ext: "mp4".to_string(),
                vcodec: Some("avc1".to_string()),
                acodec: Some("none".to_string()),
                url: "https://cdn.example.com/137".to_string(),
                ..Default::default()
            },
            NewFormat {
                format_id: "140".to_string(),
                ext: "m4a".to_string(),
                vcodec: Some("none".to_string()),
                acodec: Some("mp4a.40.2".to_string()),
                url: "https://cdn.example.com/140".to_string(),
                ..Default::default()
            },
        ];
        assert!(f.jobs.finish_processing(&job_id, None, formats).await.unwrap());
        let stored = f.formats.list_formats_by_job(&job_id).await.unwrap();
        (job_id, stored)
    }

    #[tokio::test]
    async fn test_insert_merged_format_is_idempotent() {
        let f = setup().await;
        let (job_id, formats) = finished_job(&f).await;

        let first = f
            .formats
            .insert_merged_format(&MergedFormatDbModel::new(
                &job_id,
                &formats[1].id,
                &formats[0].id,
            ))
            .await
            .unwrap();
        let second = f
            .formats
            .insert_merged_format(&MergedFormatDbModel::new(
                &job_id,
                &formats[1].id,
                &formats[0].id,
            ))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        let all = f
            .formats
            .list_merged_formats_by_jobs(&[job_id.clone()])
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(
            f.formats.list_waiting_merged_ids().await.unwrap(),
            vec![first.id]
        );
    }

    #[tokio::test]
    async fn test_waiting_merged_ids_skip_cancelled_jobs() {
        let f = setup().await;
        let (job_id, formats) = finished_job(&f).await;
        f.formats
            .insert_merged_format(&MergedFormatDbModel::new(
                &job_id,
                &formats[1].id,
                &formats[0].id,
            ))
            .await
            .unwrap();

        f.jobs
            .update_job_status(&job_id, JobStatus::Cancelled)
            .await
            .unwrap();
        assert!(f.formats.list_waiting_merged_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_download_finish_discarded_after_clear() {
        let f = setup().await;
        let (_job_id, formats) = finished_job(&f).await;
        let id = &formats[0].id;

        f.formats
            .set_download_status(id, Some(DownloadStatus::QueuedDownloading))
            .await
            .unwrap();
        f.formats.set_download_status(id, None).await.unwrap();

        assert!(!f.formats.finish_download(id, "https://files/x.mp4").await.unwrap());
        let format = f.formats.get_format(id).await.unwrap();
        assert!(format.download_status.is_none());
        assert!(format.download_url.is_none());
    }

    #[tokio::test]
    async fn test_finish_converting_records_url() {
        let f = setup().await;
        let (job_id, formats) = finished_job(&f).await;
        let merged = f
            .formats
            .insert_merged_format(&MergedFormatDbModel::new(
                &job_id,
                &formats[1].id,
                &formats[0].id,
            ))
            .await
            .unwrap();

        // Not queued yet.
        assert!(!f.formats.finish_converting(&merged.id, "u").await.unwrap());

        assert!(
            f.formats
                .transition_merged_status(
                    &merged.id,
                    &[ConvertFormatStatus::WaitingToConvert],
                    ConvertFormatStatus::QueuedConverting,
                )
                .await
                .unwrap()
        );
        assert!(
            f.formats
                .finish_converting(&merged.id, "https://files/merged.mp4")
                .await
                .unwrap()
        );
        let merged = f.formats.get_merged_format(&merged.id).await.unwrap();
        assert_eq!(
            merged.convert_status(),
            Some(ConvertFormatStatus::FinishedConverting)
        );
        assert_eq!(merged.download_url.as_deref(), Some("https://files/merged.mp4"));
    }

    #[tokio::test]
    async fn test_unknown_format_is_not_found() {
        let f = setup().await;
        assert!(matches!(
            f.formats.set_download_status("nope", None).await,
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            f.formats.finish_download("nope", "u").await,
            Err(Error::NotFound { .. })
        ));
    }
}
