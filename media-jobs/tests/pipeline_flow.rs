//! End-to-end admission flows over a real SQLite database and the in-memory
//! queue.

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use media_jobs::Error;
use media_jobs::database::{self, models::NewFormat};
use media_jobs::pipeline::SweepReport;
use media_jobs::queue::{MemoryQueue, QueueName};
use media_jobs::services::ServiceContainer;

struct Harness {
    _dir: TempDir,
    queue: Arc<MemoryQueue>,
    services: Arc<ServiceContainer>,
}

async fn setup(max_concurrent: u64) -> Harness {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("jobs.db").display());
    let (pool, write_pool) = database::connect(&url).await.unwrap();
    let queue = Arc::new(MemoryQueue::new());
    let services = Arc::new(ServiceContainer::with_queue(
        pool,
        write_pool,
        queue.clone(),
        max_concurrent,
        Duration::from_secs(3600),
    ));
    Harness {
        _dir: dir,
        queue,
        services,
    }
}

fn urls(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!("https://www.youtube.com/watch?v=clip{}", i))
        .collect()
}

fn video_only(format_id: &str, ext: &str) -> NewFormat {
    NewFormat {
        format_id: format_id.to_string(),
        ext: ext.to_string(),
        resolution: Some("1920x1080".to_string()),
        acodec: Some("none".to_string()),
        vcodec: Some("avc1.640028".to_string()),
        tbr: Some("4400.5".to_string()),
        url: format!("https://cdn.example.com/{}", format_id),
        ..Default::default()
    }
}

fn audio_only(format_id: &str, ext: &str, tbr: &str) -> NewFormat {
    NewFormat {
        format_id: format_id.to_string(),
        ext: ext.to_string(),
        acodec: Some("mp4a.40.2".to_string()),
        vcodec: Some("none".to_string()),
        tbr: Some(tbr.to_string()),
        url: format!("https://cdn.example.com/{}", format_id),
        ..Default::default()
    }
}

fn muxed(format_id: &str) -> NewFormat {
    NewFormat {
        format_id: format_id.to_string(),
        ext: "mp4".to_string(),
        resolution: Some("640x360".to_string()),
        acodec: Some("mp4a.40.2".to_string()),
        vcodec: Some("avc1.42001E".to_string()),
        url: format!("https://cdn.example.com/{}", format_id),
        ..Default::default()
    }
}

async fn status_of(h: &Harness, job_id: &str) -> String {
    h.services.jobs.get_job(job_id).await.unwrap().job.status
}

/// Submit one job and drive it through processing with the given formats.
async fn processed_job(h: &Harness, formats: Vec<NewFormat>) -> String {
    let submission = h.services.jobs.submit(None, &urls(1)).await.unwrap();
    let job_id = submission.job_ids[0].clone();
    let reconciler = &h.services.reconciler;
    assert!(reconciler.start_processing(&job_id).await.unwrap());
    assert!(
        reconciler
            .finish_processing(&job_id, Some("A clip"), formats)
            .await
            .unwrap()
    );
    job_id
}

#[tokio::test]
async fn test_submit_admits_up_to_ceiling() {
    let h = setup(2).await;

    let submission = h.services.jobs.submit(None, &urls(3)).await.unwrap();
    assert_eq!(submission.job_ids.len(), 3);
    assert_eq!(submission.dispatch.enqueued.len(), 2);

    let queued = h.queue.messages(QueueName::Process);
    assert_eq!(queued, submission.job_ids[..2].to_vec());
    assert_eq!(status_of(&h, &submission.job_ids[0]).await, "queued-processing");
    assert_eq!(status_of(&h, &submission.job_ids[1]).await, "queued-processing");
    assert_eq!(status_of(&h, &submission.job_ids[2]).await, "waiting-to-process");
    assert_eq!(h.services.admission.in_flight().await.unwrap(), 2);

    // Nothing frees up, so a sweep changes nothing.
    let report = h.services.sweeper.sweep_once().await.unwrap();
    assert_eq!(report.jobs_admitted, 0);
    assert_eq!(status_of(&h, &submission.job_ids[2]).await, "waiting-to-process");

    let first = &submission.job_ids[0];
    h.services.reconciler.start_processing(first).await.unwrap();
    h.services
        .reconciler
        .finish_processing(first, Some("Title"), vec![muxed("18")])
        .await
        .unwrap();

    let report = h.services.sweeper.sweep_once().await.unwrap();
    assert_eq!(report.jobs_admitted, 1);
    assert_eq!(status_of(&h, &submission.job_ids[2]).await, "queued-processing");
    assert_eq!(h.queue.messages(QueueName::Process).len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_admission_never_exceeds_ceiling() {
    let h = setup(3).await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let services = h.services.clone();
        handles.push(tokio::spawn(async move {
            services.jobs.submit(None, &urls(2)).await
        }));
    }
    let mut enqueued = Vec::new();
    for handle in handles {
        let submission = handle.await.unwrap().unwrap();
        assert_eq!(submission.job_ids.len(), 2);
        enqueued.extend(submission.dispatch.enqueued);
    }
    assert_eq!(enqueued.len(), 3);
    assert_eq!(h.services.admission.in_flight().await.unwrap(), 3);
    let messages = h.queue.messages(QueueName::Process);
    assert_eq!(messages.len(), 3);
    assert!(messages.iter().all(|id| enqueued.contains(id)));

    // Free two slots, then let several sweeps race for them.
    for job_id in &enqueued[..2] {
        h.services.reconciler.start_processing(job_id).await.unwrap();
        h.services
            .reconciler
            .finish_processing(job_id, Some("Title"), vec![muxed("18")])
            .await
            .unwrap();
    }
    assert_eq!(h.services.admission.in_flight().await.unwrap(), 1);

    let mut sweeps = Vec::new();
    for _ in 0..4 {
        let services = h.services.clone();
        sweeps.push(tokio::spawn(async move { services.sweeper.sweep_once().await }));
    }
    let mut admitted = 0;
    for sweep in sweeps {
        admitted += sweep.await.unwrap().unwrap().jobs_admitted;
    }
    assert_eq!(admitted, 2);
    assert_eq!(h.services.admission.in_flight().await.unwrap(), 3);
    assert_eq!(h.queue.messages(QueueName::Process).len(), 5);
}

#[tokio::test]
async fn test_sweep_without_waiting_jobs_changes_nothing() {
    let h = setup(2).await;
    let finished = processed_job(&h, vec![muxed("18")]).await;
    let submission = h.services.jobs.submit(None, &urls(2)).await.unwrap();
    assert_eq!(submission.dispatch.enqueued.len(), 2);
    let cancelled = &submission.job_ids[1];
    h.services.reconciler.cancel_job(cancelled).await.unwrap();

    let mut ids = vec![finished];
    ids.extend(submission.job_ids.iter().cloned());
    let mut before = Vec::new();
    for id in &ids {
        let job = h.services.jobs.get_job(id).await.unwrap().job;
        before.push((job.status, job.updated_at));
    }
    let statuses: Vec<&str> = before.iter().map(|(s, _)| s.as_str()).collect();
    assert_eq!(statuses, ["finished-processing", "queued-processing", "cancelled"]);
    let messages = h.queue.messages(QueueName::Process);

    let report = h.services.sweeper.sweep_once().await.unwrap();
    assert_eq!(report, SweepReport::default());

    for (id, (status, updated_at)) in ids.iter().zip(&before) {
        let job = h.services.jobs.get_job(id).await.unwrap().job;
        assert_eq!(&job.status, status);
        assert_eq!(&job.updated_at, updated_at);
    }
    assert_eq!(h.queue.messages(QueueName::Process), messages);
    assert!(h.queue.messages(QueueName::Convert).is_empty());
}

#[tokio::test]
async fn test_rejected_message_marks_job_failed() {
    let h = setup(5).await;
    let submission = h.services.jobs.submit(None, &urls(1)).await.unwrap();
    let first = submission.job_ids[0].clone();
    h.services.reconciler.cancel_job(&first).await.unwrap();

    // Rejections are decided by ID, so retry a job the queue refuses.
    h.queue.reject_id(first.clone());
    let job = h.services.retry.retry_job(&first).await.unwrap();
    assert_eq!(job.status, "error-processing");
    assert_eq!(h.queue.messages(QueueName::Process), vec![first.clone()]);
    assert_eq!(h.services.admission.in_flight().await.unwrap(), 0);
}

#[tokio::test]
async fn test_queue_outage_leaves_jobs_waiting() {
    let h = setup(5).await;
    h.queue.set_offline(true);

    let err = h.services.jobs.submit(None, &urls(2)).await.unwrap_err();
    assert!(matches!(err, Error::Queue(_)));
    assert_eq!(h.services.admission.in_flight().await.unwrap(), 0);

    let waiting = h.services.sweeper.sweep_once().await;
    assert!(waiting.is_err());

    h.queue.set_offline(false);
    let report = h.services.sweeper.sweep_once().await.unwrap();
    assert_eq!(report.jobs_admitted, 2);
}

#[tokio::test]
async fn test_partial_rejection_fails_only_refused_ids() {
    let h = setup(2).await;
    let seed = h.services.jobs.submit(None, &urls(1)).await.unwrap();
    h.services
        .reconciler
        .cancel_job(&seed.job_ids[0])
        .await
        .unwrap();

    // Park two jobs in waiting so their IDs are known before dispatch.
    h.queue.set_offline(true);
    h.services
        .jobs
        .submit(Some(&seed.request_id), &urls(2))
        .await
        .unwrap_err();
    h.queue.set_offline(false);

    let waiting: Vec<String> = h
        .services
        .jobs
        .list_request(&seed.request_id)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.job.id)
        .collect();
    assert_eq!(waiting.len(), 2);
    let (a, b) = (&waiting[0], &waiting[1]);

    h.queue.reject_id(b.clone());
    let report = h.services.sweeper.sweep_once().await.unwrap();
    assert_eq!(report.jobs_admitted, 1);
    assert_eq!(report.rejected, 1);
    assert_eq!(status_of(&h, a).await, "queued-processing");
    assert_eq!(status_of(&h, b).await, "error-processing");
    assert_eq!(h.services.admission.in_flight().await.unwrap(), 1);
}

#[tokio::test]
async fn test_cancel_frees_slot_for_waiting_job() {
    let h = setup(1).await;
    let submission = h.services.jobs.submit(None, &urls(2)).await.unwrap();
    let (first, second) = (&submission.job_ids[0], &submission.job_ids[1]);
    assert_eq!(status_of(&h, second).await, "waiting-to-process");

    let cancelled = h.services.reconciler.cancel_job(first).await.unwrap();
    assert_eq!(cancelled.status, "cancelled");
    assert_eq!(h.services.admission.in_flight().await.unwrap(), 0);

    h.services.sweeper.sweep_once().await.unwrap();
    assert_eq!(status_of(&h, second).await, "queued-processing");

    // The late worker result for the cancelled job is dropped.
    let applied = h
        .services
        .reconciler
        .finish_processing(first, Some("late"), vec![muxed("18")])
        .await
        .unwrap();
    assert!(!applied);
    let details = h.services.jobs.get_job(first).await.unwrap();
    assert_eq!(details.job.status, "cancelled");
    assert!(details.formats.is_empty());
}

#[tokio::test]
async fn test_retry_without_capacity_is_deferred() {
    let h = setup(1).await;
    let submission = h.services.jobs.submit(None, &urls(2)).await.unwrap();
    let second = &submission.job_ids[1];

    let err = h.services.retry.retry_job(second).await.unwrap_err();
    assert!(matches!(
        err,
        Error::ExceededLimit {
            in_flight: 1,
            limit: 1
        }
    ));
    assert_eq!(status_of(&h, second).await, "waiting-to-process");
}

#[tokio::test]
async fn test_retry_unknown_job_is_not_found() {
    let h = setup(1).await;
    let err = h.services.retry.retry_job("missing").await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn test_bulk_retry_waits_for_sweeper() {
    let h = setup(3).await;
    let submission = h.services.jobs.submit(None, &urls(2)).await.unwrap();
    for id in &submission.job_ids {
        h.services.reconciler.fail_processing(id).await.unwrap();
    }

    let mut ids = submission.job_ids.clone();
    ids.push("missing".to_string());
    let result = h.services.retry.retry_jobs(&ids).await.unwrap();
    assert_eq!(result.updated, submission.job_ids);
    assert_eq!(result.missing, vec!["missing".to_string()]);
    for id in &submission.job_ids {
        assert_eq!(status_of(&h, id).await, "waiting-to-process");
    }

    let report = h.services.sweeper.sweep_once().await.unwrap();
    assert_eq!(report.jobs_admitted, 2);
}

#[tokio::test]
async fn test_retry_request_resets_cancelled_jobs() {
    let h = setup(3).await;
    let submission = h.services.jobs.submit(None, &urls(2)).await.unwrap();
    h.services
        .reconciler
        .cancel_job(&submission.job_ids[0])
        .await
        .unwrap();

    let ids = h
        .services
        .retry
        .retry_request(&submission.request_id)
        .await
        .unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(
        status_of(&h, &submission.job_ids[0]).await,
        "waiting-to-process"
    );
}

#[tokio::test]
async fn test_convert_requires_finished_job() {
    let h = setup(2).await;
    let submission = h.services.jobs.submit(None, &urls(1)).await.unwrap();
    let job_id = &submission.job_ids[0];

    let err = h
        .services
        .converts
        .request_convert(job_id, "no-such-format")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));

    // Formats exist but the job is back in processing.
    h.services.reconciler.start_processing(job_id).await.unwrap();
    h.services
        .reconciler
        .finish_processing(
            job_id,
            None,
            vec![video_only("137", "mp4"), audio_only("140", "m4a", "129")],
        )
        .await
        .unwrap();
    let retried = h.services.retry.retry_job(job_id).await.unwrap();
    assert_eq!(retried.status, "queued-processing");

    let details = h.services.jobs.get_job(job_id).await.unwrap();
    let video = details
        .formats
        .iter()
        .find(|f| f.format_id == "137")
        .unwrap();
    let err = h
        .services
        .converts
        .request_convert(job_id, &video.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unprocessable(_)));
    let details = h.services.jobs.get_job(job_id).await.unwrap();
    assert!(details.merged_formats.is_empty());
}

#[tokio::test]
async fn test_convert_is_idempotent_and_shares_ceiling() {
    let h = setup(1).await;
    let job_id = processed_job(
        &h,
        vec![
            video_only("137", "mp4"),
            audio_only("140", "m4a", "129.5"),
            audio_only("251", "webm", "160.1"),
        ],
    )
    .await;
    let details = h.services.jobs.get_job(&job_id).await.unwrap();
    assert_eq!(details.job.title.as_deref(), Some("A clip"));
    let video = details
        .formats
        .iter()
        .find(|f| f.format_id == "137")
        .unwrap()
        .clone();
    let m4a = details.formats.iter().find(|f| f.format_id == "140").unwrap();

    // Occupy the only slot with another job first.
    let other = h.services.jobs.submit(None, &urls(1)).await.unwrap();
    assert_eq!(other.dispatch.enqueued.len(), 1);

    let merged = h
        .services
        .converts
        .request_convert(&job_id, &video.id)
        .await
        .unwrap();
    assert_eq!(merged.status, "waiting-to-convert");
    assert_eq!(merged.audio_format_id, m4a.id);

    let again = h
        .services
        .converts
        .request_convert(&job_id, &video.id)
        .await
        .unwrap();
    assert_eq!(again.id, merged.id);
    let details = h.services.jobs.get_job(&job_id).await.unwrap();
    assert_eq!(details.merged_formats.len(), 1);

    h.services
        .reconciler
        .cancel_job(&other.job_ids[0])
        .await
        .unwrap();
    let report = h.services.sweeper.sweep_once().await.unwrap();
    assert_eq!(report.converts_admitted, 1);
    assert_eq!(h.queue.messages(QueueName::Convert), vec![merged.id.clone()]);
    assert_eq!(h.services.admission.in_flight().await.unwrap(), 1);

    let download = h
        .services
        .converts
        .download_url(&job_id, &video.id)
        .await
        .unwrap();
    assert_eq!(download.download_url, None);

    let reconciler = &h.services.reconciler;
    assert!(reconciler.start_converting(&merged.id).await.unwrap());
    assert!(
        reconciler
            .finish_converting(&merged.id, "https://files.example.com/merged.mp4")
            .await
            .unwrap()
    );
    assert_eq!(h.services.admission.in_flight().await.unwrap(), 0);

    let download = h
        .services
        .converts
        .download_url(&job_id, &video.id)
        .await
        .unwrap();
    assert_eq!(
        download.download_url.as_deref(),
        Some("https://files.example.com/merged.mp4")
    );
}

#[tokio::test]
async fn test_format_with_audio_downloads_directly() {
    let h = setup(1).await;
    let job_id = processed_job(&h, vec![muxed("18")]).await;
    let format = h.services.jobs.get_job(&job_id).await.unwrap().formats[0].clone();

    let download = h
        .services
        .converts
        .download_url(&job_id, &format.id)
        .await
        .unwrap();
    assert_eq!(download.download_url, Some(format.url));
}

#[tokio::test]
async fn test_convert_without_audio_is_unprocessable() {
    let h = setup(1).await;
    let job_id = processed_job(&h, vec![video_only("137", "mp4")]).await;
    let video = h.services.jobs.get_job(&job_id).await.unwrap().formats[0].clone();

    let err = h
        .services
        .converts
        .request_convert(&job_id, &video.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unprocessable(_)));
    let details = h.services.jobs.get_job(&job_id).await.unwrap();
    assert!(details.merged_formats.is_empty());
}

#[tokio::test]
async fn test_download_lifecycle() {
    let h = setup(1).await;
    let job_id = processed_job(&h, vec![muxed("18")]).await;
    let format_id = h.services.jobs.get_job(&job_id).await.unwrap().formats[0]
        .id
        .clone();
    let downloads = &h.services.downloads;

    let started = downloads.start(&format_id).await.unwrap();
    assert_eq!(
        started.download_status.as_deref(),
        Some("queued-downloading")
    );
    assert_eq!(h.queue.messages(QueueName::Download), vec![format_id.clone()]);
    // Downloads never count against the ceiling.
    assert_eq!(h.services.admission.in_flight().await.unwrap(), 0);

    let cancelled = downloads.cancel(&format_id).await.unwrap();
    assert_eq!(cancelled.download_status, None);
    let applied = h
        .services
        .reconciler
        .finish_downloading(&format_id, "https://files.example.com/18.mp4")
        .await
        .unwrap();
    assert!(!applied);

    downloads.start(&format_id).await.unwrap();
    assert!(
        h.services
            .reconciler
            .finish_downloading(&format_id, "https://files.example.com/18.mp4")
            .await
            .unwrap()
    );
    let err = downloads.start(&format_id).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn test_download_outage_restores_status() {
    let h = setup(1).await;
    let job_id = processed_job(&h, vec![muxed("18")]).await;
    let format_id = h.services.jobs.get_job(&job_id).await.unwrap().formats[0]
        .id
        .clone();

    h.queue.set_offline(true);
    let err = h.services.downloads.start(&format_id).await.unwrap_err();
    assert!(matches!(err, Error::Queue(_)));
    let format = h.services.downloads.get(&format_id).await.unwrap();
    assert_eq!(format.download_status, None);
}

#[tokio::test]
async fn test_dead_letter_frees_slot() {
    let h = setup(1).await;
    let submission = h.services.jobs.submit(None, &urls(2)).await.unwrap();

    let applied = h
        .services
        .reconciler
        .dead_letter(QueueName::Process, &submission.job_ids[0])
        .await
        .unwrap();
    assert!(applied);
    assert_eq!(status_of(&h, &submission.job_ids[0]).await, "error-processing");

    h.services.sweeper.sweep_once().await.unwrap();
    assert_eq!(
        status_of(&h, &submission.job_ids[1]).await,
        "queued-processing"
    );
}

#[tokio::test]
async fn test_background_sweeper_reacts_to_trigger() {
    let h = setup(1).await;
    let submission = h.services.jobs.submit(None, &urls(2)).await.unwrap();
    h.services.start_background_tasks();

    h.services
        .reconciler
        .fail_processing(&submission.job_ids[0])
        .await
        .unwrap();

    let second = submission.job_ids[1].clone();
    let mut admitted = false;
    for _ in 0..50 {
        if status_of(&h, &second).await == "queued-processing" {
            admitted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(admitted, "sweeper did not admit the waiting job");

    h.services.shutdown().await;
}
