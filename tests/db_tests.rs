//! Tests for the SQLite store: migrations, backup, and the four tables.


use std::time::Duration;

use chrono::Utc;
use test_harness::{sample_status, TestContext};

use encodarr_controller::db::SqliteDatabase;
use encodarr_controller::dispatch::job::{
    CompletedJob, DispatchedJob, HistoryEntry, Job, JobParameters,
};

#[tokio::test]
async fn migrations_create_a_working_store() {
    let ctx = TestContext::new().await;

    assert_eq!(ctx.db.queued_count().await.unwrap(), 0);
    assert!(ctx.db.all_dispatched().await.unwrap().is_empty());
    assert!(ctx.db.all_libraries().await.unwrap().is_empty());
    assert!(ctx.db.all_history().await.unwrap().is_empty());
}

#[tokio::test]
async fn reopening_backs_up_the_database() {
    let dir = tempfile::tempdir().unwrap();

    let first = SqliteDatabase::connect(dir.path()).await.unwrap();
    drop(first);
    assert!(!dir.path().join("data.db.backup").exists());

    let _second = SqliteDatabase::connect(dir.path()).await.unwrap();
    assert!(dir.path().join("data.db.backup").exists());
}

#[tokio::test]
async fn queued_jobs_pop_in_enqueue_order() {
    let ctx = TestContext::new().await;
    let first = ctx.enqueue_file("a.mkv", b"a").await;
    let second = ctx.enqueue_file("b.mkv", b"b").await;

    assert_eq!(ctx.db.pop_oldest_queued().await.unwrap().unwrap(), first);
    assert_eq!(ctx.db.pop_oldest_queued().await.unwrap().unwrap(), second);
    assert!(ctx.db.pop_oldest_queued().await.unwrap().is_none());
}

#[tokio::test]
async fn contains_path_covers_queued_and_dispatched() {
    let ctx = TestContext::new().await;
    let queued = ctx.enqueue_file("queued.mkv", b"a").await;

    let dispatched_job = Job::new(
        ctx.media_file("dispatched.mkv", b"b").await,
        JobParameters::default(),
    );
    ctx.db
        .insert_dispatched(&DispatchedJob::new(dispatched_job.clone(), "r1".to_string()))
        .await
        .unwrap();

    assert!(ctx.db.contains_path(&queued.path).await.unwrap());
    assert!(ctx.db.contains_path(&dispatched_job.path).await.unwrap());
    assert!(!ctx
        .db
        .contains_path(ctx.dir.path().join("other.mkv").as_path())
        .await
        .unwrap());
}

#[tokio::test]
async fn dispatched_records_round_trip() {
    let ctx = TestContext::new().await;
    let job = Job::new(
        ctx.media_file("a.mkv", b"a").await,
        JobParameters::default(),
    );
    let mut dispatched = DispatchedJob::new(job.clone(), "r1".to_string());
    ctx.db.insert_dispatched(&dispatched).await.unwrap();

    let loaded = ctx.db.get_dispatched(job.uuid).await.unwrap().unwrap();
    assert_eq!(loaded.job, job);
    assert_eq!(loaded.runner, "r1");
    assert_eq!(loaded.status.stage, "Copying to Runner");

    dispatched.status = sample_status("Encoding", "75");
    dispatched.last_updated = Utc::now();
    ctx.db.update_dispatched(&dispatched).await.unwrap();

    let updated = ctx.db.get_dispatched(job.uuid).await.unwrap().unwrap();
    assert_eq!(updated.status.percentage, "75");

    assert_eq!(ctx.db.all_dispatched().await.unwrap().len(), 1);
    ctx.db.delete_dispatched(job.uuid).await.unwrap();
    assert!(ctx.db.get_dispatched(job.uuid).await.unwrap().is_none());
}

#[tokio::test]
async fn libraries_round_trip_with_their_interval() {
    let ctx = TestContext::new().await;
    let interval = Duration::from_secs(90);
    let parameters = JobParameters {
        encode: true,
        stereo: true,
    };

    let library = ctx
        .db
        .insert_library(ctx.dir.path(), interval, parameters)
        .await
        .unwrap();

    let all = ctx.db.all_libraries().await.unwrap();
    assert_eq!(all, vec![library]);
    assert_eq!(all[0].fs_check_interval, interval);
    assert_eq!(all[0].parameters, parameters);
}

#[tokio::test]
async fn history_keeps_completed_jobs() {
    let ctx = TestContext::new().await;
    let job = Job::new("/media/a.mkv".into(), JobParameters::default());

    let completed = CompletedJob {
        uuid: job.uuid,
        failed: false,
        in_file: format!("{}.import.mkv", job.uuid),
        history: HistoryEntry {
            filename: "a.mkv".to_string(),
            datetime_completed: Some(Utc::now()),
            warnings: vec!["dropped a subtitle track".to_string()],
            errors: Vec::new(),
        },
    };
    ctx.db.insert_history(&completed).await.unwrap();

    let all = ctx.db.all_history().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].uuid, job.uuid);
    assert!(!all[0].failed);
    assert_eq!(all[0].history.filename, "a.mkv");
    assert_eq!(all[0].history.warnings.len(), 1);
}
