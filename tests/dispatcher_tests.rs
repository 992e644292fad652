//! Tests for the match loop and the dispatched-job registry.


use test_harness::{sample_status, waiting_runner, TestContext};
use uuid::Uuid;

use encodarr_controller::error::ControllerError;

#[tokio::test]
async fn match_once_without_runners_is_a_no_op() {
    let ctx = TestContext::new().await;
    ctx.enqueue_file("a.mkv", b"bytes").await;

    ctx.dispatcher.match_once().await.unwrap();

    assert_eq!(ctx.db.queued_count().await.unwrap(), 1);
    assert!(ctx.db.all_dispatched().await.unwrap().is_empty());
}

#[tokio::test]
async fn runner_is_requeued_when_no_jobs_are_available() {
    let ctx = TestContext::new().await;
    let (runner, _receiver) = waiting_runner("r1");
    ctx.dispatcher.enqueue_runner(runner);

    ctx.dispatcher.match_once().await.unwrap();

    assert_eq!(ctx.dispatcher.waiting_runners(), 1);
}

#[tokio::test]
async fn dispatches_oldest_job_to_oldest_runner() {
    let ctx = TestContext::new().await;
    let job = ctx.enqueue_file("a.mkv", b"bytes").await;
    let (runner, receiver) = waiting_runner("r1");
    ctx.dispatcher.enqueue_runner(runner);

    ctx.dispatcher.match_once().await.unwrap();

    let received = receiver.await.expect("runner should receive the job");
    assert_eq!(received, job);

    // The job moved from the queued set into the dispatched registry.
    assert_eq!(ctx.db.queued_count().await.unwrap(), 0);
    let dispatched = ctx.db.get_dispatched(job.uuid).await.unwrap().unwrap();
    assert_eq!(dispatched.runner, "r1");
    assert_eq!(dispatched.status.stage, "Copying to Runner");
    assert_eq!(dispatched.status.percentage, "0");
    assert_eq!(ctx.dispatcher.waiting_runners(), 0);
}

#[tokio::test]
async fn missing_files_are_discarded_silently() {
    let ctx = TestContext::new().await;
    let ghost = ctx.enqueue_missing("ghost.mkv").await;
    let valid = ctx.enqueue_file("b.mkv", b"bytes").await;
    let (runner, receiver) = waiting_runner("r1");
    ctx.dispatcher.enqueue_runner(runner);

    ctx.dispatcher.match_once().await.unwrap();

    assert_eq!(receiver.await.unwrap(), valid);
    // No record for the ghost job anywhere.
    assert!(ctx.db.get_dispatched(ghost.uuid).await.unwrap().is_none());
    assert_eq!(ctx.db.queued_count().await.unwrap(), 0);
}

#[tokio::test]
async fn jobs_and_runners_pair_in_fifo_order() {
    let ctx = TestContext::new().await;
    let job_a = ctx.enqueue_file("a.mkv", b"a").await;
    let job_b = ctx.enqueue_file("b.mkv", b"b").await;

    let (first, receiver_a) = waiting_runner("r1");
    let (second, receiver_b) = waiting_runner("r2");
    ctx.dispatcher.enqueue_runner(first);
    ctx.dispatcher.enqueue_runner(second);

    ctx.dispatcher.match_once().await.unwrap();
    ctx.dispatcher.match_once().await.unwrap();

    assert_eq!(receiver_a.await.unwrap(), job_a);
    assert_eq!(receiver_b.await.unwrap(), job_b);
}

#[tokio::test]
async fn dead_callback_returns_the_job_to_the_queue() {
    let ctx = TestContext::new().await;
    let job = ctx.enqueue_file("a.mkv", b"bytes").await;
    let (runner, receiver) = waiting_runner("r1");
    drop(receiver);
    ctx.dispatcher.enqueue_runner(runner);

    ctx.dispatcher.match_once().await.unwrap();

    // The hand-off was undone: the job is queued again and not dispatched.
    assert_eq!(ctx.db.queued_count().await.unwrap(), 1);
    assert!(ctx.db.get_dispatched(job.uuid).await.unwrap().is_none());
}

#[tokio::test]
async fn status_update_persists_progress() {
    let ctx = TestContext::new().await;
    let job = ctx.enqueue_file("a.mkv", b"bytes").await;
    let (runner, receiver) = waiting_runner("r1");
    ctx.dispatcher.enqueue_runner(runner);
    ctx.dispatcher.match_once().await.unwrap();
    receiver.await.unwrap();

    let before = ctx
        .db
        .get_dispatched(job.uuid)
        .await
        .unwrap()
        .unwrap()
        .last_updated;

    ctx.dispatcher
        .status_update(job.uuid, sample_status("Encoding", "50"))
        .await
        .unwrap();

    let after = ctx.db.get_dispatched(job.uuid).await.unwrap().unwrap();
    assert_eq!(after.status.stage, "Encoding");
    assert_eq!(after.status.percentage, "50");
    assert!(after.last_updated >= before);
}

#[tokio::test]
async fn status_update_for_unknown_job_errors() {
    let ctx = TestContext::new().await;

    let err = ctx
        .dispatcher
        .status_update(Uuid::new_v4(), sample_status("Encoding", "10"))
        .await
        .unwrap_err();

    assert!(matches!(err, ControllerError::JobNotFound(_)));
}

#[tokio::test]
async fn nullified_jobs_reject_status_updates() {
    let ctx = TestContext::new().await;
    let job = ctx.enqueue_file("a.mkv", b"bytes").await;
    let (runner, receiver) = waiting_runner("r1");
    ctx.dispatcher.enqueue_runner(runner);
    ctx.dispatcher.match_once().await.unwrap();
    receiver.await.unwrap();

    ctx.dispatcher.nullify(vec![job.uuid]).await;

    assert!(ctx.dispatcher.is_nullified(job.uuid));
    assert!(ctx.db.get_dispatched(job.uuid).await.unwrap().is_none());

    let err = ctx
        .dispatcher
        .status_update(job.uuid, sample_status("Encoding", "99"))
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::Nullified(_)));
}

#[tokio::test]
async fn nullify_is_idempotent() {
    let ctx = TestContext::new().await;
    let job = ctx.enqueue_file("a.mkv", b"bytes").await;
    let (runner, receiver) = waiting_runner("r1");
    ctx.dispatcher.enqueue_runner(runner);
    ctx.dispatcher.match_once().await.unwrap();
    receiver.await.unwrap();

    ctx.dispatcher.nullify(vec![job.uuid]).await;
    ctx.dispatcher.nullify(vec![job.uuid]).await;

    assert!(ctx.dispatcher.is_nullified(job.uuid));
    assert!(ctx.db.all_dispatched().await.unwrap().is_empty());
}

#[tokio::test]
async fn completions_are_drained_exactly_once() {
    let ctx = TestContext::new().await;
    let job = ctx.enqueue_file("a.mkv", b"bytes").await;
    let (runner, receiver) = waiting_runner("r1");
    ctx.dispatcher.enqueue_runner(runner);
    ctx.dispatcher.match_once().await.unwrap();
    receiver.await.unwrap();

    let completed = encodarr_controller::dispatch::job::CompletedJob {
        uuid: job.uuid,
        failed: false,
        in_file: "out.import.mkv".to_string(),
        history: Default::default(),
    };
    ctx.dispatcher.finish_complete(completed).await.unwrap();

    assert!(ctx.db.get_dispatched(job.uuid).await.unwrap().is_none());

    let drained = ctx.dispatcher.drain_completed();
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].uuid, job.uuid);
    // A second drain yields nothing.
    assert!(ctx.dispatcher.drain_completed().is_empty());
}

#[tokio::test]
async fn close_waiting_releases_every_runner() {
    let ctx = TestContext::new().await;
    let (first, receiver_a) = waiting_runner("r1");
    let (second, receiver_b) = waiting_runner("r2");
    ctx.dispatcher.enqueue_runner(first);
    ctx.dispatcher.enqueue_runner(second);

    ctx.dispatcher.close_waiting();

    assert_eq!(ctx.dispatcher.waiting_runners(), 0);
    assert!(receiver_a.await.is_err());
    assert!(receiver_b.await.is_err());
}
