//! Central dispatch engine.
//!
//! The [`Dispatcher`] matches waiting Runners with queued jobs, records every
//! hand-off in the dispatched registry, applies Runner progress reports, and
//! retires jobs on completion or nullification. It is the only writer of the
//! dispatched registry and of the nullified set; the health checker merely
//! reports UUIDs for it to act on.

pub mod job;
pub mod queue;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::SqliteDatabase;
use crate::dispatch::job::{CompletedJob, DispatchedJob, JobStatus};
use crate::dispatch::queue::{RunnerQueue, WaitingRunner};
use crate::error::{ControllerError, Result};

/// Delay before retrying after an unexpected stat error in the match loop.
const STAT_RETRY_DELAY: Duration = Duration::from_millis(100);

pub struct Dispatcher {
    db: SqliteDatabase,
    import_dir: PathBuf,
    runner_queue: Mutex<RunnerQueue>,
    nullified: RwLock<HashSet<Uuid>>,
    completed_tx: mpsc::UnboundedSender<CompletedJob>,
    completed_rx: Mutex<mpsc::UnboundedReceiver<CompletedJob>>,
}

impl Dispatcher {
    pub fn new(db: SqliteDatabase, import_dir: PathBuf) -> Self {
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        Self {
            db,
            import_dir,
            runner_queue: Mutex::new(RunnerQueue::new()),
            nullified: RwLock::new(HashSet::new()),
            completed_tx,
            completed_rx: Mutex::new(completed_rx),
        }
    }

    pub fn db(&self) -> &SqliteDatabase {
        &self.db
    }

    /// Park a Runner until the match loop hands it a job.
    pub fn enqueue_runner(&self, runner: WaitingRunner) {
        tracing::info!(
            runner = %runner.name,
            request_id = %runner.request_id,
            "runner waiting for work"
        );
        self.runner_queue.lock().unwrap().push(runner);
    }

    /// Remove a waiting Runner whose request went away.
    pub fn remove_runner(&self, request_id: Uuid) {
        if self.runner_queue.lock().unwrap().remove(request_id).is_some() {
            tracing::debug!(request_id = %request_id, "removed cancelled runner request");
        }
    }

    pub fn waiting_runners(&self) -> usize {
        self.runner_queue.lock().unwrap().len()
    }

    /// Drop every waiting Runner's callback, signalling shutdown to the
    /// suspended request handlers.
    pub fn close_waiting(&self) {
        for runner in self.runner_queue.lock().unwrap().drain_all() {
            tracing::debug!(runner = %runner.name, "releasing waiting runner for shutdown");
        }
    }

    /// One pass of the match loop: pair the oldest waiting Runner with the
    /// oldest queued job whose source file still exists.
    pub async fn match_once(&self) -> Result<()> {
        let Some(runner) = self.runner_queue.lock().unwrap().pop_oldest() else {
            return Ok(());
        };

        let job = loop {
            let popped = match self.db.pop_oldest_queued().await {
                Ok(popped) => popped,
                Err(e) => {
                    self.runner_queue.lock().unwrap().requeue_oldest(runner);
                    return Err(e);
                }
            };
            let Some(job) = popped else {
                self.runner_queue.lock().unwrap().requeue_oldest(runner);
                return Ok(());
            };

            match tokio::fs::metadata(&job.path).await {
                Ok(_) => break job,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(
                        uuid = %job.uuid,
                        path = %job.path.display(),
                        "discarding job for missing file"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        path = %job.path.display(),
                        error = %e,
                        "unexpected error stating queued file"
                    );
                    tokio::time::sleep(STAT_RETRY_DELAY).await;
                }
            }
        };

        let dispatched = DispatchedJob::new(job.clone(), runner.name.clone());
        if let Err(e) = self.db.insert_dispatched(&dispatched).await {
            tracing::error!(uuid = %dispatched.uuid, error = %e, "failed to record dispatched job");
        }

        tracing::info!(uuid = %job.uuid, runner = %runner.name, "job dispatched");
        if let Err(job) = runner.callback.send(job) {
            // The request vanished between pop and send; undo the hand-off.
            let _ = self.db.delete_dispatched(job.uuid).await;
            if let Err(e) = self.db.enqueue(&job).await {
                tracing::error!(uuid = %job.uuid, error = %e, "failed to requeue job after dead callback");
            }
        }

        Ok(())
    }

    /// Drive `match_once` at ~10 Hz until shutdown, then release every
    /// waiting Runner.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_millis(100));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            if let Err(e) = self.match_once().await {
                tracing::error!(error = %e, "match loop pass failed");
            }
        }
        self.close_waiting();
        tracing::info!("dispatcher stopped");
    }

    pub fn is_nullified(&self, uuid: Uuid) -> bool {
        self.nullified.read().unwrap().contains(&uuid)
    }

    /// Mark each UUID as abandoned and drop its dispatched record. Any later
    /// Runner communication about these UUIDs is answered with 409.
    pub async fn nullify(&self, uuids: Vec<Uuid>) {
        for uuid in uuids {
            self.nullified.write().unwrap().insert(uuid);

            match self.db.get_dispatched(uuid).await {
                Ok(Some(dispatched)) => {
                    tracing::warn!(
                        uuid = %uuid,
                        path = %dispatched.job.path.display(),
                        runner = %dispatched.runner,
                        "removing dispatched job for unresponsive runner"
                    );
                    if let Err(e) = self.db.delete_dispatched(uuid).await {
                        tracing::error!(uuid = %uuid, error = %e, "failed to delete nullified job");
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::error!(uuid = %uuid, error = %e, "failed to load dispatched job"),
            }
        }
    }

    /// Apply a Runner progress report to the dispatched registry.
    pub async fn status_update(&self, uuid: Uuid, status: JobStatus) -> Result<()> {
        if self.is_nullified(uuid) {
            return Err(ControllerError::Nullified(uuid));
        }

        let mut dispatched = self
            .db
            .get_dispatched(uuid)
            .await?
            .ok_or(ControllerError::JobNotFound(uuid))?;

        dispatched.status = status;
        dispatched.last_updated = Utc::now();
        self.db.update_dispatched(&dispatched).await?;
        Ok(())
    }

    /// Path for the intermediate file that will hold a Runner's output.
    pub fn import_path(&self, uuid: Uuid, source_ext: &str) -> PathBuf {
        self.import_dir.join(format!("{uuid}.import{source_ext}"))
    }

    /// Retire a job: drop the dispatched record, then publish the completion.
    /// At most one completion is published per UUID, even if the Runner
    /// retries after a store error.
    pub async fn finish_complete(&self, completed: CompletedJob) -> Result<()> {
        self.db.delete_dispatched(completed.uuid).await?;
        let _ = self.completed_tx.send(completed);
        Ok(())
    }

    /// Non-blocking drain of every completion accumulated since the last
    /// call.
    pub fn drain_completed(&self) -> Vec<CompletedJob> {
        let mut receiver = self.completed_rx.lock().unwrap();
        let mut completed = Vec::new();
        while let Ok(job) = receiver.try_recv() {
            completed.push(job);
        }
        completed
    }
}
