//! Library scan scheduling.
//!
//! Each library is rescanned on its own interval. A scan runs as a spawned
//! task; the scheduler guarantees a library never has two scans in flight,
//! so a slow walk over a large tree cannot stack up behind itself.

pub mod scanner;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::db::SqliteDatabase;
use crate::dispatch::job::{Job, JobParameters};
use crate::library::scanner::LibraryScanner;

/// A directory tree periodically scanned for transcoding candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Library {
    pub id: i64,
    pub folder: PathBuf,
    pub fs_check_interval: Duration,
    /// Pipeline settings applied to every job this library enqueues.
    pub parameters: JobParameters,
}

/// Triggers per-library filesystem scans that feed the job queue.
pub struct LibraryScheduler {
    db: SqliteDatabase,
    scanner: Arc<dyn LibraryScanner>,
    last_check: HashMap<i64, Instant>,
    in_flight: Arc<Mutex<HashSet<i64>>>,
}

impl LibraryScheduler {
    pub fn new(db: SqliteDatabase, scanner: Arc<dyn LibraryScanner>) -> Self {
        Self {
            db,
            scanner,
            last_check: HashMap::new(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// One scheduler pass: start a scan for every library whose interval has
    /// elapsed and whose previous scan has finished.
    pub async fn tick(&mut self) {
        let libraries = match self.db.all_libraries().await {
            Ok(libraries) => libraries,
            Err(e) => {
                tracing::error!(error = %e, "failed to load libraries");
                return;
            }
        };

        for library in libraries {
            if self.in_flight.lock().unwrap().contains(&library.id) {
                continue;
            }
            if let Some(last) = self.last_check.get(&library.id) {
                if last.elapsed() < library.fs_check_interval {
                    continue;
                }
            }

            tracing::debug!(library_id = library.id, "initiating library scan");
            self.last_check.insert(library.id, Instant::now());
            self.in_flight.lock().unwrap().insert(library.id);

            let db = self.db.clone();
            let scanner = self.scanner.clone();
            let in_flight = self.in_flight.clone();
            tokio::spawn(async move {
                scan_library(&db, scanner.as_ref(), &library).await;
                in_flight.lock().unwrap().remove(&library.id);
            });
        }
    }

    /// Number of scans currently running.
    pub fn scans_in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    /// Drive `tick` at ~10 Hz until shutdown.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_millis(100));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.tick().await;
        }
        tracing::info!("library scheduler stopped");
    }
}

/// Enqueue a job for every candidate the scanner reports that is not already
/// queued or dispatched.
async fn scan_library(db: &SqliteDatabase, scanner: &dyn LibraryScanner, library: &Library) {
    let candidates = match scanner.scan(library).await {
        Ok(candidates) => candidates,
        Err(e) => {
            tracing::error!(library_id = library.id, error = %e, "library scan failed");
            return;
        }
    };

    for path in candidates {
        match db.contains_path(&path).await {
            Ok(true) => {}
            Ok(false) => {
                let job = Job::new(path, library.parameters);
                match db.enqueue(&job).await {
                    Ok(()) => {
                        tracing::info!(
                            uuid = %job.uuid,
                            path = %job.path.display(),
                            "queued new job"
                        );
                    }
                    Err(e) => tracing::error!(uuid = %job.uuid, error = %e, "failed to enqueue job"),
                }
            }
            Err(e) => tracing::error!(error = %e, "queue lookup failed"),
        }
    }
}
