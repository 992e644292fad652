use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::{self, ApiState};
use crate::config::ControllerConfig;
use crate::db::SqliteDatabase;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::health::HealthChecker;
use crate::library::scanner::LibraryScanner;
use crate::library::LibraryScheduler;

/// Orchestrates every controller subsystem.
pub struct Controller {
    config: ControllerConfig,
    db: SqliteDatabase,
    dispatcher: Arc<Dispatcher>,
    scheduler: LibraryScheduler,
    health: HealthChecker,
}

impl Controller {
    /// Open the store under the config directory and wire up the subsystems.
    pub async fn new(config: ControllerConfig, scanner: Arc<dyn LibraryScanner>) -> Result<Self> {
        let db = SqliteDatabase::connect(&config.config_dir).await?;

        let known: Vec<_> = db
            .all_libraries()
            .await?
            .into_iter()
            .map(|l| l.folder)
            .collect();
        for folder in &config.libraries {
            if !known.contains(folder) {
                let library = db
                    .insert_library(folder, config.fs_check_interval, Default::default())
                    .await?;
                tracing::info!(
                    library_id = library.id,
                    folder = %library.folder.display(),
                    "registered library"
                );
            }
        }

        let dispatcher = Arc::new(Dispatcher::new(db.clone(), config.import_dir.clone()));
        let scheduler = LibraryScheduler::new(db.clone(), scanner);
        let health = HealthChecker::new(config.health_check_interval, config.health_check_timeout);

        Ok(Self {
            config,
            db,
            dispatcher,
            scheduler,
            health,
        })
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    /// Run the controller until the token cancels.
    ///
    /// Spawns the match loop, library scheduler, health checker, and
    /// completion loop, then serves the Runner API (blocking).
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Self {
            config,
            db,
            dispatcher,
            scheduler,
            health,
        } = self;

        tokio::spawn(dispatcher.clone().run(shutdown.clone()));
        tokio::spawn(scheduler.run(shutdown.clone()));
        tokio::spawn(run_health_loop(
            health,
            db.clone(),
            dispatcher.clone(),
            shutdown.clone(),
        ));
        tokio::spawn(run_completion_loop(
            db.clone(),
            dispatcher.clone(),
            shutdown.clone(),
        ));

        let app = api::router(ApiState {
            dispatcher: dispatcher.clone(),
        });

        tracing::info!(addr = %config.listen_addr, "starting runner api server");
        let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        Ok(())
    }
}

/// Feed health-check verdicts to the Dispatcher at ~10 Hz.
async fn run_health_loop(
    mut health: HealthChecker,
    db: SqliteDatabase,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        match db.all_dispatched().await {
            Ok(dispatched) => {
                let stale = health.run_once(&dispatched);
                if !stale.is_empty() {
                    dispatcher.nullify(stale).await;
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to load dispatched jobs"),
        }
    }
    tracing::info!("health checker stopped");
}

/// Drain completions into the persistent history at ~10 Hz.
async fn run_completion_loop(
    db: SqliteDatabase,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        for completed in dispatcher.drain_completed() {
            tracing::info!(
                uuid = %completed.uuid,
                failed = completed.failed,
                "job completed"
            );
            if let Err(e) = db.insert_history(&completed).await {
                tracing::error!(uuid = %completed.uuid, error = %e, "failed to record history");
            }
        }
    }
    tracing::info!("completion loop stopped");
}
