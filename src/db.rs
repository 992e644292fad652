//! SQLite-backed store for queued jobs, dispatched jobs, libraries, and
//! history, kept under `data.db` in the config directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::dispatch::job::{CompletedJob, DispatchedJob, HistoryEntry, Job, JobParameters};
use crate::error::Result;
use crate::library::Library;

#[derive(Debug, Clone)]
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    /// Open `data.db` under `config_dir`, backing the file up to
    /// `data.db.backup` before applying any pending migrations.
    pub async fn connect(config_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(config_dir).await?;

        let db_file = config_dir.join("data.db");
        if tokio::fs::try_exists(&db_file).await? {
            tracing::info!("backing up database before migration");
            tokio::fs::copy(&db_file, config_dir.join("data.db.backup")).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_file)
            .create_if_missing(true);

        // A single connection sidesteps SQLite's "database is locked" errors.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    // Queued jobs

    pub async fn enqueue(&self, job: &Job) -> Result<()> {
        sqlx::query("INSERT INTO queued_jobs (uuid, path, parameters) VALUES (?1, ?2, ?3)")
            .bind(job.uuid)
            .bind(path_text(&job.path))
            .bind(serde_json::to_string(&job.parameters)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove and return the oldest queued job, if any.
    pub async fn pop_oldest_queued(&self) -> Result<Option<Job>> {
        let mut tx = self.pool.begin().await?;

        let Some(row) =
            sqlx::query("SELECT id, uuid, path, parameters FROM queued_jobs ORDER BY id LIMIT 1")
                .fetch_optional(&mut *tx)
                .await?
        else {
            return Ok(None);
        };

        let id: i64 = row.try_get("id")?;
        sqlx::query("DELETE FROM queued_jobs WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(Job {
            uuid: row.try_get("uuid")?,
            path: PathBuf::from(row.try_get::<String, _>("path")?),
            parameters: serde_json::from_str(&row.try_get::<String, _>("parameters")?)?,
        }))
    }

    /// Whether a path is already queued or dispatched.
    pub async fn contains_path(&self, path: &Path) -> Result<bool> {
        let row = sqlx::query(
            "SELECT (EXISTS(SELECT 1 FROM queued_jobs WHERE path = ?1)
                  OR EXISTS(SELECT 1 FROM dispatched_jobs WHERE path = ?1)) AS present",
        )
        .bind(path_text(path))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("present")?)
    }

    pub async fn queued_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM queued_jobs")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    // Dispatched jobs

    pub async fn insert_dispatched(&self, dispatched: &DispatchedJob) -> Result<()> {
        sqlx::query(
            "INSERT INTO dispatched_jobs (uuid, path, runner, job, status, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(dispatched.uuid)
        .bind(path_text(&dispatched.job.path))
        .bind(&dispatched.runner)
        .bind(serde_json::to_string(&dispatched.job)?)
        .bind(serde_json::to_string(&dispatched.status)?)
        .bind(dispatched.last_updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_dispatched(&self, uuid: Uuid) -> Result<Option<DispatchedJob>> {
        let row = sqlx::query(
            "SELECT uuid, runner, job, status, last_updated FROM dispatched_jobs WHERE uuid = ?1",
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| dispatched_from_row(&r)).transpose()
    }

    /// Persist a new status and last-updated time for a dispatched job.
    pub async fn update_dispatched(&self, dispatched: &DispatchedJob) -> Result<()> {
        sqlx::query("UPDATE dispatched_jobs SET status = ?2, last_updated = ?3 WHERE uuid = ?1")
            .bind(dispatched.uuid)
            .bind(serde_json::to_string(&dispatched.status)?)
            .bind(dispatched.last_updated)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_dispatched(&self, uuid: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM dispatched_jobs WHERE uuid = ?1")
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn all_dispatched(&self) -> Result<Vec<DispatchedJob>> {
        let rows = sqlx::query(
            "SELECT uuid, runner, job, status, last_updated FROM dispatched_jobs ORDER BY uuid",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(dispatched_from_row).collect()
    }

    // Libraries

    pub async fn insert_library(
        &self,
        folder: &Path,
        fs_check_interval: Duration,
        parameters: JobParameters,
    ) -> Result<Library> {
        let result = sqlx::query(
            "INSERT INTO libraries (folder, fs_check_interval, encode, stereo)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(path_text(folder))
        .bind(fs_check_interval.as_nanos() as i64)
        .bind(parameters.encode)
        .bind(parameters.stereo)
        .execute(&self.pool)
        .await?;

        Ok(Library {
            id: result.last_insert_rowid(),
            folder: folder.to_path_buf(),
            fs_check_interval,
            parameters,
        })
    }

    pub async fn all_libraries(&self) -> Result<Vec<Library>> {
        let rows =
            sqlx::query("SELECT id, folder, fs_check_interval, encode, stereo FROM libraries")
                .fetch_all(&self.pool)
                .await?;

        rows.iter()
            .map(|row| {
                Ok(Library {
                    id: row.try_get("id")?,
                    folder: PathBuf::from(row.try_get::<String, _>("folder")?),
                    fs_check_interval: Duration::from_nanos(
                        row.try_get::<i64, _>("fs_check_interval")?.max(0) as u64,
                    ),
                    parameters: JobParameters {
                        encode: row.try_get("encode")?,
                        stereo: row.try_get("stereo")?,
                    },
                })
            })
            .collect()
    }

    // History

    pub async fn insert_history(&self, completed: &CompletedJob) -> Result<()> {
        sqlx::query(
            "INSERT INTO history (uuid, filename, failed, in_file, warnings, errors, datetime_completed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(completed.uuid)
        .bind(&completed.history.filename)
        .bind(completed.failed)
        .bind(&completed.in_file)
        .bind(serde_json::to_string(&completed.history.warnings)?)
        .bind(serde_json::to_string(&completed.history.errors)?)
        .bind(completed.history.datetime_completed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn all_history(&self) -> Result<Vec<CompletedJob>> {
        let rows = sqlx::query(
            "SELECT uuid, filename, failed, in_file, warnings, errors, datetime_completed
             FROM history ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(CompletedJob {
                    uuid: row.try_get("uuid")?,
                    failed: row.try_get("failed")?,
                    in_file: row.try_get("in_file")?,
                    history: HistoryEntry {
                        filename: row.try_get("filename")?,
                        datetime_completed: row.try_get("datetime_completed")?,
                        warnings: serde_json::from_str(&row.try_get::<String, _>("warnings")?)?,
                        errors: serde_json::from_str(&row.try_get::<String, _>("errors")?)?,
                    },
                })
            })
            .collect()
    }
}

fn dispatched_from_row(row: &SqliteRow) -> Result<DispatchedJob> {
    Ok(DispatchedJob {
        uuid: row.try_get("uuid")?,
        job: serde_json::from_str(&row.try_get::<String, _>("job")?)?,
        runner: row.try_get("runner")?,
        status: serde_json::from_str(&row.try_get::<String, _>("status")?)?,
        last_updated: row.try_get("last_updated")?,
    })
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
