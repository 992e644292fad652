use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single transcoding task tied to a source file on the controller host.
/// Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub uuid: Uuid,
    pub path: PathBuf,
    pub parameters: JobParameters,
}

impl Job {
    pub fn new(path: PathBuf, parameters: JobParameters) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            path,
            parameters,
        }
    }
}

/// Command parameters forwarded to the Runner alongside the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParameters {
    /// Transcode the video stream to HEVC.
    pub encode: bool,
    /// Add a downmixed stereo audio track.
    pub stereo: bool,
}

impl Default for JobParameters {
    fn default() -> Self {
        Self {
            encode: true,
            stereo: false,
        }
    }
}

/// Progress report for a dispatched job. Every field is an opaque string
/// produced by the Runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub stage: String,
    pub percentage: String,
    pub job_elapsed_time: String,
    pub fps: String,
    pub stage_elapsed_time: String,
    pub stage_estimated_time_remaining: String,
}

impl JobStatus {
    /// Initial status recorded at hand-off time.
    pub fn copying_to_runner() -> Self {
        Self {
            stage: "Copying to Runner".to_string(),
            percentage: "0".to_string(),
            job_elapsed_time: "N/A".to_string(),
            fps: "N/A".to_string(),
            stage_elapsed_time: "N/A".to_string(),
            stage_estimated_time_remaining: "N/A".to_string(),
        }
    }
}

/// An in-flight job record, keyed by the job UUID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchedJob {
    pub uuid: Uuid,
    pub job: Job,
    pub runner: String,
    pub last_updated: DateTime<Utc>,
    pub status: JobStatus,
}

impl DispatchedJob {
    pub fn new(job: Job, runner: String) -> Self {
        Self {
            uuid: job.uuid,
            job,
            runner,
            last_updated: Utc::now(),
            status: JobStatus::copying_to_runner(),
        }
    }
}

/// History metadata reported by the Runner on completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub filename: String,
    pub datetime_completed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Terminal record for a job, drained by the completion loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedJob {
    pub uuid: Uuid,
    pub failed: bool,
    /// Path the controller wrote the received output to, empty on failure.
    #[serde(default)]
    pub in_file: String,
    pub history: HistoryEntry,
}
