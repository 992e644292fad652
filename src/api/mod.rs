//! HTTP Runner API v1.
//!
//! The wire contract Runners depend on: a blocking job-request endpoint that
//! answers with job metadata in the `X-Encodarr-Job-Info` header and the
//! source file as the response body, a JSON status endpoint, and a multipart
//! completion endpoint. Nullified jobs are answered with `409` so the Runner
//! knows to abandon them.

use std::path::Path;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::multipart::{Field, Multipart};
use axum::extract::{FromRequest, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::dispatch::job::{CompletedJob, JobStatus};
use crate::dispatch::queue::WaitingRunner;
use crate::dispatch::Dispatcher;
use crate::error::ControllerError;

pub const RUNNER_NAME_HEADER: &str = "X-Encodarr-Runner-Name";
pub const JOB_INFO_HEADER: &str = "X-Encodarr-Job-Info";
pub const HISTORY_ENTRY_HEADER: &str = "X-Encodarr-History-Entry";

#[derive(Clone)]
pub struct ApiState {
    pub dispatcher: Arc<Dispatcher>,
}

/// Build the Runner API router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/runner/v1/job/request", get(request_job))
        .route("/api/runner/v1/job/status", post(job_status))
        .route("/api/runner/v1/job/complete", post(job_complete))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct IncomingJobStatus {
    uuid: Uuid,
    status: JobStatus,
}

/// Removes the queue entry if the request goes away before a job arrives.
struct QueueGuard {
    dispatcher: Arc<Dispatcher>,
    request_id: Uuid,
    armed: bool,
}

impl QueueGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for QueueGuard {
    fn drop(&mut self) {
        if self.armed {
            self.dispatcher.remove_runner(self.request_id);
        }
    }
}

/// GET /api/runner/v1/job/request — block until a job is available, then
/// stream its source file.
async fn request_job(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let runner_name = headers
        .get(RUNNER_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("Unknown")
        .to_string();

    let (callback, receiver) = oneshot::channel();
    let request_id = Uuid::new_v4();
    state.dispatcher.enqueue_runner(WaitingRunner {
        name: runner_name,
        request_id,
        callback,
    });

    let mut guard = QueueGuard {
        dispatcher: state.dispatcher.clone(),
        request_id,
        armed: true,
    };

    let job = match receiver.await {
        Ok(job) => job,
        Err(_) => {
            // Callback closed without a job: the server is shutting down.
            guard.disarm();
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    guard.disarm();

    let job_info = match serde_json::to_string(&job) {
        Ok(job_info) => job_info,
        Err(e) => {
            tracing::error!(uuid = %job.uuid, error = %e, "failed to encode job info header");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let file = match tokio::fs::File::open(&job.path).await {
        Ok(file) => file,
        Err(e) => {
            tracing::error!(path = %job.path.display(), error = %e, "failed to open source file");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match Response::builder()
        .header(JOB_INFO_HEADER, job_info)
        .header(header::CONTENT_TYPE, content_type_for(&job.path))
        .body(Body::from_stream(ReaderStream::new(file)))
    {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(uuid = %job.uuid, error = %e, "failed to build job response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// POST /api/runner/v1/job/status — apply a Runner progress report.
async fn job_status(State(state): State<ApiState>, body: Bytes) -> Response {
    let incoming: IncomingJobStatus = match serde_json::from_slice(&body) {
        Ok(incoming) => incoming,
        Err(e) => {
            tracing::debug!(error = %e, "rejecting malformed status body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match state
        .dispatcher
        .status_update(incoming.uuid, incoming.status)
        .await
    {
        Ok(()) => StatusCode::OK.into_response(),
        Err(ControllerError::Nullified(_)) => StatusCode::CONFLICT.into_response(),
        Err(e) => {
            tracing::error!(uuid = %incoming.uuid, error = %e, "status update failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// POST /api/runner/v1/job/complete — accept a Runner's finished job.
async fn job_complete(State(state): State<ApiState>, request: Request) -> Response {
    let Some(entry) = request
        .headers()
        .get(HISTORY_ENTRY_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        tracing::debug!("rejecting completion without history entry");
        return StatusCode::BAD_REQUEST.into_response();
    };

    let mut completed: CompletedJob = match serde_json::from_str(entry) {
        Ok(completed) => completed,
        Err(e) => {
            tracing::debug!(error = %e, "rejecting malformed history entry");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    if state.dispatcher.is_nullified(completed.uuid) {
        // The Runner is reporting a job the controller gave up on; whatever
        // it uploaded is dropped unread.
        return StatusCode::CONFLICT.into_response();
    }

    if !completed.failed {
        // A failed job carries no upload.
        let multipart = match Multipart::from_request(request, &()).await {
            Ok(multipart) => multipart,
            Err(e) => {
                tracing::debug!(error = %e, "rejecting completion without form data");
                return StatusCode::BAD_REQUEST.into_response();
            }
        };
        if let Err(status) = receive_output_file(&state.dispatcher, &mut completed, multipart).await
        {
            return status.into_response();
        }
    }

    match state.dispatcher.finish_complete(completed).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to retire completed job");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Copy the uploaded `file` form field into the import directory, recording
/// the chosen path on the completion.
async fn receive_output_file(
    dispatcher: &Dispatcher,
    completed: &mut CompletedJob,
    mut multipart: Multipart,
) -> Result<(), StatusCode> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => {
                tracing::debug!(uuid = %completed.uuid, "completion upload missing file field");
                return Err(StatusCode::BAD_REQUEST);
            }
            Err(e) => {
                tracing::debug!(error = %e, "failed to read completion upload");
                return Err(StatusCode::BAD_REQUEST);
            }
        };
        if field.name() != Some("file") {
            continue;
        }

        let ext = field.file_name().map(source_extension).unwrap_or_default();
        let import_path = dispatcher.import_path(completed.uuid, &ext);
        write_field_to(&import_path, field).await?;

        completed.in_file = import_path.to_string_lossy().into_owned();
        return Ok(());
    }
}

/// Stream one multipart field into a freshly created file.
async fn write_field_to(import_path: &Path, mut field: Field<'_>) -> Result<(), StatusCode> {
    let mut file = match tokio::fs::File::create(import_path).await {
        Ok(file) => file,
        Err(e) => {
            tracing::error!(path = %import_path.display(), error = %e, "failed to create import file");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                if let Err(e) = file.write_all(&chunk).await {
                    tracing::error!(path = %import_path.display(), error = %e, "failed to write import file");
                    return Err(StatusCode::INTERNAL_SERVER_ERROR);
                }
            }
            Ok(None) => return Ok(()),
            Err(e) => {
                tracing::debug!(error = %e, "completion upload interrupted");
                return Err(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
    }
}

/// The extension of the uploaded file, dot included (empty when absent).
fn source_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default()
}

/// Content type for a source file, by extension.
fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("mkv") => "video/x-matroska",
        Some("mp4") => "video/mp4",
        Some("avi") => "video/x-msvideo",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("m4v") => "video/x-m4v",
        Some("wmv") => "video/x-ms-wmv",
        Some("flv") => "video/x-flv",
        Some("ts") => "video/mp2t",
        _ => "application/octet-stream",
    }
}
