//! Job Log API Handlers
//!
//! Stored logs of a job and a server-sent event stream that replays them
//! and then follows new entries until the task finishes.

use std::pin::Pin;

use axum::{
    Json,
    extract::{Path, State},
    response::sse::{Event, KeepAlive, KeepAliveStream, Sse},
};
use taskline_core::domain::log::LogEntry;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::api::AppState;
use crate::api::error::ApiResult;

type EventStream = Pin<Box<dyn Stream<Item = Result<Event, axum::Error>> + Send>>;

/// GET /api/workflows/{name}/tasks/{id}/jobs/{job}/logs
pub async fn get_job_logs(
    State(state): State<AppState>,
    Path((name, id, job)): Path<(String, i64, String)>,
) -> ApiResult<Json<Vec<LogEntry>>> {
    tracing::debug!("Getting logs for job {} of {}#{}", job, name, id);
    Ok(Json(state.logs.get_job_logs(&name, id, &job).await?))
}

/// GET /api/workflows/{name}/tasks/{id}/jobs/{job}/logs/stream
pub async fn stream_job_logs(
    State(state): State<AppState>,
    Path((name, id, job)): Path<(String, i64, String)>,
) -> ApiResult<Sse<KeepAliveStream<EventStream>>> {
    // Subscribe before reading history so nothing written in between is lost
    let live = state.logs.follow(&name, id, &job);
    let finished = state.workflows.get_task(&name, id).await?.status.is_terminal();
    let history = state.logs.get_job_logs(&name, id, &job).await?;

    tracing::debug!(
        "Streaming {} stored log entries for job {} of {}#{} (finished: {})",
        history.len(),
        job,
        name,
        id,
        finished
    );

    let history = tokio_stream::iter(history);
    let stream: EventStream = if finished {
        Box::pin(history.map(to_event))
    } else {
        let live = BroadcastStream::new(live).filter_map(|entry| entry.ok());
        Box::pin(history.chain(live).map(to_event))
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_event(entry: LogEntry) -> Result<Event, axum::Error> {
    Event::default().event("log").json_data(&entry)
}
