//! HTTP handlers for listing and downloading ROMs

use std::io;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use tracing::Instrument;
use uuid::Uuid;

use crate::protocol::{ErrorBody, LibraryError, StreamOutcome};

use super::sink::{self, ChannelSink};
use super::AppState;

pub const TOTAL_COUNT_HEADER: &str = "x-total-count";

/// Chunks buffered between the reader task and hyper
const BODY_CHANNEL_CAPACITY: usize = 4;

/// Library errors rendered as JSON responses
#[derive(Debug)]
pub struct AppError(pub LibraryError);

impl From<LibraryError> for AppError {
    fn from(err: LibraryError) -> Self {
        Self(err)
    }
}

pub fn status_for(err: &LibraryError) -> StatusCode {
    match err {
        LibraryError::CatalogUnavailable { .. } | LibraryError::StreamFailed { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        LibraryError::InvalidName { .. } | LibraryError::NotFound { .. } => StatusCode::NOT_FOUND,
        LibraryError::AccessDenied { .. } => StatusCode::FORBIDDEN,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        match &self.0 {
            LibraryError::CatalogUnavailable { source } | LibraryError::StreamFailed { source } => {
                tracing::error!(cause = %source, "{}", self.0);
            }
            other => tracing::debug!("{}", other),
        }
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

/// GET /api/roms
pub async fn list_roms(State(state): State<AppState>) -> Result<Response, AppError> {
    let listing = state.store.list_files().await?;
    let headers = [(
        HeaderName::from_static(TOTAL_COUNT_HEADER),
        listing.total_count.to_string(),
    )];
    Ok((headers, Json(listing.entries)).into_response())
}

/// GET /api/roms/:name
///
/// The name is read from the request path still percent-encoded, so it is
/// decoded exactly once, by the validator. Headers go out only after the
/// streamer has opened the file and declared its length; anything failing
/// before that is still a proper error response.
pub async fn download_rom(State(state): State<AppState>, uri: Uri) -> Result<Response, AppError> {
    let raw_name = raw_last_segment(uri.path());

    let rom = state.store.resolve_download(raw_name).await?;

    let span = tracing::info_span!("download", id = %Uuid::new_v4(), name = %rom.name);
    let (mut body_sink, ready, body) = ChannelSink::new(BODY_CHANNEL_CAPACITY);
    let store = state.store.clone();
    let task_rom = rom.clone();

    let transfer = tokio::spawn(
        async move {
            let started = Instant::now();
            let result = store.stream_download(&task_rom, &mut body_sink).await;
            match &result {
                Ok(StreamOutcome::Completed { bytes }) => tracing::info!(
                    "Sent {} bytes in {:.2?}",
                    bytes,
                    started.elapsed()
                ),
                Ok(StreamOutcome::ConsumerGone { bytes_sent }) => tracing::info!(
                    "Client disconnected after {} of {} bytes",
                    bytes_sent,
                    task_rom.size
                ),
                Ok(StreamOutcome::Aborted { bytes_sent }) => tracing::warn!(
                    "Transfer aborted after {} of {} bytes",
                    bytes_sent,
                    task_rom.size
                ),
                Err(e) => tracing::debug!("Transfer did not start: {}", e),
            }
            result
        }
        .instrument(span),
    );

    let length = match ready.await {
        Ok(length) => length,
        Err(_) => return Err(start_failure(transfer.await).into()),
    };

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_DISPOSITION, content_disposition(&rom.name))
        .header(header::CONTENT_LENGTH, length)
        .body(sink::into_body(body))
        .map_err(|e| LibraryError::StreamFailed {
            source: io::Error::other(e),
        })?;

    Ok(response)
}

/// Final path segment exactly as sent by the client
fn raw_last_segment(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, last)| last).unwrap_or(path)
}

/// The sink was dropped without a declared length; work out why
fn start_failure(
    joined: Result<Result<StreamOutcome, LibraryError>, tokio::task::JoinError>,
) -> LibraryError {
    match joined {
        Ok(Err(err)) => err,
        Ok(Ok(outcome)) => LibraryError::StreamFailed {
            source: io::Error::other(format!(
                "transfer ended before it started ({:?})",
                outcome
            )),
        },
        Err(join_err) => LibraryError::StreamFailed {
            source: io::Error::other(join_err),
        },
    }
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 name
pub fn content_disposition(name: &str) -> HeaderValue {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();

    let mut value = format!("attachment; filename=\"{}\"", fallback);
    if fallback != name {
        value.push_str("; filename*=UTF-8''");
        value.push_str(&urlencoding::encode(name));
    }

    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
