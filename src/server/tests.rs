use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use crate::filesystem::config::LibraryConfig;
use crate::filesystem::streamer::ByteSink;
use crate::filesystem::{RomLibrary, RomStore};
use crate::protocol::{LibraryError, Listing, ResolvedRom, StreamOutcome};

use super::{create_router, AppState};

fn library_fixture() -> (TempDir, PathBuf) {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("roms");
    std::fs::create_dir(&root).unwrap();
    (temp, root)
}

fn app_for(root: &Path) -> Router {
    let library = RomLibrary::new(LibraryConfig::new(root).unwrap());
    create_router(AppState::new(Arc::new(library)))
}

async fn get(app: Router, uri: &str) -> Response {
    let request = Request::builder()
        .uri(uri)
        .header(header::ORIGIN, "http://localhost:5173")
        .body(Body::empty())
        .expect("Failed to build request");
    app.oneshot(request).await.expect("router is infallible")
}

async fn body_bytes(response: Response) -> Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("body should be readable")
        .to_bytes()
}

async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).expect("body should be JSON")
}

/// Store that skips the filesystem to exercise transfer failures
enum FakeStore {
    FailBeforeStart,
    AbortAfter(usize),
}

#[async_trait]
impl RomStore for FakeStore {
    async fn list_files(&self) -> Result<Listing, LibraryError> {
        Ok(Listing {
            root: PathBuf::from("/fake"),
            entries: Vec::new(),
            total_count: 0,
        })
    }

    async fn resolve_download(&self, raw_name: &str) -> Result<ResolvedRom, LibraryError> {
        Ok(ResolvedRom {
            path: PathBuf::from("/fake").join(raw_name),
            name: raw_name.to_string(),
            size: 10,
        })
    }

    async fn stream_download(
        &self,
        rom: &ResolvedRom,
        sink: &mut dyn ByteSink,
    ) -> Result<StreamOutcome, LibraryError> {
        match self {
            FakeStore::FailBeforeStart => Err(LibraryError::StreamFailed {
                source: io::Error::new(io::ErrorKind::Other, "disk on fire"),
            }),
            FakeStore::AbortAfter(n) => {
                sink.declare_length(rom.size);
                let _ = sink.write(Bytes::from(vec![7u8; *n])).await;
                sink.abort(io::Error::new(io::ErrorKind::Other, "read failed"))
                    .await;
                Ok(StreamOutcome::Aborted {
                    bytes_sent: *n as u64,
                })
            }
        }
    }
}

#[tokio::test]
async fn test_health_returns_ok() {
    let (_temp, root) = library_fixture();
    let response = get(app_for(&root), "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, Bytes::from_static(b"OK"));
}

#[tokio::test]
async fn test_list_returns_entries_and_count() {
    let (_temp, root) = library_fixture();
    std::fs::write(root.join("game.bin"), vec![0u8; 1024]).unwrap();
    std::fs::write(root.join("other one.gb"), vec![1u8; 16]).unwrap();

    let response = get(app_for(&root), "/api/roms").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-total-count"], "2");
    assert_eq!(response.headers()["access-control-allow-origin"], "*");

    let json = body_json(response).await;
    let entries = json.as_array().expect("listing is a JSON array");
    assert_eq!(entries.len(), 2);

    let game = entries
        .iter()
        .find(|e| e["name"] == "game.bin")
        .expect("game.bin listed");
    assert_eq!(game["size"], 1024);
    assert_eq!(game["path"], "game.bin");
    assert!(game["lastModified"].is_u64());

    let other = entries
        .iter()
        .find(|e| e["name"] == "other one.gb")
        .expect("other one.gb listed");
    assert_eq!(other["path"], "other%20one.gb");
}

#[tokio::test]
async fn test_list_reports_unavailable_directory() {
    let (_temp, root) = library_fixture();
    let app = app_for(&root);
    std::fs::remove_dir_all(&root).unwrap();

    let response = get(app, "/api/roms").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["error"], "catalog_unavailable");
    assert_eq!(json["message"], "ROM directory is unavailable");
}

#[tokio::test]
async fn test_download_streams_file_with_headers() {
    let (_temp, root) = library_fixture();
    let data: Vec<u8> = (0..200_000u32).map(|i| (i % 256) as u8).collect();
    std::fs::write(root.join("game.bin"), &data).unwrap();

    let response = get(app_for(&root), "/api/roms/game.bin").await;
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"game.bin\""
    );
    assert_eq!(headers[header::CONTENT_LENGTH], "200000");

    let body = body_bytes(response).await;
    assert_eq!(body.len(), 200_000);
    assert_eq!(body.as_ref(), data.as_slice());
}

#[tokio::test]
async fn test_download_decodes_encoded_names() {
    let (_temp, root) = library_fixture();
    std::fs::write(root.join("Mario Kart.sfc"), b"kart").unwrap();

    let response = get(app_for(&root), "/api/roms/Mario%20Kart.sfc").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, Bytes::from_static(b"kart"));
}

#[tokio::test]
async fn test_download_traversal_is_forbidden() {
    let (temp, root) = library_fixture();
    std::fs::write(temp.path().join("secret"), b"top secret").unwrap();

    let response = get(app_for(&root), "/api/roms/%2e%2e%2fsecret").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = body_json(response).await;
    assert_eq!(json["error"], "access_denied");
    assert!(!json.to_string().contains("top secret"));
}

#[tokio::test]
async fn test_download_missing_file_is_not_found() {
    let (_temp, root) = library_fixture();

    let response = get(app_for(&root), "/api/roms/missing.bin").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "not_found");
}

#[tokio::test]
async fn test_download_malformed_name_is_not_found() {
    let (_temp, root) = library_fixture();

    let response = get(app_for(&root), "/api/roms/%FF").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "invalid_name");
}

#[tokio::test]
async fn test_failure_before_first_byte_is_server_error() {
    let app = create_router(AppState::new(Arc::new(FakeStore::FailBeforeStart)));

    let response = get(app, "/api/roms/game.bin").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["error"], "stream_failed");
    assert!(!json.to_string().contains("disk on fire"));
}

#[tokio::test]
async fn test_failure_mid_stream_breaks_the_body() {
    let app = create_router(AppState::new(Arc::new(FakeStore::AbortAfter(4))));

    let response = get(app, "/api/roms/game.bin").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "10");
    assert!(response.into_body().collect().await.is_err());
}

#[tokio::test]
async fn test_dropped_response_releases_file_handle() {
    let (_temp, root) = library_fixture();
    std::fs::write(root.join("big.bin"), vec![0u8; 1 << 20]).unwrap();

    let config = LibraryConfig {
        chunk_size: 1024,
        ..LibraryConfig::new(&root).unwrap()
    };
    let library = Arc::new(RomLibrary::new(config));
    let app = create_router(AppState::new(library.clone()));

    let response = get(app, "/api/roms/big.bin").await;
    assert_eq!(response.status(), StatusCode::OK);
    drop(response);

    for _ in 0..200 {
        if library.handles().released() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(library.handles().open(), 0);
    assert_eq!(library.handles().released(), 1);
}
