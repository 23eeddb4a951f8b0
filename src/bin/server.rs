#![forbid(unsafe_code)]

//! Axum front end: lists the formats of a video and streams a single
//! downloaded file back to the caller.
//!
//! Every download lands in its own scratch directory and is removed shortly
//! after the response body has been released, so the downloads directory only
//! ever holds in-flight work.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::Parser;
use fetchtube::{
    cleanup::{CleanupScheduler, sweep_stale},
    config::{SettingsOverrides, resolve_settings},
    engine::YtDlpEngine,
    error::FetchError,
    logging::{DEFAULT_LOG_LEVEL, init_logging},
    service::{DownloadService, VideoInfo},
};
use serde::{Deserialize, Serialize};
use tokio::signal;
use tokio_util::io::ReaderStream;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "fetchtube-server",
    about = "HTTP service for listing and downloading video formats"
)]
struct ServerArgs {
    /// Address to listen on (FETCHTUBE_HOST).
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (FETCHTUBE_PORT).
    #[arg(long)]
    port: Option<u16>,
    /// Scratch directory for in-flight downloads (DOWNLOADS_DIR).
    #[arg(long)]
    downloads_dir: Option<PathBuf>,
    /// Netscape cookie jar handed to yt-dlp (COOKIES_FILE).
    #[arg(long)]
    cookies_file: Option<PathBuf>,
    /// File receiving error-level log entries (ERROR_LOG).
    #[arg(long)]
    error_log: Option<PathBuf>,
    /// Seconds to wait before deleting a delivered file (CLEANUP_DELAY_SECS).
    #[arg(long)]
    cleanup_delay_secs: Option<u64>,
    /// yt-dlp executable (YTDLP_BIN).
    #[arg(long)]
    ytdlp_bin: Option<PathBuf>,
    /// Alternative `.env` file.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl ServerArgs {
    fn into_overrides(self) -> SettingsOverrides {
        SettingsOverrides {
            host: self.host,
            port: self.port,
            downloads_dir: self.downloads_dir,
            cookies_file: self.cookies_file,
            error_log: self.error_log,
            cleanup_delay_secs: self.cleanup_delay_secs,
            ytdlp_bin: self.ytdlp_bin,
            env_path: self.env_file,
        }
    }
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/FETCHTUBE_HOST")
}

/// Shared state injected into every handler.
#[derive(Clone)]
struct AppState {
    service: DownloadService,
}

#[derive(Deserialize)]
struct InfoRequest {
    url: String,
}

#[derive(Deserialize)]
struct DownloadRequest {
    url: String,
    format_id: String,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    message: &'static str,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "detail": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = resolve_settings(ServerArgs::parse().into_overrides())?;
    init_logging(DEFAULT_LOG_LEVEL, Some(&settings.error_log))?;

    let host = parse_host_arg(&settings.host)?;
    std::fs::create_dir_all(&settings.downloads_dir)
        .with_context(|| format!("creating {}", settings.downloads_dir.display()))?;
    let downloads_dir = settings
        .downloads_dir
        .canonicalize()
        .with_context(|| format!("resolving {}", settings.downloads_dir.display()))?;
    // Nothing is in flight yet, so anything left here belongs to a previous
    // process that died before its cleanups ran.
    sweep_stale(&downloads_dir);

    if !settings.cookies_file.exists() {
        warn!(
            path = %settings.cookies_file.display(),
            "cookie file not found, yt-dlp will run without cookies"
        );
    }
    let engine = YtDlpEngine::new(&settings.ytdlp_bin)
        .with_cookies(&settings.cookies_file)
        .with_probe_timeout(settings.probe_timeout);
    let cleanup = CleanupScheduler::new(settings.cleanup_delay);
    let service = DownloadService::new(Arc::new(engine), downloads_dir, cleanup.clone());

    let app = build_router(AppState { service });

    let addr = SocketAddr::new(host, settings.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    cleanup.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_status))
        .route("/api/get-info", post(get_info))
        .route("/api/download", post(download))
        .fallback(not_found)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Browsers need `Content-Disposition` exposed to read the suggested name.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::CONTENT_DISPOSITION])
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!(%err, "failed to install Ctrl+C handler");
    }
}

async fn root_status() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        message: "fetchtube API is running",
    })
}

async fn not_found() -> ApiError {
    ApiError::not_found("endpoint not found")
}

async fn get_info(
    State(state): State<AppState>,
    Json(payload): Json<InfoRequest>,
) -> ApiResult<Json<VideoInfo>> {
    let info = state.service.info(payload.url.trim()).await?;
    Ok(Json(info))
}

async fn download(
    State(state): State<AppState>,
    Json(payload): Json<DownloadRequest>,
) -> ApiResult<Response> {
    let prepared = state
        .service
        .download(payload.url.trim(), payload.format_id.trim())
        .await?;
    let file_name = prepared.artifact().file_name.clone();
    let size = prepared.artifact().size;

    // From here on the reader owns the run: once the body is dropped the
    // file is queued for deletion.
    let reader = prepared.into_reader().await?;
    let mut response = Body::from_stream(ReaderStream::new(reader)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    headers.insert(header::CONTENT_DISPOSITION, content_disposition(&file_name));
    Ok(response)
}

/// `attachment` header with an ASCII fallback name plus the RFC 5987 encoded
/// original, since titles may contain non-ASCII letters.
fn content_disposition(file_name: &str) -> HeaderValue {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == ' ' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut encoded = String::with_capacity(file_name.len() * 3);
    for byte in file_name.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    HeaderValue::from_str(&format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}"
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::to_bytes;
    use axum::http::{Method, Request};
    use fetchtube::catalog::{RawFormat, SourceInfo};
    use fetchtube::engine::MediaEngine;
    use fetchtube::error::EngineError;
    use fetchtube::logging::{error_file_layer, open_error_log};
    use fetchtube::plan::FetchPlan;
    use serde_json::Value;
    use std::{fs, path::Path, time::Duration};
    use tempfile::tempdir;
    use tower::ServiceExt;
    use tracing_subscriber::layer::SubscriberExt;

    /// Resolves one catalog and writes `<run>.mp4` on fetch. Probing any URL
    /// starting with `bad` fails like yt-dlp does for unsupported input.
    struct StubEngine;

    #[async_trait]
    impl MediaEngine for StubEngine {
        async fn probe(&self, url: &str) -> Result<SourceInfo, EngineError> {
            if url.starts_with("bad") {
                return Err(EngineError::Exit {
                    program: "yt-dlp".into(),
                    status: "exit status: 1".into(),
                    detail: format!("ERROR: Unsupported URL: {url}"),
                });
            }
            Ok(SourceInfo {
                title: Some("Über Clip: #1".into()),
                thumbnail: None,
                duration: Some(10.0),
                formats: vec![RawFormat {
                    format_id: "18".into(),
                    ext: Some("mp4".into()),
                    vcodec: Some("avc1".into()),
                    acodec: Some("mp4a".into()),
                    ..RawFormat::default()
                }],
            })
        }

        async fn fetch(
            &self,
            _url: &str,
            _plan: &FetchPlan,
            output_template: &Path,
        ) -> Result<(), EngineError> {
            let dir = output_template.parent().unwrap();
            let run_id = dir.file_name().unwrap().to_string_lossy().into_owned();
            fs::write(dir.join(format!("{run_id}.mp4")), b"movie-bytes").unwrap();
            Ok(())
        }
    }

    fn test_state(root: &Path) -> AppState {
        AppState {
            service: DownloadService::new(
                Arc::new(StubEngine),
                root,
                CleanupScheduler::new(Duration::from_millis(10)),
            ),
        }
    }

    async fn json_body(response: Response) -> Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn server_args_map_to_overrides() {
        let args = ServerArgs::try_parse_from([
            "fetchtube-server",
            "--host",
            "0.0.0.0",
            "--port",
            "9000",
            "--cleanup-delay-secs",
            "2",
            "--downloads-dir",
            "/srv/dl",
        ])
        .unwrap();
        let overrides = args.into_overrides();
        assert_eq!(overrides.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(overrides.port, Some(9000));
        assert_eq!(overrides.cleanup_delay_secs, Some(2));
        assert_eq!(overrides.downloads_dir, Some(PathBuf::from("/srv/dl")));
        assert!(overrides.env_path.is_none());
    }

    #[test]
    fn server_args_reject_bad_port() {
        assert!(ServerArgs::try_parse_from(["fetchtube-server", "--port", "http"]).is_err());
        assert!(parse_host_arg("not-an-ip").is_err());
        assert!(parse_host_arg("::1").is_ok());
    }

    #[tokio::test]
    async fn root_reports_liveness() {
        let Json(status) = root_status().await;
        assert_eq!(status.status, "ok");
    }

    #[tokio::test]
    async fn get_info_returns_catalog() {
        let dir = tempdir().unwrap();
        let Json(info) = get_info(
            State(test_state(dir.path())),
            Json(InfoRequest {
                url: " https://video.example/a ".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(info.formats.len(), 1);
        assert_eq!(info.duration, Some(10.0));
    }

    #[tokio::test]
    async fn get_info_failure_is_bad_request_and_logged() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("yt_error.log");
        let error_log = open_error_log(&log_path).unwrap();
        let subscriber = tracing_subscriber::registry().with(error_file_layer(error_log));
        let _guard = tracing::subscriber::set_default(subscriber);

        let err = get_info(
            State(test_state(&dir.path().join("downloads"))),
            Json(InfoRequest {
                url: "bad-url".into(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(!err.message.is_empty());

        let response = err.into_response();
        let parsed = json_body(response).await;
        assert!(parsed["detail"].as_str().unwrap().contains("Unsupported URL"));

        let log = fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("get info failed"));
        assert!(log.contains("bad-url"));
    }

    #[tokio::test]
    async fn download_streams_file_and_cleans_up() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path());
        let response = download(
            State(state.clone()),
            Json(DownloadRequest {
                url: "https://video.example/a".into(),
                format_id: "18".into(),
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/octet-stream"
        );
        assert_eq!(response.headers().get(header::CONTENT_LENGTH).unwrap(), "11");
        let disposition = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.contains("filename=\"_ber Clip 1.mp4\""));
        assert!(disposition.contains("filename*=UTF-8''%C3%9Cber%20Clip%201.mp4"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"movie-bytes");

        state.service.cleanup().shutdown().await;
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn download_of_unknown_format_is_bad_request() {
        let dir = tempdir().unwrap();
        let err = download(
            State(test_state(dir.path())),
            Json(DownloadRequest {
                url: "https://video.example/a".into(),
                format_id: "137".into(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("137"));
    }

    #[test]
    fn server_side_failures_map_to_500() {
        let err = ApiError::from(FetchError::ArtifactMissing {
            run_id: "abc".into(),
        });
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn unknown_routes_are_json_404() {
        let response = not_found().await.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let parsed = json_body(response).await;
        assert_eq!(parsed["detail"], "endpoint not found");
    }

    #[test]
    fn content_disposition_is_ascii_safe() {
        let value = content_disposition("My Video Part 1.mp4");
        assert_eq!(
            value.to_str().unwrap(),
            "attachment; filename=\"My Video Part 1.mp4\"; filename*=UTF-8''My%20Video%20Part%201.mp4"
        );
    }

    const ORIGIN: &str = "http://localhost:3000";

    fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::ORIGIN, ORIGIN)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn router_serves_liveness_at_root() {
        let dir = tempdir().unwrap();
        let response = build_router(test_state(dir.path()))
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn router_routes_get_info_with_cors_headers() {
        let dir = tempdir().unwrap();
        let response = build_router(test_state(dir.path()))
            .oneshot(json_request(
                Method::POST,
                "/api/get-info",
                serde_json::json!({ "url": "https://video.example/a" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
        let exposed = response
            .headers()
            .get(header::ACCESS_CONTROL_EXPOSE_HEADERS)
            .unwrap()
            .to_str()
            .unwrap()
            .to_ascii_lowercase();
        assert!(exposed.contains("content-disposition"));

        let parsed = json_body(response).await;
        assert_eq!(parsed["formats"][0]["id"], "18");
        assert_eq!(parsed["formats"][0]["type"], "Combined");
    }

    #[tokio::test]
    async fn router_maps_bad_url_to_400_detail() {
        let dir = tempdir().unwrap();
        let response = build_router(test_state(dir.path()))
            .oneshot(json_request(
                Method::POST,
                "/api/get-info",
                serde_json::json!({ "url": "bad-url" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let parsed = json_body(response).await;
        assert!(!parsed["detail"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn router_streams_download_with_exposed_disposition() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path());
        let response = build_router(state.clone())
            .oneshot(json_request(
                Method::POST,
                "/api/download",
                serde_json::json!({ "url": "https://video.example/a", "format_id": "18" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response
                .headers()
                .get(header::CONTENT_DISPOSITION)
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("attachment; filename=")
        );
        assert!(
            response
                .headers()
                .contains_key(header::ACCESS_CONTROL_EXPOSE_HEADERS)
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"movie-bytes");

        state.service.cleanup().shutdown().await;
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn router_answers_cors_preflight() {
        let dir = tempdir().unwrap();
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/download")
            .header(header::ORIGIN, ORIGIN)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())
            .unwrap();
        let response = build_router(test_state(dir.path()))
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn router_falls_back_to_json_404() {
        let dir = tempdir().unwrap();
        let response = build_router(test_state(dir.path()))
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["detail"], "endpoint not found");
    }
}
