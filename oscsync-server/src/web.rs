use axum::{
    body::Bytes,
    debug_handler,
    extract::State,
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_graceful_shutdown::SubsystemHandle;

use oscsync_core::{logical_time, parse_preview, ReplayEngine, TickStatus};
use oscsync_server::{
    capture::{CaptureEngine, CaptureError, CaptureRequest},
    eventlog::load_all,
    network::{parse_target, UdpSender},
};

const RECORD_START_URI: &str = "/api/v1/record/start";
const RECORD_STOP_URI: &str = "/api/v1/record/stop";
const RECORD_STATUS_URI: &str = "/api/v1/record/status";
const PLAY_LOAD_URI: &str = "/api/v1/play/load";
const PLAY_TARGET_URI: &str = "/api/v1/play/target";
const PLAY_RESET_URI: &str = "/api/v1/play/reset";
const PLAY_TICK_URI: &str = "/api/v1/play/tick";
const PREVIEW_URI: &str = "/api/v1/preview";

#[derive(Error, Debug)]
pub enum WebError {
    #[error("Socket operation failed")]
    Io(#[from] io::Error),
}

type SharedReplay = Arc<Mutex<ReplayEngine<UdpSender>>>;

#[derive(Clone)]
pub struct Web {
    port: u16,
    /// Used when a start request has no outDir
    default_out_dir: PathBuf,
    capture: Arc<CaptureEngine>,
    replay: SharedReplay,
}

impl Web {
    pub fn new(port: u16, default_out_dir: PathBuf) -> Result<Self, WebError> {
        Ok(Web {
            port,
            default_out_dir,
            capture: Arc::new(CaptureEngine::default()),
            replay: Arc::new(Mutex::new(ReplayEngine::new(UdpSender::new()?))),
        })
    }

    fn replay(&self) -> MutexGuard<'_, ReplayEngine<UdpSender>> {
        self.replay.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn router(self) -> Router {
        Router::new()
            .route(RECORD_START_URI, post(record_start_handler))
            .route(RECORD_STOP_URI, post(record_stop_handler))
            .route(RECORD_STATUS_URI, get(record_status_handler))
            .route(PLAY_LOAD_URI, post(play_load_handler))
            .route(PLAY_TARGET_URI, post(play_target_handler))
            .route(PLAY_RESET_URI, post(play_reset_handler))
            .route(PLAY_TICK_URI, post(play_tick_handler))
            .route(PREVIEW_URI, post(preview_handler))
            .layer(middleware::from_fn(no_cache_middleware))
            .with_state(self)
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), WebError> {
        let port = self.port;
        let listener =
            TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port))
                .await
                .map_err(WebError::Io)?;

        let capture = self.capture.clone();
        let app = self.router();

        info!("Starting HTTP web server on port {}", port);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { subsys.on_shutdown_requested().await })
            .await
            .map_err(WebError::Io)?;

        if capture.is_running() {
            if let Err(e) = capture.stop().await {
                warn!("Stopping capture on shutdown failed: {}", e);
            }
        }
        Ok(())
    }
}

/// Middleware to add no-cache headers to API responses
async fn no_cache_middleware(request: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    response
}

fn capture_error_response(e: CaptureError) -> Response {
    let status = match e {
        CaptureError::AlreadyRunning | CaptureError::NotRunning => StatusCode::CONFLICT,
        CaptureError::Bind { .. } | CaptureError::Io(_) | CaptureError::Metadata(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, e.to_string()).into_response()
}

// ============================================================================
// Capture Endpoints
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartCaptureRequest {
    #[serde(default)]
    out_dir: Option<PathBuf>,
    udp_listen_port: u16,
    #[serde(default)]
    remote_control_url: Option<String>,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
}

/// POST /api/v1/record/start - Start capturing into a new session
#[debug_handler]
async fn record_start_handler(
    State(state): State<Web>,
    Json(request): Json<StartCaptureRequest>,
) -> Response {
    debug!("POST record start on port {}", request.udp_listen_port);

    let output_dir = request
        .out_dir
        .unwrap_or_else(|| state.default_out_dir.clone());
    let capture_request = CaptureRequest {
        remote_control_url: request.remote_control_url,
        metadata: request.metadata,
        ..CaptureRequest::new(output_dir, request.udp_listen_port)
    };

    match state.capture.start(capture_request).await {
        Ok(session) => Json(json!({ "ok": true, "session": session })).into_response(),
        Err(e) => capture_error_response(e),
    }
}

/// POST /api/v1/record/stop - Stop the running capture
#[debug_handler]
async fn record_stop_handler(State(state): State<Web>) -> Response {
    debug!("POST record stop");

    match state.capture.stop().await {
        Ok(status) => Json(json!({ "ok": true, "packetCount": status.packet_count })).into_response(),
        Err(e) => capture_error_response(e),
    }
}

/// GET /api/v1/record/status - Current capture status
#[debug_handler]
async fn record_status_handler(State(state): State<Web>) -> Response {
    Json(state.capture.status()).into_response()
}

// ============================================================================
// Replay Endpoints
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadRequest {
    udp_log_path: PathBuf,
}

/// POST /api/v1/play/load - Load a session log
#[debug_handler]
async fn play_load_handler(State(state): State<Web>, Json(request): Json<LoadRequest>) -> Response {
    debug!("POST play load {}", request.udp_log_path.display());

    match load_all(&request.udp_log_path) {
        Ok(events) => {
            let count = state.replay().load(events);
            Json(json!({ "ok": true, "count": count })).into_response()
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => (
            StatusCode::NOT_FOUND,
            format!("Log not found: {}", request.udp_log_path.display()),
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
struct TargetRequest {
    ip: String,
    port: u16,
}

/// POST /api/v1/play/target - Set the replay destination
#[debug_handler]
async fn play_target_handler(
    State(state): State<Web>,
    Json(request): Json<TargetRequest>,
) -> Response {
    match parse_target(&request.ip, request.port) {
        Ok(target) => {
            state.replay().set_target(target);
            debug!("Replay target set to {}", target);
            Json(json!({ "ok": true })).into_response()
        }
        Err(_) => (
            StatusCode::BAD_REQUEST,
            format!("Invalid IPv4 address: {}", request.ip),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResetRequest {
    t_sec: f64,
}

/// POST /api/v1/play/reset - Seek to a time
#[debug_handler]
async fn play_reset_handler(
    State(state): State<Web>,
    Json(request): Json<ResetRequest>,
) -> Response {
    let index = state.replay().reset_to_time(request.t_sec);
    debug!("Replay reset to {:.3}s -> index {}", request.t_sec, index);
    Json(json!({ "ok": true, "index": index })).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickRequest {
    video_time_sec: f64,
    #[serde(default)]
    offset_ms: f64,
}

#[derive(Serialize)]
struct TickResponse {
    ok: bool,
    #[serde(flatten)]
    status: TickStatus,
}

/// POST /api/v1/play/tick - Send everything due at the given video time
#[debug_handler]
async fn play_tick_handler(State(state): State<Web>, Json(request): Json<TickRequest>) -> Response {
    let now = logical_time(request.video_time_sec, request.offset_ms);
    let status = state.replay().tick(now);

    match &status.last_error {
        Some(e) if e.is_would_block() => {
            debug!("Send buffer full, dropped {} datagram(s)", status.send_errors)
        }
        Some(e) => warn!("{} replay send(s) failed: {}", status.send_errors, e),
        None => {}
    }
    Json(TickResponse { ok: true, status }).into_response()
}

/// POST /api/v1/preview - Decode a raw datagram
#[debug_handler]
async fn preview_handler(body: Bytes) -> Response {
    Json(parse_preview(&body)).into_response()
}
