//! Radio relay server listener
//!
//! Serves the WebSocket gateway and the recording file endpoints with axum,
//! and tears every relay and recording down on shutdown.

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::gateway::{GatewayConfig, GatewaySession, Outbound};
use crate::recording::{FileStats, RecordingManager, RecordingStatus};
use crate::relay::RelayManager;
use crate::server::config::ServerConfig;

/// Radio relay server
pub struct RadioServer {
    config: ServerConfig,
    relay: Arc<RelayManager>,
    recordings: RecordingManager,
    next_session_id: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

#[derive(Clone)]
struct AppState {
    relay: Arc<RelayManager>,
    recordings: RecordingManager,
    gateway: GatewayConfig,
    next_session_id: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl RadioServer {
    /// Create a server pulling upstreams over HTTP
    pub fn new(config: ServerConfig) -> Result<Self> {
        let relay = RelayManager::new(config.relay.clone())?;
        Ok(Self::with_relay(config, relay))
    }

    /// Create a server around an existing relay manager
    pub fn with_relay(config: ServerConfig, relay: RelayManager) -> Self {
        let recordings = RecordingManager::new(config.recording.clone());

        Self {
            config,
            relay: Arc::new(relay),
            recordings,
            next_session_id: Arc::new(AtomicU64::new(1)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Get a reference to the relay manager
    pub fn relay(&self) -> &Arc<RelayManager> {
        &self.relay
    }

    /// Get a reference to the recording manager
    pub fn recordings(&self) -> &RecordingManager {
        &self.recordings
    }

    /// Build the HTTP router
    pub fn router(&self) -> Router {
        let state = AppState {
            relay: Arc::clone(&self.relay),
            recordings: self.recordings.clone(),
            gateway: self.config.gateway.clone(),
            next_session_id: Arc::clone(&self.next_session_id),
            shutdown: self.shutdown.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/recordings/active", get(active_recordings))
            .route(
                "/recordings/{filename}",
                get(download_recording).delete(delete_recording),
            )
            .route("/recordings/{filename}/stats", get(recording_stats))
            .with_state(state)
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, "Radio relay listening");

        let token = self.shutdown.clone();
        let server = axum::serve(listener, self.router())
            .with_graceful_shutdown(token.clone().cancelled_owned())
            .into_future();

        let result = tokio::select! {
            result = server => result.map_err(Error::from),
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
        };

        // Open sockets watch this token and close themselves
        token.cancel();

        let summaries = self.recordings.stop_all().await;
        self.relay.stop_all().await;

        tracing::info!(recordings = summaries.len(), "Server stopped");
        result
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one client connection until it closes or the server shuts down
async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = state.next_session_id.fetch_add(1, Ordering::Relaxed);
    let (mut session, mut outbound) = GatewaySession::new(
        session_id,
        Arc::clone(&state.relay),
        state.recordings.clone(),
        state.gateway.clone(),
    );
    let (mut sender, mut receiver) = socket.split();

    tracing::info!(session_id = session_id, "Client connected");

    let writer = tokio::spawn(async move {
        while let Some(item) = outbound.recv().await {
            let message = match item {
                Outbound::Audio(bytes) => Message::Binary(bytes),
                Outbound::Event(event) => match event.to_json() {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        tracing::warn!(session_id = session_id, error = %e, "Event encoding failed");
                        continue;
                    }
                },
            };

            if sender.send(message).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    loop {
        let message = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            message = receiver.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => session.handle_text(text.as_str()).await,
            Some(Ok(Message::Binary(_))) => {
                tracing::debug!(session_id = session_id, "Ignoring binary frame from client");
            }
            Some(Ok(Message::Close(_))) | None => break,
            // Ping/pong is answered by axum
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::debug!(session_id = session_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    session.close().await;
    writer.abort();

    tracing::info!(session_id = session_id, "Client disconnected");
}

async fn active_recordings(State(state): State<AppState>) -> Json<Vec<RecordingStatus>> {
    Json(state.recordings.status().await)
}

async fn download_recording(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> std::result::Result<Response, ApiError> {
    let (file, len) = state.recordings.open_file(&filename).await?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type_for(&filename))
        .header(header::CONTENT_LENGTH, len)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| ApiError(Error::InvalidFilename(format!("{}: {}", filename, e))))?)
}

async fn recording_stats(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> std::result::Result<Json<FileStats>, ApiError> {
    Ok(Json(state.recordings.file_stats(&filename).await?))
}

async fn delete_recording(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> std::result::Result<StatusCode, ApiError> {
    state.recordings.delete_file(&filename).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Crate error rendered as an HTTP response
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }

        let body = serde_json::json!({
            "error": self.0.code(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::FileNotFound(_) => StatusCode::NOT_FOUND,
        Error::RecordingInProgress(_) | Error::RecordingAlreadyActive(_) => StatusCode::CONFLICT,
        Error::InvalidFilename(_) | Error::InvalidCommand(_) | Error::Json(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::UpstreamUnreachable { .. } => StatusCode::BAD_GATEWAY,
        Error::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Io(_) | Error::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn content_type_for(filename: &str) -> &'static str {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("aac") => "audio/aac",
        Some("m4a") => "audio/mp4",
        Some("ogg") => "audio/ogg",
        Some("opus") => "audio/opus",
        Some("flac") => "audio/flac",
        Some("wav") => "audio/wav",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::recording::RecordingOptions;
    use crate::relay::upstream::mock::MockUpstream;
    use crate::relay::{RelayConfig, SessionKey};

    fn server(dir: &TempDir, upstream: MockUpstream) -> RadioServer {
        let config = ServerConfig::default().recordings_dir(dir.path());
        let relay = RelayManager::with_upstream(RelayConfig::default(), Arc::new(upstream));
        RadioServer::with_relay(config, relay)
    }

    async fn send(router: Router, method: &str, uri: &str) -> Response {
        router
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_download_recording() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("show_1.mp3"), b"ID3data").unwrap();
        let server = server(&dir, MockUpstream::new());

        let response = send(server.router(), "GET", "/recordings/show_1.mp3").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "audio/mpeg"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"ID3data");
    }

    #[tokio::test]
    async fn test_download_streams_large_file() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(dir.path().join("long_1.ogg"), &data).unwrap();
        let server = server(&dir, MockUpstream::new());

        let response = send(server.router(), "GET", "/recordings/long_1.ogg").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_LENGTH).unwrap(),
            "300000"
        );
        assert!(response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap()
            .contains("long_1.ogg"));
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn test_missing_and_invalid_files() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir, MockUpstream::new());

        let response = send(server.router(), "GET", "/recordings/nope.mp3").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"], "FILE_NOT_FOUND");

        let response = send(server.router(), "GET", "/recordings/.hidden").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stats_and_delete() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("show_1.ogg"), b"OggS1234").unwrap();
        let server = server(&dir, MockUpstream::new());

        let response = send(server.router(), "GET", "/recordings/show_1.ogg/stats").await;
        assert_eq!(response.status(), StatusCode::OK);
        let stats = json_body(response).await;
        assert_eq!(stats["filename"], "show_1.ogg");
        assert_eq!(stats["size"], 8);

        let response = send(server.router(), "DELETE", "/recordings/show_1.ogg").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!dir.path().join("show_1.ogg").exists());

        let response = send(server.router(), "DELETE", "/recordings/show_1.ogg").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_active_recordings_and_conflict() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir, MockUpstream::new().endless("http://s1", &[]));

        let source = server
            .relay()
            .attach(&SessionKey::recording("r1"), "http://s1")
            .await
            .unwrap();
        let filename = server
            .recordings()
            .start("r1", source, &RecordingOptions::default())
            .await
            .unwrap();

        let response = send(server.router(), "GET", "/recordings/active").await;
        assert_eq!(response.status(), StatusCode::OK);
        let active = json_body(response).await;
        assert_eq!(active[0]["recordingId"], "r1");
        assert_eq!(active[0]["isActive"], true);

        let uri = format!("/recordings/{}", filename);
        let response = send(server.router(), "DELETE", &uri).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(response).await["error"], "RECORDING_IN_PROGRESS");
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir, MockUpstream::new().endless("http://s1", &[]));

        let source = server
            .relay()
            .attach(&SessionKey::recording("r1"), "http://s1")
            .await
            .unwrap();
        server
            .recordings()
            .start("r1", source, &RecordingOptions::default())
            .await
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        server.serve(listener, async {}).await.unwrap();

        assert!(!server.recordings().is_active("r1").await);
        assert_eq!(server.relay().session_count().await, 0);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&Error::upstream("http://x", "refused")),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&Error::StorageUnavailable("disk".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(content_type_for("a_1.FLAC"), "audio/flac");
        assert_eq!(content_type_for("a_1"), "application/octet-stream");
    }
}
