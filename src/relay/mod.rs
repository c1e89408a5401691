//! Local command relay
//!
//! A companion process (a watch app, a shortcut, a script) can drive
//! recognition over HTTP:
//!
//! ```text
//! POST /relay  {"command":"startRecognition"}  -> {"recognizedText":"..."}
//! POST /relay  {"command":"stopRecognition"}   -> {}
//! GET  /health                                 -> {"status":"ok","state":"idle",...}
//! ```

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::engine::{EngineHandle, EngineState};
use crate::{Error, Result};

/// Message accepted on `/relay`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum RelayCommand {
    #[serde(rename = "startRecognition")]
    StartRecognition,
    #[serde(rename = "stopRecognition")]
    StopRecognition,
}

/// Reply to `startRecognition`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionReply {
    pub recognized_text: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    state: EngineState,
}

/// Build the relay router
pub fn router(engine: EngineHandle) -> Router {
    Router::new()
        .route("/relay", post(relay))
        .route("/health", get(health))
        .with_state(engine)
        .layer(TraceLayer::new_for_http())
}

async fn health(State(engine): State<EngineHandle>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        state: engine.state(),
    })
}

/// Parsed by hand so an unknown command is a 400 with our error body
async fn relay(
    State(engine): State<EngineHandle>,
    body: Bytes,
) -> std::result::Result<Response, RelayError> {
    let command: RelayCommand = serde_json::from_slice(&body)
        .map_err(|e| RelayError::BadRequest(format!("unrecognized command: {e}")))?;

    tracing::debug!(?command, "relay command");

    match command {
        RelayCommand::StartRecognition => {
            let recognized_text = engine.recognize_once().await.map_err(RelayError::from)?;
            Ok(Json(RecognitionReply { recognized_text }).into_response())
        }
        RelayCommand::StopRecognition => {
            engine.stop().await.map_err(RelayError::from)?;
            Ok(Json(serde_json::json!({})).into_response())
        }
    }
}

/// Relay endpoint errors
#[derive(Debug)]
pub enum RelayError {
    BadRequest(String),
    Busy(String),
    Unavailable(String),
}

impl From<Error> for RelayError {
    fn from(err: Error) -> Self {
        match err {
            Error::Relay(msg) => Self::Busy(msg),
            other => Self::Unavailable(other.user_message()),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Busy(msg) => (StatusCode::SERVICE_UNAVAILABLE, "busy", msg),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg),
        };

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}

/// Relay HTTP server bound to localhost
pub struct RelayServer {
    engine: EngineHandle,
    port: u16,
}

impl RelayServer {
    #[must_use]
    pub const fn new(engine: EngineHandle, port: u16) -> Self {
        Self { engine, port }
    }

    /// Run the relay server
    ///
    /// # Errors
    ///
    /// Returns error if the server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("127.0.0.1:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Relay(format!("failed to bind relay on {addr}: {e}")))?;

        tracing::info!(port = self.port, "relay listening");

        axum::serve(listener, router(self.engine))
            .await
            .map_err(|e| Error::Relay(format!("relay server error: {e}")))?;

        Ok(())
    }

    /// Run the relay server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
