use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::AppState;
use crate::error::OrchestratorError;
use crate::manager::OrchestratorStatus;
use crate::protocol::{MessageBody, ProtocolMessage};

#[derive(Debug, Deserialize)]
pub struct NegotiateRequest {
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NegotiateResponse {
    pub version: String,
    pub supported: Vec<String>,
}

#[derive(Serialize)]
pub struct LivenessStatus {
    pub version: &'static str,
    pub status: &'static str,
}

/// HTTP status for an error code carried in a reply.
pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        "INVALID_REQUEST" | "UNSUPPORTED_PROTOCOL_VERSION" => StatusCode::BAD_REQUEST,
        "MODEL_NOT_FOUND" => StatusCode::NOT_FOUND,
        "QUEUE_FULL" | "RESOURCE_EXHAUSTED" | "SHUTTING_DOWN" | "CIRCUIT_OPEN" => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        "TIMEOUT" => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

fn reply_status(message: &ProtocolMessage) -> StatusCode {
    match message.body() {
        MessageBody::Response(result) => match &result.error {
            Some(info) if !result.success => status_for_code(&info.code),
            _ => StatusCode::OK,
        },
        MessageBody::Error(info) => status_for_code(&info.code),
        _ => StatusCode::OK,
    }
}

fn error_reply(err: &OrchestratorError) -> Response {
    (status_for_code(err.code()), Json(ProtocolMessage::error(err))).into_response()
}

/// `POST /v1/synthesize`: protocol envelope in, envelope out.
pub async fn synthesize(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let message = match ProtocolMessage::from_value(body) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected malformed envelope");
            return error_reply(&e);
        }
    };
    let reply = state.orchestrator.handle_message(message).await;
    (reply_status(&reply), Json(reply)).into_response()
}

/// `POST /v1/negotiate`
pub async fn negotiate(
    State(state): State<AppState>,
    Json(req): Json<NegotiateRequest>,
) -> Response {
    match state.orchestrator.negotiate(&req.version) {
        Ok(version) => Json(NegotiateResponse {
            version: version.to_string(),
            supported: crate::protocol::SUPPORTED_VERSIONS
                .iter()
                .map(|v| v.to_string())
                .collect(),
        })
        .into_response(),
        Err(e) => error_reply(&e),
    }
}

/// `GET /health`: unauthenticated liveness.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    if state.orchestrator.is_accepting() {
        (
            StatusCode::OK,
            Json(LivenessStatus {
                version: env!("CARGO_PKG_VERSION"),
                status: "operational",
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(LivenessStatus {
                version: env!("CARGO_PKG_VERSION"),
                status: "shutting_down",
            }),
        )
    }
}

/// `GET /admin/status`
pub async fn get_status(State(state): State<AppState>) -> Json<OrchestratorStatus> {
    Json(state.orchestrator.get_status())
}
