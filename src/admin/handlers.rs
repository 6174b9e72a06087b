use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::broadcast::observer::serve_observer;
use crate::capture::{DocumentId, RequestRecord, ResponseRecord};
use crate::config::SaveMode;
use crate::storage::StoreError;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub save_mode: SaveMode,
    pub max_body_bytes: u64,
    pub observers: usize,
    pub observer_users: Vec<String>,
}

/// Store errors as HTTP responses.
pub struct AdminError(StoreError);

impl From<StoreError> for AdminError {
    fn from(e: StoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StoreError::NotFound(_) | StoreError::KindMismatch { .. } => StatusCode::NOT_FOUND,
            StoreError::Io(_) | StoreError::Encoding(_) => {
                tracing::error!(error = %self.0, "Admin read failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let capture = state.interceptor.capture_config();
    let hub = state.interceptor.hub();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        save_mode: capture.save_mode,
        max_body_bytes: capture.max_body_bytes,
        observers: hub.observer_count(),
        observer_users: hub.observer_users(),
    })
}

pub async fn get_request(
    State(state): State<AdminState>,
    Path(id): Path<DocumentId>,
) -> Result<Json<RequestRecord>, AdminError> {
    Ok(Json(state.interceptor.request_by_document_id(id).await?))
}

pub async fn get_response(
    State(state): State<AdminState>,
    Path(id): Path<DocumentId>,
) -> Result<Json<ResponseRecord>, AdminError> {
    Ok(Json(state.interceptor.response_by_document_id(id).await?))
}

/// Dashboard feed. Credentials are checked like proxy credentials.
pub async fn observer_ws(
    State(state): State<AdminState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let auth = state.interceptor.authenticator();
    let Some(identity) = auth.check(&headers) else {
        let challenge = format!("Basic realm=\"{}\"", auth.realm());
        return (StatusCode::UNAUTHORIZED, [(header::WWW_AUTHENTICATE, challenge)]).into_response();
    };

    let hub = state.interceptor.hub().clone();
    let user = identity.name().to_string();
    tracing::info!(user = %user, "Observer connecting");
    ws.on_upgrade(move |socket| serve_observer(socket, hub, user))
}
