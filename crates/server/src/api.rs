//! HTTP handlers for the request-style entry points.
//!
//! Hook triggers call `POST /api/state`; viewers may poll `GET /api/state`
//! and read `GET /api/avatar` to learn which assets to load.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use agent_avatar_protocol::{
    AvatarDescriptor, SetStateRejection, SetStateRequest, StateRecord,
};

use crate::ingress::IngressError;
use crate::state::AvatarServer;

/// `GET /api/state`
pub async fn get_state(State(server): State<Arc<AvatarServer>>) -> Json<StateRecord> {
    Json(server.store().get_state())
}

/// `POST /api/state`
pub async fn post_state(
    State(server): State<Arc<AvatarServer>>,
    Json(request): Json<SetStateRequest>,
) -> Response {
    match server.ingress().propose(&request.state) {
        Ok(accepted) => Json(accepted).into_response(),
        Err(e) => {
            let message = e.to_string();
            let IngressError::InvalidState { valid_states, .. } = e;
            (
                StatusCode::BAD_REQUEST,
                Json(SetStateRejection {
                    ok: false,
                    error: "invalid_state".to_string(),
                    message,
                    valid_states,
                }),
            )
                .into_response()
        }
    }
}

/// `GET /api/avatar`
pub async fn get_avatar(State(server): State<Arc<AvatarServer>>) -> Json<AvatarDescriptor> {
    Json(server.avatar().manifest.descriptor())
}

pub async fn health_handler() -> impl IntoResponse {
    "OK"
}
