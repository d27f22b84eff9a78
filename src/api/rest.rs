//! Node API Handlers
//!
//! `POST /devices/list` and `POST /devices/format`, both behind the
//! request-signature check.

use super::signer::{self, SignableRequest, MAX_BODY_SIZE};
use crate::admin::Credential;
use crate::error::Error;
use crate::node::{InitDevicesRequest, InitDevicesResponse, ListDevicesRequest, NodeAgent};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Json, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const LIST_DEVICES_PATH: &str = "/devices/list";
pub const FORMAT_DEVICES_PATH: &str = "/devices/format";

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
}

fn error_response(status: StatusCode, error: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ApiErrorResponse {
            error: error.into(),
            message: message.into(),
        }),
    )
        .into_response()
}

// =============================================================================
// Router
// =============================================================================

/// Shared handler state
#[derive(Clone)]
struct ApiState {
    agent: Arc<NodeAgent>,
    credential: Arc<Credential>,
}

/// Node API router builder
pub struct NodeApiRouter {
    agent: Arc<NodeAgent>,
    credential: Credential,
}

impl NodeApiRouter {
    pub fn new(agent: Arc<NodeAgent>, credential: Credential) -> Self {
        Self { agent, credential }
    }

    pub fn build(self) -> Router {
        let state = ApiState {
            agent: self.agent,
            credential: Arc::new(self.credential),
        };

        Router::new()
            .route(LIST_DEVICES_PATH, post(list_devices))
            .route(FORMAT_DEVICES_PATH, post(format_devices))
            .layer(middleware::from_fn_with_state(state.clone(), authenticate))
            .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
            .with_state(state)
    }
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect()
}

/// Verify the request signature before it reaches a handler
async fn authenticate(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_SIZE).await {
        Ok(body) => body,
        Err(e) => {
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "RequestTooLarge", e.to_string())
        }
    };

    let headers = header_map(&parts.headers);
    let signable = SignableRequest {
        method: parts.method.as_str(),
        path: parts.uri.path(),
        query: parts.uri.query().unwrap_or_default(),
        headers: &headers,
        body: &body,
    };
    if let Err(e) = signer::verify(&signable, &state.credential, chrono::Utc::now()) {
        warn!("Rejected {} {}: {}", parts.method, parts.uri.path(), e);
        return error_response(StatusCode::UNAUTHORIZED, "Unauthorized", e.to_string());
    }

    next.run(Request::from_parts(parts, Body::from(body))).await
}

// =============================================================================
// Handlers
// =============================================================================

async fn list_devices(
    State(state): State<ApiState>,
    Json(request): Json<ListDevicesRequest>,
) -> Response {
    debug!("Listing devices {:?}", request.devices);
    match state.agent.list_devices(&request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => {
            error!("Unable to list devices: {}", e);
            internal_error(&e)
        }
    }
}

async fn format_devices(
    State(state): State<ApiState>,
    Json(request): Json<InitDevicesRequest>,
) -> Response {
    if request.devices.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "InvalidRequest", "no devices to format");
    }
    info!("Formatting {} device(s)", request.devices.len());
    let results = state.agent.init_devices(&request.devices).await;
    (
        StatusCode::OK,
        Json(InitDevicesResponse {
            node_id: state.agent.node_id().to_string(),
            results,
        }),
    )
        .into_response()
}

fn internal_error(err: &Error) -> Response {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", err.to_string())
}
