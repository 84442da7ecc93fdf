//! HTTP handlers
//!
//! The gateway is intentionally thin: one conversational event endpoint
//! that feeds the dispatcher, plus a health probe.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::state::AppState;
use super::types::{ApiResponse, error_codes};

/// Inbound conversational event
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct EventRequest {
    /// Originating user
    #[schema(example = 42)]
    #[validate(range(min = 1))]
    pub user_id: i64,
    /// Raw message text, commands included
    #[schema(example = "/balance")]
    #[validate(length(min = 1, max = 4096))]
    pub text: String,
}

/// Replies to send back to the user, in order
#[derive(Debug, Serialize, ToSchema)]
pub struct EventResponse {
    pub replies: Vec<String>,
}

/// Conversational event endpoint
///
/// POST /api/v1/event
///
/// Feeds one user message through the dispatcher and returns the replies.
/// Rejections (bad input, closed dialogues) still come back as 200 with
/// the rejection text in `replies`; only malformed requests get a 400.
#[utoipa::path(
    post,
    path = "/api/v1/event",
    request_body = EventRequest,
    responses(
        (status = 200, description = "Event processed", body = EventResponse, content_type = "application/json"),
        (status = 400, description = "Malformed event")
    ),
    tag = "Ledger"
)]
pub async fn post_event(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EventRequest>,
) -> (StatusCode, Json<ApiResponse<EventResponse>>) {
    if let Err(e) = req.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(
                error_codes::INVALID_PARAMETER,
                e.to_string(),
            )),
        );
    }

    let replies = state.dispatcher.handle(req.user_id, &req.text).await;
    (
        StatusCode::OK,
        Json(ApiResponse::success(EventResponse { replies })),
    )
}

/// Health check response data
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// Server timestamp in milliseconds
    #[schema(example = 1703494800000_u64)]
    pub timestamp_ms: u64,
}

/// Health check endpoint
///
/// Pings the store but exposes no internal details in the response.
///
/// - Healthy: 200 OK + {code: 0, data: {timestamp_ms}}
/// - Unhealthy: 503 Service Unavailable + {code: 5001, msg: "unavailable"}
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse, content_type = "application/json"),
        (status = 503, description = "Service unavailable")
    ),
    tag = "System"
)]
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    // Rate limit: only ping the store once per interval
    static LAST_CHECK_MS: AtomicU64 = AtomicU64::new(0);
    const CHECK_INTERVAL_MS: u64 = 5000;

    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let last_check = LAST_CHECK_MS.load(Ordering::Relaxed);
    let healthy = if now_ms.saturating_sub(last_check) > CHECK_INTERVAL_MS {
        LAST_CHECK_MS.store(now_ms, Ordering::Relaxed);
        match state.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "store ping failed");
                false
            }
        }
    } else {
        // Within interval, assume healthy
        true
    };

    if healthy {
        (
            StatusCode::OK,
            Json(ApiResponse::success(HealthResponse {
                timestamp_ms: now_ms,
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::error(
                error_codes::SERVICE_UNAVAILABLE,
                "unavailable",
            )),
        )
    }
}
