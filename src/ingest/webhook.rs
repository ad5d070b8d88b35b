//! HTTP ingress for provider webhook deliveries.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use eyre::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use super::normalizer::EventNormalizer;
use crate::chain::{ChainStateTracker, TrackerHealth};
use crate::events::BotEvent;
use crate::position::PositionBook;

pub const WEBHOOK_PATH: &str = "/webhooks/helius";

/// Shared ingress state
#[derive(Clone)]
pub struct IngressState {
    pub normalizer: Arc<EventNormalizer>,
    pub event_tx: mpsc::UnboundedSender<BotEvent>,
    /// Expected `Authorization` header value, when configured
    pub auth_token: Option<String>,
    pub tracker: Arc<ChainStateTracker>,
    pub book: Arc<PositionBook>,
}

pub fn create_router(state: IngressState) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(webhook_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Bind the listener and serve the ingress router in the background.
pub async fn start_server(state: IngressState, port: u16) -> Result<tokio::task::JoinHandle<()>> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    info!("🌐 Webhook server listening on {} ({})", addr, WEBHOOK_PATH);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Webhook server error: {}", e);
        }
    });

    Ok(handle)
}

/// Acknowledge quickly: normalization is synchronous and cheap, everything
/// downstream runs off the event channel.
async fn webhook_handler(
    State(state): State<IngressState>,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    if let Some(expected) = state.auth_token.as_deref() {
        let presented = headers.get(AUTHORIZATION).map(|v| v.as_bytes());
        if !presented.is_some_and(|p| token_matches(p, expected)) {
            warn!("🚫 Rejected webhook delivery with missing or invalid auth header");
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    }

    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!("Unparseable webhook body: {}", rejection.body_text());
            return rejection.into_response();
        }
    };

    let events = state.normalizer.normalize(&payload);
    debug!("Webhook delivery produced {} events", events.len());

    for event in events {
        if state.event_tx.send(BotEvent::Tracked(event)).is_err() {
            error!("Event processor is gone, dropping webhook events");
            break;
        }
    }

    (StatusCode::OK, "OK").into_response()
}

fn token_matches(presented: &[u8], expected: &str) -> bool {
    presented.ct_eq(expected.as_bytes()).into()
}

async fn health_handler(State(state): State<IngressState>) -> Json<Value> {
    let snapshot = state.tracker.snapshot();
    let status = match state.tracker.health() {
        TrackerHealth::Fresh => "healthy",
        TrackerHealth::Stale => "degraded",
    };
    Json(json!({
        "status": status,
        "timestamp": chrono::Utc::now().timestamp(),
        "service": "launchpad-sniper",
        "chain": {
            "health": state.tracker.health(),
            "slot": snapshot.as_ref().map(|s| s.slot),
            "blockhash": snapshot.as_ref().map(|s| s.blockhash.to_string()),
            "consecutive_failures": state.tracker.consecutive_failures(),
        },
        "positions": {
            "tracked": state.book.len(),
            "active": state.book.active_count(),
        }
    }))
}
