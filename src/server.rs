use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::{self, Next},
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
    routing::{get, post},
};
use futures::stream;
use serde_json::Value as JsonValue;
use subtle::ConstantTimeEq;
use tracing::Instrument;

use crate::rpc;
use crate::tools::{Gateway, ToolRegistry};

/// HTTP shell around the rpc layer: one JSON-RPC POST endpoint, a health
/// route, optional bearer auth, and the unary-or-stream negotiation.

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub registry: Arc<ToolRegistry>,
}

pub fn router(state: AppState, auth_token: Option<String>) -> Router {
    let rpc_routes = Router::new().route("/", post(rpc_endpoint)).with_state(state);

    let rpc_routes = match auth_token {
        Some(token) => {
            let token = Arc::new(token);
            rpc_routes.layer(middleware::from_fn(move |req, next| {
                bearer_auth_middleware(req, next, token.clone())
            }))
        }
        None => rpc_routes,
    };

    Router::new().route("/healthz", get(healthz)).merge(rpc_routes)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Constant-time token equality, so a mismatch reveals nothing about how
/// much of the token was right.
fn token_matches(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Verifies the single configured opaque token; the credential store proper
/// lives outside this process.
async fn bearer_auth_middleware(
    req: Request,
    next: Next,
    expected_token: Arc<String>,
) -> Response {
    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if token_matches(token, &expected_token) => next.run(req).await,
        presented => {
            tracing::warn!(
                bearer_present = presented.is_some(),
                path = %req.uri().path(),
                "rejected unauthenticated request"
            );
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|h| h.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"))
}

async fn rpc_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match rpc::parse_request(&body) {
        Ok(request) => request,
        Err(e) => return Json(rpc::error_body(&JsonValue::Null, &e)).into_response(),
    };

    let id = request.id;
    let method = request.method.unwrap_or_default();
    let span = tracing::info_span!("rpc", method = %method);

    let outcome = rpc::handle(
        state.gateway.as_ref(),
        state.registry.as_ref(),
        &method,
        request.params,
    )
    .instrument(span)
    .await;

    match outcome {
        Ok(outcome) => {
            // The client may ask for a stream; past the unary limits it
            // gets one regardless. Errors are always unary.
            if rpc::must_stream(&outcome.payload) || accepts_event_stream(&headers) {
                stream_response(&outcome, &id)
            } else {
                Json(rpc::result_body(&id, &outcome.result)).into_response()
            }
        }
        Err(e) => {
            tracing::warn!("{method} failed: {e}");
            Json(rpc::error_body(&id, &e)).into_response()
        }
    }
}

/// Frames as server-sent events, one JSON object per frame, closed by the
/// completion frame and the `[DONE]` sentinel. All frames are prepared up
/// front; a client that disconnects mid-stream just stops receiving them,
/// with no upstream work left to interrupt.
fn stream_response(outcome: &rpc::MethodOutcome, id: &JsonValue) -> Response {
    let mut events: Vec<Result<Event, Infallible>> = rpc::frames(outcome, id)
        .into_iter()
        .map(|frame| Ok(Event::default().data(frame.to_string())))
        .collect();
    events.push(Ok(Event::default().data(rpc::DONE_SENTINEL)));

    Sse::new(stream::iter(events)).into_response()
}
