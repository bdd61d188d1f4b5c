//! HTTP shell for the safety gateway.
//!
//! Thin layer: parse, consult the traffic limiter, run the gateway, map the
//! verdict onto the wire types. Traffic denials answer 429 with a reason
//! code.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::budget::UseCase;
use crate::classifier::ClassifierKind;
use crate::gateway::{GatewayStatus, RequestContext, ResponseContext, SafetyGateway};
use crate::policy::PolicyAction;
use crate::traffic::{IdentityStats, TrafficLimiter};
use crate::wire::{CheckReply, CheckRequestBody, CheckResponseBody, ErrorReply};

/// Shared state behind the router.
pub struct GuardServer {
    gateway: SafetyGateway,
    limiter: TrafficLimiter,
    started: Instant,
}

impl GuardServer {
    /// Bundles a gateway and limiter for serving.
    pub fn new(gateway: SafetyGateway, limiter: TrafficLimiter) -> Self {
        Self {
            gateway,
            limiter,
            started: Instant::now(),
        }
    }

    /// Builds the router over this server.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/v1/check/request", post(check_request_handler))
            .route("/v1/check/response", post(check_response_handler))
            .route("/v1/status", get(status_handler))
            .route("/v1/traffic/{identity}", get(traffic_stats_handler))
            .route("/v1/traffic/{identity}/block", post(block_handler))
            .route("/v1/traffic/{identity}/unblock", post(unblock_handler))
            .route("/v1/policies/{kind}", post(update_policy_handler))
            .with_state(self)
    }

    /// Binds and serves until the process exits.
    pub async fn serve(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "guard server listening");
        let router = Arc::new(self).router();
        axum::serve(listener, router.into_make_service()).await?;
        Ok(())
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

fn local_hour() -> u8 {
    // UTC hour; deployments gating on business hours run with UTC windows.
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    ((secs % 86_400) / 3_600) as u8
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn check_request_handler(
    State(state): State<Arc<GuardServer>>,
    Json(body): Json<CheckRequestBody>,
) -> Response {
    let Some(use_case) = UseCase::parse(&body.use_case) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorReply {
                error: "use_case".to_string(),
                message: format!("unknown use case: {}", body.use_case),
            }),
        )
            .into_response();
    };

    let request_id = uuid::Uuid::new_v4();
    let identity = body.api_key.clone().unwrap_or_else(|| body.user.clone());
    if let Err(reason) = state.limiter.check_at(
        &identity,
        body.context_length,
        body.upload_size_mb,
        body.geo.as_deref(),
        state.now_ms(),
        local_hour(),
    ) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorReply {
                error: reason.code().to_string(),
                message: reason.to_string(),
            }),
        )
            .into_response();
    }

    let ctx = RequestContext {
        tenant: body.user.clone(),
        use_case,
        metadata: body.metadata.clone(),
    };
    let verdict = state
        .gateway
        .check_request(&body.prompt, &ctx, &CancellationToken::new())
        .await;
    info!(
        %request_id,
        user = %body.user,
        allowed = verdict.allowed,
        budget_exceeded = verdict.budget_exceeded,
        "request checked"
    );
    Json(CheckReply::from(verdict)).into_response()
}

async fn check_response_handler(
    State(state): State<Arc<GuardServer>>,
    Json(body): Json<CheckResponseBody>,
) -> Response {
    let use_case = body.use_case.as_deref().and_then(UseCase::parse);
    let ctx = ResponseContext {
        tenant: body
            .metadata
            .get("tenant")
            .cloned()
            .unwrap_or_default(),
        original_prompt: body.original_prompt.clone(),
        use_case,
        metadata: body.metadata.clone(),
    };
    let verdict = state
        .gateway
        .check_response(&body.response, &ctx, &CancellationToken::new())
        .await;
    Json(CheckReply::from(verdict)).into_response()
}

async fn status_handler(State(state): State<Arc<GuardServer>>) -> Json<GatewayStatus> {
    Json(state.gateway.status())
}

async fn traffic_stats_handler(
    State(state): State<Arc<GuardServer>>,
    Path(identity): Path<String>,
) -> Json<IdentityStats> {
    Json(state.limiter.stats(&identity, state.now_ms()))
}

async fn block_handler(
    State(state): State<Arc<GuardServer>>,
    Path(identity): Path<String>,
) -> StatusCode {
    state.limiter.block(&identity);
    StatusCode::NO_CONTENT
}

async fn unblock_handler(
    State(state): State<Arc<GuardServer>>,
    Path(identity): Path<String>,
) -> StatusCode {
    state.limiter.unblock(&identity);
    StatusCode::NO_CONTENT
}

#[derive(Debug, serde::Deserialize)]
struct PolicyUpdateBody {
    enabled: Option<bool>,
    action: Option<PolicyAction>,
    threshold: Option<f64>,
}

async fn update_policy_handler(
    State(state): State<Arc<GuardServer>>,
    Path(kind): Path<String>,
    Json(body): Json<PolicyUpdateBody>,
) -> Response {
    let Some(kind) = ClassifierKind::parse(&kind) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorReply {
                error: "kind".to_string(),
                message: format!("unknown classifier kind: {kind}"),
            }),
        )
            .into_response();
    };

    match state
        .gateway
        .update_policy(kind, body.enabled, body.action, body.threshold)
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => (
            StatusCode::NOT_FOUND,
            Json(ErrorReply {
                error: "policy".to_string(),
                message: err.to_string(),
            }),
        )
            .into_response(),
    }
}
