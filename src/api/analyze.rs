//! SSE analysis endpoint bridging the pipeline event stream

use actix_web::{post, web, HttpRequest, HttpResponse, Responder};
use actix_web::web::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::api::error::ApiError;
use crate::service::pipeline::{AnalysisPipeline, RunRequest};
use crate::service::rate_limit::RateLimiter;

const SESSION_HEADER: &str = "X-Session-Id";

#[derive(Debug, Deserialize, ToSchema)]
pub struct AnalyzeRequest {
    /// Free-text invention idea, at most 2000 characters.
    pub idea: String,
    /// Optional IPC prefix filters, e.g. ["G06", "H04"].
    #[serde(default)]
    pub ipc_filters: Vec<String>,
}

/// Run the prior-art analysis pipeline, streaming events as SSE.
///
/// Events: `progress`, `stream_token`, then exactly one of
/// `complete`/`empty`/`error`. Rate limits are enforced before the pipeline
/// starts; an exceeded window is a 429, not a pipeline run.
#[utoipa::path(
    post,
    path = "/api/v1/analyze",
    request_body = AnalyzeRequest,
    responses(
        (status = 200, description = "SSE stream of analysis events"),
        (status = 429, description = "Rate limit exceeded")
    ),
    tag = "analysis"
)]
#[post("/v1/analyze")]
pub async fn analyze(
    request: HttpRequest,
    body: web::Json<AnalyzeRequest>,
    pipeline: web::Data<Arc<AnalysisPipeline>>,
    rate_limiter: web::Data<RateLimiter>,
) -> Result<impl Responder, ApiError> {
    let ip = client_ip(&request);
    let session_id = request
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| format!("fallback_{ip}"));

    rate_limiter.check(&session_id, &ip).await?;

    tracing::info!(
        session_id = %session_id,
        idea_chars = body.idea.chars().count(),
        ipc_filters = ?body.ipc_filters,
        "Analysis request accepted"
    );

    let events = pipeline.get_ref().clone().run(RunRequest {
        idea: body.idea.clone(),
        session_id,
        ipc_filters: body.ipc_filters.clone(),
    });

    let sse = events.filter_map(|event| async move {
        match event.to_sse() {
            Ok(frame) => Some(Ok::<_, actix_web::Error>(Bytes::from(frame))),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode SSE frame");
                None
            }
        }
    });

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(sse))
}

/// Client address for per-IP limiting: first hop of X-Forwarded-For when
/// present, else the peer address.
fn client_ip(request: &HttpRequest) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    request
        .peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown_ip".to_string())
}

/// Configure analysis routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(analyze);
}
