//! OpenAPI document for the JSON endpoints

use actix_web::{get, web, HttpResponse, Responder};
use utoipa::OpenApi;

use crate::api::{analyze, health};
use crate::model::report::{AnalysisReport, RiskLevel, TopPatent};

#[derive(OpenApi)]
#[openapi(
    paths(
        analyze::analyze,
        health::liveness,
        health::readiness,
    ),
    components(schemas(
        analyze::AnalyzeRequest,
        AnalysisReport,
        RiskLevel,
        TopPatent,
        health::HealthStatus,
        health::ReadinessStatus,
        health::DependencyHealth,
    )),
    tags(
        (name = "analysis", description = "Prior-art analysis pipeline"),
        (name = "health", description = "Service health probes")
    ),
    info(
        title = "patent-intel",
        description = "Self-RAG prior-art search and infringement-risk analysis"
    )
)]
pub struct ApiDoc;

#[get("/openapi.json")]
pub async fn openapi_json() -> impl Responder {
    HttpResponse::Ok().json(ApiDoc::openapi())
}

/// Configure the OpenAPI route
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(openapi_json);
}
