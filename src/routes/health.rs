use actix_web::HttpResponse;
use chrono::Utc;
use serde::Serialize;

#[derive(Serialize)]
struct HealthStatus {
    status: &'static str,
    version: &'static str,
    timestamp: String,
}

/// GET /health
pub async fn health() -> HttpResponse {
    tracing::debug!("Health check endpoint called");
    HttpResponse::Ok().json(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
    })
}
