use actix_web::{HttpResponse, Responder, get, web};
use tracing::warn;

use crate::models::HealthResponse;
use crate::orchestrator::Orchestrator;

/// # Health Check Endpoint
///
/// Returns the current health status of the service along with a timestamp.
/// The coordination store is touched through the circuit breaker state, so a
/// dead Redis shows up here.
///
/// ## Response
///
/// - **200 OK**: Service is healthy
/// - **503 Service Unavailable**: The coordination store did not answer
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Coordination store unreachable", body = HealthResponse)
    ),
    tag = "Health Check"
)]
#[get("/health")]
pub async fn health(orchestrator: web::Data<Orchestrator>) -> impl Responder {
    match orchestrator.circuit_breaker_status().await {
        Ok(state) => HttpResponse::Ok().json(HealthResponse::up(state.dns_only_mode)),
        Err(err) => {
            warn!(error = %err, "health check could not reach the coordination store");
            HttpResponse::ServiceUnavailable().json(HealthResponse::down())
        }
    }
}

/// # Route Configuration
///
/// - `GET /health`: Health check endpoint
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health);
}
