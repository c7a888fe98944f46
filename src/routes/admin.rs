use actix_web::{HttpResponse, delete, get, post, web};
use serde_json::json;

use crate::error::ServiceError;
use crate::orchestrator::Orchestrator;

/// Consecutive/total timeout counters, fallbacks, threshold and whether the
/// circuit is open.
#[utoipa::path(
    get,
    path = "/api/v1/circuit-breaker",
    responses(
        (status = 200, description = "Current circuit breaker state"),
        (status = 503, description = "Store unavailable", body = crate::routes::ErrorResponse)
    ),
    tag = "Administration"
)]
#[get("/circuit-breaker")]
pub async fn circuit_breaker_status(
    orchestrator: web::Data<Orchestrator>,
) -> Result<HttpResponse, ServiceError> {
    let state = orchestrator.circuit_breaker_status().await?;
    Ok(HttpResponse::Ok().json(state))
}

/// Closes the circuit and zeroes the consecutive counter. Historical totals
/// are kept.
#[utoipa::path(
    post,
    path = "/api/v1/circuit-breaker/reset",
    responses(
        (status = 200, description = "State after the reset"),
        (status = 503, description = "Store unavailable", body = crate::routes::ErrorResponse)
    ),
    tag = "Administration"
)]
#[post("/circuit-breaker/reset")]
pub async fn reset_circuit_breaker(
    orchestrator: web::Data<Orchestrator>,
) -> Result<HttpResponse, ServiceError> {
    let state = orchestrator.reset_circuit_breaker().await?;
    Ok(HttpResponse::Ok().json(state))
}

#[utoipa::path(
    get,
    path = "/api/v1/cache/view/{cache_type}",
    params(
        ("cache_type" = String, Path, description = "One of mx, blacklist, disposable, catch_all")
    ),
    responses(
        (status = 200, description = "Cached entries of that type"),
        (status = 400, description = "Unknown cache type", body = crate::routes::ErrorResponse),
        (status = 503, description = "Store unavailable", body = crate::routes::ErrorResponse)
    ),
    tag = "Administration"
)]
#[get("/cache/view/{cache_type}")]
pub async fn view_cache(
    path: web::Path<String>,
    orchestrator: web::Data<Orchestrator>,
) -> Result<HttpResponse, ServiceError> {
    let view = orchestrator.view_cache(&path).await?;
    Ok(HttpResponse::Ok().json(view))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cache/clear/{cache_type}",
    params(
        ("cache_type" = String, Path, description = "A cache type, or `all`")
    ),
    responses(
        (status = 200, description = "Number of entries removed"),
        (status = 400, description = "Unknown cache type", body = crate::routes::ErrorResponse),
        (status = 503, description = "Store unavailable", body = crate::routes::ErrorResponse)
    ),
    tag = "Administration"
)]
#[delete("/cache/clear/{cache_type}")]
pub async fn clear_cache(
    path: web::Path<String>,
    orchestrator: web::Data<Orchestrator>,
) -> Result<HttpResponse, ServiceError> {
    let cache_type = path.into_inner();
    let cleared = orchestrator.clear_cache(&cache_type).await?;
    Ok(HttpResponse::Ok().json(json!({
        "cacheType": cache_type,
        "cleared": cleared
    })))
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(circuit_breaker_status)
        .service(reset_circuit_breaker)
        .service(view_cache)
        .service(clear_cache);
}
