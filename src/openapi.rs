use utoipa::OpenApi;

/// OpenAPI Specification Documentation
///
/// Generated at compile time from the `utoipa` annotations on the route
/// handlers.
///
/// # Endpoints
/// - Health Check: `GET /health`
/// - Email Validation: `POST /validate-batch`, `GET /validation-status/{id}`,
///   `GET /multi-status/{request_id}`
/// - Administration: circuit breaker state/reset, domain cache view/clear
///
/// # API Information
/// - **Title**: Email Validation Service
/// - **Version**: 0.4.0+sprint2
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health::health,
        crate::routes::validation::validate_batch,
        crate::routes::validation::validation_status,
        crate::routes::validation::multi_status,
        crate::routes::admin::circuit_breaker_status,
        crate::routes::admin::reset_circuit_breaker,
        crate::routes::admin::view_cache,
        crate::routes::admin::clear_cache,
    ),
    components(
        schemas(
            crate::models::health::HealthResponse,
            crate::models::ValidationFlags,
            crate::routes::ErrorResponse,
            crate::routes::validation::ValidateBatchRequest,
            crate::routes::validation::SubmissionResponse
        )
    ),
    tags(
        (name = "Health Check", description = "Service health monitoring endpoints"),
        (name = "Email Validation", description = "Batch submission and progress polling"),
        (name = "Administration", description = "Circuit breaker and domain cache maintenance")
    ),
    info(
        description = "Bulk email deliverability validation with queued workers, SMTP probing and a DNS-only fallback",
        title = "Email Validation Service",
        version = "0.4.0+sprint2",
    )
)]
pub struct ApiDoc;
