use std::sync::Arc;

use actix_web::{App, HttpServer, web::Data};
use email_validation_service::cache::DomainCache;
use email_validation_service::circuit_breaker::CircuitBreaker;
use email_validation_service::config::Settings;
use email_validation_service::job_queue::RedisUnitQueue;
use email_validation_service::openapi::ApiDoc;
use email_validation_service::orchestrator::Orchestrator;
use email_validation_service::store::RedisStore;
use email_validation_service::telemetry;
use email_validation_service::validation::{EmailValidator, SmtpProber, TrustDnsLookup};
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Email Validation Service Entry Point
///
/// Configures and launches the Actix-web HTTP server with:
/// - REST endpoints under `/api/v1` (configured in routes)
/// - Swagger UI for API documentation
/// - Environment configuration via `.env` file
///
/// Queued units are processed by the separate `validation-worker` binary;
/// this process only validates submissions small enough to answer inline.
///
/// # Endpoints
/// - Swagger UI: `/swagger-ui/`
/// - OpenAPI spec: `/api-docs/openapi.json`
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    telemetry::init();
    let settings = Settings::from_env().map_err(std::io::Error::other)?;

    let store = Arc::new(
        RedisStore::connect(&settings.redis_url)
            .await
            .map_err(std::io::Error::other)?,
    );
    let queue = Arc::new(
        RedisUnitQueue::connect(&settings)
            .await
            .map_err(std::io::Error::other)?,
    );

    let breaker = CircuitBreaker::new(store.clone(), settings.circuit_breaker.clone());
    let cache = Arc::new(DomainCache::new(store.clone(), settings.cache.clone()));
    let validator = Arc::new(EmailValidator::new(
        Arc::new(TrustDnsLookup::new(settings.dns_timeout)),
        Arc::new(SmtpProber::new(settings.smtp.clone())),
        breaker.clone(),
        cache.clone(),
    ));
    let orchestrator = Data::new(Orchestrator::new(
        &settings, store, queue, validator, breaker, cache,
    ));

    info!(host = %settings.host, port = settings.port, "starting HTTP server");
    HttpServer::new(move || {
        let openapi = ApiDoc::openapi();

        App::new()
            .app_data(orchestrator.clone())
            .configure(email_validation_service::routes::configure)
            .service(SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", openapi))
    })
    .bind((settings.host.as_str(), settings.port))?
    .run()
    .await
}
