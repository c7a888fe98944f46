use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError, web};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ServiceError;

/// # Health Check Endpoint
///
/// Reports whether the service and its coordination store are reachable.
pub mod health;

/// # Validation Endpoints
///
/// Submission of email batches and polling of their progress.
pub mod validation;

/// # Administrative Endpoints
///
/// Circuit breaker inspection/reset and per-domain cache maintenance.
pub mod admin;

/// # API Route Configuration
///
/// Sets up versioned API endpoints under the `/api/v1` base path.
///
/// ## Example Endpoints
///
/// ```text
/// GET    /api/v1/health
/// POST   /api/v1/validate-batch
/// GET    /api/v1/validation-status/{id}
/// GET    /api/v1/multi-status/{requestId}
/// GET    /api/v1/circuit-breaker
/// POST   /api/v1/circuit-breaker/reset
/// GET    /api/v1/cache/view/{type}
/// DELETE /api/v1/cache/clear/{type}
/// ```
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .configure(health::configure_routes)
            .configure(validation::configure_routes)
            .configure(admin::configure_routes),
    );
}

/// Body of every non-2xx response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ServiceError {
    fn code(&self) -> &'static str {
        match self {
            Self::EmptySubmission => "EMPTY_SUBMISSION",
            Self::SubmissionTooLarge { .. } => "SUBMISSION_TOO_LARGE",
            Self::UnknownCacheType(_) => "UNKNOWN_CACHE_TYPE",
            Self::SubmissionNotFound(_) => "NOT_FOUND",
            Self::MalformedMessage(_) => "MALFORMED_MESSAGE",
            Self::Store(_) => "STORE_UNAVAILABLE",
            Self::Queue(_) => "QUEUE_UNAVAILABLE",
            Self::Config(_) => "CONFIGURATION_ERROR",
        }
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::EmptySubmission
            | Self::SubmissionTooLarge { .. }
            | Self::UnknownCacheType(_)
            | Self::MalformedMessage(_) => StatusCode::BAD_REQUEST,
            Self::SubmissionNotFound(_) => StatusCode::NOT_FOUND,
            Self::Store(_) | Self::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::cache::DomainCache;
    use crate::circuit_breaker::CircuitBreaker;
    use crate::config::Settings;
    use crate::job_queue::MemoryQueue;
    use crate::orchestrator::Orchestrator;
    use crate::store::MemoryStore;
    use crate::validation::EmailValidator;
    use crate::validation::dns::{DnsError, MockDnsLookup};
    use crate::validation::smtp::MockMailboxProber;

    pub struct TestBackend {
        pub store: Arc<MemoryStore>,
        pub queue: Arc<MemoryQueue>,
        pub orchestrator: Orchestrator,
    }

    /// An orchestrator over in-memory infrastructure whose DNS knows no
    /// domain.
    pub fn backend() -> TestBackend {
        let settings = Settings::default();
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());

        let mut dns = MockDnsLookup::new();
        dns.expect_mx_records().returning(|_| Err(DnsError::NoRecords));
        dns.expect_ip_addrs().returning(|_| Err(DnsError::NoRecords));
        let mut prober = MockMailboxProber::new();
        prober.expect_probe().never();

        let breaker = CircuitBreaker::new(store.clone(), settings.circuit_breaker.clone());
        let cache = Arc::new(DomainCache::new(store.clone(), settings.cache.clone()));
        let validator = Arc::new(EmailValidator::new(
            Arc::new(dns),
            Arc::new(prober),
            breaker.clone(),
            cache.clone(),
        ));
        let orchestrator = Orchestrator::new(
            &settings,
            store.clone(),
            queue.clone(),
            validator,
            breaker,
            cache,
        );
        TestBackend {
            store,
            queue,
            orchestrator,
        }
    }
}
