use std::sync::Arc;

use email_validation_service::cache::DomainCache;
use email_validation_service::circuit_breaker::CircuitBreaker;
use email_validation_service::config::Settings;
use email_validation_service::job_queue::RedisUnitQueue;
use email_validation_service::store::RedisStore;
use email_validation_service::telemetry;
use email_validation_service::validation::{EmailValidator, SmtpProber, TrustDnsLookup};
use email_validation_service::worker::ValidationWorker;
use tracing::{error, info};

/// Queue consumer. Run as many of these as the SMTP budget allows; each one
/// takes a single unit at a time and shares breaker and cache state with the
/// others through Redis.
#[tokio::main]
async fn main() {
    telemetry::init();

    if let Err(err) = run().await {
        error!(error = %err, "worker exited");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;

    let store = Arc::new(RedisStore::connect(&settings.redis_url).await?);
    let queue = Arc::new(RedisUnitQueue::connect(&settings).await?);

    let breaker = CircuitBreaker::new(store.clone(), settings.circuit_breaker.clone());
    let cache = Arc::new(DomainCache::new(store.clone(), settings.cache.clone()));
    let validator = Arc::new(EmailValidator::new(
        Arc::new(TrustDnsLookup::new(settings.dns_timeout)),
        Arc::new(SmtpProber::new(settings.smtp.clone())),
        breaker.clone(),
        cache,
    ));
    let worker = ValidationWorker::new(&settings, store, queue, validator, breaker);

    info!(
        worker_id = %settings.worker_id,
        queue = %settings.queue_name,
        chunk_size = settings.chunk_size,
        "validation worker started"
    );

    tokio::select! {
        _ = worker.run() => {}
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("shutdown requested; unacknowledged work is recovered on next start");
        }
    }
    Ok(())
}
