use thiserror::Error;

use crate::config::ConfigError;

/// Failure talking to the shared coordination store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("stored value for {key} is malformed: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure talking to the work queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("delivery {0} is not held by this consumer")]
    UnknownDelivery(String),
}

/// Errors surfaced to callers of the orchestrator and the worker.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("no emails provided")]
    EmptySubmission,
    #[error("submission of {size} emails exceeds the limit of {limit}")]
    SubmissionTooLarge { size: usize, limit: usize },
    #[error("unknown cache type: {0}")]
    UnknownCacheType(String),
    #[error("no submission found for request {0}")]
    SubmissionNotFound(String),
    #[error("malformed unit message: {0}")]
    MalformedMessage(String),
    #[error("coordination store unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("queue unavailable: {0}")]
    Queue(#[from] QueueError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ServiceError {
    /// Infrastructure failures are transient; the caller may resubmit.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Queue(_))
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infrastructure_errors_are_retryable() {
        let store = ServiceError::Store(StoreError::Redis(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "connection refused",
        ))));
        assert!(store.is_retryable());

        let queue = ServiceError::Queue(QueueError::UnknownDelivery("abc".into()));
        assert!(queue.is_retryable());
    }

    #[test]
    fn test_input_errors_are_not_retryable() {
        assert!(!ServiceError::EmptySubmission.is_retryable());
        assert!(
            !ServiceError::SubmissionTooLarge {
                size: 10,
                limit: 5
            }
            .is_retryable()
        );
        assert!(!ServiceError::MalformedMessage("missing unitId".into()).is_retryable());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(ServiceError::EmptySubmission.to_string(), "no emails provided");
        assert_eq!(
            ServiceError::UnknownCacheType("weird".into()).to_string(),
            "unknown cache type: weird"
        );
    }
}
