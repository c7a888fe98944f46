use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// # Health Status Response
///
/// Operational status of the service with a timestamp.
///
/// ## Fields
/// - `status`: "UP" when the coordination store answered, "DOWN" otherwise
/// - `timestamp`: RFC 3339 timestamp of the check
/// - `dnsOnlyMode`: whether SMTP probing is currently suppressed
///
/// ## Example JSON
/// ```json
/// {
///   "status": "UP",
///   "timestamp": "2024-03-10T15:30:45.123456789Z",
///   "dnsOnlyMode": false
/// }
/// ```
#[derive(Serialize, Debug, PartialEq, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_only_mode: Option<bool>,
}

impl HealthResponse {
    pub fn up(dns_only_mode: bool) -> Self {
        Self {
            status: "UP".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            dns_only_mode: Some(dns_only_mode),
        }
    }

    pub fn down() -> Self {
        Self {
            status: "DOWN".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            dns_only_mode: None,
        }
    }
}
