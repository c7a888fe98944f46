use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}

/// Tiered unit sizing. Each entry is `(upper bound on total emails, unit size)`;
/// `None` as unit size means "one unit holds everything".
///
/// Larger submissions get larger units so per-unit queue and cache overhead
/// stays bounded, while small ones still produce a first progress update quickly.
pub const UNIT_SIZE_TIERS: &[(usize, Option<usize>)] = &[
    (20, None),
    (100, Some(30)),
    (200, Some(50)),
    (500, Some(100)),
    (1000, Some(150)),
];

/// Unit size for submissions larger than the last tier.
pub const MAX_UNIT_SIZE: usize = 200;

pub const DEFAULT_HEARTBEAT_TTL: Duration = Duration::from_secs(30);

/// Time-to-live and enable switches for the per-domain caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub key_prefix: String,
    pub mx_ttl: u64,
    pub blacklist_ttl: u64,
    pub disposable_ttl: u64,
    pub catch_all_ttl: u64,
    pub enable_mx: bool,
    pub enable_blacklist: bool,
    pub enable_disposable: bool,
    pub enable_catch_all: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            key_prefix: "email_validation:".to_string(),
            mx_ttl: 172_800,
            blacklist_ttl: 21_600,
            disposable_ttl: 604_800,
            catch_all_ttl: 86_400,
            enable_mx: true,
            enable_blacklist: true,
            enable_disposable: true,
            enable_catch_all: true,
        }
    }
}

/// SMTP probe knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    /// Tried in order; the next port is only used when connecting fails.
    pub ports: Vec<u16>,
    pub helo_domain: String,
    pub mail_from: String,
    pub connect_timeout: Duration,
    /// Deadline for each individual read/write in the dialogue.
    pub command_timeout: Duration,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            ports: vec![25, 587, 2525],
            helo_domain: "localhost".to_string(),
            mail_from: "postmaster@localhost".to_string(),
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerSettings {
    pub threshold: u64,
    /// How long breaker keys live; an open circuit closes itself after this.
    pub recovery_window_secs: u64,
    /// Administrative kill switch that keeps the breaker open.
    pub dns_only_mode: bool,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            threshold: 10,
            recovery_window_secs: 3600,
            dns_only_mode: false,
        }
    }
}

/// Service configuration, read from the environment (and `.env` when present).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub redis_url: String,
    pub host: String,
    pub port: u16,
    pub result_expiry_secs: u64,
    pub queue_name: String,
    pub dead_letter_queue: String,
    pub progress_channel: String,
    pub inline_threshold: usize,
    pub max_submission_emails: usize,
    pub chunk_size: usize,
    /// Names this consumer's processing list. Unique per running worker.
    pub worker_id: String,
    /// A worker silent for longer than this is presumed dead and its
    /// in-flight units are requeued by the others.
    pub worker_heartbeat_ttl: Duration,
    pub queue_poll_interval: Duration,
    pub dns_timeout: Duration,
    pub smtp: SmtpSettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub cache: CacheSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            result_expiry_secs: 3600,
            queue_name: "email_validation".to_string(),
            dead_letter_queue: "email_validation_dlq".to_string(),
            progress_channel: "email_validation_results".to_string(),
            inline_threshold: 5,
            max_submission_emails: 100_000,
            chunk_size: 5,
            worker_id: format!("worker-{}", Uuid::new_v4().simple()),
            worker_heartbeat_ttl: DEFAULT_HEARTBEAT_TTL,
            queue_poll_interval: Duration::from_millis(1000),
            dns_timeout: Duration::from_secs(10),
            smtp: SmtpSettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            cache: CacheSettings::default(),
        }
    }
}

impl Settings {
    /// Loads `.env` (if any) and reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup, falling back to defaults
    /// for every key the lookup does not know.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let reader = Reader { lookup: &lookup };

        let smtp = SmtpSettings {
            ports: reader.list("SMTP_PORTS", defaults.smtp.ports)?,
            helo_domain: reader.string("SMTP_HELO_DOMAIN", defaults.smtp.helo_domain),
            mail_from: reader.string("SMTP_MAIL_FROM", defaults.smtp.mail_from),
            connect_timeout: reader.secs(
                "SMTP_CONNECT_TIMEOUT_SECS",
                defaults.smtp.connect_timeout,
            )?,
            command_timeout: reader.secs("SMTP_TIMEOUT_SECS", defaults.smtp.command_timeout)?,
        };

        let circuit_breaker = CircuitBreakerSettings {
            threshold: reader.parse("CIRCUIT_BREAKER_THRESHOLD", defaults.circuit_breaker.threshold)?,
            recovery_window_secs: reader.parse(
                "CIRCUIT_BREAKER_RECOVERY_SECS",
                defaults.circuit_breaker.recovery_window_secs,
            )?,
            dns_only_mode: reader.parse("DNS_ONLY_MODE", defaults.circuit_breaker.dns_only_mode)?,
        };

        let cache = CacheSettings {
            key_prefix: reader.string("CACHE_KEY_PREFIX", defaults.cache.key_prefix),
            mx_ttl: reader.parse("CACHE_TTL_MX", defaults.cache.mx_ttl)?,
            blacklist_ttl: reader.parse("CACHE_TTL_BLACKLIST", defaults.cache.blacklist_ttl)?,
            disposable_ttl: reader.parse("CACHE_TTL_DISPOSABLE", defaults.cache.disposable_ttl)?,
            catch_all_ttl: reader.parse("CACHE_TTL_CATCH_ALL", defaults.cache.catch_all_ttl)?,
            enable_mx: reader.parse("ENABLE_MX_CACHE", defaults.cache.enable_mx)?,
            enable_blacklist: reader.parse("ENABLE_BLACKLIST_CACHE", defaults.cache.enable_blacklist)?,
            enable_disposable: reader
                .parse("ENABLE_DISPOSABLE_CACHE", defaults.cache.enable_disposable)?,
            enable_catch_all: reader.parse("ENABLE_CATCH_ALL_CACHE", defaults.cache.enable_catch_all)?,
        };

        let chunk_size: usize = reader.parse("WORKER_CHUNK_SIZE", defaults.chunk_size)?;
        if chunk_size == 0 {
            return Err(ConfigError::Invalid {
                key: "WORKER_CHUNK_SIZE".to_string(),
                value: "0".to_string(),
            });
        }

        let worker_heartbeat_ttl =
            reader.secs("WORKER_HEARTBEAT_TTL_SECS", defaults.worker_heartbeat_ttl)?;
        if worker_heartbeat_ttl.is_zero() {
            return Err(ConfigError::Invalid {
                key: "WORKER_HEARTBEAT_TTL_SECS".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(Self {
            redis_url: reader.string("REDIS_URL", defaults.redis_url),
            host: reader.string("HOST", defaults.host),
            port: reader.parse("PORT", defaults.port)?,
            result_expiry_secs: reader.parse("RESULT_EXPIRY_SECS", defaults.result_expiry_secs)?,
            queue_name: reader.string("QUEUE_NAME", defaults.queue_name),
            dead_letter_queue: reader.string("DEAD_LETTER_QUEUE", defaults.dead_letter_queue),
            progress_channel: reader.string("PROGRESS_CHANNEL", defaults.progress_channel),
            inline_threshold: reader.parse("INLINE_THRESHOLD", defaults.inline_threshold)?,
            max_submission_emails: reader
                .parse("MAX_SUBMISSION_EMAILS", defaults.max_submission_emails)?,
            chunk_size,
            worker_id: reader.string("WORKER_ID", defaults.worker_id),
            worker_heartbeat_ttl,
            queue_poll_interval: Duration::from_millis(reader.parse(
                "QUEUE_POLL_INTERVAL_MS",
                defaults.queue_poll_interval.as_millis() as u64,
            )?),
            dns_timeout: reader.secs("DNS_TIMEOUT_SECS", defaults.dns_timeout)?,
            smtp,
            circuit_breaker,
            cache,
        })
    }

    /// Number of emails per unit for a submission of `total` emails.
    pub fn unit_size_for(total: usize) -> usize {
        for (upper, size) in UNIT_SIZE_TIERS {
            if total <= *upper {
                return size.unwrap_or(total.max(1));
            }
        }
        MAX_UNIT_SIZE
    }
}

struct Reader<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Reader<'_, F> {
    fn string(&self, key: &str, default: String) -> String {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(default)
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match (self.lookup)(key) {
            Some(raw) if !raw.trim().is_empty() => {
                raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
                    key: key.to_string(),
                    value: raw,
                })
            }
            _ => Ok(default),
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(key, default.as_secs()).map(Duration::from_secs)
    }

    fn list<T: FromStr>(&self, key: &str, default: Vec<T>) -> Result<Vec<T>, ConfigError> {
        let Some(raw) = (self.lookup)(key) else {
            return Ok(default);
        };
        let parsed = raw
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<T>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value: raw.clone(),
            })?;
        if parsed.is_empty() {
            return Err(ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
            });
        }
        Ok(parsed)
    }
}

/// Convenience for tests and embedding: settings from a fixed map.
pub fn settings_from_map(values: &HashMap<&str, &str>) -> Result<Settings, ConfigError> {
    Settings::from_lookup(|key| values.get(key).map(|v| v.to_string()))
}
