//! Per-domain caches for the expensive lookups (MX, DNSBL, disposable,
//! catch-all). Every entry is `{prefix}{type}:{domain}` with a type-specific TTL.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::CacheSettings;
use crate::error::{ServiceError, StoreError};
use crate::models::BlacklistInfo;
use crate::store::{CoordinationStore, get_json, set_json};
use crate::validation::dns::MailHosts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    Mx,
    Blacklist,
    Disposable,
    CatchAll,
}

impl CacheKind {
    pub const ALL: [CacheKind; 4] = [Self::Mx, Self::Blacklist, Self::Disposable, Self::CatchAll];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mx => "mx",
            Self::Blacklist => "blacklist",
            Self::Disposable => "disposable",
            Self::CatchAll => "catch_all",
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheKind {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ServiceError::UnknownCacheType(s.to_string()))
    }
}

/// Target of an administrative clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    Kind(CacheKind),
    All,
}

impl FromStr for CacheScope {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            Ok(Self::All)
        } else {
            s.parse().map(Self::Kind)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainCacheEntry<T> {
    pub domain: String,
    pub result: T,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheView {
    pub cache_type: CacheKind,
    pub count: usize,
    pub entries: Vec<serde_json::Value>,
}

pub struct DomainCache {
    store: Arc<dyn CoordinationStore>,
    settings: CacheSettings,
}

impl DomainCache {
    pub fn new(store: Arc<dyn CoordinationStore>, settings: CacheSettings) -> Self {
        Self { store, settings }
    }

    fn key(&self, kind: CacheKind, domain: &str) -> String {
        format!("{}{}:{}", self.settings.key_prefix, kind, domain.to_lowercase())
    }

    fn pattern(&self, kind: CacheKind) -> String {
        format!("{}{}:*", self.settings.key_prefix, kind)
    }

    fn enabled(&self, kind: CacheKind) -> bool {
        match kind {
            CacheKind::Mx => self.settings.enable_mx,
            CacheKind::Blacklist => self.settings.enable_blacklist,
            CacheKind::Disposable => self.settings.enable_disposable,
            CacheKind::CatchAll => self.settings.enable_catch_all,
        }
    }

    fn ttl(&self, kind: CacheKind) -> u64 {
        match kind {
            CacheKind::Mx => self.settings.mx_ttl,
            CacheKind::Blacklist => self.settings.blacklist_ttl,
            CacheKind::Disposable => self.settings.disposable_ttl,
            CacheKind::CatchAll => self.settings.catch_all_ttl,
        }
    }

    /// Cached result, or `None` on a miss. Store trouble counts as a miss.
    pub async fn get<T: DeserializeOwned>(&self, kind: CacheKind, domain: &str) -> Option<T> {
        if !self.enabled(kind) {
            return None;
        }
        let key = self.key(kind, domain);
        match get_json::<DomainCacheEntry<T>>(self.store.as_ref(), &key).await {
            Ok(entry) => entry.map(|entry| entry.result),
            Err(err) => {
                warn!(%kind, domain, error = %err, "domain cache read failed");
                None
            }
        }
    }

    /// Best-effort write; failures are logged and otherwise ignored.
    pub async fn put<T: Serialize>(&self, kind: CacheKind, domain: &str, result: &T) {
        if !self.enabled(kind) {
            return;
        }
        let entry = DomainCacheEntry {
            domain: domain.to_lowercase(),
            result,
            cached_at: Utc::now(),
        };
        let key = self.key(kind, domain);
        if let Err(err) = set_json(self.store.as_ref(), &key, &entry, self.ttl(kind)).await {
            warn!(%kind, domain, error = %err, "domain cache write failed");
        }
    }

    pub async fn mail_hosts(&self, domain: &str) -> Option<MailHosts> {
        self.get(CacheKind::Mx, domain).await
    }

    pub async fn blacklist(&self, domain: &str) -> Option<BlacklistInfo> {
        self.get(CacheKind::Blacklist, domain).await
    }

    pub async fn disposable(&self, domain: &str) -> Option<bool> {
        self.get(CacheKind::Disposable, domain).await
    }

    pub async fn catch_all(&self, domain: &str) -> Option<bool> {
        self.get(CacheKind::CatchAll, domain).await
    }

    /// Every live entry of one cache type, for inspection.
    pub async fn view(&self, kind: CacheKind) -> Result<CacheView, ServiceError> {
        let mut keys = self.store.keys(&self.pattern(kind)).await?;
        keys.sort();

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(raw) = self.store.get(&key).await? {
                let value = serde_json::from_str(&raw)
                    .map_err(|source| StoreError::Malformed { key, source })?;
                entries.push(value);
            }
        }

        Ok(CacheView {
            cache_type: kind,
            count: entries.len(),
            entries,
        })
    }

    /// Deletes one cache type, or all of them. Returns how many keys went away.
    pub async fn clear(&self, scope: CacheScope) -> Result<u64, ServiceError> {
        let kinds: Vec<CacheKind> = match scope {
            CacheScope::Kind(kind) => vec![kind],
            CacheScope::All => CacheKind::ALL.to_vec(),
        };

        let mut removed = 0;
        for kind in kinds {
            let keys = self.store.keys(&self.pattern(kind)).await?;
            removed += self.store.delete(&keys).await?;
        }
        info!(?scope, removed, "domain cache cleared");
        Ok(removed)
    }
}
