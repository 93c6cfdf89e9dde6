use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use jsonwebtoken::{
    DecodingKey,
    jwk::{Jwk, JwkSet},
};
use tokio::sync::{Mutex, RwLock};
use url::Url;

use crate::jwt::ProviderError;

const BUDGET_WINDOW: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct JwksSettings {
    pub uri: Url,
    pub cache_ttl: Duration,
    pub requests_per_minute: u32,
    pub timeout: Duration,
}

impl JwksSettings {
    /// Settings for the conventional `<issuer>.well-known/jwks.json` location.
    pub fn for_issuer(issuer: &str) -> Result<Self, url::ParseError> {
        let base = if issuer.ends_with('/') {
            issuer.to_string()
        } else {
            format!("{issuer}/")
        };
        Ok(Self {
            uri: Url::parse(&base)?.join(".well-known/jwks.json")?,
            cache_ttl: Duration::from_secs(600),
            requests_per_minute: 5,
            timeout: Duration::from_secs(5),
        })
    }
}

struct CachedKeys {
    keys: Arc<JwkSet>,
    fetched_at: Instant,
}

/// Remote JWKS document with TTL caching and a bounded refetch rate.
///
/// Refetches happen when the cache expires or a token names an unknown `kid`.
/// A failed refresh falls back to the previously cached keys when there are any.
pub struct JwksCache {
    settings: JwksSettings,
    client: reqwest::Client,
    cached: RwLock<Option<CachedKeys>>,
    budget: Mutex<FetchBudget>,
}

impl JwksCache {
    pub fn new(settings: JwksSettings) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(ProviderError::Client)?;
        let budget = FetchBudget::new(settings.requests_per_minute);
        Ok(Self {
            settings,
            client,
            cached: RwLock::new(None),
            budget: Mutex::new(budget),
        })
    }

    pub fn uri(&self) -> &Url {
        &self.settings.uri
    }

    /// Find the decoding key for `kid`. `Ok(None)` means the key set is
    /// available but holds no matching key.
    pub async fn key_for(&self, kid: Option<&str>) -> Result<Option<DecodingKey>, ProviderError> {
        let mut stale = None;
        {
            let cached = self.cached.read().await;
            if let Some(entry) = cached.as_ref() {
                if let Some(key) = select_key(&entry.keys, kid) {
                    if entry.fetched_at.elapsed() < self.settings.cache_ttl {
                        return Ok(Some(key));
                    }
                }
                stale = Some(entry.keys.clone());
            }
        }

        // Serialises refreshes; a concurrent caller may already have fetched.
        let mut budget = self.budget.lock().await;
        if let Some(entry) = self.cached.read().await.as_ref() {
            if entry.fetched_at.elapsed() < self.settings.cache_ttl
                && stale.as_ref().is_none_or(|old| !Arc::ptr_eq(old, &entry.keys))
            {
                return Ok(select_key(&entry.keys, kid));
            }
        }

        if !budget.try_acquire(Instant::now()) {
            tracing::debug!(uri = %self.settings.uri, "JWKS refresh budget exhausted");
            return match stale {
                Some(keys) => Ok(select_key(&keys, kid)),
                None => Err(ProviderError::RateLimited),
            };
        }

        match self.fetch().await {
            Ok(keys) => {
                let keys = Arc::new(keys);
                let key = select_key(&keys, kid);
                *self.cached.write().await = Some(CachedKeys {
                    keys,
                    fetched_at: Instant::now(),
                });
                Ok(key)
            }
            Err(err) => match stale {
                Some(keys) => {
                    tracing::warn!(error = %err, "JWKS refresh failed; serving cached keys");
                    Ok(select_key(&keys, kid))
                }
                None => Err(err),
            },
        }
    }

    async fn fetch(&self) -> Result<JwkSet, ProviderError> {
        tracing::debug!(uri = %self.settings.uri, "loading JWKS from origin");
        let jwks_error = |source| ProviderError::Jwks {
            uri: self.settings.uri.to_string(),
            source,
        };
        self.client
            .get(self.settings.uri.clone())
            .send()
            .await
            .map_err(jwks_error)?
            .error_for_status()
            .map_err(jwks_error)?
            .json::<JwkSet>()
            .await
            .map_err(jwks_error)
    }
}

fn select_key(keys: &JwkSet, kid: Option<&str>) -> Option<DecodingKey> {
    let jwk: &Jwk = match kid {
        Some(kid) => keys.find(kid)?,
        None if keys.keys.len() == 1 => keys.keys.first()?,
        None => return None,
    };
    DecodingKey::from_jwk(jwk)
        .inspect_err(|err| tracing::warn!(error = %err, "unusable JWK in key set"))
        .ok()
}

/// Sliding one-minute window of allowed origin fetches.
#[derive(Debug)]
pub(crate) struct FetchBudget {
    limit: usize,
    recent: VecDeque<Instant>,
}

impl FetchBudget {
    pub(crate) fn new(requests_per_minute: u32) -> Self {
        Self {
            limit: requests_per_minute.max(1) as usize,
            recent: VecDeque::new(),
        }
    }

    pub(crate) fn try_acquire(&mut self, now: Instant) -> bool {
        while let Some(oldest) = self.recent.front() {
            if now.duration_since(*oldest) >= BUDGET_WINDOW {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        if self.recent.len() >= self.limit {
            return false;
        }
        self.recent.push_back(now);
        true
    }
}
