use std::collections::HashMap;

use async_trait::async_trait;
use http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::{IdentityContext, IdentityProvider, bearer_token, jwks::JwksCache};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("malformed token: {0}")]
    MalformedToken(#[source] jsonwebtoken::errors::Error),
    #[error("algorithm {0:?} is not accepted")]
    AlgorithmNotAllowed(Algorithm),
    #[error("no signing key matches kid {0:?}")]
    UnknownKey(Option<String>),
    #[error("token rejected: {0}")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),
    #[error("failed to fetch JWKS from {uri}: {source}")]
    Jwks {
        uri: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("JWKS refresh budget exhausted with no cached keys")]
    RateLimited,
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl ProviderError {
    /// Whether the error says nothing about the credential itself.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            ProviderError::Jwks { .. } | ProviderError::RateLimited | ProviderError::Client(_)
        )
    }
}

#[derive(Clone, Debug)]
pub struct JwtSettings {
    pub issuer: Option<String>,
    pub audience: Option<String>,
    /// Claim holding the role list, e.g. `roles` or `https://example.com/roles`.
    pub roles_claim: String,
    pub algorithms: Vec<Algorithm>,
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            issuer: None,
            audience: None,
            roles_claim: "roles".into(),
            algorithms: vec![Algorithm::RS256],
        }
    }
}

pub enum KeySource {
    SharedSecret(Vec<u8>),
    Jwks(JwksCache),
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(flatten)]
    other: HashMap<String, Value>,
}

/// Bearer JWT verification backed by `jsonwebtoken`.
pub struct JwtIdentityProvider {
    settings: JwtSettings,
    keys: KeySource,
    validation: Validation,
}

impl JwtIdentityProvider {
    pub fn new(settings: JwtSettings, keys: KeySource) -> Self {
        let mut validation = Validation::new(
            settings
                .algorithms
                .first()
                .copied()
                .unwrap_or(Algorithm::RS256),
        );
        validation.algorithms = settings.algorithms.clone();
        if let Some(issuer) = settings.issuer.as_deref() {
            validation.set_issuer(&[issuer]);
        }
        match settings.audience.as_deref() {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        Self {
            settings,
            keys,
            validation,
        }
    }

    pub async fn verify(&self, token: &str) -> Result<IdentityContext, ProviderError> {
        let header = jsonwebtoken::decode_header(token).map_err(ProviderError::MalformedToken)?;
        if !self.settings.algorithms.contains(&header.alg) {
            return Err(ProviderError::AlgorithmNotAllowed(header.alg));
        }
        let key = match &self.keys {
            KeySource::SharedSecret(secret) => DecodingKey::from_secret(secret),
            KeySource::Jwks(cache) => cache
                .key_for(header.kid.as_deref())
                .await?
                .ok_or_else(|| ProviderError::UnknownKey(header.kid.clone()))?,
        };
        let data = jsonwebtoken::decode::<Claims>(token, &key, &self.validation)
            .map_err(ProviderError::InvalidToken)?;
        Ok(identity_from_claims(data.claims, &self.settings.roles_claim))
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn resolve(&self, headers: &HeaderMap) -> IdentityContext {
        let Some(token) = bearer_token(headers) else {
            return IdentityContext::anonymous();
        };
        match self.verify(token).await {
            Ok(identity) => identity,
            Err(err) if err.is_infrastructure() => {
                tracing::error!(error = %err, "identity provider failure; request treated as unauthenticated");
                IdentityContext::provider_failure()
            }
            Err(err) => {
                tracing::debug!(error = %err, "bearer token rejected");
                IdentityContext::anonymous()
            }
        }
    }
}

fn identity_from_claims(claims: Claims, roles_claim: &str) -> IdentityContext {
    let Some(subject) = claims.sub.filter(|sub| !sub.is_empty()) else {
        tracing::debug!("verified token carries no subject");
        return IdentityContext::anonymous();
    };
    let roles = match claims.other.get(roles_claim) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect(),
        Some(Value::String(role)) => vec![role.clone()],
        _ => Vec::new(),
    };
    IdentityContext::authenticated(subject, roles)
}
