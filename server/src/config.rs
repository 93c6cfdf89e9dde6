use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use platform_authn::{
    Algorithm, AnonymousProvider, IdentityProvider, JwksCache, JwksSettings, JwtIdentityProvider,
    JwtSettings, KeySource,
};
use url::Url;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub cors_allowed_origins: Vec<String>,
    pub auth: AuthSettings,
}

/// How bearer tokens are verified.
#[derive(Clone, Debug)]
pub enum AuthSettings {
    /// Every request is anonymous.
    Disabled,
    SharedSecret { secret: Vec<u8>, jwt: JwtSettings },
    Jwks { jwks: JwksSettings, jwt: JwtSettings },
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let cors_allowed_origins = var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        let jwt = JwtSettings {
            issuer: var("AUTH_ISSUER"),
            audience: var("AUTH_AUDIENCE"),
            roles_claim: var("AUTH_ROLES_CLAIM").unwrap_or_else(|| "roles".into()),
            ..JwtSettings::default()
        };

        let auth = if let Some(encoded) = var("AUTH_SHARED_SECRET_BASE64") {
            let secret = STANDARD
                .decode(&encoded)
                .context("invalid AUTH_SHARED_SECRET_BASE64")?;
            if secret.len() < 32 {
                return Err(anyhow!(
                    "AUTH_SHARED_SECRET_BASE64 must decode to at least 32 bytes"
                ));
            }
            AuthSettings::SharedSecret {
                secret,
                jwt: JwtSettings {
                    algorithms: vec![Algorithm::HS256],
                    ..jwt
                },
            }
        } else if let Some(issuer) = jwt.issuer.clone() {
            let mut jwks = match var("AUTH_JWKS_URI") {
                Some(uri) => JwksSettings {
                    uri: Url::parse(&uri).context("invalid AUTH_JWKS_URI")?,
                    ..JwksSettings::for_issuer(&issuer).context("invalid AUTH_ISSUER")?
                },
                None => JwksSettings::for_issuer(&issuer).context("invalid AUTH_ISSUER")?,
            };
            if let Some(secs) = parse_var(&var, "AUTH_JWKS_CACHE_SECS")? {
                jwks.cache_ttl = Duration::from_secs(secs);
            }
            if let Some(limit) = parse_var(&var, "AUTH_JWKS_REQUESTS_PER_MINUTE")? {
                jwks.requests_per_minute = limit;
            }
            if let Some(secs) = parse_var(&var, "AUTH_JWKS_TIMEOUT_SECS")? {
                jwks.timeout = Duration::from_secs(secs);
            }
            AuthSettings::Jwks { jwks, jwt }
        } else {
            AuthSettings::Disabled
        };

        Ok(Self {
            cors_allowed_origins,
            auth,
        })
    }
}

fn parse_var<T>(var: impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(key)
        .map(|raw| raw.parse::<T>().with_context(|| format!("invalid {key} `{raw}`")))
        .transpose()
}

impl AuthSettings {
    pub fn into_provider(self) -> Result<Arc<dyn IdentityProvider>> {
        Ok(match self {
            AuthSettings::Disabled => {
                tracing::warn!(
                    "neither AUTH_ISSUER nor AUTH_SHARED_SECRET_BASE64 is set; all requests are anonymous"
                );
                Arc::new(AnonymousProvider)
            }
            AuthSettings::SharedSecret { secret, jwt } => {
                Arc::new(JwtIdentityProvider::new(jwt, KeySource::SharedSecret(secret)))
            }
            AuthSettings::Jwks { jwks, jwt } => {
                tracing::info!(jwks_uri = %jwks.uri, "verifying bearer tokens against JWKS");
                let cache = JwksCache::new(jwks).context("failed to build JWKS client")?;
                Arc::new(JwtIdentityProvider::new(jwt, KeySource::Jwks(cache)))
            }
        })
    }
}
