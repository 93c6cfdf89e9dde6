//! Platform authentication helpers.
//!
//! Resolves the [`IdentityContext`] of an inbound request. Verification itself
//! is delegated to `jsonwebtoken`; keys come either from a shared secret or a
//! remote JWKS document.

use std::collections::BTreeSet;

use async_trait::async_trait;
use http::HeaderMap;

mod jwks;
mod jwt;
#[cfg(test)]
mod test_support;

pub use jsonwebtoken::Algorithm;
pub use jwks::{JwksCache, JwksSettings};
pub use jwt::{JwtIdentityProvider, JwtSettings, KeySource, ProviderError};

/// How an [`IdentityContext`] came to be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentitySource {
    /// A credential was presented and verified.
    Verified,
    /// No credential, or a credential that failed verification.
    Anonymous,
    /// The provider could not decide because of an infrastructure fault.
    ProviderFailure,
}

/// Per-request identity. Immutable once built; never carries roles without a
/// subject.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityContext {
    subject: Option<String>,
    roles: BTreeSet<String>,
    source: IdentitySource,
}

impl IdentityContext {
    pub fn anonymous() -> Self {
        Self {
            subject: None,
            roles: BTreeSet::new(),
            source: IdentitySource::Anonymous,
        }
    }

    /// Identity produced when the provider itself failed. Behaves exactly like
    /// [`IdentityContext::anonymous`] for policy purposes.
    pub fn provider_failure() -> Self {
        Self {
            source: IdentitySource::ProviderFailure,
            ..Self::anonymous()
        }
    }

    pub fn authenticated<I, R>(subject: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self {
            subject: Some(subject.into()),
            roles: roles.into_iter().map(Into::into).collect(),
            source: IdentitySource::Verified,
        }
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn is_authenticated(&self) -> bool {
        self.subject.is_some()
    }

    pub fn source(&self) -> IdentitySource {
        self.source
    }
}

impl Default for IdentityContext {
    fn default() -> Self {
        Self::anonymous()
    }
}

/// Produces the identity of a request from its headers.
///
/// Implementations never fail: a missing or unverifiable credential yields an
/// anonymous context, and infrastructure faults yield
/// [`IdentityContext::provider_failure`].
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, headers: &HeaderMap) -> IdentityContext;
}

/// Provider used when no authentication is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnonymousProvider;

#[async_trait]
impl IdentityProvider for AnonymousProvider {
    async fn resolve(&self, _headers: &HeaderMap) -> IdentityContext {
        IdentityContext::anonymous()
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
