//! Field-level authorization driven by schema directives.
//!
//! Directives such as `@isAuthenticated` and `@hasRole(role: "Admin")` are read
//! from SDL type definitions once at startup into a [`PolicyRegistry`]. The
//! [`AuthorizationExtension`] then evaluates them against the request's
//! [`IdentityContext`](platform_authn::IdentityContext) before each field
//! resolver runs.

mod error;
mod extension;
mod policy;
mod registry;

pub use error::{AuthorizationError, AuthorizationErrorKind, SchemaError};
pub use extension::AuthorizationExtension;
pub use policy::{
    AttachedDirective, Denial, FORBIDDEN_REASON, PolicyDirective, PolicyOutcome,
    UNAUTHENTICATED_REASON, authorize,
};
pub use registry::{DirectiveRegistry, FieldCoordinate, PolicyKind, PolicyRegistry};

/// Directive name for [`PolicyDirective::RequiresAuthentication`].
pub const IS_AUTHENTICATED: &str = "isAuthenticated";
/// Directive name for [`PolicyDirective::RequiresRole`].
pub const HAS_ROLE: &str = "hasRole";
