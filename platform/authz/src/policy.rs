use std::fmt;

use platform_authn::IdentityContext;

use crate::error::AuthorizationErrorKind;

pub const UNAUTHENTICATED_REASON: &str = "must be authenticated";
pub const FORBIDDEN_REASON: &str = "missing required role";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyDirective {
    RequiresAuthentication,
    RequiresRole { role: String },
}

/// A policy as declared on a field, keeping the directive name it was
/// written with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachedDirective {
    pub name: String,
    pub directive: PolicyDirective,
}

impl AttachedDirective {
    pub fn new(name: impl Into<String>, directive: PolicyDirective) -> Self {
        Self {
            name: name.into(),
            directive,
        }
    }

    fn check(&self, identity: &IdentityContext) -> Option<Denial> {
        let deny = |kind, reason, role: Option<&str>| Denial {
            directive: self.name.clone(),
            kind,
            reason,
            role: role.map(str::to_owned),
        };
        match &self.directive {
            PolicyDirective::RequiresAuthentication if !identity.is_authenticated() => Some(deny(
                AuthorizationErrorKind::Unauthenticated,
                UNAUTHENTICATED_REASON,
                None,
            )),
            PolicyDirective::RequiresAuthentication => None,
            PolicyDirective::RequiresRole { role } if !identity.is_authenticated() => Some(deny(
                AuthorizationErrorKind::Unauthenticated,
                UNAUTHENTICATED_REASON,
                Some(role.as_str()),
            )),
            PolicyDirective::RequiresRole { role } if !identity.has_role(role) => Some(deny(
                AuthorizationErrorKind::Forbidden,
                FORBIDDEN_REASON,
                Some(role.as_str()),
            )),
            PolicyDirective::RequiresRole { .. } => None,
        }
    }
}

impl fmt::Display for AttachedDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.directive {
            PolicyDirective::RequiresAuthentication => write!(f, "@{}", self.name),
            PolicyDirective::RequiresRole { role } => write!(f, "@{}(role: {role:?})", self.name),
        }
    }
}

/// Why a field was denied: the first failing directive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Denial {
    pub directive: String,
    pub kind: AuthorizationErrorKind,
    pub reason: &'static str,
    pub role: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyOutcome {
    Allow,
    Deny(Denial),
}

impl PolicyOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyOutcome::Allow)
    }
}

/// Evaluate a field's directives in declaration order. Every directive must
/// allow; the first denial wins and the remaining directives are not checked.
pub fn authorize(directives: &[AttachedDirective], identity: &IdentityContext) -> PolicyOutcome {
    directives
        .iter()
        .find_map(|attached| attached.check(identity))
        .map_or(PolicyOutcome::Allow, PolicyOutcome::Deny)
}
