use async_graphql::{ErrorExtensionValues, PathSegment, ServerError};
use platform_api::codes;
use thiserror::Error;

use crate::{policy::Denial, registry::FieldCoordinate};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthorizationErrorKind {
    /// No identity, but the field requires one.
    Unauthenticated,
    /// Identity present, required role absent.
    Forbidden,
}

impl AuthorizationErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            AuthorizationErrorKind::Unauthenticated => codes::UNAUTHENTICATED,
            AuthorizationErrorKind::Forbidden => codes::FORBIDDEN,
        }
    }
}

/// A denied field, ready to be attached to a partial GraphQL response.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct AuthorizationError {
    pub field_path: Vec<PathSegment>,
    pub field: FieldCoordinate,
    pub kind: AuthorizationErrorKind,
    pub directive: String,
    pub role: Option<String>,
    pub message: String,
}

impl AuthorizationError {
    pub fn new(field: FieldCoordinate, field_path: Vec<PathSegment>, denial: Denial) -> Self {
        let message = match (denial.kind, denial.role.as_deref()) {
            (AuthorizationErrorKind::Forbidden, Some(role)) => {
                format!("{} `{role}` for `{field}`", denial.reason)
            }
            _ => format!("{} to resolve `{field}`", denial.reason),
        };
        Self {
            field_path,
            field,
            kind: denial.kind,
            directive: denial.directive,
            role: denial.role,
            message,
        }
    }

    pub fn to_server_error(&self) -> ServerError {
        let mut extensions = ErrorExtensionValues::default();
        extensions.set("code", self.kind.code());
        extensions.set("directive", self.directive.as_str());
        extensions.set("field", self.field.to_string());
        if let Some(role) = &self.role {
            extensions.set("role", role.as_str());
        }
        let mut error = ServerError::new(self.message.clone(), None);
        error.path = self.field_path.clone();
        error.extensions = Some(extensions);
        error
    }
}

/// Problems found while reading policy directives from SDL. Fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("invalid schema definition: {0}")]
    Parse(String),
    #[error("unknown directive `@{directive}` on `{field}` (line {line})")]
    UnknownDirective {
        field: FieldCoordinate,
        directive: String,
        line: usize,
    },
    #[error("directive `@{directive}` on `{field}` requires argument `{argument}`")]
    MissingArgument {
        field: FieldCoordinate,
        directive: String,
        argument: &'static str,
    },
    #[error("argument `{argument}` of `@{directive}` on `{field}` must be a string")]
    InvalidArgument {
        field: FieldCoordinate,
        directive: String,
        argument: &'static str,
    },
    #[error("directive `@{directive}` is only allowed on field definitions, found on {location} (line {line})")]
    UnsupportedLocation {
        directive: String,
        location: String,
        line: usize,
    },
    #[error("policy declared on `{0}` which the executable schema does not define")]
    UnknownField(FieldCoordinate),
}
