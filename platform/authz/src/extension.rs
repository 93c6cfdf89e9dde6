use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_graphql::{
    PathSegment, QueryPathNode, QueryPathSegment, Response, ServerError, ServerResult, Value,
    extensions::{
        Extension, ExtensionContext, ExtensionFactory, NextExecute, NextResolve, ResolveInfo,
    },
};
use platform_authn::{IdentityContext, IdentitySource};

use crate::{
    error::AuthorizationError,
    policy::{PolicyOutcome, authorize},
    registry::{FieldCoordinate, PolicyRegistry},
};

/// Enforces field directives before resolvers run.
///
/// A denied nullable field resolves to `null` and its error is appended to the
/// response, leaving siblings untouched. A denied non-null field fails so the
/// executor nulls the nearest nullable parent.
pub struct AuthorizationExtension {
    policies: Arc<PolicyRegistry>,
}

impl AuthorizationExtension {
    pub fn new(policies: Arc<PolicyRegistry>) -> Self {
        Self { policies }
    }
}

impl ExtensionFactory for AuthorizationExtension {
    fn create(&self) -> Arc<dyn Extension> {
        Arc::new(RequestAuthorization {
            policies: self.policies.clone(),
            denials: Mutex::default(),
        })
    }
}

struct RequestAuthorization {
    policies: Arc<PolicyRegistry>,
    denials: Mutex<Vec<ServerError>>,
}

impl RequestAuthorization {
    fn denials(&self) -> MutexGuard<'_, Vec<ServerError>> {
        self.denials.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl Extension for RequestAuthorization {
    async fn execute(
        &self,
        ctx: &ExtensionContext<'_>,
        operation_name: Option<&str>,
        next: NextExecute<'_>,
    ) -> Response {
        let mut response = next.run(ctx, operation_name).await;
        let denials = std::mem::take(&mut *self.denials());
        response.errors.extend(denials);
        response
    }

    async fn resolve(
        &self,
        ctx: &ExtensionContext<'_>,
        info: ResolveInfo<'_>,
        next: NextResolve<'_>,
    ) -> ServerResult<Option<Value>> {
        if info.is_for_introspection {
            return next.run(ctx, info).await;
        }
        let directives = self
            .policies
            .directives_for_field(info.parent_type, info.name);
        if directives.is_empty() {
            return next.run(ctx, info).await;
        }

        let anonymous = IdentityContext::anonymous();
        let identity = ctx.data_opt::<IdentityContext>().unwrap_or(&anonymous);
        let denial = match authorize(directives, identity) {
            PolicyOutcome::Allow => return next.run(ctx, info).await,
            PolicyOutcome::Deny(denial) => denial,
        };

        let field = FieldCoordinate::new(info.parent_type, info.name);
        if identity.source() == IdentitySource::ProviderFailure {
            tracing::warn!(
                %field,
                directive = %denial.directive,
                provider_failure = true,
                "field denied while the identity provider was failing"
            );
        } else {
            tracing::debug!(%field, directive = %denial.directive, kind = ?denial.kind, "field denied");
        }

        let error = AuthorizationError::new(field, response_path(info.path_node), denial)
            .to_server_error();
        if info.return_type.ends_with('!') {
            return Err(error);
        }
        self.denials().push(error);
        Ok(None)
    }
}

fn response_path(node: &QueryPathNode<'_>) -> Vec<PathSegment> {
    let mut path = Vec::new();
    let mut current = Some(node);
    while let Some(node) = current {
        path.push(match node.segment {
            QueryPathSegment::Index(index) => PathSegment::Index(index),
            QueryPathSegment::Name(name) => PathSegment::Field(name.to_string()),
        });
        current = node.parent;
    }
    path.reverse();
    path
}
