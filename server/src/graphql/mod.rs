mod todos;

use std::sync::Arc;

use anyhow::Context as _;
use async_graphql::{Context, EmptySubscription, ErrorExtensions, Object, Result, Schema};
use platform_api::{ApiError, internal_error};
use platform_authn::IdentityContext;
use platform_authz::{AuthorizationExtension, DirectiveRegistry, PolicyRegistry, SchemaError};
use tracing::{info, instrument};

pub use todos::{Todo, TodoStore};

/// Type definitions carrying the field policies.
pub const TYPE_DEFS: &str = include_str!("../../schema.graphql");

pub type SchemaType = Schema<QueryRoot, MutationRoot, EmptySubscription>;

pub fn load_policies() -> Result<PolicyRegistry, SchemaError> {
    PolicyRegistry::from_sdl(&DirectiveRegistry::with_defaults(), TYPE_DEFS)
}

pub fn build_schema(store: Arc<TodoStore>) -> anyhow::Result<SchemaType> {
    let policies = Arc::new(load_policies().context("invalid policy directives")?);
    let schema = Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(store)
        .extension(AuthorizationExtension::new(policies.clone()))
        .finish();
    policies
        .verify_against(&schema.sdl())
        .context("policy directives do not match the executable schema")?;
    info!(guarded_fields = policies.len(), "graphql schema built");
    Ok(schema)
}

fn current_subject<'a>(ctx: &Context<'a>) -> Result<&'a str> {
    ctx.data_opt::<IdentityContext>()
        .and_then(IdentityContext::subject)
        .ok_or_else(|| ApiError::Unauthenticated.extend())
}

fn store<'a>(ctx: &Context<'a>) -> Result<&'a TodoStore> {
    ctx.data::<Arc<TodoStore>>()
        .map(Arc::as_ref)
        .map_err(|err| internal_error(anyhow::anyhow!(err.message)))
}

#[derive(Default)]
pub struct QueryRoot;

#[Object(name = "Query")]
impl QueryRoot {
    #[instrument(name = "graphql.hello", skip_all)]
    async fn hello(&self) -> &'static str {
        "Hello world!"
    }

    #[instrument(name = "graphql.hello_user", skip_all)]
    async fn hello_user(&self, ctx: &Context<'_>) -> Result<Option<String>> {
        let subject = current_subject(ctx)?;
        Ok(Some(format!("Hello {subject}")))
    }

    /// Todos owned by the caller.
    #[instrument(name = "graphql.my_todos", skip_all)]
    async fn my_todos(&self, ctx: &Context<'_>) -> Result<Option<Vec<Todo>>> {
        let subject = current_subject(ctx)?;
        Ok(Some(store(ctx)?.owned_by(subject).await))
    }

    #[instrument(name = "graphql.all_todos", skip_all)]
    async fn all_todos(&self, ctx: &Context<'_>) -> Result<Vec<Todo>> {
        Ok(store(ctx)?.all().await)
    }
}

#[derive(Default)]
pub struct MutationRoot;

#[Object(name = "Mutation")]
impl MutationRoot {
    #[instrument(name = "graphql.add_todo", skip_all)]
    async fn add_todo(&self, ctx: &Context<'_>, title: String) -> Result<Option<Todo>> {
        let subject = current_subject(ctx)?;
        let todo = store(ctx)?
            .add(subject, &title)
            .await
            .map_err(|err| err.extend())?;
        info!(todo = %todo.id, owner = subject, "todo added");
        Ok(Some(todo))
    }
}
