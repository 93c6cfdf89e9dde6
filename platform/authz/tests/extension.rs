use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_graphql::{
    Context, EmptyMutation, EmptySubscription, Interface, Object, Request, Response, Schema,
    SimpleObject,
};
use platform_authn::IdentityContext;
use platform_authz::{AuthorizationExtension, DirectiveRegistry, PolicyRegistry};
use serde_json::{Value, json};

const TYPE_DEFS: &str = r#"
    directive @isAuthenticated on FIELD_DEFINITION
    directive @hasRole(role: String!) on FIELD_DEFINITION

    type Query {
      public: String!
      secret: String @isAuthenticated
      admin: String @hasRole(role: "Admin")
      required: String! @isAuthenticated
      vault: Vault!
      node: Node
    }

    interface Node {
      id: String!
      secret: String @isAuthenticated
    }

    type Agent implements Node {
      id: String!
      secret: String
    }

    type Vault {
      code: Int @hasRole(role: "Admin")
      label: String!
    }
"#;

#[derive(Default)]
struct Calls {
    public: AtomicUsize,
    secret: AtomicUsize,
    admin: AtomicUsize,
    required: AtomicUsize,
    code: AtomicUsize,
}

fn calls<'a>(ctx: &Context<'a>) -> &'a Calls {
    ctx.data_unchecked::<Arc<Calls>>()
}

struct Query;

#[Object]
impl Query {
    async fn public(&self, ctx: &Context<'_>) -> String {
        calls(ctx).public.fetch_add(1, Ordering::SeqCst);
        "hello".into()
    }

    async fn secret(&self, ctx: &Context<'_>) -> Option<String> {
        calls(ctx).secret.fetch_add(1, Ordering::SeqCst);
        Some("s3cr3t".into())
    }

    async fn admin(&self, ctx: &Context<'_>) -> Option<String> {
        calls(ctx).admin.fetch_add(1, Ordering::SeqCst);
        Some("top secret".into())
    }

    async fn required(&self, ctx: &Context<'_>) -> String {
        calls(ctx).required.fetch_add(1, Ordering::SeqCst);
        "required".into()
    }

    async fn vault(&self) -> Vault {
        Vault
    }

    async fn node(&self) -> Option<Node> {
        Some(Node::Agent(Agent {
            id: "007".into(),
            secret: Some("licence to kill".into()),
        }))
    }
}

#[derive(SimpleObject)]
struct Agent {
    id: String,
    secret: Option<String>,
}

#[derive(Interface)]
#[graphql(
    field(name = "id", ty = "String"),
    field(name = "secret", ty = "&Option<String>")
)]
enum Node {
    Agent(Agent),
}

struct Vault;

#[Object]
impl Vault {
    async fn code(&self, ctx: &Context<'_>) -> Option<i32> {
        calls(ctx).code.fetch_add(1, Ordering::SeqCst);
        Some(42)
    }

    async fn label(&self) -> String {
        "front".into()
    }
}

type TestSchema = Schema<Query, EmptyMutation, EmptySubscription>;

fn build() -> (TestSchema, Arc<Calls>) {
    let policies = Arc::new(
        PolicyRegistry::from_sdl(&DirectiveRegistry::with_defaults(), TYPE_DEFS).unwrap(),
    );
    let calls = Arc::new(Calls::default());
    let schema = Schema::build(Query, EmptyMutation, EmptySubscription)
        .data(calls.clone())
        .extension(AuthorizationExtension::new(policies.clone()))
        .finish();
    policies.verify_against(&schema.sdl()).unwrap();
    (schema, calls)
}

async fn run(schema: &TestSchema, query: &str, identity: Option<IdentityContext>) -> Response {
    let mut request = Request::new(query);
    if let Some(identity) = identity {
        request = request.data(identity);
    }
    schema.execute(request).await
}

fn errors(response: &Response) -> Value {
    serde_json::to_value(&response.errors).unwrap()
}

#[tokio::test]
async fn admin_reaches_role_guarded_field() {
    let (schema, calls) = build();
    let identity = IdentityContext::authenticated("u1", ["Admin"]);
    let response = run(&schema, "{ admin }", Some(identity)).await;

    assert!(response.errors.is_empty());
    assert_eq!(
        response.data.into_json().unwrap(),
        json!({"admin": "top secret"})
    );
    assert_eq!(calls.admin.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn anonymous_denial_keeps_siblings() {
    let (schema, calls) = build();
    let response = run(
        &schema,
        "{ public secret }",
        Some(IdentityContext::anonymous()),
    )
    .await;

    assert_eq!(
        response.data.clone().into_json().unwrap(),
        json!({"public": "hello", "secret": null})
    );
    let errors = errors(&response);
    assert_eq!(errors.as_array().unwrap().len(), 1);
    assert_eq!(errors[0]["path"], json!(["secret"]));
    assert_eq!(errors[0]["extensions"]["code"], json!("UNAUTHENTICATED"));
    assert_eq!(errors[0]["extensions"]["directive"], json!("isAuthenticated"));
    assert_eq!(
        errors[0]["message"],
        json!("must be authenticated to resolve `Query.secret`")
    );
    assert_eq!(calls.secret.load(Ordering::SeqCst), 0);
    assert_eq!(calls.public.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_identity_is_treated_as_anonymous() {
    let (schema, calls) = build();
    let response = run(&schema, "{ secret }", None).await;

    assert_eq!(
        response.data.clone().into_json().unwrap(),
        json!({"secret": null})
    );
    assert_eq!(errors(&response)[0]["extensions"]["code"], json!("UNAUTHENTICATED"));
    assert_eq!(calls.secret.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn nested_field_without_role_is_forbidden() {
    let (schema, calls) = build();
    let identity = IdentityContext::authenticated("u2", ["Editor"]);
    let response = run(&schema, "{ vault { code label } }", Some(identity)).await;

    assert_eq!(
        response.data.clone().into_json().unwrap(),
        json!({"vault": {"code": null, "label": "front"}})
    );
    let errors = errors(&response);
    assert_eq!(errors[0]["path"], json!(["vault", "code"]));
    assert_eq!(errors[0]["extensions"]["code"], json!("FORBIDDEN"));
    assert_eq!(errors[0]["extensions"]["role"], json!("Admin"));
    assert_eq!(errors[0]["extensions"]["field"], json!("Vault.code"));
    assert_eq!(calls.code.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn authenticated_user_without_roles_reads_authenticated_fields() {
    let (schema, _calls) = build();
    let identity = IdentityContext::authenticated("u3", Vec::<String>::new());
    let response = run(&schema, "{ secret admin }", Some(identity)).await;

    assert_eq!(
        response.data.clone().into_json().unwrap(),
        json!({"secret": "s3cr3t", "admin": null})
    );
    assert_eq!(errors(&response)[0]["extensions"]["code"], json!("FORBIDDEN"));
}

#[tokio::test]
async fn denied_non_null_field_reports_an_error() {
    let (schema, calls) = build();
    let response = run(&schema, "{ required }", Some(IdentityContext::anonymous())).await;

    assert_eq!(response.data, async_graphql::Value::Null);
    let errors = errors(&response);
    assert_eq!(errors[0]["extensions"]["code"], json!("UNAUTHENTICATED"));
    assert_eq!(errors[0]["path"], json!(["required"]));
    assert_eq!(calls.required.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn provider_failure_denies_like_anonymous() {
    let (schema, calls) = build();
    let response = run(
        &schema,
        "{ public admin }",
        Some(IdentityContext::provider_failure()),
    )
    .await;

    assert_eq!(
        response.data.clone().into_json().unwrap(),
        json!({"public": "hello", "admin": null})
    );
    assert_eq!(errors(&response)[0]["extensions"]["code"], json!("UNAUTHENTICATED"));
    assert_eq!(calls.admin.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn interface_policy_holds_through_type_conditions() {
    let (schema, _calls) = build();
    for query in [
        "{ node { id secret } }",
        "{ node { id ... on Agent { secret } } }",
        "{ node { id ...AgentSecret } } fragment AgentSecret on Agent { secret }",
    ] {
        let response = run(&schema, query, Some(IdentityContext::anonymous())).await;
        assert_eq!(
            response.data.clone().into_json().unwrap(),
            json!({"node": {"id": "007", "secret": null}}),
            "{query}"
        );
        let errors = errors(&response);
        assert_eq!(errors[0]["path"], json!(["node", "secret"]), "{query}");
        assert_eq!(errors[0]["extensions"]["code"], json!("UNAUTHENTICATED"));
    }

    let identity = IdentityContext::authenticated("u1", Vec::<String>::new());
    let response = run(
        &schema,
        "{ node { ... on Agent { secret } } }",
        Some(identity),
    )
    .await;
    assert!(response.errors.is_empty());
    assert_eq!(
        response.data.into_json().unwrap(),
        json!({"node": {"secret": "licence to kill"}})
    );
}
