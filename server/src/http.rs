use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use anyhow::Context;
use async_graphql::http::GraphiQLSource;
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::{
    Json, Router,
    extract::State,
    http::{self, HeaderMap, HeaderName, HeaderValue, Method},
    response::{Html, IntoResponse},
    routing::get,
};
use platform_authn::IdentityProvider;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, instrument};

use crate::{config::AppConfig, graphql::SchemaType};

#[derive(Clone)]
pub struct AppState {
    pub schema: SchemaType,
    pub identity: Arc<dyn IdentityProvider>,
    pub config: Arc<AppConfig>,
}

#[derive(Clone, Debug)]
pub struct ServeConfig {
    addr: SocketAddr,
}

impl ServeConfig {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::from((host, port)),
        }
    }
}

pub async fn serve(config: ServeConfig, state: AppState) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;

    info!(%config.addr, "gateway listening");
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();
    let allow_origin = if allowed.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed)
    };
    CorsLayer::new()
        .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
        .allow_methods([Method::POST, Method::GET])
        .allow_origin(allow_origin)
}

pub fn build_router(state: AppState) -> Router {
    let request_id = MakeRequestUuid;
    let header_name = HeaderName::from_static("x-request-id");
    Router::new()
        .route("/health", get(health_handler))
        .route("/graphql", get(graphiql).post(graphql_handler))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(header_name.clone(), request_id))
                .layer(PropagateRequestIdLayer::new(header_name))
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config.cors_allowed_origins)),
        )
        .with_state(state)
}

/// Resolve the caller once, then execute with the identity attached to the
/// request.
#[instrument(name = "http.graphql", skip_all)]
async fn graphql_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: GraphQLRequest,
) -> GraphQLResponse {
    let identity = state.identity.resolve(&headers).await;
    tracing::debug!(
        subject = identity.subject().unwrap_or("-"),
        source = ?identity.source(),
        "request identity resolved"
    );
    let request = request.into_inner().data(identity);
    state.schema.execute(request).await.into()
}

async fn graphiql() -> impl IntoResponse {
    Html(GraphiQLSource::build().endpoint("/graphql").finish())
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    ctrl_c.await;

    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    };
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AuthSettings, graphql};
    use async_trait::async_trait;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use platform_authn::{IdentityContext, bearer_token};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    /// Accepts the literal token `admin-token`.
    struct FixedTokens;

    #[async_trait]
    impl IdentityProvider for FixedTokens {
        async fn resolve(&self, headers: &HeaderMap) -> IdentityContext {
            match bearer_token(headers) {
                Some("admin-token") => IdentityContext::authenticated("auth0|admin", ["Admin"]),
                _ => IdentityContext::anonymous(),
            }
        }
    }

    fn router() -> Router {
        let schema = graphql::build_schema(Arc::new(graphql::TodoStore::new())).unwrap();
        build_router(AppState {
            schema,
            identity: Arc::new(FixedTokens),
            config: Arc::new(AppConfig {
                cors_allowed_origins: Vec::new(),
                auth: AuthSettings::Disabled,
            }),
        })
    }

    async fn post_graphql(query: &str, token: Option<&str>) -> Value {
        let mut request = http::Request::post("/graphql")
            .header(http::header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            request = request.header(http::header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = json!({ "query": query }).to_string();
        let response = router()
            .oneshot(request.body(Body::from(body)).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = router()
            .oneshot(http::Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["ok"], json!(true));
    }

    #[tokio::test]
    async fn anonymous_request_is_partially_denied() {
        let body = post_graphql("{ hello helloUser }", None).await;
        assert_eq!(body["data"], json!({"hello": "Hello world!", "helloUser": null}));
        assert_eq!(body["errors"][0]["extensions"]["code"], json!("UNAUTHENTICATED"));
    }

    #[tokio::test]
    async fn bearer_token_reaches_resolvers() {
        let body = post_graphql("{ helloUser }", Some("admin-token")).await;
        assert_eq!(body["data"], json!({"helloUser": "Hello auth0|admin"}));
        assert!(body.get("errors").is_none());
    }

    #[tokio::test]
    async fn unknown_token_is_anonymous() {
        let body = post_graphql("{ helloUser }", Some("forged")).await;
        assert_eq!(body["data"], json!({"helloUser": null}));
        assert_eq!(body["errors"][0]["extensions"]["code"], json!("UNAUTHENTICATED"));
    }

    #[tokio::test]
    async fn graphiql_is_served() {
        let response = router()
            .oneshot(http::Request::get("/graphql").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
    }
}
