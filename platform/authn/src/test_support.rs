use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde_json::{Value, json};
use url::Url;

use crate::JwksSettings;

pub(crate) const FIRST_SECRET: &[u8] = b"jwks-oct-secret-number-one-for-tests";
pub(crate) const SECOND_SECRET: &[u8] = b"jwks-oct-secret-number-two-for-tests";

/// An HS256 `oct` JWK.
pub(crate) fn oct_key(kid: &str, secret: &[u8]) -> Value {
    json!({
        "kty": "oct",
        "kid": kid,
        "alg": "HS256",
        "use": "sig",
        "k": URL_SAFE_NO_PAD.encode(secret),
    })
}

pub(crate) fn key_set(keys: impl IntoIterator<Item = Value>) -> Value {
    json!({ "keys": keys.into_iter().collect::<Vec<_>>() })
}

#[derive(Default)]
struct OriginState {
    document: Mutex<Value>,
    failing: AtomicBool,
    hits: AtomicUsize,
}

/// Local HTTP origin serving a JWKS document and counting fetches.
pub(crate) struct JwksOrigin {
    uri: Url,
    state: Arc<OriginState>,
}

impl JwksOrigin {
    pub(crate) async fn start(document: Value) -> Self {
        let state = Arc::new(OriginState {
            document: Mutex::new(document),
            ..OriginState::default()
        });
        let app = Router::new()
            .route("/.well-known/jwks.json", get(serve_jwks))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            uri: Url::parse(&format!("http://{addr}/.well-known/jwks.json")).unwrap(),
            state,
        }
    }

    pub(crate) fn settings(&self) -> JwksSettings {
        JwksSettings {
            uri: self.uri.clone(),
            cache_ttl: Duration::from_secs(600),
            requests_per_minute: 5,
            timeout: Duration::from_secs(2),
        }
    }

    pub(crate) fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub(crate) fn replace(&self, document: Value) {
        *self.state.document.lock().unwrap() = document;
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }
}

async fn serve_jwks(State(state): State<Arc<OriginState>>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    if state.failing.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let document = state.document.lock().unwrap().clone();
    Json(document).into_response()
}
