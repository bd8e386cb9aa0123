//! Shared fixtures for in-process router tests

use axum::{
    body::Body,
    http::{header, Method, Request},
    response::Response,
    Router,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use crate::{
    app::build_app,
    auth::{PasswordService, Role},
    config::Config,
    db::{ConnectError, ConnectFuture, Connector},
    state::AppState,
    store::{CredentialStore, MemoryCredentialStore, NewPrincipal, Principal, Store},
};

pub const TEST_SECRET: &str = "router-test-secret-0123456789abcdefghijklmnop";
pub const TEST_ORIGIN: &str = "https://clubs.campus.edu";

pub fn test_config() -> Config {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("DATABASE_URL", "memory://"),
        ("JWT_SECRET", TEST_SECRET),
        ("FRONTEND_URL", TEST_ORIGIN),
        ("DB_RETRY_INITIAL_MS", "500"),
        ("DB_RETRY_MAX_MS", "5000"),
        ("DB_CONNECT_TIMEOUT_SECS", "2"),
    ]);
    Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap()
}

pub fn cheap_passwords() -> PasswordService {
    PasswordService::with_cost(8, 1, 1).unwrap()
}

/// Hands out one shared memory store and counts how often it was asked to
pub struct CountingConnector {
    pub store: Arc<MemoryCredentialStore>,
    calls: AtomicUsize,
    delay: Duration,
    fail: bool,
}

impl CountingConnector {
    pub fn new(store: Arc<MemoryCredentialStore>) -> Self {
        Self {
            store,
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail: false,
        }
    }

    pub fn slow(store: Arc<MemoryCredentialStore>, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(store)
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Arc::new(MemoryCredentialStore::new()))
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Connector<Store> for CountingConnector {
    fn connect(&self) -> ConnectFuture<Store> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let store: Store = self.store.clone();
        let delay = self.delay;
        let fail = self.fail;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            if fail {
                Err(ConnectError::Failed("connection refused".to_string()))
            } else {
                Ok(store)
            }
        })
    }
}

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub store: Arc<MemoryCredentialStore>,
    pub connector: Arc<CountingConnector>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_connector(CountingConnector::new(Arc::new(MemoryCredentialStore::new())))
    }

    pub fn with_connector(connector: CountingConnector) -> Self {
        let connector = Arc::new(connector);
        let store = connector.store.clone();
        let state = AppState::new(test_config(), cheap_passwords(), connector.clone()).unwrap();
        Self {
            app: build_app(state.clone()),
            state,
            store,
            connector,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    /// Insert a principal directly, bypassing the HTTP surface
    pub async fn seed(&self, role: Role, identifier: &str, name: &str, password: &str) -> Principal {
        let password_hash = self.state.passwords.hash(password).await.unwrap();
        self.store
            .create(NewPrincipal {
                role,
                identifier: identifier.to_string(),
                display_name: name.to_string(),
                description: None,
                password_hash,
            })
            .await
            .unwrap()
    }

    /// `token=<jwt>` pair for a freshly issued session
    pub fn cookie_for(&self, principal: &Principal) -> String {
        let session = self
            .state
            .jwt_manager
            .issue(principal.id, principal.role)
            .unwrap();
        format!("token={}", session.token)
    }
}

pub fn request(method: Method, uri: &str, cookie: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    request(Method::GET, uri, cookie, None)
}

pub fn post(uri: &str, cookie: Option<&str>, body: Value) -> Request<Body> {
    request(Method::POST, uri, cookie, Some(body))
}

pub fn put(uri: &str, cookie: Option<&str>, body: Value) -> Request<Body> {
    request(Method::PUT, uri, cookie, Some(body))
}

/// All `Set-Cookie` values on a response
pub fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}

/// `token=<jwt>` pair from the response's session cookie, if it set a non-empty one
pub fn session_cookie(response: &Response) -> Option<String> {
    set_cookies(response).into_iter().find_map(|cookie| {
        let pair = cookie.split(';').next()?.trim().to_string();
        let value = pair.strip_prefix("token=")?;
        (!value.is_empty()).then_some(pair)
    })
}

/// True if the response deletes the session cookie
pub fn clears_session(response: &Response) -> bool {
    set_cookies(response)
        .iter()
        .any(|cookie| cookie.starts_with("token=;") && cookie.contains("Max-Age=0"))
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
