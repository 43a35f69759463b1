use std::sync::Arc;

use axum::{
    Router,
    body::{Body, Bytes},
    http::{Request, StatusCode, header},
};
use base64::Engine;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use mbee::artifact::LocalStrategy;
use mbee::auth::hash_password;
use mbee::config::Config;
use mbee::server::{AppState, create_router};
use mbee::store::{SqliteStore, Store};
use mbee::types::{Metadata, Org, Permissions, Role, User};

pub const ADMIN: (&str, &str) = ("admin", "adminpass1");

/// An in-process server over an in-memory database.
pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    _temp_dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let store = SqliteStore::in_memory().expect("open store");
        store.initialize().expect("create tables");

        store
            .create_user(&User {
                username: ADMIN.0.to_string(),
                admin: true,
                password_hash: hash_password(ADMIN.1).expect("hash password"),
                fname: None,
                lname: None,
                email: None,
                custom: json!({}),
                meta: Metadata::new(None),
            })
            .expect("create admin");
        store
            .create_org(&Org {
                id: "default".to_string(),
                name: "Default Org".to_string(),
                permissions: Permissions::from([(ADMIN.0, Role::Admin)]),
                custom: json!({}),
                meta: Metadata::new(Some(ADMIN.0)),
            })
            .expect("create default org");

        let mut config = Config::default();
        config.server.data_dir = temp_dir.path().to_path_buf();
        let artifacts = Arc::new(LocalStrategy::new(temp_dir.path().join("artifacts")));
        let state = Arc::new(AppState::new(Arc::new(store), artifacts, config).expect("build state"));

        Self {
            router: create_router(Arc::clone(&state)),
            state,
            _temp_dir: temp_dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Bytes) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("route request");
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        (status, headers, body)
    }

    /// Sends a JSON request as `auth` and returns the status and parsed body.
    pub async fn json(
        &self,
        method: &str,
        uri: &str,
        auth: Option<(&str, &str)>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((username, password)) = auth {
            builder = builder.header(header::AUTHORIZATION, basic(username, password));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("build request");

        let (status, _, bytes) = self.send(request).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn create_user(&self, username: &str, password: &str) {
        let (status, _) = self
            .json(
                "POST",
                "/api/users",
                Some(ADMIN),
                Some(json!({ "username": username, "password": password })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create user {username}");
    }
}

pub fn basic(username: &str, password: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
    format!("Basic {encoded}")
}
