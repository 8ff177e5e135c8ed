#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use ai_studio::{
    app::build_app,
    auth::repo::{MemoryUserStore, UserStore},
    config::{AppConfig, InferenceConfig, JwtConfig},
    generations::{GenerationStore, MemoryGenerationStore},
    inference::{ImageGenerator, MockInference},
    state::AppState,
    storage::LocalDiskStorage,
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

pub const BOUNDARY: &str = "----studio-test-boundary";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub users: Arc<MemoryUserStore>,
    pub generations: Arc<dyn GenerationStore>,
    pub upload_dir: TempDir,
}

pub fn test_config(upload_dir: &TempDir, failure_rate: f64) -> AppConfig {
    AppConfig {
        database_url: "postgres://unused".into(),
        db_max_connections: 1,
        jwt: JwtConfig {
            secret: "test-secret".into(),
            issuer: "ai-studio".into(),
            audience: "ai-studio-users".into(),
            ttl_minutes: 60,
        },
        upload_dir: upload_dir.path().to_string_lossy().into_owned(),
        max_upload_bytes: 5 * 1024 * 1024,
        inference: InferenceConfig {
            min_delay_ms: 5,
            max_delay_ms: 20,
            failure_rate,
        },
        job_queue_capacity: 16,
    }
}

pub async fn spawn_app(failure_rate: f64) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir, failure_rate);
    let generator = Arc::new(MockInference::new(&config.inference));
    spawn_app_with(config, dir, Arc::new(MemoryGenerationStore::new()), generator).await
}

pub async fn spawn_app_with(
    config: AppConfig,
    dir: TempDir,
    generations: Arc<dyn GenerationStore>,
    generator: Arc<dyn ImageGenerator>,
) -> TestApp {
    let users = Arc::new(MemoryUserStore::new());
    let storage = LocalDiskStorage::new(dir.path()).await.unwrap();
    let (state, _worker) = AppState::from_parts(
        config,
        users.clone() as Arc<dyn UserStore>,
        generations.clone(),
        Arc::new(storage),
        generator,
    );
    TestApp {
        router: build_app(state.clone()),
        state,
        users,
        generations,
        upload_dir: dir,
    }
}

impl TestApp {
    pub async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(req).await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn create(&self, token: &str, fields: &[FormField<'_>]) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri("/api/generations")
            .header("authorization", format!("Bearer {token}"))
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(fields)))
            .unwrap();
        self.send(req).await
    }

    /// Registers a fresh account and returns its token.
    pub async fn register(&self, email: &str) -> String {
        let (status, body) = self
            .post_json(
                "/api/auth/register",
                serde_json::json!({ "email": email, "password": "secret123" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["token"].as_str().unwrap().to_string()
    }

    /// Polls the store until the generation leaves `processing`.
    pub async fn wait_settled(&self, id: i64) -> ai_studio::generations::Generation {
        for _ in 0..200 {
            let g = self.generations.find_by_id(id).await.unwrap().unwrap();
            if g.status.is_terminal() {
                return g;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("generation {id} never settled");
    }

    pub fn stored_files(&self) -> Vec<String> {
        std::fs::read_dir(self.upload_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }
}

pub enum FormField<'a> {
    Text(&'a str, &'a str),
    File {
        name: &'a str,
        file_name: &'a str,
        content_type: &'a str,
        data: &'a [u8],
    },
}

pub fn png_field(data: &[u8]) -> FormField<'_> {
    FormField::File {
        name: "image",
        file_name: "input.png",
        content_type: "image/png",
        data,
    }
}

pub fn multipart_body(fields: &[FormField<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for field in fields {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match field {
            FormField::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                        .as_bytes(),
                );
            }
            FormField::File {
                name,
                file_name,
                content_type,
                data,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                         Content-Type: {content_type}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Serves the router on an ephemeral local port and returns its base URL.
pub async fn serve(app: &TestApp) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}
