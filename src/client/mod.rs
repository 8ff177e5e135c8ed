//! HTTP client for the studio API, plus the dashboard and form models that a
//! front end drives.
//!
//! Uses reqwest for the JSON and multipart endpoints. Non-2xx responses are
//! turned into [`ClientError::Api`] carrying the server's `error` text.

pub mod dashboard;
pub mod form;

use bytes::Bytes;
use reqwest::{
    header::CONTENT_TYPE,
    multipart::{Form, Part},
    Method, RequestBuilder, StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::generations::{
    dto::{CreatedGenerationResponse, GenerationResponse, GenerationView, RecentGenerationsResponse},
    Style,
};

pub use dashboard::Dashboard;
pub use form::{FormDraft, GenerationForm, RetryTracker};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("{0}")]
    Validation(String),

    #[error("Request was cancelled")]
    Aborted,

    #[error("Retry is not available")]
    RetryUnavailable,
}

impl ClientError {
    /// True when the server reported a capacity problem worth retrying.
    pub fn is_overload(&self) -> bool {
        match self {
            ClientError::Api { message, .. } => is_overload_message(message),
            _ => false,
        }
    }
}

pub fn is_overload_message(message: &str) -> bool {
    message.to_lowercase().contains("overload")
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionUser {
    pub id: i64,
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSession {
    pub message: String,
    pub user: SessionUser,
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: i64,
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Deserialize)]
struct ProfileEnvelope {
    user: Profile,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: String,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

/// One multipart submission to `POST /api/generations`.
#[derive(Debug, Clone)]
pub struct GenerationUpload {
    pub image: Bytes,
    pub file_name: String,
    pub content_type: String,
    pub prompt: String,
    pub style: Option<Style>,
    pub retry_count: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct StudioClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl StudioClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ClientError::Validation("base_url is empty".into()));
        }
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url,
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let req = self.http.request(method, url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn parse<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        let text = resp.text().await.unwrap_or_default();
        Err(api_error(status, &text))
    }

    pub async fn register(&mut self, email: &str, password: &str) -> Result<AuthSession, ClientError> {
        self.authenticate("/auth/register", email, password).await
    }

    pub async fn login(&mut self, email: &str, password: &str) -> Result<AuthSession, ClientError> {
        self.authenticate("/auth/login", email, password).await
    }

    async fn authenticate(&mut self, path: &str, email: &str, password: &str) -> Result<AuthSession, ClientError> {
        let resp = self
            .http
            .post(self.api_url(path))
            .json(&Credentials { email, password })
            .send()
            .await?;
        let session: AuthSession = Self::parse(resp).await?;
        self.token = Some(session.token.clone());
        Ok(session)
    }

    pub async fn me(&self) -> Result<Profile, ClientError> {
        let resp = self.request(Method::GET, &self.api_url("/auth/me")).send().await?;
        Ok(Self::parse::<ProfileEnvelope>(resp).await?.user)
    }

    pub async fn create_generation(
        &self,
        upload: &GenerationUpload,
    ) -> Result<CreatedGenerationResponse, ClientError> {
        let image = Part::bytes(upload.image.to_vec())
            .file_name(upload.file_name.clone())
            .mime_str(&upload.content_type)?;
        let mut form = Form::new()
            .part("image", image)
            .text("prompt", upload.prompt.clone());
        if let Some(style) = upload.style {
            form = form.text("style", style.as_str());
        }
        if let Some(n) = upload.retry_count {
            form = form.text("retryCount", n.to_string());
        }
        let resp = self
            .request(Method::POST, &self.api_url("/generations"))
            .multipart(form)
            .send()
            .await?;
        Self::parse(resp).await
    }

    pub async fn get_generation(&self, id: i64) -> Result<GenerationView, ClientError> {
        let url = self.api_url(&format!("/generations/{id}"));
        let resp = self.request(Method::GET, &url).send().await?;
        Ok(Self::parse::<GenerationResponse>(resp).await?.generation)
    }

    pub async fn recent_generations(&self, limit: Option<u32>) -> Result<Vec<GenerationView>, ClientError> {
        let mut url = self.api_url("/generations/recent");
        if let Some(limit) = limit {
            url.push_str(&format!("?limit={limit}"));
        }
        let resp = self.request(Method::GET, &url).send().await?;
        Ok(Self::parse::<RecentGenerationsResponse>(resp).await?.generations)
    }

    /// Downloads a stored upload such as a generation's `inputImageUrl`.
    pub async fn fetch_image(&self, path: &str) -> Result<(Bytes, String), ClientError> {
        let url = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        };
        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(api_error(status, &text));
        }
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        Ok((resp.bytes().await?, content_type))
    }
}

fn api_error(status: StatusCode, body: &str) -> ClientError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| status.canonical_reason().unwrap_or("Unknown").to_string());
    ClientError::Api {
        status: status.as_u16(),
        message,
    }
}
