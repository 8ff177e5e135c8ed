use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::repo_types::{Generation, GenerationStatus, Style};

/// Wire shape of a generation. Absent values serialize as `null`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationView {
    pub id: i64,
    pub status: GenerationStatus,
    pub prompt: String,
    pub style: Option<Style>,
    pub input_image_url: String,
    pub output_image_url: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl From<Generation> for GenerationView {
    fn from(g: Generation) -> Self {
        Self {
            id: g.id,
            status: g.status,
            prompt: g.prompt,
            style: g.style,
            input_image_url: g.input_image_url,
            output_image_url: g.output_image_url,
            error_message: g.error_message,
            retry_count: g.retry_count,
            created_at: g.created_at,
            completed_at: g.completed_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedGenerationResponse {
    pub message: String,
    pub generation: GenerationView,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub generation: GenerationView,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecentGenerationsResponse {
    pub generations: Vec<GenerationView>,
}

/// `?limit=` is kept as text so junk values fall back to the default
/// instead of being rejected.
#[derive(Debug, Default, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<String>,
}
