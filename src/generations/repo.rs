use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use super::repo_types::{Generation, GenerationRow, GenerationStatus, GenerationUpdate, NewGeneration};

const GENERATION_COLUMNS: &str = "id, user_id, prompt, style, input_image_url, output_image_url, \
     status, error_message, retry_count, created_at, completed_at";

#[async_trait]
pub trait GenerationStore: Send + Sync {
    /// Inserts a new record in `processing`.
    async fn create(&self, new: NewGeneration) -> anyhow::Result<Generation>;
    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<Generation>>;
    /// Newest first, at most `limit` rows.
    async fn list_recent_by_user(&self, user_id: i64, limit: i64) -> anyhow::Result<Vec<Generation>>;
    /// Moves a `processing` record to a terminal status and stamps
    /// `completed_at`. Returns `None` if the record is missing or already
    /// terminal.
    async fn update(&self, id: i64, update: GenerationUpdate) -> anyhow::Result<Option<Generation>>;
}

#[derive(Clone)]
pub struct PgGenerationStore {
    db: PgPool,
}

impl PgGenerationStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl GenerationStore for PgGenerationStore {
    async fn create(&self, new: NewGeneration) -> anyhow::Result<Generation> {
        let row = sqlx::query_as::<_, GenerationRow>(&format!(
            r#"
            INSERT INTO generations (user_id, prompt, style, input_image_url, status, retry_count)
            VALUES ($1, $2, $3, $4, 'processing', $5)
            RETURNING {GENERATION_COLUMNS}
            "#
        ))
        .bind(new.user_id)
        .bind(&new.prompt)
        .bind(new.style.map(|s| s.as_str()))
        .bind(&new.input_image_url)
        .bind(new.retry_count)
        .fetch_one(&self.db)
        .await
        .context("insert generation")?;
        row.try_into()
    }

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<Generation>> {
        let row = sqlx::query_as::<_, GenerationRow>(&format!(
            "SELECT {GENERATION_COLUMNS} FROM generations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find generation by id")?;
        row.map(Generation::try_from).transpose()
    }

    async fn list_recent_by_user(&self, user_id: i64, limit: i64) -> anyhow::Result<Vec<Generation>> {
        let rows = sqlx::query_as::<_, GenerationRow>(&format!(
            r#"
            SELECT {GENERATION_COLUMNS}
            FROM generations
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await
        .context("list recent generations")?;
        rows.into_iter().map(Generation::try_from).collect()
    }

    async fn update(&self, id: i64, update: GenerationUpdate) -> anyhow::Result<Option<Generation>> {
        let row = sqlx::query_as::<_, GenerationRow>(&format!(
            r#"
            UPDATE generations
            SET status = $2,
                output_image_url = $3,
                error_message = $4,
                completed_at = now()
            WHERE id = $1 AND status = 'processing'
            RETURNING {GENERATION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(update.status().as_str())
        .bind(update.output_image_url())
        .bind(update.error_message())
        .fetch_optional(&self.db)
        .await
        .with_context(|| format!("update generation {id}"))?;
        row.map(Generation::try_from).transpose()
    }
}

/// Process-local generation table; lets the router run without Postgres.
#[derive(Default)]
pub struct MemoryGenerationStore {
    rows: Mutex<Vec<Generation>>,
}

impl MemoryGenerationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GenerationStore for MemoryGenerationStore {
    async fn create(&self, new: NewGeneration) -> anyhow::Result<Generation> {
        let mut rows = self.rows.lock().await;
        let generation = Generation {
            id: rows.len() as i64 + 1,
            user_id: new.user_id,
            prompt: new.prompt,
            style: new.style,
            input_image_url: new.input_image_url,
            output_image_url: None,
            status: GenerationStatus::Processing,
            error_message: None,
            retry_count: new.retry_count,
            created_at: OffsetDateTime::now_utc(),
            completed_at: None,
        };
        rows.push(generation.clone());
        Ok(generation)
    }

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<Generation>> {
        let rows = self.rows.lock().await;
        Ok(rows.iter().find(|g| g.id == id).cloned())
    }

    async fn list_recent_by_user(&self, user_id: i64, limit: i64) -> anyhow::Result<Vec<Generation>> {
        let rows = self.rows.lock().await;
        let mut mine: Vec<Generation> = rows.iter().filter(|g| g.user_id == user_id).cloned().collect();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        mine.truncate(limit.max(0) as usize);
        Ok(mine)
    }

    async fn update(&self, id: i64, update: GenerationUpdate) -> anyhow::Result<Option<Generation>> {
        let mut rows = self.rows.lock().await;
        let Some(g) = rows
            .iter_mut()
            .find(|g| g.id == id && g.status == GenerationStatus::Processing)
        else {
            return Ok(None);
        };
        g.status = update.status();
        g.output_image_url = update.output_image_url().map(str::to_string);
        g.error_message = update.error_message().map(str::to_string);
        g.completed_at = Some(OffsetDateTime::now_utc());
        Ok(Some(g.clone()))
    }
}
