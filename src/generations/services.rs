use bytes::Bytes;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    dto::{CreatedGenerationResponse, GenerationView, RecentGenerationsResponse},
    repo_types::{Generation, GenerationUpdate, NewGeneration, Style},
    worker::{GenerationJob, UNEXPECTED_FAILURE},
};
use crate::{
    error::{AppError, AppResult},
    state::AppState,
    storage::ext_from_mime,
};

pub const MAX_PROMPT_CHARS: usize = 500;
pub const MAX_RETRIES: i32 = 3;
pub const DEFAULT_RECENT_LIMIT: i64 = 5;
pub const MAX_RECENT_LIMIT: i64 = 50;
pub const MISSING_IMAGE: &str = "Image file is required";

#[derive(Debug)]
pub struct UploadedImage {
    pub body: Bytes,
    pub content_type: String,
}

/// Raw multipart fields as they arrived.
#[derive(Default)]
pub struct CreateGenerationInput {
    pub image: Option<UploadedImage>,
    pub prompt: Option<String>,
    pub style: Option<String>,
    pub retry_count: Option<String>,
}

#[derive(Debug)]
pub(crate) struct ValidGeneration {
    pub image: UploadedImage,
    pub prompt: String,
    pub style: Option<Style>,
    pub retry_count: i32,
}

pub(crate) fn validate_prompt(prompt: Option<&str>) -> AppResult<String> {
    let prompt = prompt.map(str::trim).unwrap_or_default();
    if prompt.is_empty() {
        return Err(AppError::validation("Prompt is required"));
    }
    if prompt.chars().count() > MAX_PROMPT_CHARS {
        return Err(AppError::validation(format!(
            "Prompt must be at most {MAX_PROMPT_CHARS} characters"
        )));
    }
    Ok(prompt.to_string())
}

pub(crate) fn validate_style(style: Option<&str>) -> AppResult<Option<Style>> {
    match style.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s.to_lowercase().parse::<Style>().map(Some).map_err(|_| {
            AppError::validation("Style must be one of: realistic, artistic, vintage, modern")
        }),
    }
}

pub(crate) fn validate_retry_count(raw: Option<&str>) -> AppResult<i32> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(0),
        Some(s) => s
            .parse::<i32>()
            .ok()
            .filter(|n| (0..=MAX_RETRIES).contains(n))
            .ok_or_else(|| {
                AppError::validation(format!("retryCount must be between 0 and {MAX_RETRIES}"))
            }),
    }
}

pub(crate) fn validate_image(image: Option<UploadedImage>, max_bytes: usize) -> AppResult<UploadedImage> {
    let image = image
        .filter(|i| !i.body.is_empty())
        .ok_or_else(|| AppError::validation(MISSING_IMAGE))?;
    if !image.content_type.starts_with("image/") {
        return Err(AppError::validation("Only image files are allowed"));
    }
    if image.body.len() > max_bytes {
        return Err(AppError::validation(format!(
            "Image must be less than {}MB",
            max_bytes.div_ceil(1024 * 1024)
        )));
    }
    Ok(image)
}

pub(crate) fn validate_create(input: CreateGenerationInput, max_bytes: usize) -> AppResult<ValidGeneration> {
    let image = validate_image(input.image, max_bytes)?;
    let prompt = validate_prompt(input.prompt.as_deref())?;
    let style = validate_style(input.style.as_deref())?;
    let retry_count = validate_retry_count(input.retry_count.as_deref())?;
    Ok(ValidGeneration {
        image,
        prompt,
        style,
        retry_count,
    })
}

/// `?limit=` parsing: the leading integer is used (`"2.5"` and `"3abc"` read
/// as 2 and 3), junk or non-positive falls back to the default, large values
/// are clamped.
pub(crate) fn parse_limit(raw: Option<&str>) -> i64 {
    raw.and_then(leading_int)
        .filter(|n| *n > 0)
        .map(|n| n.min(MAX_RECENT_LIMIT))
        .unwrap_or(DEFAULT_RECENT_LIMIT)
}

fn leading_int(raw: &str) -> Option<i64> {
    let s = raw.trim_start();
    let digits_from = usize::from(s.starts_with(['+', '-']));
    let end = s[digits_from..]
        .find(|c: char| !c.is_ascii_digit())
        .map_or(s.len(), |i| i + digits_from);
    // an overlong digit run saturates instead of falling back
    s[..end]
        .parse::<i64>()
        .ok()
        .or_else(|| (end > digits_from && !s.starts_with('-')).then_some(i64::MAX))
}

pub(crate) fn parse_generation_id(raw: &str) -> AppResult<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| AppError::validation("Invalid generation ID"))
}

pub async fn create_generation(
    state: &AppState,
    user_id: i64,
    input: CreateGenerationInput,
) -> AppResult<CreatedGenerationResponse> {
    let valid = validate_create(input, state.config.max_upload_bytes)?;

    let ext = ext_from_mime(&valid.image.content_type).unwrap_or("bin");
    let key = format!("{}.{}", Uuid::new_v4(), ext);
    state
        .storage
        .put_object(&key, valid.image.body, &valid.image.content_type)
        .await?;
    let input_image_url = state.storage.public_url(&key);

    let created = state
        .generations
        .create(NewGeneration {
            user_id,
            prompt: valid.prompt,
            style: valid.style,
            input_image_url: input_image_url.clone(),
            retry_count: valid.retry_count,
        })
        .await;
    let generation = match created {
        Ok(g) => g,
        Err(e) => {
            if let Err(cleanup) = state.storage.delete_object(&key).await {
                warn!(error = %cleanup, key = %key, "failed to remove orphaned upload");
            }
            return Err(e.into());
        }
    };

    let job = GenerationJob {
        id: generation.id,
        input_image_url,
        prompt: generation.prompt.clone(),
    };
    if let Err(e) = state.jobs.enqueue(job).await {
        error!(error = %format!("{e:#}"), generation_id = generation.id, "could not queue generation");
        let failed = GenerationUpdate::Failed {
            error_message: UNEXPECTED_FAILURE.to_string(),
        };
        if let Err(e) = state.generations.update(generation.id, failed).await {
            error!(error = %format!("{e:#}"), generation_id = generation.id, "could not fail generation");
        }
        return Err(e.into());
    }

    info!(generation_id = generation.id, user_id, retry_count = generation.retry_count, "generation started");
    Ok(CreatedGenerationResponse {
        message: "Generation started".to_string(),
        generation: generation.into(),
    })
}

pub async fn get_generation(state: &AppState, user_id: i64, raw_id: &str) -> AppResult<GenerationView> {
    let id = parse_generation_id(raw_id)?;
    let generation: Generation = state
        .generations
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Generation not found".into()))?;
    if generation.user_id != user_id {
        warn!(generation_id = id, user_id, owner_id = generation.user_id, "generation access denied");
        return Err(AppError::Forbidden("Access denied".into()));
    }
    Ok(generation.into())
}

pub async fn recent_generations(
    state: &AppState,
    user_id: i64,
    raw_limit: Option<&str>,
) -> AppResult<RecentGenerationsResponse> {
    let limit = parse_limit(raw_limit);
    let rows = state.generations.list_recent_by_user(user_id, limit).await?;
    Ok(RecentGenerationsResponse {
        generations: rows.into_iter().map(GenerationView::from).collect(),
    })
}
