use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{debug, instrument};

use super::{
    dto::{CreatedGenerationResponse, GenerationResponse, RecentGenerationsResponse, RecentQuery},
    services::{self, CreateGenerationInput, UploadedImage},
};
use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
    state::AppState,
};

/// Headroom for the text fields and multipart framing around the image.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/generations/recent", get(recent_generations))
        .route("/generations/:id", get(get_generation))
}

pub fn write_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/generations", post(create_generation))
        .layer(DefaultBodyLimit::max(max_upload_bytes + FORM_OVERHEAD_BYTES))
}

#[instrument(skip(state, multipart), fields(user_id = user.user_id))]
pub async fn create_generation(
    State(state): State<AppState>,
    user: AuthUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<(StatusCode, Json<CreatedGenerationResponse>)> {
    // a body that is not multipart cannot carry the image
    let mut multipart = multipart.map_err(|e| {
        debug!(error = %e.body_text(), "create without a multipart body");
        AppError::validation(services::MISSING_IMAGE)
    })?;
    let max = state.config.max_upload_bytes;
    let input = read_form(&mut multipart, max).await?;
    let res = services::create_generation(&state, user.user_id, input).await?;
    Ok((StatusCode::CREATED, Json(res)))
}

async fn read_form(multipart: &mut Multipart, max_upload_bytes: usize) -> AppResult<CreateGenerationInput> {
    let mut input = CreateGenerationInput::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| form_error(e, max_upload_bytes))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let body = field.bytes().await.map_err(|e| form_error(e, max_upload_bytes))?;
                input.image = Some(UploadedImage { body, content_type });
            }
            "prompt" | "style" | "retryCount" => {
                let text = field.text().await.map_err(|e| form_error(e, max_upload_bytes))?;
                match name.as_str() {
                    "prompt" => input.prompt = Some(text),
                    "style" => input.style = Some(text),
                    _ => input.retry_count = Some(text),
                }
            }
            _ => {}
        }
    }
    Ok(input)
}

fn form_error(e: MultipartError, max_upload_bytes: usize) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::validation(format!(
            "Image must be less than {}MB",
            max_upload_bytes.div_ceil(1024 * 1024)
        ))
    } else {
        AppError::validation(e.body_text())
    }
}

#[instrument(skip(state), fields(user_id = user.user_id))]
pub async fn get_generation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<GenerationResponse>> {
    let generation = services::get_generation(&state, user.user_id, &id).await?;
    Ok(Json(GenerationResponse { generation }))
}

#[instrument(skip(state), fields(user_id = user.user_id))]
pub async fn recent_generations(
    State(state): State<AppState>,
    user: AuthUser,
    Query(q): Query<RecentQuery>,
) -> AppResult<Json<RecentGenerationsResponse>> {
    Ok(Json(
        services::recent_generations(&state, user.user_id, q.limit.as_deref()).await?,
    ))
}
