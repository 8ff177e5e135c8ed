pub mod dto;
pub mod handlers;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod worker;

use crate::state::AppState;
use axum::Router;

pub use repo::{GenerationStore, MemoryGenerationStore, PgGenerationStore};
pub use repo_types::{Generation, GenerationStatus, Style};
pub use worker::{spawn_worker, JobQueue};

pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .merge(handlers::read_routes())
        .merge(handlers::write_routes(max_upload_bytes))
}
