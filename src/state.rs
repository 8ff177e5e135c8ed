use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::{
    auth::{
        repo::{PgUserStore, UserStore},
        JwtKeys,
    },
    config::AppConfig,
    db,
    generations::{spawn_worker, GenerationStore, JobQueue, PgGenerationStore},
    inference::{ImageGenerator, MockInference},
    storage::{LocalDiskStorage, StorageClient},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub jwt: JwtKeys,
    pub users: Arc<dyn UserStore>,
    pub generations: Arc<dyn GenerationStore>,
    pub storage: Arc<dyn StorageClient>,
    pub jobs: JobQueue,
}

impl AppState {
    /// Production wiring: Postgres stores, uploads on local disk, mock inference.
    pub async fn init(config: AppConfig) -> anyhow::Result<(Self, JoinHandle<()>)> {
        let pool = db::connect(&config).await?;
        db::migrate(&pool).await;

        let storage = LocalDiskStorage::new(&config.upload_dir).await?;
        let generator = MockInference::new(&config.inference);
        Ok(Self::from_parts(
            config,
            Arc::new(PgUserStore::new(pool.clone())),
            Arc::new(PgGenerationStore::new(pool)),
            Arc::new(storage),
            Arc::new(generator),
        ))
    }

    /// Assembles a state from arbitrary backends and starts the generation
    /// worker. Must be called inside a tokio runtime.
    pub fn from_parts(
        config: AppConfig,
        users: Arc<dyn UserStore>,
        generations: Arc<dyn GenerationStore>,
        storage: Arc<dyn StorageClient>,
        generator: Arc<dyn ImageGenerator>,
    ) -> (Self, JoinHandle<()>) {
        let (jobs, worker) = spawn_worker(generations.clone(), generator, config.job_queue_capacity);
        let state = Self {
            jwt: JwtKeys::new(&config.jwt),
            config: Arc::new(config),
            users,
            generations,
            storage,
            jobs,
        };
        (state, worker)
    }
}
