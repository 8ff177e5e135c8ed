//! Background continuation for generation requests.
//!
//! The create handler answers as soon as the `processing` row exists and
//! hands a [`GenerationJob`] to the queue. A dispatcher task picks jobs up and
//! runs each one on its own task, so slow inferences do not hold each other
//! back. Every job writes its outcome exactly once through
//! [`GenerationStore::update`], which only touches rows still in
//! `processing`.

use std::sync::Arc;

use anyhow::Context;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{error, info, instrument, warn};

use super::{repo::GenerationStore, repo_types::GenerationUpdate};
use crate::inference::{ImageGenerator, InferenceOutcome};

pub const UNEXPECTED_FAILURE: &str = "Unexpected error during processing";

#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub id: i64,
    pub input_image_url: String,
    pub prompt: String,
}

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<GenerationJob>,
}

impl JobQueue {
    pub async fn enqueue(&self, job: GenerationJob) -> anyhow::Result<()> {
        let id = job.id;
        self.tx
            .send(job)
            .await
            .map_err(|_| anyhow::anyhow!("generation worker is not running"))
            .with_context(|| format!("enqueue generation {id}"))
    }
}

/// Starts the dispatcher. It stops once every [`JobQueue`] handle is dropped.
pub fn spawn_worker(
    store: Arc<dyn GenerationStore>,
    generator: Arc<dyn ImageGenerator>,
    capacity: usize,
) -> (JobQueue, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<GenerationJob>(capacity.max(1));
    let handle = tokio::spawn(async move {
        info!("generation worker started");
        while let Some(job) = rx.recv().await {
            tokio::spawn(process_job(store.clone(), generator.clone(), job));
        }
        info!("generation worker stopped");
    });
    (JobQueue { tx }, handle)
}

#[instrument(skip(store, generator, job), fields(generation_id = job.id))]
pub async fn process_job(
    store: Arc<dyn GenerationStore>,
    generator: Arc<dyn ImageGenerator>,
    job: GenerationJob,
) {
    let update = match generator.generate(&job.input_image_url, &job.prompt).await {
        Ok(InferenceOutcome::Success { output_image_url }) => {
            GenerationUpdate::Completed { output_image_url }
        }
        Ok(InferenceOutcome::Failure { error }) => GenerationUpdate::Failed {
            error_message: error,
        },
        Err(e) => {
            error!(error = %format!("{e:#}"), "inference crashed");
            GenerationUpdate::Failed {
                error_message: UNEXPECTED_FAILURE.to_string(),
            }
        }
    };

    let status = update.status();
    match store.update(job.id, update).await {
        Ok(Some(_)) => info!(%status, "generation settled"),
        Ok(None) => warn!(%status, "generation was no longer processing; outcome dropped"),
        Err(e) => error!(error = %format!("{e:#}"), "failed to record generation outcome"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generations::{
        repo::MemoryGenerationStore,
        repo_types::{GenerationStatus, NewGeneration},
    };
    use async_trait::async_trait;
    use std::time::Duration;

    struct Fixed(Option<InferenceOutcome>);

    #[async_trait]
    impl ImageGenerator for Fixed {
        async fn generate(&self, _: &str, _: &str) -> anyhow::Result<InferenceOutcome> {
            self.0.clone().ok_or_else(|| anyhow::anyhow!("model exploded"))
        }
    }

    async fn seeded() -> (Arc<MemoryGenerationStore>, GenerationJob) {
        let store = Arc::new(MemoryGenerationStore::new());
        let g = store
            .create(NewGeneration {
                user_id: 1,
                prompt: "hello".into(),
                style: None,
                input_image_url: "/uploads/in.png".into(),
                retry_count: 0,
            })
            .await
            .unwrap();
        let job = GenerationJob {
            id: g.id,
            input_image_url: g.input_image_url,
            prompt: g.prompt,
        };
        (store, job)
    }

    #[tokio::test]
    async fn success_completes_with_echoed_url() {
        let (store, job) = seeded().await;
        let gen = Arc::new(Fixed(Some(InferenceOutcome::Success {
            output_image_url: "/uploads/in.png".into(),
        })));
        process_job(store.clone(), gen, job.clone()).await;

        let g = store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(g.status, GenerationStatus::Completed);
        assert_eq!(g.output_image_url.as_deref(), Some("/uploads/in.png"));
        assert!(g.completed_at.is_some());
        assert!(g.error_message.is_none());
    }

    #[tokio::test]
    async fn simulated_failure_records_message() {
        let (store, job) = seeded().await;
        let gen = Arc::new(Fixed(Some(InferenceOutcome::Failure {
            error: "AI model is currently overloaded. Please try again.".into(),
        })));
        process_job(store.clone(), gen, job.clone()).await;

        let g = store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(g.status, GenerationStatus::Failed);
        assert!(g.output_image_url.is_none());
        assert!(g.error_message.unwrap().contains("overloaded"));
    }

    #[tokio::test]
    async fn generator_error_maps_to_generic_failure() {
        let (store, job) = seeded().await;
        process_job(store.clone(), Arc::new(Fixed(None)), job.clone()).await;

        let g = store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(g.status, GenerationStatus::Failed);
        assert_eq!(g.error_message.as_deref(), Some(UNEXPECTED_FAILURE));
    }

    #[tokio::test]
    async fn queued_jobs_settle_in_background() {
        let (store, job) = seeded().await;
        let gen = Arc::new(Fixed(Some(InferenceOutcome::Success {
            output_image_url: "/uploads/in.png".into(),
        })));
        let (queue, _handle) = spawn_worker(store.clone(), gen, 4);
        queue.enqueue(job.clone()).await.unwrap();

        let mut settled = false;
        for _ in 0..100 {
            let g = store.find_by_id(job.id).await.unwrap().unwrap();
            if g.status.is_terminal() {
                settled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(settled, "job never settled");
    }

    #[tokio::test]
    async fn enqueue_fails_once_worker_is_gone() {
        let (store, job) = seeded().await;
        let gen = Arc::new(Fixed(None));
        let (queue, handle) = spawn_worker(store, gen, 1);
        handle.abort();
        let _ = handle.await;
        let err = queue.enqueue(job).await.unwrap_err();
        assert!(format!("{err:#}").contains("not running"));
    }
}
