use std::{collections::BTreeSet, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{form::FormDraft, ClientError, StudioClient};
use crate::generations::{dto::GenerationView, GenerationStatus};

pub const MAX_VISIBLE: usize = 5;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// The "recent generations" panel: a short list plus the ids still being
/// polled until they settle.
pub struct Dashboard {
    client: Arc<StudioClient>,
    generations: Vec<GenerationView>,
    polling: BTreeSet<i64>,
    poll_interval: Duration,
}

impl Dashboard {
    pub fn new(client: Arc<StudioClient>) -> Self {
        Self {
            client,
            generations: Vec::new(),
            polling: BTreeSet::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn generations(&self) -> &[GenerationView] {
        &self.generations
    }

    pub fn is_polling(&self, id: i64) -> bool {
        self.polling.contains(&id)
    }

    pub fn polling_count(&self) -> usize {
        self.polling.len()
    }

    pub async fn load(&mut self) -> Result<(), ClientError> {
        let recent = self.client.recent_generations(Some(MAX_VISIBLE as u32)).await?;
        self.polling = recent
            .iter()
            .filter(|g| g.status == GenerationStatus::Processing)
            .map(|g| g.id)
            .collect();
        self.generations = recent;
        self.generations.truncate(MAX_VISIBLE);
        Ok(())
    }

    pub fn on_created(&mut self, generation: GenerationView) {
        self.generations.retain(|g| g.id != generation.id);
        if generation.status == GenerationStatus::Processing {
            self.polling.insert(generation.id);
        }
        self.generations.insert(0, generation);
        self.generations.truncate(MAX_VISIBLE);
    }

    /// Refreshes every polled generation once and returns the ones that
    /// reached a terminal status on this pass. Ids the server answers with
    /// 403 or 404 are dropped; other errors keep the id polled.
    pub async fn poll_once(&mut self) -> Vec<GenerationView> {
        let ids: Vec<i64> = self.polling.iter().copied().collect();
        let mut settled = Vec::new();
        for id in ids {
            match self.client.get_generation(id).await {
                Ok(fresh) => {
                    if let Some(slot) = self.generations.iter_mut().find(|g| g.id == id) {
                        *slot = fresh.clone();
                    }
                    if fresh.status.is_terminal() {
                        debug!(generation_id = id, status = %fresh.status, "generation settled");
                        self.polling.remove(&id);
                        settled.push(fresh);
                    }
                }
                Err(ClientError::Api {
                    status: status @ (403 | 404),
                    message,
                }) => {
                    warn!(generation_id = id, status, %message, "generation is gone; stop polling");
                    self.polling.remove(&id);
                }
                Err(e) => warn!(generation_id = id, error = %e, "failed to poll generation"),
            }
        }
        settled
    }

    /// Polls on a fixed interval until nothing is in flight or `cancel` fires.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Vec<GenerationView> {
        let mut settled = Vec::new();
        while !self.polling.is_empty() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
            settled.extend(self.poll_once().await);
        }
        settled
    }

    /// Form contents to resubmit a past generation.
    pub fn restore(&self, id: i64) -> Option<FormDraft> {
        self.generations
            .iter()
            .find(|g| g.id == id)
            .map(FormDraft::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generations::Style;
    use time::OffsetDateTime;

    fn view(id: i64, status: GenerationStatus) -> GenerationView {
        GenerationView {
            id,
            status,
            prompt: format!("prompt {id}"),
            style: Some(Style::Vintage),
            input_image_url: format!("/uploads/{id}.png"),
            output_image_url: None,
            error_message: None,
            retry_count: 0,
            created_at: OffsetDateTime::now_utc(),
            completed_at: None,
        }
    }

    fn dashboard() -> Dashboard {
        Dashboard::new(Arc::new(StudioClient::new("http://127.0.0.1:9").unwrap()))
    }

    #[test]
    fn created_generations_are_prepended_and_capped() {
        let mut d = dashboard();
        for id in 1..=7 {
            d.on_created(view(id, GenerationStatus::Processing));
        }
        let ids: Vec<i64> = d.generations().iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![7, 6, 5, 4, 3]);
        // dropped off the list but still in flight
        assert!(d.is_polling(1));
        assert_eq!(d.polling_count(), 7);
    }

    #[test]
    fn settled_creations_are_not_polled() {
        let mut d = dashboard();
        d.on_created(view(1, GenerationStatus::Failed));
        assert!(!d.is_polling(1));
        assert_eq!(d.generations().len(), 1);
    }

    #[test]
    fn restore_returns_the_original_inputs() {
        let mut d = dashboard();
        d.on_created(view(4, GenerationStatus::Completed));
        let draft = d.restore(4).unwrap();
        assert_eq!(draft.prompt, "prompt 4");
        assert_eq!(draft.style, Some(Style::Vintage));
        assert_eq!(draft.input_image_url.as_deref(), Some("/uploads/4.png"));
        assert!(d.restore(99).is_none());
    }

    #[tokio::test]
    async fn run_returns_immediately_with_nothing_in_flight() {
        let mut d = dashboard();
        let settled = d.run(&CancellationToken::new()).await;
        assert!(settled.is_empty());
    }

    #[tokio::test]
    async fn run_stops_when_cancelled() {
        let mut d = dashboard().with_poll_interval(Duration::from_secs(60));
        d.on_created(view(1, GenerationStatus::Processing));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let settled = d.run(&cancel).await;
        assert!(settled.is_empty());
        assert!(d.is_polling(1));
    }
}
