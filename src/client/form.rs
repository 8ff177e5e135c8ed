use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{is_overload_message, ClientError, GenerationUpload, StudioClient};
use crate::generations::{dto::GenerationView, GenerationStatus, Style};

pub const MAX_MANUAL_RETRIES: u32 = 3;
pub const MAX_PROMPT_CHARS: usize = 500;
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Counts manual resubmissions against a fixed cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryTracker {
    max: u32,
    count: u32,
}

impl RetryTracker {
    pub fn new(max: u32) -> Self {
        Self { max, count: 0 }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn can_retry(&self) -> bool {
        self.count < self.max
    }

    /// Uses one retry and returns its ordinal, or `None` once the cap is hit.
    pub fn next(&mut self) -> Option<u32> {
        if !self.can_retry() {
            return None;
        }
        self.count += 1;
        Some(self.count)
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

impl Default for RetryTracker {
    fn default() -> Self {
        Self::new(MAX_MANUAL_RETRIES)
    }
}

/// Text inputs of the form; restorable from a past generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormDraft {
    pub prompt: String,
    pub style: Option<Style>,
    pub input_image_url: Option<String>,
}

impl From<&GenerationView> for FormDraft {
    fn from(g: &GenerationView) -> Self {
        Self {
            prompt: g.prompt.clone(),
            style: g.style,
            input_image_url: Some(g.input_image_url.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SelectedImage {
    pub bytes: Bytes,
    pub file_name: String,
    pub content_type: String,
}

pub struct GenerationForm {
    client: Arc<StudioClient>,
    draft: FormDraft,
    image: Option<SelectedImage>,
    retries: RetryTracker,
    last_error: Option<String>,
    last_upload: Option<GenerationUpload>,
    submitting: bool,
}

impl GenerationForm {
    pub fn new(client: Arc<StudioClient>) -> Self {
        Self {
            client,
            draft: FormDraft::default(),
            image: None,
            retries: RetryTracker::default(),
            last_error: None,
            last_upload: None,
            submitting: false,
        }
    }

    pub fn draft(&self) -> &FormDraft {
        &self.draft
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.draft.prompt = prompt.into();
    }

    pub fn set_style(&mut self, style: Option<Style>) {
        self.draft.style = style;
    }

    pub fn image(&self) -> Option<&SelectedImage> {
        self.image.as_ref()
    }

    /// Picks a local file. Non-images and oversized files are refused and the
    /// previous selection is kept.
    pub fn select_image(&mut self, image: SelectedImage) -> Result<(), ClientError> {
        if !image.content_type.starts_with("image/") {
            return Err(self.fail_locally("Please select a valid image file"));
        }
        if image.bytes.len() > MAX_IMAGE_BYTES {
            return Err(self.fail_locally("Image must be less than 5MB"));
        }
        self.last_error = None;
        self.image = Some(image);
        Ok(())
    }

    pub fn clear_image(&mut self) {
        self.image = None;
    }

    /// Refills the form from a past generation, downloading its input image.
    pub async fn restore(&mut self, draft: FormDraft) -> Result<(), ClientError> {
        if let Some(url) = draft.input_image_url.as_deref() {
            let (bytes, content_type) = self.client.fetch_image(url).await?;
            let file_name = url.rsplit('/').next().unwrap_or("image").to_string();
            self.image = Some(SelectedImage {
                bytes,
                file_name,
                content_type,
            });
        }
        self.draft = draft;
        self.last_error = None;
        Ok(())
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retries.count()
    }

    /// Feeds back the final state of a generation this form started, so a
    /// failed one can be retried.
    pub fn observe(&mut self, generation: &GenerationView) {
        if generation.status == GenerationStatus::Failed {
            self.last_error = generation.error_message.clone();
        }
    }

    pub fn can_retry(&self) -> bool {
        self.last_upload.is_some()
            && self.retries.can_retry()
            && self.last_error.as_deref().is_some_and(is_overload_message)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.image.is_none() {
            return Err("Please select an image".into());
        }
        let prompt = self.draft.prompt.trim();
        if prompt.is_empty() {
            return Err("Please enter a prompt".into());
        }
        if prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(format!("Prompt must be at most {MAX_PROMPT_CHARS} characters"));
        }
        Ok(())
    }

    pub async fn submit(&mut self, cancel: &CancellationToken) -> Result<GenerationView, ClientError> {
        if let Err(msg) = self.validate() {
            return Err(self.fail_locally(&msg));
        }
        let Some(image) = self.image.clone() else {
            return Err(self.fail_locally("Please select an image"));
        };
        let upload = GenerationUpload {
            image: image.bytes,
            file_name: image.file_name,
            content_type: image.content_type,
            prompt: self.draft.prompt.trim().to_string(),
            style: self.draft.style,
            retry_count: None,
        };
        self.last_upload = Some(upload.clone());
        let generation = self.send(upload, cancel).await?;
        self.retries.reset();
        Ok(generation)
    }

    /// Resubmits the last upload unchanged, tagged with the retry ordinal.
    pub async fn retry(&mut self, cancel: &CancellationToken) -> Result<GenerationView, ClientError> {
        if !self.can_retry() {
            return Err(ClientError::RetryUnavailable);
        }
        let (Some(mut upload), Some(n)) = (self.last_upload.clone(), self.retries.next()) else {
            return Err(ClientError::RetryUnavailable);
        };
        info!(attempt = n, max = MAX_MANUAL_RETRIES, "retrying generation");
        upload.retry_count = Some(n);
        self.send(upload, cancel).await
    }

    async fn send(
        &mut self,
        upload: GenerationUpload,
        cancel: &CancellationToken,
    ) -> Result<GenerationView, ClientError> {
        self.submitting = true;
        let client = self.client.clone();
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::Aborted),
            res = client.create_generation(&upload) => res,
        };
        self.submitting = false;

        match res {
            Ok(created) => {
                self.draft = FormDraft::default();
                self.image = None;
                self.last_error = None;
                Ok(created.generation)
            }
            Err(ClientError::Aborted) => {
                debug!("generation request aborted");
                Err(ClientError::Aborted)
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn fail_locally(&mut self, msg: &str) -> ClientError {
        self.last_error = Some(msg.to_string());
        ClientError::Validation(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn form() -> GenerationForm {
        GenerationForm::new(Arc::new(StudioClient::new("http://127.0.0.1:9").unwrap()))
    }

    fn png() -> SelectedImage {
        SelectedImage {
            bytes: Bytes::from_static(b"\x89PNG\r\n\x1a\n"),
            file_name: "in.png".into(),
            content_type: "image/png".into(),
        }
    }

    fn failed(message: &str) -> GenerationView {
        GenerationView {
            id: 1,
            status: GenerationStatus::Failed,
            prompt: "p".into(),
            style: None,
            input_image_url: "/uploads/in.png".into(),
            output_image_url: None,
            error_message: Some(message.into()),
            retry_count: 0,
            created_at: OffsetDateTime::now_utc(),
            completed_at: Some(OffsetDateTime::now_utc()),
        }
    }

    #[test]
    fn tracker_caps_at_three() {
        let mut t = RetryTracker::default();
        assert_eq!(t.next(), Some(1));
        assert_eq!(t.next(), Some(2));
        assert_eq!(t.next(), Some(3));
        assert!(!t.can_retry());
        assert_eq!(t.next(), None);
        assert_eq!(t.count(), 3);
        t.reset();
        assert!(t.can_retry());
        assert_eq!(t.count(), 0);
    }

    #[test]
    fn validation_order() {
        let mut f = form();
        assert_eq!(f.validate().unwrap_err(), "Please select an image");
        f.select_image(png()).unwrap();
        assert_eq!(f.validate().unwrap_err(), "Please enter a prompt");
        f.set_prompt("x".repeat(501));
        assert!(f.validate().unwrap_err().contains("500"));
        f.set_prompt("  a red dress  ");
        assert!(f.validate().is_ok());
    }

    #[test]
    fn non_images_are_refused() {
        let mut f = form();
        let err = f
            .select_image(SelectedImage {
                bytes: Bytes::from_static(b"hello"),
                file_name: "notes.txt".into(),
                content_type: "text/plain".into(),
            })
            .unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        assert!(f.image().is_none());
        assert!(f.last_error().is_some());
    }

    #[tokio::test]
    async fn invalid_submit_never_hits_the_network() {
        let mut f = form();
        let err = f.submit(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(m) if m == "Please select an image"));
        assert!(!f.is_submitting());
    }

    #[tokio::test]
    async fn abort_keeps_the_draft_and_reenables_the_form() {
        let mut f = form();
        f.select_image(png()).unwrap();
        f.set_prompt("a red dress");
        f.set_style(Some(Style::Modern));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = f.submit(&cancel).await.unwrap_err();
        assert!(matches!(err, ClientError::Aborted));
        assert!(!f.is_submitting());
        assert_eq!(f.draft().prompt, "a red dress");
        assert_eq!(f.draft().style, Some(Style::Modern));
        assert!(f.image().is_some());
    }

    #[tokio::test]
    async fn retry_requires_an_overload_error() {
        let mut f = form();
        f.select_image(png()).unwrap();
        f.set_prompt("a red dress");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let _ = f.submit(&cancel).await;

        f.observe(&failed("Invalid prompt. Please try a different description."));
        assert!(!f.can_retry());
        assert!(matches!(
            f.retry(&cancel).await.unwrap_err(),
            ClientError::RetryUnavailable
        ));

        f.observe(&failed("AI model is currently overloaded. Please try again."));
        assert!(f.can_retry());
    }

    #[tokio::test]
    async fn each_retry_attempt_is_counted_until_the_cap() {
        let mut f = form();
        f.select_image(png()).unwrap();
        f.set_prompt("a red dress");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let _ = f.submit(&cancel).await;
        f.observe(&failed("Model Overload"));

        for attempt in 1..=3 {
            assert!(matches!(f.retry(&cancel).await, Err(ClientError::Aborted)));
            assert_eq!(f.retry_count(), attempt);
        }
        assert!(!f.can_retry());
        assert!(matches!(
            f.retry(&cancel).await.unwrap_err(),
            ClientError::RetryUnavailable
        ));
    }
}
