//! [`GenerationBackend`] implementation over a ComfyUI server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use gridgen_core::backend::{
    BackendError, GeneratedImage, GenerationBackend, GenerationOutput, GenerationRequest,
};

use crate::api::{first_output_image, ComfyUIApi};
use crate::client::ComfyUIClient;
use crate::messages::PromptOutcome;
use crate::processor::wait_for_prompt;
use crate::workflow::WorkflowTemplate;

pub struct ComfyUIBackend {
    client: ComfyUIClient,
    api: ComfyUIApi,
    workflow: WorkflowTemplate,
    /// Requests this process has submitted and not yet seen finish.
    pending: Arc<AtomicUsize>,
    /// Last queue depth ComfyUI broadcast.
    queue_remaining: Arc<AtomicUsize>,
}

/// Decrements the pending counter when a request ends, however it ends.
struct PendingGuard(Arc<AtomicUsize>);

impl PendingGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ComfyUIBackend {
    pub fn new(api_url: &str, ws_url: &str, workflow: WorkflowTemplate) -> Self {
        Self {
            client: ComfyUIClient::new(ws_url),
            api: ComfyUIApi::new(api_url),
            workflow,
            pending: Arc::new(AtomicUsize::new(0)),
            queue_remaining: Arc::new(AtomicUsize::new(0)),
        }
    }

    async fn download_first_image(&self, prompt_id: &str) -> Result<GeneratedImage, BackendError> {
        let history = self
            .api
            .get_history(prompt_id)
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        let file = first_output_image(&history, prompt_id).ok_or_else(|| {
            BackendError::Failed(format!("ComfyUI prompt {prompt_id} produced no image"))
        })?;
        let bytes = self
            .api
            .view(&file)
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        GeneratedImage::from_bytes(bytes)
    }
}

#[async_trait]
impl GenerationBackend for ComfyUIBackend {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput, BackendError> {
        let workflow = self
            .workflow
            .render(&request.params)
            .map_err(|e| BackendError::Failed(e.to_string()))?;
        let _pending = PendingGuard::new(&self.pending);

        // Connect first so no execution message for the prompt is missed.
        let mut conn = self
            .client
            .connect()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        let submitted = self
            .api
            .submit_workflow(&workflow, &conn.client_id)
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        let prompt_id = submitted.prompt_id;
        tracing::debug!(
            tag = %request.identity_tag,
            prompt_id = %prompt_id,
            queue_position = submitted.number,
            "Queued ComfyUI prompt",
        );

        let waited = tokio::time::timeout(
            request.timeout,
            wait_for_prompt(&mut conn.ws_stream, &prompt_id, &self.queue_remaining),
        )
        .await;
        let _ = conn.ws_stream.close(None).await;

        let outcome = match waited {
            Ok(result) => result.map_err(|e| BackendError::Unavailable(e.to_string()))?,
            Err(_) => {
                tracing::warn!(prompt_id = %prompt_id, "ComfyUI prompt timed out, removing from queue");
                if let Err(e) = self.api.cancel_execution(&prompt_id).await {
                    tracing::warn!(prompt_id = %prompt_id, error = %e, "Failed to remove timed out prompt");
                }
                return Err(BackendError::Timeout(request.timeout));
            }
        };

        match outcome {
            PromptOutcome::Finished => {}
            PromptOutcome::Interrupted => {
                return Err(BackendError::Failed("Generation was interrupted".to_string()));
            }
            PromptOutcome::Failed {
                exception_type,
                message,
                ..
            } => {
                return Err(BackendError::Failed(format!("{exception_type}: {message}")));
            }
        }

        let image = self.download_first_image(&prompt_id).await?;
        let metadata = serde_json::json!({
            "prompt_id": prompt_id,
            "params": request.params,
        });
        Ok(GenerationOutput {
            image,
            metadata: Some(metadata.to_string()),
        })
    }

    fn queued_requests(&self) -> usize {
        self.pending
            .load(Ordering::SeqCst)
            .max(self.queue_remaining.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pending_guard_counts_in_flight_requests() {
        let backend = ComfyUIBackend::new(
            "http://127.0.0.1:8188",
            "ws://127.0.0.1:8188",
            WorkflowTemplate::new(json!({})),
        );
        assert_eq!(backend.queued_requests(), 0);
        {
            let _a = PendingGuard::new(&backend.pending);
            let _b = PendingGuard::new(&backend.pending);
            assert_eq!(backend.queued_requests(), 2);
        }
        backend.queue_remaining.store(5, Ordering::Relaxed);
        assert_eq!(backend.queued_requests(), 5);
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let backend = ComfyUIBackend::new(
            "http://127.0.0.1:9",
            "ws://127.0.0.1:9",
            WorkflowTemplate::new(json!({})),
        );
        let result = backend
            .generate(GenerationRequest {
                params: Default::default(),
                identity_tag: "1".to_string(),
                timeout: std::time::Duration::from_secs(5),
            })
            .await;
        assert!(matches!(result, Err(BackendError::Unavailable(_))));
        assert_eq!(backend.queued_requests(), 0);
    }
}
