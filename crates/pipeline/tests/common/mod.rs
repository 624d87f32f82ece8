#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use gridgen_core::backend::{
    BackendError, GeneratedImage, GenerationBackend, GenerationOutput, GenerationRequest,
};
use gridgen_core::params::ParamSet;
use gridgen_core::preset::{InMemoryPresets, Preset};
use gridgen_core::types::SessionContext;
use gridgen_events::{GridEvent, ProgressSink, SinkError};
use gridgen_pipeline::font::FixedMetricsFont;
use gridgen_pipeline::{GridRunner, ImageStore, RunnerConfig, StoreError};

pub const USER: &str = "tester";

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Deterministic backend producing black images sized by the cell's
/// width/height params.
#[derive(Default)]
pub struct FakeBackend {
    delay: Duration,
    fail_ordinals: HashSet<usize>,
    /// When set, every generation waits for a permit before finishing.
    hold: Option<Arc<Semaphore>>,
    calls: Mutex<Vec<ParamSet>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_on(mut self, ordinals: &[usize]) -> Self {
        self.fail_ordinals = ordinals.iter().copied().collect();
        self
    }

    pub fn held_by(mut self, hold: Arc<Semaphore>) -> Self {
        self.hold = Some(hold);
        self
    }

    pub fn calls(&self) -> Vec<ParamSet> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

fn ordinal_of(tag: &str) -> usize {
    tag.rsplit('-')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl GenerationBackend for FakeBackend {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput, BackendError> {
        self.calls.lock().push(request.params.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(hold) = &self.hold {
            if let Ok(permit) = hold.acquire().await {
                permit.forget();
            }
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail_ordinals.contains(&ordinal_of(&request.identity_tag)) {
            return Err(BackendError::Failed("out of memory".to_string()));
        }
        let image = DynamicImage::new_rgb8(
            request.params.image_width(),
            request.params.image_height(),
        );
        Ok(GenerationOutput {
            image: GeneratedImage::encode(&image, ImageFormat::Png)
                .map_err(|e| BackendError::InvalidOutput(e.to_string()))?,
            metadata: Some(format!("{{\"tag\":\"{}\"}}", request.identity_tag)),
        })
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SavedImage {
    pub batch_id: usize,
    pub image: GeneratedImage,
    pub metadata: Option<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    fail: bool,
    saved: Mutex<Vec<SavedImage>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn saved(&self) -> Vec<SavedImage> {
        self.saved.lock().clone()
    }
}

#[async_trait]
impl ImageStore for MemoryStore {
    async fn save_image(
        &self,
        _session: &SessionContext,
        image: &GeneratedImage,
        batch_id: usize,
        _params: &ParamSet,
        metadata: Option<&str>,
    ) -> Result<String, StoreError> {
        if self.fail {
            return Err(StoreError::Rejected("disk full".to_string()));
        }
        self.saved.lock().push(SavedImage {
            batch_id,
            image: image.clone(),
            metadata: metadata.map(str::to_string),
        });
        Ok(format!("/mem/{batch_id}.png"))
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<GridEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GridEvent> {
        self.events.lock().clone()
    }

    pub fn terminal(&self) -> Option<GridEvent> {
        self.events.lock().last().cloned().filter(GridEvent::is_terminal)
    }

    pub fn images(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                GridEvent::Image {
                    image, batch_index, ..
                } => Some((image.clone(), batch_index.clone())),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn send(&self, event: GridEvent) -> Result<(), SinkError> {
        self.events.lock().push(event);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

pub fn test_config(output_dir: &Path, max_simultaneous_gens: usize) -> RunnerConfig {
    RunnerConfig {
        output_dir: output_dir.to_path_buf(),
        max_simultaneous_gens,
        per_request_timeout: Duration::from_secs(30),
        order_delay: Duration::ZERO,
        stream_poll_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

pub fn presets() -> InMemoryPresets {
    let mut presets = InMemoryPresets::new();
    let params = ParamSet::from_json(&serde_json::json!({"steps": 30})).unwrap();
    presets
        .insert(USER, Preset::new("Detailed", params))
        .unwrap();
    presets
}

pub fn build_runner(
    config: RunnerConfig,
    backend: Arc<FakeBackend>,
    store: Arc<MemoryStore>,
) -> GridRunner {
    GridRunner::new(config, backend, store, Arc::new(presets()))
        .with_font(Arc::new(FixedMetricsFont::default()))
}
