//! Entry point for running one grid end to end.
//!
//! [`GridRunner::run`] validates and expands the request, drives the cells
//! through the backend with bounded concurrency, streams progress to the
//! caller's sink, assembles the composite image when asked for one, and
//! always finishes the stream with exactly one terminal event.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use gridgen_core::axis::parse_axes;
use gridgen_core::backend::GenerationBackend;
use gridgen_core::error::{GridError, GridResult};
use gridgen_core::expander::{expand, CellPlan};
use gridgen_core::grid::{Grid, OutputType};
use gridgen_core::hooks::HookPipeline;
use gridgen_core::layout::MAX_COMPOSITE_AXES;
use gridgen_core::naming::clean_folder_name;
use gridgen_core::params::{ParamSet, STRIPPED_BASE_PARAMS};
use gridgen_core::preset::PresetResolver;
use gridgen_core::types::SessionContext;
use gridgen_events::{GridEvent, ProgressSink, RunPhase, RunStatus};

use crate::claim::{GenClaim, SessionClaims};
use crate::composite::CompositeImageBuilder;
use crate::config::RunnerConfig;
use crate::font::{load_label_font, LabelFont};
use crate::gate::ConcurrencyGate;
use crate::history::HistoryCache;
use crate::job::JobContext;
use crate::orchestrator::{OrderPolicy, Orchestrator};
use crate::request::GridRunRequest;
use crate::run_state::RunState;
use crate::storage::{ImageStore, WebPageWriter};
use crate::streamer::ProgressStreamer;

/// How a run ended.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub phase: RunPhase,
    /// First recorded error, if any.
    pub error: Option<GridError>,
    pub status: RunStatus,
    pub peak_in_flight: usize,
    pub composite_url: Option<String>,
}

impl RunOutcome {
    fn rejected(error: GridError) -> Self {
        Self {
            phase: RunPhase::Failed,
            error: Some(error),
            status: RunStatus {
                phase: RunPhase::Failed,
                ..Default::default()
            },
            peak_in_flight: 0,
            composite_url: None,
        }
    }
}

struct PreparedRun {
    grid: Grid,
    plan: CellPlan,
    page: Option<Arc<WebPageWriter>>,
}

pub struct GridRunner {
    config: RunnerConfig,
    backend: Arc<dyn GenerationBackend>,
    store: Arc<dyn ImageStore>,
    presets: Arc<dyn PresetResolver>,
    history: Arc<HistoryCache>,
    font: Arc<dyn LabelFont>,
    hooks: HookPipeline,
    shutdown: CancellationToken,
}

impl GridRunner {
    pub fn new(
        config: RunnerConfig,
        backend: Arc<dyn GenerationBackend>,
        store: Arc<dyn ImageStore>,
        presets: Arc<dyn PresetResolver>,
    ) -> Self {
        let history = Arc::new(HistoryCache::new(config.output_dir.clone()));
        let font = load_label_font(config.label_font_path.as_deref());
        Self {
            config,
            backend,
            store,
            presets,
            history,
            font,
            hooks: HookPipeline::builtin(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_history(mut self, history: Arc<HistoryCache>) -> Self {
        self.history = history;
        self
    }

    pub fn with_font(mut self, font: Arc<dyn LabelFont>) -> Self {
        self.font = font;
        self
    }

    pub fn with_hooks(mut self, hooks: HookPipeline) -> Self {
        self.hooks = hooks;
        self
    }

    /// Runs still streaming when `shutdown` fires are aborted.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn history(&self) -> &Arc<HistoryCache> {
        &self.history
    }

    /// Run `request` for `session`, sending every event to `sink`.
    pub async fn run(
        &self,
        session: &Arc<SessionClaims>,
        request: GridRunRequest,
        sink: Arc<dyn ProgressSink>,
    ) -> RunOutcome {
        let guard = session.claim(1);
        let claim = guard.claim();
        let context = SessionContext::new(session.user_id());

        let prepared = match self.prepare(&request, &context).await {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!(user_id = %context.user_id, code = e.code(), error = %e, "Grid run rejected");
                let _ = sink.send(GridEvent::error(e.client_message(), e.code())).await;
                return RunOutcome::rejected(e);
            }
        };
        let PreparedRun { grid, plan, page } = prepared;
        let total = plan.len();

        if request.dry_run {
            self.hooks.on_pre_dry(&grid);
        } else {
            self.hooks.on_pre_run(&grid);
        }
        claim.extend(total);

        let state = Arc::new(RunState::new(total, request.continue_on_error, plan.sizing));
        state.set_phase(RunPhase::Running);
        state.push_event(GridEvent::status(state.status(session.waiting_gens())));
        tracing::info!(
            user_id = %context.user_id,
            output_type = grid.output_type.as_str(),
            dry_run = request.dry_run,
            "Starting grid run of {total} cells",
        );

        if let (Some(page), Some(saved), false) = (&page, &request.save_config, request.dry_run) {
            match page.write_saved_config(saved).await {
                Ok(()) => self.history.invalidate(&context.user_id),
                Err(e) => state.record_error(e.into()),
            }
        }

        let ctx = Arc::new(JobContext {
            state: Arc::clone(&state),
            backend: Arc::clone(&self.backend),
            store: Arc::clone(&self.store),
            page,
            claim: Arc::clone(&claim),
            session: context.clone(),
            output_type: grid.output_type,
            show_outputs: request.show_outputs,
            timeout: self.config.per_request_timeout,
        });
        let orchestrator = Orchestrator::new(
            ctx,
            ConcurrencyGate::new(self.config.max_simultaneous_gens),
            self.hooks.clone(),
            Arc::clone(&self.presets),
            OrderPolicy {
                max_requests_forced_order: self.config.max_requests_forced_order,
                order_delay: self.config.order_delay,
            },
            request.dry_run,
        );
        let main = tokio::spawn(orchestrator.drive(plan.cells));

        let mut streamer = ProgressStreamer::new(
            Arc::clone(&state),
            Arc::clone(&sink),
            Arc::clone(&claim),
            self.config.stream_poll_interval,
            self.shutdown.clone(),
        );
        streamer.pump(main).await;
        let sink_open = !streamer.sink_closed();

        let mut phase = resolve_phase(&state, &claim);
        let mut composite_url = None;
        if phase == RunPhase::Completed
            && grid.output_type == OutputType::CompositeImage
            && !request.dry_run
        {
            match self.write_composite(&grid, &state, &context, total).await {
                Ok(Some((url, batch_id, metadata))) => {
                    if sink_open {
                        let _ = sink
                            .send(GridEvent::image(url.clone(), batch_id, metadata))
                            .await;
                    }
                    composite_url = Some(url);
                }
                Ok(None) => {}
                Err(e) => {
                    state.record_error(e);
                    phase = RunPhase::Failed;
                }
            }
        }

        state.set_phase(phase);
        if phase == RunPhase::Failed {
            let err = state
                .error()
                .unwrap_or_else(|| GridError::Internal("run failed without an error".to_string()));
            tracing::error!(user_id = %context.user_id, code = err.code(), error = %err, "Grid run failed");
            if sink_open {
                let _ = sink.send(GridEvent::error(err.client_message(), err.code())).await;
            }
        } else {
            if phase == RunPhase::Completed {
                claim.complete(1);
            }
            let status = state.status(session.waiting_gens());
            tracing::info!(
                user_id = %context.user_id,
                phase = %phase,
                completed = status.completed,
                failed = status.failed,
                unclaimed = claim.owed(),
                "Grid run finished",
            );
            if sink_open {
                let _ = sink.send(GridEvent::status(status)).await;
                let _ = sink.send(GridEvent::complete()).await;
            }
        }

        RunOutcome {
            phase,
            error: state.error(),
            status: state.status(session.waiting_gens()),
            peak_in_flight: state.peak_in_flight(),
            composite_url,
        }
    }

    async fn prepare(
        &self,
        request: &GridRunRequest,
        session: &SessionContext,
    ) -> GridResult<PreparedRun> {
        let mut base = ParamSet::from_json(&request.base_params)?;
        for name in STRIPPED_BASE_PARAMS {
            base.remove(name);
        }
        let folder = clean_folder_name(&request.output_folder_name)?;

        let axes = parse_axes(&request.grid_axes)?;
        if request.output_type == OutputType::CompositeImage {
            if axes.len() > MAX_COMPOSITE_AXES {
                return Err(GridError::UnsupportedLayout {
                    got: axes.len(),
                    max: MAX_COMPOSITE_AXES,
                });
            }
            if axes.is_empty() {
                return Err(GridError::Configuration(
                    "A composite grid image needs at least one axis".to_string(),
                ));
            }
        }

        let grid = Grid {
            axes,
            initial_params: base,
            output_type: request.output_type,
            format: self.config.image_format.clone(),
            publish_metadata: request.publish_metadata,
        };
        let plan = expand(&grid, &self.hooks)?;

        let page = match request.output_type {
            OutputType::WebPage => {
                let writer = WebPageWriter::new(
                    self.config.user_output_dir(&session.user_id).join(&folder),
                    format!("{}/{folder}", self.config.user_url_prefix(&session.user_id)),
                    self.config.image_format.clone(),
                    request.publish_metadata,
                );
                if !request.dry_run {
                    writer.prepare(request.do_overwrite).await?;
                }
                Some(Arc::new(writer))
            }
            OutputType::CompositeImage => None,
        };

        Ok(PreparedRun { grid, plan, page })
    }

    /// Build and store the composite. `None` when no cell produced an image.
    async fn write_composite(
        &self,
        grid: &Grid,
        state: &RunState,
        session: &SessionContext,
        total: usize,
    ) -> GridResult<Option<(String, usize, Option<String>)>> {
        let generated = state.take_generated();
        if generated.is_empty() {
            tracing::warn!("No cell images were generated, skipping the grid image");
            return Ok(None);
        }

        let builder = CompositeImageBuilder::new(Arc::clone(&self.font), self.config.image_format());
        let axes = grid.axes.clone();
        let (_, image) = tokio::task::spawn_blocking(move || builder.build(&axes, &generated))
            .await
            .map_err(|e| GridError::Internal(format!("composite task failed: {e}")))??;

        let batch_id = total + 1;
        let metadata = grid
            .publish_metadata
            .then(|| grid.initial_params.to_json().to_string());
        let url = self
            .store
            .save_image(session, &image, batch_id, &grid.initial_params, metadata.as_deref())
            .await?;
        Ok(Some((url, batch_id, metadata)))
    }
}

fn resolve_phase(state: &RunState, claim: &GenClaim) -> RunPhase {
    if state.is_fatal() || (state.has_error() && !state.continue_on_error()) {
        RunPhase::Failed
    } else if state.cancel_requested() || claim.should_cancel() {
        RunPhase::Cancelled
    } else {
        RunPhase::Completed
    }
}
