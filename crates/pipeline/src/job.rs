//! One cell's generation task.

use std::sync::Arc;
use std::time::Duration;

use gridgen_core::backend::{GenerationBackend, GenerationOutput, GenerationRequest};
use gridgen_core::error::{GridError, GridResult};
use gridgen_core::grid::OutputType;
use gridgen_core::params::ParamSet;
use gridgen_core::types::SessionContext;
use gridgen_events::GridEvent;

use crate::claim::GenClaim;
use crate::gate::GatePermit;
use crate::run_state::RunState;
use crate::storage::{ImageStore, WebPageWriter};

/// Everything a cell job needs that is the same for the whole run.
pub(crate) struct JobContext {
    pub state: Arc<RunState>,
    pub backend: Arc<dyn GenerationBackend>,
    pub store: Arc<dyn ImageStore>,
    /// Set for web-page runs; cells are written into the grid folder.
    pub page: Option<Arc<WebPageWriter>>,
    pub claim: Arc<GenClaim>,
    pub session: SessionContext,
    pub output_type: OutputType,
    pub show_outputs: bool,
    pub timeout: Duration,
}

/// A cell ready for submission.
#[derive(Debug, Clone)]
pub(crate) struct GenerationJob {
    pub ordinal: usize,
    pub path_key: String,
    pub file_stem: String,
    pub params: ParamSet,
}

/// Keeps a cell registered as in flight, and its gate slot held, until the
/// job task ends.
pub(crate) struct InFlightGuard {
    state: Arc<RunState>,
    ordinal: usize,
    _permit: GatePermit,
}

impl InFlightGuard {
    pub fn new(state: Arc<RunState>, ordinal: usize, permit: GatePermit) -> Self {
        Self {
            state,
            ordinal,
            _permit: permit,
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        // Leave the in-flight set before the permit field is dropped.
        self.state.finish_in_flight(self.ordinal);
    }
}

pub(crate) async fn run_job(ctx: Arc<JobContext>, job: GenerationJob, _guard: InFlightGuard) {
    let request = GenerationRequest {
        params: job.params.clone(),
        identity_tag: format!("grid-cell-{}", job.ordinal),
        timeout: ctx.timeout,
    };

    let result = match ctx.backend.generate(request).await {
        Ok(output) => deliver(&ctx, &job, output).await,
        Err(e) => Err(GridError::Generation {
            ordinal: job.ordinal,
            message: e.to_string(),
        }),
    };

    match result {
        Ok(()) => {
            ctx.state.mark_completed();
            tracing::info!(
                ordinal = job.ordinal,
                "Completed gen #{} (of {})",
                job.ordinal,
                ctx.state.total_cells(),
            );
        }
        Err(e) => ctx.state.fail_cell(job.ordinal, e),
    }
    ctx.claim.complete(1);
}

async fn deliver(ctx: &JobContext, job: &GenerationJob, output: GenerationOutput) -> GridResult<()> {
    let GenerationOutput { image, metadata } = output;

    let url = match &ctx.page {
        Some(page) => page
            .write_cell(&job.file_stem, &image, metadata.as_deref())
            .await?,
        None => ctx
            .store
            .save_image(&ctx.session, &image, job.ordinal, &job.params, metadata.as_deref())
            .await?,
    };

    if ctx.show_outputs {
        ctx.state
            .push_event(GridEvent::image(url, job.ordinal, metadata));
    }
    if ctx.output_type == OutputType::CompositeImage {
        ctx.state.store_generated(job.path_key.clone(), image);
    }
    Ok(())
}
