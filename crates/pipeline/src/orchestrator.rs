//! Walks a run's cells in order and submits them to the backend.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use gridgen_core::error::{GridError, GridResult};
use gridgen_core::expander::Cell;
use gridgen_core::hooks::HookPipeline;
use gridgen_core::params::{raw_value_text, ParamSet, PARAM_NO_PREVIEWS, PARAM_PRESETS};
use gridgen_core::preset::{apply_preset_list, PresetResolver};

use crate::gate::ConcurrencyGate;
use crate::job::{run_job, GenerationJob, InFlightGuard, JobContext};

/// Short pause after each submission while the backend queue is shallow,
/// so cells start in ordinal order.
#[derive(Debug, Clone, Copy)]
pub struct OrderPolicy {
    pub max_requests_forced_order: usize,
    pub order_delay: Duration,
}

pub(crate) struct Orchestrator {
    ctx: Arc<JobContext>,
    gate: ConcurrencyGate,
    hooks: HookPipeline,
    presets: Arc<dyn PresetResolver>,
    order: OrderPolicy,
    dry_run: bool,
}

impl Orchestrator {
    pub fn new(
        ctx: Arc<JobContext>,
        gate: ConcurrencyGate,
        hooks: HookPipeline,
        presets: Arc<dyn PresetResolver>,
        order: OrderPolicy,
        dry_run: bool,
    ) -> Self {
        Self {
            ctx,
            gate,
            hooks,
            presets,
            order,
            dry_run,
        }
    }

    /// Submit `cells` one by one, then wait for every submitted job.
    pub async fn drive(self, cells: Vec<Cell>) -> GridResult<()> {
        let state = Arc::clone(&self.ctx.state);
        let mut jobs = JoinSet::new();

        for cell in cells {
            if self.ctx.claim.should_cancel() {
                state.request_cancel();
                break;
            }
            if state.should_stop_submitting() {
                tracing::debug!(ordinal = cell.ordinal, "Stopping submission");
                break;
            }

            let params = match self.prepare(&cell) {
                Ok(params) => params,
                Err(e) => {
                    state.fail_cell(cell.ordinal, e);
                    self.ctx.claim.complete(1);
                    continue;
                }
            };

            if self.dry_run {
                self.hooks.on_post_dry(&cell, &params);
                self.ctx.claim.complete(1);
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = self.ctx.claim.cancelled() => {
                    state.request_cancel();
                    break;
                }
                permit = self.gate.admit() => permit?,
            };
            // Cancel may land while the permit is handed over.
            if self.ctx.claim.should_cancel() {
                state.request_cancel();
                break;
            }
            if !state.register_in_flight(cell.ordinal) {
                break;
            }

            let job = GenerationJob {
                ordinal: cell.ordinal,
                path_key: cell.path_key.clone(),
                file_stem: cell.file_stem().to_string(),
                params,
            };
            let guard = InFlightGuard::new(Arc::clone(&state), cell.ordinal, permit);
            jobs.spawn(run_job(Arc::clone(&self.ctx), job, guard));

            let queued = self.ctx.backend.queued_requests();
            if !self.order.order_delay.is_zero() && queued < self.order.max_requests_forced_order {
                tracing::debug!(
                    "Grid gen micro-pausing to maintain order as {queued} < {}",
                    self.order.max_requests_forced_order
                );
                tokio::time::sleep(self.order.order_delay).await;
            }
        }

        while let Some(joined) = jobs.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    state.record_error(GridError::Internal(format!("cell job panicked: {e}")));
                }
            }
        }
        Ok(())
    }

    /// Per-cell parameters as sent to the backend: presets applied, hooks
    /// run and previews disabled.
    fn prepare(&self, cell: &Cell) -> GridResult<ParamSet> {
        let mut params = cell.params.clone();
        if let Some(raw) = params.remove(PARAM_PRESETS) {
            let raw = raw_value_text(&raw);
            apply_preset_list(self.presets.as_ref(), &self.ctx.session, &raw, &mut params)?;
        }
        self.hooks.on_apply(cell, &mut params, self.dry_run);
        params.set(PARAM_NO_PREVIEWS, true);
        Ok(params)
    }
}
