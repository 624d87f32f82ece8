//! Forwards queued run events to the client while the run is live.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use gridgen_core::error::{GridError, GridResult};
use gridgen_events::ProgressSink;

use crate::claim::GenClaim;
use crate::run_state::RunState;

pub(crate) struct ProgressStreamer {
    state: Arc<RunState>,
    sink: Arc<dyn ProgressSink>,
    claim: Arc<GenClaim>,
    poll_interval: Duration,
    shutdown: CancellationToken,
    sink_closed: bool,
}

impl ProgressStreamer {
    pub fn new(
        state: Arc<RunState>,
        sink: Arc<dyn ProgressSink>,
        claim: Arc<GenClaim>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            state,
            sink,
            claim,
            poll_interval,
            shutdown,
            sink_closed: false,
        }
    }

    /// Whether the client went away during the run.
    pub fn sink_closed(&self) -> bool {
        self.sink_closed
    }

    /// Stream events until `main` has finished, nothing is in flight and
    /// the queue is empty.
    pub async fn pump(&mut self, mut main: JoinHandle<GridResult<()>>) {
        let mut main_done = false;
        loop {
            if main_done {
                tokio::select! {
                    _ = self.state.wait_for_wake(self.poll_interval) => {}
                    _ = self.shutdown.cancelled() => {
                        self.abort_for_shutdown(None);
                        return;
                    }
                }
            } else {
                tokio::select! {
                    joined = &mut main => {
                        main_done = true;
                        match joined {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => self.state.record_error(e),
                            Err(e) => self.state.record_error(GridError::Internal(format!(
                                "grid orchestrator failed: {e}"
                            ))),
                        }
                    }
                    _ = self.state.wait_for_wake(self.poll_interval) => {}
                    _ = self.shutdown.cancelled() => {
                        self.abort_for_shutdown(Some(&main));
                        return;
                    }
                }
            }

            if self.claim.should_cancel() && !self.state.cancel_requested() {
                self.state.request_cancel();
            }
            self.flush().await;

            if main_done && self.state.active_count() == 0 && self.state.queue_is_empty() {
                break;
            }
        }
    }

    async fn flush(&mut self) {
        for event in self.state.drain_events() {
            if self.sink_closed {
                continue;
            }
            if let Err(e) = self.sink.send(event).await {
                tracing::warn!(error = %e, "Progress sink failed, cancelling grid run");
                self.sink_closed = true;
                self.claim.cancel();
                self.state.request_cancel();
            }
        }
    }

    fn abort_for_shutdown(&self, main: Option<&JoinHandle<GridResult<()>>>) {
        tracing::warn!("Server shutting down, aborting grid run");
        self.claim.cancel();
        self.state
            .record_error(GridError::Internal("server shutting down".to_string()));
        if let Some(main) = main {
            main.abort();
        }
    }
}
