//! Shared state of one running grid.
//!
//! The orchestrator, every job task and the progress streamer hold the same
//! `Arc<RunState>`. Mutations go through one `parking_lot::Mutex`; the
//! streamer is woken through a `Notify` whenever there is something new to
//! look at.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use gridgen_core::backend::GeneratedImage;
use gridgen_core::error::GridError;
use gridgen_core::grid::GridSizing;
use gridgen_events::{GridEvent, RunPhase, RunStatus};

#[derive(Debug)]
struct RunInner {
    phase: RunPhase,
    in_flight: BTreeSet<usize>,
    peak_in_flight: usize,
    error: Option<GridError>,
    queue: VecDeque<GridEvent>,
    generated: HashMap<String, GeneratedImage>,
    submitted: usize,
    completed: usize,
    failed: usize,
}

#[derive(Debug)]
pub struct RunState {
    inner: Mutex<RunInner>,
    wake: Notify,
    has_error: AtomicBool,
    fatal: AtomicBool,
    cancel_requested: AtomicBool,
    total_cells: usize,
    continue_on_error: bool,
    sizing: GridSizing,
}

impl RunState {
    pub fn new(total_cells: usize, continue_on_error: bool, sizing: GridSizing) -> Self {
        Self {
            inner: Mutex::new(RunInner {
                phase: RunPhase::Idle,
                in_flight: BTreeSet::new(),
                peak_in_flight: 0,
                error: None,
                queue: VecDeque::new(),
                generated: HashMap::new(),
                submitted: 0,
                completed: 0,
                failed: 0,
            }),
            wake: Notify::new(),
            has_error: AtomicBool::new(false),
            fatal: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            total_cells,
            continue_on_error,
            sizing,
        }
    }

    pub fn total_cells(&self) -> usize {
        self.total_cells
    }

    pub fn continue_on_error(&self) -> bool {
        self.continue_on_error
    }

    // -----------------------------------------------------------------------
    // Phase and flags
    // -----------------------------------------------------------------------

    pub fn set_phase(&self, phase: RunPhase) {
        self.inner.lock().phase = phase;
    }

    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::SeqCst)
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::SeqCst)
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    pub fn request_cancel(&self) {
        if !self.cancel_requested.swap(true, Ordering::SeqCst) {
            tracing::info!("Grid run cancellation requested");
            self.wake.notify_one();
        }
    }

    /// Whether no further cell may be submitted.
    pub fn should_stop_submitting(&self) -> bool {
        self.cancel_requested()
            || self.is_fatal()
            || (self.has_error() && !self.continue_on_error)
    }

    // -----------------------------------------------------------------------
    // In-flight tracking
    // -----------------------------------------------------------------------

    /// Register `ordinal` as in flight, unless submission must stop.
    ///
    /// The stop check and the insert happen under the same lock as error
    /// recording, so no cell is registered after a stopping error lands.
    pub fn register_in_flight(&self, ordinal: usize) -> bool {
        let mut inner = self.inner.lock();
        if self.should_stop_submitting() {
            return false;
        }
        inner.in_flight.insert(ordinal);
        inner.submitted += 1;
        inner.peak_in_flight = inner.peak_in_flight.max(inner.in_flight.len());
        true
    }

    pub fn finish_in_flight(&self, ordinal: usize) {
        self.inner.lock().in_flight.remove(&ordinal);
        self.wake.notify_one();
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.inner.lock().peak_in_flight
    }

    // -----------------------------------------------------------------------
    // Results and errors
    // -----------------------------------------------------------------------

    pub fn mark_completed(&self) {
        self.inner.lock().completed += 1;
    }

    /// Record a run-level error. The first one is kept; later ones are
    /// logged and dropped. Always-fatal errors set the fatal flag either way.
    pub fn record_error(&self, err: GridError) {
        let mut inner = self.inner.lock();
        self.record_locked(&mut inner, err);
        drop(inner);
        self.wake.notify_one();
    }

    /// Record that one cell failed. Under continue-on-error a non-fatal
    /// failure is also reported to the client as a `cell_error`.
    pub fn fail_cell(&self, ordinal: usize, err: GridError) {
        let mut inner = self.inner.lock();
        inner.failed += 1;
        let report = self.continue_on_error && !err.is_always_fatal();
        if report {
            inner.queue.push_back(GridEvent::cell_error(
                err.client_message(),
                ordinal,
                err.code(),
            ));
        }
        self.record_locked(&mut inner, err);
        drop(inner);
        self.wake.notify_one();
    }

    fn record_locked(&self, inner: &mut RunInner, err: GridError) {
        if err.is_always_fatal() {
            self.fatal.store(true, Ordering::SeqCst);
        }
        if inner.error.is_none() {
            tracing::error!(code = err.code(), error = %err, "Grid run error");
            inner.error = Some(err);
            self.has_error.store(true, Ordering::SeqCst);
        } else {
            tracing::warn!(code = err.code(), error = %err, "Additional grid run error");
        }
    }

    /// The first recorded error, if any.
    pub fn error(&self) -> Option<GridError> {
        self.inner.lock().error.clone()
    }

    pub fn store_generated(&self, path_key: impl Into<String>, image: GeneratedImage) {
        self.inner.lock().generated.insert(path_key.into(), image);
    }

    pub fn take_generated(&self) -> HashMap<String, GeneratedImage> {
        std::mem::take(&mut self.inner.lock().generated)
    }

    // -----------------------------------------------------------------------
    // Output queue
    // -----------------------------------------------------------------------

    pub fn push_event(&self, event: GridEvent) {
        self.inner.lock().queue.push_back(event);
        self.wake.notify_one();
    }

    pub fn drain_events(&self) -> Vec<GridEvent> {
        self.inner.lock().queue.drain(..).collect()
    }

    pub fn queue_is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    /// Wait for a wake-up or `timeout`, whichever comes first. Returns
    /// whether a wake-up arrived.
    pub async fn wait_for_wake(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wake.notified())
            .await
            .is_ok()
    }

    /// Snapshot for a `status` event.
    pub fn status(&self, waiting_gens: usize) -> RunStatus {
        let inner = self.inner.lock();
        RunStatus {
            phase: inner.phase,
            total_cells: self.total_cells,
            submitted: inner.submitted,
            completed: inner.completed,
            failed: inner.failed,
            in_flight: inner.in_flight.len(),
            waiting_gens,
            min_width: self.sizing.min_width,
            min_height: self.sizing.min_height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn state(continue_on_error: bool) -> RunState {
        RunState::new(
            4,
            continue_on_error,
            GridSizing {
                min_width: 512,
                min_height: 512,
            },
        )
    }

    #[test]
    fn first_error_wins() {
        let state = state(false);
        state.record_error(GridError::PresetNotFound("a".into()));
        state.record_error(GridError::Internal("later".into()));
        assert_matches!(state.error(), Some(GridError::PresetNotFound(_)));
        assert!(state.is_fatal());
    }

    #[test]
    fn error_blocks_registration() {
        let state = state(false);
        assert!(state.register_in_flight(1));
        state.fail_cell(1, GridError::Generation {
            ordinal: 1,
            message: "boom".into(),
        });
        assert!(!state.register_in_flight(2));
        assert_eq!(state.status(0).submitted, 1);
        assert!(state.drain_events().is_empty());
    }

    #[test]
    fn continue_on_error_keeps_submitting_and_reports_cells() {
        let state = state(true);
        state.fail_cell(2, GridError::Generation {
            ordinal: 2,
            message: "boom".into(),
        });
        assert!(state.register_in_flight(3));
        let events = state.drain_events();
        assert_eq!(events.len(), 1);
        assert_matches!(&events[0], GridEvent::CellError { batch_index, .. } if batch_index == "2");
    }

    #[test]
    fn persistence_stops_even_with_continue_on_error() {
        let state = state(true);
        state.fail_cell(1, GridError::Persistence("disk full".into()));
        assert!(state.should_stop_submitting());
        assert!(state.drain_events().is_empty());
    }

    #[test]
    fn cancel_blocks_registration() {
        let state = state(false);
        state.request_cancel();
        assert!(!state.register_in_flight(1));
    }

    #[test]
    fn in_flight_tracking() {
        let state = state(false);
        assert!(state.register_in_flight(1));
        assert!(state.register_in_flight(2));
        assert_eq!(state.active_count(), 2);
        state.finish_in_flight(1);
        state.finish_in_flight(2);
        assert_eq!(state.active_count(), 0);
        assert_eq!(state.peak_in_flight(), 2);
    }

    #[tokio::test]
    async fn push_wakes_waiter() {
        let state = state(false);
        state.push_event(GridEvent::complete());
        assert!(state.wait_for_wake(Duration::from_millis(50)).await);
        assert!(!state.wait_for_wake(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn repeated_cancel_wakes_only_once() {
        let state = state(false);
        state.request_cancel();
        state.request_cancel();
        state.request_cancel();
        assert!(state.wait_for_wake(Duration::from_millis(50)).await);
        assert!(!state.wait_for_wake(Duration::from_millis(10)).await);
        assert!(state.cancel_requested());
    }
}
