//! Per-session generation claims.
//!
//! A [`SessionClaims`] tracks how many generations a session still owes and
//! carries the session-wide interrupt. Each run takes a [`GenClaim`] through
//! a [`ClaimGuard`], extends it by the number of cells it plans, and
//! completes it as cells finish. Whatever is still owed when the guard drops
//! is given back to the session exactly once.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use gridgen_core::types::UserId;

/// Generation accounting shared by every run of one session.
#[derive(Debug)]
pub struct SessionClaims {
    user_id: UserId,
    waiting_gens: AtomicUsize,
    live_claims: AtomicUsize,
    interrupt: Mutex<CancellationToken>,
}

impl SessionClaims {
    pub fn new(user_id: impl Into<UserId>) -> Arc<Self> {
        Arc::new(Self {
            user_id: user_id.into(),
            waiting_gens: AtomicUsize::new(0),
            live_claims: AtomicUsize::new(0),
            interrupt: Mutex::new(CancellationToken::new()),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Generations claimed by this session and not yet completed.
    pub fn waiting_gens(&self) -> usize {
        self.waiting_gens.load(Ordering::SeqCst)
    }

    /// Claims currently held by runs of this session.
    pub fn live_claims(&self) -> usize {
        self.live_claims.load(Ordering::SeqCst)
    }

    /// Take a claim for `gens` generations.
    pub fn claim(self: &Arc<Self>, gens: usize) -> ClaimGuard {
        let token = self.interrupt.lock().child_token();
        self.live_claims.fetch_add(1, Ordering::SeqCst);
        self.waiting_gens.fetch_add(gens, Ordering::SeqCst);
        ClaimGuard(Arc::new(GenClaim {
            session: Arc::clone(self),
            token,
            owed: AtomicUsize::new(gens),
            released: AtomicBool::new(false),
        }))
    }

    /// Cancel every claim currently held by this session. Claims taken
    /// afterwards are unaffected.
    pub fn interrupt_all(&self) {
        let mut interrupt = self.interrupt.lock();
        interrupt.cancel();
        *interrupt = CancellationToken::new();
        tracing::info!(user_id = %self.user_id, "Interrupted all session generations");
    }
}

/// One run's share of its session's generation accounting.
#[derive(Debug)]
pub struct GenClaim {
    session: Arc<SessionClaims>,
    token: CancellationToken,
    owed: AtomicUsize,
    released: AtomicBool,
}

impl GenClaim {
    /// Whether the run should stop submitting work.
    pub fn should_cancel(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Request cancellation of the run holding this claim.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Generations still owed by this claim.
    pub fn owed(&self) -> usize {
        self.owed.load(Ordering::SeqCst)
    }

    /// Add `gens` generations to the claim.
    pub fn extend(&self, gens: usize) {
        if self.released.load(Ordering::SeqCst) {
            return;
        }
        self.owed.fetch_add(gens, Ordering::SeqCst);
        self.session.waiting_gens.fetch_add(gens, Ordering::SeqCst);
    }

    /// Mark `gens` generations as done. Never goes below zero.
    pub fn complete(&self, gens: usize) {
        let taken = self
            .owed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |owed| {
                Some(owed.saturating_sub(gens))
            })
            .map(|before| before.min(gens))
            .unwrap_or(0);
        if taken > 0 {
            self.session.waiting_gens.fetch_sub(taken, Ordering::SeqCst);
        }
    }

    /// Give back everything still owed. Only the first call has an effect.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let remaining = self.owed.swap(0, Ordering::SeqCst);
        if remaining > 0 {
            self.session.waiting_gens.fetch_sub(remaining, Ordering::SeqCst);
        }
        self.session.live_claims.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns a [`GenClaim`] and releases it when dropped.
#[derive(Debug)]
pub struct ClaimGuard(Arc<GenClaim>);

impl ClaimGuard {
    /// Shared handle for tasks that outlive a borrow of the guard.
    pub fn claim(&self) -> Arc<GenClaim> {
        Arc::clone(&self.0)
    }
}

impl Deref for ClaimGuard {
    type Target = GenClaim;

    fn deref(&self) -> &GenClaim {
        &self.0
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accounting_follows_a_run() {
        let session = SessionClaims::new("alice");
        {
            let guard = session.claim(1);
            guard.extend(4);
            assert_eq!(session.waiting_gens(), 5);
            guard.complete(1);
            guard.complete(1);
            assert_eq!(guard.owed(), 3);
            assert_eq!(session.waiting_gens(), 3);
        }
        assert_eq!(session.waiting_gens(), 0);
        assert_eq!(session.live_claims(), 0);
    }

    #[test]
    fn complete_saturates_and_release_is_idempotent() {
        let session = SessionClaims::new("bob");
        let guard = session.claim(2);
        guard.complete(5);
        assert_eq!(guard.owed(), 0);
        assert_eq!(session.waiting_gens(), 0);

        guard.extend(3);
        guard.release();
        guard.release();
        assert_eq!(session.waiting_gens(), 0);
        guard.extend(2);
        assert_eq!(session.waiting_gens(), 0);
        drop(guard);
        assert_eq!(session.live_claims(), 0);
    }

    #[test]
    fn interrupt_cancels_existing_claims_only() {
        let session = SessionClaims::new("carol");
        let before = session.claim(1);
        session.interrupt_all();
        let after = session.claim(1);
        assert!(before.should_cancel());
        assert!(!after.should_cancel());
    }

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let session = SessionClaims::new("dave");
        let guard = session.claim(1);
        let claim = guard.claim();
        let waiter = tokio::spawn(async move { claim.cancelled().await });
        guard.cancel();
        waiter.await.unwrap();
        assert!(guard.should_cancel());
    }
}
