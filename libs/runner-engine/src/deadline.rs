//! Deadline Controller
//!
//! A deadline is an explicit value: [`with_deadline`] returns a [`DeadlineToken`]
//! that is threaded through launch and capture, and a [`CancelHandle`] that the
//! owner uses to stand the timer down once the sandbox has finished on its own.
//!
//! The token moves from `Armed` to exactly one of `Expired` or `Released`, once.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeadlineState {
    Armed,
    Expired,
    Released,
}

/// Observer side of a deadline. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DeadlineToken {
    state: watch::Receiver<DeadlineState>,
    budget: Duration,
}

impl DeadlineToken {
    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn is_expired(&self) -> bool {
        *self.state.borrow() == DeadlineState::Expired
    }

    /// Resolves when the deadline fires. Never resolves if the deadline was released.
    pub async fn expired(&self) {
        let mut rx = self.state.clone();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                DeadlineState::Expired => return,
                DeadlineState::Released => std::future::pending::<()>().await,
                DeadlineState::Armed => {}
            }
            if rx.changed().await.is_err() {
                // Controller is gone; whatever it last published is final
                if *rx.borrow() == DeadlineState::Expired {
                    return;
                }
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Owner side of a deadline. Dropping it has the same effect as [`CancelHandle::cancel`].
#[derive(Debug)]
pub struct CancelHandle {
    state: Arc<watch::Sender<DeadlineState>>,
    timer: Option<JoinHandle<()>>,
}

impl CancelHandle {
    /// Stand the timer down. A deadline that already fired stays expired.
    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.state.send_if_modified(|state| {
            if *state == DeadlineState::Armed {
                *state = DeadlineState::Released;
                true
            } else {
                false
            }
        });
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Arm a wall-clock deadline of `budget`.
///
/// A zero budget produces a token that is already expired, with no timer.
/// Must be called from within a tokio runtime.
pub fn with_deadline(budget: Duration) -> (DeadlineToken, CancelHandle) {
    let (tx, rx) = watch::channel(DeadlineState::Armed);
    let tx = Arc::new(tx);

    let timer = if budget.is_zero() {
        expire(&tx);
        None
    } else {
        let tx = Arc::clone(&tx);
        Some(tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            if expire(&tx) {
                debug!(budget_ms = budget.as_millis() as u64, "Deadline expired");
            }
        }))
    };

    (
        DeadlineToken { state: rx, budget },
        CancelHandle { state: tx, timer },
    )
}

fn expire(state: &watch::Sender<DeadlineState>) -> bool {
    state.send_if_modified(|state| {
        if *state == DeadlineState::Armed {
            *state = DeadlineState::Expired;
            true
        } else {
            false
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_zero_budget_is_already_expired() {
        let (token, _cancel) = with_deadline(Duration::ZERO);
        assert!(token.is_expired());
        timeout(Duration::from_millis(100), token.expired())
            .await
            .expect("zero-budget token should resolve immediately");
    }

    #[tokio::test]
    async fn test_deadline_fires_after_budget() {
        let (token, _cancel) = with_deadline(Duration::from_millis(30));
        assert!(!token.is_expired());

        timeout(Duration::from_secs(2), token.expired())
            .await
            .expect("deadline should fire");
        assert!(token.is_expired());
    }

    #[tokio::test]
    async fn test_cancel_prevents_expiry() {
        let (token, cancel) = with_deadline(Duration::from_millis(30));
        cancel.cancel();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!token.is_expired());
        assert!(timeout(Duration::from_millis(50), token.expired()).await.is_err());
    }

    #[tokio::test]
    async fn test_dropping_handle_releases_timer() {
        let (token, cancel) = with_deadline(Duration::from_millis(30));
        drop(cancel);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!token.is_expired());
    }

    #[tokio::test]
    async fn test_cancel_after_expiry_keeps_expired() {
        let (token, cancel) = with_deadline(Duration::from_millis(10));
        token.expired().await;
        cancel.cancel();

        assert!(token.is_expired());
        timeout(Duration::from_millis(50), token.expired())
            .await
            .expect("expired state is final");
    }

    #[tokio::test]
    async fn test_clones_observe_the_same_deadline() {
        let (token, _cancel) = with_deadline(Duration::from_millis(20));
        let observer = token.clone();

        timeout(Duration::from_secs(2), observer.expired())
            .await
            .expect("clone should observe expiry");
        assert!(token.is_expired());
        assert_eq!(observer.budget(), Duration::from_millis(20));
    }
}
