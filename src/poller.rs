//! Cancellable periodic tick source for screen-bound polling.
//!
//! Order screens refresh on a fixed interval while visible. Rather than a
//! raw timer that outlives its screen, the ticker is bound to a
//! [`PollHandle`]: dropping the handle cancels the task, so a dismissed
//! screen stops generating network traffic. Ticks are delivered over a
//! depth-1 channel; if the consumer is still processing the previous
//! refresh, the tick is dropped rather than queued.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cancellation handle for a spawned periodic task. Cancels on drop.
#[derive(Debug)]
pub struct PollHandle {
    token: CancellationToken,
}

impl PollHandle {
    pub(crate) fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Explicitly stop the task (drop does the same).
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// A single refresh signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick;

/// Spawn a ticker emitting [`Tick`] every `interval` until the returned
/// handle is cancelled or dropped. The first tick arrives only after one
/// full interval (screens render whatever they already have first).
pub fn spawn_poll_ticker(interval: Duration) -> (PollHandle, mpsc::Receiver<Tick>) {
    let handle = PollHandle::new();
    let token = handle.token();
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval() fires immediately; swallow that so the first emitted
        // tick lands one full interval from now.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    match tx.try_send(Tick) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            // Consumer still busy with the last refresh.
                            debug!("dropping poll tick: consumer busy");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }
                }
            }
        }
        debug!("poll ticker stopped");
    });

    (handle, rx)
}
