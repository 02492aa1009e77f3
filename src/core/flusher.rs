//! Change-aware publishing of the status log.
//!
//! Each cycle uploads the whole buffer to one fixed key, but only if the
//! buffer grew since the last attempt. A failed upload is not retried on its
//! own; the next growth re-uploads the full buffer. Stopping is
//! two-phase: the stop flag is raised immediately, and the loop performs one
//! final conditional flush before signalling completion over a oneshot.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::log_buffer::LogBuffer;
use super::models::StatusTarget;
use crate::adapters::store::{ObjectStore, put_json};

/// Counters reported once the flusher has drained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub uploads: u64,
    pub failures: u64,
    /// Buffer length covered by the last attempted upload
    pub entries: usize,
}

#[derive(Debug, Default)]
struct FlushState {
    last_flushed_len: usize,
    summary: FlushSummary,
}

pub struct Flusher {
    buffer: LogBuffer,
    store: Arc<dyn ObjectStore>,
    target: StatusTarget,
    period: Duration,
    state: FlushState,
}

/// Handle to a running flusher. Dropping it stops the loop without waiting.
pub struct FlusherHandle {
    active: CancellationToken,
    done: oneshot::Receiver<FlushSummary>,
}

impl FlusherHandle {
    /// Lower the active flag and wait until the loop has done its final flush
    /// and exited. No upload happens after this returns.
    pub async fn stop(mut self) -> FlushSummary {
        self.active.cancel();
        match (&mut self.done).await {
            Ok(summary) => summary,
            Err(_) => {
                warn!("Flusher exited without reporting; final flush may be missing");
                FlushSummary::default()
            }
        }
    }
}

impl Drop for FlusherHandle {
    // Without a drain the loop still gets its final flush, just unobserved.
    fn drop(&mut self) {
        self.active.cancel();
    }
}

impl Flusher {
    pub fn new(
        buffer: LogBuffer,
        store: Arc<dyn ObjectStore>,
        target: StatusTarget,
        period: Duration,
    ) -> Self {
        Self {
            buffer,
            store,
            target,
            period,
            state: FlushState::default(),
        }
    }

    pub fn spawn(self) -> FlusherHandle {
        let active = CancellationToken::new();
        let (done_tx, done) = oneshot::channel();
        tokio::spawn(self.run(active.clone(), done_tx));
        FlusherHandle { active, done }
    }

    async fn run(mut self, active: CancellationToken, done: oneshot::Sender<FlushSummary>) {
        debug!(
            bucket = %self.target.bucket,
            key = %self.target.key,
            period_ms = self.period.as_millis() as u64,
            "Status flusher started"
        );

        loop {
            // An upload in flight is never interrupted; the flag is only
            // observed while waiting for the next tick.
            tokio::select! {
                _ = active.cancelled() => {}
                _ = tokio::time::sleep(self.period) => {}
            }

            let stopping = active.is_cancelled();
            self.flush_if_changed().await;
            if stopping {
                break;
            }
        }

        info!(
            key = %self.target.key,
            uploads = self.state.summary.uploads,
            failures = self.state.summary.failures,
            entries = self.state.summary.entries,
            "Status flusher drained"
        );
        let _ = done.send(self.state.summary);
    }

    async fn flush_if_changed(&mut self) {
        let snapshot = self.buffer.snapshot();
        if snapshot.len() <= self.state.last_flushed_len {
            return;
        }

        self.state.last_flushed_len = snapshot.len();
        self.state.summary.entries = snapshot.len();

        match put_json(
            self.store.as_ref(),
            &self.target.bucket,
            &self.target.key,
            &snapshot,
        )
        .await
        {
            Ok(()) => {
                self.state.summary.uploads += 1;
                debug!(key = %self.target.key, entries = snapshot.len(), "Status uploaded");
            }
            Err(e) => {
                self.state.summary.failures += 1;
                warn!(key = %self.target.key, error = %e, "Status upload failed");
            }
        }
    }
}
