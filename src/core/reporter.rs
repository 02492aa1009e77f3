//! Status reporter: owns a job's status log and its two background activities.
//!
//! Lifecycle: created, then sampling and flushing are each started at most
//! once (in any order), then stopped during cleanup. Once flushing has been
//! drained the reporter is terminal and cannot be restarted.

use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::flusher::{FlushSummary, Flusher, FlusherHandle};
use super::log_buffer::LogBuffer;
use super::models::{LogEntry, LogPayload, StatusTarget};
use super::sampler::{ResourceSampler, SamplerHandle, SamplingConfig};
use crate::adapters::executor::CommandExecutor;
use crate::adapters::store::ObjectStore;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReporterError {
    #[error("resource sampling was already started")]
    AlreadySampling,
    #[error("status flushing was already started")]
    AlreadyFlushing,
    #[error("status reporter has been drained")]
    Drained,
}

/// Logging sink handed to job handlers.
pub trait StatusSink: Send + Sync {
    fn log(&self, message: &str, data: Option<Value>);
}

enum FlushSlot {
    Idle,
    Running(FlusherHandle),
    Drained,
}

struct Activities {
    sampler: Option<SamplerHandle>,
    flusher: FlushSlot,
}

pub struct StatusReporter {
    target: StatusTarget,
    buffer: LogBuffer,
    store: Arc<dyn ObjectStore>,
    executor: Arc<dyn CommandExecutor>,
    activities: Mutex<Activities>,
}

impl StatusReporter {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        executor: Arc<dyn CommandExecutor>,
        target: StatusTarget,
    ) -> Self {
        Self {
            target,
            buffer: LogBuffer::new(),
            store,
            executor,
            activities: Mutex::new(Activities {
                sampler: None,
                flusher: FlushSlot::Idle,
            }),
        }
    }

    pub fn target(&self) -> &StatusTarget {
        &self.target
    }

    pub fn start_sampling(&self, config: SamplingConfig) -> Result<(), ReporterError> {
        let mut activities = self.activities();
        if matches!(activities.flusher, FlushSlot::Drained) {
            return Err(ReporterError::Drained);
        }
        if activities.sampler.is_some() {
            return Err(ReporterError::AlreadySampling);
        }

        info!(
            key = %self.target.key,
            period_ms = config.period.as_millis() as u64,
            "Starting resource sampling"
        );
        let sampler = ResourceSampler::new(config, self.executor.clone(), self.buffer.clone());
        activities.sampler = Some(sampler.spawn());
        Ok(())
    }

    pub fn start_flushing(&self, period: Duration) -> Result<(), ReporterError> {
        let mut activities = self.activities();
        match activities.flusher {
            FlushSlot::Running(_) => return Err(ReporterError::AlreadyFlushing),
            FlushSlot::Drained => return Err(ReporterError::Drained),
            FlushSlot::Idle => {}
        }

        info!(
            bucket = %self.target.bucket,
            key = %self.target.key,
            period_ms = period.as_millis() as u64,
            "Starting status flushing"
        );
        let flusher = Flusher::new(
            self.buffer.clone(),
            self.store.clone(),
            self.target.clone(),
            period,
        );
        activities.flusher = FlushSlot::Running(flusher.spawn());
        Ok(())
    }

    /// Append a plain message to the status log. Never fails.
    pub fn log(&self, message: impl Into<String>, data: Option<Value>) {
        self.buffer.append(message, LogPayload::message(data));
    }

    /// Cancel resource sampling. Safe to call when not sampling.
    ///
    /// The stopped sampler keeps its slot, so sampling cannot be started again.
    pub fn stop_sampling(&self) {
        if let Some(sampler) = &self.activities().sampler {
            if !sampler.is_cancelled() {
                sampler.cancel();
                debug!(key = %self.target.key, "Resource sampling stopped");
            }
        }
    }

    /// Drain the flusher: one final conditional upload, then no more.
    ///
    /// Returns `None` if flushing was never started or was already drained.
    /// Either way the reporter is terminal afterwards.
    pub async fn stop_flushing(&self) -> Option<FlushSummary> {
        let previous = std::mem::replace(&mut self.activities().flusher, FlushSlot::Drained);
        match previous {
            FlushSlot::Running(handle) => Some(handle.stop().await),
            FlushSlot::Idle | FlushSlot::Drained => None,
        }
    }

    pub fn is_drained(&self) -> bool {
        matches!(self.activities().flusher, FlushSlot::Drained)
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.buffer.snapshot()
    }

    fn activities(&self) -> MutexGuard<'_, Activities> {
        self.activities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl StatusSink for StatusReporter {
    fn log(&self, message: &str, data: Option<Value>) {
        StatusReporter::log(self, message, data);
    }
}

/// Sink that only keeps entries in memory; for handlers run without a store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStatusSink {
    buffer: LogBuffer,
}

impl MemoryStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.buffer.snapshot()
    }
}

impl StatusSink for MemoryStatusSink {
    fn log(&self, message: &str, data: Option<Value>) {
        self.buffer.append(message, LogPayload::message(data));
    }
}
