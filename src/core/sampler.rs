//! Periodic resource sampling.
//!
//! Every period the sampler shells out for memory and/or disk usage and
//! appends the parsed readings to the status log. Failed or unparsable
//! readings skip the cycle; the loop itself only ends on cancellation.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::log_buffer::LogBuffer;
use super::models::{DiskUsageRecord, LogPayload};
use crate::adapters::executor::{CommandExecutor, ExecOptions, shell_quote};
use crate::logging::LogThrottle;

pub const MEMORY_MESSAGE: &str = "Memory Usage Update";
pub const DISK_MESSAGE: &str = "Disk Usage Update";
const DISK_COMMAND: &str = "df";

/// What to sample and how often.
#[derive(Debug, Clone)]
pub struct SamplingConfig {
    pub period: Duration,
    /// Sum resident memory of processes whose `ps aux` line matches this
    pub memory_filter: Option<String>,
    pub disk: bool,
}

impl SamplingConfig {
    pub fn disk_only(period: Duration) -> Self {
        Self {
            period,
            memory_filter: None,
            disk: true,
        }
    }

    pub fn memory(period: Duration, filter: impl Into<String>) -> Self {
        Self {
            period,
            memory_filter: Some(filter.into()),
            disk: false,
        }
    }
}

/// Cancellation handle for a running sampler.
///
/// Dropping the handle stops the sampler as well.
pub struct SamplerHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SamplerHandle {
    /// Stop scheduling further cycles. Idempotent and non-blocking.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// True once the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

pub struct ResourceSampler {
    config: SamplingConfig,
    executor: Arc<dyn CommandExecutor>,
    buffer: LogBuffer,
    failures: LogThrottle,
}

impl ResourceSampler {
    pub fn new(config: SamplingConfig, executor: Arc<dyn CommandExecutor>, buffer: LogBuffer) -> Self {
        let failures = LogThrottle::new(config.period.saturating_mul(6));
        Self {
            config,
            executor,
            buffer,
            failures,
        }
    }

    /// Spawn the sampling loop. The first reading happens one period from now.
    pub fn spawn(self) -> SamplerHandle {
        let token = CancellationToken::new();
        let task = tokio::spawn(self.run(token.clone()));
        SamplerHandle { token, task }
    }

    async fn run(self, token: CancellationToken) {
        debug!(
            period_ms = self.config.period.as_millis() as u64,
            memory_filter = ?self.config.memory_filter,
            disk = self.config.disk,
            "Resource sampler started"
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.config.period) => {}
            }

            if let Some(filter) = &self.config.memory_filter {
                if let Some(kilobytes) = self.sample_memory(filter).await {
                    if token.is_cancelled() {
                        break;
                    }
                    self.buffer.append(
                        MEMORY_MESSAGE,
                        LogPayload::MemorySample {
                            filter: filter.clone(),
                            kilobytes,
                        },
                    );
                }
            }

            if self.config.disk {
                if let Some(filesystems) = self.sample_disk().await {
                    if token.is_cancelled() {
                        break;
                    }
                    self.buffer
                        .append(DISK_MESSAGE, LogPayload::DiskSample { filesystems });
                }
            }
        }

        debug!("Resource sampler stopped");
    }

    async fn sample_memory(&self, filter: &str) -> Option<u64> {
        let stdout = self.run_command(&memory_command(filter)).await?;
        let kilobytes = parse_memory_total(&stdout);
        if kilobytes.is_none() {
            debug!(filter = %filter, "No memory reading, skipping cycle");
        }
        kilobytes
    }

    async fn sample_disk(&self) -> Option<Vec<DiskUsageRecord>> {
        let stdout = self.run_command(DISK_COMMAND).await?;
        Some(parse_disk_usage(&stdout))
    }

    async fn run_command(&self, command: &str) -> Option<String> {
        let result = self.executor.execute(command, &ExecOptions::default()).await;

        let failure = match result {
            Ok(output) if output.stderr.trim().is_empty() => {
                let unreported = self.failures.reset();
                if unreported > 0 {
                    debug!(command = %command, unreported, "Resource sampling recovered");
                }
                return Some(output.stdout);
            }
            Ok(output) => format!("stderr: {}", output.stderr.trim()),
            Err(e) => e.to_string(),
        };

        match self.failures.record() {
            Some(0) => warn!(command = %command, error = %failure, "Resource sample failed"),
            Some(suppressed) => warn!(
                command = %command,
                error = %failure,
                suppressed,
                "Resource sample failed (repeated failures suppressed since last warning)"
            ),
            None => debug!(command = %command, error = %failure, "Resource sample failed"),
        }
        None
    }
}

/// Pipeline summing the RSS column (KiB) of every process matching `filter`.
pub fn memory_command(filter: &str) -> String {
    format!(
        "ps aux | grep {} | grep -v grep | awk '{{sum += $6}} END {{print sum}}'",
        shell_quote(filter)
    )
}

/// Parse the leading integer of the memory pipeline's output.
///
/// Empty output (no matching process) or anything non-numeric yields `None`.
pub fn parse_memory_total(output: &str) -> Option<u64> {
    let digits: String = output
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Parse whitespace-aligned tabular output whose first line is the header.
///
/// Values are zipped to headers by position: a row with fewer columns than
/// the header omits the trailing keys, extra columns are ignored.
pub fn parse_disk_usage(output: &str) -> Vec<DiskUsageRecord> {
    let mut lines = output.trim().lines();
    let headers: Vec<&str> = match lines.next() {
        Some(line) => line.split_whitespace().collect(),
        None => return Vec::new(),
    };

    lines
        .map(|line| {
            let record = headers
                .iter()
                .zip(line.split_whitespace())
                .map(|(header, value)| (header.to_string(), value.to_string()))
                .collect();
            DiskUsageRecord(record)
        })
        .collect()
}
