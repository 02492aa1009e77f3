//! Operator-facing logging for the runner.
//!
//! This is the process's own diagnostic channel (stderr), separate from the
//! job status log that the reporter publishes to the object store.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Configuration for the logging system.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogConfig {
    /// Output logs as JSON (for log aggregation on the batch host)
    pub json: bool,
    /// Enable verbose logging (sets default level to DEBUG)
    pub verbose: bool,
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the level chosen from `verbose`. Calling this twice
/// is harmless; the second call is ignored.
pub fn init(config: LogConfig) {
    let default_level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "pipeline_runner={}",
            default_level.as_str().to_lowercase()
        ))
    });

    let result = if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Rate limiter for a warning that would otherwise repeat every cycle.
///
/// At most one occurrence per interval is let through; the ones in between
/// are counted so the next warning can say how many were folded into it.
pub struct LogThrottle {
    interval: Duration,
    state: Mutex<ThrottleState>,
}

#[derive(Default)]
struct ThrottleState {
    last_logged: Option<Instant>,
    suppressed: u64,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Mutex::new(ThrottleState::default()),
        }
    }

    /// Record one occurrence.
    ///
    /// Returns `Some(suppressed)` when this occurrence should be logged, with
    /// the number of occurrences swallowed since the last one that was.
    pub fn record(&self) -> Option<u64> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let due = state
            .last_logged
            .is_none_or(|at| at.elapsed() >= self.interval);

        if due {
            state.last_logged = Some(Instant::now());
            Some(std::mem::take(&mut state.suppressed))
        } else {
            state.suppressed += 1;
            None
        }
    }

    /// Start over after recovery: the next occurrence is logged immediately.
    ///
    /// Returns how many occurrences were suppressed and never reported.
    pub fn reset(&self) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.last_logged = None;
        std::mem::take(&mut state.suppressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_allows_first_occurrence() {
        let throttle = LogThrottle::new(Duration::from_secs(1));
        assert_eq!(throttle.record(), Some(0));
    }

    #[test]
    fn throttle_counts_suppressed_occurrences() {
        let throttle = LogThrottle::new(Duration::from_millis(30));
        assert_eq!(throttle.record(), Some(0));
        assert_eq!(throttle.record(), None);
        assert_eq!(throttle.record(), None);

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(throttle.record(), Some(2));
        assert_eq!(throttle.record(), None);
    }

    #[test]
    fn throttle_reset_reports_leftovers_and_reopens() {
        let throttle = LogThrottle::new(Duration::from_secs(100));
        assert_eq!(throttle.record(), Some(0));
        assert_eq!(throttle.record(), None);

        assert_eq!(throttle.reset(), 1);
        assert_eq!(throttle.record(), Some(0));
    }

    #[test]
    fn init_twice_does_not_panic() {
        init(LogConfig::default());
        init(LogConfig {
            verbose: true,
            ..Default::default()
        });
    }
}
