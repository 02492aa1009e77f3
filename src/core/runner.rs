//! Job runner: wraps a handler with status reporting and response saving.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::models::{JobPayload, JobResponse, StatusTarget};
use super::pipeline::JobHandler;
use super::reporter::StatusReporter;
use super::sampler::SamplingConfig;
use crate::adapters::store::put_json;
use crate::context::AppContext;

/// Read and parse the JSON payload file.
pub fn read_payload(path: &Path) -> Result<JobPayload> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read payload {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse payload {}", path.display()))
}

/// Run one job end to end.
///
/// The status log is published to `status/<requestId>.json` while the
/// handler runs, and the response to `instance-response/<requestId>.json`.
/// Sampling is stopped and flushing drained on every exit path, including a
/// handler panic, so failed jobs keep their diagnostic history.
pub async fn run_job(
    ctx: &AppContext,
    payload: JobPayload,
    handler: Arc<dyn JobHandler>,
) -> Result<JobResponse> {
    let request_id = payload.request_id.clone();
    let bucket = ctx.config.bucket.clone();
    let reporter = Arc::new(StatusReporter::new(
        ctx.store.clone(),
        ctx.executor.clone(),
        StatusTarget::for_job(bucket.clone(), &request_id),
    ));

    reporter.start_flushing(ctx.config.flush_interval())?;
    reporter.start_sampling(SamplingConfig {
        period: ctx.config.sample_interval(),
        memory_filter: ctx.config.memory_filter.clone(),
        disk: ctx.config.sample_disk,
    })?;

    info!(request_id = %request_id, "Job started");

    let outcome = tokio::spawn({
        let reporter = reporter.clone();
        async move { handler.handle(&payload, reporter).await }
    })
    .await;

    let result = match outcome {
        Ok(Ok(pkg_name)) => {
            let response = JobResponse::success(&pkg_name);
            save_response(ctx, &request_id, &response)
                .await
                .map(|()| response)
        }
        Ok(Err(e)) => Err(e),
        Err(join_error) if join_error.is_panic() => Err(anyhow::anyhow!("Job handler panicked")),
        Err(join_error) => Err(anyhow::anyhow!("Job handler was cancelled: {}", join_error)),
    };

    let response = match result {
        Ok(response) => {
            info!(request_id = %request_id, "Job succeeded");
            Ok(response)
        }
        Err(e) => {
            let message = format!("{:#}", e);
            error!(request_id = %request_id, error = %message, "Job failed");
            reporter.log(message.clone(), None);

            let response = JobResponse::failure(&message);
            save_response(ctx, &request_id, &response)
                .await
                .map(|()| response)
        }
    };

    reporter.stop_sampling();
    match reporter.stop_flushing().await {
        Some(summary) if summary.failures > 0 => warn!(
            request_id = %request_id,
            failures = summary.failures,
            "Some status uploads failed"
        ),
        Some(summary) => info!(
            request_id = %request_id,
            uploads = summary.uploads,
            entries = summary.entries,
            "Status log published"
        ),
        None => {}
    }

    response
}

async fn save_response(ctx: &AppContext, request_id: &str, response: &JobResponse) -> Result<()> {
    put_json(
        ctx.store.as_ref(),
        &ctx.config.bucket,
        &JobResponse::key_for(request_id),
        response,
    )
    .await
    .with_context(|| format!("Failed to save response for {}", request_id))
}
