//! Job handlers: the code the runner wraps with status reporting.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Instrument, info, info_span};

use super::models::JobPayload;
use super::reporter::StatusSink;
use crate::adapters::{
    CommandExecutor, ExecOptions, ObjectStore, UploadProgress, download_file, unique_name,
    zip_directory,
};

const NAME_ATTEMPTS: usize = 5;

/// A unit of pipeline work. Returns the name of the package it produced.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, payload: &JobPayload, status: Arc<dyn StatusSink>) -> Result<String>;
}

/// Runs an external pipeline command and publishes its output directory.
///
/// Per job, under `<work_dir>/<requestId>/`:
/// - `payload.json`: the payload, for the command to read
/// - `inputs/`: files listed in the payload, downloaded before the command runs
/// - `output/`: whatever the command writes here is zipped and uploaded to
///   `packages/<name>.zip`
pub struct CommandHandler {
    pub command: String,
    pub bucket: String,
    pub work_dir: PathBuf,
    pub package_prefix: String,
    pub store: Arc<dyn ObjectStore>,
    pub executor: Arc<dyn CommandExecutor>,
}

impl CommandHandler {
    pub fn package_key(name: &str) -> String {
        format!("packages/{}.zip", name)
    }

    async fn pick_package_name(&self) -> Result<String> {
        for _ in 0..NAME_ATTEMPTS {
            let name = unique_name(&self.package_prefix);
            if !self.store.head(&self.bucket, &Self::package_key(&name)).await? {
                return Ok(name);
            }
        }
        bail!("Could not find an unused package name after {} attempts", NAME_ATTEMPTS)
    }

    async fn fetch_inputs(
        &self,
        payload: &JobPayload,
        inputs_dir: &Path,
        status: &dyn StatusSink,
    ) -> Result<()> {
        for input in &payload.inputs {
            let relative = Path::new(&input.path);
            if relative.is_absolute() || relative.components().any(|c| c.as_os_str() == "..") {
                bail!("Input path must stay inside the inputs directory: {}", input.path);
            }

            let bytes = download_file(&input.url, &inputs_dir.join(relative))
                .await
                .with_context(|| format!("Failed to download {}", input.url))?;
            status.log(
                "Downloaded input",
                Some(json!({ "url": input.url, "path": input.path, "bytes": bytes })),
            );
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for CommandHandler {
    async fn handle(&self, payload: &JobPayload, status: Arc<dyn StatusSink>) -> Result<String> {
        let span = info_span!("command_job", request_id = %payload.request_id);

        async {
            let job_dir = self.work_dir.join(&payload.request_id);
            let inputs_dir = job_dir.join("inputs");
            let output_dir = job_dir.join("output");
            tokio::fs::create_dir_all(&inputs_dir).await?;
            tokio::fs::create_dir_all(&output_dir).await?;

            let payload_path = job_dir.join("payload.json");
            tokio::fs::write(&payload_path, serde_json::to_vec_pretty(payload)?).await?;

            self.fetch_inputs(payload, &inputs_dir, status.as_ref()).await?;

            let pkg_name = self.pick_package_name().await?;
            status.log("Running pipeline", Some(json!({ "pkgName": pkg_name })));
            info!(command = %self.command, pkg_name = %pkg_name, "Running pipeline command");

            let options = ExecOptions::in_dir(&job_dir)
                .with_env("PIPELINE_PAYLOAD", payload_path.to_string_lossy())
                .with_env("PIPELINE_WORK_DIR", job_dir.to_string_lossy())
                .with_env("PIPELINE_OUTPUT_DIR", output_dir.to_string_lossy())
                .with_env("PIPELINE_PACKAGE", pkg_name.as_str());

            let output = self.executor.execute(&self.command, &options).await?;
            status.log(
                "Pipeline finished",
                Some(json!({ "stdout": output.stdout, "stderr": output.stderr })),
            );

            let archive_path = job_dir.join(format!("{}.zip", pkg_name));
            let summary = tokio::task::spawn_blocking({
                let output_dir = output_dir.clone();
                let archive_path = archive_path.clone();
                move || zip_directory(&output_dir, &archive_path)
            })
            .await??;
            status.log(
                &format!("{} total bytes", summary.total_bytes),
                Some(json!({ "files": summary.files })),
            );

            let key = Self::package_key(&pkg_name);
            let progress: UploadProgress = {
                let status = status.clone();
                Arc::new(move |uploaded, total| {
                    status.log(&format!("Uploaded {} of {} bytes", uploaded, total), None)
                })
            };
            self.store
                .put_file_with_progress(&self.bucket, &key, &archive_path, progress)
                .await
                .with_context(|| format!("Failed to upload package {}", key))?;
            status.log("Upload complete", Some(json!({ "key": key })));

            Ok::<_, anyhow::Error>(pkg_name)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MemoryObjectStore, ShellExecutor};
    use crate::core::reporter::MemoryStatusSink;
    use std::io::Read;

    fn payload(id: &str) -> JobPayload {
        serde_json::from_value(json!({ "requestId": id, "chain": "test" })).unwrap()
    }

    fn handler(store: &MemoryObjectStore, work_dir: &Path, command: &str) -> CommandHandler {
        CommandHandler {
            command: command.to_string(),
            bucket: "bucket".to_string(),
            work_dir: work_dir.to_path_buf(),
            package_prefix: "pkg".to_string(),
            store: Arc::new(store.clone()),
            executor: Arc::new(ShellExecutor),
        }
    }

    #[tokio::test]
    async fn test_command_output_is_packaged_and_uploaded() {
        let temp = tempfile::tempdir().unwrap();
        let store = MemoryObjectStore::new();
        let sink = Arc::new(MemoryStatusSink::new());
        let handler = handler(
            &store,
            temp.path(),
            "echo built > \"$PIPELINE_OUTPUT_DIR/result.txt\" && cat \"$PIPELINE_PAYLOAD\"",
        );

        let pkg_name = handler.handle(&payload("req-7"), sink.clone()).await.unwrap();

        assert!(pkg_name.starts_with("pkg-"));
        let body = store
            .object("bucket", &CommandHandler::package_key(&pkg_name))
            .unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(body)).unwrap();
        let mut contents = String::new();
        archive
            .by_name("result.txt")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents.trim(), "built");

        let messages: Vec<_> = sink.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages.first().map(String::as_str), Some("Running pipeline"));
        assert_eq!(messages.last().map(String::as_str), Some("Upload complete"));

        let archive_len = store
            .object("bucket", &CommandHandler::package_key(&pkg_name))
            .unwrap()
            .len();
        let uploaded = format!("Uploaded {} of {} bytes", archive_len, archive_len);
        assert_eq!(messages[messages.len() - 2], uploaded);
    }

    #[tokio::test]
    async fn test_failing_command_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let store = MemoryObjectStore::new();
        let handler = handler(&store, temp.path(), "echo nope >&2; exit 2");

        let err = handler
            .handle(&payload("req-8"), Arc::new(MemoryStatusSink::new()))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("nope"));
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_input_paths_cannot_escape() {
        let temp = tempfile::tempdir().unwrap();
        let store = MemoryObjectStore::new();
        let handler = handler(&store, temp.path(), "true");
        let payload: JobPayload = serde_json::from_value(json!({
            "requestId": "req-9",
            "inputs": [{ "url": "http://127.0.0.1:9/x", "path": "../x" }],
        }))
        .unwrap();

        let err = handler
            .handle(&payload, Arc::new(MemoryStatusSink::new()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("inside the inputs directory"));
    }
}
