use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use pipeline_runner::adapters::{self, MemoryObjectStore, ObjectStore, ShellExecutor};
use pipeline_runner::core::{CommandHandler, read_payload, run_job};
use pipeline_runner::logging::{self, LogConfig};
use pipeline_runner::{config, context};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "pipeline-runner")]
#[command(about = "Batch pipeline runner with status reporting", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./pipeline-runner.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: GlobalArgs,

    /// Keep everything in memory instead of talking to the object store
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline job described by a payload file
    Run(RunArgs),
    /// Check whether a key exists in the bucket
    Exists { key: String },
    /// Delete keys from the bucket
    Purge {
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

#[derive(Args, Serialize)]
struct GlobalArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    bucket: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    json_logs: Option<bool>,
}

#[derive(Args)]
struct RunArgs {
    /// Path to the JSON job payload
    #[arg(long)]
    payload: PathBuf,

    /// Shell command that runs the pipeline
    #[arg(long)]
    command: String,

    #[arg(long)]
    package_prefix: Option<String>,

    #[arg(long)]
    memory_filter: Option<String>,
}

#[derive(Serialize)]
struct ConfigOverrides<'a> {
    #[serde(flatten)]
    global: &'a GlobalArgs,
    #[serde(skip_serializing_if = "Option::is_none")]
    package_prefix: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory_filter: Option<&'a str>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let run_args = match &cli.command {
        Commands::Run(args) => Some(args),
        _ => None,
    };
    let overrides = ConfigOverrides {
        global: &cli.overrides,
        package_prefix: run_args.and_then(|a| a.package_prefix.as_deref()),
        memory_filter: run_args.and_then(|a| a.memory_filter.as_deref()),
    };
    let config = config::AppConfig::new(cli.config.as_deref(), Some(&overrides))?;

    logging::init(LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
    });

    if config.bucket.is_empty() {
        bail!("No bucket configured: set BLOB_BUCKET, RUNNER_BUCKET or --bucket");
    }

    let store: Arc<dyn ObjectStore> = if cli.dry_run {
        Arc::new(MemoryObjectStore::new())
    } else {
        adapters::create_store(&config.store)?
    };
    let ctx = context::AppContext::new(config, store, Arc::new(ShellExecutor));

    match &cli.command {
        Commands::Run(args) => {
            let succeeded = run(ctx, args).await.context("Failed to run job")?;
            if !succeeded {
                std::process::exit(1);
            }
        }
        Commands::Exists { key } => {
            let exists = ctx.store.head(&ctx.config.bucket, key).await?;
            println!("{}", exists);
        }
        Commands::Purge { keys } => {
            ctx.store
                .delete_many(&ctx.config.bucket, keys)
                .await
                .context("Failed to delete keys")?;
            println!("Deleted {} key(s)", keys.len());
        }
    }

    Ok(())
}

async fn run(ctx: context::AppContext, args: &RunArgs) -> Result<bool> {
    let payload = read_payload(&args.payload)?;

    let handler = Arc::new(CommandHandler {
        command: args.command.clone(),
        bucket: ctx.config.bucket.clone(),
        work_dir: ctx.config.work_dir.clone(),
        package_prefix: ctx.config.package_prefix.clone(),
        store: ctx.store.clone(),
        executor: ctx.executor.clone(),
    });

    let response = run_job(&ctx, payload, handler).await?;
    println!("{}", serde_json::to_string(&response)?);
    Ok(response.is_success())
}
