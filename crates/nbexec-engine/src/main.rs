//! nbexec command-line driver.
//!
//! Submits one notebook job, tails its captured output until the job
//! reaches a terminal state, and exits non-zero unless the job succeeded.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use tracing::info;

use nbexec_core::config::load_config;
use nbexec_core::tracing_init::init_tracing;
use nbexec_engine::job::{JobManager, JobRequest, JobStatus};

#[derive(Parser, Debug)]
#[command(name = "nbexec")]
#[command(version, about = "Notebook execution orchestrator", long_about = None)]
struct Cli {
    /// Input notebook to execute.
    input: PathBuf,

    /// Output notebook path; derived from the input when omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Notebook parameter as key=value; repeatable. Values parse as JSON
    /// where possible, otherwise as strings.
    #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// Execution timeout in seconds.
    #[arg(short = 't', long)]
    timeout: Option<u64>,

    /// Working directory for the engine process.
    #[arg(short = 'd', long)]
    working_dir: Option<PathBuf>,

    /// Engine binary override.
    #[arg(long, env = "NBEXEC_ENGINE_BIN")]
    engine_bin: Option<String>,

    /// Log filter override (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let project_dir = std::env::current_dir().ok();
    let mut config =
        load_config(project_dir.as_deref()).context("failed to load configuration")?;
    if let Some(bin) = cli.engine_bin {
        config.engine.bin = bin;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.log_json {
        config.logging.json = true;
    }

    init_tracing(&config.logging);

    let parameters = parse_params(&cli.params)?;
    let manager = JobManager::new(&config);
    let request = JobRequest {
        input: cli.input,
        output: cli.output,
        parameters,
        timeout_secs: cli.timeout,
        working_dir: cli.working_dir,
        env: HashMap::new(),
    };

    let job = match manager.submit(request).await {
        Ok(job) => job,
        Err(e) => anyhow::bail!("{e}"),
    };
    info!(job_id = %job.id, "Job accepted");

    let mut offset = 0;
    loop {
        let chunk = manager.logs(&job.id, offset, None).await?;
        offset = chunk.next_offset;
        for line in &chunk.lines {
            eprintln!("[{}] {}", line.stream, line.text);
        }
        if chunk.closed && chunk.lines.is_empty() {
            break;
        }
        if chunk.lines.is_empty() {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    let finished = manager.status(&job.id).await?;
    eprintln!("Job {} finished: {}", finished.id, finished.status);
    if let Some(error) = &finished.error {
        eprintln!("  {error}");
    }
    if finished.status == JobStatus::Succeeded {
        eprintln!("  output: {}", finished.output.display());
        Ok(())
    } else {
        anyhow::bail!("job {} ended as {}", finished.id, finished.status)
    }
}

/// Parse repeated `key=value` pairs. Values that look like JSON become the
/// typed value; everything else stays a string.
fn parse_params(pairs: &[String]) -> anyhow::Result<HashMap<String, Value>> {
    let mut parameters = HashMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            anyhow::bail!("invalid parameter '{pair}', expected key=value");
        };
        let parsed =
            serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        parameters.insert(key.to_string(), parsed);
    }
    Ok(parameters)
}
