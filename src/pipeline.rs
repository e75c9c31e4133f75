//! Ingest → transform → transform tests.
//!
//! The transformation tool is opaque: it is started as a child process in
//! its configured working directory, its output is captured and logged, and
//! a non-zero exit fails the pipeline. There is no retry here; re-running
//! the pipeline is safe because ingestion skips recorded files.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

use crate::config::{Config, TransformConfig};
use crate::driver::{self, RunOptions, RunSummary};
use crate::progress::IngestProgressReporter;

pub struct PipelineReport {
    pub ingest: RunSummary,
    /// External steps that completed, in order.
    pub steps: Vec<&'static str>,
}

pub async fn run_pipeline(
    config: &Config,
    options: &RunOptions,
    progress: &dyn IngestProgressReporter,
) -> Result<PipelineReport> {
    tracing::info!("running incremental ingestion");
    // File I/O is blocking and strictly sequential; keep it off the runtime workers.
    let ingest = tokio::task::block_in_place(|| driver::run_ingest(config, options, progress))
        .context("Ingestion failed")?;

    let mut steps = Vec::new();
    match &config.transform {
        Some(_) if options.dry_run => {
            tracing::info!("dry run, skipping transform steps");
        }
        Some(transform) => {
            steps.push(run_step("transform run", &transform.run, transform).await?);
            if !transform.test.is_empty() {
                steps.push(run_step("transform test", &transform.test, transform).await?);
            }
        }
        None => tracing::info!("no [transform] section configured, stopping after ingestion"),
    }

    Ok(PipelineReport { ingest, steps })
}

async fn run_step(
    step: &'static str,
    argv: &[String],
    transform: &TransformConfig,
) -> Result<&'static str> {
    let Some((program, args)) = argv.split_first() else {
        bail!("{}: no command configured", step);
    };

    tracing::info!(step, command = %argv.join(" "), "starting");

    let mut cmd = Command::new(program);
    cmd.args(args).kill_on_drop(true);
    if let Some(cwd) = &transform.cwd {
        cmd.current_dir(cwd);
    }

    let timeout = Duration::from_secs(transform.timeout_secs);
    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| anyhow::anyhow!("{} timed out after {}s", step, transform.timeout_secs))?
        .with_context(|| {
            format!(
                "{}: failed to start {}",
                step,
                display_cwd(program, transform.cwd.as_deref())
            )
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !stdout.trim().is_empty() {
        tracing::info!(step, "{}", stdout.trim_end());
    }

    if !output.status.success() {
        tracing::error!(step, "{}", stderr.trim_end());
        bail!(
            "{} failed ({}): {}",
            step,
            output.status,
            last_line(&stderr).unwrap_or("no stderr output")
        );
    }

    tracing::info!(step, "complete");
    Ok(step)
}

fn display_cwd(program: &str, cwd: Option<&Path>) -> String {
    match cwd {
        Some(dir) => format!("{} (in {})", program, dir.display()),
        None => program.to_string(),
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().rev().map(str::trim).find(|l| !l.is_empty())
}
