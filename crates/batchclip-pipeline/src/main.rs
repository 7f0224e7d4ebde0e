//! BatchClip binary.
//!
//! Runs one batch against a local media file:
//!
//! ```text
//! batchclip <source> <range>...
//! batchclip talk.mp4 "00:00-01:59" "2:00-3:30"
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use batchclip_media::{check_ffmpeg, check_ffprobe, FfmpegTranscoder};
use batchclip_models::OwnerId;
use batchclip_pipeline::{
    Delivery, EdgePadding, Pipeline, PipelineConfig, PipelineError, TracingNotifier,
};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("batchclip failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let mut args = std::env::args().skip(1);
    let source = args
        .next()
        .context("usage: batchclip <source> <range>...")?;
    let text = args.collect::<Vec<_>>().join("\n");
    if text.trim().is_empty() {
        anyhow::bail!("usage: batchclip <source> <range>...");
    }

    check_ffmpeg().context("ffmpeg is required")?;
    check_ffprobe().context("ffprobe is required")?;

    let config = PipelineConfig::from_env();
    info!("Pipeline config: {:?}", config);

    let transcoder = Arc::new(FfmpegTranscoder::new().with_timeout(config.segment_timeout));
    let padding = EdgePadding::new(
        env_ms("BATCHCLIP_START_PADDING_MS"),
        env_ms("BATCHCLIP_END_PADDING_MS"),
    );
    let owner = OwnerId::new(
        std::env::var("BATCHCLIP_OWNER").unwrap_or_else(|_| "local".to_string()),
    );

    let pipeline = Pipeline::new(config, transcoder, Arc::new(TracingNotifier)).await?;
    let eviction = pipeline.spawn_eviction_task();

    let source = Path::new(&source);
    let plan = match pipeline.plan(source, &text, padding).await {
        Ok(plan) => plan,
        Err(PipelineError::Validation(report)) => {
            anyhow::bail!("validation failed: {}", report);
        }
        Err(e) => return Err(e.into()),
    };

    for line in &plan.lines {
        if let Err(e) = &line.result {
            warn!("Skipping entry '{}': {}", line.raw, e);
        }
    }
    for warning in &plan.warnings {
        warn!("{}", warning);
    }
    info!(
        segments = plan.segments.len(),
        skipped_entries = plan.parse_error_count(),
        "Batch planned"
    );

    let mut running = pipeline.submit(owner, source, plan).await?;

    let finished = tokio::select! {
        report = running.wait() => Some(report),
        _ = tokio::signal::ctrl_c() => None,
    };
    let report = match finished {
        Some(report) => report?,
        None => {
            info!("Received shutdown signal, cancelling job");
            running.cancel();
            running.wait().await?
        }
    };

    eviction.abort();

    info!(
        state = %report.job.state,
        completed = report.job.completed_count,
        failed = report.job.failed_segments.len(),
        skipped = report.skipped.len(),
        "Job finished"
    );
    for failure in &report.failures {
        warn!("segment {}: {}", failure.index, failure.reason);
    }

    match report.delivery {
        Some(Delivery::Single(path)) => println!("{}", path.display()),
        Some(Delivery::Files(files)) => {
            for file in files {
                println!("{}", file.display());
            }
        }
        Some(Delivery::Archive { path, .. }) => println!("{}", path.display()),
        None => {}
    }

    if report.job.completed_count == 0 {
        anyhow::bail!("no segments produced output");
    }
    Ok(())
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("batchclip=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

fn env_ms(var: &str) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}
