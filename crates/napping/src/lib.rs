//! NapPing runner
//!
//! Feeds a paced frame source through the sleep detection pipeline with a
//! replayed eye-state trace standing in for the face classifier, and
//! writes every sleep event as a JSON line.

pub mod config;
pub mod trace;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use camera_capture::{frame_channel, SyntheticCamera};
use sleep_detect::{DetectionPipeline, PipelineStats, ReplayClassifier, ScriptedOutcome, SleepEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::subscriber::SetGlobalDefaultError;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

pub use crate::config::AppConfig;

/// Initialize logging on stderr
pub fn init_logging(level: Level, json: bool) -> Result<(), SetGlobalDefaultError> {
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    }
}

/// What to run
pub struct RunOptions {
    pub config: AppConfig,
    pub script: Vec<ScriptedOutcome>,
    /// Stop after this long; `None` runs until the script is used up
    /// (or forever without a script)
    pub duration: Option<Duration>,
    pub stop_when_exhausted: bool,
}

/// Run the pipeline until the duration elapses, the script runs out or
/// Ctrl-C arrives. Sleep events are written to `out` as JSON lines.
pub async fn run(options: RunOptions, mut out: impl Write) -> Result<PipelineStats> {
    let RunOptions {
        config,
        script,
        duration,
        stop_when_exhausted,
    } = options;

    let (frames_tx, frames_rx) = frame_channel(config.camera.mailbox);
    let mut camera = SyntheticCamera::new(config.camera.clone())?;
    let classifier = Arc::new(ReplayClassifier::new(script));

    let pipeline = DetectionPipeline::spawn(config.detector.clone(), classifier.clone(), frames_rx)?;
    let mut events = pipeline.subscribe_events();
    let mut sleeping = pipeline.subscribe_sleeping();

    let camera_task = tokio::spawn(async move { camera.run(frames_tx).await });

    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut was_sleeping = false;
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Ok(event) => write_event(&mut out, &event)?,
                Err(RecvError::Lagged(missed)) => warn!("Missed {} sleep events", missed),
                Err(RecvError::Closed) => break,
            },
            changed = sleeping.changed() => {
                if changed.is_err() {
                    break;
                }
                let now_sleeping = *sleeping.borrow_and_update();
                if now_sleeping != was_sleeping {
                    info!("Sleeping: {}", now_sleeping);
                    was_sleeping = now_sleeping;
                }
                if stop_when_exhausted && classifier.remaining() == 0 {
                    info!("Trace exhausted");
                    break;
                }
            },
            _ = &mut deadline => {
                info!("Run duration elapsed");
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            },
        }
    }

    let stats = pipeline.shutdown().await?;
    while let Ok(event) = events.try_recv() {
        write_event(&mut out, &event)?;
    }

    camera_task
        .await
        .context("camera task panicked")?
        .context("camera failed")?;

    info!("Pipeline stats: {}", serde_json::to_string(&stats)?);
    Ok(stats)
}

fn write_event(out: &mut impl Write, event: &SleepEvent) -> Result<()> {
    writeln!(out, "{}", serde_json::to_string(event)?)?;
    out.flush()?;
    Ok(())
}
