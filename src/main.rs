use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use handlecam::analytics::{Classifier, NoopClassifier, Pipeline, Report};
use handlecam::config::Config;

#[derive(Debug, Parser)]
#[command(
    name = "handlecam",
    version,
    about = "Report which target items appear in a video and how carefully it was handled"
)]
struct Args {
    /// Configuration file. Defaults to ./config.toml when present.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print one JSON report per line instead of the text summary.
    #[arg(long)]
    json: bool,

    /// Override the detection sampling stride from the config file.
    #[arg(long)]
    frame_step: Option<u64>,

    /// Video files to analyze.
    #[arg(required = true)]
    videos: Vec<PathBuf>,
}

#[derive(Serialize)]
struct VideoReport<'a> {
    video: &'a Path,
    #[serde(flatten)]
    report: &'a Report,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("handlecam=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(frame_step) = args.frame_step {
        config.pipeline.frame_step = frame_step;
    }
    config.validate()?;

    let classifier = build_classifier(&config)?;
    let shutdown = Arc::new(AtomicBool::new(false));
    let pipeline = Pipeline::new(&config, classifier)?.with_shutdown(Arc::clone(&shutdown));

    let videos = args.videos;
    let json = args.json;
    let worker_shutdown = Arc::clone(&shutdown);
    let mut worker =
        tokio::task::spawn_blocking(move || analyze_all(pipeline, &videos, json, &worker_shutdown));

    let failures = tokio::select! {
        result = &mut worker => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received, finalizing current video");
            shutdown.store(true, Ordering::Relaxed);
            worker.await?
        }
    };

    if failures > 0 {
        return Err(format!("{failures} video(s) could not be analyzed").into());
    }

    Ok(())
}

fn build_classifier(config: &Config) -> Result<Box<dyn Classifier>, Box<dyn std::error::Error>> {
    let Some(model) = config.detector.model.as_deref() else {
        tracing::info!("no detector model configured, running motion analysis only");
        return Ok(Box::new(NoopClassifier::new()));
    };

    #[cfg(feature = "yolo")]
    {
        let classifier = handlecam::analytics::YoloClassifier::new(
            model,
            config.detector.class_names.clone(),
            config.detector.intra_threads,
        )
        .map_err(|e| -> Box<dyn std::error::Error> { e })?;
        Ok(Box::new(classifier))
    }

    #[cfg(not(feature = "yolo"))]
    {
        Err(handlecam::config::ConfigError::DetectorUnavailable(PathBuf::from(model)).into())
    }
}

/// Analyzes each video in turn, printing its report. Returns how many
/// videos could not be opened.
fn analyze_all(mut pipeline: Pipeline, videos: &[PathBuf], json: bool, shutdown: &AtomicBool) -> usize {
    let mut failures = 0;

    for video in videos {
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!(video = %video.display(), "skipping, shutdown requested");
            continue;
        }

        let report = match pipeline.analyze_file(video) {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(video = %video.display(), error = %e, "analysis failed");
                failures += 1;
                continue;
            }
        };

        if json {
            match serde_json::to_string(&VideoReport {
                video,
                report: &report,
            }) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::error!(video = %video.display(), error = %e, "failed to encode report"),
            }
        } else if videos.len() > 1 {
            println!("{}: {}", video.display(), report);
        } else {
            println!("{report}");
        }
    }

    failures
}
