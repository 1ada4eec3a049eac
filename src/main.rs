use anyhow::Context as _;
use dotenvy::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use callscrub::config::Config;
use callscrub::db;
use callscrub::detect::{Detector, RuleSet};
use callscrub::pipeline::{Coordinator, RecordingState};
use callscrub::redact::FfmpegRedactor;
use callscrub::transcription::HttpTranscriptionClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let files: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    if files.is_empty() {
        anyhow::bail!("usage: callscrub <audio-file>...");
    }

    let config = Config::from_env();

    let db_pool = db::init_db(&config.database_url)
        .await
        .context("Failed to initialize database")?;
    info!("Database initialized successfully");

    let rules = match &config.rules_path {
        Some(path) => RuleSet::load(path).context("Failed to load redaction rules")?,
        None => RuleSet::builtin(),
    };
    info!(
        "Loaded {} redaction rule(s), version {}",
        rules.rules.len(),
        rules.version
    );

    let detector = Arc::new(
        Detector::new(&rules, config.confidence_threshold)
            .context("Failed to compile redaction rules")?,
    );
    let transcriber = Arc::new(HttpTranscriptionClient::new(
        config.transcription_url.clone(),
        config.transcription_attempts,
        config.transcription_backoff,
    ));
    let redactor = Arc::new(FfmpegRedactor::new(
        config.ffmpeg_path.clone(),
        config.ffprobe_path.clone(),
    ));

    let (coordinator, mut events) =
        Coordinator::new(config, db_pool, transcriber, redactor, detector);

    let mut pending = 0usize;
    for file in files {
        match coordinator.submit(file.clone()) {
            Ok(id) => {
                pending += 1;
                info!("Submitted {} as {}", file.display(), id);
            }
            Err(e) => error!("Failed to submit {}: {}", file.display(), e),
        }
    }

    // Each recording surfaces here the moment it finishes, not when the
    // whole batch drains
    while pending > 0 {
        let Some(event) = events.recv().await else {
            break;
        };
        pending -= 1;

        match (event.state, event.error_category) {
            (RecordingState::Done, None) => info!("Recording {} is ready", event.id),
            (RecordingState::Done, Some(category)) => warn!(
                "Recording {} redacted but {}: {}",
                event.id,
                category,
                event.detail.unwrap_or_default()
            ),
            (state, category) => error!(
                "Recording {} ended in {} ({}): {}",
                event.id,
                state,
                category.unwrap_or("unknown"),
                event.detail.unwrap_or_default()
            ),
        }
    }

    Ok(())
}
