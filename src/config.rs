//! Runtime configuration loaded from the environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::timing::MapperConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Directory holding per-job scratch directories
    pub scratch_dir: PathBuf,
    /// Scratch estimate as a multiple of the source file size
    pub scratch_multiplier: f64,
    /// Maximum number of jobs running their redaction step at once
    pub pool_size: usize,
    pub mapper: MapperConfig,
    /// Spans whose words all fall below this confidence are suppressed
    pub confidence_threshold: f32,
    /// Optional JSON rule file; the built-in rules apply when unset
    pub rules_path: Option<PathBuf>,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub transcription_url: String,
    pub transcription_attempts: u32,
    pub transcription_backoff: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:data/callscrub.db".to_string(),
            scratch_dir: PathBuf::from("scratch"),
            scratch_multiplier: 3.0,
            pool_size: default_pool_size(),
            mapper: MapperConfig::default(),
            confidence_threshold: 0.4,
            rules_path: None,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            transcription_url: "http://127.0.0.1:9000".to_string(),
            transcription_attempts: 3,
            transcription_backoff: Duration::from_millis(500),
        }
    }
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let padding_ms: u64 = env_or("REDACT_PADDING_MS", 150);
        let merge_gap_ms: u64 = env_or("REDACT_MERGE_GAP_MS", 100);

        Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            scratch_dir: std::env::var("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_dir),
            scratch_multiplier: env_or("SCRATCH_MULTIPLIER", defaults.scratch_multiplier),
            pool_size: env_or("POOL_SIZE", defaults.pool_size).max(1),
            mapper: MapperConfig {
                padding_secs: padding_ms as f64 / 1000.0,
                merge_gap_secs: merge_gap_ms as f64 / 1000.0,
            },
            confidence_threshold: env_or("CONFIDENCE_THRESHOLD", defaults.confidence_threshold),
            rules_path: std::env::var("RULES_PATH").ok().map(PathBuf::from),
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: std::env::var("FFPROBE_PATH").unwrap_or(defaults.ffprobe_path),
            transcription_url: std::env::var("TRANSCRIPTION_URL")
                .unwrap_or(defaults.transcription_url),
            transcription_attempts: env_or(
                "TRANSCRIPTION_ATTEMPTS",
                defaults.transcription_attempts,
            ),
            transcription_backoff: Duration::from_millis(env_or(
                "TRANSCRIPTION_BACKOFF_MS",
                500,
            )),
        }
    }
}
