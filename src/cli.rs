use std::path::PathBuf;

use clap::Parser;

macro_rules! arg_env {
    ($v:literal) => {
        concat!("TUBESCRIBE_", $v)
    };
}

/// Transcribe every video of a channel to text.
/// Videos are listed, their audio stream resolved, then downloaded and transcribed
/// by a bounded number of background workers.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// The URL of the channel whose videos to transcribe
    #[arg(long, env=arg_env!("URL"))]
    pub url: String,

    /// The path to the output directory.
    /// Transcripts are written in a sub-directory named after the channel ID
    #[arg(long, alias = "output_dir", env=arg_env!("OUTPUT_DIR"))]
    pub output_dir: PathBuf,

    /// The number of videos whose stream is resolved concurrently [default: 5]
    #[arg(long, env=arg_env!("BATCH"))]
    pub batch: Option<usize>,

    /// The maximum number of videos transcribed at the same time [default: 3]
    #[arg(long, alias = "background_processes", env=arg_env!("BACKGROUND_PROCESSES"))]
    pub background_processes: Option<usize>,

    /// The transcription model to use (e.g. tiny, base, small, medium, large) [default: base]
    #[arg(long, env=arg_env!("MODEL"))]
    pub model: Option<String>,

    /// The path to a TOML file tuning timeouts, retries and queue sizes
    #[arg(long, env=arg_env!("CONFIG"))]
    pub config: Option<PathBuf>,

    /// The maximum level of the logs to print
    #[arg(long, default_value_t = tracing::Level::INFO, env=arg_env!("LOG_LEVEL"))]
    pub log_level: tracing::Level,
}
