mod cli;
mod io;
mod logging;
mod my_regex;
mod outside;
mod pipeline;
mod result;
mod settings;
mod types;
mod utils;

use std::sync::Arc;

use clap::Parser;
use miette::{miette, Result};
use outside::{Ffmpeg, Whisper, Ytdl};
use pipeline::{Orchestrator, Tools};
use tracing::{debug, info};

use crate::{cli::Args, settings::Settings};

fn main() -> Result<()> {
    // Initialize the environment & CLI
    let args = Args::parse();
    logging::init_logging(args.log_level)?;

    let settings = Settings::load(&args)?;
    debug!("Settings: {settings:?}");

    let (ytdl, ffmpeg, whisper) = load_external_components(&settings)?;
    let ytdl = Arc::new(ytdl);
    let tools = Tools {
        downloader: ytdl.clone(),
        decoder: Arc::new(ffmpeg),
        transcriber: Arc::new(whisper),
    };

    let orchestrator = Orchestrator::new(
        ytdl,
        tools,
        &args.url,
        &args.output_dir,
        settings.pipeline_config(),
    )?;
    info!(
        "Transcripts will be written in {}",
        orchestrator.out_dir().display()
    );

    let summary = orchestrator.run()?;

    info!("All tasks completed: {summary}");
    Ok(())
}

/// Load the external components
fn load_external_components(settings: &Settings) -> Result<(Ytdl, Ffmpeg, Whisper)> {
    // Construct the handles concurrently as executing an external program
    // is not instantaneous. That way we can avoid adding the costs
    let model = settings.transcription.model.clone();
    let ytdl_thread = std::thread::spawn(Ytdl::new);
    let ffmpeg_thread = std::thread::spawn(Ffmpeg::new);
    let whisper_thread = std::thread::spawn(move || Whisper::new(model));

    let join_err = |_| miette!("Could not join thread");
    let ytdl = ytdl_thread.join().map_err(join_err)??;
    let ffmpeg = ffmpeg_thread.join().map_err(join_err)??;
    let whisper = whisper_thread.join().map_err(join_err)??;

    Ok((ytdl, ffmpeg, whisper))
}
