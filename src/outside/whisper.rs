use std::{ffi::OsStr, fmt::Debug, io::ErrorKind, path::Path, process::Output};

use miette::{miette, Context, IntoDiagnostic};
use tracing::debug;

use super::command::{assert_success_command, run_command, Capture, WHISPER};
use crate::result::{Error, Result};

pub const DEFAULT_MODEL: &str = "base";

pub trait Transcriber: Send + Sync + Debug {
    /// Convert the speech of a local audio file to text.
    ///
    /// Must return [`Error::TranscriptionFailed`] if the engine ran to completion
    /// but produced no text, any other error is worth retrying.
    fn transcribe(&self, audio: &Path) -> Result<String>;
}

/// Interface for the [whisper](https://github.com/openai/whisper) program
#[derive(Debug)]
pub struct Whisper {
    model: String,
}

impl Whisper {
    /// Verify that the `whisper` binary is reachable
    pub fn new(model: impl Into<String>) -> Result<Self> {
        assert_success_command(WHISPER, |cmd| cmd.arg("--help"))?;

        Ok(Self {
            model: model.into(),
        })
    }
}

impl Transcriber for Whisper {
    fn transcribe(&self, audio: &Path) -> Result<String> {
        // Whisper writes its output next to a name derived from the input,
        // give it its own directory that disappears with the handle
        let out_dir = tempfile::tempdir()
            .into_diagnostic()
            .wrap_err("Could not create transcription directory")?;

        let res = run_command(
            WHISPER,
            |cmd| {
                cmd.arg(audio)
                    .args(["--model", &self.model])
                    .args(["--output_format", "txt"])
                    .args([OsStr::new("--output_dir"), out_dir.path().as_os_str()])
                    .args(["--verbose", "False"])
            },
            Capture::STDERR,
        )?;

        let stem = audio.file_stem().unwrap_or_default();
        let txt = out_dir.path().join(stem).with_extension("txt");
        transcript_of_run(&res, &txt)
    }
}

/// Interpret the end of a whisper run.
///
/// A failed process (crash, killed, model download error) may succeed when run again.
/// A clean exit without any text means the audio itself cannot be transcribed.
fn transcript_of_run(res: &Output, txt: &Path) -> Result<String> {
    if !res.status.success() {
        let stderr = String::from_utf8_lossy(&res.stderr);
        let reason = stderr.lines().last().unwrap_or_default();
        return Err(miette!("whisper stopped with {}: {reason}", res.status).into());
    }

    debug!("Reading transcript from {}", txt.display());
    let text = match std::fs::read_to_string(txt) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(Error::TranscriptionFailed("no transcript produced".into()));
        }
        Err(err) => {
            return Err(Error::Miette(
                miette!("{err}").wrap_err("Could not read the transcript produced by whisper"),
            ));
        }
    };

    let text = text.trim();
    if text.is_empty() {
        return Err(Error::TranscriptionFailed("empty transcript".into()));
    }
    Ok(text.to_owned())
}
