use std::{ffi::OsStr, fmt::Debug, path::Path};

use super::command::{assert_success_command, FFMPEG, FFXXX_DEFAULT_ARGS};
use crate::result::Result;

/// Sample rate expected by speech-to-text engines
const SAMPLE_RATE: &str = "16000";

pub trait AudioDecoder: Send + Sync + Debug {
    /// Decode the audio track of the input media into a mono PCM WAV file.
    ///
    /// The output file may already exist, in which case it is overwritten.
    fn to_wav(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Interface for the [ffmpeg](https://ffmpeg.org) program
#[derive(Debug)]
pub struct Ffmpeg;

impl Ffmpeg {
    /// Verify that the `ffmpeg` binary is reachable
    pub fn new() -> Result<Self> {
        assert_success_command(FFMPEG, |cmd| cmd.arg("-version"))?;

        Ok(Self)
    }
}

impl AudioDecoder for Ffmpeg {
    fn to_wav(&self, input: &Path, output: &Path) -> Result<()> {
        assert_success_command(FFMPEG, |cmd| {
            cmd.args(FFXXX_DEFAULT_ARGS)
                .arg("-y")
                .args([OsStr::new("-i"), input.as_os_str()])
                .arg("-vn")
                .args(["-ac", "1"])
                .args(["-ar", SAMPLE_RATE])
                .args(["-c:a", "pcm_s16le"])
                .arg("--")
                .arg(output)
        })
        .map_err(|err| err.wrap_err_with(|| "Could not decode audio to WAV"))
    }
}
