use std::{
    ffi::OsStr,
    fmt::Debug,
    io::{BufRead, BufReader, Lines},
    path::Path,
    process::{Child, ChildStdout, Command, Output},
};

use miette::{miette, Context, IntoDiagnostic};
use serde::Deserialize;
use tracing::{debug, warn};

use super::command::{
    assert_success_command, run_command, spawn_command, Capture, YT_DL, YT_DLP,
};
use crate::{
    my_regex::reports_unavailable,
    result::{Error, Result},
    types::{StreamReference, VideoHandle},
};

/// Lazy sequence of the videos of a channel, in catalog order
pub type VideoListing = Box<dyn Iterator<Item = Result<VideoHandle>> + Send>;

/// Interface for looking up the videos of a channel and their streams
pub trait Catalog: Send + Sync + Debug {
    /// Get the stable identifier of the channel
    fn channel_id(&self, channel_url: &str) -> Result<String>;

    /// List every video of the channel.
    ///
    /// The listing may be slow and is consumed lazily: videos can be
    /// returned before the whole channel has been walked.
    fn list_channel_videos(&self, channel_url: &str) -> Result<VideoListing>;

    /// Get the downloadable variants of the video.
    ///
    /// Must return [`Error::Unavailable`] if the catalog confirmed that
    /// the video cannot be accessed.
    fn resolve_stream_variants(&self, video: &VideoHandle) -> Result<Vec<StreamReference>>;
}

/// Interface for downloading a stream to a local file
pub trait StreamDownloader: Send + Sync + Debug {
    /// Download the stream data to the given path, overwriting it
    fn download(&self, stream: &StreamReference, path: &Path) -> Result<()>;
}

/// Interface for the [youtube-dl](https://github.com/ytdl-org/youtube-dl) program
#[derive(Debug)]
pub struct Ytdl {
    program: &'static str,
}

impl Ytdl {
    /// Verify that the `yt-dlp` or `youtube-dl` binaries are reachable
    pub fn new() -> Result<Self> {
        // Check `yt-dlp`
        if assert_success_command(YT_DLP, |cmd| cmd.arg("--version")).is_ok() {
            Ok(Self { program: YT_DLP })
        } else if assert_success_command(YT_DL, |cmd| cmd.arg("--version")).is_ok() {
            // Check `youtube-dl`
            Ok(Self { program: YT_DL })
        } else {
            Err(miette!("Neither yt-dlp nor youtube-dl found").into())
        }
    }

    /// Run the command and check if it failed with saying the stream is unavailable.
    /// In that case, return [`Error::Unavailable`].
    ///
    /// In other cases, return the output handle.
    pub fn run_check_availability<F>(&self, f: F, capture: Capture) -> Result<Output>
    where
        F: FnOnce(&mut Command) -> &mut Command,
    {
        let res = run_command(self.program, f, capture | Capture::STDERR)?;

        let stderr = String::from_utf8_lossy(&res.stderr);
        if reports_unavailable(&stderr) {
            Err(Error::Unavailable)
        } else if !res.status.success() {
            let last_line = stderr.lines().last().unwrap_or_default();
            Err(miette!("{} failed ({}): {last_line}", self.program, res.status).into())
        } else {
            Ok(res)
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlaylistInfo {
    id: Option<String>,
    channel_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoInfo {
    #[serde(default)]
    formats: Vec<FormatInfo>,
}

#[derive(Debug, Deserialize)]
struct FormatInfo {
    format_id: String,
    ext: String,
    vcodec: Option<String>,
    acodec: Option<String>,
}

impl FormatInfo {
    fn has_audio(&self) -> bool {
        self.acodec.as_deref() != Some("none")
    }

    fn has_video(&self) -> bool {
        self.vcodec.as_deref().is_some_and(|codec| codec != "none")
    }
}

impl Catalog for Ytdl {
    fn channel_id(&self, channel_url: &str) -> Result<String> {
        let res = self.run_check_availability(
            |cmd| {
                cmd.arg("-q")
                    .arg("--flat-playlist")
                    .args(["--playlist-items", "1"])
                    .arg("-J")
                    .arg("--")
                    .arg(channel_url)
            },
            Capture::STDOUT,
        )?;

        let info: PlaylistInfo = serde_json::from_slice(&res.stdout)
            .into_diagnostic()
            .wrap_err("Could not parse channel JSON")?;

        Ok(info
            .channel_id
            .or(info.id)
            .ok_or_else(|| miette!("No channel ID found for {channel_url}"))?)
    }

    fn list_channel_videos(&self, channel_url: &str) -> Result<VideoListing> {
        let mut child = spawn_command(self.program, |cmd| {
            cmd.arg("-q")
                .arg("--flat-playlist")
                .args(["--print", "%(id)s\t%(url)s"])
                .arg("--")
                .arg(channel_url)
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| miette!("Listing stdout was not captured"))?;

        Ok(Box::new(ChannelListing {
            program: self.program,
            lines: BufReader::new(stdout).lines(),
            child,
            finished: false,
        }))
    }

    fn resolve_stream_variants(&self, video: &VideoHandle) -> Result<Vec<StreamReference>> {
        let res = self.run_check_availability(
            |cmd| {
                cmd.arg("-q")
                    .arg("--skip-download")
                    .arg("-j")
                    .arg("--")
                    .arg(&video.url)
            },
            Capture::STDOUT,
        )?;

        let info: VideoInfo = serde_json::from_slice(&res.stdout)
            .into_diagnostic()
            .wrap_err("Could not parse video JSON")?;

        // Formats are listed from worst to best quality.
        // Storyboards and video-only streams are useless for transcription.
        Ok(info
            .formats
            .into_iter()
            .rev()
            .filter(|f| f.ext != "mhtml" && f.has_audio())
            .map(|f| StreamReference {
                audio_only: !f.has_video(),
                format_id: f.format_id,
                subtype: f.ext,
                source_url: video.url.clone(),
            })
            .collect())
    }
}

impl StreamDownloader for Ytdl {
    fn download(&self, stream: &StreamReference, path: &Path) -> Result<()> {
        self.run_check_availability(
            |cmd| {
                cmd.arg("-q")
                    .args([OsStr::new("-o"), path.as_os_str()])
                    .arg("--no-continue") // Or else fails when file already exists, even an empty one
                    .arg("--force-overwrites")
                    .args(["-f", &stream.format_id])
                    .arg("--")
                    .arg(&stream.source_url)
            },
            Capture::empty(),
        )
        .map(|_| ())
    }
}

/// Channel listing read line by line from a running catalog process
struct ChannelListing {
    program: &'static str,
    lines: Lines<BufReader<ChildStdout>>,
    child: Child,
    finished: bool,
}

impl ChannelListing {
    fn parse_line(line: &str) -> Option<VideoHandle> {
        let mut parts = line.trim().splitn(2, '\t');
        let video_id = parts.next().filter(|id| !id.is_empty())?;
        let url = match parts.next() {
            Some(url) if url.starts_with("http") => url.to_owned(),
            _ => format!("https://www.youtube.com/watch?v={video_id}"),
        };

        Some(VideoHandle::new(video_id, url))
    }

    /// Wait for the process and turn a failure status into an error
    fn finish(&mut self) -> Option<Result<VideoHandle>> {
        self.finished = true;
        match self.child.wait() {
            Ok(status) if status.success() => None,
            Ok(status) => Some(Err(miette!(
                "{} stopped listing the channel ({status})",
                self.program
            )
            .into())),
            Err(err) => Some(Err(Error::Miette(
                miette!("{err}").wrap_err("Could not wait for the listing process"),
            ))),
        }
    }
}

impl Iterator for ChannelListing {
    type Item = Result<VideoHandle>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            match self.lines.next() {
                Some(Ok(line)) => match Self::parse_line(&line) {
                    Some(video) => return Some(Ok(video)),
                    None => debug!("Ignoring listing line {line:?}"),
                },
                Some(Err(err)) => {
                    warn!("Could not read listing output: {err}");
                    return self.finish();
                }
                None => return self.finish(),
            }
        }

        None
    }
}

impl Drop for ChannelListing {
    fn drop(&mut self) {
        if !self.finished {
            // The consumer stopped early, no need to keep walking the channel
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
