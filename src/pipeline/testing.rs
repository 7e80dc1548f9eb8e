//! Scripted collaborators for exercising the pipeline without external programs

use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender};
use miette::miette;

use crate::{
    outside::{AudioDecoder, Catalog, StreamDownloader, Transcriber, VideoListing},
    result::{Error, Result},
    types::{StreamReference, VideoHandle},
};

/// How the fake catalog answers when resolving a video
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Ok,
    Unavailable,
    FailTimes(u32),
    AlwaysFail,
    NoVariants,
}

/// Counts the concurrent calls of a section and remembers the highest count
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct FakeCatalog {
    videos: Vec<(String, Behavior)>,
    listing_error_after: Option<usize>,
    listing_delay: Duration,
    resolve_delay: Duration,
    attempts: Mutex<HashMap<String, u32>>,
    resolving: ConcurrencyProbe,
}

impl FakeCatalog {
    pub fn ids(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("vid{i:02}")).collect()
    }

    pub fn with_videos(count: usize) -> Self {
        Self {
            videos: Self::ids(count)
                .into_iter()
                .map(|id| (id, Behavior::Ok))
                .collect(),
            ..Default::default()
        }
    }

    pub fn behavior(mut self, video_id: &str, behavior: Behavior) -> Self {
        for (id, b) in &mut self.videos {
            if id == video_id {
                *b = behavior;
            }
        }
        self
    }

    /// Make the listing fail after having listed this number of videos
    pub fn listing_error_after(mut self, count: usize) -> Self {
        self.listing_error_after = Some(count);
        self
    }

    /// Wait before listing every video
    pub fn listing_delay(mut self, delay: Duration) -> Self {
        self.listing_delay = delay;
        self
    }

    /// Wait during every resolution attempt
    pub fn resolve_delay(mut self, delay: Duration) -> Self {
        self.resolve_delay = delay;
        self
    }

    pub fn video(&self, idx: usize) -> VideoHandle {
        let id = &self.videos[idx].0;
        VideoHandle::new(id, format!("https://example.com/watch?v={id}"))
    }

    pub fn attempts(&self, video_id: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(video_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn peak_resolving(&self) -> usize {
        self.resolving.peak()
    }

    fn behavior_of(&self, video_id: &str) -> Behavior {
        self.videos
            .iter()
            .find(|(id, _)| id == video_id)
            .map_or(Behavior::Unavailable, |(_, b)| *b)
    }
}

impl Catalog for FakeCatalog {
    fn channel_id(&self, _channel_url: &str) -> Result<String> {
        Ok("UCfake".to_owned())
    }

    fn list_channel_videos(&self, _channel_url: &str) -> Result<VideoListing> {
        let delay = self.listing_delay;
        let videos: Vec<_> = (0..self.videos.len()).map(|i| self.video(i)).collect();
        let error_after = self.listing_error_after.unwrap_or(usize::MAX);

        Ok(Box::new(videos.into_iter().enumerate().map_while(
            move |(i, video)| {
                std::thread::sleep(delay);
                if i < error_after {
                    Some(Ok(video))
                } else if i == error_after {
                    Some(Err(miette!("Listing interrupted").into()))
                } else {
                    None
                }
            },
        )))
    }

    fn resolve_stream_variants(&self, video: &VideoHandle) -> Result<Vec<StreamReference>> {
        self.resolving.enter();
        std::thread::sleep(self.resolve_delay);

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let attempt = attempts.entry(video.video_id.clone()).or_default();
            *attempt += 1;
            *attempt
        };

        let res = match self.behavior_of(&video.video_id) {
            Behavior::Ok => Ok(()),
            Behavior::FailTimes(n) if attempt > n => Ok(()),
            Behavior::FailTimes(_) | Behavior::AlwaysFail => {
                Err(miette!("Connection reset on attempt {attempt}").into())
            }
            Behavior::Unavailable => Err(Error::Unavailable),
            Behavior::NoVariants => {
                self.resolving.exit();
                return Ok(vec![]);
            }
        };

        self.resolving.exit();
        res.map(|()| {
            vec![
                stream(video, "18", "mp4", false),
                stream(video, "251", "webm", true),
            ]
        })
    }
}

fn stream(
    video: &VideoHandle,
    format_id: &str,
    subtype: &str,
    audio_only: bool,
) -> StreamReference {
    StreamReference {
        format_id: format_id.to_owned(),
        subtype: subtype.to_owned(),
        audio_only,
        source_url: video.url.clone(),
    }
}

/// Stream of a fake video that can be given directly to the transcription pool
pub fn fake_stream(video_id: &str) -> StreamReference {
    stream(
        &VideoHandle::new(video_id, format!("https://example.com/watch?v={video_id}")),
        "251",
        "webm",
        true,
    )
}

/// Writes the stream source URL as the media content
#[derive(Debug, Default)]
pub struct FakeDownloader {
    failing: HashSet<String>,
}

impl FakeDownloader {
    pub fn failing(ids: &[&str]) -> Self {
        Self {
            failing: ids.iter().map(|id| id.to_string()).collect(),
        }
    }
}

impl StreamDownloader for FakeDownloader {
    fn download(&self, stream: &StreamReference, path: &Path) -> Result<()> {
        if self.failing.iter().any(|id| stream.source_url.ends_with(id)) {
            // Leave a truncated file behind, like an interrupted transfer
            std::fs::write(path, "partial").map_err(|err| miette!("{err}"))?;
            return Err(miette!("Download interrupted").into());
        }
        std::fs::write(path, &stream.source_url).map_err(|err| miette!("{err}"))?;
        Ok(())
    }
}

/// Copies the media as is
#[derive(Debug, Default)]
pub struct FakeDecoder {
    failing: HashSet<String>,
}

impl FakeDecoder {
    /// Fail after a partial write for the videos whose source ends with one of the ids
    pub fn failing(ids: &[&str]) -> Self {
        Self {
            failing: ids.iter().map(|id| id.to_string()).collect(),
        }
    }
}

impl AudioDecoder for FakeDecoder {
    fn to_wav(&self, input: &Path, output: &Path) -> Result<()> {
        let source = std::fs::read_to_string(input).map_err(|err| miette!("{err}"))?;
        if self.failing.iter().any(|id| source.ends_with(id)) {
            std::fs::write(output, "RIFF").map_err(|err| miette!("{err}"))?;
            return Err(miette!("Invalid data found when processing input").into());
        }
        std::fs::write(output, source).map_err(|err| miette!("{err}"))?;
        Ok(())
    }
}

/// Turns the audio file content into its "transcript"
#[derive(Debug, Default)]
pub struct FakeTranscriber {
    delay: Duration,
    failing: HashSet<String>,
    crashing: HashMap<String, u32>,
    crashes: Mutex<HashMap<String, u32>>,
    panicking: HashSet<String>,
    running: ConcurrencyProbe,
    calls: AtomicUsize,
    started: Option<Sender<()>>,
    gate: Option<Receiver<()>>,
}

impl FakeTranscriber {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    /// Fail permanently for the videos whose source ends with one of the ids
    pub fn failing(mut self, ids: &[&str]) -> Self {
        self.failing = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    /// Crash the given number of times, then succeed, for the videos whose
    /// source ends with one of the ids
    pub fn crashing(mut self, ids: &[&str], times: u32) -> Self {
        self.crashing = ids.iter().map(|id| (id.to_string(), times)).collect();
        self
    }

    /// Panic for the videos whose source ends with one of the ids
    pub fn panicking(mut self, ids: &[&str]) -> Self {
        self.panicking = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    /// Notify every start of transcription, then wait for a message on the gate
    pub fn gated(mut self, started: Sender<()>, gate: Receiver<()>) -> Self {
        self.started = Some(started);
        self.gate = Some(gate);
        self
    }

    pub fn peak_running(&self) -> usize {
        self.running.peak()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transcriber for FakeTranscriber {
    fn transcribe(&self, audio: &Path) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.running.enter();

        if let Some(started) = &self.started {
            let _ = started.send(());
        }
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        std::thread::sleep(self.delay);

        let source = std::fs::read_to_string(audio).map_err(|err| miette!("{err}"));
        self.running.exit();

        let source = source?;
        if self.panicking.iter().any(|id| source.ends_with(id)) {
            panic!("Transcriber bug on {source}");
        }
        if self.failing.iter().any(|id| source.ends_with(id)) {
            return Err(Error::TranscriptionFailed("no speech detected".into()));
        }

        let crash_limit = self
            .crashing
            .iter()
            .find(|(id, _)| source.ends_with(id.as_str()))
            .map(|(id, times)| (id.clone(), *times));
        if let Some((id, times)) = crash_limit {
            let mut crashes = self.crashes.lock().unwrap();
            let count = crashes.entry(id).or_default();
            if *count < times {
                *count += 1;
                return Err(miette!("Engine crashed, run {count}").into());
            }
        }
        Ok(format!("transcript of {source}"))
    }
}
