use std::{
    fmt::Display,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, info};

use super::{
    crawler::{CrawledStream, Crawler, CrawlerConfig, Listing},
    pool::{PoolConfig, Tools, TranscriptionPool},
    retry::RetryPolicy,
};
use crate::{io::channel_output_dir, outside::Catalog, result::Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineConfig {
    pub crawler: CrawlerConfig,
    pub resolve_retry: RetryPolicy,
    pub pool: PoolConfig,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub discovered: usize,
    pub resolved: usize,
    pub transcribed: usize,
    pub failed: usize,
    pub peak_workers: usize,
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} videos found, {} resolved, {} transcribed, {} failed (at most {} workers)",
            self.discovered, self.resolved, self.transcribed, self.failed, self.peak_workers
        )
    }
}

/// Feed the resolved streams of a channel to the transcription pool
#[derive(Debug)]
pub struct Orchestrator {
    crawler: Crawler,
    tools: Tools,
    out_dir: PathBuf,
    config: PipelineConfig,
}

impl Orchestrator {
    /// Prepare the transcription of a channel into `<output_root>/<channel_id>/`
    pub fn new(
        catalog: Arc<dyn Catalog>,
        tools: Tools,
        channel_url: &str,
        output_root: &Path,
        config: PipelineConfig,
    ) -> Result<Self> {
        let channel_id = catalog
            .channel_id(channel_url)
            .map_err(|err| err.wrap_err_with(|| "Could not get the channel ID"))?;
        let out_dir = channel_output_dir(output_root, &channel_id)?;

        Ok(Self {
            crawler: Crawler::new(catalog, channel_url, config.resolve_retry, config.crawler),
            tools,
            out_dir,
            config,
        })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Transcribe the whole channel.
    ///
    /// Already queued transcriptions are completed even if the run fails.
    pub fn run(&self) -> Result<RunSummary> {
        let mut listing = self.crawler.list()?;
        let pool = TranscriptionPool::new(self.tools.clone(), &self.out_dir, self.config.pool);

        let mut resolved = 0;
        let fed = Self::feed(&mut listing, &pool, &mut resolved);
        let discovered = listing.discovered_count();
        drop(listing);

        info!("Waiting for the last transcriptions to complete");
        let stats = pool.finish();
        fed?;

        Ok(RunSummary {
            discovered,
            resolved,
            transcribed: stats.transcribed,
            failed: stats.failed,
            peak_workers: stats.peak_workers,
        })
    }

    fn feed(
        listing: &mut Listing<'_>,
        pool: &TranscriptionPool,
        resolved: &mut usize,
    ) -> Result<()> {
        for item in listing {
            let CrawledStream {
                video_id,
                stream,
                total_discovered,
            } = item?;

            *resolved += 1;
            info!("[{resolved}/{total_discovered}] Queueing video {video_id} ({stream})");

            // Blocks while the pool is saturated, which slows down the crawler
            pool.enqueue(video_id, stream)?;
            debug!("{} transcription workers running", pool.active_workers());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, time::Duration};

    use super::*;
    use crate::pipeline::{
        enumerator::EnumeratorConfig,
        testing::{Behavior, FakeCatalog, FakeDecoder, FakeDownloader, FakeTranscriber},
    };

    fn config(batch_size: usize, capacity: usize) -> PipelineConfig {
        PipelineConfig {
            crawler: CrawlerConfig {
                batch_size,
                poll_interval: Duration::from_millis(5),
                enumerator: EnumeratorConfig::default(),
            },
            resolve_retry: RetryPolicy::new(3, Duration::ZERO),
            pool: PoolConfig {
                capacity,
                queue_capacity: 2,
                put_timeout: Duration::from_secs(10),
                transcription_retry: RetryPolicy::new(3, Duration::ZERO),
            },
        }
    }

    fn tools(transcriber: Arc<FakeTranscriber>) -> Tools {
        Tools {
            downloader: Arc::new(FakeDownloader::default()),
            decoder: Arc::new(FakeDecoder::default()),
            transcriber,
        }
    }

    fn transcripts(dir: &Path) -> BTreeSet<String> {
        dir.read_dir()
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn transcribes_every_resolved_video_of_the_channel() {
        let root = tempfile::tempdir().unwrap();
        let catalog = Arc::new(
            FakeCatalog::with_videos(12)
                .behavior("vid02", Behavior::Unavailable)
                .behavior("vid05", Behavior::FailTimes(2))
                .behavior("vid08", Behavior::AlwaysFail)
                .behavior("vid11", Behavior::NoVariants)
                .listing_delay(Duration::from_millis(1))
                .resolve_delay(Duration::from_millis(5)),
        );
        let transcriber = Arc::new(FakeTranscriber::with_delay(Duration::from_millis(10)));

        let orchestrator = Orchestrator::new(
            catalog.clone(),
            tools(transcriber.clone()),
            "https://example.com/@fake",
            root.path(),
            config(5, 3),
        )
        .unwrap();
        assert_eq!(orchestrator.out_dir(), root.path().join("UCfake"));

        let summary = orchestrator.run().unwrap();

        let expected: BTreeSet<_> = FakeCatalog::ids(12)
            .into_iter()
            .filter(|id| !["vid02", "vid08", "vid11"].contains(&id.as_str()))
            .map(|id| format!("{id}.txt"))
            .collect();
        assert_eq!(transcripts(orchestrator.out_dir()), expected);
        assert_eq!(
            summary,
            RunSummary {
                discovered: 12,
                resolved: 9,
                transcribed: 9,
                failed: 0,
                peak_workers: summary.peak_workers,
            }
        );
        assert!(summary.peak_workers <= 3);
        assert!(transcriber.peak_running() <= 3);
        assert!(catalog.peak_resolving() <= 5);
        assert_eq!(catalog.attempts("vid02"), 1);
        assert_eq!(catalog.attempts("vid05"), 3);
        assert_eq!(catalog.attempts("vid08"), 3);
    }

    #[test]
    fn rerun_overwrites_transcripts() {
        let root = tempfile::tempdir().unwrap();
        let catalog = Arc::new(FakeCatalog::with_videos(4));
        let orchestrator = Orchestrator::new(
            catalog,
            tools(Arc::new(FakeTranscriber::default())),
            "https://example.com/@fake",
            root.path(),
            config(2, 2),
        )
        .unwrap();

        orchestrator.run().unwrap();
        let first = std::fs::read_to_string(orchestrator.out_dir().join("vid01.txt")).unwrap();

        let summary = orchestrator.run().unwrap();
        let second = std::fs::read_to_string(orchestrator.out_dir().join("vid01.txt")).unwrap();

        assert_eq!(summary.transcribed, 4);
        assert_eq!(first, second);
        assert_eq!(transcripts(orchestrator.out_dir()).len(), 4);
    }

    #[test]
    fn listing_failure_fails_the_run_after_draining() {
        let root = tempfile::tempdir().unwrap();
        let catalog = Arc::new(FakeCatalog::with_videos(6).listing_error_after(3));
        let orchestrator = Orchestrator::new(
            catalog,
            tools(Arc::new(FakeTranscriber::default())),
            "https://example.com/@fake",
            root.path(),
            config(5, 2),
        )
        .unwrap();

        assert!(orchestrator.run().is_err());
        // What was queued before the failure has still been transcribed
        assert_eq!(transcripts(orchestrator.out_dir()).len(), 3);
    }
}
