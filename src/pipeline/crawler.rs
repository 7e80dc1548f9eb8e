use std::{collections::VecDeque, sync::Arc, time::Duration};

use crossbeam_channel::{RecvTimeoutError, TryRecvError};
use miette::miette;
use tracing::{debug, error, trace, warn};

use super::{
    enumerator::{
        CatalogEnumerator, EnumerationOutcome, EnumerationState, EnumeratorConfig,
        EnumeratorHandle,
    },
    resolver::StreamResolver,
    retry::RetryPolicy,
};
use crate::{
    outside::Catalog,
    result::Result,
    types::{StreamReference, VideoHandle},
};

#[derive(Debug, Clone, Copy)]
pub struct CrawlerConfig {
    /// Number of videos resolved concurrently
    pub batch_size: usize,

    /// How long to wait for the enumerator when its queue is empty.
    /// A shorter interval reacts faster but wakes up more often.
    pub poll_interval: Duration,

    pub enumerator: EnumeratorConfig,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            poll_interval: Duration::from_millis(100),
            enumerator: EnumeratorConfig::default(),
        }
    }
}

/// A resolved stream, along with the number of videos discovered so far in the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawledStream {
    pub video_id: String,
    pub stream: StreamReference,
    pub total_discovered: usize,
}

/// Turns the listing of a channel into a sequence of resolved streams
#[derive(Debug)]
pub struct Crawler {
    catalog: Arc<dyn Catalog>,
    channel_url: String,
    resolver: StreamResolver,
    config: CrawlerConfig,
}

impl Crawler {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        channel_url: &str,
        retry: RetryPolicy,
        config: CrawlerConfig,
    ) -> Self {
        Self {
            resolver: StreamResolver::new(catalog.clone(), retry),
            catalog,
            channel_url: channel_url.to_owned(),
            config,
        }
    }

    /// Start listing the channel and return the lazy sequence of its resolved streams.
    ///
    /// Every call starts a new enumeration of the channel.
    pub fn list(&self) -> Result<Listing<'_>> {
        let enumerator = CatalogEnumerator::new(
            self.catalog.clone(),
            &self.channel_url,
            self.config.enumerator,
        )
        .on_complete(|outcome| debug!("Enumeration {outcome}"))
        .start()?;

        Ok(Listing {
            crawler: self,
            state: enumerator.state(),
            enumerator: Some(enumerator),
            ready: VecDeque::with_capacity(self.config.batch_size),
        })
    }
}

/// Sequence of resolved streams of a channel.
///
/// Streams are resolved in batches: a batch is only produced once all of
/// its videos have been processed. Videos that could not be resolved are skipped.
///
/// If the listing failed, the already discovered videos are still produced
/// before a single error ends the sequence.
pub struct Listing<'a> {
    crawler: &'a Crawler,
    state: Arc<EnumerationState>,
    enumerator: Option<EnumeratorHandle>,
    ready: VecDeque<(String, StreamReference)>,
}

impl Listing<'_> {
    /// Number of videos discovered in the channel so far
    pub fn discovered_count(&self) -> usize {
        self.state.discovered_count()
    }

    /// Take up to a batch of videos from the enumerator queue.
    ///
    /// Waits for at least one video, unless the enumeration is over and the queue
    /// drained, in which case the returned batch is empty.
    /// A partial batch is returned as soon as the queue is momentarily empty.
    fn next_batch(&self, enumerator: &EnumeratorHandle) -> Vec<VideoHandle> {
        let config = &self.crawler.config;
        let queue = enumerator.queue();
        let mut batch = Vec::with_capacity(config.batch_size);

        while batch.len() < config.batch_size {
            match queue.try_recv() {
                Ok(video) => batch.push(video),
                Err(TryRecvError::Empty) if !batch.is_empty() => break,
                Err(TryRecvError::Empty) => {
                    if !enumerator.is_running() && queue.is_empty() {
                        break;
                    }

                    match queue.recv_timeout(config.poll_interval) {
                        Ok(video) => batch.push(video),
                        Err(RecvTimeoutError::Timeout) => trace!("Waiting for the listing"),
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                Err(TryRecvError::Disconnected) => break,
            }
        }

        batch
    }

    /// Resolve all the videos concurrently, each in its own thread,
    /// and return the ones that got a stream
    fn resolve_batch(&self, batch: &[VideoHandle]) -> Vec<(String, StreamReference)> {
        let resolver = &self.crawler.resolver;

        debug!("Resolving a batch of {} videos", batch.len());
        let resolved: Vec<_> = std::thread::scope(|scope| {
            let pending: Vec<_> = batch
                .iter()
                .enumerate()
                .map(|(i, video)| {
                    std::thread::Builder::new()
                        .name(format!("resolver-{i}"))
                        .spawn_scoped(scope, move || resolver.resolve(video))
                        .map_err(|err| {
                            warn!("Could not spawn a resolver thread ({err}), resolving inline");
                            video
                        })
                })
                .collect();

            pending
                .into_iter()
                .filter_map(|pending| match pending {
                    Ok(thread) => match thread.join() {
                        Ok(res) => Some(res),
                        Err(_) => {
                            error!("A resolver thread panicked");
                            None
                        }
                    },
                    Err(video) => Some(resolver.resolve(video)),
                })
                .collect()
        });

        resolved
            .into_iter()
            .filter_map(|(video_id, stream)| Some((video_id, stream?)))
            .collect()
    }
}

impl Iterator for Listing<'_> {
    type Item = Result<CrawledStream>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((video_id, stream)) = self.ready.pop_front() {
                return Some(Ok(CrawledStream {
                    video_id,
                    stream,
                    total_discovered: self.discovered_count(),
                }));
            }

            let enumerator = self.enumerator.as_ref()?;
            let batch = self.next_batch(enumerator);

            if batch.is_empty() {
                // Enumeration over and everything flushed
                let enumerator = self.enumerator.take()?;
                return match enumerator.join() {
                    EnumerationOutcome::Completed => None,
                    EnumerationOutcome::Failed(reason) => {
                        Some(Err(miette!("Could not list the channel: {reason}").into()))
                    }
                };
            }

            let resolved = self.resolve_batch(&batch);
            debug!(
                "Batch done: {}/{} videos resolved",
                resolved.len(),
                batch.len()
            );
            self.ready.extend(resolved);
        }
    }
}
