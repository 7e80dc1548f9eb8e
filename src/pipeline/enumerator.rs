use std::{
    fmt::Display,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use miette::{miette, Context, IntoDiagnostic};
use tracing::{debug, error, info, trace};

use crate::{
    outside::Catalog,
    result::{Error, Result},
    types::VideoHandle,
};

#[derive(Debug, Clone, Copy)]
pub struct EnumeratorConfig {
    /// Number of discovered videos that can wait for a consumer
    pub queue_capacity: usize,

    /// How long to wait for room in a full queue before failing the enumeration
    pub put_timeout: Duration,
}

impl Default for EnumeratorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            put_timeout: Duration::from_secs(60 * 60),
        }
    }
}

/// Terminal state of an enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumerationOutcome {
    /// The whole listing has been queued
    Completed,

    /// The listing could not be walked to its end
    Failed(String),
}

impl Display for EnumerationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnumerationOutcome::Completed => write!(f, "completed"),
            EnumerationOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

pub type CompletionCallback = Box<dyn FnOnce(&EnumerationOutcome) + Send>;

/// Counters shared between the enumeration thread and its readers
#[derive(Debug, Default)]
pub struct EnumerationState {
    discovered: AtomicUsize,
    running: AtomicBool,
}

impl EnumerationState {
    pub fn discovered_count(&self) -> usize {
        self.discovered.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Walk the listing of a channel in a background thread, pushing every
/// video into a bounded queue.
///
/// Starting consumes the enumerator, so an instance never runs twice.
pub struct CatalogEnumerator {
    catalog: Arc<dyn Catalog>,
    channel_url: String,
    config: EnumeratorConfig,
    on_complete: Option<CompletionCallback>,
}

impl CatalogEnumerator {
    pub fn new(catalog: Arc<dyn Catalog>, channel_url: &str, config: EnumeratorConfig) -> Self {
        Self {
            catalog,
            channel_url: channel_url.to_owned(),
            config,
            on_complete: None,
        }
    }

    /// Register a function called once with the terminal state of the enumeration
    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&EnumerationOutcome) + Send + 'static,
    {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn start(self) -> Result<EnumeratorHandle> {
        let (send, receive) = bounded(self.config.queue_capacity);
        let state = Arc::new(EnumerationState::default());
        state.running.store(true, Ordering::Release);

        let thread_state = state.clone();
        let thread = std::thread::Builder::new()
            .name("enumerator".to_owned())
            .spawn(move || self.run(send, &thread_state))
            .into_diagnostic()
            .wrap_err("Could not spawn the enumeration thread")?;

        Ok(EnumeratorHandle {
            state,
            queue: receive,
            thread: Some(thread),
        })
    }

    fn run(mut self, queue: Sender<VideoHandle>, state: &EnumerationState) -> EnumerationOutcome {
        info!("Listing the videos of {}", self.channel_url);

        let outcome = match self.enumerate(&queue, state) {
            Ok(()) => {
                info!(
                    "Listing completed, {} videos found",
                    state.discovered_count()
                );
                EnumerationOutcome::Completed
            }
            Err(err) => {
                error!("Listing stopped: {err}");
                EnumerationOutcome::Failed(err.to_string())
            }
        };

        state.running.store(false, Ordering::Release);
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(&outcome);
        }

        outcome
    }

    fn enumerate(&self, queue: &Sender<VideoHandle>, state: &EnumerationState) -> Result<()> {
        let listing = self
            .catalog
            .list_channel_videos(&self.channel_url)
            .map_err(|err| err.wrap_err_with(|| "Could not list the channel videos"))?;

        for video in listing {
            let video =
                video.map_err(|err| err.wrap_err_with(|| "Could not continue the listing"))?;

            state.discovered.fetch_add(1, Ordering::AcqRel);
            trace!("Discovered video {video}");

            match queue.send_timeout(video, self.config.put_timeout) {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(_)) => {
                    return Err(Error::QueueTimeout(self.config.put_timeout));
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    debug!("Nobody is reading the videos anymore");
                    return Err(
                        miette!("Video consumer stopped before the end of the listing").into(),
                    );
                }
            }
        }

        Ok(())
    }
}

/// Access to a running enumeration.
///
/// Dropping the handle closes the queue and waits for the enumeration thread.
pub struct EnumeratorHandle {
    state: Arc<EnumerationState>,
    queue: Receiver<VideoHandle>,
    thread: Option<JoinHandle<EnumerationOutcome>>,
}

impl EnumeratorHandle {
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Number of videos found so far. Never decreases.
    pub fn discovered_count(&self) -> usize {
        self.state.discovered_count()
    }

    pub fn state(&self) -> Arc<EnumerationState> {
        self.state.clone()
    }

    pub fn queue(&self) -> &Receiver<VideoHandle> {
        &self.queue
    }

    /// Wait for the end of the enumeration.
    ///
    /// Videos still in the queue are discarded.
    pub fn join(mut self) -> EnumerationOutcome {
        self.close_and_join()
    }

    fn close_and_join(&mut self) -> EnumerationOutcome {
        // Unblock a producer waiting for room in the queue
        self.queue = crossbeam_channel::never();

        match self.thread.take().map(JoinHandle::join) {
            Some(Ok(outcome)) => outcome,
            Some(Err(_)) => EnumerationOutcome::Failed("The enumeration thread panicked".into()),
            None => EnumerationOutcome::Failed("The enumeration was already joined".into()),
        }
    }
}

impl Drop for EnumeratorHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.close_and_join();
        }
    }
}
