use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread::JoinHandle,
    time::Duration,
};

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use miette::miette;
use tracing::{debug, error, info, trace, warn};

use super::retry::RetryPolicy;
use crate::{
    io::{named_tempfile, transcript_path, write_atomically},
    outside::{AudioDecoder, StreamDownloader, Transcriber},
    result::{Error, Result},
    types::StreamReference,
    utils::MutexUtils,
};

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Maximum number of workers running at the same time
    pub capacity: usize,

    /// Number of tasks that can wait for a worker
    pub queue_capacity: usize,

    /// How long to wait for room in a full queue before failing
    pub put_timeout: Duration,

    /// Retries of the transcription step of a task
    pub transcription_retry: RetryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 3,
            queue_capacity: 16,
            put_timeout: Duration::from_secs(60 * 60),
            transcription_retry: RetryPolicy::new(3, Duration::ZERO),
        }
    }
}

/// The external programs a worker needs to turn a stream into text
#[derive(Debug, Clone)]
pub struct Tools {
    pub downloader: Arc<dyn StreamDownloader>,
    pub decoder: Arc<dyn AudioDecoder>,
    pub transcriber: Arc<dyn Transcriber>,
}

#[derive(Debug)]
pub struct TranscriptionTask {
    pub video_id: String,
    pub stream: StreamReference,
}

#[derive(Debug, Default)]
struct PoolState {
    active_workers: usize,
    launched: usize,
    peak_workers: usize,
}

/// What the pool did during its lifetime
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub transcribed: usize,
    pub failed: usize,
    pub launched_workers: usize,
    pub peak_workers: usize,
    pub panicked_workers: usize,
}

#[derive(Debug)]
struct Shared {
    queue: Receiver<TranscriptionTask>,
    state: Mutex<PoolState>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    tools: Tools,
    out_dir: PathBuf,
    scratch_dir: PathBuf,
    config: PoolConfig,
    transcribed: AtomicUsize,
    failed: AtomicUsize,
    panicked: AtomicUsize,
}

impl Shared {
    fn join_worker(&self, worker: JoinHandle<()>) {
        if worker.join().is_err() {
            self.panicked.fetch_add(1, Ordering::AcqRel);
            error!("A transcription worker panicked");
        }
    }
}

type WorkerBody = Box<dyn FnOnce() + Send>;

/// How a queued task will be picked up
enum Launch {
    /// An already running worker will take it
    Running,
    Spawned,
    /// No thread could be started, the caller has to process the queue itself
    Inline(Worker),
}

fn spawn_thread(name: String, body: WorkerBody) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new().name(name).spawn(body)
}

/// Transcribe streams with at most `capacity` workers running at the same time.
///
/// Workers are only launched when a task is queued and stop as soon as
/// they find the queue empty, so an idle pool has no thread.
///
/// Finishing or dropping the pool waits for every queued task to be processed.
pub struct TranscriptionPool {
    send: Sender<TranscriptionTask>,
    shared: Arc<Shared>,
}

impl TranscriptionPool {
    /// Create a pool whose intermediate files go to the system temporary directory
    pub fn new(tools: Tools, out_dir: &Path, config: PoolConfig) -> Self {
        Self::with_scratch_dir(tools, out_dir, &std::env::temp_dir(), config)
    }

    /// Create a pool whose downloaded and decoded files go to `scratch_dir`
    pub fn with_scratch_dir(
        tools: Tools,
        out_dir: &Path,
        scratch_dir: &Path,
        config: PoolConfig,
    ) -> Self {
        let (send, receive) = bounded(config.queue_capacity);

        Self {
            send,
            shared: Arc::new(Shared {
                queue: receive,
                state: Mutex::new(PoolState::default()),
                workers: Mutex::new(vec![]),
                tools,
                out_dir: out_dir.to_path_buf(),
                scratch_dir: scratch_dir.to_path_buf(),
                config,
                transcribed: AtomicUsize::new(0),
                failed: AtomicUsize::new(0),
                panicked: AtomicUsize::new(0),
            }),
        }
    }

    /// Queue the stream for transcription, waiting if the queue is full.
    ///
    /// Return [`Error::QueueTimeout`] if no room was freed in time.
    pub fn enqueue(&self, video_id: String, stream: StreamReference) -> Result<()> {
        self.push(TranscriptionTask { video_id, stream })?;
        self.launch_worker_if_needed(spawn_thread);
        Ok(())
    }

    fn push(&self, task: TranscriptionTask) -> Result<()> {
        let timeout = self.shared.config.put_timeout;

        match self.send.send_timeout(task, timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(task)) => {
                error!("Could not queue {}: transcription queue full", task.video_id);
                Err(Error::QueueTimeout(timeout))
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                Err(miette!("Transcription queue closed").into())
            }
        }
    }

    /// Number of workers currently running
    pub fn active_workers(&self) -> usize {
        self.shared.state.with_lock(|state| state.active_workers)
    }

    pub fn stats(&self) -> PoolStats {
        let (launched_workers, peak_workers) = self
            .shared
            .state
            .with_lock(|state| (state.launched, state.peak_workers));

        PoolStats {
            transcribed: self.shared.transcribed.load(Ordering::Acquire),
            failed: self.shared.failed.load(Ordering::Acquire),
            launched_workers,
            peak_workers,
            panicked_workers: self.shared.panicked.load(Ordering::Acquire),
        }
    }

    /// Wait for every queued task to be processed
    pub fn finish(self) -> PoolStats {
        self.join_workers();
        self.stats()
    }

    /// Make sure a worker will take the task just queued.
    ///
    /// If no worker runs and none can be started, the calling thread
    /// processes the queue until it is empty.
    fn launch_worker_if_needed<S>(&self, spawn: S)
    where
        S: FnOnce(String, WorkerBody) -> std::io::Result<JoinHandle<()>>,
    {
        let launch = self.shared.state.with_lock(|mut state| {
            if state.active_workers >= self.shared.config.capacity {
                trace!("All workers busy, the task will be picked up later");
                return Launch::Running;
            }

            let id = state.launched;
            let shared = self.shared.clone();
            let spawned = spawn(
                format!("worker-{id}"),
                Box::new(move || Worker::new(id, shared).run()),
            );

            // The worker cannot leave before this lock is released,
            // so counting it after the spawn is safe
            let launch = match spawned {
                Ok(handle) => {
                    self.shared.workers.with_lock(|mut workers| workers.push(handle));
                    Launch::Spawned
                }
                Err(err) if state.active_workers > 0 => {
                    warn!("Could not launch a new worker, relying on the running ones: {err}");
                    return Launch::Running;
                }
                Err(err) => {
                    warn!("Could not launch a worker, processing the queue in place: {err}");
                    Launch::Inline(Worker::new(id, self.shared.clone()))
                }
            };

            state.active_workers += 1;
            state.launched += 1;
            state.peak_workers = state.peak_workers.max(state.active_workers);
            launch
        });

        match launch {
            Launch::Running => {}
            Launch::Spawned => self.join_finished_workers(),
            Launch::Inline(worker) => worker.run(),
        }
    }

    /// Collect the workers that already stopped
    fn join_finished_workers(&self) {
        let finished = self.shared.workers.with_lock(|mut workers| {
            let (finished, running) = std::mem::take(&mut *workers)
                .into_iter()
                .partition::<Vec<_>, _>(|w| w.is_finished());
            *workers = running;
            finished
        });

        for worker in finished {
            self.shared.join_worker(worker);
        }
    }

    fn join_workers(&self) {
        loop {
            let workers = self
                .shared
                .workers
                .with_lock(|mut workers| std::mem::take(&mut *workers));
            if workers.is_empty() {
                break;
            }

            debug!("Waiting for {} workers", workers.len());
            for worker in workers {
                self.shared.join_worker(worker);
            }
        }
    }
}

impl Drop for TranscriptionPool {
    fn drop(&mut self) {
        self.join_workers();
    }
}

struct Worker {
    id: usize,
    shared: Arc<Shared>,
    released: bool,
}

impl Worker {
    fn new(id: usize, shared: Arc<Shared>) -> Self {
        Self {
            id,
            shared,
            released: false,
        }
    }

    fn run(mut self) {
        debug!("Worker {} started", self.id);

        while let Some(task) = self.next_task() {
            let video_id = &task.video_id;
            info!("Transcribing video {video_id}");

            match self.process(&task) {
                Ok(path) => {
                    self.shared.transcribed.fetch_add(1, Ordering::AcqRel);
                    info!("Video {video_id} transcribed into {}", path.display());
                }
                Err(err) => {
                    self.shared.failed.fetch_add(1, Ordering::AcqRel);
                    error!("Could not transcribe video {video_id}: {err}");
                }
            }
        }

        debug!("Queue empty, worker {} stopped", self.id);
    }

    /// Pop the next task, or release the worker slot if there is none.
    ///
    /// Both happen under the state lock: a task queued concurrently is either
    /// seen here or its producer sees the slot released and launches a worker.
    fn next_task(&mut self) -> Option<TranscriptionTask> {
        let task = self.shared.state.with_lock(|mut state| {
            let task = self.shared.queue.try_recv().ok();
            if task.is_none() {
                state.active_workers = state.active_workers.saturating_sub(1);
            }
            task
        });

        self.released = task.is_none();
        task
    }

    fn process(&self, task: &TranscriptionTask) -> Result<PathBuf> {
        let TranscriptionTask { video_id, stream } = task;
        let tools = &self.shared.tools;

        // Intermediate files are deleted when their handle is dropped, whatever happens
        let media = named_tempfile(&self.shared.scratch_dir, &stream.subtype)?;
        debug!("Downloading {stream} of {video_id}");
        tools
            .downloader
            .download(stream, media.path())
            .map_err(|err| err.wrap_err_with(|| "Could not download the stream"))?;

        let audio = named_tempfile(&self.shared.scratch_dir, "wav")?;
        debug!("Decoding audio of {video_id}");
        tools
            .decoder
            .to_wav(media.path(), audio.path())
            .map_err(|err| err.wrap_err_with(|| "Could not decode the stream"))?;
        drop(media);

        let text = self
            .shared
            .config
            .transcription_retry
            .run(format!("Transcription of {video_id}"), |_| {
                tools.transcriber.transcribe(audio.path())
            })
            .ok_or_else(|| miette!("No transcript produced"))?;

        let output = transcript_path(&self.shared.out_dir, video_id);
        write_atomically(&output, &text)?;

        Ok(output)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if !self.released {
            // Only reached when unwinding out of a task
            self.shared.state.with_lock(|mut state| {
                state.active_workers = state.active_workers.saturating_sub(1);
            });
        }
    }
}
