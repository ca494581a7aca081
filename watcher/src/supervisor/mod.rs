//! Ownership and supervision of the external frame source.
//!
//! A [`Supervisor`] launches the stream puller and transcoder through a
//! [`StreamLauncher`], reads the transcoder's raw output on a dedicated task,
//! reassembles fixed-size frames and hands each one to the [`Dispatcher`] on
//! a blocking-pool thread, one frame at a time. If no frame completes within
//! the stall timeout, or the read fails, the processes are torn down and
//! relaunched for the same target.

pub mod launcher;
pub mod pipe;
pub mod process;

use chrono::Utc;
use donation_watch_common::config::StreamConfig;
use donation_watch_common::frame::{Frame, FrameAssembler};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::dispatcher::Dispatcher;
use launcher::{LaunchedStream, StreamLauncher};
use pipe::{NamedPipe, PipeError};
use process::{ProcessError, ProcessHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Starting,
    Running,
    Restarting,
    /// Launch failed; only an explicit start leaves this state.
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to create log directory {0}: {1}")]
    LogDir(String, std::io::Error),
    #[error(transparent)]
    Pipe(#[from] PipeError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("launch failed: {0}")]
    Launch(String),
    #[error("supervisor has never been started")]
    NotStarted,
}

/// One launched set of processes plus the in-progress frame.
struct Run {
    target: String,
    generation: u64,
    frames: Box<dyn AsyncRead + Send + Unpin>,
    processes: Vec<ProcessHandle>,
    pipe: Option<NamedPipe>,
    assembler: FrameAssembler,
}

impl Run {
    fn release(self, grace: std::time::Duration) {
        for process in self.processes {
            process.release(grace);
        }
        drop(self.frames);
        drop(self.pipe);
    }
}

struct Inner {
    run: Option<Run>,
    last_target: Option<String>,
    generation: u64,
}

struct Shared {
    config: StreamConfig,
    launcher: Arc<dyn StreamLauncher>,
    dispatcher: Arc<Mutex<Dispatcher>>,
    /// Serializes start/stop/restart against the read loop's I/O.
    inner: tokio::sync::Mutex<Inner>,
    stopped: AtomicBool,
    state: watch::Sender<PipelineState>,
    /// Frame index, continuous across restarts.
    seq: AtomicU64,
    restarts: AtomicU64,
}

/// Cheaply cloneable handle to the frame source.
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
}

impl Supervisor {
    pub fn new(
        config: StreamConfig,
        launcher: Arc<dyn StreamLauncher>,
        dispatcher: Arc<Mutex<Dispatcher>>,
    ) -> Self {
        let (state, _) = watch::channel(PipelineState::Stopped);
        Self {
            shared: Arc::new(Shared {
                config,
                launcher,
                dispatcher,
                inner: tokio::sync::Mutex::new(Inner {
                    run: None,
                    last_target: None,
                    generation: 0,
                }),
                stopped: AtomicBool::new(true),
                state,
                seq: AtomicU64::new(0),
                restarts: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<PipelineState> {
        self.shared.state.subscribe()
    }

    /// Number of stall or explicit restarts so far.
    pub fn restart_count(&self) -> u64 {
        self.shared.restarts.load(Ordering::Relaxed)
    }

    /// Launch the processes for `target` and begin reading frames. Any
    /// previous run is stopped first.
    pub async fn start(&self, target: &str) -> Result<(), SupervisorError> {
        let mut inner = self.shared.inner.lock().await;
        let generation = self.launch_locked(&mut inner, target)?;
        tokio::spawn(read_loop(self.clone(), generation));
        Ok(())
    }

    /// Terminate both processes and release the pipe. Safe to call repeatedly.
    pub async fn stop(&self) {
        let mut inner = self.shared.inner.lock().await;
        self.stop_locked(&mut inner);
    }

    /// Stop and start again with the last target.
    pub async fn restart(&self) -> Result<(), SupervisorError> {
        let mut inner = self.shared.inner.lock().await;
        let target = inner.last_target.clone().ok_or(SupervisorError::NotStarted)?;
        self.shared.restarts.fetch_add(1, Ordering::Relaxed);
        self.shared.state.send_replace(PipelineState::Restarting);
        let generation = self.launch_locked(&mut inner, &target)?;
        tokio::spawn(read_loop(self.clone(), generation));
        Ok(())
    }

    fn stop_locked(&self, inner: &mut Inner) {
        self.teardown_locked(inner);
        self.shared.state.send_if_modified(|state| {
            let changed = *state != PipelineState::Stopped;
            *state = PipelineState::Stopped;
            changed
        });
    }

    /// Release the current run, if any, without touching the public state.
    fn teardown_locked(&self, inner: &mut Inner) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        if let Some(run) = inner.run.take() {
            info!(stream = %run.target, generation = run.generation, "stopping video stream");
            run.release(self.shared.config.terminate_grace());
            info!("video stream stopped");
        }
    }

    /// Stop any current run and launch a new one. Returns the new generation;
    /// the caller is responsible for driving its read loop.
    fn launch_locked(&self, inner: &mut Inner, target: &str) -> Result<u64, SupervisorError> {
        self.teardown_locked(inner);
        self.shared.state.send_replace(PipelineState::Starting);
        inner.last_target = Some(target.to_string());

        let run_id = Utc::now().timestamp().to_string();
        let LaunchedStream {
            frames,
            processes,
            pipe,
        } = match self.shared.launcher.launch(target, &run_id) {
            Ok(launched) => launched,
            Err(e) => {
                error!(stream = %target, error = %e, "failed to launch video stream");
                self.shared.state.send_replace(PipelineState::Failed);
                return Err(e);
            }
        };

        inner.generation += 1;
        inner.run = Some(Run {
            target: target.to_string(),
            generation: inner.generation,
            frames,
            processes,
            pipe,
            assembler: FrameAssembler::new(self.shared.config.frame_size()),
        });
        self.shared.stopped.store(false, Ordering::SeqCst);
        self.shared.state.send_replace(PipelineState::Running);
        info!(stream = %target, run_id, generation = inner.generation, "video stream running");
        Ok(inner.generation)
    }

    /// Relaunch the same target if `generation` is still the current run.
    /// Returns the generation to keep reading, or `None` to exit the loop.
    async fn relaunch(&self, generation: u64) -> Option<u64> {
        let mut inner = self.shared.inner.lock().await;
        if self.shared.stopped.load(Ordering::SeqCst) || inner.generation != generation {
            return None;
        }
        let target = inner.run.as_ref().map(|r| r.target.clone())?;

        self.shared.restarts.fetch_add(1, Ordering::Relaxed);
        self.shared.state.send_replace(PipelineState::Restarting);
        match self.launch_locked(&mut inner, &target) {
            Ok(next) => Some(next),
            Err(e) => {
                error!(stream = %target, error = %e, "relaunch of video stream failed");
                None
            }
        }
    }

    /// Stamp `data` and run the subscribers on the blocking pool. Returns
    /// once every subscriber has seen the frame.
    async fn dispatch(&self, data: bytes::Bytes) {
        let config = &self.shared.config;
        let frame = Frame {
            data,
            width: config.width,
            height: config.height,
            seq: self.shared.seq.fetch_add(1, Ordering::Relaxed),
            captured_at_ms: Utc::now().timestamp_millis(),
        };
        let seq = frame.seq;
        let dispatcher = Arc::clone(&self.shared.dispatcher);
        let delivered = tokio::task::spawn_blocking(move || match dispatcher.lock() {
            Ok(mut dispatcher) => {
                dispatcher.dispatch(frame);
            }
            Err(_) => error!(seq = frame.seq, "dispatcher lock poisoned, frame dropped"),
        })
        .await;
        if let Err(e) = delivered {
            error!(seq, error = %e, "frame dispatch did not complete");
        }
    }
}

enum ReadOutcome {
    /// Zero or more frames were completed and dispatched.
    Progress(bool),
    Idle,
    Failed,
    Exit,
}

/// Read, reassemble and dispatch until stopped or superseded by another run.
async fn read_loop(supervisor: Supervisor, mut generation: u64) {
    let shared = Arc::clone(&supervisor.shared);
    let poll = shared.config.read_poll();
    let stall_timeout = shared.config.stall_timeout();
    let mut buf = vec![0u8; shared.config.frame_size()];
    let mut last_frame = Instant::now();

    debug!(generation, "read loop started");

    loop {
        let outcome = {
            let mut inner = shared.inner.lock().await;
            if shared.stopped.load(Ordering::SeqCst) || inner.generation != generation {
                ReadOutcome::Exit
            } else if let Some(run) = inner.run.as_mut() {
                let want = run.assembler.remaining();
                match tokio::time::timeout(poll, run.frames.read(&mut buf[..want])).await {
                    Ok(Ok(0)) => ReadOutcome::Idle,
                    Ok(Ok(n)) => {
                        let frames = run.assembler.push(&buf[..n]);
                        let completed = !frames.is_empty();
                        // dispatch under the lock so a stop or restart never
                        // races a frame from the run it replaced
                        for data in frames {
                            supervisor.dispatch(data).await;
                        }
                        ReadOutcome::Progress(completed)
                    }
                    Ok(Err(e)) => {
                        error!(
                            generation,
                            error = %e,
                            "failed to read from transcoder, restarting video stream"
                        );
                        ReadOutcome::Failed
                    }
                    Err(_) => ReadOutcome::Progress(false),
                }
            } else {
                ReadOutcome::Exit
            }
        };

        let relaunch = match outcome {
            ReadOutcome::Exit => break,
            ReadOutcome::Idle => {
                tokio::time::sleep(poll).await;
                false
            }
            ReadOutcome::Progress(completed) => {
                if completed {
                    last_frame = Instant::now();
                }
                false
            }
            ReadOutcome::Failed => {
                // keeps a transcoder that dies at once from spinning the loop
                tokio::time::sleep(poll).await;
                true
            }
        };

        let stalled = last_frame.elapsed() > stall_timeout;
        if stalled {
            error!(
                generation,
                stall_secs = stall_timeout.as_secs(),
                "no frame within stall timeout, restarting video stream"
            );
        }
        if relaunch || stalled {
            match supervisor.relaunch(generation).await {
                Some(next) => {
                    generation = next;
                    last_frame = Instant::now();
                }
                None => break,
            }
        }
    }

    debug!(generation, "read loop finished");
}
