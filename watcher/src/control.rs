use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::pipeline::PipelineControl;
use crate::supervisor::{Supervisor, SupervisorError};

/// Stream lifecycle as reported by whatever watches the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Started(String),
    Stopped,
    /// Relaunch the current stream without resetting detection.
    Restart,
    Snapshot,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("`start` needs a stream target")]
    MissingTarget,
    #[error("unknown command `{0}`")]
    Unknown(String),
}

impl LifecycleEvent {
    /// Parse one control line: `start <target>`, `stop`, `restart` or `snapshot`.
    /// Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, ParseError> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Ok(None);
        };
        match command.to_ascii_lowercase().as_str() {
            "start" => words
                .next()
                .map(|t| Some(Self::Started(t.to_string())))
                .ok_or(ParseError::MissingTarget),
            "stop" => Ok(Some(Self::Stopped)),
            "restart" => Ok(Some(Self::Restart)),
            "snapshot" => Ok(Some(Self::Snapshot)),
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

/// Applies lifecycle events to the supervisor and the detection pipeline.
pub struct Controller {
    supervisor: Supervisor,
    pipeline: Arc<PipelineControl>,
}

impl Controller {
    pub fn new(supervisor: Supervisor, pipeline: Arc<PipelineControl>) -> Self {
        Self {
            supervisor,
            pipeline,
        }
    }

    pub async fn handle(&self, event: LifecycleEvent) -> Result<(), SupervisorError> {
        match event {
            LifecycleEvent::Started(target) => {
                info!(stream = %target, "stream started");
                // the old run must be gone before the reset so none of its
                // frames reach the fresh detection state
                self.supervisor.stop().await;
                self.pipeline.request_reset();
                self.supervisor.start(&target).await
            }
            LifecycleEvent::Stopped => {
                info!("stream stopped");
                self.supervisor.stop().await;
                Ok(())
            }
            LifecycleEvent::Restart => {
                info!("restart requested");
                self.supervisor.restart().await
            }
            LifecycleEvent::Snapshot => {
                info!("snapshot requested");
                self.pipeline.request_snapshot();
                Ok(())
            }
        }
    }

    /// Apply events until every sender is dropped.
    pub async fn run(self, mut events: mpsc::Receiver<LifecycleEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle(event).await {
                error!(error = %e, "failed to apply lifecycle event");
            }
        }
    }
}

/// Forward control lines from `input` as events until EOF or the receiver closes.
pub async fn read_commands<R>(input: R, events: mpsc::Sender<LifecycleEvent>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match LifecycleEvent::parse(&line) {
                Ok(Some(event)) => {
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(line = %line, error = %e, "ignoring control line"),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "failed to read control input");
                break;
            }
        }
    }
}
