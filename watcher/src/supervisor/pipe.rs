use nix::errno::Errno;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    #[error("failed to remove stale pipe {0}: {1}")]
    RemoveStale(String, std::io::Error),
    #[error("failed to create named pipe {0}: {1}")]
    Create(String, Errno),
}

/// A FIFO on disk connecting the stream puller to the transcoder.
///
/// The file is removed when the value is dropped.
#[derive(Debug)]
pub struct NamedPipe {
    path: PathBuf,
}

impl NamedPipe {
    /// Create a fresh FIFO at `path`, replacing whatever was there.
    pub fn create(path: &Path) -> Result<Self, PipeError> {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed stale pipe"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PipeError::RemoveStale(path.display().to_string(), e)),
        }

        mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR)
            .map_err(|e| PipeError::Create(path.display().to_string(), e))?;

        debug!(path = %path.display(), "named pipe created");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for NamedPipe {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove named pipe");
            }
        }
    }
}
