use donation_watch_common::config::StreamConfig;
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::pipe::NamedPipe;
use super::process::ProcessHandle;
use super::SupervisorError;

/// Everything one supervisor run owns: the raw frame byte stream, the
/// processes producing it, and the pipe between them.
pub struct LaunchedStream {
    pub frames: Box<dyn AsyncRead + Send + Unpin>,
    /// Released in order on stop.
    pub processes: Vec<ProcessHandle>,
    pub pipe: Option<NamedPipe>,
}

/// Starts the external processes that produce raw frames for a target.
pub trait StreamLauncher: Send + Sync {
    fn launch(&self, target: &str, run_id: &str) -> Result<LaunchedStream, SupervisorError>;
}

/// `streamlink → fifo → ffmpeg → stdout` launcher.
pub struct FfmpegLauncher {
    config: StreamConfig,
    pipe_path: PathBuf,
}

impl FfmpegLauncher {
    pub fn new(config: StreamConfig) -> Self {
        let pipe_path =
            std::env::temp_dir().join(format!("donation-watch-{}.fifo", std::process::id()));
        Self { config, pipe_path }
    }

    pub fn puller_args(&self, target: &str, pipe: &Path) -> Vec<String> {
        vec![
            self.config.stream_url(target),
            "--default-stream".into(),
            self.config.quality.clone(),
            "--loglevel".into(),
            "warning".into(),
            "--force".into(),
            "-o".into(),
            pipe.display().to_string(),
        ]
    }

    pub fn transcoder_args(&self, pipe: &Path) -> Vec<String> {
        vec![
            "-i".into(),
            pipe.display().to_string(),
            "-pix_fmt".into(),
            "bgr24".into(),
            "-s".into(),
            format!("{}x{}", self.config.width, self.config.height),
            "-r".into(),
            self.config.fps.to_string(),
            "-vcodec".into(),
            "rawvideo".into(),
            "-an".into(),
            "-sn".into(),
            "-loglevel".into(),
            "info".into(),
            "-f".into(),
            "image2pipe".into(),
            "-".into(),
        ]
    }
}

impl StreamLauncher for FfmpegLauncher {
    fn launch(&self, target: &str, run_id: &str) -> Result<LaunchedStream, SupervisorError> {
        std::fs::create_dir_all(&self.config.log_dir)
            .map_err(|e| SupervisorError::LogDir(self.config.log_dir.display().to_string(), e))?;

        let pipe = NamedPipe::create(&self.pipe_path)?;

        let puller_name = program_name(&self.config.puller);
        let mut puller_cmd = Command::new(&self.config.puller);
        puller_cmd.args(self.puller_args(target, pipe.path()));
        info!(
            command = format!("{} {}", self.config.puller, self.puller_args(target, pipe.path()).join(" ")),
            "launching stream puller"
        );
        let puller = ProcessHandle::spawn(
            &puller_name,
            puller_cmd,
            &log_path(&self.config.log_dir, run_id, &puller_name),
        )?;

        let transcoder_name = program_name(&self.config.transcoder);
        let mut transcoder_cmd = Command::new(&self.config.transcoder);
        transcoder_cmd.args(self.transcoder_args(pipe.path()));
        info!(
            command = format!("{} {}", self.config.transcoder, self.transcoder_args(pipe.path()).join(" ")),
            "launching transcoder"
        );
        let spawned = ProcessHandle::spawn_captured(
            &transcoder_name,
            transcoder_cmd,
            &log_path(&self.config.log_dir, run_id, &transcoder_name),
        );
        let (transcoder, stdout) = match spawned {
            Ok(spawned) => spawned,
            Err(e) => {
                puller.release(self.config.terminate_grace());
                return Err(e.into());
            }
        };

        info!(run_id, stream = %target, "video stream started");
        Ok(LaunchedStream {
            frames: Box::new(stdout),
            processes: vec![puller, transcoder],
            pipe: Some(pipe),
        })
    }
}

/// Per-run log file for one process, e.g. `stream_video_logs/1700000000_ffmpeg`.
pub fn log_path(log_dir: &Path, run_id: &str, process: &str) -> PathBuf {
    log_dir.join(format!("{run_id}_{process}"))
}

fn program_name(program: &str) -> String {
    Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string())
}

/// Check whether the transcoder is runnable. Logs a warning if not.
pub async fn check_transcoder_available(transcoder: &str) {
    match Command::new(transcoder).arg("-version").output().await {
        Ok(out) if out.status.success() => {
            debug!(transcoder, "transcoder is available");
        }
        Ok(_) => {
            warn!(transcoder, "transcoder returned non-zero for -version; decoding may fail");
        }
        Err(e) => {
            warn!(
                transcoder,
                error = %e,
                "transcoder not found on PATH; the video stream cannot be decoded"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use donation_watch_common::config::Config;

    fn launcher() -> FfmpegLauncher {
        let config = Config::from_toml(
            "[stream]\nurl_template = \"https://twitch.tv/{target}\"\nwidth = 640\nheight = 360\n",
        )
        .unwrap();
        FfmpegLauncher::new(config.stream)
    }

    #[test]
    fn transcoder_emits_fixed_raw_geometry() {
        let args = launcher().transcoder_args(Path::new("/tmp/p.fifo"));
        let joined = args.join(" ");
        assert!(joined.starts_with("-i /tmp/p.fifo"));
        assert!(joined.contains("-pix_fmt bgr24"));
        assert!(joined.contains("-s 640x360"));
        assert!(joined.contains("-r 1"));
        assert!(joined.ends_with("-f image2pipe -"));
    }

    #[test]
    fn puller_writes_into_pipe() {
        let args = launcher().puller_args("papich", Path::new("/tmp/p.fifo"));
        assert_eq!(args[0], "https://twitch.tv/papich");
        assert_eq!(args.last().map(String::as_str), Some("/tmp/p.fifo"));
        assert!(args.contains(&"1080p,1080p60".to_string()));
        let level = args.iter().position(|a| a == "--loglevel").unwrap();
        assert_eq!(args[level + 1], "warning");
    }

    #[test]
    fn log_paths_are_keyed_by_run() {
        let p = log_path(Path::new("logs"), "1700000000", "ffmpeg");
        assert_eq!(p, PathBuf::from("logs/1700000000_ffmpeg"));
        assert_eq!(program_name("/usr/bin/streamlink"), "streamlink");
    }
}
