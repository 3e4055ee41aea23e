//! [`AudioLauncher`] that streams tracks with an external `ffmpeg` process.
//!
//! ffmpeg reads the resolved stream URL (with reconnect options), applies the
//! room volume and writes to the connection's sink URL. Readiness is the first
//! `-progress` report on stdout; stderr is forwarded to the `ffmpeg` log target.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};

use super::{AudioError, AudioLauncher, AudioProcess, ProcessExit, ProcessOptions};
use crate::runtime::TaskSpawner;

/// Spawns one `ffmpeg` process per track.
///
/// The pipe readers of each process run on `spawner`, so shutdown drains them.
pub struct FfmpegLauncher {
    binary: PathBuf,
    spawner: TaskSpawner,
}

impl FfmpegLauncher {
    pub fn new(binary: impl Into<PathBuf>, spawner: TaskSpawner) -> Self {
        Self {
            binary: binary.into(),
            spawner,
        }
    }

    fn command(&self, stream_url: &str, options: &ProcessOptions) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin", "-nostats"])
            .args([
                "-reconnect",
                "1",
                "-reconnect_streamed",
                "1",
                "-reconnect_delay_max",
                "5",
            ])
            .arg("-re")
            .arg("-i")
            .arg(stream_url)
            .arg("-vn")
            .arg("-af")
            .arg(format!("volume={:.2}", options.volume))
            .args(["-progress", "pipe:1"]);

        for arg in output_args(&options.sink_url) {
            cmd.arg(arg);
        }
        cmd.arg(&options.sink_url);

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl AudioLauncher for FfmpegLauncher {
    async fn spawn(
        &self,
        stream_url: &str,
        options: &ProcessOptions,
    ) -> Result<Box<dyn AudioProcess>, AudioError> {
        let mut child = self.command(stream_url, options).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AudioError::Spawn(format!("{} not found", self.binary.display()))
            } else {
                AudioError::Spawn(e.to_string())
            }
        })?;

        if let Some(stderr) = child.stderr.take() {
            let pid = child.id();
            self.spawner.spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!(target: "ffmpeg", pid = ?pid, "{}", line);
                }
            });
        }

        let progress = child.stdout.take().map(|out| BufReader::new(out).lines());
        Ok(Box::new(FfmpegProcess {
            child,
            progress,
            exited: None,
            spawner: self.spawner.clone(),
        }))
    }
}

/// Codec and container arguments for a sink URL.
fn output_args(sink_url: &str) -> &'static [&'static str] {
    let scheme = sink_url.split_once("://").map(|(scheme, _)| scheme);
    match scheme {
        Some("rtp") => &["-c:a", "libopus", "-b:a", "128k", "-f", "rtp"],
        Some("udp") | Some("srt") => &["-c:a", "libmp3lame", "-b:a", "192k", "-f", "mpegts"],
        Some("icecast") => &[
            "-c:a",
            "libmp3lame",
            "-b:a",
            "192k",
            "-content_type",
            "audio/mpeg",
            "-f",
            "mp3",
        ],
        _ => &["-c:a", "libmp3lame", "-b:a", "192k", "-f", "mp3"],
    }
}

struct FfmpegProcess {
    child: Child,
    progress: Option<Lines<BufReader<ChildStdout>>>,
    exited: Option<ProcessExit>,
    spawner: TaskSpawner,
}

impl FfmpegProcess {
    #[cfg(unix)]
    fn signal(&self, signal: libc::c_int) -> Result<(), AudioError> {
        let pid = self
            .child
            .id()
            .ok_or_else(|| AudioError::Signal("process already reaped".into()))?;
        // SAFETY: kill(2) takes plain integers; the pid belongs to our unreaped child.
        let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
        if rc == 0 {
            Ok(())
        } else {
            Err(AudioError::Io(std::io::Error::last_os_error()))
        }
    }
}

#[async_trait]
impl AudioProcess for FfmpegProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait_started(&mut self) -> Result<(), AudioError> {
        let mut lines = self
            .progress
            .take()
            .ok_or(AudioError::ExitedEarly)?;

        loop {
            match lines.next_line().await? {
                Some(line) if line.starts_with("progress=") => {
                    // Keep draining so ffmpeg never blocks on a full pipe.
                    self.spawner
                        .spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });
                    return Ok(());
                }
                Some(_) => continue,
                None => return Err(AudioError::ExitedEarly),
            }
        }
    }

    async fn wait(&mut self, timeout: Option<Duration>) -> Result<Option<ProcessExit>, AudioError> {
        if let Some(exit) = self.exited {
            return Ok(Some(exit));
        }

        let status = match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.child.wait()).await {
                Ok(status) => status?,
                Err(_) => return Ok(None),
            },
            None => self.child.wait().await?,
        };

        let exit = ProcessExit::from(status);
        self.exited = Some(exit);
        Ok(Some(exit))
    }

    fn terminate(&mut self) -> Result<(), AudioError> {
        if self.exited.is_some() {
            return Ok(());
        }
        #[cfg(unix)]
        {
            self.signal(libc::SIGTERM)
        }
        #[cfg(not(unix))]
        {
            self.child.start_kill().map_err(AudioError::Io)
        }
    }

    async fn kill(&mut self) -> Result<(), AudioError> {
        if self.exited.is_some() {
            return Ok(());
        }
        self.child.kill().await?;
        let status = self.child.wait().await?;
        self.exited = Some(ProcessExit::from(status));
        Ok(())
    }

    fn pause(&mut self) -> Result<(), AudioError> {
        #[cfg(unix)]
        {
            self.signal(libc::SIGSTOP)
        }
        #[cfg(not(unix))]
        {
            Err(AudioError::Unsupported("pausing an audio process"))
        }
    }

    fn resume(&mut self) -> Result<(), AudioError> {
        #[cfg(unix)]
        {
            self.signal(libc::SIGCONT)
        }
        #[cfg(not(unix))]
        {
            Err(AudioError::Unsupported("resuming an audio process"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(sink: &str) -> ProcessOptions {
        ProcessOptions {
            sink_url: sink.into(),
            volume: 0.5,
        }
    }

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn command_line_carries_input_volume_and_sink() {
        let launcher = FfmpegLauncher::new("ffmpeg", TaskSpawner::current());
        let cmd = launcher.command("https://cdn/a.m4a", &options("udp://127.0.0.1:5004"));
        let args = args_of(&cmd);

        let input = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input + 1], "https://cdn/a.m4a");
        assert!(args.contains(&"volume=0.50".to_string()));
        assert!(args.windows(2).any(|w| w == ["-progress", "pipe:1"]));
        assert!(args.windows(2).any(|w| w == ["-reconnect_streamed", "1"]));
        assert_eq!(args.last().map(String::as_str), Some("udp://127.0.0.1:5004"));
    }

    #[test]
    fn output_format_follows_sink_scheme() {
        assert!(output_args("rtp://10.0.0.2:5004").ends_with(&["-f", "rtp"]));
        assert!(output_args("udp://10.0.0.2:5004").ends_with(&["-f", "mpegts"]));
        assert!(output_args("icecast://s:p@host:8000/live").ends_with(&["-f", "mp3"]));
        assert!(output_args("/tmp/out.mp3").ends_with(&["-f", "mp3"]));
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let launcher = FfmpegLauncher::new("/nonexistent/ffmpeg", TaskSpawner::current());
        let result = launcher
            .spawn("https://cdn/a.m4a", &options("udp://127.0.0.1:5004"))
            .await;
        assert!(matches!(result, Err(AudioError::Spawn(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_then_kill_on_a_real_process() {
        let child = Command::new("sleep")
            .arg("30")
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let mut process = FfmpegProcess {
            child,
            progress: None,
            exited: None,
            spawner: TaskSpawner::current(),
        };

        process.terminate().unwrap();
        let exit = process.wait(Some(Duration::from_secs(5))).await.unwrap();
        assert!(matches!(exit, Some(ProcessExit { success: false, .. })));

        // Kill after exit is a no-op.
        process.kill().await.unwrap();
        assert!(process.terminate().is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdout_drain_after_readiness_is_a_tracked_task() {
        let mut child = Command::new("sh")
            .args(["-c", "echo out_time=0; echo progress=continue; sleep 1"])
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let progress = child.stdout.take().map(|out| BufReader::new(out).lines());
        let spawner = TaskSpawner::current();
        let mut process = FfmpegProcess {
            child,
            progress,
            exited: None,
            spawner: spawner.clone(),
        };

        process.wait_started().await.unwrap();
        assert_eq!(spawner.active_tasks(), 1);

        assert!(spawner.drain(Duration::from_secs(10)).await);
        let exit = process.wait(Some(Duration::from_secs(5))).await.unwrap();
        assert!(matches!(exit, Some(ProcessExit { success: true, .. })));
    }
}
