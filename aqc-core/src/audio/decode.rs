//! Decode collaborator: any input file → 16 kHz mono PCM WAV.
//!
//! The default implementation shells out to `ffmpeg`. It is synchronous on
//! purpose; the orchestrator runs it on the blocking pool.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use super::TARGET_SAMPLE_RATE;
use crate::error::{AqcError, Result};

/// Contract: given any input file, write mono 16 kHz PCM WAV to `output`,
/// or fail.
pub trait AudioDecoder: Send + Sync + 'static {
    fn decode(&self, input: &Path, output: &Path) -> Result<()>;
}

/// `ffmpeg -i <in> -ac 1 -ar 16000 -vn -f wav <out>` with a wall-clock limit.
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    program: String,
    timeout: Duration,
}

/// Poll interval while waiting on the child process.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

impl FfmpegDecoder {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn args(input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-y".to_owned(),
            "-hide_banner".to_owned(),
            "-loglevel".to_owned(),
            "error".to_owned(),
            "-i".to_owned(),
            input.display().to_string(),
            "-ac".to_owned(),
            "1".to_owned(),
            "-ar".to_owned(),
            TARGET_SAMPLE_RATE.to_string(),
            "-vn".to_owned(),
            "-f".to_owned(),
            "wav".to_owned(),
            output.display().to_string(),
        ]
    }
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new("ffmpeg", Duration::from_secs(120))
    }
}

impl AudioDecoder for FfmpegDecoder {
    fn decode(&self, input: &Path, output: &Path) -> Result<()> {
        if which::which(&self.program).is_err() {
            return Err(AqcError::CommandMissing {
                command: self.program.clone(),
            });
        }

        let args = Self::args(input, output);
        let rendered = format!("{} {}", self.program, args.join(" "));
        debug!(command = %rendered, "spawning decoder");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain stderr on a side thread so a chatty decoder cannot fill the pipe.
        let stderr_pipe = child.stderr.take();
        let (stderr_tx, stderr_rx) = std::sync::mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stderr_pipe {
                let _ = pipe.read_to_end(&mut buf);
            }
            let _ = stderr_tx.send(buf);
        });

        let started_at = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                if status.success() {
                    return Ok(());
                }
                let stderr = stderr_rx
                    .recv_timeout(Duration::from_millis(100))
                    .unwrap_or_default();
                let stderr = String::from_utf8_lossy(&stderr);
                let code = status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_owned());
                return Err(AqcError::Decode(format!(
                    "`{rendered}` exited with {code}: {}",
                    stderr.trim()
                )));
            }

            if started_at.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(AqcError::CommandTimedOut {
                    command: rendered,
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}
