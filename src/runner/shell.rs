//! Shell subprocess runner - runs each step as `<shell> -c <command>`

use crate::core::StreamKind;
use crate::runner::{OutputSink, RunnerError, StepExit, StepInvocation, StepRunner};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::time::timeout;
use tracing::{debug, warn};

/// How long to keep reading output after the shell has exited
const OUTPUT_GRACE: Duration = Duration::from_millis(250);

/// Runs step commands as child processes of a shell
#[derive(Debug, Clone)]
pub struct ShellRunner {
    /// Shell executable, e.g. "sh" or "bash"
    shell: String,
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new("sh")
    }
}

#[async_trait]
impl StepRunner for ShellRunner {
    async fn run(
        &self,
        invocation: &StepInvocation,
        sink: &dyn OutputSink,
    ) -> Result<StepExit, RunnerError> {
        debug!(
            "Spawning {} -c for step '{}' of job '{}' in {}",
            self.shell,
            invocation.step_name,
            invocation.job_id,
            invocation.workdir.display()
        );

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&invocation.command)
            .current_dir(&invocation.workdir)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                command: invocation.command.clone(),
                source,
            })?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(stdout, StreamKind::Stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(stderr, StreamKind::Stderr, tx.clone())));
        }
        drop(tx);

        // Background processes may hold the pipes open past the shell's exit
        let drive = async {
            let mut forwarding = true;
            loop {
                tokio::select! {
                    status = child.wait() => break status,
                    line = rx.recv(), if forwarding => match line {
                        Some((stream, bytes)) => sink.on_line(stream, &bytes),
                        None => forwarding = false,
                    },
                }
            }
        };

        let waited = match invocation.timeout {
            Some(limit) => timeout(limit, drive).await.map_err(|_| limit),
            None => Ok(drive.await),
        };

        let waited = match waited {
            Ok(status) => status,
            Err(limit) => {
                warn!(
                    "Step '{}' of job '{}' timed out after {:?}, killing it",
                    invocation.step_name, invocation.job_id, limit
                );
                if let Err(e) = child.kill().await {
                    debug!("Failed to kill timed out step: {}", e);
                }
                for reader in readers {
                    reader.abort();
                }
                return Err(RunnerError::Timeout(limit));
            }
        };

        let drain = async {
            while let Some((stream, bytes)) = rx.recv().await {
                sink.on_line(stream, &bytes);
            }
        };
        if timeout(OUTPUT_GRACE, drain).await.is_err() {
            debug!(
                "Output of step '{}' still open after exit, detaching",
                invocation.step_name
            );
        }
        for reader in readers {
            reader.abort();
        }

        let status = waited?;
        debug!(
            "Step '{}' of job '{}' exited with {:?}",
            invocation.step_name,
            invocation.job_id,
            status.code()
        );

        Ok(StepExit {
            exit_code: status.code(),
        })
    }
}

/// Read `reader` line by line, forwarding raw bytes until EOF
async fn forward_lines<R>(reader: R, stream: StreamKind, tx: UnboundedSender<(StreamKind, Vec<u8>)>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if tx.send((stream, line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Stopped reading {:?}: {}", stream, e);
                break;
            }
        }
    }
}
