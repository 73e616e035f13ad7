//! Container execution — attach, start, feed the build script, stream
//! output until exit.
//!
//! Cancellation goes graceful-first for the build container: the shell's
//! termination script is exec'd inside it, the container gets a grace
//! period to exit, then it is killed outright.

use std::time::Duration;

use bollard::container::LogOutput;
use futures_util::stream::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::docker::client::{DockerClient, DockerError};
use crate::error::ExecutorError;
use crate::trace::TraceSink;

/// How long a cancelled container gets to exit on its own.
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(30);
/// How long to wait for the exit after SIGKILL.
const KILL_WAIT: Duration = Duration::from_secs(10);

/// Byte-oriented consumer for one attached stream.
pub trait OutputSink: Send {
    fn write(&mut self, data: &[u8]);
}

/// Adapter that assembles bytes into lines and forwards them to the job
/// trace. Stderr lines go through the warning channel so they stand out.
pub struct TraceLineSink<'a> {
    trace: &'a dyn TraceSink,
    stderr: bool,
    buf: Vec<u8>,
}

impl<'a> TraceLineSink<'a> {
    pub fn stdout(trace: &'a dyn TraceSink) -> Self {
        Self {
            trace,
            stderr: false,
            buf: Vec::new(),
        }
    }

    pub fn stderr(trace: &'a dyn TraceSink) -> Self {
        Self {
            trace,
            stderr: true,
            buf: Vec::new(),
        }
    }

    /// Emit any unterminated trailing line.
    pub fn flush(&mut self) {
        if !self.buf.is_empty() {
            let line = std::mem::take(&mut self.buf);
            self.emit(&line);
        }
    }

    fn emit(&self, line: &[u8]) {
        let lossy = String::from_utf8_lossy(line);
        let text = lossy.strip_suffix('\r').unwrap_or(&lossy);
        if self.stderr {
            self.trace.warning(text);
        } else {
            self.trace.println(text);
        }
    }
}

impl OutputSink for TraceLineSink<'_> {
    fn write(&mut self, data: &[u8]) {
        for &byte in data {
            if byte == b'\n' {
                let line = std::mem::take(&mut self.buf);
                self.emit(&line);
            } else {
                self.buf.push(byte);
            }
        }
    }
}

/// Run a created container to completion: attach, start, optionally feed
/// `script` on stdin, demux output into the sinks, and map the exit status.
/// Non-zero exit is a build failure; cancellation stops the container and
/// reports `Aborted`.
pub async fn run_container(
    client: &DockerClient,
    container_id: &str,
    script: Option<&str>,
    stdout: &mut dyn OutputSink,
    stderr: &mut dyn OutputSink,
    cancel: &CancellationToken,
    termination_cmd: Option<Vec<String>>,
) -> Result<(), ExecutorError> {
    let mut attach = client.attach_container(container_id).await?;
    client.start_container(container_id).await?;
    debug!(container = %container_id, "container started");

    if let Some(script) = script {
        attach
            .input
            .write_all(script.as_bytes())
            .await
            .map_err(|e| stdin_error(container_id, &e))?;
        // EOF tells the shell the script is complete.
        attach
            .input
            .shutdown()
            .await
            .map_err(|e| stdin_error(container_id, &e))?;
    }

    let mut output = attach.output;
    let streamed = async {
        while let Some(chunk) = output.next().await {
            match chunk.map_err(DockerError::from)? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    stdout.write(&message);
                }
                LogOutput::StdErr { message } => stderr.write(&message),
                LogOutput::StdIn { .. } => {}
            }
        }
        client.wait_container(container_id).await
    };

    tokio::select! {
        exit = streamed => match exit? {
            0 => Ok(()),
            code => Err(ExecutorError::BuildFailed(code)),
        },
        _ = cancel.cancelled() => {
            stop_container(client, container_id, termination_cmd).await;
            Err(ExecutorError::Aborted)
        }
    }
}

/// Stop a running container: graceful termination command first when one
/// is given, a grace period to exit, then SIGKILL. Best-effort throughout.
pub async fn stop_container(
    client: &DockerClient,
    container_id: &str,
    termination_cmd: Option<Vec<String>>,
) {
    if let Some(cmd) = termination_cmd {
        debug!(container = %container_id, "sending termination script");
        if let Err(e) = client.exec_in_container(container_id, cmd).await {
            debug!(container = %container_id, error = %e, "termination script failed");
        }
    }

    if timeout(STOP_GRACE_PERIOD, client.wait_container(container_id))
        .await
        .is_ok()
    {
        return;
    }

    warn!(container = %container_id, "container did not exit in time, killing");
    if let Err(e) = client.kill_container(container_id, "SIGKILL").await {
        debug!(container = %container_id, error = %e, "kill failed");
        return;
    }
    let _ = timeout(KILL_WAIT, client.wait_container(container_id)).await;
}

fn stdin_error(container_id: &str, err: &std::io::Error) -> ExecutorError {
    ExecutorError::Docker(DockerError::ConnectionFailed(format!(
        "writing build script to container {}: {}",
        container_id, err
    )))
}
