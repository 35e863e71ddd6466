//! Child process execution.
//!
//! One call spawns exactly one child and waits for it. Stdin is written while
//! stdout and stderr are drained, so neither side can fill a pipe buffer and
//! stall the other. Children are spawned with `kill_on_drop`, so dropping the
//! future (caller-side cancellation) terminates the process too.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

use crate::error::{ConnectionError, Result};

/// How long a child gets to exit after SIGTERM before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Where the child's stdin comes from.
pub enum Input<'a> {
    Null,
    Bytes(&'a [u8]),
    File(std::fs::File),
}

/// Where the child's stdout goes. Stderr is always captured.
pub enum Output {
    Capture,
    File(std::fs::File),
    Discard,
}

/// Result of a child that exited on its own.
#[derive(Debug)]
pub struct ProcessOutput {
    pub exit_code: i32,
    /// Empty unless stdout was captured.
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Spawn `command`, feed it `input`, and wait for it to exit.
///
/// `label` names the command in logs and errors.
pub async fn run(
    mut command: Command,
    label: &str,
    input: Input<'_>,
    output: Output,
    timeout: Option<Duration>,
) -> Result<ProcessOutput> {
    let (stdin_cfg, stdin_bytes) = match input {
        Input::Null => (Stdio::null(), None),
        Input::Bytes(bytes) => (Stdio::piped(), Some(bytes)),
        Input::File(file) => (Stdio::from(file), None),
    };

    let stdout_cfg = match output {
        Output::Capture => Stdio::piped(),
        Output::File(file) => Stdio::from(file),
        Output::Discard => Stdio::null(),
    };

    command
        .stdin(stdin_cfg)
        .stdout(stdout_cfg)
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::debug!("EXEC {}", label);
    let started = Instant::now();

    let mut child = command
        .spawn()
        .map_err(|e| ConnectionError::execution(label, format!("failed to spawn: {}", e)))?;

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let communicate = async {
        let (_, stdout, stderr) = tokio::try_join!(
            feed_stdin(stdin, stdin_bytes),
            drain(stdout),
            drain(stderr)
        )?;
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, stdout, stderr))
    };

    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, communicate).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("{} exceeded {:?}, terminating", label, limit);
                terminate(&mut child).await;
                return Err(ConnectionError::timeout(label, started.elapsed()));
            }
        },
        None => communicate.await,
    };

    let (status, stdout, stderr) = result
        .map_err(|e| ConnectionError::execution(label, format!("I/O error: {}", e)))?;

    let exit_code = exit_code(status)
        .map_err(|message| ConnectionError::execution(label, message))?;

    tracing::debug!(
        "{} exited with {} after {:?} ({} bytes stdout, {} bytes stderr)",
        label,
        exit_code,
        started.elapsed(),
        stdout.len(),
        stderr.len()
    );

    Ok(ProcessOutput {
        exit_code,
        stdout,
        stderr,
    })
}

async fn feed_stdin(
    stdin: Option<tokio::process::ChildStdin>,
    bytes: Option<&[u8]>,
) -> std::io::Result<()> {
    let (Some(mut pipe), Some(bytes)) = (stdin, bytes) else {
        return Ok(());
    };

    match pipe.write_all(bytes).await {
        // The child may exit without reading all of its input.
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
        other => other?,
    }

    // Dropping the pipe closes it, signalling end-of-input.
    drop(pipe);
    Ok(())
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

fn exit_code(status: ExitStatus) -> std::result::Result<i32, String> {
    if let Some(code) = status.code() {
        return Ok(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Err(format!("terminated by signal {}", signal));
        }
    }

    Err(format!("terminated abnormally ({})", status))
}

/// Ask the child to stop, then kill it if it does not exit in time.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                && tokio::time::timeout(TERMINATE_GRACE, child.wait())
                    .await
                    .is_ok()
            {
                return;
            }
        }
    }

    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill child process: {}", e);
    }
}
