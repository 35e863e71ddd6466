//! Exec command
//!
//! Run a command inside an instance and mirror its output and exit code.

use std::io::Write;

use anyhow::Result;
use tokio::io::AsyncReadExt;

use singularity_conn::{CommandOutput, Connection, ConnectionConfig, SingularityConnection};

/// Run `command` as discrete arguments.
pub async fn execute(
    config: &ConnectionConfig,
    target: &str,
    command: Vec<String>,
    read_stdin: bool,
) -> Result<()> {
    let input = read_input(read_stdin).await?;

    let mut conn = SingularityConnection::connect(target, config).await?;
    let output = conn.execute(&command, input.as_deref()).await?;
    conn.close().await?;

    forward(output)
}

/// Run `command` through the configured shell.
pub async fn shell(
    config: &ConnectionConfig,
    target: &str,
    command: &str,
    read_stdin: bool,
) -> Result<()> {
    let input = read_input(read_stdin).await?;

    let mut conn = SingularityConnection::connect(target, config).await?;
    let output = conn.execute_shell(command, input.as_deref()).await?;
    conn.close().await?;

    forward(output)
}

async fn read_input(read_stdin: bool) -> Result<Option<Vec<u8>>> {
    if !read_stdin {
        return Ok(None);
    }

    let mut buf = Vec::new();
    tokio::io::stdin().read_to_end(&mut buf).await?;
    Ok(Some(buf))
}

/// Write the captured streams through and exit with the command's code.
fn forward(output: CommandOutput) -> Result<()> {
    let mut stdout = std::io::stdout();
    stdout.write_all(&output.stdout)?;
    stdout.flush()?;

    let mut stderr = std::io::stderr();
    stderr.write_all(&output.stderr)?;
    stderr.flush()?;

    if output.exit_code != 0 {
        std::process::exit(output.exit_code);
    }

    Ok(())
}
