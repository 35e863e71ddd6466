//! Put and fetch commands

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use console::style;

use singularity_conn::connection::singularity::fetch_destination;
use singularity_conn::{Connection, ConnectionConfig, SingularityConnection};

pub async fn put(config: &ConnectionConfig, target: &str, local: &Path, remote: &str) -> Result<()> {
    let mut conn = SingularityConnection::connect(target, config).await?;
    conn.put_file(local, remote).await?;
    conn.close().await?;

    println!(
        "  {} {} → {}:{}",
        style("✓").green().bold(),
        local.display(),
        conn.instance(),
        remote
    );
    Ok(())
}

pub async fn fetch(
    config: &ConnectionConfig,
    target: &str,
    remote: &str,
    local: Option<PathBuf>,
) -> Result<()> {
    let mut conn = SingularityConnection::connect(target, config).await?;

    let local = match local {
        Some(path) => path,
        None => {
            let cwd = std::env::current_dir().context("Failed to resolve current directory")?;
            fetch_destination(&cwd, conn.instance(), remote)
        }
    };

    conn.fetch_file(remote, &local).await?;
    conn.close().await?;

    println!(
        "  {} {}:{} → {}",
        style("✓").green().bold(),
        conn.instance(),
        remote,
        local.display()
    );
    Ok(())
}
