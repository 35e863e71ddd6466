//! Probe command
//!
//! Report what `connect` discovered about the runtime and the instance.

use anyhow::Result;
use console::style;
use serde::Serialize;

use singularity_conn::{Connection, ConnectionConfig, SingularityConnection};

#[derive(Debug, Serialize)]
struct ProbeReport {
    target: String,
    instance: String,
    program: String,
    version: Option<String>,
    transfer: String,
}

pub async fn execute(config: &ConnectionConfig, target: &str, json: bool) -> Result<()> {
    let mut conn = SingularityConnection::connect(target, config).await?;

    let report = ProbeReport {
        target: conn.instance().to_string(),
        instance: conn.instance().name().to_string(),
        program: conn.program().display().to_string(),
        version: conn.runtime_version().map(String::from),
        transfer: conn.transfer_strategy().to_string(),
    };
    conn.close().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "  {} {}",
        style("→").bold(),
        style(&report.target).white().bold()
    );
    println!("    {}  {}", style("runtime ").dim(), report.program);
    println!(
        "    {}  {}",
        style("version ").dim(),
        report.version.as_deref().unwrap_or("unknown")
    );
    println!("    {}  {}", style("transfer").dim(), report.transfer);
    Ok(())
}
