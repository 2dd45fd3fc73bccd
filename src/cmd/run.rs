//! The orchestration loop — `foreman run`.

use anyhow::Result;
use tokio::sync::watch;

use crate::Cli;

pub async fn cmd_run(cli: &Cli) -> Result<()> {
    let orchestrator = super::build_orchestrator(cli)?;

    // Make sure the status label set exists before the first sync.
    let ensured = orchestrator.ensure_labels().await;
    if !ensured.errors.is_empty() {
        for error in &ensured.errors {
            eprintln!("  {} {}", console::style("warning:").yellow(), error);
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    println!(
        "{} orchestration loop running, Ctrl-C to stop",
        console::style("foreman").bold()
    );
    orchestrator.run(shutdown_rx).await;
    println!("{} stopped", console::style("foreman").bold());
    Ok(())
}
