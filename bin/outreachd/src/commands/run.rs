use outreach_agent::AgentRuntime;
use outreach_core::{Config, Paths};
use tracing::info;

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;

    let runtime = AgentRuntime::new(config, paths)?;
    let shutdown_tx = runtime.start().await?;
    info!("outreachd running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(());
    // Let the service loops observe the broadcast before the process exits.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    Ok(())
}
