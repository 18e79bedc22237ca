use std::path::PathBuf;

use outreach_agent::AgentRuntime;
use outreach_core::{Config, Paths};
use tracing::{error, info};

/// Successor-process entry point: consume the checkpoint this process was
/// handed on the command line and re-run the job it describes.
pub async fn run(state_file: PathBuf) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;

    let runtime = AgentRuntime::new(config, paths)?;
    let record = runtime.heal_manager().load_record(&state_file)?;
    info!(state_file = %state_file.display(), phase = record.heal_phase(), "Checkpoint loaded");

    let shutdown_tx = runtime.start().await?;
    let outcome = runtime.resume(record).await;
    let _ = shutdown_tx.send(());

    match outcome {
        Ok(result) => {
            info!(result = %result, "Resumed job finished");
            Ok(())
        }
        Err(e) => {
            // A re-heal, if one was warranted, already happened inside the
            // handler; this process just reports the failure and exits.
            error!(error = %e, "Resumed job failed");
            Err(e.into())
        }
    }
}
