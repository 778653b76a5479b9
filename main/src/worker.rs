use std::sync::Arc;
use std::time::Duration;

use common::utils::config::get_config;
use km_builder::{Orchestrator, Services};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Canonical pipeline steps, one polling loop each (spec §4.3, §4.4 distributed variant).
const STEPS: &[&str] = &[
    "extract",
    "partition",
    "summarize",
    "gen_embeddings",
    "save_embeddings",
    "delete_document",
    "delete_index",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;
    let poll_delay = Duration::from_millis(config.retry.poll_delay_msecs);
    let batch_size = config.retry.fetch_batch_size;
    let services = Services::build(config).await?;

    let Orchestrator::Distributed(orchestrator) = &services.orchestrator else {
        error!("worker requires orchestration = distributed; exiting");
        return Ok(());
    };

    let handles: Vec<_> = STEPS
        .iter()
        .map(|step| {
            let orchestrator = Arc::clone(orchestrator);
            let step = (*step).to_string();
            tokio::spawn(async move {
                loop {
                    match orchestrator.run_once(&step, batch_size).await {
                        Ok(0) => tokio::time::sleep(poll_delay).await,
                        Ok(processed) => info!(step = %step, processed, "worker drained a batch"),
                        Err(err) => {
                            error!(step = %step, error = %err, "worker batch failed");
                            tokio::time::sleep(poll_delay).await;
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await?;
    }
    Ok(())
}
