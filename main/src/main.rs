use common::tags::TagSet;
use common::utils::config::get_config;
use km_builder::Services;
use main::KernelMemory;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// In-process demo entrypoint: builds every collaborator and round-trips one document
/// through import, readiness, search and ask, exercising the public API end to end without
/// a queue worker (orchestration = in-process).
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;
    let services = Services::build(config).await?;
    let memory = KernelMemory::new(services);

    let document_id = memory
        .import_text("Kernel Memory demo document.", TagSet::new(), "default", None, None)
        .await?;
    info!(document_id = %document_id, "imported demo document");

    let ready = memory.is_document_ready("default", &document_id).await?;
    info!(ready, "checked readiness");

    let hits = memory.search("demo document", "default", &[], 5).await?;
    info!(hits = hits.len(), "ran search");

    Ok(())
}
