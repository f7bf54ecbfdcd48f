//! archflow - runs one design workflow over the documents given on the command line.

use std::path::Path;

use anyhow::Context;
use archflow::retrieval::SourceDocument;
use archflow::{AgentContext, AgentRegistry, Config, Phase, WorkflowOrchestrator};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "archflow=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        anyhow::bail!("usage: archflow <document>...");
    }
    let documents = paths
        .iter()
        .map(|p| read_document(Path::new(p)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let config = Config::from_env()?;
    let backend = if config.generation.api_key.is_some() { "http" } else { "placeholder" };
    info!(backend, tiers = config.generation.tiers.len(), "Loaded configuration");
    let ctx = AgentContext::from_config(config)?;
    let cancel = ctx.cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling workflow");
            cancel.cancel();
        }
    });

    let orchestrator = WorkflowOrchestrator::new(AgentRegistry::with_default_roster(), ctx);
    let workflow_id = orchestrator.start("architecture", documents).await;
    orchestrator.run_pending(&workflow_id).await?;

    for phase in Phase::ALL.iter().skip(1) {
        orchestrator.advance(&workflow_id, phase.as_str()).await?;
        let report = orchestrator.run_pending(&workflow_id).await?;
        if !report.failed.is_empty() {
            warn!(phase = %phase, failed = report.failed.len(), "Some tasks failed");
        }
    }

    let report = orchestrator.finalize(&workflow_id).await?;
    let status = orchestrator.status(&workflow_id).await?;
    let design = orchestrator.artifact(&workflow_id, "create_complete_add").await;
    let output = serde_json::json!({
        "workflow": status,
        "report": report,
        "design": design,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn read_document(path: &Path) -> anyhow::Result<SourceDocument> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let id = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    Ok(SourceDocument::new(id, content))
}
