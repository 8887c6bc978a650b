use std::process::ExitCode;

use anyhow::Context;
use catalog_core::{FileSource, HttpSource, PimClient, RankedSources, SourceRecord};
use catalog_sync::config::SyncConfig;
use catalog_sync::sync::engine::Reconciler;
use catalog_sync::sync::planner::PlanOp;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Reconcile,
    Plan,
    Purge,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Reconcile;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "reconcile" => mode = CliMode::Reconcile,
            "plan" => mode = CliMode::Plan,
            "purge" => mode = CliMode::Purge,
            "--help" | "-h" => return Ok(CliMode::Help),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,catalog_sync=info")),
        )
        .init();

    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: catalog-sync [reconcile|plan|purge]");
        println!("  reconcile  Bring the remote tree in line with the source records (default)");
        println!("  plan       Print the operations a reconcile would run, change nothing");
        println!("  purge      Delete every child of CATALOG_ROOT except protected paths");
        return Ok(ExitCode::SUCCESS);
    }

    let config = SyncConfig::from_env()?;
    let client = PimClient::with_endpoint(config.endpoint.as_str(), config.credentials.clone())
        .context("failed to build PIM client")?;
    let engine = Reconciler::new(client, config.root.as_str())
        .with_language(config.language.as_str())
        .with_leaf_key_prefix(config.leaf_key_prefix.as_str())
        .with_retry(config.retry_policy());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing in-flight operation");
            on_signal.cancel();
        }
    });

    let summary = match mode {
        CliMode::Plan => {
            let records = load_records(&config).await?;
            let plan = engine.plan(&records).await?;
            for entry in plan.entries() {
                match &entry.op {
                    PlanOp::Blocked { path, error } => {
                        tracing::warn!(id = %entry.id, path = %path, error = %error, "blocked");
                    }
                    op => tracing::info!(
                        id = %entry.id,
                        op = %op.kind(),
                        path = op.path(),
                        depends_on = ?entry.depends_on,
                        "planned"
                    ),
                }
            }
            tracing::info!(entries = plan.len(), noop = plan.is_noop(), "dry run complete");
            return Ok(ExitCode::SUCCESS);
        }
        CliMode::Reconcile => {
            let records = load_records(&config).await?;
            engine.reconcile(&records, cancel).await?
        }
        CliMode::Purge => engine.purge(&config.protected_paths, cancel).await?,
        CliMode::Help => return Ok(ExitCode::SUCCESS),
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(if summary.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn load_records(config: &SyncConfig) -> anyhow::Result<Vec<SourceRecord>> {
    let mut sources = RankedSources::new().with(HttpSource::new(config.source_url.as_str())?);
    if config.fallback_file.exists() {
        sources = sources.with(FileSource::new(config.fallback_file.clone()));
    } else {
        tracing::debug!(path = %config.fallback_file.display(), "no fallback file");
    }
    let records = sources
        .load_records()
        .await
        .context("failed to load source records")?;
    tracing::info!(records = records.len(), "source records loaded");
    Ok(records)
}
