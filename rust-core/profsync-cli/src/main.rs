// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <j.d.a.jewell@open.ac.uk>
//!
//! profsync: drive the ProfSync engine from the command line.
//!
//! Replays JSON-lines producer updates through the async envelope and
//! inspects the resulting state: pending conflicts, unified identities,
//! audit history and audit chain integrity. Output is JSON on stdout; logs
//! go to stderr (`RUST_LOG`, default `info`).

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use profsync_engine::{Engine, EngineConfig};
use profsync_profile::ProposedUpdate;
use profsync_storage::{InMemoryBackend, StorageBackend};
use serde::Serialize;
use tracing::{info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// CLI argument parsing
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "profsync", version = VERSION, about = "Profile synchronization engine")]
struct Cli {
    /// Engine configuration (JSON). Defaults apply to anything not named.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// redb database file. Without it, state lives in memory for one run.
    #[cfg(feature = "redb-backend")]
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit JSON-lines updates from FILE (or `-` for stdin).
    Replay { input: String },
    /// List pending conflicts.
    Pending {
        #[arg(long)]
        entity: Option<String>,
    },
    /// Show an entity's unified identity.
    Identity { entity: String },
    /// Show an entity's audit history, newest first.
    History {
        entity: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Verify an entity's audit hash chain.
    Verify { entity: String },
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplaySummary {
    lines: usize,
    submitted: usize,
    parse_errors: usize,
    rejected: usize,
}

/// Submit every line of `reader` and wait for the envelope to drain. Bad
/// lines are counted and logged.
async fn replay(engine: &Engine, reader: impl BufRead) -> Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("reading input")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        summary.lines += 1;

        let update: ProposedUpdate = match serde_json::from_str(line) {
            Ok(update) => update,
            Err(err) => {
                warn!(line = index + 1, error = %err, "unparseable update");
                summary.parse_errors += 1;
                continue;
            }
        };
        match engine.submit_update(update) {
            Ok(_) => summary.submitted += 1,
            Err(err) => {
                warn!(line = index + 1, error = %err, "update rejected");
                summary.rejected += 1;
            }
        }
    }
    engine.wait_idle().await;
    info!(
        submitted = summary.submitted,
        parse_errors = summary.parse_errors,
        rejected = summary.rejected,
        "replay finished"
    );
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn open_backend(cli: &Cli) -> Result<Arc<dyn StorageBackend>> {
    #[cfg(feature = "redb-backend")]
    if let Some(path) = &cli.db {
        let backend = profsync_storage::RedbBackend::open(path)
            .with_context(|| format!("opening {}", path.display()))?;
        return Ok(Arc::new(backend));
    }
    let _ = cli;
    Ok(Arc::new(InMemoryBackend::new()))
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let engine = Engine::new(open_backend(&cli)?, config);

    match &cli.command {
        Command::Replay { input } => {
            let summary = if input == "-" {
                replay(&engine, io::stdin().lock()).await?
            } else {
                let file = File::open(input).with_context(|| format!("opening {input}"))?;
                replay(&engine, BufReader::new(file)).await?
            };
            print_json(&serde_json::json!({
                "replay": summary,
                "stats": engine.async_stats(),
                "failed": engine.failed_operations(),
            }))?;
        }
        Command::Pending { entity } => {
            print_json(&engine.pending_conflicts(entity.as_deref()).await?)?;
        }
        Command::Identity { entity } => match engine.unified_identity(entity).await? {
            Some(identity) => print_json(&identity)?,
            None => anyhow::bail!("no profile data for entity {entity}"),
        },
        Command::History { entity, limit } => {
            print_json(&engine.audit_history(entity, *limit).await?)?;
        }
        Command::Verify { entity } => {
            let entries = engine
                .verify_audit_chain(entity)
                .await
                .with_context(|| format!("audit chain of {entity} failed verification"))?;
            print_json(&serde_json::json!({
                "entityId": entity,
                "entries": entries,
                "valid": true,
            }))?;
        }
    }

    engine.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Cursor;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_history_limit() {
        let cli = Cli::try_parse_from(["profsync", "history", "S1", "--limit", "5"]).unwrap();
        match cli.command {
            Command::History { entity, limit } => {
                assert_eq!(entity, "S1");
                assert_eq!(limit, 5);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_replay_counts_bad_lines() {
        let engine = Engine::in_memory(EngineConfig::default());
        let input = [
            r#"{"entityId":"S1","source":"session","sourceId":"a1","domain":"academic","field":"examAverage","value":72,"confidence":80,"actor":{"kind":"ai","id":"tutor"}}"#,
            "",
            "not json",
            r#"{"entityId":"","source":"session","sourceId":"a2","domain":"academic","field":"examAverage","value":70,"actor":{"kind":"ai","id":"tutor"}}"#,
            r#"{"entityId":"S1","source":"session","sourceId":"a3","domain":"astrology","field":"sign","value":"leo","actor":{"kind":"ai","id":"tutor"}}"#,
        ]
        .join("\n");

        let summary = replay(&engine, Cursor::new(input)).await.unwrap();
        assert_eq!(summary.lines, 4);
        assert_eq!(summary.submitted, 1);
        assert_eq!(summary.parse_errors, 2);
        assert_eq!(summary.rejected, 1);
        assert_eq!(engine.entities().await.unwrap(), vec!["S1".to_string()]);
    }
}
