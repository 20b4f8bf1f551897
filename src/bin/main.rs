//! Operational CLI for an on-disk Mindoodb database: inspect, compact, scan, and purge a
//! store without going through the network boundary.

use clap::{Parser, Subcommand};
use mindoodb::cas::{Cas, OnDiskCas, ScanFilters};
use mindoodb::config::OnDiskCasConfig;
use signal_hook::flag as signal_flag;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mindoodb", about = "Operate on a Mindoodb on-disk store")]
struct Cli {
    /// Base directory containing the database's subdirectories.
    #[arg(long, default_value = "./mindoodb-data")]
    base_dir: PathBuf,

    /// Logical database identifier.
    #[arg(long)]
    db_id: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print entry count and compaction status.
    Stats,
    /// Scan entry metadata, optionally starting after a cursor.
    Scan {
        #[arg(long)]
        since: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Remove all entries for a document and reclaim orphaned payloads.
    Purge {
        doc_id: String,
    },
}

fn main() -> mindoodb::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in signal_hook::consts::TERM_SIGNALS {
        let _ = signal_flag::register(*signal, Arc::clone(&shutdown));
    }

    let cli = Cli::parse();
    let config = OnDiskCasConfig::new(cli.base_dir, cli.db_id);
    let cas = OnDiskCas::open(&config)?;

    match cli.command {
        Command::Stats => {
            let ids = cas.get_all_ids()?;
            let status = cas.get_compaction_status()?;
            println!("entries: {}", ids.len());
            println!(
                "compaction: enabled={} applied_segments={} applied_bytes={} last_compaction_at={:?}",
                status.enabled, status.applied_segment_count, status.applied_segment_bytes, status.last_compaction_at
            );
        }
        Command::Scan { since, limit } => {
            let cursor = match since {
                Some(raw) => Some(parse_cursor(&raw)?),
                None => None,
            };
            let result = cas.scan_entries_since(cursor, Some(limit), None::<&ScanFilters>)?;
            for entry in &result.entries {
                println!("{}\t{}\t{:?}", entry.created_at, entry.id, entry.entry_type);
            }
            println!("has_more: {}", result.has_more);
            if shutdown.load(Ordering::Relaxed) {
                println!("shutdown signal received, stopping early");
            }
        }
        Command::Purge { doc_id } => {
            let outcome = cas.purge_doc_history(&doc_id)?;
            println!(
                "removed {} entries, reclaimed {} payloads",
                outcome.removed_entry_ids.len(),
                outcome.orphaned_content_hashes.len()
            );
        }
    }

    Ok(())
}

fn parse_cursor(raw: &str) -> mindoodb::Result<(i64, String)> {
    let (ts, id) = raw.split_once(':').ok_or_else(|| {
        mindoodb::Error::InvalidOperation("cursor must be formatted '<created_at>:<id>'".into())
    })?;
    let ts: i64 = ts
        .parse()
        .map_err(|_| mindoodb::Error::InvalidOperation("invalid cursor timestamp".into()))?;
    Ok((ts, id.to_string()))
}
