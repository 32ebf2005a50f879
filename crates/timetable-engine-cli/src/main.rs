use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};

use timetable_engine::{
    apply_undo, check_consistency, ensure_consistency, find_inconsistencies, update_contribution,
    ContributionId, ContributionUpdate, Event, EventSnapshot, Inconsistency, SessionId,
    UndoUnschedule,
};

/// Check and edit conference timetable snapshots.
///
/// Example:
///   timetable check event.json --fix --write event.json
///   timetable update event.json --contribution 12 --session 3
#[derive(Debug, Parser)]
#[command(name = "timetable", version, about, long_about = None)]
struct Cli {
    /// Log more (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List contributions whose session disagrees with their timetable slot.
    Check {
        #[command(flatten)]
        io: SnapshotIo,

        /// Only check this contribution.
        #[arg(long)]
        contribution: Option<u64>,

        /// Unschedule the inconsistent contributions.
        #[arg(long)]
        fix: bool,
    },

    /// Update a contribution and report whether it was unscheduled.
    Update {
        #[command(flatten)]
        io: SnapshotIo,

        #[arg(long)]
        contribution: u64,

        /// Move the contribution into this session.
        #[arg(long, conflicts_with = "no_session")]
        session: Option<u64>,

        /// Take the contribution out of its session.
        #[arg(long)]
        no_session: bool,

        #[arg(long)]
        title: Option<String>,

        /// New start time (RFC 3339).
        #[arg(long)]
        start: Option<String>,

        /// New duration in minutes.
        #[arg(long)]
        duration: Option<i64>,
    },

    /// Reschedule a contribution from the undo data printed by `update`.
    Undo {
        #[command(flatten)]
        io: SnapshotIo,

        /// The `undo_unschedule` JSON object.
        #[arg(long)]
        payload: String,
    },
}

#[derive(Debug, Args)]
struct SnapshotIo {
    /// Event snapshot (JSON). Use `-` for stdin.
    #[arg(env = "TIMETABLE_SNAPSHOT", default_value = "-")]
    snapshot: PathBuf,

    /// Write the resulting snapshot to this file.
    #[arg(long)]
    write: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct CheckReport {
    contribution: ContributionId,
    title: String,
    kind: Inconsistency,
    unscheduled: bool,
}

#[derive(Debug, Serialize)]
struct UndoReport {
    contribution: ContributionId,
    entry: timetable_engine::EntryId,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Check {
            io,
            contribution,
            fix,
        } => {
            let mut event = load(&io.snapshot)?;
            let found = match contribution {
                Some(id) => {
                    let id = ContributionId(id);
                    if event.contribution(id).is_none() {
                        bail!("unknown contribution {id}");
                    }
                    check_consistency(&event, id)
                        .map(|kind| vec![(id, kind)])
                        .unwrap_or_default()
                }
                None => find_inconsistencies(&event),
            };
            info!(count = found.len(), "consistency check finished");

            let mut report = Vec::with_capacity(found.len());
            for (id, kind) in found {
                let unscheduled = fix && ensure_consistency(&mut event, id);
                let title = event
                    .contribution(id)
                    .map(|c| c.verbose_title())
                    .unwrap_or_default();
                report.push(CheckReport {
                    contribution: id,
                    title,
                    kind,
                    unscheduled,
                });
            }
            print_json(&report)?;
            save(&event, io.write.as_deref())
        }

        Command::Update {
            io,
            contribution,
            session,
            no_session,
            title,
            start,
            duration,
        } => {
            let mut event = load(&io.snapshot)?;
            let session = match (session, no_session) {
                (Some(id), _) => Some(Some(SessionId(id))),
                (None, true) => Some(None),
                (None, false) => None,
            };
            let update = ContributionUpdate {
                title,
                duration_minutes: duration,
                session,
                start_dt: start.as_deref().map(parse_start).transpose()?,
                ..Default::default()
            };
            let outcome = update_contribution(&mut event, ContributionId(contribution), update)
                .with_context(|| format!("failed to update contribution {contribution}"))?;
            print_json(&outcome)?;
            save(&event, io.write.as_deref())
        }

        Command::Undo { io, payload } => {
            let mut event = load(&io.snapshot)?;
            let undo: UndoUnschedule =
                serde_json::from_str(&payload).context("invalid undo payload")?;
            let entry = apply_undo(&mut event, &undo).with_context(|| {
                format!("failed to reschedule contribution {}", undo.contribution_id)
            })?;
            print_json(&UndoReport {
                contribution: undo.contribution_id,
                entry,
            })?;
            save(&event, io.write.as_deref())
        }
    }
}

/// Logs go to stderr so stdout stays valid JSON.
fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();
}

fn load(path: &Path) -> Result<Event> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read snapshot from stdin")?;
        buf
    } else {
        fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot {}", path.display()))?
    };
    let snapshot: EventSnapshot =
        serde_json::from_str(&raw).context("snapshot is not valid JSON")?;
    let event = Event::from_snapshot(snapshot).context("snapshot is inconsistent")?;
    debug!(
        title = event.title(),
        contributions = event.contributions().count(),
        entries = event.entries().count(),
        "loaded snapshot"
    );
    Ok(event)
}

fn save(event: &Event, path: Option<&Path>) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    let json = serde_json::to_string_pretty(&event.to_snapshot())?;
    fs::write(path, json + "\n")
        .with_context(|| format!("failed to write snapshot {}", path.display()))?;
    info!(path = %path.display(), "wrote snapshot");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_start(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid start time '{s}'"))
}
