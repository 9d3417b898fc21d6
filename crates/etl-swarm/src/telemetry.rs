//! Run artifacts written to disk.
//!
//! - run result: pretty JSON, overwritten per run
//! - phase events: append-only JSONL, one `PhaseEvent` per line

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use coordination::events::{EventBusExt, EventFilter};
use coordination::{EventBus, PhaseEvent, RunResult};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Write the run result as pretty JSON, creating parent directories.
pub fn write_run_result(result: &RunResult, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(result).context("Failed to serialize run result")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "Wrote run result");
    Ok(())
}

/// Append one event as a JSON line.
pub fn append_event(event: &PhaseEvent, path: &Path) -> std::io::Result<()> {
    let json = serde_json::to_string(event).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{json}")
}

/// Subscribe to `bus` and append every event matching `filter` to `path`
/// until a matching terminal event arrives or the bus closes. Resolves to the
/// number of events written.
///
/// Subscribe before the run starts, or early events are missed.
pub fn spawn_event_log(bus: &EventBus, path: PathBuf, filter: EventFilter) -> JoinHandle<usize> {
    let mut rx = bus.subscribe_filtered(filter);
    tokio::spawn(async move {
        let mut written = 0;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    match append_event(&event, &path) {
                        Ok(()) => written += 1,
                        Err(e) => warn!(path = %path.display(), "Failed to append event: {e}"),
                    }
                    if event.is_terminal() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event log lagged behind the bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
        written
    })
}

/// Read a JSONL event log back.
pub fn read_events(path: &Path) -> std::io::Result<Vec<PhaseEvent>> {
    let text = std::fs::read_to_string(path)?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
        .collect()
}
