//! Crash-safe queue snapshot.
//!
//! Every mutating scheduler change persists an ordered snapshot to a JSON
//! sidecar file: per queue the run slots by admission time (sentinels
//! included, so a paused queue stays paused), then the wait list, then any
//! request the store knows about but no queue accounts for. Restart
//! reconstructs order and paused state from this file alone; implicit
//! collection ordering is never relied on.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

/// Ordered ids of one queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueSnapshot {
    /// Queue name.
    pub name: String,
    /// Run slots by admission time, then the wait list. Sentinel ids mark
    /// a paused queue.
    pub entries: Vec<String>,
}

/// Full scheduler snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulerSnapshot {
    /// One snapshot per queue, in scheduler order.
    pub queues: Vec<QueueSnapshot>,
    /// Requests present in the store but on no queue.
    pub unaccounted: Vec<String>,
}

impl SchedulerSnapshot {
    /// Writes the snapshot, replacing any previous file atomically via a
    /// sibling temp file and rename.
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)
    }

    /// Reads a snapshot; `None` when no file exists (first start).
    pub fn read_from(path: &Path) -> io::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
