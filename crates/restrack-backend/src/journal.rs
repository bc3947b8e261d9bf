//! # Record Journal
//!
//! Append-only JSON-lines files that make the in-memory store durable.
//! Every committed mutation appends the full record; replay keeps the last
//! line seen for each oid.

use crate::error::BackendError;
use crate::record::{AllocationRecord, Oid, ResourceRecord};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct Journal {
    allocations: PathBuf,
    resources: PathBuf,
}

/// Records recovered from a journal.
#[derive(Debug, Default)]
pub struct Replayed {
    pub allocations: HashMap<Oid, AllocationRecord>,
    pub resources: HashMap<Oid, ResourceRecord>,
}

impl Journal {
    /// Opens (creating if needed) the journal directory `dir`, with one file
    /// per collection.
    pub async fn open(
        dir: &Path,
        allocation_collection: &str,
        resource_collection: &str,
    ) -> Result<Self, BackendError> {
        fs::create_dir_all(dir).await?;
        Ok(Self {
            allocations: dir.join(format!("{allocation_collection}.jsonl")),
            resources: dir.join(format!("{resource_collection}.jsonl")),
        })
    }

    pub async fn append_allocation(&self, record: &AllocationRecord) -> Result<(), BackendError> {
        append_line(&self.allocations, record).await
    }

    pub async fn append_resource(&self, record: &ResourceRecord) -> Result<(), BackendError> {
        append_line(&self.resources, record).await
    }

    pub async fn replay(&self) -> Result<Replayed, BackendError> {
        let allocations = read_lines::<AllocationRecord>(&self.allocations)
            .await?
            .into_iter()
            .map(|record| (record.oid.clone(), record))
            .collect();
        let resources = read_lines::<ResourceRecord>(&self.resources)
            .await?
            .into_iter()
            .map(|record| (record.oid.clone(), record))
            .collect();
        Ok(Replayed {
            allocations,
            resources,
        })
    }
}

async fn append_line<T: Serialize>(path: &Path, record: &T) -> Result<(), BackendError> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&line).await?;
    file.flush().await?;
    file.sync_data().await?;
    Ok(())
}

async fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, BackendError> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No journal yet");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            // A torn final write is the only expected cause.
            Err(e) => warn!(path = %path.display(), line = number + 1, error = %e, "Skipping unreadable journal line"),
        }
    }
    Ok(records)
}
