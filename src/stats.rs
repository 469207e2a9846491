//! Per-stage run statistics persisted as JSON
//!
//! `stats.json` maps a statistic name to its value at every stage index:
//!
//! ```json
//! { "time": { "0": 12.5, "1": 9.1 }, "rehearsal_memory_size": { "1": 2000.0 } }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Statistic values indexed by stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatsTable(BTreeMap<String, BTreeMap<usize, f64>>);

/// Collects statistics for a run and writes them to `stats.json`
#[derive(Debug, Clone)]
pub struct StatsTracker {
    path: PathBuf,
    table: StatsTable,
}

impl StatsTracker {
    /// Empty tracker that saves to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), table: StatsTable::default() }
    }

    /// Resume the stats at `path`, starting empty when the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let table = if path.exists() { read_table(&path)? } else { StatsTable::default() };
        Ok(Self { path, table })
    }

    /// Replace the current entries with the ones stored at `from`
    ///
    /// Used when bootstrapping from a base run. The save location is kept.
    pub fn load(&mut self, from: &Path) -> Result<()> {
        if !from.exists() {
            return Err(Error::Io(format!("stats file not found: {}", from.display())));
        }
        self.table = read_table(from)?;
        Ok(())
    }

    pub fn put(&mut self, key: &str, stage: usize, value: f64) {
        self.table.0.entry(key.to_string()).or_default().insert(stage, value);
    }

    pub fn get(&self, key: &str, stage: usize) -> Option<f64> {
        self.table.0.get(key).and_then(|values| values.get(&stage).copied())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.table.0.keys().map(String::as_str)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.table)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

fn read_table(path: &Path) -> Result<StatsTable> {
    let json = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}
