//! Loss curves of a stage
//!
//! Series are persisted as data (`loss.json`) with a sparkline in the log.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Named `(step, value)` series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LossCurve {
    series: BTreeMap<String, Vec<(usize, f32)>>,
}

impl LossCurve {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, step: usize, value: f32) {
        self.series.entry(name.to_string()).or_default().push((step, value));
    }

    pub fn get(&self, name: &str) -> Option<&[(usize, f32)]> {
        self.series.get(name).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Write every series to `path` and log a sparkline of each, then reset
    pub fn vis(&mut self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&self.series)?)?;
        for (name, points) in &self.series {
            let values: Vec<f32> = points.iter().map(|&(_, v)| v).collect();
            tracing::info!(series = %name, points = values.len(), "{}", sparkline(&values, 60));
        }
        self.reset();
        Ok(())
    }

    pub fn reset(&mut self) {
        self.series.clear();
    }
}

/// Unicode block sparkline, subsampled to at most `max_len` characters
pub fn sparkline(values: &[f32], max_len: usize) -> String {
    const CHARS: &[char] = &['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

    if values.is_empty() || max_len == 0 {
        return String::new();
    }

    let subsampled: Vec<f32> = if values.len() > max_len {
        let step = values.len() as f32 / max_len as f32;
        (0..max_len).map(|i| values[(i as f32 * step) as usize]).collect()
    } else {
        values.to_vec()
    };

    let min = subsampled.iter().copied().fold(f32::INFINITY, f32::min);
    let max = subsampled.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    subsampled
        .iter()
        .map(|&v| {
            let norm = if (max - min).abs() < 1e-10 { 0.5 } else { (v - min) / (max - min) };
            CHARS[((norm * 7.0).round() as usize).min(7)]
        })
        .collect()
}
