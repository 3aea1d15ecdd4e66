use crate::shuffle::ShuffleOutcome;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

#[derive(Clone, Debug, Default, Serialize)]
pub struct MapTaskStats {
    pub worker: usize,
    pub block_bytes: u64,
    pub lines: u64,
    pub combined_bytes: u64,
    pub map_ms: u64,
    pub combine_ms: u64,
    pub wall_ms: u64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ReduceTaskStats {
    pub partition: usize,
    pub records_seen: u64,
    pub accepted: bool,
    pub wall_ms: u64,
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct MapStats {
    pub tasks: usize,
    pub total_lines: u64,
    pub total_bytes_in: u64,
    pub total_combined_bytes: u64,
    pub max_combine_ms: u64,
    pub min_task_ms: u64,
    pub max_task_ms: u64,
    pub wall_ms: u64,
}

impl MapStats {
    pub fn from_tasks(per_task: &[MapTaskStats], wall_ms: u64) -> Self {
        Self {
            tasks: per_task.len(),
            total_lines: per_task.iter().map(|t| t.lines).sum(),
            total_bytes_in: per_task.iter().map(|t| t.block_bytes).sum(),
            total_combined_bytes: per_task.iter().map(|t| t.combined_bytes).sum(),
            max_combine_ms: per_task.iter().map(|t| t.combine_ms).max().unwrap_or(0),
            min_task_ms: per_task.iter().map(|t| t.wall_ms).min().unwrap_or(0),
            max_task_ms: per_task.iter().map(|t| t.wall_ms).max().unwrap_or(0),
            wall_ms,
        }
    }
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct ShuffleStats {
    #[serde(flatten)]
    pub outcome: ShuffleOutcome,
    pub wall_ms: u64,
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct ReduceStats {
    pub reducers: usize,
    pub total_records_seen: u64,
    pub rejected_partitions: Vec<usize>,
    pub min_reducer_ms: u64,
    pub max_reducer_ms: u64,
    pub wall_ms: u64,
}

impl ReduceStats {
    pub fn from_tasks(per_task: &[ReduceTaskStats], wall_ms: u64) -> Self {
        Self {
            reducers: per_task.len(),
            total_records_seen: per_task.iter().map(|t| t.records_seen).sum(),
            rejected_partitions: per_task.iter().filter(|t| !t.accepted).map(|t| t.partition).collect(),
            min_reducer_ms: per_task.iter().map(|t| t.wall_ms).min().unwrap_or(0),
            max_reducer_ms: per_task.iter().map(|t| t.wall_ms).max().unwrap_or(0),
            wall_ms,
        }
    }
}

/// Summary of one `Engine::run`.
#[derive(Default, Clone, Debug, Serialize)]
pub struct RunReport {
    pub tag: String,
    pub success: bool,
    pub map: MapStats,
    pub shuffle: ShuffleStats,
    pub reduce: ReduceStats,
}

impl RunReport {
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let body = serde_json::to_vec_pretty(self)?;
        std::fs::write(path.as_ref(), body).with_context(|| format!("write {}", path.as_ref().display()))
    }
}
