use crate::errors::TraceError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

struct RunLog {
    path: PathBuf,
    len: u64,
    modified: Option<SystemTime>,
}

/// Prunes `.jsonl` run logs in `dir`, oldest first, until they fit
/// `budget_bytes`. The log currently being written (`active`) is never removed.
pub fn enforce_total_budget(
    dir: &Path,
    budget_bytes: u64,
    active: &Path,
) -> Result<Vec<PathBuf>, TraceError> {
    let mut logs = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| TraceError::Io(e.to_string()))? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("jsonl") {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if meta.is_file() {
            logs.push(RunLog {
                path,
                len: meta.len(),
                modified: meta.modified().ok(),
            });
        }
    }

    let mut total: u64 = logs.iter().map(|log| log.len).sum();
    if total <= budget_bytes {
        return Ok(Vec::new());
    }
    logs.sort_by_key(|log| log.modified);

    let mut pruned = Vec::new();
    for log in logs {
        if total <= budget_bytes {
            break;
        }
        if log.path == active {
            continue;
        }
        fs::remove_file(&log.path).map_err(|e| TraceError::Io(e.to_string()))?;
        total = total.saturating_sub(log.len);
        pruned.push(log.path);
    }
    Ok(pruned)
}
