use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flowmend_core::{MendConfig, Outcome};
use flowmend_extract::{Recovery, mend_text};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Per-file result of a batch run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub file: String,
    pub outcome: Option<Outcome>,
    pub recovery: Option<Recovery>,
    pub fixes: usize,
    pub residual_errors: usize,
    pub residual_warnings: usize,
    pub error: Option<String>,
}

impl BatchEntry {
    pub fn passed(&self) -> bool {
        self.outcome == Some(Outcome::Success)
    }
}

/// Every `*.txt` / `*.json` file directly inside `dir`, sorted by name.
pub fn discover_inputs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read input dir: {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("Failed to read entry in: {}", dir.display()))?
        .into_iter()
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p
                    .extension()
                    .is_some_and(|ext| ext == "txt" || ext == "json")
        })
        .collect();
    entries.sort();
    Ok(entries)
}

pub fn run_batch(inputs: &[PathBuf], config: &MendConfig) -> Vec<BatchEntry> {
    inputs
        .iter()
        .map(|path| {
            let file = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let text = match std::fs::read_to_string(path) {
                Ok(text) => text,
                Err(e) => return failed_entry(file, format!("Failed to read: {}", e)),
            };
            match mend_text(&text, config) {
                Ok(report) => BatchEntry {
                    file,
                    outcome: Some(report.run.outcome),
                    recovery: Some(report.recovery),
                    fixes: report.run.changelog.len(),
                    residual_errors: report.run.residual_errors.len(),
                    residual_warnings: report.run.residual_warnings.len(),
                    error: None,
                },
                Err(e) => failed_entry(file, e.to_string()),
            }
        })
        .collect()
}

fn failed_entry(file: String, error: String) -> BatchEntry {
    BatchEntry {
        file,
        outcome: None,
        recovery: None,
        fixes: 0,
        residual_errors: 0,
        residual_warnings: 0,
        error: Some(error),
    }
}

pub fn scorecard_line(entry: &BatchEntry) -> String {
    let status = match entry.outcome {
        Some(Outcome::Success) => "ok",
        Some(Outcome::Failure) => "FAILED",
        None => "ERROR",
    };
    let degraded = if entry.recovery == Some(Recovery::TruncationRepaired) {
        "  (truncated)"
    } else {
        ""
    };
    format!(
        "  {:<30} {:<6}  fixes: {}  errors: {}  warnings: {}{}",
        entry.file, status, entry.fixes, entry.residual_errors, entry.residual_warnings, degraded
    )
}

/// First 8 hex digits of the SHA-256 of the effective config, so summaries
/// produced under different settings can be told apart.
pub fn config_hash(config: &MendConfig) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_string(config)?.as_bytes());
    Ok(format!("{:x}", hasher.finalize())[..8].to_string())
}

/// Write a timestamped JSON summary into `results_dir` and return its path.
pub fn write_summary(
    results_dir: &Path,
    config: &MendConfig,
    entries: &[BatchEntry],
) -> Result<PathBuf> {
    std::fs::create_dir_all(results_dir)
        .with_context(|| format!("Failed to create results dir: {}", results_dir.display()))?;

    let now = chrono::Utc::now();
    let passed = entries.iter().filter(|e| e.passed()).count();
    let pass_rate = if entries.is_empty() {
        0
    } else {
        (passed as f64 * 100.0 / entries.len() as f64).round() as u32
    };

    let summary = serde_json::json!({
        "timestamp": now.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        "max_iterations": config.repair.max_iterations,
        "config_hash": config_hash(config)?,
        "files": entries,
        "overall": {
            "total": entries.len(),
            "passed": passed,
            "pass_rate": format!("{pass_rate}%"),
        }
    });

    let path = results_dir.join(format!("flowmend_{}.json", now.format("%Y-%m-%d_%H-%M-%S")));
    std::fs::write(&path, serde_json::to_string_pretty(&summary)?)
        .with_context(|| format!("Failed to write summary: {}", path.display()))?;
    Ok(path)
}
