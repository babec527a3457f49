//! On-disk evidence storage for test runs.
//!
//! Every run gets its own directory under the configured base directory.
//! Screenshots are written as they are captured; the final report is written
//! as both JSON and Markdown when the run terminates.
//!
//! Layout:
//!
//! ```text
//! {base_dir}/{run_id}/
//!     step_3_before_attempt_0.png
//!     step_3_after_attempt_0.png
//!     step_3_failure_attempt_1.png
//!     report.json
//!     report.md
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::config;
use crate::report::ExecutionReport;

/// Result type for evidence operations
pub type EvidenceResult<T> = Result<T, EvidenceError>;

/// Errors from evidence storage
#[derive(Debug)]
pub enum EvidenceError {
    /// Filesystem error
    Io(std::io::Error),

    /// Report serialization failed
    Serialize(serde_json::Error),
}

impl std::fmt::Display for EvidenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvidenceError::Io(e) => write!(f, "Evidence I/O error: {}", e),
            EvidenceError::Serialize(e) => write!(f, "Report serialization error: {}", e),
        }
    }
}

impl std::error::Error for EvidenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EvidenceError::Io(e) => Some(e),
            EvidenceError::Serialize(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for EvidenceError {
    fn from(e: std::io::Error) -> Self {
        EvidenceError::Io(e)
    }
}

impl From<serde_json::Error> for EvidenceError {
    fn from(e: serde_json::Error) -> Self {
        EvidenceError::Serialize(e)
    }
}

/// Capture phase a screenshot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    /// Before the action was performed
    Before,
    /// After the action was performed
    After,
    /// At the attempt that failed
    Failure,
}

impl CapturePhase {
    fn as_str(&self) -> &'static str {
        match self {
            CapturePhase::Before => "before",
            CapturePhase::After => "after",
            CapturePhase::Failure => "failure",
        }
    }
}

/// Sanitize a run id into a safe directory name.
///
/// Replaces anything outside `[A-Za-z0-9._-]` with underscores.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "run".to_string()
    } else {
        cleaned
    }
}

/// Per-run evidence directory.
#[derive(Debug, Clone)]
pub struct EvidenceStore {
    dir: PathBuf,
}

impl EvidenceStore {
    /// Create the evidence directory for a run under the configured base.
    pub fn create(run_id: &str) -> EvidenceResult<Self> {
        Self::create_in(Path::new(&config::evidence_base_dir()), run_id)
    }

    /// Create the evidence directory for a run under an explicit base.
    pub fn create_in(base: &Path, run_id: &str) -> EvidenceResult<Self> {
        let dir = base.join(sanitize_name(run_id));
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Path of this run's evidence directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a screenshot for a step attempt, returning its path.
    pub fn save_screenshot(
        &self,
        step_id: u32,
        phase: CapturePhase,
        attempt: u32,
        png: &[u8],
    ) -> EvidenceResult<PathBuf> {
        let path = self.dir.join(format!(
            "step_{}_{}_attempt_{}.png",
            step_id,
            phase.as_str(),
            attempt
        ));
        fs::write(&path, png)?;
        Ok(path)
    }

    /// Write the final report as `report.json` and `report.md`.
    pub fn save_report(&self, report: &ExecutionReport) -> EvidenceResult<PathBuf> {
        let json_path = self.dir.join("report.json");
        let json = serde_json::to_string_pretty(report)?;
        fs::write(&json_path, json)?;
        fs::write(self.dir.join("report.md"), report.render_markdown())?;
        Ok(json_path)
    }

    /// All screenshots saved for a step, sorted by file name.
    pub fn screenshots_for_step(&self, step_id: u32) -> EvidenceResult<Vec<PathBuf>> {
        let prefix = format!("step_{}_", step_id);
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };
            if name.starts_with(&prefix) && name.ends_with(".png") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Delete this run's evidence directory.
    pub fn remove(self) -> EvidenceResult<()> {
        fs::remove_dir_all(&self.dir)?;
        Ok(())
    }
}

/// Delete the oldest run directories under `base`, keeping at most `keep`.
///
/// Age is judged by directory modification time. Non-directories are left
/// alone.
pub fn cleanup_old_runs(base: &Path, keep: usize) -> EvidenceResult<usize> {
    let entries = match fs::read_dir(base) {
        Ok(entries) => entries,
        // Nothing stored yet.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut dirs: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        dirs.push((modified, path));
    }

    if dirs.len() <= keep {
        return Ok(0);
    }

    dirs.sort_by_key(|(modified, _)| *modified);
    let excess = dirs.len() - keep;
    let mut removed = 0;
    for (_, path) in dirs.into_iter().take(excess) {
        fs::remove_dir_all(&path)?;
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{ExecutionState, RunStatus};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("run-2024.01_a"), "run-2024.01_a");
        assert_eq!(sanitize_name("run/../../etc"), "run_.._.._etc");
        assert_eq!(sanitize_name(""), "run");
    }

    #[test]
    fn test_screenshot_paths_and_retrieval() {
        let base = TempDir::new().unwrap();
        let store = EvidenceStore::create_in(base.path(), "run-1").unwrap();

        store.save_screenshot(3, CapturePhase::Before, 0, b"png0").unwrap();
        store.save_screenshot(3, CapturePhase::After, 0, b"png1").unwrap();
        store.save_screenshot(12, CapturePhase::After, 0, b"png2").unwrap();

        let shots = store.screenshots_for_step(3).unwrap();
        assert_eq!(shots.len(), 2);
        assert!(shots[0].ends_with("step_3_after_attempt_0.png"));
        assert!(shots[1].ends_with("step_3_before_attempt_0.png"));

        // Prefix matching must not confuse step 1 with step 12.
        assert!(store.screenshots_for_step(1).unwrap().is_empty());
    }

    #[test]
    fn test_save_report_writes_json_and_markdown() {
        let base = TempDir::new().unwrap();
        let store = EvidenceStore::create_in(base.path(), "run-1").unwrap();

        let state = ExecutionState::new("run-1", [1]);
        let report =
            ExecutionReport::from_state("tc-1", &state, RunStatus::Completed, 7, None);
        let json_path = store.save_report(&report).unwrap();

        assert!(json_path.exists());
        assert!(store.dir().join("report.md").exists());
        let json = std::fs::read_to_string(json_path).unwrap();
        assert!(json.contains("\"run_id\": \"run-1\""));
    }

    #[test]
    fn test_cleanup_keeps_newest() {
        let base = TempDir::new().unwrap();
        for i in 0..4 {
            let store = EvidenceStore::create_in(base.path(), &format!("run-{}", i)).unwrap();
            store.save_screenshot(1, CapturePhase::After, 0, b"png").unwrap();
            // mtime granularity on some filesystems is one second; nudge
            // ordering with explicit times instead of sleeping.
            let t = std::time::SystemTime::UNIX_EPOCH
                + std::time::Duration::from_secs(1_700_000_000 + i);
            let f = std::fs::File::open(store.dir()).unwrap();
            f.set_modified(t).unwrap();
        }

        let removed = cleanup_old_runs(base.path(), 2).unwrap();
        assert_eq!(removed, 2);
        assert!(!base.path().join("run-0").exists());
        assert!(!base.path().join("run-1").exists());
        assert!(base.path().join("run-2").exists());
        assert!(base.path().join("run-3").exists());
    }

    #[test]
    fn test_cleanup_missing_base_is_noop() {
        let base = TempDir::new().unwrap();
        let missing = base.path().join("nope");
        assert_eq!(cleanup_old_runs(&missing, 3).unwrap(), 0);
    }
}
