//! Per-run output files
//!
//! Layout under the log directory:
//!
//! ```text
//! <log_dir>/tested_pkgs
//! <log_dir>/<timestamp>/results.log
//! <log_dir>/<timestamp>/<package>/<attempt>/adb_logcat_<serial>.log
//! <log_dir>/<timestamp>/<package>/<attempt>/uis_traversed_<serial>.log
//! <log_dir>/<timestamp>/<package>/<attempt>/ui_graph_<serial>.dot
//! <log_dir>/<timestamp>/<package>/<attempt>/ui_graph_<serial>.pdf
//! ```
//!
//! Appends to shared files are serialized in-process by a mutex and across
//! processes by an exclusive `fs2` lock.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use fs2::FileExt;
use tokio::process::Command;

use droidwalk_core::diagram;
use droidwalk_core::prelude::*;
use droidwalk_core::{ExplorationGraph, RunRecord};

const RESULTS_FILENAME: &str = "results.log";

#[derive(Debug)]
pub struct ArtifactStore {
    run_dir: PathBuf,
    tested_pkgs: PathBuf,
    /// `dot` binary for PDF output; DOT source is always written
    dot: Option<PathBuf>,
    render_diagrams: bool,
    append_lock: Mutex<()>,
}

impl ArtifactStore {
    /// Create `<log_dir>/<timestamp>/` and make sure the tested ledger exists
    pub fn create(
        log_dir: &Path,
        tested_pkgs: PathBuf,
        dot: Option<PathBuf>,
        render_diagrams: bool,
    ) -> Result<Self> {
        let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S%.3f").to_string();
        let run_dir = log_dir.join(stamp);
        fs::create_dir_all(&run_dir)?;

        if let Some(parent) = tested_pkgs.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&tested_pkgs)?;

        info!("Writing results to {}", run_dir.display());

        Ok(Self {
            run_dir,
            tested_pkgs,
            dot,
            render_diagrams,
            append_lock: Mutex::new(()),
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn results_path(&self) -> PathBuf {
        self.run_dir.join(RESULTS_FILENAME)
    }

    pub fn attempt_dir(&self, package: &str, attempt: u32) -> PathBuf {
        self.run_dir.join(package).join(attempt.to_string())
    }

    /// Append one line to a shared file
    fn append_line(&self, path: &Path, line: &str) -> Result<()> {
        let _guard = self.append_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.lock_exclusive()?;
        file.write_all(format!("{}\n", line).as_bytes())?;
        file.flush()?;
        // Lock is released when the file is dropped
        Ok(())
    }

    /// Append the record's line to `results.log`
    pub fn append_result(&self, record: &RunRecord) -> Result<()> {
        let line = record.ledger_line();
        self.append_line(&self.results_path(), &line)?;
        info!("{}", line);
        Ok(())
    }

    /// Append a package to the tested ledger
    pub fn mark_tested(&self, package: &str) -> Result<()> {
        self.append_line(&self.tested_pkgs, package)
    }

    /// Write log capture, traversal list and graph diagram of one attempt
    pub async fn write_attempt(&self, record: &RunRecord, graph: &ExplorationGraph) -> Result<()> {
        let dir = self.attempt_dir(&record.package, record.attempt);
        fs::create_dir_all(&dir)?;

        fs::write(
            dir.join(format!("adb_logcat_{}.log", record.serial)),
            &record.log_text,
        )?;

        let mut traversed = record.visited.join("\n");
        if !traversed.is_empty() {
            traversed.push('\n');
        }
        fs::write(
            dir.join(format!("uis_traversed_{}.log", record.serial)),
            traversed,
        )?;

        if self.render_diagrams {
            let dot_path = dir.join(format!("ui_graph_{}.dot", record.serial));
            fs::write(&dot_path, diagram::to_dot(graph))?;
            if let Some(dot) = &self.dot {
                let pdf_path = dot_path.with_extension("pdf");
                render_pdf(dot, &dot_path, &pdf_path).await;
            }
        }

        Ok(())
    }
}

/// `dot -Tpdf`; failures only cost the PDF
async fn render_pdf(dot: &Path, source: &Path, target: &Path) {
    let result = Command::new(dot)
        .arg("-Tpdf")
        .arg(source)
        .arg("-o")
        .arg(target)
        .output()
        .await;

    match result {
        Ok(output) if output.status.success() => {
            trace!("Rendered {}", target.display());
        }
        Ok(output) => warn!(
            "dot failed for {}: {}",
            source.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        ),
        Err(e) => warn!("Failed to run dot: {}", e),
    }
}
