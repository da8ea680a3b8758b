//! Python subprocess plot runner.
//!
//! Executes generated matplotlib scripts under the configured interpreter.
//! The `SAVE_PATH` contract keeps path choice on this side of the fence:
//! the script refers to a bare `SAVE_PATH` name, and the runner substitutes
//! a fresh path under its output directory before spawning. Error texts out
//! of this module end up verbatim in the retry prompt, so they describe
//! what the script got wrong, not what the runner was doing.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use uuid::Uuid;

use worklens_core::plot::{PlotArtifact, PlotRunner};
use worklens_types::config::PlotConfig;
use worklens_types::error::PlotError;

/// Placeholder name generated scripts must pass to `plt.savefig`.
const SAVE_PATH_MARKER: &str = "SAVE_PATH";

/// Renders plot scripts by spawning the configured Python interpreter.
#[derive(Debug, Clone)]
pub struct PythonPlotRunner {
    python_bin: String,
    output_dir: PathBuf,
    timeout: Duration,
}

impl PythonPlotRunner {
    pub fn new(
        python_bin: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            python_bin: python_bin.into(),
            output_dir: output_dir.into(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Build a runner from the `[plot]` config section and a resolved
    /// output directory.
    pub fn from_config(config: &PlotConfig, output_dir: PathBuf) -> Self {
        Self::new(config.python_bin.clone(), output_dir, config.timeout_secs)
    }

    /// Validate the `SAVE_PATH` contract and substitute the real output path.
    fn prepare_script(code: &str, save_path: &str) -> Result<String, PlotError> {
        if !code.contains(SAVE_PATH_MARKER) {
            return Err(PlotError::InvalidScript(
                "LLM code did not contain SAVE_PATH placeholder".to_string(),
            ));
        }
        if !code.contains("plt.savefig(SAVE_PATH)") {
            return Err(PlotError::InvalidScript(
                "SAVE_PATH found, but not used with plt.savefig(...)".to_string(),
            ));
        }

        // Models sometimes assign their own path to the placeholder despite
        // the prompt; drop any such assignment before substituting.
        let code = strip_save_path_assignment(code);
        Ok(code.replace(SAVE_PATH_MARKER, &format!("r'{save_path}'")))
    }
}

impl PlotRunner for PythonPlotRunner {
    async fn render(&self, code: &str) -> Result<PlotArtifact, PlotError> {
        let filename = format!("{}.png", Uuid::now_v7().simple());
        let save_path = self.output_dir.join(filename);
        let save_path_str = save_path.display().to_string();

        let script = Self::prepare_script(code, &save_path_str)?;

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| PlotError::Execution(format!("cannot create plot directory: {e}")))?;

        let child = tokio::process::Command::new(&self.python_bin)
            .arg("-c")
            .arg(&script)
            // Headless rendering regardless of what the script imports.
            .env("MPLBACKEND", "Agg")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PlotError::Execution(format!("cannot spawn {}: {e}", self.python_bin)))?;

        // kill_on_drop reaps the child when the timeout drops the wait future.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| PlotError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| PlotError::Execution(format!("cannot wait for interpreter: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.trim();
            if detail.is_empty() {
                return Err(PlotError::Execution(format!(
                    "interpreter exited with {}",
                    output.status
                )));
            }
            return Err(PlotError::Execution(detail.to_string()));
        }

        let bytes = tokio::fs::read(&save_path)
            .await
            .map_err(|_| PlotError::ArtifactMissing(save_path_str.clone()))?;

        Ok(PlotArtifact {
            path: save_path_str,
            data_uri: format!("data:image/png;base64,{}", STANDARD.encode(&bytes)),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Remove `SAVE_PATH = '...'` (or `"..."`) assignments while leaving every
/// other use of the marker alone.
///
/// A byte scanner rather than a regex: the pattern is anchored to the marker
/// and never crosses a line, so a full regex engine buys nothing here.
fn strip_save_path_assignment(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut rest = code;

    while let Some(pos) = rest.find(SAVE_PATH_MARKER) {
        let (head, tail) = rest.split_at(pos);
        out.push_str(head);
        let after = &tail[SAVE_PATH_MARKER.len()..];

        match quoted_assignment_len(after) {
            Some(len) => {
                rest = &after[len..];
            }
            None => {
                out.push_str(SAVE_PATH_MARKER);
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Length of a ` = '...'` span following the marker, or `None` when the
/// marker is not the target of a quoted assignment. Every compared byte is
/// ASCII, so the returned length always lands on a char boundary.
fn quoted_assignment_len(after: &str) -> Option<usize> {
    let bytes = after.as_bytes();
    let mut i = 0;

    while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
        i += 1;
    }
    if i >= bytes.len() || bytes[i] != b'=' {
        return None;
    }
    // `==` is a comparison, not an assignment.
    if bytes.get(i + 1) == Some(&b'=') {
        return None;
    }
    i += 1;
    while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
        i += 1;
    }
    let quote = match bytes.get(i) {
        Some(&b'\'') => b'\'',
        Some(&b'"') => b'"',
        _ => return None,
    };
    i += 1;
    while i < bytes.len() && bytes[i] != quote {
        if bytes[i] == b'\n' {
            return None;
        }
        i += 1;
    }
    if i >= bytes.len() {
        return None;
    }
    Some(i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(dir: &std::path::Path, timeout_secs: u64) -> PythonPlotRunner {
        PythonPlotRunner::new("python3", dir, timeout_secs)
    }

    #[test]
    fn test_prepare_rejects_script_without_marker() {
        let err = PythonPlotRunner::prepare_script("plt.plot([1, 2])", "/tmp/x.png").unwrap_err();
        match err {
            PlotError::InvalidScript(msg) => {
                assert_eq!(msg, "LLM code did not contain SAVE_PATH placeholder");
            }
            other => panic!("expected InvalidScript, got {other:?}"),
        }
    }

    #[test]
    fn test_prepare_rejects_marker_outside_savefig() {
        let code = "out = SAVE_PATH\nplt.plot([1, 2])";
        let err = PythonPlotRunner::prepare_script(code, "/tmp/x.png").unwrap_err();
        match err {
            PlotError::InvalidScript(msg) => {
                assert_eq!(msg, "SAVE_PATH found, but not used with plt.savefig(...)");
            }
            other => panic!("expected InvalidScript, got {other:?}"),
        }
    }

    #[test]
    fn test_prepare_substitutes_raw_string_path() {
        let script =
            PythonPlotRunner::prepare_script("plt.savefig(SAVE_PATH)", "/tmp/plots/a.png")
                .unwrap();
        assert_eq!(script, "plt.savefig(r'/tmp/plots/a.png')");
    }

    #[test]
    fn test_prepare_drops_placeholder_reassignment() {
        let code = "SAVE_PATH = 'mine.png'\nplt.savefig(SAVE_PATH)";
        let script = PythonPlotRunner::prepare_script(code, "/tmp/plots/a.png").unwrap();
        assert!(!script.contains("mine.png"));
        assert!(script.contains("plt.savefig(r'/tmp/plots/a.png')"));
    }

    #[test]
    fn test_strip_assignment_handles_both_quote_styles() {
        assert_eq!(
            strip_save_path_assignment("SAVE_PATH = 'a.png'\nx = 1"),
            "\nx = 1"
        );
        assert_eq!(
            strip_save_path_assignment("SAVE_PATH = \"a.png\"\nx = 1"),
            "\nx = 1"
        );
    }

    #[test]
    fn test_strip_assignment_leaves_comparisons_and_uses() {
        let code = "if path == SAVE_PATH:\n    plt.savefig(SAVE_PATH)";
        assert_eq!(strip_save_path_assignment(code), code);

        let comparison = "SAVE_PATH == 'a.png'";
        assert_eq!(strip_save_path_assignment(comparison), comparison);
    }

    #[test]
    fn test_strip_assignment_ignores_unterminated_quote() {
        let code = "SAVE_PATH = 'a.png\nplt.savefig(SAVE_PATH)";
        assert_eq!(strip_save_path_assignment(code), code);
    }

    #[tokio::test]
    async fn test_render_writes_png_and_data_uri() {
        let dir = tempfile::tempdir().unwrap();

        // A stand-in `plt` so the test does not depend on matplotlib.
        let code = "\
class _Plt:
    def savefig(self, path):
        with open(path, \"wb\") as f:
            f.write(b\"\\x89PNG\\r\\n\")
plt = _Plt()
plt.savefig(SAVE_PATH)
";

        let artifact = runner(dir.path(), 30).render(code).await.unwrap();
        assert!(artifact.path.ends_with(".png"));
        assert!(artifact.data_uri.starts_with("data:image/png;base64,"));
        assert!(std::path::Path::new(&artifact.path).exists());
    }

    #[tokio::test]
    async fn test_render_surfaces_script_errors() {
        let dir = tempfile::tempdir().unwrap();

        let code = "raise RuntimeError('no data to chart')\nplt.savefig(SAVE_PATH)";
        let err = runner(dir.path(), 30).render(code).await.unwrap_err();
        match err {
            PlotError::Execution(detail) => assert!(detail.contains("no data to chart")),
            other => panic!("expected Execution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_render_reports_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();

        // savefig that never writes anything.
        let code = "\
class _Plt:
    def savefig(self, path):
        pass
plt = _Plt()
plt.savefig(SAVE_PATH)
";

        let err = runner(dir.path(), 30).render(code).await.unwrap_err();
        assert!(matches!(err, PlotError::ArtifactMissing(_)));
    }

    #[tokio::test]
    async fn test_render_times_out() {
        let dir = tempfile::tempdir().unwrap();

        let code = "import time\ntime.sleep(10)\nplt.savefig(SAVE_PATH)";
        let err = runner(dir.path(), 1).render(code).await.unwrap_err();
        assert!(matches!(err, PlotError::Timeout(1)));
    }
}
