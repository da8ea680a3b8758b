//! PlotRunner trait definition.
//!
//! Port for rendering a generated matplotlib script into a PNG. The runner
//! owns sandboxing concerns (fresh working directory, bounded runtime) and
//! the `SAVE_PATH` contract: scripts receive the output path through that
//! variable and must save the figure to it.

use worklens_types::error::PlotError;

/// A successfully rendered chart.
#[derive(Debug, Clone)]
pub struct PlotArtifact {
    /// Filesystem path of the PNG.
    pub path: String,
    /// The PNG as a `data:image/png;base64,...` URI for inline display.
    pub data_uri: String,
}

/// Port for executing generated plotting scripts.
///
/// Implementations live in worklens-infra (e.g., `PythonPlotRunner`).
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait PlotRunner: Send + Sync {
    /// Render `code` and return the produced artifact.
    ///
    /// Fails with [`PlotError::InvalidScript`] when the script ignores the
    /// `SAVE_PATH` contract, and with [`PlotError::Execution`] carrying the
    /// interpreter's stderr when the script crashes. The error text is what
    /// the regeneration stage feeds back to the model.
    fn render(
        &self,
        code: &str,
    ) -> impl std::future::Future<Output = Result<PlotArtifact, PlotError>> + Send;
}
