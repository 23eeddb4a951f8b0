//! Error taxonomy for the info and download flows.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by a [`crate::engine::MediaEngine`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine binary could not be started at all.
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
    /// The engine ran but exited unsuccessfully.
    #[error("{program} exited with {status}: {detail}")]
    Exit {
        program: String,
        status: String,
        detail: String,
    },
    /// The engine's metadata dump was not a JSON document.
    #[error("could not parse engine output: {0}")]
    Parse(#[from] serde_json::Error),
    /// The blocking task running the engine panicked or was cancelled.
    #[error("engine task aborted: {0}")]
    Join(String),
}

/// Errors surfaced by the info and download flows.
///
/// The first two are the caller's problem (bad URL, stale format id), the
/// rest are ours.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{0}")]
    ExtractionFailed(#[source] EngineError),
    #[error("requested format {format_id} is not available for this video")]
    FormatNotFound { format_id: String },
    #[error("{0}")]
    DownloadFailed(#[source] EngineError),
    #[error("download failed, output file not found for run {run_id}")]
    ArtifactMissing { run_id: String },
    /// The background task running a download ended without a result,
    /// e.g. because the runtime is shutting down.
    #[error("download task for {url} ended before producing a result")]
    Interrupted { url: String },
    #[error("{operation} failed for {}: {source}", path.display())]
    Storage {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FetchError {
    /// True when the failure stems from the request itself rather than from
    /// the service or the engine's download step.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::ExtractionFailed(_) | Self::FormatNotFound { .. })
    }

    pub(crate) fn storage(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: io::Error,
    ) -> Self {
        Self::Storage {
            operation,
            path: path.into(),
            source,
        }
    }
}

pub type FetchResult<T> = Result<T, FetchError>;
