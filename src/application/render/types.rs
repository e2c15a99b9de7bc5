use std::{io, path::PathBuf, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::task::JoinError;

use crate::cache::ImageSizeError;

/// Failures of a single converter invocation.
///
/// Cloneable so one outcome can be handed to every caller waiting on the same export.
#[derive(Debug, Clone, Error)]
pub enum ConvertError {
    #[error("{program}: failed to start converter: {source}")]
    Spawn {
        program: String,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("{program}: non-zero exit value {exit_code:?}: {diagnostics}")]
    ExitStatus {
        program: String,
        exit_code: Option<i32>,
        diagnostics: String,
    },
    #[error("{program}: conversion was not confirmed: {diagnostics}")]
    Unconfirmed {
        program: String,
        diagnostics: String,
    },
    #[error("{program}: no result after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
    #[error("failed to stage converter output {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
}

impl ConvertError {
    pub(crate) fn staging(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Staging {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Captured diagnostic output, when the converter produced any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            ConvertError::ExitStatus { diagnostics, .. }
            | ConvertError::Unconfirmed { diagnostics, .. } => Some(diagnostics.as_str()),
            _ => None,
        }
    }
}

/// Structured errors surfaced by the export pipeline.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("diagram source not found: {path}")]
    NotFound { path: String },
    #[error(transparent)]
    Conversion(#[from] ConvertError),
    #[error("diagram export interrupted: {reason}")]
    Interrupted { reason: String },
    #[error("cache i/o failed while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: Arc<io::Error>,
    },
    #[error(transparent)]
    ImageSize(#[from] ImageSizeError),
    #[error("requested dimension {dimension} at density {density} overflows")]
    SizeOverflow { dimension: u32, density: u32 },
}

impl RenderError {
    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub(crate) fn io(context: &'static str, source: io::Error) -> Self {
        Self::Io {
            context,
            source: Arc::new(source),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RenderError::NotFound { .. })
    }
}

impl From<JoinError> for RenderError {
    fn from(err: JoinError) -> Self {
        RenderError::Interrupted {
            reason: err.to_string(),
        }
    }
}
