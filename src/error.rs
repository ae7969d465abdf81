// Crate-level error type.
//
// The delta pipeline is a one-shot batch operation: every error here is
// fatal and aborts the run. A partially written delta archive is invalid
// and cleanup is the caller's responsibility.

use std::io;

use thiserror::Error;

/// Errors surfaced by the delta pipeline.
#[derive(Debug, Error)]
pub enum DeltaError {
    /// Malformed or unreadable archive structure, during either the base
    /// index build or the delta pass.
    #[error("archive format error in {archive}: {source}")]
    Format {
        /// Which archive the malformed structure was found in.
        archive: &'static str,
        #[source]
        source: io::Error,
    },

    /// The external compressor process exited with a non-zero code. Any
    /// archive bytes already forwarded to it must be discarded.
    #[error("compressor command failed with exit code {code}: {command}")]
    Compression { command: String, code: i32 },

    /// Filesystem or pipe read/write failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DeltaError {
    pub(crate) fn format(archive: &'static str, source: io::Error) -> Self {
        Self::Format { archive, source }
    }
}
