//! Error taxonomy of the streaming engine.
//!
//! Transport errors are local to one target: the pipelines record them on
//! the failed chunk and keep going. Quorum and source errors abort the
//! whole meta-chunk operation.

use thiserror::Error;

use crate::content::ChunkInfo;

/// A timeout value in seconds.
///
/// Displays as `"1.0 second"` / `"2.5 seconds"`, which is the exact text
/// recorded on a failed chunk so the caller can tell a timeout from a
/// remote error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Seconds(pub f64);

impl std::fmt::Display for Seconds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let plural = if self.0 == 1.0 { "" } else { "s" };
        if self.0.fract() == 0.0 {
            write!(f, "{:.1} second{}", self.0, plural)
        } else {
            write!(f, "{} second{}", self.0, plural)
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid storage method: {0}")]
    InvalidStorageMethod(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("connect timeout: {0}")]
    ConnectTimeout(Seconds),

    #[error("chunk write timeout: {0}")]
    ChunkWriteTimeout(Seconds),

    #[error("chunk read timeout: {0}")]
    ChunkReadTimeout(Seconds),

    #[error("source read timeout: {0}")]
    SourceReadTimeout(Seconds),

    #[error("target returned HTTP {status}")]
    TargetHttpError { status: u16 },

    #[error("target unreachable: {reason}")]
    TargetUnreachable { reason: String },

    /// Not enough live writers to keep a meta-chunk write going. Carries
    /// the per-chunk outcome so an external reconciler can clean up the
    /// partial write.
    #[error("write quorum not reached ({successes}/{required})")]
    WriteQuorum {
        successes: usize,
        required: usize,
        chunks: Vec<ChunkInfo>,
    },

    #[error("read quorum not reached")]
    ReadQuorum,

    #[error("source read error: {0}")]
    SourceReadError(String),

    #[error("unrecoverable read: {0}")]
    UnrecoverableRead(String),

    #[error("range not satisfiable")]
    RangeNotSatisfiable,

    #[error("not enough valid sources to read ({found}/{required})")]
    NotEnoughSources { found: usize, required: usize },

    #[error("erasure codec error: {0}")]
    Codec(String),
}

impl StoreError {
    /// The message recorded on a failed chunk.
    ///
    /// Timeouts record the bare timeout value, remote failures record
    /// `HTTP <status>`, everything else records its display text.
    pub fn target_message(&self) -> String {
        match self {
            StoreError::ConnectTimeout(s)
            | StoreError::ChunkWriteTimeout(s)
            | StoreError::ChunkReadTimeout(s) => s.to_string(),
            StoreError::TargetHttpError { status } => format!("HTTP {}", status),
            StoreError::TargetUnreachable { reason } => reason.clone(),
            other => other.to_string(),
        }
    }
}
