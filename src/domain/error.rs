// ============================================================
// Layer 3 — Error Kinds
// ============================================================
// Configuration mistakes and data faults get distinct variants so
// callers can tell "bad flag" from "damaged file". Everything else
// travels as anyhow::Error in the upper layers.

use thiserror::Error;

/// Faults while reading or writing a length-prefixed record stream.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended inside a record (partial length prefix or payload).
    #[error("record truncated at byte {offset}: expected {expected} bytes, found {found}")]
    Truncated {
        offset:   u64,
        expected: usize,
        found:    usize,
    },

    /// The record payload could not be decoded.
    #[error("malformed record at byte {offset}: {reason}")]
    Malformed { offset: u64, reason: String },
}

/// Faults while reconstructing per-sentence samples.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("length mode must be either 'max' or 'exact', got '{0}'")]
    InvalidMode(String),

    #[error("activation streams out of step at batch {batch}: {detail}")]
    StreamsOutOfStep { batch: usize, detail: String },

    #[error("sentence {sentence} of batch {batch} has true length {length} but is padded to {padded}")]
    LengthExceedsPadding {
        batch:    usize,
        sentence: usize,
        length:   usize,
        padded:   usize,
    },

    #[error("unexpected tensor shape: {0}")]
    ShapeMismatch(String),

    #[error(transparent)]
    Record(#[from] RecordError),
}
