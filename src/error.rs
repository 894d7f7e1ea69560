//! Error taxonomy for trace conversion and analysis
//!
//! Recoverable conditions (malformed rows, unmatched End markers, spans still
//! open at end of stream) are logged and resolved locally by the adapters;
//! they never surface as `Err`. Only the fatal classes below abort a run:
//! continuing past them would silently misinterpret an unknown schema.

use std::io;

use thiserror::Error;

/// Fatal conditions that stop a conversion or analysis pass.
#[derive(Debug, Error)]
pub enum TraceError {
    /// Event-log row with an event name outside the supported set.
    #[error("unknown event name '{event}' at '{line}'")]
    UnknownEvent { event: String, line: String },

    /// Trace document that is neither an event array nor a `traceEvents` object.
    #[error("trace document must be an event array or a traceEvents object")]
    MalformedDocument,

    #[error(transparent)]
    Io(#[from] io::Error),

    /// Covers unrecognized `ph` values as well: the phase alphabet is closed,
    /// so an unknown phase fails document deserialization.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, TraceError>;
