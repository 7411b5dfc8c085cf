//! Error types for device probing, session management and output parsing.
//!
//! A probe either fully succeeds or fails with one of these errors; the
//! crate never emits partial results.

use thiserror::Error;

/// Errors that can occur while probing a device.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The transport could not be established, or failed twice in a row.
    ///
    /// A single mid-session transport failure is recovered locally by one
    /// reconnect attempt and never surfaces as this error.
    #[error("connection failure: {0}")]
    Connection(String),

    /// A template definition could not be compiled.
    ///
    /// Raised for invalid regexes, references to undeclared values,
    /// transitions to undeclared states, or a missing `Start` state.
    #[error("invalid template: {0}")]
    Template(String),

    /// An `Error` rule matched during parsing, or an expected record was
    /// never produced. Carries the offending line and its number for
    /// diagnostics.
    #[error("parse error at line {line_no}: {line:?}")]
    Grammar { line_no: usize, line: String },

    /// Device output failed validation while building a domain record.
    #[error("validation failure: {0}")]
    Validation(String),

    /// The device violated a structural assumption this crate relies on.
    #[error("device assumption violated: {0}")]
    Assumption(String),

    /// Command execution exceeded its timeout. Contains the partial output
    /// received before the deadline.
    #[error("command timed out, partial output: {0:?}")]
    Timeout(String),

    /// The shell channel closed while waiting for output.
    #[error("channel closed while waiting for device output")]
    ChannelClosed,

    /// An error occurred in the async-ssh2-tokio library.
    #[error("ssh error: {0}")]
    Ssh(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    Russh(#[from] russh::Error),

    /// An HTTP request to the device API failed.
    #[error("api request error: {0}")]
    Http(#[from] reqwest::Error),

    /// The device API returned markup that could not be parsed.
    #[error("api markup error: {0}")]
    Xml(#[from] roxmltree::Error),
}

impl ProbeError {
    /// Helper for the common "abort rule fired on this line" case.
    pub(crate) fn at_line(line_no: usize, line: &str) -> Self {
        ProbeError::Grammar {
            line_no,
            line: line.to_string(),
        }
    }
}
