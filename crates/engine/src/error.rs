// Heapscope - Heap Origin Tracer
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Error types of the heapscope engine.
//!
//! Protocol and snapshot failures have their own enums so that transports and the decoder
//! can be used on their own; [`HeapscopeError`] wraps both for the higher layers.

use thiserror::Error;

/// Errors raised while talking to the debuggee.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The debuggee answered a command with an error response
    #[error("{method} failed with code {code}: {message}")]
    Command {
        /// Method of the failed command
        method: String,
        /// Protocol error code
        code: i64,
        /// Error message reported by the debuggee
        message: String,
    },

    /// The connection to the debuggee is gone
    #[error("transport disconnected")]
    Disconnected,

    /// The underlying transport failed (socket, HTTP, ...)
    #[error("transport failure: {0}")]
    Transport(String),

    /// A frame could not be understood
    #[error("malformed protocol frame: {0}")]
    MalformedFrame(String),

    /// A command succeeded but its result lacks an expected field
    #[error("unexpected response to {method}: missing `{field}`")]
    UnexpectedResponse {
        /// Method of the command
        method: String,
        /// Name of the missing field
        field: &'static str,
    },
}

/// Errors raised while decoding a heap snapshot.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// A required field is absent from the snapshot metadata
    #[error("snapshot metadata lacks field `{0}`")]
    MissingField(&'static str),

    /// The flat arrays do not match the declared layout
    #[error("malformed snapshot layout: {0}")]
    Layout(String),

    /// An index stored in the snapshot points outside its table
    #[error("{table} index {index} out of range (len {len})")]
    IndexOutOfRange {
        /// Table the index refers to
        table: &'static str,
        /// The offending index
        index: u64,
        /// Length of the table
        len: usize,
    },

    /// The snapshot text is not valid JSON of the expected shape
    #[error("failed to parse snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The snapshot file could not be read
    #[error("failed to read snapshot: {0}")]
    Io(#[from] std::io::Error),
}

/// Top level error of the engine.
#[derive(Debug, Error)]
pub enum HeapscopeError {
    /// Error talking to the debuggee
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Error decoding a heap snapshot
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Operation not allowed in the current configuration or state
    #[error("configuration error: {0}")]
    Config(String),

    /// A BDHS run exhausted its pause budget
    #[error("step budget exceeded at step {step} (max {max_steps})")]
    StepBudgetExceeded {
        /// Step at which the budget was exceeded
        step: usize,
        /// Configured budget
        max_steps: usize,
    },

    /// A pause handler failed while a BDHS run was active
    #[error("pause handler failed: {0}")]
    HandlerFault(String),

    /// The similarity reference or its parameters are invalid
    #[error("invalid similarity criterion: {0}")]
    SimilaritySpec(String),

    /// A regular expression in a search criterion does not compile
    #[error("invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        /// The pattern as given
        pattern: String,
        /// Compilation error
        #[source]
        source: regex::Error,
    },
}

impl HeapscopeError {
    /// Shorthand for [`HeapscopeError::Config`].
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Result alias used throughout the engine.
pub type Result<T, E = HeapscopeError> = std::result::Result<T, E>;
