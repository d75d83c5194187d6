// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{io, path::PathBuf, time::Duration};

use snafu::{Location, Snafu};

/// Queue operation errors.
///
/// An empty queue is never reported through this type: stores answer
/// `Ok(None)` for a soft miss.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum QueueError {
    /// Filesystem I/O failure.
    #[snafu(display("IO error on {}", path.display()))]
    Io {
        path:   PathBuf,
        source: io::Error,
        #[snafu(implicit)]
        loc:    Location,
    },

    /// The encoding layer refused to serialize a message.
    #[snafu(display("Failed to encode message as {encoding}: {reason}"))]
    Encode {
        encoding: &'static str,
        reason:   String,
    },

    /// A present record could not be deserialized.
    #[snafu(display("Failed to decode {encoding} record: {reason}"))]
    Decode {
        encoding: &'static str,
        reason:   String,
    },

    /// A log record is truncated or fails its checksum.
    #[snafu(display("Corrupted record in {} at offset {offset}: {reason}", path.display()))]
    CorruptedRecord {
        path:   PathBuf,
        offset: u64,
        reason: String,
    },

    /// Rejected by [`QueueBuilder::build`](crate::QueueBuilder::build).
    #[snafu(display("Invalid configuration: {reason}"))]
    InvalidConfig { reason: String },

    /// The gate thread could not be started.
    #[snafu(display("Failed to spawn gate thread"))]
    GateSpawn { source: io::Error },

    /// The gate is no longer accepting or answering requests.
    #[snafu(display("Queue gate has stopped"))]
    GateStopped,

    /// A bounded wait on the gate expired.
    #[snafu(display("Timed out after {elapsed:?}"))]
    Timeout { elapsed: Duration },

    /// An earlier fatal error made the store unsafe to touch.
    #[snafu(display("Queue is poisoned by an earlier fatal error: {reason}"))]
    Poisoned { reason: String },

    #[snafu(display("Internal error: {message}"))]
    Internal { message: String },
}

impl QueueError {
    /// Returns true for errors that mean the on-disk state cannot be trusted.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Decode { .. } | Self::CorruptedRecord { .. } | Self::Poisoned { .. }
        )
    }
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
