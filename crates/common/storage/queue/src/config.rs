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

use std::{path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

use crate::{EncodingKind, Result, error::InvalidConfigSnafu};

/// Name used when the caller does not pick one.
pub const DEFAULT_QUEUE_NAME: &str = "default";

/// Width guard for directory-store file names: ten decimal digits.
pub const DEFAULT_REINDEX_THRESHOLD: u64 = 2_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SmartDefault)]
#[serde(default)]
pub struct QueueConfig {
    /// Parent directory of the store's files.
    #[default(_code = "PathBuf::from(\"./queue_data\")")]
    pub base_path:         PathBuf,
    #[default(_code = "DEFAULT_QUEUE_NAME.to_string()")]
    pub name:              String,
    pub store:             StoreKind,
    pub encoding:          EncodingKind,
    pub flush_mode:        FlushMode,
    /// Scan the whole log on open and drop a torn trailing record. Turning
    /// this off leaves a tail torn by a crash in place: later appends land
    /// behind it and the queue poisons once the head reaches it.
    #[default = true]
    pub verify_on_startup: bool,
    #[default(_code = "DEFAULT_REINDEX_THRESHOLD")]
    pub reindex_threshold: u64,
    /// Pause between read attempts while a consumer waits on an empty queue.
    #[default(_code = "Duration::from_millis(1)")]
    #[serde(with = "humantime_serde")]
    pub poll_interval:     Duration,
    /// Bound on each request channel; `0` means unbounded.
    pub request_capacity:  usize,
}

impl QueueConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        snafu::ensure!(
            !self.name.is_empty(),
            InvalidConfigSnafu {
                reason: "queue name must not be empty",
            }
        );
        snafu::ensure!(
            !self.name.contains(['/', '\\']) && self.name != "." && self.name != "..",
            InvalidConfigSnafu {
                reason: format!("queue name '{}' must be a single path component", self.name),
            }
        );
        snafu::ensure!(
            self.reindex_threshold > 1 && self.reindex_threshold <= DEFAULT_REINDEX_THRESHOLD,
            InvalidConfigSnafu {
                reason: format!(
                    "reindex threshold must be in 2..={DEFAULT_REINDEX_THRESHOLD}, got {}",
                    self.reindex_threshold
                ),
            }
        );
        Ok(())
    }
}

/// Which backing store the queue uses.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Single append-only file compacted on removal.
    #[default]
    #[display("log")]
    Log,
    /// One file per message.
    #[display("directory")]
    Directory,
}

impl FromStr for StoreKind {
    type Err = crate::QueueError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "log" | "wal" => Ok(Self::Log),
            "directory" | "dir" => Ok(Self::Directory),
            other => InvalidConfigSnafu {
                reason: format!("unknown store '{other}', expected log or directory"),
            }
            .fail(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Leave flushing to the OS.
    Async,
    /// `sync_data` after every append and before every swap.
    #[default]
    Sync,
}

impl FlushMode {
    pub(crate) const fn is_sync(self) -> bool { matches!(self, Self::Sync) }
}

impl FromStr for FlushMode {
    type Err = crate::QueueError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(Self::Sync),
            "async" => Ok(Self::Async),
            other => InvalidConfigSnafu {
                reason: format!("unknown flush mode '{other}', expected sync or async"),
            }
            .fail(),
        }
    }
}
