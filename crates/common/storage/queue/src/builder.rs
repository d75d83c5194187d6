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

use std::{path::PathBuf, time::Duration};

use crate::{EncodingKind, FlushMode, Queue, QueueConfig, Result, StoreKind};

pub struct QueueBuilder {
    config: QueueConfig,
}

impl QueueBuilder {
    pub fn new<P: Into<PathBuf>>(base_path: P) -> Self {
        Self {
            config: QueueConfig {
                base_path: base_path.into(),
                ..Default::default()
            },
        }
    }

    /// Start from a complete configuration, e.g. one read from a file.
    #[must_use]
    pub const fn from_config(config: QueueConfig) -> Self { Self { config } }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    #[must_use]
    pub const fn store(mut self, store: StoreKind) -> Self {
        self.config.store = store;
        self
    }

    #[must_use]
    pub const fn encoding(mut self, encoding: EncodingKind) -> Self {
        self.config.encoding = encoding;
        self
    }

    #[must_use]
    pub const fn flush_mode(mut self, mode: FlushMode) -> Self {
        self.config.flush_mode = mode;
        self
    }

    #[must_use]
    pub const fn verify_on_startup(mut self, verify: bool) -> Self {
        self.config.verify_on_startup = verify;
        self
    }

    #[must_use]
    pub const fn reindex_threshold(mut self, threshold: u64) -> Self {
        self.config.reindex_threshold = threshold;
        self
    }

    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    #[must_use]
    pub const fn request_capacity(mut self, capacity: usize) -> Self {
        self.config.request_capacity = capacity;
        self
    }

    /// Validates the configuration, opens the store and starts the gate.
    pub fn build(self) -> Result<Queue> { Queue::new(self.config) }
}
