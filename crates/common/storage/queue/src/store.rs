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

//! The storage capability shared by every backing store.
//!
//! The gate is the only caller of a store, so implementations do no locking
//! of their own. Mutating operations take `&mut self` to make that single
//! ownership visible in the types.

use crate::{
    DirectoryStore, LogStore, QueueConfig, Result, StoreKind, message::Message,
};

/// A FIFO message store.
///
/// An empty store is a normal state: `peek` answers `Ok(None)` and
/// `remove_head` is a no-op.
pub trait Store: Send {
    /// Point the store at a different queue name, creating or recovering
    /// its on-disk state as needed.
    fn set_name(&mut self, name: &str) -> Result<()>;

    fn name(&self) -> &str;

    /// Persist a message at the tail.
    fn enqueue(&mut self, message: &Message) -> Result<()>;

    /// Decode the head without removing it.
    fn peek(&self) -> Result<Option<Message>>;

    /// Physically remove the head.
    fn remove_head(&mut self) -> Result<()>;

    /// Number of pending messages.
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> { Ok(self.len()? == 0) }

    /// Decode every pending message in FIFO order without removing any.
    fn read_all(&self) -> Result<Vec<Message>>;
}

/// Opens the store described by `config`.
pub fn open_store(config: &QueueConfig) -> Result<Box<dyn Store>> {
    let encoding = config.encoding.encoding();
    let store: Box<dyn Store> = match config.store {
        StoreKind::Log => Box::new(
            LogStore::builder(&config.base_path, &config.name)
                .encoding(encoding)
                .flush_mode(config.flush_mode)
                .verify_on_startup(config.verify_on_startup)
                .open()?,
        ),
        StoreKind::Directory => Box::new(
            DirectoryStore::builder(&config.base_path, &config.name)
                .encoding(encoding)
                .flush_mode(config.flush_mode)
                .reindex_threshold(config.reindex_threshold)
                .open()?,
        ),
    };
    Ok(store)
}
