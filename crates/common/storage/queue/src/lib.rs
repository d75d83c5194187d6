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

//! Embedded persistent FIFO queue.
//!
//! Messages go through a single gate thread into one of two stores:
//!
//! - [`LogStore`]: one append-only file, compacted on every removal.
//! - [`DirectoryStore`]: one file per message, named by sequence number.
//!
//! Start with [`QueueBuilder`].

pub mod builder;
pub mod config;
pub mod consumer;
pub mod directory_store;
pub mod encoding;
pub mod error;
mod gate;
pub mod log_store;
pub mod message;
pub mod path;
pub mod producer;
pub mod queue;
pub mod record;
pub mod recovery;
pub mod store;

pub use builder::QueueBuilder;
pub use config::{DEFAULT_QUEUE_NAME, FlushMode, QueueConfig, StoreKind};
pub use consumer::Consumer;
pub use directory_store::{DirectoryStore, DirectoryStoreBuilder};
pub use encoding::{BincodeEncoding, Encoding, EncodingKind, JsonEncoding, MsgpackEncoding};
pub use error::{QueueError, Result};
pub use log_store::{LogStore, LogStoreBuilder};
pub use message::{Message, format_timestamp};
pub use producer::Producer;
pub use queue::Queue;
pub use record::Framing;
pub use recovery::RecoveryReport;
pub use store::{Store, open_store};
