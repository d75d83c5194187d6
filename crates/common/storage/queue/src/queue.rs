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

//! Queue facade and lifecycle management.
//!
//! The [`Queue`] owns one store, hands it to a gate thread, and gives out
//! [`Producer`] and [`Consumer`] handles that talk to that gate. Every
//! queue has its own channels and thread, so any number of queues can live
//! in one process.
//!
//! ## Usage
//!
//! ```ignore
//! let queue = QueueBuilder::new("/path/to/queue").name("orders").build()?;
//!
//! let producer = queue.producer();
//! producer.send(Message::new("hello"))?;
//!
//! let consumer = queue.consumer();
//! let msg = consumer.recv()?;
//! assert_eq!(msg.body, "hello");
//!
//! queue.shutdown()?;
//! ```

use std::thread::JoinHandle;

use crossbeam::channel::{Sender, bounded};
use tracing::info;

use crate::{
    QueueConfig, Result,
    consumer::Consumer,
    error::{GateStoppedSnafu, InternalSnafu},
    gate::{Gate, InspectRequest, RequestSenders, request_channels},
    message::Message,
    producer::Producer,
    store::{Store, open_store},
};

/// A persistent FIFO queue served by a single gate thread.
pub struct Queue {
    config:      QueueConfig,
    /// Request channels to the gate, cloned into producers and consumers.
    senders:     RequestSenders,
    /// Dropping this stops the gate. `None` after shutdown.
    shutdown_tx: Option<Sender<()>>,
    gate_handle: Option<JoinHandle<()>>,
}

impl Queue {
    /// Opens the store named by `config` and starts the gate.
    pub(crate) fn new(config: QueueConfig) -> Result<Self> {
        config.validate()?;
        let store = open_store(&config)?;
        Self::start(config, store)
    }

    /// Starts a queue over a caller-supplied store.
    ///
    /// The store is pointed at `config.name` first if it uses another name.
    pub fn with_store(config: QueueConfig, mut store: Box<dyn Store>) -> Result<Self> {
        config.validate()?;
        if store.name() != config.name {
            store.set_name(&config.name)?;
        }
        Self::start(config, store)
    }

    fn start(config: QueueConfig, store: Box<dyn Store>) -> Result<Self> {
        let (senders, receivers, shutdown_tx) = request_channels(config.request_capacity);
        let gate_handle = Gate::new(store).spawn(receivers)?;

        info!(
            path = ?config.base_path,
            name = %config.name,
            store = %config.store,
            encoding = %config.encoding,
            "Queue initialized"
        );

        Ok(Self {
            config,
            senders,
            shutdown_tx: Some(shutdown_tx),
            gate_handle: Some(gate_handle),
        })
    }

    /// Create a handle for sending messages.
    #[must_use]
    pub fn producer(&self) -> Producer { Producer::new(self.senders.write.clone()) }

    /// Create a handle for receiving messages.
    #[must_use]
    pub fn consumer(&self) -> Consumer {
        Consumer::new(self.senders.read.clone(), self.config.poll_interval)
    }

    #[must_use]
    pub const fn config(&self) -> &QueueConfig { &self.config }

    #[must_use]
    pub fn name(&self) -> &str { &self.config.name }

    /// Number of pending messages.
    pub fn len(&self) -> Result<usize> {
        let (reply, reply_rx) = bounded(1);
        self.inspect(InspectRequest::Len { reply })?;
        reply_rx.recv().map_err(|_| GateStoppedSnafu.build())?
    }

    pub fn is_empty(&self) -> Result<bool> { Ok(self.len()? == 0) }

    /// Every pending message in FIFO order, without removing any.
    pub fn snapshot(&self) -> Result<Vec<Message>> {
        let (reply, reply_rx) = bounded(1);
        self.inspect(InspectRequest::Snapshot { reply })?;
        reply_rx.recv().map_err(|_| GateStoppedSnafu.build())?
    }

    fn inspect(&self, request: InspectRequest) -> Result<()> {
        self.senders
            .inspect
            .send(request)
            .map_err(|_| GateStoppedSnafu.build())
    }

    /// Stops the gate and waits for its thread.
    ///
    /// Requests still queued are dropped and their senders see
    /// `GateStopped`. Consumes `self` to prevent further use.
    pub fn shutdown(mut self) -> Result<()> { self.stop() }

    fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.gate_handle.take() else {
            return Ok(());
        };
        info!(name = %self.config.name, "Shutting down queue");

        self.shutdown_tx.take();
        handle.join().map_err(|_| {
            InternalSnafu {
                message: "Gate thread panicked".to_string(),
            }
            .build()
        })
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!(error = %e, "Failed to stop queue on drop");
        }
    }
}
