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

//! The gate thread: sole owner and caller of a queue's store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  WriteRequest   ┌──────────────┐
//! │ Producer │ ──────────────► │              │   enqueue / peek /
//! └──────────┘                 │     Gate     │   remove_head
//! ┌──────────┐  ReadRequest    │ (own thread) │ ───────────────►  Store
//! │ Consumer │ ──────────────► │              │
//! └──────────┘                 └──────────────┘
//!        ▲   reply on the request's private channel   │
//!        └─────────────────────────────────────────────┘
//! ```
//!
//! Each loop iteration services exactly one ready request. `select!` picks
//! uniformly among ready channels, so neither reads nor writes have
//! priority.
//!
//! - **write**: one `enqueue`, then ack.
//! - **read**: one `peek`; if a message was found, one `remove_head`; then
//!   reply.
//! - **inspect**: read-only `len` or `read_all`.
//!
//! A decode or corruption error poisons the gate. The request that hit it
//! gets the real error, every later request gets
//! [`QueueError::Poisoned`](crate::QueueError::Poisoned).

use std::{
    collections::VecDeque,
    thread::{self, JoinHandle},
};

use crossbeam::{
    channel::{Receiver, SendError, Sender, bounded, unbounded},
    select,
};
use snafu::ResultExt;
use tracing::{debug, error, info, trace, warn};

use crate::{
    Result,
    error::{GateSpawnSnafu, PoisonedSnafu},
    message::Message,
    store::Store,
};

/// A message to persist plus the channel its outcome is reported on.
pub(crate) struct WriteRequest {
    pub(crate) message: Message,
    pub(crate) ack:     Sender<Result<()>>,
}

/// A request for the head message.
///
/// With a zero-capacity `reply` the send only completes if the reader takes
/// the message; a reader that gave up returns it to the gate.
pub(crate) struct ReadRequest {
    pub(crate) reply: Sender<Result<Option<Message>>>,
}

/// Read-only questions about the store.
pub(crate) enum InspectRequest {
    Len { reply: Sender<Result<usize>> },
    Snapshot { reply: Sender<Result<Vec<Message>>> },
}

/// Sending halves of the request channels, cloned into every handle.
#[derive(Clone)]
pub(crate) struct RequestSenders {
    pub(crate) write:   Sender<WriteRequest>,
    pub(crate) read:    Sender<ReadRequest>,
    pub(crate) inspect: Sender<InspectRequest>,
}

pub(crate) struct GateReceivers {
    write:    Receiver<WriteRequest>,
    read:     Receiver<ReadRequest>,
    inspect:  Receiver<InspectRequest>,
    /// Never carries a value; disconnects when the queue shuts down.
    shutdown: Receiver<()>,
}

/// Creates the request channels of one queue. A `capacity` of zero means
/// unbounded.
pub(crate) fn request_channels(capacity: usize) -> (RequestSenders, GateReceivers, Sender<()>) {
    let (write_tx, write_rx) = request_channel(capacity);
    let (read_tx, read_rx) = request_channel(capacity);
    let (inspect_tx, inspect_rx) = request_channel(capacity);
    let (shutdown_tx, shutdown_rx) = bounded(0);

    (
        RequestSenders {
            write:   write_tx,
            read:    read_tx,
            inspect: inspect_tx,
        },
        GateReceivers {
            write:    write_rx,
            read:     read_rx,
            inspect:  inspect_rx,
            shutdown: shutdown_rx,
        },
        shutdown_tx,
    )
}

fn request_channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    if capacity == 0 {
        unbounded()
    } else {
        bounded(capacity)
    }
}

pub(crate) struct Gate {
    store:       Box<dyn Store>,
    /// Reason of the first fatal error, if any.
    poisoned:    Option<String>,
    /// Messages already removed from the store whose reader went away
    /// before the reply arrived. Served ahead of the store.
    undelivered: VecDeque<Message>,
}

impl Gate {
    pub(crate) fn new(store: Box<dyn Store>) -> Self {
        Self {
            store,
            poisoned: None,
            undelivered: VecDeque::new(),
        }
    }

    /// Moves the gate onto its own thread.
    pub(crate) fn spawn(self, receivers: GateReceivers) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("inmq-gate-{}", self.store.name()))
            .spawn(move || self.run(receivers))
            .context(GateSpawnSnafu)
    }

    /// Serves requests until the shutdown channel disconnects.
    pub(crate) fn run(mut self, receivers: GateReceivers) {
        info!(name = self.store.name(), "Gate starting");

        let GateReceivers {
            write,
            read,
            inspect,
            shutdown,
        } = receivers;

        loop {
            select! {
                recv(shutdown) -> _signal => {
                    debug!("Gate received shutdown signal");
                    break;
                }
                recv(write) -> request => match request {
                    Ok(request) => self.handle_write(request),
                    Err(_) => break,
                },
                recv(read) -> request => match request {
                    Ok(request) => self.handle_read(request),
                    Err(_) => break,
                },
                recv(inspect) -> request => match request {
                    Ok(request) => self.handle_inspect(request),
                    Err(_) => break,
                },
            }
        }

        self.restore_undelivered();
        info!(name = self.store.name(), "Gate stopped");
    }

    fn handle_write(&mut self, request: WriteRequest) {
        let WriteRequest { message, ack } = request;

        let result = self.check_poisoned().and_then(|()| self.store.enqueue(&message));
        let result = self.observe(result);

        if ack.send(result).is_err() {
            debug!("Producer stopped waiting for ack");
        }
    }

    fn handle_read(&mut self, request: ReadRequest) {
        let result = self.next_message();

        match request.reply.send(result) {
            Ok(()) => {}
            Err(SendError(Ok(Some(message)))) => {
                warn!("Consumer went away before its reply, holding message for the next reader");
                self.undelivered.push_back(message);
            }
            Err(_) => debug!("Consumer stopped waiting for reply"),
        }
    }

    fn handle_inspect(&mut self, request: InspectRequest) {
        match request {
            InspectRequest::Len { reply } => {
                let result = self
                    .check_poisoned()
                    .and_then(|()| self.store.len())
                    .map(|len| len + self.undelivered.len());
                let result = self.observe(result);
                let _ = reply.send(result);
            }
            InspectRequest::Snapshot { reply } => {
                let result = self.check_poisoned().and_then(|()| {
                    let mut messages: Vec<Message> = self.undelivered.iter().cloned().collect();
                    messages.extend(self.store.read_all()?);
                    Ok(messages)
                });
                let result = self.observe(result);
                let _ = reply.send(result);
            }
        }
    }

    fn next_message(&mut self) -> Result<Option<Message>> {
        self.check_poisoned()?;
        if let Some(message) = self.undelivered.pop_front() {
            return Ok(Some(message));
        }
        let result = self.take_head();
        self.observe(result)
    }

    fn take_head(&mut self) -> Result<Option<Message>> {
        let Some(message) = self.store.peek()? else {
            return Ok(None);
        };
        self.store.remove_head()?;
        trace!(id = %message.id, "Dequeued message");
        Ok(Some(message))
    }

    fn check_poisoned(&self) -> Result<()> {
        match &self.poisoned {
            Some(reason) => PoisonedSnafu {
                reason: reason.clone(),
            }
            .fail(),
            None => Ok(()),
        }
    }

    /// Records a fatal error as the poison reason.
    fn observe<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if self.poisoned.is_some() {
                return result;
            }
            if e.is_fatal() {
                error!(name = self.store.name(), error = %e, "Store failed fatally, poisoning queue");
                self.poisoned = Some(e.to_string());
            } else {
                warn!(name = self.store.name(), error = %e, "Store operation failed");
            }
        }
        result
    }

    /// Puts messages nobody received back into the store before exiting.
    fn restore_undelivered(&mut self) {
        if self.undelivered.is_empty() {
            return;
        }
        if let Some(reason) = &self.poisoned {
            error!(
                lost = self.undelivered.len(),
                %reason,
                "Dropping undelivered messages of a poisoned queue"
            );
            return;
        }

        warn!(
            count = self.undelivered.len(),
            "Re-enqueueing undelivered messages at the tail"
        );
        while let Some(message) = self.undelivered.pop_front() {
            if let Err(e) = self.store.enqueue(&message) {
                error!(id = %message.id, error = %e, "Failed to re-enqueue undelivered message");
            }
        }
    }
}
