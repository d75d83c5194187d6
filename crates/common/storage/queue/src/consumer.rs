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

//! Read handle of a queue.
//!
//! The gate answers a read immediately, with a message or with nothing. A
//! blocking receive is a loop of such reads with `poll_interval` between
//! empty answers.

use std::{
    thread,
    time::{Duration, Instant},
};

use crossbeam::channel::{RecvTimeoutError, SendTimeoutError, Sender, bounded};

use crate::{
    Result,
    error::{GateStoppedSnafu, TimeoutSnafu},
    gate::ReadRequest,
    message::Message,
};

/// Cheap to clone and safe to move to any thread.
#[derive(Clone)]
pub struct Consumer {
    read_tx:       Sender<ReadRequest>,
    poll_interval: Duration,
}

impl Consumer {
    pub(crate) const fn new(read_tx: Sender<ReadRequest>, poll_interval: Duration) -> Self {
        Self {
            read_tx,
            poll_interval,
        }
    }

    /// Blocks until a message is available and removes it.
    pub fn recv(&self) -> Result<Message> {
        loop {
            if let Some(message) = self.try_recv()? {
                return Ok(message);
            }
            self.pause(None);
        }
    }

    /// One read attempt. `Ok(None)` when the queue is empty.
    pub fn try_recv(&self) -> Result<Option<Message>> {
        let (reply, reply_rx) = bounded(1);
        self.read_tx
            .send(ReadRequest { reply })
            .map_err(|_| GateStoppedSnafu.build())?;

        reply_rx.recv().map_err(|_| GateStoppedSnafu.build())?
    }

    /// Like [`recv`](Self::recv) but fails with `Timeout` once `timeout` has
    /// passed without a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Message> {
        let start = Instant::now();
        let deadline = start + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Some(message) = self.try_recv_until(remaining, start)? {
                return Ok(message);
            }
            if Instant::now() >= deadline {
                return TimeoutSnafu {
                    elapsed: start.elapsed(),
                }
                .fail();
            }
            self.pause(Some(deadline));
        }
    }

    fn try_recv_until(&self, remaining: Duration, start: Instant) -> Result<Option<Message>> {
        let timeout = || {
            TimeoutSnafu {
                elapsed: start.elapsed(),
            }
            .build()
        };

        // Rendezvous: the gate's reply only succeeds while we are still
        // receiving, otherwise it comes back to the gate as undelivered.
        let (reply, reply_rx) = bounded(0);
        self.read_tx
            .send_timeout(ReadRequest { reply }, remaining)
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => timeout(),
                SendTimeoutError::Disconnected(_) => GateStoppedSnafu.build(),
            })?;

        reply_rx.recv_timeout(remaining).map_err(|e| match e {
            RecvTimeoutError::Timeout => timeout(),
            RecvTimeoutError::Disconnected => GateStoppedSnafu.build(),
        })?
    }

    fn pause(&self, deadline: Option<Instant>) {
        let mut pause = self.poll_interval;
        if let Some(deadline) = deadline {
            pause = pause.min(deadline.saturating_duration_since(Instant::now()));
        }
        if pause.is_zero() {
            thread::yield_now();
        } else {
            thread::sleep(pause);
        }
    }
}
