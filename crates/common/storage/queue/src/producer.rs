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

use std::time::{Duration, Instant};

use crossbeam::channel::{RecvTimeoutError, SendTimeoutError, Sender, bounded};

use crate::{
    Result,
    error::{GateStoppedSnafu, TimeoutSnafu},
    gate::WriteRequest,
    message::Message,
};

/// Write handle of a [`Queue`](crate::Queue).
///
/// Cheap to clone and safe to move to any thread.
#[derive(Clone)]
pub struct Producer {
    write_tx: Sender<WriteRequest>,
}

impl Producer {
    pub(crate) const fn new(write_tx: Sender<WriteRequest>) -> Self { Self { write_tx } }

    /// Stamps `created_at` and blocks until the message is persisted.
    pub fn send(&self, mut message: Message) -> Result<()> {
        message.stamp_created_at();

        let (ack, ack_rx) = bounded(1);
        self.write_tx
            .send(WriteRequest { message, ack })
            .map_err(|_| GateStoppedSnafu.build())?;

        ack_rx.recv().map_err(|_| GateStoppedSnafu.build())?
    }

    /// Like [`send`](Self::send) but gives up after `timeout`.
    ///
    /// A `Timeout` only says the ack did not arrive in time; the message may
    /// still be persisted.
    pub fn send_timeout(&self, mut message: Message, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        message.stamp_created_at();

        let (ack, ack_rx) = bounded(1);
        self.write_tx
            .send_timeout(WriteRequest { message, ack }, timeout)
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => TimeoutSnafu {
                    elapsed: start.elapsed(),
                }
                .build(),
                SendTimeoutError::Disconnected(_) => GateStoppedSnafu.build(),
            })?;

        let remaining = timeout.saturating_sub(start.elapsed());
        ack_rx.recv_timeout(remaining).map_err(|e| match e {
            RecvTimeoutError::Timeout => TimeoutSnafu {
                elapsed: start.elapsed(),
            }
            .build(),
            RecvTimeoutError::Disconnected => GateStoppedSnafu.build(),
        })?
    }
}
