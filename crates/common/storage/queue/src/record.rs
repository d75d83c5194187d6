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

#![allow(clippy::cast_possible_truncation)]

//! Record framing for the log store.
//!
//! Every encoded message is wrapped in a frame before it is appended to the
//! queue file. The frame is the boundary marker between consecutive records.
//!
//! ## Line framing
//!
//! Used by text-safe encodings whose output never contains a raw newline:
//!
//! ```text
//! ┌──────────────────────┬──────┐
//! │   Payload (variable) │  \n  │
//! └──────────────────────┴──────┘
//! ```
//!
//! ## Length framing
//!
//! Used by binary encodings, whose payload may contain any byte:
//!
//! ```text
//! ┌─────────────────┬──────────────────────┬─────────────────┐
//! │  Length (4B)    │   Payload (variable) │   CRC32 (4B)    │
//! │  little-endian  │   encoded message    │   little-endian │
//! └─────────────────┴──────────────────────┴─────────────────┘
//! ```
//!
//! The CRC covers both the length prefix and the payload to detect
//! truncation and corruption.

use std::io::{self, BufRead, Read};

use crc32fast::Hasher;

use crate::{Result, error::EncodeSnafu};

/// Size of the length prefix in bytes (4 bytes = u32).
pub(crate) const RECORD_LENGTH_SIZE: usize = 4;

/// Size of the CRC32 checksum in bytes.
pub(crate) const RECORD_CRC_SIZE: usize = 4;

/// Largest payload a length prefix can describe.
pub(crate) const MAX_LENGTH_PAYLOAD: usize = u32::MAX as usize;

/// Terminator for line-framed records.
pub(crate) const LINE_TERMINATOR: u8 = b'\n';

/// How records are delimited inside the queue file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `<payload>\n`
    Line,
    /// `[len][payload][crc32]`
    Length,
}

impl Framing {
    /// Total on-disk size of a record with the given payload length.
    #[must_use]
    pub const fn record_size(self, payload_len: usize) -> usize {
        match self {
            Self::Line => payload_len + 1,
            Self::Length => RECORD_LENGTH_SIZE + payload_len + RECORD_CRC_SIZE,
        }
    }
}

/// Outcome of reading one record from the front of a reader.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RecordRead {
    /// No bytes left.
    End,
    /// A complete record; `size` is the number of bytes consumed.
    Record { payload: Vec<u8>, size: u64 },
    /// The reader ended inside a frame.
    Torn { reason: String },
    /// The frame is complete but its checksum does not match.
    Invalid { reason: String },
}

/// Wraps an encoded payload in a frame.
pub(crate) fn frame_record(framing: Framing, payload: &[u8]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(framing.record_size(payload.len()));
    match framing {
        Framing::Line => {
            buf.extend_from_slice(payload);
            buf.push(LINE_TERMINATOR);
        }
        Framing::Length => {
            let length = frame_length(payload.len())?;
            buf.extend_from_slice(&length.to_le_bytes());
            buf.extend_from_slice(payload);
            buf.extend_from_slice(&calculate_record_crc(length, payload).to_le_bytes());
        }
    }
    Ok(buf)
}

fn frame_length(payload_len: usize) -> Result<u32> {
    u32::try_from(payload_len).map_err(|_| {
        EncodeSnafu {
            encoding: "length frame",
            reason:   format!(
                "payload of {payload_len} bytes exceeds the {MAX_LENGTH_PAYLOAD} byte limit"
            ),
        }
        .build()
    })
}

/// Reads exactly one record from `reader`.
pub(crate) fn read_record<R: BufRead>(reader: &mut R, framing: Framing) -> io::Result<RecordRead> {
    match framing {
        Framing::Line => read_line_record(reader),
        Framing::Length => read_length_record(reader),
    }
}

fn read_line_record<R: BufRead>(reader: &mut R) -> io::Result<RecordRead> {
    let mut buf = Vec::new();
    let n = reader.read_until(LINE_TERMINATOR, &mut buf)?;
    if n == 0 {
        return Ok(RecordRead::End);
    }
    if buf.last() != Some(&LINE_TERMINATOR) {
        return Ok(RecordRead::Torn {
            reason: format!("{n} bytes without terminator"),
        });
    }
    buf.pop();
    Ok(RecordRead::Record {
        payload: buf,
        size:    n as u64,
    })
}

fn read_length_record<R: BufRead>(reader: &mut R) -> io::Result<RecordRead> {
    let mut length_buf = [0u8; RECORD_LENGTH_SIZE];
    let n = read_full(reader, &mut length_buf)?;
    if n == 0 {
        return Ok(RecordRead::End);
    }
    if n < RECORD_LENGTH_SIZE {
        return Ok(RecordRead::Torn {
            reason: format!("{n}-byte length prefix"),
        });
    }
    let length = u32::from_le_bytes(length_buf);

    // `take` keeps a corrupted length from forcing a huge allocation up front.
    let mut payload = Vec::new();
    let got = (&mut *reader)
        .take(u64::from(length))
        .read_to_end(&mut payload)?;
    if got < length as usize {
        return Ok(RecordRead::Torn {
            reason: format!("payload has {got} of {length} bytes"),
        });
    }

    let mut crc_buf = [0u8; RECORD_CRC_SIZE];
    let n = read_full(reader, &mut crc_buf)?;
    if n < RECORD_CRC_SIZE {
        return Ok(RecordRead::Torn {
            reason: format!("{n}-byte checksum"),
        });
    }
    let stored_crc = u32::from_le_bytes(crc_buf);

    if !verify_record_crc(length, &payload, stored_crc) {
        return Ok(RecordRead::Invalid {
            reason: "crc mismatch".to_string(),
        });
    }

    Ok(RecordRead::Record {
        payload,
        size: Framing::Length.record_size(length as usize) as u64,
    })
}

/// Fills `buf` as far as the reader allows; returns the bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Calculates the CRC32 checksum of a length-framed record.
#[inline]
pub(crate) fn calculate_record_crc(length: u32, data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&length.to_le_bytes());
    hasher.update(data);
    hasher.finalize()
}

#[inline]
pub(crate) fn verify_record_crc(length: u32, data: &[u8], expected: u32) -> bool {
    calculate_record_crc(length, data) == expected
}
