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

//! Pluggable message encodings.
//!
//! A store is constructed with exactly one [`Encoding`] and keeps it for its
//! whole lifetime; records written with one encoding are never read with
//! another.
//!
//! | Kind      | Format                                   | Log framing |
//! |-----------|------------------------------------------|-------------|
//! | `msgpack` | MessagePack map, field names preserved   | length      |
//! | `json`    | JSON object, one line per record         | line        |
//! | `bincode` | bincode 2 standard config, positional    | length      |

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    Result,
    error::{DecodeSnafu, EncodeSnafu, QueueError},
    message::Message,
    record::Framing,
};

/// Serializes messages to bytes and back.
pub trait Encoding: Send + Sync + fmt::Debug {
    /// Stable name used in logs and errors.
    fn name(&self) -> &'static str;

    /// How the log store delimits records of this encoding.
    fn framing(&self) -> Framing;

    fn marshal(&self, message: &Message) -> Result<Vec<u8>>;

    /// Decodes one complete record. Any failure here is fatal to the store.
    fn unmarshal(&self, bytes: &[u8]) -> Result<Message>;
}

/// Compact self-describing binary (MessagePack with named fields).
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgpackEncoding;

/// Textual structured format (JSON).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoding;

/// Generic binary structured format (bincode).
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeEncoding;

impl Encoding for MsgpackEncoding {
    fn name(&self) -> &'static str { "msgpack" }

    fn framing(&self) -> Framing { Framing::Length }

    fn marshal(&self, message: &Message) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(message).map_err(|e| {
            EncodeSnafu {
                encoding: self.name(),
                reason:   e.to_string(),
            }
            .build()
        })
    }

    fn unmarshal(&self, bytes: &[u8]) -> Result<Message> {
        rmp_serde::from_slice(bytes).map_err(|e| {
            DecodeSnafu {
                encoding: self.name(),
                reason:   e.to_string(),
            }
            .build()
        })
    }
}

impl Encoding for JsonEncoding {
    fn name(&self) -> &'static str { "json" }

    // serde_json escapes control characters inside strings, so an encoded
    // record never contains a raw newline.
    fn framing(&self) -> Framing { Framing::Line }

    fn marshal(&self, message: &Message) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| {
            EncodeSnafu {
                encoding: self.name(),
                reason:   e.to_string(),
            }
            .build()
        })
    }

    fn unmarshal(&self, bytes: &[u8]) -> Result<Message> {
        serde_json::from_slice(bytes).map_err(|e| {
            DecodeSnafu {
                encoding: self.name(),
                reason:   e.to_string(),
            }
            .build()
        })
    }
}

impl Encoding for BincodeEncoding {
    fn name(&self) -> &'static str { "bincode" }

    fn framing(&self) -> Framing { Framing::Length }

    fn marshal(&self, message: &Message) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(message, bincode::config::standard()).map_err(|e| {
            EncodeSnafu {
                encoding: self.name(),
                reason:   e.to_string(),
            }
            .build()
        })
    }

    fn unmarshal(&self, bytes: &[u8]) -> Result<Message> {
        let (message, consumed): (Message, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard()).map_err(
                |e| {
                    DecodeSnafu {
                        encoding: self.name(),
                        reason:   e.to_string(),
                    }
                    .build()
                },
            )?;

        if consumed != bytes.len() {
            return DecodeSnafu {
                encoding: self.name(),
                reason:   format!("{} trailing bytes", bytes.len() - consumed),
            }
            .fail();
        }

        Ok(message)
    }
}

/// Selects an [`Encoding`] implementation at runtime.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum EncodingKind {
    #[default]
    #[display("msgpack")]
    Msgpack,
    #[display("json")]
    Json,
    #[display("bincode")]
    Bincode,
}

impl EncodingKind {
    pub const ALL: [Self; 3] = [Self::Msgpack, Self::Json, Self::Bincode];

    /// Instantiate the encoding this kind names.
    #[must_use]
    pub fn encoding(self) -> Box<dyn Encoding> {
        match self {
            Self::Msgpack => Box::new(MsgpackEncoding),
            Self::Json => Box::new(JsonEncoding),
            Self::Bincode => Box::new(BincodeEncoding),
        }
    }
}

impl FromStr for EncodingKind {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "msgpack" => Ok(Self::Msgpack),
            "json" => Ok(Self::Json),
            "bincode" => Ok(Self::Bincode),
            other => Err(QueueError::InvalidConfig {
                reason: format!("unknown encoding '{other}', expected msgpack, json or bincode"),
            }),
        }
    }
}
