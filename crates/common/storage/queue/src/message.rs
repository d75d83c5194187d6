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

//! The message type moved through the queue.
//!
//! Only `created_at` has meaning to the queue itself: the send path
//! overwrites it with the current UTC time. Every other field is carried
//! through the stores untouched.
//!
//! Serialized field names follow the established wire names (`created-at`,
//! `deadline-at`, and `message` for the body) so records written by earlier
//! deployments keep decoding.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A queue message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Message {
    /// Caller- or store-assigned identifier. May be empty.
    pub id:          String,
    /// Carried but never interpreted by the queue.
    pub priority:    i64,
    /// Stamped by the send path; see [`Message::stamp_created_at`].
    pub created_at:  String,
    /// Caller-set, not enforced.
    pub deadline_at: String,
    /// Payload.
    #[serde(rename = "message")]
    pub body:        String,
}

impl Message {
    /// Create a message with the given body and every other field empty.
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_deadline_at(mut self, deadline_at: impl Into<String>) -> Self {
        self.deadline_at = deadline_at.into();
        self
    }

    /// Overwrite `created_at` with the current UTC time.
    pub fn stamp_created_at(&mut self) { self.created_at = format_timestamp(Utc::now()); }
}

/// Formats a timestamp as fixed-width RFC 3339 with millisecond precision
/// and a `Z` suffix, e.g. `2026-01-14T12:00:00.000Z`.
///
/// Every output has the same width, so lexical order equals time order.
#[must_use]
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_builder_methods() {
        let msg = Message::new("hello")
            .with_id("m-1")
            .with_priority(7)
            .with_deadline_at("2030-01-01T00:00:00.000Z");

        assert_eq!(msg.body, "hello");
        assert_eq!(msg.id, "m-1");
        assert_eq!(msg.priority, 7);
        assert_eq!(msg.deadline_at, "2030-01-01T00:00:00.000Z");
        assert!(msg.created_at.is_empty());
    }

    #[test]
    fn test_format_timestamp_is_fixed_width() {
        let a = Utc.with_ymd_and_hms(2026, 1, 14, 9, 5, 3).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 11, 4, 23, 59, 59).unwrap();

        assert_eq!(format_timestamp(a), "2026-01-14T09:05:03.000Z");
        assert_eq!(format_timestamp(a).len(), format_timestamp(b).len());
        assert!(format_timestamp(a) < format_timestamp(b));
    }

    #[test]
    fn test_stamp_overwrites_created_at() {
        let mut msg = Message::new("x");
        msg.created_at = "caller supplied".to_string();

        msg.stamp_created_at();

        assert_ne!(msg.created_at, "caller supplied");
        assert!(DateTime::parse_from_rfc3339(&msg.created_at).is_ok());
        assert!(msg.created_at.ends_with('Z'));
    }

    #[test]
    fn test_wire_field_names() {
        let msg = Message::new("payload").with_id("a");
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"created-at\""));
        assert!(json.contains("\"deadline-at\""));
        assert!(json.contains("\"message\":\"payload\""));
    }
}
