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

//! Write-ahead log store: every pending message in one append-only file.
//!
//! ## Layout
//!
//! ```text
//! base/
//! ├── <name>.wal   records, oldest first
//! └── <name>.tmp   only while a compaction is in flight
//! ```
//!
//! ## Operations
//!
//! - **enqueue** appends one framed record with a single write and never
//!   touches existing bytes.
//! - **peek** decodes the first record and reports how many bytes it spans.
//! - **remove_head** copies everything after the head into `<name>.tmp`
//!   and renames it over `<name>.wal`. The rename is the only point at which
//!   the new state becomes visible, so a crash leaves either the old or the
//!   new queue file under the canonical name.
//!
//! Compaction cost grows with the queue length; the store is meant for
//! queues that are drained about as fast as they fill.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufReader, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use snafu::ResultExt;
use tracing::{debug, trace, warn};

use crate::{
    FlushMode, Result,
    encoding::{Encoding, MsgpackEncoding},
    error::{CorruptedRecordSnafu, IoSnafu},
    message::Message,
    path::{queue_file_path, tmp_file_path},
    record::{RecordRead, frame_record, read_record},
    recovery::{RecoveryReport, recover_log},
    store::Store,
};

/// Chunk size used when copying the log tail during compaction.
pub const COPY_CHUNK_SIZE: usize = 1024;

/// Single-file store compacted on every removal.
#[derive(Debug)]
pub struct LogStore {
    /// Directory holding the queue and compaction files.
    base_path:         PathBuf,
    name:              String,
    /// `base/<name>.wal`
    queue_path:        PathBuf,
    /// `base/<name>.tmp`
    tmp_path:          PathBuf,
    encoding:          Box<dyn Encoding>,
    flush_mode:        FlushMode,
    verify_on_startup: bool,
    /// Outcome of the last recovery pass.
    last_recovery:     RecoveryReport,
}

/// Builder for [`LogStore`].
pub struct LogStoreBuilder {
    base_path:         PathBuf,
    name:              String,
    encoding:          Box<dyn Encoding>,
    flush_mode:        FlushMode,
    verify_on_startup: bool,
}

impl LogStoreBuilder {
    #[must_use]
    pub fn encoding(mut self, encoding: Box<dyn Encoding>) -> Self {
        self.encoding = encoding;
        self
    }

    #[must_use]
    pub const fn flush_mode(mut self, mode: FlushMode) -> Self {
        self.flush_mode = mode;
        self
    }

    #[must_use]
    pub const fn verify_on_startup(mut self, verify: bool) -> Self {
        self.verify_on_startup = verify;
        self
    }

    /// Creates the base directory if needed and recovers existing state.
    pub fn open(self) -> Result<LogStore> {
        fs::create_dir_all(&self.base_path).context(IoSnafu {
            path: &self.base_path,
        })?;

        let mut store = LogStore {
            queue_path:        queue_file_path(&self.base_path, &self.name),
            tmp_path:          tmp_file_path(&self.base_path, &self.name),
            base_path:         self.base_path,
            name:              self.name,
            encoding:          self.encoding,
            flush_mode:        self.flush_mode,
            verify_on_startup: self.verify_on_startup,
            last_recovery:     RecoveryReport::default(),
        };
        store.recover()?;

        debug!(
            path = ?store.queue_path,
            encoding = store.encoding.name(),
            "Log store opened"
        );
        Ok(store)
    }
}

impl LogStore {
    pub fn builder<P: AsRef<Path>>(base_path: P, name: &str) -> LogStoreBuilder {
        LogStoreBuilder {
            base_path:         base_path.as_ref().to_path_buf(),
            name:              name.to_string(),
            encoding:          Box::new(MsgpackEncoding),
            flush_mode:        FlushMode::default(),
            verify_on_startup: true,
        }
    }

    /// Path of the queue file.
    #[must_use]
    pub fn queue_path(&self) -> &Path { &self.queue_path }

    /// Path of the compaction file.
    #[must_use]
    pub fn tmp_path(&self) -> &Path { &self.tmp_path }

    #[must_use]
    pub const fn last_recovery(&self) -> &RecoveryReport { &self.last_recovery }

    /// Reads the head record and the number of bytes it occupies on disk.
    ///
    /// A missing or empty queue file is `Ok(None)`.
    pub fn read_head(&self) -> Result<Option<(Message, u64)>> {
        let Some(file) = self.open_queue_file()? else {
            return Ok(None);
        };
        let mut reader = BufReader::new(file);

        match read_record(&mut reader, self.encoding.framing()).context(IoSnafu {
            path: &self.queue_path,
        })? {
            RecordRead::End => Ok(None),
            RecordRead::Record { payload, size } => {
                let message = self.encoding.unmarshal(&payload)?;
                Ok(Some((message, size)))
            }
            RecordRead::Torn { reason } | RecordRead::Invalid { reason } => {
                CorruptedRecordSnafu {
                    path: &self.queue_path,
                    offset: 0u64,
                    reason,
                }
                .fail()
            }
        }
    }

    fn recover(&mut self) -> Result<()> {
        self.last_recovery = recover_log(
            &self.queue_path,
            &self.tmp_path,
            self.encoding.framing(),
            self.verify_on_startup,
        )?;
        Ok(())
    }

    fn open_queue_file(&self) -> Result<Option<File>> {
        match File::open(&self.queue_path) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context(IoSnafu {
                path: &self.queue_path,
            }),
        }
    }

    /// Visits every record in order with its byte offset.
    fn for_each_record(&self, mut visit: impl FnMut(u64, &[u8]) -> Result<()>) -> Result<()> {
        let Some(file) = self.open_queue_file()? else {
            return Ok(());
        };
        let mut reader = BufReader::new(file);
        let framing = self.encoding.framing();
        let mut offset = 0u64;

        loop {
            match read_record(&mut reader, framing).context(IoSnafu {
                path: &self.queue_path,
            })? {
                RecordRead::End => return Ok(()),
                RecordRead::Record { payload, size } => {
                    visit(offset, &payload)?;
                    offset += size;
                }
                RecordRead::Torn { reason } | RecordRead::Invalid { reason } => {
                    return CorruptedRecordSnafu {
                        path: &self.queue_path,
                        offset,
                        reason,
                    }
                    .fail();
                }
            }
        }
    }

    /// Copies the queue file from `offset` to EOF into the compaction file,
    /// then renames the compaction file over the queue file.
    fn compact_from(&self, offset: u64) -> Result<()> {
        let mut queue_file = File::open(&self.queue_path).context(IoSnafu {
            path: &self.queue_path,
        })?;
        queue_file
            .seek(SeekFrom::Start(offset))
            .context(IoSnafu {
                path: &self.queue_path,
            })?;

        let mut tmp_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.tmp_path)
            .context(IoSnafu {
                path: &self.tmp_path,
            })?;

        let mut buf = [0u8; COPY_CHUNK_SIZE];
        let mut copied = 0u64;
        loop {
            let n = match queue_file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(e).context(IoSnafu {
                        path: &self.queue_path,
                    });
                }
            };
            tmp_file.write_all(&buf[..n]).context(IoSnafu {
                path: &self.tmp_path,
            })?;
            copied += n as u64;
        }

        if self.flush_mode.is_sync() {
            tmp_file.sync_data().context(IoSnafu {
                path: &self.tmp_path,
            })?;
        }
        drop(tmp_file);
        drop(queue_file);

        fs::rename(&self.tmp_path, &self.queue_path).context(IoSnafu {
            path: &self.queue_path,
        })?;
        if self.flush_mode.is_sync() {
            sync_dir(&self.base_path)?;
        }

        trace!(path = ?self.queue_path, dropped = offset, remaining = copied, "Log compacted");
        Ok(())
    }
}

impl Store for LogStore {
    fn set_name(&mut self, name: &str) -> Result<()> {
        self.name = name.to_string();
        self.queue_path = queue_file_path(&self.base_path, name);
        self.tmp_path = tmp_file_path(&self.base_path, name);
        self.recover()
    }

    fn name(&self) -> &str { &self.name }

    fn enqueue(&mut self, message: &Message) -> Result<()> {
        let payload = self.encoding.marshal(message)?;
        let record = frame_record(self.encoding.framing(), &payload)?;

        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.queue_path)
            .context(IoSnafu {
                path: &self.queue_path,
            })?;
        file.write_all(&record).context(IoSnafu {
            path: &self.queue_path,
        })?;
        if self.flush_mode.is_sync() {
            file.sync_data().context(IoSnafu {
                path: &self.queue_path,
            })?;
        }

        trace!(path = ?self.queue_path, size = record.len(), "Appended record");
        Ok(())
    }

    fn peek(&self) -> Result<Option<Message>> {
        Ok(self.read_head()?.map(|(message, _)| message))
    }

    fn remove_head(&mut self) -> Result<()> {
        let Some((_, size)) = self.read_head()? else {
            return Ok(());
        };

        if let Err(e) = self.compact_from(size) {
            // The queue file is untouched until the rename succeeds.
            if let Err(cleanup) = fs::remove_file(&self.tmp_path)
                && cleanup.kind() != io::ErrorKind::NotFound
            {
                warn!(path = ?self.tmp_path, error = ?cleanup, "Failed to remove compaction file");
            }
            return Err(e);
        }
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        let mut count = 0;
        self.for_each_record(|_, _| {
            count += 1;
            Ok(())
        })?;
        Ok(count)
    }

    fn read_all(&self) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        self.for_each_record(|_, payload| {
            messages.push(self.encoding.unmarshal(payload)?);
            Ok(())
        })?;
        Ok(messages)
    }
}

/// Persists a rename by syncing the parent directory.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .context(IoSnafu { path: dir })
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn sync_dir(_dir: &Path) -> Result<()> { Ok(()) }

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use test_case::test_case;

    use super::*;
    use crate::{EncodingKind, QueueError};

    fn open_store(temp_dir: &TempDir, kind: EncodingKind) -> LogStore {
        LogStore::builder(temp_dir.path(), "test")
            .encoding(kind.encoding())
            .flush_mode(FlushMode::Sync)
            .open()
            .unwrap()
    }

    #[test_case(EncodingKind::Msgpack; "msgpack")]
    #[test_case(EncodingKind::Json; "json")]
    #[test_case(EncodingKind::Bincode; "bincode")]
    fn test_compaction_keeps_tail(kind: EncodingKind) {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_store(&temp_dir, kind);

        store.enqueue(&Message::new("a")).unwrap();
        store.enqueue(&Message::new("b")).unwrap();
        store.remove_head().unwrap();

        assert_eq!(store.read_all().unwrap(), vec![Message::new("b")]);
        assert!(!store.tmp_path().exists());

        store.remove_head().unwrap();
        assert!(store.peek().unwrap().is_none());
        assert_eq!(fs::metadata(store.queue_path()).unwrap().len(), 0);
    }

    #[test]
    fn test_peek_reports_record_size() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_store(&temp_dir, EncodingKind::Json);

        let msg = Message::new("sized");
        store.enqueue(&msg).unwrap();

        let encoded = serde_json::to_vec(&msg).unwrap().len() as u64;
        let (head, size) = store.read_head().unwrap().unwrap();
        assert_eq!(head, msg);
        assert_eq!(size, encoded + 1);
        assert_eq!(fs::metadata(store.queue_path()).unwrap().len(), size);
    }

    #[test]
    fn test_missing_and_empty_file_are_soft_misses() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_store(&temp_dir, EncodingKind::Msgpack);

        assert!(!store.queue_path().exists());
        assert!(store.peek().unwrap().is_none());
        store.remove_head().unwrap();

        File::create(store.queue_path()).unwrap();
        assert!(store.peek().unwrap().is_none());
        store.remove_head().unwrap();
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn test_enqueue_only_appends() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_store(&temp_dir, EncodingKind::Bincode);

        store.enqueue(&Message::new("first")).unwrap();
        let before = fs::read(store.queue_path()).unwrap();
        store.enqueue(&Message::new("second")).unwrap();
        let after = fs::read(store.queue_path()).unwrap();

        assert!(after.len() > before.len());
        assert_eq!(&after[..before.len()], before.as_slice());
    }

    #[test]
    fn test_large_tail_copied_in_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_store(&temp_dir, EncodingKind::Msgpack);

        let big = "x".repeat(COPY_CHUNK_SIZE * 3 + 17);
        store.enqueue(&Message::new("head")).unwrap();
        for i in 0..5 {
            store
                .enqueue(&Message::new(format!("{i}{big}")))
                .unwrap();
        }

        store.remove_head().unwrap();

        let rest = store.read_all().unwrap();
        assert_eq!(rest.len(), 5);
        for (i, msg) in rest.iter().enumerate() {
            assert!(msg.body.starts_with(&i.to_string()));
            assert_eq!(msg.body.len(), big.len() + 1);
        }
    }

    #[test]
    fn test_corrupted_head_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_store(&temp_dir, EncodingKind::Msgpack);

        store.enqueue(&Message::new("will be damaged")).unwrap();
        let mut bytes = fs::read(store.queue_path()).unwrap();
        bytes[6] ^= 0x55;
        fs::write(store.queue_path(), &bytes).unwrap();

        let err = store.peek().unwrap_err();
        assert!(matches!(err, QueueError::CorruptedRecord { .. }));
        assert!(store.remove_head().unwrap_err().is_fatal());
    }

    #[test]
    fn test_undecodable_line_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir, EncodingKind::Json);

        fs::write(store.queue_path(), b"{not json}\n").unwrap();

        let err = store.peek().unwrap_err();
        assert!(matches!(err, QueueError::Decode { .. }));
    }

    #[test]
    fn test_reads_reference_json_log() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir, EncodingKind::Json);

        fs::write(
            store.queue_path(),
            concat!(
                r#"{"id":"","priority":0,"created-at":"2016-01-02T03:04:05Z","deadline-at":"","message":"This is message # 1"}"#,
                "\n",
                r#"{"id":"","priority":0,"created-at":"2016-01-02T03:04:06Z","deadline-at":"","message":"This is message # 2"}"#,
                "\n",
            ),
        )
        .unwrap();

        let all = store.read_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].body, "This is message # 1");
        assert_eq!(all[1].created_at, "2016-01-02T03:04:06Z");
    }

    #[test]
    fn test_reopen_after_interrupted_delete_then_rename() {
        let temp_dir = TempDir::new().unwrap();
        let (queue_path, tmp_path) = {
            let mut store = open_store(&temp_dir, EncodingKind::Msgpack);
            for body in ["a", "b", "c"] {
                store.enqueue(&Message::new(body)).unwrap();
            }
            let (_, size) = store.read_head().unwrap().unwrap();

            // Tail written to the compaction file, queue file deleted, no rename.
            let bytes = fs::read(store.queue_path()).unwrap();
            fs::write(store.tmp_path(), &bytes[size as usize..]).unwrap();
            fs::remove_file(store.queue_path()).unwrap();
            (store.queue_path().to_path_buf(), store.tmp_path().to_path_buf())
        };

        let store = open_store(&temp_dir, EncodingKind::Msgpack);

        assert!(store.last_recovery().restored_tmp);
        assert!(queue_path.exists());
        assert!(!tmp_path.exists());
        let bodies: Vec<String> = store
            .read_all()
            .unwrap()
            .into_iter()
            .map(|m| m.body)
            .collect();
        assert_eq!(bodies, vec!["b", "c"]);
    }
}
