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

//! One file per message.
//!
//! ```text
//! base/<name>/
//! ├── 0000000001
//! ├── 0000000002
//! └── .0000000003.tmp   being written, renamed to 0000000003 when complete
//! ```
//!
//! Lexicographic order of the ten-digit names is FIFO order. The next
//! sequence is always derived from what is on disk, never from a counter
//! held in memory.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use snafu::ResultExt;
use tracing::{debug, info, trace, warn};

use crate::{
    FlushMode, Result,
    config::DEFAULT_REINDEX_THRESHOLD,
    encoding::{Encoding, MsgpackEncoding},
    error::IoSnafu,
    message::Message,
    path::{entry_name, pending_entry_name, queue_dir_path, scan_entries},
    recovery::{RecoveryReport, recover_directory},
    store::Store,
};

#[derive(Debug)]
pub struct DirectoryStore {
    base_path:         PathBuf,
    name:              String,
    /// `base/<name>`
    dir:               PathBuf,
    encoding:          Box<dyn Encoding>,
    flush_mode:        FlushMode,
    reindex_threshold: u64,
    last_recovery:     RecoveryReport,
}

pub struct DirectoryStoreBuilder {
    base_path:         PathBuf,
    name:              String,
    encoding:          Box<dyn Encoding>,
    flush_mode:        FlushMode,
    reindex_threshold: u64,
}

impl DirectoryStoreBuilder {
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

    /// Sequence number at which entries are renumbered from zero.
    #[must_use]
    pub const fn reindex_threshold(mut self, threshold: u64) -> Self {
        self.reindex_threshold = threshold;
        self
    }

    /// Creates the queue directory; failure here is returned, not retried.
    pub fn open(self) -> Result<DirectoryStore> {
        let mut store = DirectoryStore {
            dir:               queue_dir_path(&self.base_path, &self.name),
            base_path:         self.base_path,
            name:              self.name,
            encoding:          self.encoding,
            flush_mode:        self.flush_mode,
            reindex_threshold: self.reindex_threshold,
            last_recovery:     RecoveryReport::default(),
        };
        store.prepare_dir()?;

        debug!(
            path = ?store.dir,
            encoding = store.encoding.name(),
            "Directory store opened"
        );
        Ok(store)
    }
}

impl DirectoryStore {
    pub fn builder<P: AsRef<Path>>(base_path: P, name: &str) -> DirectoryStoreBuilder {
        DirectoryStoreBuilder {
            base_path:         base_path.as_ref().to_path_buf(),
            name:              name.to_string(),
            encoding:          Box::new(MsgpackEncoding),
            flush_mode:        FlushMode::default(),
            reindex_threshold: DEFAULT_REINDEX_THRESHOLD,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path { &self.dir }

    #[must_use]
    pub const fn last_recovery(&self) -> &RecoveryReport { &self.last_recovery }

    fn prepare_dir(&mut self) -> Result<()> {
        fs::create_dir_all(&self.dir).context(IoSnafu { path: &self.dir })?;
        self.last_recovery = recover_directory(&self.dir)?;
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(u64, PathBuf)>> {
        scan_entries(&self.dir).context(IoSnafu { path: &self.dir })
    }

    /// Renumbers entries densely from zero, keeping their order.
    ///
    /// Entry `i` is renamed to `i` only when its number differs. Sorted
    /// unique numbers satisfy `seq >= i`, so a target name is either free or
    /// already held by the entry itself.
    fn reindex(&self, entries: &[(u64, PathBuf)]) -> Result<()> {
        info!(path = ?self.dir, entries = entries.len(), "Reindexing directory store");

        for (index, (sequence, path)) in (0u64..).zip(entries) {
            if *sequence == index {
                continue;
            }
            let target = self.dir.join(entry_name(index));
            fs::rename(path, &target).context(IoSnafu { path: &target })?;
        }
        if self.flush_mode.is_sync() {
            sync_dir(&self.dir)?;
        }
        Ok(())
    }

    /// Picks the sequence for a new entry, reindexing at the threshold.
    fn next_sequence(&self) -> Result<u64> {
        let entries = self.entries()?;
        let Some((highest, _)) = entries.last() else {
            return Ok(1);
        };

        let next = highest + 1;
        if next < self.reindex_threshold {
            return Ok(next);
        }

        self.reindex(&entries)?;
        let next = entries.len() as u64;
        if next >= self.reindex_threshold {
            warn!(
                path = ?self.dir,
                entries = next,
                threshold = self.reindex_threshold,
                "Directory store still at threshold after reindex"
            );
        }
        Ok(next)
    }

    fn write_entry(&self, sequence: u64, payload: &[u8]) -> Result<PathBuf> {
        let pending = self.dir.join(pending_entry_name(sequence));
        let target = self.dir.join(entry_name(sequence));

        let write = || -> Result<()> {
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&pending)
                .context(IoSnafu { path: &pending })?;
            file.write_all(payload).context(IoSnafu { path: &pending })?;
            if self.flush_mode.is_sync() {
                file.sync_data().context(IoSnafu { path: &pending })?;
            }
            Ok(())
        };

        if let Err(e) = write().and_then(|()| {
            fs::rename(&pending, &target).context(IoSnafu { path: &target })
        }) {
            if let Err(cleanup) = fs::remove_file(&pending)
                && cleanup.kind() != io::ErrorKind::NotFound
            {
                warn!(path = ?pending, error = ?cleanup, "Failed to remove pending entry");
            }
            return Err(e);
        }

        if self.flush_mode.is_sync() {
            sync_dir(&self.dir)?;
        }
        Ok(target)
    }

    fn decode_entry(&self, path: &Path) -> Result<Option<Message>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(path = ?path, error = ?e, "Entry unreadable, treating as absent");
                return Ok(None);
            }
        };
        self.encoding.unmarshal(&bytes).map(Some)
    }
}

impl Store for DirectoryStore {
    fn set_name(&mut self, name: &str) -> Result<()> {
        self.name = name.to_string();
        self.dir = queue_dir_path(&self.base_path, name);
        self.prepare_dir()
    }

    fn name(&self) -> &str { &self.name }

    fn enqueue(&mut self, message: &Message) -> Result<()> {
        let payload = self.encoding.marshal(message)?;
        let sequence = self.next_sequence()?;
        let path = self.write_entry(sequence, &payload)?;

        trace!(path = ?path, size = payload.len(), "Wrote entry");
        Ok(())
    }

    fn peek(&self) -> Result<Option<Message>> {
        let entries = match scan_entries(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(path = ?self.dir, error = ?e, "Listing failed, treating as empty");
                return Ok(None);
            }
        };
        match entries.first() {
            Some((_, path)) => self.decode_entry(path),
            None => Ok(None),
        }
    }

    fn remove_head(&mut self) -> Result<()> {
        let entries = self.entries()?;
        let Some((_, path)) = entries.first() else {
            return Ok(());
        };

        match fs::remove_file(path) {
            Ok(()) => {
                trace!(path = ?path, "Removed entry");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(IoSnafu { path }),
        }
    }

    fn len(&self) -> Result<usize> { Ok(self.entries()?.len()) }

    fn read_all(&self) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        for (_, path) in self.entries()? {
            let bytes = fs::read(&path).context(IoSnafu { path: &path })?;
            messages.push(self.encoding.unmarshal(&bytes)?);
        }
        Ok(messages)
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .context(IoSnafu { path: dir })
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn sync_dir(_dir: &Path) -> Result<()> { Ok(()) }
