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

//! Startup recovery of on-disk store state.
//!
//! ## Log store
//!
//! A compaction writes the remaining tail to `<name>.tmp` and renames it over
//! `<name>.wal`. Depending on where a process died, recovery finds:
//!
//! | `.wal`  | `.tmp`  | Meaning                                   | Action          |
//! |---------|---------|-------------------------------------------|-----------------|
//! | present | absent  | clean                                     | none            |
//! | present | present | compaction interrupted before the rename  | delete `.tmp`   |
//! | absent  | present | delete-then-rename swap interrupted       | rename into place |
//! | absent  | absent  | empty queue                               | none            |
//!
//! The third row cannot be produced by this crate's own swap, but it is the
//! state left by stores that delete the queue file before renaming, and the
//! `.tmp` file then holds the only copy of the pending messages.
//!
//! With `verify_on_startup`, every record is then scanned and a torn trailing
//! record (a crash mid-append) is truncated away.
//!
//! ## Directory store
//!
//! Entries are written under a dot-prefixed pending name and renamed into
//! place. Pending files left by a crash are never acknowledged messages and
//! are removed.

use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader},
    path::Path,
};

use snafu::ResultExt;
use tracing::{debug, info, warn};

use crate::{
    Result,
    error::{CorruptedRecordSnafu, IoSnafu},
    path::{FILE_EXT_TMP, parse_entry_name},
    record::{Framing, RecordRead, read_record},
};

/// What recovery found and did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// The queue file was missing and the compaction file was renamed in.
    pub restored_tmp:    bool,
    /// A non-authoritative compaction file was deleted.
    pub discarded_tmp:   bool,
    /// Bytes cut from the end of the queue file.
    pub truncated_bytes: u64,
    /// Records found by a verifying scan.
    pub records:         Option<usize>,
    /// Pending directory entries removed.
    pub removed_pending: usize,
}

impl RecoveryReport {
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        !self.restored_tmp
            && !self.discarded_tmp
            && self.truncated_bytes == 0
            && self.removed_pending == 0
    }
}

/// Reconciles the log store's queue and compaction files.
pub(crate) fn recover_log(
    queue_path: &Path,
    tmp_path: &Path,
    framing: Framing,
    verify: bool,
) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();

    let queue_exists = queue_path.try_exists().context(IoSnafu { path: queue_path })?;
    let tmp_exists = tmp_path.try_exists().context(IoSnafu { path: tmp_path })?;

    match (queue_exists, tmp_exists) {
        (false, true) => {
            warn!(
                path = ?tmp_path,
                "Queue file missing after interrupted swap, restoring compaction file"
            );
            fs::rename(tmp_path, queue_path).context(IoSnafu { path: queue_path })?;
            report.restored_tmp = true;
        }
        (true, true) => {
            warn!(path = ?tmp_path, "Discarding interrupted compaction file");
            fs::remove_file(tmp_path).context(IoSnafu { path: tmp_path })?;
            report.discarded_tmp = true;
        }
        _ => {}
    }

    if verify && queue_path.try_exists().context(IoSnafu { path: queue_path })? {
        let (records, truncated) = verify_log(queue_path, framing)?;
        report.records = Some(records);
        report.truncated_bytes = truncated;
    }

    if !report.is_clean() {
        info!(path = ?queue_path, ?report, "Log store recovered");
    }
    Ok(report)
}

/// Scans every record; truncates a torn tail. Returns (records, bytes cut).
fn verify_log(queue_path: &Path, framing: Framing) -> Result<(usize, u64)> {
    let file = File::open(queue_path).context(IoSnafu { path: queue_path })?;
    let file_len = file
        .metadata()
        .context(IoSnafu { path: queue_path })?
        .len();
    let mut reader = BufReader::new(file);

    let mut offset = 0u64;
    let mut records = 0usize;

    let torn_at = loop {
        match read_record(&mut reader, framing).context(IoSnafu { path: queue_path })? {
            RecordRead::End => break None,
            RecordRead::Record { size, .. } => {
                offset += size;
                records += 1;
            }
            RecordRead::Torn { reason } => {
                warn!(path = ?queue_path, offset, %reason, "Torn record at end of log");
                break Some(offset);
            }
            RecordRead::Invalid { reason } => {
                let at_tail = reader
                    .fill_buf()
                    .context(IoSnafu { path: queue_path })?
                    .is_empty();
                if !at_tail {
                    return CorruptedRecordSnafu {
                        path: queue_path,
                        offset,
                        reason,
                    }
                    .fail();
                }
                warn!(path = ?queue_path, offset, %reason, "Invalid record at end of log");
                break Some(offset);
            }
        }
    };

    let Some(valid_len) = torn_at else {
        debug!(path = ?queue_path, records, "Log verified");
        return Ok((records, 0));
    };

    drop(reader);
    let file = OpenOptions::new()
        .write(true)
        .open(queue_path)
        .context(IoSnafu { path: queue_path })?;
    file.set_len(valid_len).context(IoSnafu { path: queue_path })?;
    file.sync_all().context(IoSnafu { path: queue_path })?;

    Ok((records, file_len - valid_len))
}

/// Removes pending entries left in a directory store by a crash.
pub(crate) fn recover_directory(dir: &Path) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();

    for entry in fs::read_dir(dir).context(IoSnafu { path: dir })? {
        let entry = entry.context(IoSnafu { path: dir })?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if is_pending_entry(name) {
            let path = entry.path();
            warn!(path = ?path, "Removing unfinished directory entry");
            fs::remove_file(&path).context(IoSnafu { path: &path })?;
            report.removed_pending += 1;
        }
    }

    if !report.is_clean() {
        info!(path = ?dir, ?report, "Directory store recovered");
    }
    Ok(report)
}

fn is_pending_entry(name: &str) -> bool {
    name.strip_prefix('.')
        .and_then(|rest| rest.strip_suffix(FILE_EXT_TMP))
        .and_then(|rest| rest.strip_suffix('.'))
        .and_then(parse_entry_name)
        .is_some()
}
