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

use std::{
    io,
    path::{Path, PathBuf},
};

/// Extension of the log store's queue file.
pub const FILE_EXT_QUEUE: &str = "wal";

/// Extension of the log store's compaction file.
pub const FILE_EXT_TMP: &str = "tmp";

/// Number of digits in a directory-store entry name.
pub const ENTRY_NAME_WIDTH: usize = 10;

/// Returns the log store's queue file: `base/<name>.wal`.
pub fn queue_file_path<P: AsRef<Path>>(base: P, name: &str) -> PathBuf {
    base.as_ref().join(format!("{name}.{FILE_EXT_QUEUE}"))
}

/// Returns the log store's compaction file: `base/<name>.tmp`.
pub fn tmp_file_path<P: AsRef<Path>>(base: P, name: &str) -> PathBuf {
    base.as_ref().join(format!("{name}.{FILE_EXT_TMP}"))
}

/// Returns the directory store's directory: `base/<name>`.
pub fn queue_dir_path<P: AsRef<Path>>(base: P, name: &str) -> PathBuf { base.as_ref().join(name) }

/// Generates a directory-store entry name: `NNNNNNNNNN`.
pub fn entry_name(sequence: u64) -> String { format!("{sequence:010}") }

/// Name under which an entry is written before it is renamed into place.
///
/// The leading dot and suffix keep it out of [`parse_entry_name`].
pub fn pending_entry_name(sequence: u64) -> String { format!(".{sequence:010}.{FILE_EXT_TMP}") }

/// Parses an entry name, accepting exactly ten ASCII digits.
pub fn parse_entry_name(name: &str) -> Option<u64> {
    if name.len() != ENTRY_NAME_WIDTH || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// Lists the sequence-named entries of a directory, sorted ascending.
///
/// Anything that is not a ten-digit file name is skipped.
pub fn scan_entries<P: AsRef<Path>>(dir: P) -> io::Result<Vec<(u64, PathBuf)>> {
    let mut entries = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let Some(sequence) = entry.file_name().to_str().and_then(parse_entry_name) else {
            continue;
        };
        if entry.file_type()?.is_file() {
            entries.push((sequence, entry.path()));
        }
    }

    entries.sort_unstable_by_key(|(sequence, _)| *sequence);
    Ok(entries)
}
