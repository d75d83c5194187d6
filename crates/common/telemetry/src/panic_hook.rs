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

//! Panics are logged as structured `tracing` events before the default hook
//! runs, so a panicking gate thread leaves a trace in the log files.

use std::{panic, sync::LazyLock};

use backtrace::Backtrace;
use prometheus::{IntCounter, register_int_counter};

/// Number of panics observed since the hook was installed.
///
/// `None` if the counter could not be registered in the default registry.
pub static PANIC_COUNTER: LazyLock<Option<IntCounter>> =
    LazyLock::new(|| register_int_counter!("inmq_panic_counter", "panic_counter").ok());

/// Chain a logging hook in front of the current panic hook.
pub fn set_panic_hook() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic| {
        let backtrace = Backtrace::new();
        let backtrace = format!("{backtrace:?}");
        let thread = std::thread::current();
        let thread = thread.name().unwrap_or("<unnamed>");

        if let Some(location) = panic.location() {
            tracing::error!(
                message = %panic,
                backtrace = %backtrace,
                thread,
                panic.file = location.file(),
                panic.line = location.line(),
                panic.column = location.column(),
            );
        } else {
            tracing::error!(message = %panic, backtrace = %backtrace, thread);
        }
        if let Some(counter) = PANIC_COUNTER.as_ref() {
            counter.inc();
        }
        default_hook(panic);
    }));
}
