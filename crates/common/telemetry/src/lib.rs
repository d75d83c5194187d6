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

//! # Telemetry
//!
//! Logging setup shared by the inmq binaries and tests.
//!
//! - **[`logging`]**: stdout and rolling-file layers, text or JSON output,
//!   a reloadable target filter, and four independently switchable levels
//!   (trace, info, warning, error).
//! - **[`panic_hook`]**: panics are logged through `tracing` with a
//!   backtrace before the default hook runs.
//!
//! ```rust,no_run
//! use inmq_common_telemetry::{logging::{LoggingOptions, init_global_logging}, panic_hook::set_panic_hook};
//!
//! let _guards = init_global_logging("inmq", &LoggingOptions::default()).unwrap();
//! set_panic_hook();
//!
//! tracing::info!("Application started");
//! ```
//!
//! Library crates only emit events through the `tracing` macros. Without an
//! installed subscriber those calls do nothing.

pub mod logging;
pub mod panic_hook;

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TelemetryError {
    #[snafu(display("Failed to bridge log records into tracing"))]
    LogBridge { source: tracing_log::log::SetLoggerError },

    #[snafu(display("Failed to create rolling log file in {dir}"))]
    RollingFile {
        dir:    String,
        source: tracing_appender::rolling::InitError,
    },

    #[snafu(display("Invalid log level filter '{filter}'"))]
    ParseFilter {
        filter: String,
        source: tracing_subscriber::filter::ParseError,
    },

    #[snafu(display("A global tracing subscriber is already installed"))]
    SetGlobalDefault {
        source: tracing::subscriber::SetGlobalDefaultError,
    },

    #[snafu(display("Logging has not been initialized"))]
    NotInitialized,

    #[snafu(display("Failed to reload log filter"))]
    Reload {
        source: tracing_subscriber::reload::Error,
    },
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
