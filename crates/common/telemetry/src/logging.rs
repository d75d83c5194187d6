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
    env,
    io::IsTerminal,
    sync::{
        Arc, Mutex, Once, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use bon::Builder;
use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Deserializer, Serialize, de};
use smart_default::SmartDefault;
use snafu::ResultExt;
use tracing::{Level, Subscriber};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter, layer::SubscriberExt, registry::LookupSpan,
};

use crate::{
    LogBridgeSnafu, NotInitializedSnafu, ParseFilterSnafu, ReloadSnafu, Result, RollingFileSnafu,
    SetGlobalDefaultSnafu,
};

/// Deserializes a string value, using `Default::default()` if the string is
/// empty.
///
/// # Errors
/// Returns an error if deserialization fails.
pub fn empty_string_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let s = String::deserialize(deserializer)?;
    if s.is_empty() {
        Ok(T::default())
    } else {
        T::deserialize(de::value::StrDeserializer::new(&s)).map_err(|e: de::value::Error| {
            de::Error::custom(format!("invalid value, expect empty string, err: {e}"))
        })
    }
}

/// The default directory name for log files when file logging is enabled.
pub const DEFAULT_LOGGING_DIR: &str = "logs";

/// Handle for changing the target filter after initialization.
///
/// Only available after `init_global_logging` has been called.
pub static RELOAD_HANDLE: OnceCell<tracing_subscriber::reload::Handle<filter::Targets, Registry>> =
    OnceCell::new();

/// Per-level on/off switches.
///
/// `debug` events follow the `trace` switch. Disabling a level drops its
/// events everywhere, independently of the target filter.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct LevelSwitches {
    #[default = true]
    #[builder(default = true)]
    pub trace:   bool,
    #[default = true]
    #[builder(default = true)]
    pub info:    bool,
    #[default = true]
    #[builder(default = true)]
    pub warning: bool,
    #[default = true]
    #[builder(default = true)]
    pub error:   bool,
}

impl LevelSwitches {
    pub const ALL_OFF: Self = Self {
        trace:   false,
        info:    false,
        warning: false,
        error:   false,
    };

    /// Whether events at `level` pass these switches.
    #[must_use]
    pub fn allows(&self, level: &Level) -> bool {
        if *level == Level::ERROR {
            self.error
        } else if *level == Level::WARN {
            self.warning
        } else if *level == Level::INFO {
            self.info
        } else {
            self.trace
        }
    }
}

/// Live switch state read by the level layer.
struct SwitchState {
    trace:   AtomicBool,
    info:    AtomicBool,
    warning: AtomicBool,
    error:   AtomicBool,
}

static SWITCHES: SwitchState = SwitchState {
    trace:   AtomicBool::new(true),
    info:    AtomicBool::new(true),
    warning: AtomicBool::new(true),
    error:   AtomicBool::new(true),
};

/// Replaces the active level switches.
///
/// Takes effect for every callsite, including ones already registered.
pub fn set_level_switches(switches: LevelSwitches) {
    SWITCHES.trace.store(switches.trace, Ordering::Relaxed);
    SWITCHES.info.store(switches.info, Ordering::Relaxed);
    SWITCHES.warning.store(switches.warning, Ordering::Relaxed);
    SWITCHES.error.store(switches.error, Ordering::Relaxed);
    tracing::callsite::rebuild_interest_cache();
}

/// The level switches currently in force.
#[must_use]
pub fn level_switches() -> LevelSwitches {
    LevelSwitches {
        trace:   SWITCHES.trace.load(Ordering::Relaxed),
        info:    SWITCHES.info.load(Ordering::Relaxed),
        warning: SWITCHES.warning.load(Ordering::Relaxed),
        error:   SWITCHES.error.load(Ordering::Relaxed),
    }
}

/// Configuration options for the logging system.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct LoggingOptions {
    /// Directory for log files. Empty means stdout only.
    ///
    /// Files rotate hourly. The directory is created if missing.
    #[default = ""]
    #[builder(default, into)]
    pub dir: String,

    /// Target filter such as `"info"` or `"info,inmq_queue=trace"`. Falls
    /// back to `RUST_LOG`, then `info`.
    #[builder(into)]
    pub level: Option<String>,

    #[serde(default, deserialize_with = "empty_string_as_default")]
    #[builder(default)]
    pub log_format: LogFormat,

    /// Maximum number of rotated files kept per log kind.
    #[default = 720]
    #[builder(default = 720)]
    pub max_log_files: usize,

    /// Whether to write to stdout in addition to files.
    #[default = true]
    #[builder(default = true)]
    pub append_stdout: bool,

    /// Initial per-level switches.
    #[builder(default)]
    pub levels: LevelSwitches,
}

/// Available log output formats.
#[derive(
    Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize, Default, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per event.
    ///
    /// ```json
    /// {"timestamp":"2026-01-01T12:00:00Z","level":"INFO","target":"inmq_queue::queue","fields":{"message":"Queue initialized"}}
    /// ```
    #[display("json")]
    Json,

    /// ```text
    /// 2026-01-01T12:00:00.123Z  INFO inmq_queue::queue: Queue initialized
    /// ```
    #[default]
    #[display("text")]
    Text,
}

/// Initialize logging for unit tests.
///
/// Safe to call from every test; the first call wins.
///
/// # Environment Variables
///
/// * `UNITTEST_LOG_DIR` - Directory for test logs (default:
///   "/tmp/__unittest_logs")
/// * `UNITTEST_LOG_LEVEL` - Log level filter (default: "debug")
pub fn init_default_ut_logging() {
    static START: Once = Once::new();

    START.call_once(|| {
        let mut g = GLOBAL_UT_LOG_GUARD
            .as_ref()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let dir =
            env::var("UNITTEST_LOG_DIR").unwrap_or_else(|_| "/tmp/__unittest_logs".to_string());
        let level = env::var("UNITTEST_LOG_LEVEL").unwrap_or_else(|_| "debug".to_string());

        let opts = LoggingOptions {
            dir: dir.clone(),
            level: Some(level),
            ..Default::default()
        };
        match init_global_logging("unittest", &opts) {
            Ok(guards) => {
                *g = Some(guards);
                tracing::info!("logs dir = {}", dir);
            }
            Err(e) => eprintln!("unit test logging disabled: {e}"),
        }
    });
}

/// Keeps the unit test writer guards alive for the whole test binary.
static GLOBAL_UT_LOG_GUARD: Lazy<Arc<Mutex<Option<Vec<WorkerGuard>>>>> =
    Lazy::new(|| Arc::new(Mutex::new(None)));

/// Fallback when neither `level` nor `RUST_LOG` is set.
const DEFAULT_LOG_TARGETS: &str = "info";

/// Install the global subscriber.
///
/// # Logging Layers
///
/// - **Level switches**: drops events whose level is switched off
/// - **Target filter**: reloadable through [`reload_log_targets`]
/// - **Stdout**: if `append_stdout`
/// - **File**: `<dir>/<app_name>.<hour>` with hourly rotation, if `dir` is set
/// - **Error file**: error-only copy in `<dir>/<app_name>-err.<hour>`
///
/// Only the first call installs anything; later calls return no guards.
pub fn init_global_logging(app_name: &str, opts: &LoggingOptions) -> Result<Vec<WorkerGuard>> {
    static START: Once = Once::new();
    let mut result = Ok(Vec::new());

    START.call_once(|| result = install(app_name, opts));

    result
}

/// Replace the target filter of the installed subscriber.
pub fn reload_log_targets(targets: &str) -> Result<()> {
    let filter = parse_targets(targets)?;
    let handle = RELOAD_HANDLE.get().ok_or_else(|| NotInitializedSnafu.build())?;
    handle.reload(filter).context(ReloadSnafu)
}

fn parse_targets(targets: &str) -> Result<filter::Targets> {
    targets.parse::<filter::Targets>().context(ParseFilterSnafu {
        filter: targets.to_string(),
    })
}

fn install(app_name: &str, opts: &LoggingOptions) -> Result<Vec<WorkerGuard>> {
    let mut guards = vec![];

    set_level_switches(opts.levels);

    let stdout_logging_layer = if opts.append_stdout {
        let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
        guards.push(guard);
        Some(fmt_layer(writer, opts.log_format, std::io::stdout().is_terminal()))
    } else {
        None
    };

    let (file_logging_layer, err_file_logging_layer) = if opts.dir.is_empty() {
        (None, None)
    } else {
        let (writer, guard) = tracing_appender::non_blocking(rolling_appender(
            &opts.dir,
            app_name,
            opts.max_log_files,
        )?);
        guards.push(guard);
        let file_layer = fmt_layer(writer, opts.log_format, false);

        let (writer, guard) = tracing_appender::non_blocking(rolling_appender(
            &opts.dir,
            &format!("{app_name}-err"),
            opts.max_log_files,
        )?);
        guards.push(guard);
        let err_layer = fmt_layer(writer, opts.log_format, false)
            .with_filter(filter::LevelFilter::ERROR)
            .boxed();

        (Some(file_layer), Some(err_layer))
    };

    let env_level = env::var(EnvFilter::DEFAULT_ENV).ok();
    let targets = opts
        .level
        .as_deref()
        .or(env_level.as_deref())
        .unwrap_or(DEFAULT_LOG_TARGETS);
    let (dyn_filter, reload_handle) =
        tracing_subscriber::reload::Layer::new(parse_targets(targets)?);

    let level_switch_layer = filter::filter_fn(|metadata| {
        level_switches().allows(metadata.level())
    });

    let subscriber = Registry::default()
        .with(dyn_filter)
        .with(level_switch_layer)
        .with(stdout_logging_layer)
        .with(file_logging_layer)
        .with(err_file_logging_layer);

    LogTracer::init().context(LogBridgeSnafu)?;
    tracing::subscriber::set_global_default(subscriber).context(SetGlobalDefaultSnafu)?;
    // The subscriber is installed; a second handle would never be reachable.
    let _ = RELOAD_HANDLE.set(reload_handle);

    Ok(guards)
}

fn rolling_appender(dir: &str, prefix: &str, max_files: usize) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::HOURLY)
        .filename_prefix(prefix)
        .max_log_files(max_files)
        .build(dir)
        .context(RollingFileSnafu { dir })
}

fn fmt_layer<S, W>(writer: W, format: LogFormat, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => tracing_subscriber::fmt::Layer::new()
            .json()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::Layer::new()
            .with_writer(writer)
            .with_ansi(ansi)
            .boxed(),
    }
}
