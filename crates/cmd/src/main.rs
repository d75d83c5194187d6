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
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use inmq_common_telemetry::{
    logging::{LevelSwitches, LogFormat, LoggingOptions, init_global_logging},
    panic_hook::set_panic_hook,
};
use inmq_queue::{EncodingKind, FlushMode, Message, Queue, QueueBuilder, QueueError, StoreKind};
use rand::{Rng, thread_rng};
use snafu::{ResultExt, Whatever};

mod build_info;

#[derive(Debug, Parser)]
#[clap(
name = "inmq",
about= "Persistent FIFO queue on the local filesystem",
author = build_info::AUTHOR,
version = build_info::FULL_VERSION)]
struct Cli {
    #[command(flatten)]
    queue: QueueArgs,

    #[command(flatten)]
    logging: LoggingArgs,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Send(SendArgs),
    Recv(RecvArgs),
    Peek(PeekArgs),
    Demo(DemoArgs),
}

#[derive(Debug, Clone, Args)]
struct QueueArgs {
    /// Directory holding the queue files.
    #[arg(long, global = true, default_value = "./queue_data")]
    base_path: PathBuf,

    /// Queue name.
    #[arg(long, global = true, default_value = inmq_queue::DEFAULT_QUEUE_NAME)]
    name: String,

    /// `log` or `directory`.
    #[arg(long, global = true, default_value = "log")]
    store: StoreKind,

    /// `msgpack`, `json` or `bincode`.
    #[arg(long, global = true, default_value = "msgpack")]
    encoding: EncodingKind,

    /// `sync` or `async`.
    #[arg(long, global = true, default_value = "sync")]
    flush: FlushMode,

    /// Skip the startup scan that drops a torn trailing record.
    #[arg(long, global = true)]
    no_verify: bool,
}

impl QueueArgs {
    fn open(&self) -> Result<Queue, Whatever> {
        QueueBuilder::new(&self.base_path)
            .name(&self.name)
            .store(self.store)
            .encoding(self.encoding)
            .flush_mode(self.flush)
            .verify_on_startup(!self.no_verify)
            .build()
            .with_whatever_context(|_| {
                format!("failed to open queue '{}' in {}", self.name, self.base_path.display())
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LevelArg {
    Trace,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Args)]
struct LoggingArgs {
    /// Write rolling log files into this directory.
    #[arg(long, global = true)]
    log_dir: Option<String>,

    /// Target filter, e.g. `info,inmq_queue=trace`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit JSON log lines instead of text.
    #[arg(long, global = true)]
    log_json: bool,

    /// Also log to stdout.
    #[arg(long, global = true)]
    log_stdout: bool,

    /// Switch a level off. Repeatable.
    #[arg(long = "disable-level", global = true, value_enum)]
    disabled_levels: Vec<LevelArg>,
}

impl LoggingArgs {
    fn options(&self) -> LoggingOptions {
        let disabled = |level| self.disabled_levels.contains(&level);

        LoggingOptions::builder()
            .dir(self.log_dir.clone().unwrap_or_default())
            .maybe_level(self.log_level.clone())
            .log_format(if self.log_json {
                LogFormat::Json
            } else {
                LogFormat::Text
            })
            .append_stdout(self.log_stdout)
            .levels(LevelSwitches {
                trace:   !disabled(LevelArg::Trace),
                info:    !disabled(LevelArg::Info),
                warning: !disabled(LevelArg::Warning),
                error:   !disabled(LevelArg::Error),
            })
            .build()
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Send one message per body argument.
Examples:

inmq send hello world
inmq --store directory send --priority 5 urgent

")]
struct SendArgs {
    /// Message bodies, sent in order.
    #[arg(required = true)]
    bodies: Vec<String>,

    #[arg(long, default_value = "")]
    id: String,

    #[arg(long, default_value_t = 0)]
    priority: i64,

    #[arg(long, default_value = "")]
    deadline_at: String,
}

impl SendArgs {
    fn run(&self, queue: &Queue) -> Result<(), Whatever> {
        let producer = queue.producer();
        for body in &self.bodies {
            let message = Message::new(body.as_str())
                .with_id(self.id.as_str())
                .with_priority(self.priority)
                .with_deadline_at(self.deadline_at.as_str());
            producer
                .send(message)
                .whatever_context("failed to send message")?;
            println!("sent: {body}");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Receive and remove messages from the head of the queue.
Examples:

inmq recv
inmq recv --count 10 --timeout-ms 500

")]
struct RecvArgs {
    #[arg(long, default_value_t = 1)]
    count: usize,

    /// Give up after this long without a message. Blocks forever if unset.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

impl RecvArgs {
    fn run(&self, queue: &Queue) -> Result<(), Whatever> {
        let consumer = queue.consumer();
        for _ in 0..self.count {
            let received = match self.timeout_ms {
                Some(ms) => consumer.recv_timeout(Duration::from_millis(ms)),
                None => consumer.recv(),
            };
            match received {
                Ok(message) => print_message(&message),
                Err(QueueError::Timeout { .. }) => {
                    println!("no message within timeout");
                    break;
                }
                Err(e) => return Err(e).whatever_context("failed to receive message"),
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

List pending messages without removing them.
Examples:

inmq peek

")]
struct PeekArgs {}

impl PeekArgs {
    fn run(&self, queue: &Queue) -> Result<(), Whatever> {
        let messages = queue
            .snapshot()
            .whatever_context("failed to read queue")?;
        println!("{} pending message(s)", messages.len());
        for message in &messages {
            print_message(message);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Run a producer and a consumer thread against the queue, each pausing a
random time between operations, until Ctrl-C or --count messages.
Examples:

inmq demo
inmq --store directory demo --count 20 --max-delay-ms 200

")]
struct DemoArgs {
    /// Stop after this many messages have been received.
    #[arg(long)]
    count: Option<u64>,

    /// Upper bound of the random pause between operations.
    #[arg(long, default_value_t = 1000)]
    max_delay_ms: u64,
}

impl DemoArgs {
    fn run(&self, queue: &Queue) -> Result<(), Whatever> {
        let stop = Arc::new(AtomicBool::new(false));
        {
            let stop = stop.clone();
            ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
                .whatever_context("failed to install Ctrl-C handler")?;
        }

        let sender = {
            let producer = queue.producer();
            let stop = stop.clone();
            let max_delay_ms = self.max_delay_ms;
            thread::spawn(move || -> Result<(), QueueError> {
                let mut i = 1u64;
                while !stop.load(Ordering::SeqCst) {
                    thread::sleep(jitter(max_delay_ms));
                    let message = Message::new(format!("This is message # {i}"));
                    println!("Send: {}", message.body);
                    producer.send(message)?;
                    i += 1;
                }
                Ok(())
            })
        };

        let consumer = queue.consumer();
        let mut received = 0u64;
        while !stop.load(Ordering::SeqCst) && self.count.is_none_or(|n| received < n) {
            thread::sleep(jitter(self.max_delay_ms));
            match consumer.recv_timeout(Duration::from_millis(200)) {
                Ok(message) => {
                    received += 1;
                    println!(
                        "Recv: {} was sent: {} :: {} ago",
                        message.body,
                        message.created_at,
                        age(&message.created_at)
                    );
                }
                Err(QueueError::Timeout { .. }) => {}
                Err(e) => {
                    stop.store(true, Ordering::SeqCst);
                    return Err(e).whatever_context("consumer failed");
                }
            }
        }

        stop.store(true, Ordering::SeqCst);
        match sender.join() {
            Ok(result) => result.whatever_context("producer failed"),
            Err(_) => snafu::whatever!("producer thread panicked"),
        }
    }
}

/// Random pause of up to `max_ms`.
fn jitter(max_ms: u64) -> Duration {
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(thread_rng().gen_range(0..max_ms))
}

fn age(created_at: &str) -> String {
    DateTime::parse_from_rfc3339(created_at).map_or_else(
        |_| "unknown".to_string(),
        |sent| {
            let elapsed = Utc::now().signed_duration_since(sent.with_timezone(&Utc));
            format!("{}ms", elapsed.num_milliseconds())
        },
    )
}

fn print_message(message: &Message) {
    println!(
        "[{}] id={:?} priority={} deadline={:?} {}",
        message.created_at, message.id, message.priority, message.deadline_at, message.body
    );
}

fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();

    let _guards = init_global_logging("inmq", &cli.logging.options())
        .whatever_context("failed to initialize logging")?;
    set_panic_hook();
    tracing::info!(version = build_info::FULL_VERSION, "inmq starting");

    let queue = cli.queue.open()?;
    let result = match &cli.commands {
        Commands::Send(args) => args.run(&queue),
        Commands::Recv(args) => args.run(&queue),
        Commands::Peek(args) => args.run(&queue),
        Commands::Demo(args) => args.run(&queue),
    };

    queue
        .shutdown()
        .whatever_context("failed to shut down queue")?;
    result
}
