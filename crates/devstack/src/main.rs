//! devstack - headless dev-stack log console
//!
//! Reads newline-delimited JSON from stdin (log lines, status snapshots,
//! and view/control commands), renders the filtered log view to stdout,
//! and reports outbound start/stop/open-url requests on stderr.

#![forbid(unsafe_code)]

use std::io::{self, BufRead, IsTerminal};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use clap::{Parser, Subcommand};
use devstack_console::{
    ANSI_CLEAR_SCREEN, Console, ConsoleMsg, ConsoleRuntime, ControlError, FeedBatcher,
    FeedBatcherHandle, FeedEvent, FilterSelection, LevelFilter, LogFeed, ManagerEvent,
    RequestReply, ServiceControl, SourceFilter, WriterSink,
};
use devstack_core::{Config, CoreError, LogEvent, LogLevel, ProjectId, ServiceKey, StatusSnapshot};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "devstack")]
#[command(version, about = "Headless dev-stack log console")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a live log view from NDJSON on stdin (default)
    Console {
        /// Project shown initially
        #[arg(long)]
        project: Option<String>,

        /// Initial source filter: all, system, or a service name
        #[arg(long, default_value = "all")]
        source: String,

        /// Initial level filter: all, normal, or error
        #[arg(long, default_value = "all", value_parser = parse_level_filter)]
        level: LevelFilter,

        /// Coalesce incoming log lines through the batching forwarder.
        /// Batched lines may trail commands read after them.
        #[arg(long)]
        batch: bool,

        /// Clear the terminal on every re-render (default when stdout is a tty)
        #[arg(long)]
        clear_screen: bool,
    },
    /// Show the effective configuration
    Config,
}

fn parse_level_filter(raw: &str) -> Result<LevelFilter, String> {
    LevelFilter::from_str(raw).map_err(|err| err.to_string())
}

/// One line of console input.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum InputLine {
    Log(LogEvent),
    LogBatch(Vec<LogEvent>),
    Status(StatusSnapshot),
    Project(Option<ProjectId>),
    Filter(FilterSelection),
    RemoveProject(ProjectId),
    Clear,
    Start(ServiceKey),
    Stop(ServiceKey),
    OpenUrl(ServiceKey),
    Search(String),
    FindNext,
    FindPrevious,
}

/// Outbound request as reported on stderr.
#[derive(Debug, Serialize)]
#[serde(tag = "request", rename_all = "snake_case")]
enum OutboundRequest<'a> {
    Start { key: &'a ServiceKey, request_id: u64 },
    Stop { key: &'a ServiceKey, request_id: u64 },
    OpenUrl { url: &'a str },
}

/// Control surface for headless runs: every request is reported on stderr,
/// acknowledged at once, and announced in the project's log as a system line.
struct StdioControl {
    feed: LogFeed,
    reported: AtomicU64,
}

impl StdioControl {
    const fn new(feed: LogFeed) -> Self {
        Self {
            feed,
            reported: AtomicU64::new(0),
        }
    }

    fn report(&self, request: &OutboundRequest<'_>) {
        match serde_json::to_string(request) {
            Ok(json) => {
                eprintln!("{json}");
                self.reported.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => tracing::warn!(error = %err, "failed to encode outbound request"),
        }
    }

    fn announce(&self, key: &ServiceKey, verb: &str) {
        let notice = LogEvent::system(
            key.project_id.clone(),
            LogLevel::Normal,
            &format!("{verb} {}", key.service_id),
        );
        self.feed.publish(&FeedEvent::Log(notice));
    }
}

impl ServiceControl for StdioControl {
    fn request_start(&self, key: &ServiceKey, reply: RequestReply) {
        self.report(&OutboundRequest::Start {
            key,
            request_id: reply.request_id().0,
        });
        self.announce(key, "Starting");
        reply.complete(Ok(()));
    }

    fn request_stop(&self, key: &ServiceKey, reply: RequestReply) {
        self.report(&OutboundRequest::Stop {
            key,
            request_id: reply.request_id().0,
        });
        self.announce(key, "Stopping");
        reply.complete(Ok(()));
    }

    fn request_open_url(&self, url: &str) -> Result<(), ControlError> {
        self.report(&OutboundRequest::OpenUrl { url });
        Ok(())
    }
}

fn main() {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Console {
        project: None,
        source: "all".to_string(),
        level: LevelFilter::All,
        batch: false,
        clear_screen: false,
    });

    // Logs go to stderr; stdout belongs to the rendered view.
    let default_level = match (&command, cli.verbose) {
        (_, true) => "debug",
        (Commands::Console { .. }, false) => "warn",
        (Commands::Config, false) => "info",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config = Config::from_env();
    if cli.verbose {
        tracing::info!("Configuration loaded: {:?}", config);
    }

    let result = match command {
        Commands::Config => print_config(&config),
        Commands::Console {
            project,
            source,
            level,
            batch,
            clear_screen,
        } => {
            let options = ConsoleOptions {
                project: project.map(ProjectId::new),
                selection: FilterSelection::new(SourceFilter::from(source), level),
                batch,
                clear_screen: clear_screen || io::stdout().is_terminal(),
            };
            run_console(&config, options)
        }
    };

    if let Err(err) = result {
        tracing::error!(error_type = err.error_type(), "devstack failed: {err}");
        std::process::exit(1);
    }
}

fn print_config(config: &Config) -> Result<(), CoreError> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

struct ConsoleOptions {
    project: Option<ProjectId>,
    selection: FilterSelection,
    batch: bool,
    clear_screen: bool,
}

fn run_console(config: &Config, options: ConsoleOptions) -> Result<(), CoreError> {
    let feed = LogFeed::new();
    let mut sink = WriterSink::new(io::stdout());
    if options.clear_screen {
        sink = sink.with_clear_sequence(ANSI_CLEAR_SCREEN);
    }
    let (mut console, inbox) = Console::new(config, sink, StdioControl::new(feed.clone()));
    // A failed subscription is logged; the console still renders commands.
    let _ = console.attach_feed(&feed);
    console.set_filter(options.selection);
    console.set_project(options.project);

    let runtime = ConsoleRuntime::spawn(console, inbox)?;
    let mut batcher = if options.batch {
        match FeedBatcher::new(feed.clone(), config).start() {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::warn!(error = %err, "feed batcher unavailable, forwarding lines directly");
                None
            }
        }
    } else {
        None
    };

    let stdin = io::stdin();
    let mut lines_read = 0_u64;
    for (idx, line) in stdin.lock().lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        lines_read += 1;
        let input = match serde_json::from_str::<InputLine>(trimmed) {
            Ok(input) => input,
            Err(err) => {
                tracing::warn!(line = idx + 1, error = %err, "skipping malformed input line");
                continue;
            }
        };
        let msg = match input {
            InputLine::Log(event) => {
                forward(&feed, batcher.as_ref(), FeedEvent::Log(event));
                continue;
            }
            InputLine::LogBatch(events) => {
                forward(&feed, batcher.as_ref(), FeedEvent::LogBatch(events));
                continue;
            }
            InputLine::Status(snapshot) => {
                forward(&feed, batcher.as_ref(), FeedEvent::Status(snapshot));
                continue;
            }
            InputLine::Project(project) => ConsoleMsg::SetProject(project),
            InputLine::Filter(selection) => ConsoleMsg::SetFilter(selection),
            InputLine::RemoveProject(project) => ConsoleMsg::RemoveProject(project),
            InputLine::Clear => ConsoleMsg::ClearLogs,
            InputLine::Start(key) => ConsoleMsg::Start(key),
            InputLine::Stop(key) => ConsoleMsg::Stop(key),
            InputLine::OpenUrl(key) => ConsoleMsg::OpenUrl(key),
            InputLine::Search(query) => ConsoleMsg::Search(query),
            InputLine::FindNext => ConsoleMsg::FindNext,
            InputLine::FindPrevious => ConsoleMsg::FindPrevious,
        };
        if !runtime.send(msg) {
            tracing::warn!("console exited early, ignoring remaining input");
            break;
        }
    }

    // Flush batched lines before the console drains its mailbox.
    if let Some(mut handle) = batcher.take() {
        handle.stop();
        tracing::debug!(stats = ?handle.stats(), "feed batcher drained");
    }
    feed.close();

    if let Some(console) = runtime.shutdown() {
        let store = console.store();
        tracing::info!(
            lines_read,
            projects = store.project_count(),
            requests = console.control().reported.load(Ordering::Relaxed),
            "console finished"
        );
    }
    Ok(())
}

/// Publish `event`, or queue it behind earlier lines when a batcher is
/// running. Batches are queued line by line so feed order holds.
fn forward(feed: &LogFeed, batcher: Option<&FeedBatcherHandle>, event: FeedEvent) {
    let Some(handle) = batcher else {
        feed.publish(&event);
        return;
    };
    match event {
        FeedEvent::Log(line) => {
            handle.send(ManagerEvent::Log(line));
        }
        FeedEvent::LogBatch(lines) => {
            for line in lines {
                handle.send(ManagerEvent::Log(line));
            }
        }
        FeedEvent::Status(snapshot) => {
            handle.send(ManagerEvent::Status(snapshot));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_lines_use_tagged_wire_format() {
        let start: InputLine =
            serde_json::from_str(r#"{"type":"start","data":"p1:web"}"#).unwrap();
        assert!(matches!(start, InputLine::Start(key) if key == ServiceKey::new("p1", "web")));

        let clear: InputLine = serde_json::from_str(r#"{"type":"clear"}"#).unwrap();
        assert!(matches!(clear, InputLine::Clear));

        let filter: InputLine =
            serde_json::from_str(r#"{"type":"filter","data":{"source":"api","level":"error"}}"#)
                .unwrap();
        assert!(matches!(
            filter,
            InputLine::Filter(selection)
                if selection == FilterSelection::new("api", LevelFilter::Error)
        ));

        let none: InputLine = serde_json::from_str(r#"{"type":"project","data":null}"#).unwrap();
        assert!(matches!(none, InputLine::Project(None)));
    }

    #[test]
    fn log_lines_parse_with_status_keys() {
        let log: InputLine = serde_json::from_str(
            r#"{"type":"log","data":{"source":"Web","level":"error","text":"boom","timestamp":"12:00:00.000","project_id":"p1"}}"#,
        )
        .unwrap();
        let InputLine::Log(event) = log else {
            panic!("expected log line");
        };
        assert_eq!(event.source.as_str(), "web");
        assert_eq!(event.level, LogLevel::Error);

        let status: InputLine = serde_json::from_str(
            r#"{"type":"status","data":{"services":{"p1:web":{"running":true,"url":"http://localhost:3000"}}}}"#,
        )
        .unwrap();
        let InputLine::Status(snapshot) = status else {
            panic!("expected status");
        };
        assert!(snapshot.services[&ServiceKey::new("p1", "web")].running);
    }

    #[test]
    fn batched_input_keeps_feed_order() {
        let feed = LogFeed::new();
        let (tx, rx) = std::sync::mpsc::channel();
        let _sub = feed
            .subscribe(move |event| tx.send(event.clone()).is_ok())
            .unwrap();
        let config = Config::default();
        let mut handle = FeedBatcher::new(feed.clone(), &config)
            .with_flush_interval(std::time::Duration::from_secs(60))
            .start()
            .unwrap();

        let project = ProjectId::new("p1");
        let line = |text: &str| {
            LogEvent::new(project.clone(), "web".to_string().into(), LogLevel::Normal, text)
        };
        forward(&feed, Some(&handle), FeedEvent::Log(line("A first")));
        forward(&feed, Some(&handle), FeedEvent::LogBatch(vec![line("B second")]));
        handle.stop();

        let texts: Vec<String> = rx
            .try_iter()
            .flat_map(|event| match event {
                FeedEvent::Log(line) => vec![line.text],
                FeedEvent::LogBatch(lines) => lines.into_iter().map(|line| line.text).collect(),
                FeedEvent::Status(_) => Vec::new(),
            })
            .collect();
        assert_eq!(texts, ["A first", "B second"]);
    }

    #[test]
    fn outbound_requests_are_tagged() {
        let key = ServiceKey::new("p1", "api");
        let json = serde_json::to_value(OutboundRequest::Stop {
            key: &key,
            request_id: 4,
        })
        .unwrap();
        assert_eq!(json["request"], "stop");
        assert_eq!(json["key"], "p1:api");
        assert_eq!(json["request_id"], 4);
    }

    #[test]
    fn level_filter_flag_rejects_unknown_values() {
        assert_eq!(parse_level_filter("Error"), Ok(LevelFilter::Error));
        assert!(parse_level_filter("loud").is_err());
    }

    #[test]
    fn cli_parses_console_flags() {
        let cli = Cli::try_parse_from([
            "devstack", "console", "--project", "p1", "--source", "api", "--level", "error",
            "--batch",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Console {
                project,
                source,
                level,
                batch,
                ..
            }) => {
                assert_eq!(project.as_deref(), Some("p1"));
                assert_eq!(source, "api");
                assert_eq!(level, LevelFilter::Error);
                assert!(batch);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
