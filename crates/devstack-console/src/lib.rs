//! Log ingestion, retention, and incremental rendering for the devstack
//! console.
//!
//! This crate provides:
//! - Per-project ring buffers of recent log lines (`ring`, `ingest`)
//! - The source × level × project visibility predicate (`filter`)
//! - Chunked, cancellable re-rendering after view changes (`replay`)
//! - Service running/loading/URL reconciliation (`status`)
//! - The inbound feed and its batching forwarder (`feed`)
//! - The single-threaded console tying it together (`console`)

#![forbid(unsafe_code)]

pub mod console;
pub mod control;
pub mod feed;
pub mod filter;
pub mod ingest;
pub mod replay;
pub mod ring;
pub mod sink;
pub mod status;

pub use console::{Console, ConsoleMsg, ConsoleRuntime};
pub use control::{
    ControlError, RecordingControl, RequestId, RequestKind, RequestReply, ServiceControl,
};
pub use feed::{
    BatcherStats, FeedBatcher, FeedBatcherHandle, FeedCallback, FeedError, FeedEvent, LogFeed,
    ManagerEvent, Subscription,
};
pub use filter::{FilterSelection, LevelFilter, SourceFilter, is_visible};
pub use ingest::{Forwarding, IngestionPipeline, LogStore, ViewState};
pub use replay::{ChunkOutcome, IncrementalRenderer, ReplayToken};
pub use ring::{DEFAULT_RING_CAPACITY, RingBuffer, RingStats};
pub use sink::{ANSI_CLEAR_SCREEN, MemorySink, RenderSink, WriterSink};
pub use status::{ServicePhase, ServiceStatusReconciler, ServiceView};
