//! Log ingestion: per-project retention plus live forwarding of visible
//! lines to the render sink.

use std::collections::HashMap;

use devstack_core::{LogEvent, ProjectId};

use crate::filter::{FilterSelection, is_visible};
use crate::ring::{RingBuffer, RingStats};
use crate::sink::RenderSink;

/// What the log view currently shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    pub active_project: Option<ProjectId>,
    pub selection: FilterSelection,
}

impl ViewState {
    #[must_use]
    pub fn is_visible(&self, event: &LogEvent) -> bool {
        self.active_project
            .as_ref()
            .is_some_and(|project| is_visible(event, &self.selection, project))
    }
}

/// Whether newly ingested visible lines may go straight to the sink.
///
/// While a replay is repainting the view it owns the sink; lines pushed in
/// the meantime are picked up at the replay's tail so display order always
/// equals buffer order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarding {
    Live,
    DeferredToReplay,
}

/// Ring buffers keyed by project, created on first reference.
#[derive(Debug, Clone)]
pub struct LogStore {
    buffers: HashMap<ProjectId, RingBuffer<LogEvent>>,
    capacity: usize,
}

impl LogStore {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    #[must_use]
    pub fn buffer(&self, project: &ProjectId) -> Option<&RingBuffer<LogEvent>> {
        self.buffers.get(project)
    }

    fn buffer_mut(&mut self, project: &ProjectId) -> &mut RingBuffer<LogEvent> {
        let capacity = self.capacity;
        self.buffers
            .entry(project.clone())
            .or_insert_with(|| RingBuffer::with_capacity(capacity))
    }

    /// Drop every retained line for `project`; the buffer itself survives.
    pub fn clear_project(&mut self, project: &ProjectId) {
        if let Some(buffer) = self.buffers.get_mut(project) {
            buffer.clear();
        }
    }

    /// Discard the project's buffer entirely.
    pub fn remove_project(&mut self, project: &ProjectId) -> bool {
        self.buffers.remove(project).is_some()
    }

    #[must_use]
    pub fn project_count(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn stats(&self, project: &ProjectId) -> Option<RingStats> {
        self.buffers.get(project).map(RingBuffer::stats)
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug, Clone)]
pub struct IngestionPipeline {
    store: LogStore,
}

impl IngestionPipeline {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            store: LogStore::new(capacity),
        }
    }

    #[must_use]
    pub const fn store(&self) -> &LogStore {
        &self.store
    }

    pub const fn store_mut(&mut self) -> &mut LogStore {
        &mut self.store
    }

    /// Retain `event` in its own project's buffer and, when it is visible
    /// in the current view, forward its text. Returns whether it was
    /// written to the sink.
    pub fn on_event<S: RenderSink + ?Sized>(
        &mut self,
        event: LogEvent,
        view: &ViewState,
        forwarding: Forwarding,
        sink: &mut S,
    ) -> bool {
        let forward = forwarding == Forwarding::Live && view.is_visible(&event);
        let project = event.project_id.clone();
        let buffer = self.store.buffer_mut(&project);
        buffer.push(event);
        if forward && let Some(stored) = buffer.newest() {
            sink.append(&stored.text);
        }
        forward
    }

    /// Ingest a batch in feed order. Returns the number of lines written.
    pub fn on_batch<S: RenderSink + ?Sized>(
        &mut self,
        events: Vec<LogEvent>,
        view: &ViewState,
        forwarding: Forwarding,
        sink: &mut S,
    ) -> usize {
        let total = events.len();
        let mut written = 0;
        for event in events {
            if self.on_event(event, view, forwarding, sink) {
                written += 1;
            }
        }
        tracing::trace!(total, written, "ingested log batch");
        written
    }
}
