//! Chunked re-render of a project's buffer after the view changes.
//!
//! A replay walks the buffer by sequence number, so lines pushed while it
//! is in flight are picked up at its tail and evicted lines are skipped.
//! Every chunk re-checks its token against the latest one issued; a
//! superseded job stops without touching the sink.

use crate::ingest::{Forwarding, LogStore, ViewState};
use crate::sink::RenderSink;

/// Identity of one replay request. Later requests compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplayToken(u64);

impl ReplayToken {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Result of running one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// The token was superseded; nothing was written.
    Stale,
    /// Work remains; schedule another chunk.
    Yield,
    /// The view now shows every visible buffered line.
    Done,
}

#[derive(Debug, Clone)]
struct ReplayJob {
    token: ReplayToken,
    view: ViewState,
    next_seq: u64,
    written: usize,
}

#[derive(Debug, Clone)]
pub struct IncrementalRenderer {
    latest: u64,
    chunk_size: usize,
    job: Option<ReplayJob>,
}

impl IncrementalRenderer {
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            latest: 0,
            chunk_size: chunk_size.max(1),
            job: None,
        }
    }

    /// Supersede any running replay, clear the sink, and start a new job
    /// for `view`. The caller drives it with [`Self::run_chunk`].
    pub fn begin<S: RenderSink + ?Sized>(&mut self, view: &ViewState, sink: &mut S) -> ReplayToken {
        self.latest += 1;
        let token = ReplayToken(self.latest);
        if let Some(previous) = self.job.take() {
            tracing::trace!(
                superseded = previous.token.get(),
                token = token.get(),
                "replay superseded"
            );
        }
        sink.clear();
        self.job = Some(ReplayJob {
            token,
            view: view.clone(),
            next_seq: 0,
            written: 0,
        });
        token
    }

    /// Write the next chunk of job `token`.
    pub fn run_chunk<S: RenderSink + ?Sized>(
        &mut self,
        token: ReplayToken,
        store: &LogStore,
        sink: &mut S,
    ) -> ChunkOutcome {
        let latest = self.latest;
        let Some(job) = self
            .job
            .as_mut()
            .filter(|job| job.token == token && token.0 == latest)
        else {
            tracing::trace!(token = token.get(), latest, "stale replay chunk dropped");
            return ChunkOutcome::Stale;
        };

        let Some(buffer) = job
            .view
            .active_project
            .as_ref()
            .and_then(|project| store.buffer(project))
        else {
            self.job = None;
            return ChunkOutcome::Done;
        };

        let cursor = job.next_seq.max(buffer.first_seq());
        let end = buffer
            .next_seq()
            .min(cursor.saturating_add(self.chunk_size as u64));
        for seq in cursor..end {
            if let Some(event) = buffer.get_seq(seq)
                && job.view.is_visible(event)
            {
                sink.append(&event.text);
                job.written += 1;
            }
        }
        job.next_seq = end;

        if end < buffer.next_seq() {
            return ChunkOutcome::Yield;
        }
        tracing::debug!(token = token.get(), written = job.written, "replay complete");
        self.job = None;
        ChunkOutcome::Done
    }

    /// Live lines must wait for the replay while one is in flight.
    #[must_use]
    pub const fn forwarding(&self) -> Forwarding {
        if self.job.is_some() {
            Forwarding::DeferredToReplay
        } else {
            Forwarding::Live
        }
    }

    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.job.is_none()
    }

    /// Token of the most recent replay, if any was ever started.
    #[must_use]
    pub const fn latest(&self) -> Option<ReplayToken> {
        if self.latest == 0 {
            None
        } else {
            Some(ReplayToken(self.latest))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterSelection, LevelFilter};
    use crate::ingest::IngestionPipeline;
    use crate::sink::MemorySink;
    use devstack_core::{LogEvent, LogLevel, LogSource, ProjectId};
    use proptest::prelude::*;

    fn line(project: &str, source: &str, level: LogLevel, text: &str) -> LogEvent {
        LogEvent {
            source: LogSource::from(source.to_string()),
            level,
            text: text.to_string(),
            timestamp: "00:00:00.000".into(),
            project_id: ProjectId::new(project),
        }
    }

    fn view(project: &str, selection: FilterSelection) -> ViewState {
        ViewState {
            active_project: Some(ProjectId::new(project)),
            selection,
        }
    }

    fn fill(pipeline: &mut IngestionPipeline, project: &str, count: usize) {
        let mut discard = MemorySink::new();
        let none = ViewState::default();
        for idx in 0..count {
            pipeline.on_event(
                line(project, "web", LogLevel::Normal, &format!("{project}-{idx}")),
                &none,
                Forwarding::Live,
                &mut discard,
            );
        }
    }

    fn run_to_end(
        renderer: &mut IncrementalRenderer,
        token: ReplayToken,
        store: &LogStore,
        sink: &mut MemorySink,
    ) -> usize {
        let mut chunks = 0;
        loop {
            chunks += 1;
            match renderer.run_chunk(token, store, sink) {
                ChunkOutcome::Yield => {}
                ChunkOutcome::Done | ChunkOutcome::Stale => return chunks,
            }
        }
    }

    #[test]
    fn begin_clears_sink_and_enters_deferred_mode() {
        let mut renderer = IncrementalRenderer::new(10);
        let mut sink = MemorySink::new();
        sink.append("old");
        assert_eq!(renderer.forwarding(), Forwarding::Live);

        let token = renderer.begin(&view("p1", FilterSelection::default()), &mut sink);
        assert!(sink.lines().is_empty());
        assert_eq!(sink.clears(), 1);
        assert_eq!(renderer.forwarding(), Forwarding::DeferredToReplay);
        assert_eq!(renderer.latest(), Some(token));
    }

    #[test]
    fn replay_writes_in_chunks_until_done() {
        let mut pipeline = IngestionPipeline::new(100);
        fill(&mut pipeline, "p1", 25);
        let mut renderer = IncrementalRenderer::new(10);
        let mut sink = MemorySink::new();

        let token = renderer.begin(&view("p1", FilterSelection::default()), &mut sink);
        assert_eq!(renderer.run_chunk(token, pipeline.store(), &mut sink), ChunkOutcome::Yield);
        assert_eq!(sink.lines().len(), 10);
        let chunks = run_to_end(&mut renderer, token, pipeline.store(), &mut sink);
        assert_eq!(chunks, 2);
        assert_eq!(sink.lines().len(), 25);
        assert_eq!(sink.lines()[24], "p1-24");
        assert!(renderer.is_idle());
    }

    #[test]
    fn superseded_replay_writes_nothing_more() {
        let mut pipeline = IngestionPipeline::new(100);
        fill(&mut pipeline, "p1", 30);
        fill(&mut pipeline, "p2", 3);
        let mut renderer = IncrementalRenderer::new(10);
        let mut sink = MemorySink::new();

        let first = renderer.begin(&view("p1", FilterSelection::default()), &mut sink);
        assert_eq!(renderer.run_chunk(first, pipeline.store(), &mut sink), ChunkOutcome::Yield);

        let second = renderer.begin(&view("p2", FilterSelection::default()), &mut sink);
        assert!(second > first);
        assert_eq!(renderer.run_chunk(first, pipeline.store(), &mut sink), ChunkOutcome::Stale);
        assert!(sink.lines().is_empty());

        assert_eq!(renderer.run_chunk(second, pipeline.store(), &mut sink), ChunkOutcome::Done);
        assert_eq!(sink.lines(), ["p2-0", "p2-1", "p2-2"].map(String::from));
        assert_eq!(renderer.run_chunk(first, pipeline.store(), &mut sink), ChunkOutcome::Stale);
        assert_eq!(sink.lines().len(), 3);
    }

    #[test]
    fn lines_pushed_mid_replay_land_at_the_tail() {
        let mut pipeline = IngestionPipeline::new(100);
        fill(&mut pipeline, "p1", 4);
        let mut renderer = IncrementalRenderer::new(2);
        let mut sink = MemorySink::new();
        let v = view("p1", FilterSelection::default());

        let token = renderer.begin(&v, &mut sink);
        assert_eq!(renderer.run_chunk(token, pipeline.store(), &mut sink), ChunkOutcome::Yield);
        let forwarded = pipeline.on_event(
            line("p1", "web", LogLevel::Normal, "late"),
            &v,
            renderer.forwarding(),
            &mut sink,
        );
        assert!(!forwarded);
        run_to_end(&mut renderer, token, pipeline.store(), &mut sink);
        assert_eq!(
            sink.lines(),
            ["p1-0", "p1-1", "p1-2", "p1-3", "late"].map(String::from)
        );
        assert_eq!(renderer.forwarding(), Forwarding::Live);
    }

    #[test]
    fn evicted_lines_are_skipped() {
        let mut pipeline = IngestionPipeline::new(4);
        fill(&mut pipeline, "p1", 4);
        let mut renderer = IncrementalRenderer::new(2);
        let mut sink = MemorySink::new();
        let v = view("p1", FilterSelection::default());

        let token = renderer.begin(&v, &mut sink);
        renderer.run_chunk(token, pipeline.store(), &mut sink);
        fill(&mut pipeline, "p1", 3);
        run_to_end(&mut renderer, token, pipeline.store(), &mut sink);
        // seq 2 was evicted; the refilled buffer holds p1-3 then the new lines.
        assert_eq!(
            sink.lines(),
            ["p1-0", "p1-1", "p1-3", "p1-0", "p1-1", "p1-2"].map(String::from)
        );
    }

    #[test]
    fn unknown_or_missing_project_finishes_empty() {
        let pipeline = IngestionPipeline::new(4);
        let mut renderer = IncrementalRenderer::new(2);
        let mut sink = MemorySink::new();

        let token = renderer.begin(&ViewState::default(), &mut sink);
        assert_eq!(renderer.run_chunk(token, pipeline.store(), &mut sink), ChunkOutcome::Done);
        let token = renderer.begin(&view("ghost", FilterSelection::default()), &mut sink);
        assert_eq!(renderer.run_chunk(token, pipeline.store(), &mut sink), ChunkOutcome::Done);
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn only_visible_lines_are_replayed() {
        let mut pipeline = IngestionPipeline::new(16);
        let mut discard = MemorySink::new();
        for (source, level, text) in [
            ("backend", LogLevel::Normal, "b-out"),
            ("backend", LogLevel::Error, "b-err"),
            ("frontend", LogLevel::Error, "f-err"),
        ] {
            pipeline.on_event(
                line("p1", source, level, text),
                &ViewState::default(),
                Forwarding::Live,
                &mut discard,
            );
        }
        let mut renderer = IncrementalRenderer::new(500);
        let mut sink = MemorySink::new();
        let token = renderer.begin(
            &view("p1", FilterSelection::new("backend", LevelFilter::Error)),
            &mut sink,
        );
        assert_eq!(renderer.run_chunk(token, pipeline.store(), &mut sink), ChunkOutcome::Done);
        assert_eq!(sink.lines(), ["b-err".to_string()]);
    }

    fn arb_line() -> impl Strategy<Value = (String, bool)> {
        (
            prop_oneof![Just("system"), Just("web"), Just("api")].prop_map(String::from),
            any::<bool>(),
        )
    }

    proptest! {
        /// The final view depends only on buffer contents and the view,
        /// never on how the work was chunked.
        #[test]
        fn prop_chunk_size_does_not_change_output(
            lines in prop::collection::vec(arb_line(), 0..200),
            capacity in 1..64usize,
            chunk_size in 1..40usize,
            source in prop_oneof![Just("all"), Just("system"), Just("web")],
            level in prop_oneof![
                Just(LevelFilter::All),
                Just(LevelFilter::Normal),
                Just(LevelFilter::Error),
            ],
        ) {
            let mut pipeline = IngestionPipeline::new(capacity);
            let mut discard = MemorySink::new();
            for (idx, (src, is_error)) in lines.iter().enumerate() {
                let lvl = if *is_error { LogLevel::Error } else { LogLevel::Normal };
                pipeline.on_event(
                    line("p", src, lvl, &idx.to_string()),
                    &ViewState::default(),
                    Forwarding::Live,
                    &mut discard,
                );
            }
            let v = view("p", FilterSelection::new(source, level));

            let mut chunked = MemorySink::new();
            let mut renderer = IncrementalRenderer::new(chunk_size);
            let token = renderer.begin(&v, &mut chunked);
            run_to_end(&mut renderer, token, pipeline.store(), &mut chunked);

            let expected: Vec<String> = pipeline
                .store()
                .buffer(&ProjectId::new("p"))
                .map(|buffer| {
                    buffer
                        .iter()
                        .filter(|event| v.is_visible(event))
                        .map(|event| event.text.clone())
                        .collect()
                })
                .unwrap_or_default();
            prop_assert_eq!(chunked.lines(), expected.as_slice());
        }
    }
}
