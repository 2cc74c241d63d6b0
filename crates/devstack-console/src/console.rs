//! The single-threaded console: one mailbox, one owner of all log and
//! status state.
//!
//! Feed deliveries, UI actions, request completions and replay
//! continuations all arrive as [`ConsoleMsg`]s and are handled one at a
//! time. A replay yields by posting its next chunk to the same mailbox,
//! so anything that arrived in the meantime is handled first.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use devstack_core::{Config, LogEvent, ProjectId, ServiceKey};

use crate::control::{ControlError, RequestId, RequestKind, RequestReply, ServiceControl};
use crate::feed::{FeedError, FeedEvent, LogFeed, Subscription};
use crate::filter::FilterSelection;
use crate::ingest::{IngestionPipeline, LogStore, ViewState};
use crate::replay::{ChunkOutcome, IncrementalRenderer, ReplayToken};
use crate::sink::RenderSink;
use crate::status::{ServiceStatusReconciler, ServiceView};

/// Everything the console reacts to.
#[derive(Debug)]
pub enum ConsoleMsg {
    Feed(FeedEvent),
    SetFilter(FilterSelection),
    SetProject(Option<ProjectId>),
    RemoveProject(ProjectId),
    ClearLogs,
    Start(ServiceKey),
    Stop(ServiceKey),
    OpenUrl(ServiceKey),
    RequestFinished {
        key: ServiceKey,
        request_id: RequestId,
        outcome: Result<(), ControlError>,
    },
    ReplayChunk(ReplayToken),
    Search(String),
    FindNext,
    FindPrevious,
    Shutdown,
}

pub struct Console<S, C> {
    view: ViewState,
    pipeline: IngestionPipeline,
    renderer: IncrementalRenderer,
    status: ServiceStatusReconciler,
    sink: S,
    control: C,
    mailbox: Sender<ConsoleMsg>,
    last_query: Option<String>,
    subscription: Option<Subscription>,
}

impl<S: RenderSink, C: ServiceControl> Console<S, C> {
    /// Build a console and the receiving end of its mailbox.
    pub fn new(config: &Config, sink: S, control: C) -> (Self, Receiver<ConsoleMsg>) {
        let (mailbox, inbox) = mpsc::channel();
        let console = Self {
            view: ViewState::default(),
            pipeline: IngestionPipeline::new(config.log_capacity),
            renderer: IncrementalRenderer::new(config.replay_chunk_size),
            status: ServiceStatusReconciler::new(),
            sink,
            control,
            mailbox,
            last_query: None,
            subscription: None,
        };
        (console, inbox)
    }

    /// Another sender for this console's mailbox.
    #[must_use]
    pub fn mailbox(&self) -> Sender<ConsoleMsg> {
        self.mailbox.clone()
    }

    /// Handle one message. Returns `false` once [`ConsoleMsg::Shutdown`]
    /// is seen.
    pub fn handle(&mut self, msg: ConsoleMsg) -> bool {
        match msg {
            ConsoleMsg::Feed(event) => self.on_feed(event),
            ConsoleMsg::SetFilter(selection) => self.set_filter(selection),
            ConsoleMsg::SetProject(project) => self.set_project(project),
            ConsoleMsg::RemoveProject(project) => self.remove_project(&project),
            ConsoleMsg::ClearLogs => self.clear_logs(),
            ConsoleMsg::Start(key) => self.start(&key),
            ConsoleMsg::Stop(key) => self.stop(&key),
            ConsoleMsg::OpenUrl(key) => self.open_url(&key),
            ConsoleMsg::RequestFinished {
                key,
                request_id,
                outcome,
            } => {
                self.status.complete_request(&key, request_id, &outcome);
            }
            ConsoleMsg::ReplayChunk(token) => self.run_replay_chunk(token),
            ConsoleMsg::Search(query) => {
                self.search(query);
            }
            ConsoleMsg::FindNext => {
                self.find_next();
            }
            ConsoleMsg::FindPrevious => {
                self.find_previous();
            }
            ConsoleMsg::Shutdown => return false,
        }
        true
    }

    /// Handle every message already queued, without blocking. Returns how
    /// many were handled; stops early at shutdown.
    pub fn drain(&mut self, inbox: &Receiver<ConsoleMsg>) -> usize {
        let mut handled = 0;
        while let Ok(msg) = inbox.try_recv() {
            handled += 1;
            if !self.handle(msg) {
                break;
            }
        }
        handled
    }

    /// Block on the mailbox until shutdown.
    pub fn run(&mut self, inbox: &Receiver<ConsoleMsg>) {
        while let Ok(msg) = inbox.recv() {
            if !self.handle(msg) {
                break;
            }
        }
        tracing::debug!("console loop exited");
    }

    // ── Feed ──────────────────────────────────────────────────────────

    pub fn on_feed(&mut self, event: FeedEvent) {
        let forwarding = self.renderer.forwarding();
        match event {
            FeedEvent::Log(line) => {
                self.pipeline
                    .on_event(line, &self.view, forwarding, &mut self.sink);
            }
            FeedEvent::LogBatch(lines) => {
                self.pipeline
                    .on_batch(lines, &self.view, forwarding, &mut self.sink);
            }
            FeedEvent::Status(snapshot) => {
                let cleared_loading = self.status.apply_snapshot(snapshot);
                tracing::trace!(cleared_loading, "status snapshot applied");
            }
        }
    }

    /// Subscribe to `feed`, replacing any earlier subscription. On failure
    /// the console keeps running without live updates.
    pub fn attach_feed(&mut self, feed: &LogFeed) -> Result<(), FeedError> {
        self.subscription = None;
        let mailbox = self.mailbox.clone();
        let forward =
            move |event: &FeedEvent| mailbox.send(ConsoleMsg::Feed(event.clone())).is_ok();
        match feed.subscribe(forward) {
            Ok(subscription) => {
                self.subscription = Some(subscription);
                tracing::debug!("console attached to log feed");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "log feed subscription failed, continuing without live updates"
                );
                Err(err)
            }
        }
    }

    /// Stop receiving feed events. Buffered lines are kept.
    pub fn detach_feed(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    #[must_use]
    pub fn is_feed_attached(&self) -> bool {
        self.subscription.as_ref().is_some_and(Subscription::is_active)
    }

    // ── View ──────────────────────────────────────────────────────────

    pub fn set_filter(&mut self, selection: FilterSelection) {
        if selection == self.view.selection {
            return;
        }
        self.view.selection = selection;
        self.restart_replay();
    }

    pub fn set_project(&mut self, project: Option<ProjectId>) {
        if project == self.view.active_project {
            return;
        }
        self.view.active_project = project;
        self.restart_replay();
    }

    /// Discard a project's buffer and request state. Removing the active
    /// project leaves the view empty.
    pub fn remove_project(&mut self, project: &ProjectId) {
        let existed = self.pipeline.store_mut().remove_project(project);
        self.status.forget_project(project);
        tracing::debug!(%project, existed, "project removed");
        if self.view.active_project.as_ref() == Some(project) {
            self.view.active_project = None;
            self.restart_replay();
        }
    }

    /// Empty the active project's buffer and the display.
    pub fn clear_logs(&mut self) {
        let Some(project) = self.view.active_project.clone() else {
            return;
        };
        self.pipeline.store_mut().clear_project(&project);
        self.restart_replay();
    }

    fn restart_replay(&mut self) {
        let token = self.renderer.begin(&self.view, &mut self.sink);
        tracing::debug!(
            token = token.get(),
            project = ?self.view.active_project,
            source = %self.view.selection.source,
            level = %self.view.selection.level,
            "replaying log view"
        );
        self.run_replay_chunk(token);
    }

    fn run_replay_chunk(&mut self, token: ReplayToken) {
        let outcome = self
            .renderer
            .run_chunk(token, self.pipeline.store(), &mut self.sink);
        if outcome == ChunkOutcome::Yield
            && self.mailbox.send(ConsoleMsg::ReplayChunk(token)).is_err()
        {
            tracing::warn!(token = token.get(), "console mailbox closed, replay abandoned");
        }
    }

    // ── Search ────────────────────────────────────────────────────────

    pub fn search(&mut self, query: String) -> bool {
        let found = self.sink.search(&query);
        self.last_query = Some(query);
        found
    }

    /// Next match of the last query; no-op before any search.
    pub fn find_next(&mut self) -> bool {
        match &self.last_query {
            Some(query) => self.sink.find_next(query),
            None => false,
        }
    }

    pub fn find_previous(&mut self) -> bool {
        match &self.last_query {
            Some(query) => self.sink.find_previous(query),
            None => false,
        }
    }

    // ── Services ──────────────────────────────────────────────────────

    pub fn start(&mut self, key: &ServiceKey) {
        let reply = self.issue(key, RequestKind::Start);
        self.control.request_start(key, reply);
    }

    pub fn stop(&mut self, key: &ServiceKey) {
        let reply = self.issue(key, RequestKind::Stop);
        self.control.request_stop(key, reply);
    }

    fn issue(&mut self, key: &ServiceKey, kind: RequestKind) -> RequestReply {
        let request_id = self.status.begin_request(key, kind);
        tracing::info!(
            %key,
            request = request_id.0,
            kind = kind.as_str(),
            "service request issued"
        );
        RequestReply::new(self.mailbox.clone(), key.clone(), request_id, kind)
    }

    /// Open the service's URL when one is known. A failure shows up as
    /// the service's inline error.
    pub fn open_url(&mut self, key: &ServiceKey) {
        let Some(url) = self.status.status(key).url else {
            tracing::debug!(%key, "no url known for service");
            return;
        };
        if let Err(err) = self.control.request_open_url(&url) {
            self.status.record_error(key, &err);
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────

    #[must_use]
    pub const fn view(&self) -> &ViewState {
        &self.view
    }

    #[must_use]
    pub const fn store(&self) -> &LogStore {
        self.pipeline.store()
    }

    #[must_use]
    pub const fn status(&self) -> &ServiceStatusReconciler {
        &self.status
    }

    #[must_use]
    pub fn service(&self, key: &ServiceKey) -> ServiceView {
        self.status.view(key)
    }

    #[must_use]
    pub const fn is_replaying(&self) -> bool {
        !self.renderer.is_idle()
    }

    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    pub const fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    #[must_use]
    pub const fn control(&self) -> &C {
        &self.control
    }

    /// Push a launcher-generated line for `project` through the normal
    /// ingestion path.
    pub fn notice(&mut self, event: LogEvent) {
        self.on_feed(FeedEvent::Log(event));
    }
}

/// A [`Console`] running on its own thread.
///
/// Dropping the runtime shuts the console down and joins the thread.
pub struct ConsoleRuntime<S, C> {
    mailbox: Sender<ConsoleMsg>,
    join: Option<JoinHandle<Console<S, C>>>,
}

impl<S, C> ConsoleRuntime<S, C>
where
    S: RenderSink + Send + 'static,
    C: ServiceControl + Send + 'static,
{
    /// Move `console` onto a new thread that drains `inbox` until shutdown.
    pub fn spawn(mut console: Console<S, C>, inbox: Receiver<ConsoleMsg>) -> std::io::Result<Self> {
        let mailbox = console.mailbox();
        let join = thread::Builder::new()
            .name("devstack-console".into())
            .spawn(move || {
                tracing::info!("console started");
                console.run(&inbox);
                tracing::info!("console stopped");
                console
            })?;
        Ok(Self {
            mailbox,
            join: Some(join),
        })
    }

    #[must_use]
    pub fn mailbox(&self) -> Sender<ConsoleMsg> {
        self.mailbox.clone()
    }

    /// Post a message; false once the console has exited.
    pub fn send(&self, msg: ConsoleMsg) -> bool {
        self.mailbox.send(msg).is_ok()
    }

    /// Stop after every message queued so far and hand the console back.
    pub fn shutdown(mut self) -> Option<Console<S, C>> {
        self.stop()
    }

    fn stop(&mut self) -> Option<Console<S, C>> {
        let join = self.join.take()?;
        let _ = self.mailbox.send(ConsoleMsg::Shutdown);
        join.join().ok()
    }
}

impl<S, C> Drop for ConsoleRuntime<S, C> {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = self.mailbox.send(ConsoleMsg::Shutdown);
            let _ = join.join();
        }
    }
}
