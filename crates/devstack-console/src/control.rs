//! Outbound start/stop/open-url requests toward the process layer.
//!
//! Requests are fire-and-forget: the control surface receives a
//! [`RequestReply`] and completes it whenever the process layer answers.
//! The reply lands in the console mailbox as a
//! [`ConsoleMsg::RequestFinished`](crate::console::ConsoleMsg).

use std::sync::Mutex;
use std::sync::mpsc::Sender;

use devstack_core::ServiceKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::console::ConsoleMsg;

/// Why an outbound request did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("request was dropped before it completed")]
    Abandoned,

    #[error("{0} is not supported by this control surface")]
    Unsupported(&'static str),

    #[error("failed to open {url}: {reason}")]
    OpenUrl { url: String, reason: String },
}

impl ControlError {
    /// Short machine-readable category, used in structured log fields.
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::Rejected(_) => "REJECTED",
            Self::Abandoned => "ABANDONED",
            Self::Unsupported(_) => "UNSUPPORTED",
            Self::OpenUrl { .. } => "OPEN_URL_FAILED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Start,
    Stop,
}

impl RequestKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

/// Identifies one issued request so its completion can be matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

/// One-shot completion handle for a start/stop request.
///
/// Dropping it without calling [`Self::complete`] reports
/// [`ControlError::Abandoned`], so the service never stays loading forever.
#[derive(Debug)]
pub struct RequestReply {
    mailbox: Sender<ConsoleMsg>,
    key: ServiceKey,
    request_id: RequestId,
    kind: RequestKind,
    sent: bool,
}

impl RequestReply {
    pub(crate) const fn new(
        mailbox: Sender<ConsoleMsg>,
        key: ServiceKey,
        request_id: RequestId,
        kind: RequestKind,
    ) -> Self {
        Self {
            mailbox,
            key,
            request_id,
            kind,
            sent: false,
        }
    }

    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn complete(mut self, outcome: Result<(), ControlError>) {
        self.send(outcome);
    }

    fn send(&mut self, outcome: Result<(), ControlError>) {
        if self.sent {
            return;
        }
        self.sent = true;
        let msg = ConsoleMsg::RequestFinished {
            key: self.key.clone(),
            request_id: self.request_id,
            outcome,
        };
        if self.mailbox.send(msg).is_err() {
            tracing::debug!(key = %self.key, "console gone, request completion discarded");
        }
    }
}

impl Drop for RequestReply {
    fn drop(&mut self) {
        self.send(Err(ControlError::Abandoned));
    }
}

/// The process layer as seen by the console.
pub trait ServiceControl {
    fn request_start(&self, key: &ServiceKey, reply: RequestReply);

    fn request_stop(&self, key: &ServiceKey, reply: RequestReply);

    /// Open `url` in the user's browser.
    fn request_open_url(&self, url: &str) -> Result<(), ControlError>;
}

/// Control surface that records every request and keeps the replies until
/// the caller completes them. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingControl {
    pending: Mutex<Vec<RequestReply>>,
    opened: Mutex<Vec<String>>,
    open_url_error: Mutex<Option<ControlError>>,
}

impl RecordingControl {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `request_open_url` fail with `error`.
    pub fn fail_open_url(&self, error: ControlError) {
        *self
            .open_url_error
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(error);
    }

    /// Take every reply received so far, oldest first.
    pub fn take_pending(&self) -> Vec<RequestReply> {
        std::mem::take(
            &mut *self
                .pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        )
    }

    /// URLs successfully opened, oldest first.
    #[must_use]
    pub fn opened_urls(&self) -> Vec<String> {
        self.opened
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn record(&self, reply: RequestReply) {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(reply);
    }
}

impl ServiceControl for RecordingControl {
    fn request_start(&self, _key: &ServiceKey, reply: RequestReply) {
        self.record(reply);
    }

    fn request_stop(&self, _key: &ServiceKey, reply: RequestReply) {
        self.record(reply);
    }

    fn request_open_url(&self, url: &str) -> Result<(), ControlError> {
        if let Some(err) = self
            .open_url_error
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
        {
            return Err(err);
        }
        self.opened
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(url.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn finished(msg: ConsoleMsg) -> (ServiceKey, RequestId, Result<(), ControlError>) {
        match msg {
            ConsoleMsg::RequestFinished {
                key,
                request_id,
                outcome,
            } => (key, request_id, outcome),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn complete_posts_outcome_once() {
        let (tx, rx) = mpsc::channel();
        let key = ServiceKey::new("p1", "web");
        let reply = RequestReply::new(tx, key.clone(), RequestId(7), RequestKind::Start);
        reply.complete(Ok(()));

        let (got_key, id, outcome) = finished(rx.try_recv().unwrap());
        assert_eq!(got_key, key);
        assert_eq!(id, RequestId(7));
        assert_eq!(outcome, Ok(()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_reply_reports_abandoned() {
        let (tx, rx) = mpsc::channel();
        drop(RequestReply::new(
            tx,
            ServiceKey::new("p1", "api"),
            RequestId(1),
            RequestKind::Stop,
        ));
        let (_, _, outcome) = finished(rx.try_recv().unwrap());
        assert_eq!(outcome, Err(ControlError::Abandoned));
    }

    #[test]
    fn completion_after_console_exit_is_silent() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let reply =
            RequestReply::new(tx, ServiceKey::new("p", "s"), RequestId(2), RequestKind::Start);
        reply.complete(Err(ControlError::Rejected("busy".into())));
    }

    #[test]
    fn recording_control_keeps_replies_and_urls() {
        let (tx, _rx) = mpsc::channel();
        let control = RecordingControl::new();
        let key = ServiceKey::new("p", "s");
        control.request_start(
            &key,
            RequestReply::new(tx, key.clone(), RequestId(3), RequestKind::Start),
        );
        let pending = control.take_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind(), RequestKind::Start);
        assert_eq!(pending[0].request_id(), RequestId(3));

        control.request_open_url("http://localhost:3000").unwrap();
        assert_eq!(control.opened_urls(), vec!["http://localhost:3000".to_string()]);

        control.fail_open_url(ControlError::Unsupported("open-url"));
        assert_eq!(
            control.request_open_url("http://x"),
            Err(ControlError::Unsupported("open-url"))
        );
    }
}
