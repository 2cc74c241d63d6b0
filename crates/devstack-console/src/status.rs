//! Running/loading/URL state per service.
//!
//! Snapshots from the process layer are authoritative: each one replaces
//! the whole status map and ends every outstanding request. Request
//! completions only ever clear the flag of the request they belong to, so
//! a late answer to an older click cannot hide a newer one.

use std::collections::HashMap;

use devstack_core::{ProjectId, ServiceKey, ServiceStatus, StatusSnapshot};
use serde::Serialize;

use crate::control::{ControlError, RequestId, RequestKind};

/// Lifecycle position of one service as the UI should present it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServicePhase {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingRequest {
    id: RequestId,
    kind: RequestKind,
}

/// Per-service view state: `{running, url}` plus `loading`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceView {
    pub running: bool,
    pub url: Option<String>,
    pub loading: bool,
    pub phase: ServicePhase,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ServiceStatusReconciler {
    statuses: HashMap<ServiceKey, ServiceStatus>,
    pending: HashMap<ServiceKey, PendingRequest>,
    errors: HashMap<ServiceKey, String>,
    next_request: u64,
}

impl ServiceStatusReconciler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` loading for a new request and return its id. Any inline
    /// error from an earlier request on the same key is dismissed.
    pub fn begin_request(&mut self, key: &ServiceKey, kind: RequestKind) -> RequestId {
        self.next_request += 1;
        let id = RequestId(self.next_request);
        self.errors.remove(key);
        self.pending.insert(key.clone(), PendingRequest { id, kind });
        id
    }

    /// Record the completion of request `id`. Returns whether it was still
    /// the outstanding request for `key`; superseded completions are
    /// ignored, including their errors.
    pub fn complete_request(
        &mut self,
        key: &ServiceKey,
        id: RequestId,
        outcome: &Result<(), ControlError>,
    ) -> bool {
        if self.pending.get(key).is_none_or(|pending| pending.id != id) {
            tracing::debug!(%key, request = id.0, "ignoring superseded request completion");
            return false;
        }
        self.pending.remove(key);
        if let Err(err) = outcome {
            self.record_error(key, err);
        }
        true
    }

    /// Surface `err` inline next to the service until the next request.
    pub fn record_error(&mut self, key: &ServiceKey, err: &ControlError) {
        tracing::warn!(%key, error = %err, error_type = err.error_type(), "service request failed");
        self.errors.insert(key.clone(), err.to_string());
    }

    /// Replace every status with `snapshot` and clear all loading flags.
    /// Returns how many requests were still outstanding.
    pub fn apply_snapshot(&mut self, snapshot: StatusSnapshot) -> usize {
        let cleared_loading = self.pending.len();
        self.pending.clear();
        self.statuses = snapshot.services;
        cleared_loading
    }

    /// Last known status; unknown keys read as stopped without a URL.
    #[must_use]
    pub fn status(&self, key: &ServiceKey) -> ServiceStatus {
        self.statuses
            .get(key)
            .cloned()
            .unwrap_or(ServiceStatus::STOPPED)
    }

    #[must_use]
    pub fn is_loading(&self, key: &ServiceKey) -> bool {
        self.pending.contains_key(key)
    }

    #[must_use]
    pub fn phase(&self, key: &ServiceKey) -> ServicePhase {
        match self.pending.get(key).map(|pending| pending.kind) {
            Some(RequestKind::Start) => ServicePhase::Starting,
            Some(RequestKind::Stop) => ServicePhase::Stopping,
            None if self.status(key).running => ServicePhase::Running,
            None => ServicePhase::Stopped,
        }
    }

    /// Inline error left by the last failed request, if any.
    #[must_use]
    pub fn error(&self, key: &ServiceKey) -> Option<&str> {
        self.errors.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn view(&self, key: &ServiceKey) -> ServiceView {
        let status = self.status(key);
        ServiceView {
            running: status.running,
            url: status.url,
            loading: self.is_loading(key),
            phase: self.phase(key),
            error: self.error(key).map(str::to_string),
        }
    }

    /// Forget request and error state for a removed project. Statuses stay
    /// until the next snapshot replaces them.
    pub fn forget_project(&mut self, project: &ProjectId) {
        self.pending.retain(|key, _| key.project_id != *project);
        self.errors.retain(|key, _| key.project_id != *project);
    }

    /// Keys with a request outstanding.
    pub fn loading_keys(&self) -> impl Iterator<Item = &ServiceKey> + '_ {
        self.pending.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(service: &str) -> ServiceKey {
        ServiceKey::new("p1", service)
    }

    fn snapshot(entries: &[(&str, bool, Option<&str>)]) -> StatusSnapshot {
        StatusSnapshot::new(
            entries
                .iter()
                .map(|(service, running, url)| {
                    (
                        key(service),
                        ServiceStatus {
                            running: *running,
                            url: url.map(str::to_string),
                        },
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn unknown_keys_are_stopped() {
        let reconciler = ServiceStatusReconciler::new();
        assert_eq!(reconciler.status(&key("ghost")), ServiceStatus::STOPPED);
        assert_eq!(reconciler.phase(&key("ghost")), ServicePhase::Stopped);
        assert!(!reconciler.is_loading(&key("ghost")));
    }

    #[test]
    fn snapshot_clears_every_loading_flag() {
        let mut reconciler = ServiceStatusReconciler::new();
        reconciler.begin_request(&key("a"), RequestKind::Start);
        reconciler.begin_request(&key("b"), RequestKind::Stop);
        assert_eq!(reconciler.phase(&key("a")), ServicePhase::Starting);
        assert_eq!(reconciler.phase(&key("b")), ServicePhase::Stopping);

        let outcome =
            reconciler.apply_snapshot(snapshot(&[("a", true, Some("http://localhost:3000"))]));
        assert_eq!(outcome, 2);
        assert!(reconciler.loading_keys().next().is_none());
        assert_eq!(reconciler.phase(&key("a")), ServicePhase::Running);
        assert_eq!(
            reconciler.status(&key("a")).url.as_deref(),
            Some("http://localhost:3000")
        );
        assert_eq!(reconciler.status(&key("b")), ServiceStatus::STOPPED);
    }

    #[test]
    fn snapshot_replaces_wholesale() {
        let mut reconciler = ServiceStatusReconciler::new();
        reconciler.apply_snapshot(snapshot(&[("a", true, None), ("b", true, None)]));
        reconciler.apply_snapshot(snapshot(&[("b", false, None)]));
        assert!(!reconciler.status(&key("a")).running);
        assert!(!reconciler.status(&key("b")).running);
    }

    #[test]
    fn failure_clears_flag_and_records_error() {
        let mut reconciler = ServiceStatusReconciler::new();
        let id = reconciler.begin_request(&key("a"), RequestKind::Start);
        let cleared = reconciler.complete_request(
            &key("a"),
            id,
            &Err(ControlError::Rejected("port in use".into())),
        );
        assert!(cleared);
        assert!(!reconciler.is_loading(&key("a")));
        assert_eq!(reconciler.error(&key("a")), Some("request rejected: port in use"));

        reconciler.begin_request(&key("a"), RequestKind::Start);
        assert_eq!(reconciler.error(&key("a")), None);
    }

    #[test]
    fn stale_completion_does_not_clear_newer_request() {
        let mut reconciler = ServiceStatusReconciler::new();
        let first = reconciler.begin_request(&key("a"), RequestKind::Start);
        let second = reconciler.begin_request(&key("a"), RequestKind::Stop);
        assert!(second > first);

        assert!(!reconciler.complete_request(&key("a"), first, &Err(ControlError::Abandoned)));
        assert!(reconciler.is_loading(&key("a")));
        assert_eq!(reconciler.error(&key("a")), None);

        assert!(reconciler.complete_request(&key("a"), second, &Ok(())));
        assert!(!reconciler.is_loading(&key("a")));
        // Duplicate completion is a no-op.
        assert!(!reconciler.complete_request(&key("a"), second, &Ok(())));
    }

    #[test]
    fn every_snapshot_applies_and_clears_loading() {
        let mut reconciler = ServiceStatusReconciler::new();
        reconciler.apply_snapshot(snapshot(&[("a", false, None)]));
        reconciler.begin_request(&key("a"), RequestKind::Start);

        // Snapshots arriving back to back are applied in arrival order.
        assert_eq!(reconciler.apply_snapshot(snapshot(&[("a", true, None)])), 1);
        assert!(!reconciler.is_loading(&key("a")));
        assert!(reconciler.status(&key("a")).running);

        reconciler.begin_request(&key("a"), RequestKind::Stop);
        assert_eq!(reconciler.apply_snapshot(snapshot(&[("a", true, None)])), 1);
        assert!(!reconciler.is_loading(&key("a")));
        assert_eq!(reconciler.phase(&key("a")), ServicePhase::Running);
    }

    #[test]
    fn view_combines_status_and_request_state() {
        let mut reconciler = ServiceStatusReconciler::new();
        reconciler.apply_snapshot(snapshot(&[("a", true, Some("http://x"))]));
        reconciler.begin_request(&key("a"), RequestKind::Stop);
        let view = reconciler.view(&key("a"));
        assert!(view.running);
        assert!(view.loading);
        assert_eq!(view.phase, ServicePhase::Stopping);
        assert_eq!(view.url.as_deref(), Some("http://x"));
    }

    #[test]
    fn forget_project_drops_requests_and_errors() {
        let mut reconciler = ServiceStatusReconciler::new();
        let other = ServiceKey::new("p2", "a");
        reconciler.begin_request(&key("a"), RequestKind::Start);
        reconciler.begin_request(&other, RequestKind::Start);
        reconciler.forget_project(&ProjectId::new("p1"));
        assert!(!reconciler.is_loading(&key("a")));
        assert!(reconciler.is_loading(&other));
    }
}
