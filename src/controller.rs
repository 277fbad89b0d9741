use log::{debug, warn};
use std::collections::VecDeque;

use crate::dedup;
use crate::document::SceneDocument;
use crate::errors::{OverrideError, Result};
use crate::persist::SessionMarker;
use crate::recovery::{self, RecoveryVerdict};
use crate::session::{MoveDirection, OverrideSession, OverrideStatus};
use crate::snapshot::RestoreReport;

/// Work postponed until the host finishes its own initialization. The host
/// drains the queue from its idle handler; tasks never re-enter the
/// controller from a timer, so there is exactly one in-flight mutation at
/// a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredTask {
    EnsureGenericMaterial,
    BaselineCapture,
}

/// Owns the process-wide override session and the deferred task queue, and
/// adapts the host's lifecycle callbacks onto them. Everything the
/// (external) UI layer calls goes through here.
#[derive(Debug)]
pub struct OverrideController {
    session: OverrideSession,
    deferred: VecDeque<DeferredTask>,
}

impl Default for OverrideController {
    fn default() -> Self {
        Self::new()
    }
}

impl OverrideController {
    pub fn new() -> Self {
        let mut controller = Self { session: OverrideSession::new(), deferred: VecDeque::new() };
        // The generic placeholder is created lazily, off the registration
        // path, matching hosts that forbid data creation during startup.
        controller.schedule(DeferredTask::EnsureGenericMaterial);
        controller
    }

    pub fn session(&self) -> &OverrideSession {
        &self.session
    }

    pub fn status(&self) -> OverrideStatus {
        self.session.status()
    }

    pub fn schedule(&mut self, task: DeferredTask) {
        if !self.deferred.contains(&task) {
            self.deferred.push_back(task);
        }
    }

    pub fn pending_tasks(&self) -> usize {
        self.deferred.len()
    }

    /// Runs every queued task. Invoked by the host once its own
    /// initialization has settled.
    pub fn drain_deferred(&mut self, doc: &mut SceneDocument) {
        while let Some(task) = self.deferred.pop_front() {
            match task {
                DeferredTask::EnsureGenericMaterial => {
                    doc.materials.ensure_generic();
                }
                DeferredTask::BaselineCapture => {
                    if self.session.is_active() {
                        debug!("baseline capture skipped, session became active first");
                        continue;
                    }
                    self.session.baseline_capture(doc);
                    debug!("baseline capture of {} node(s) complete", self.session.snapshot_count());
                }
            }
        }
    }

    /// Post-load: settle session status via the recovery detector before
    /// any UI reads it. An Inactive outcome schedules a deferred baseline
    /// capture so a later apply has originals to work from.
    pub fn on_document_loaded(&mut self, doc: &mut SceneDocument) -> RecoveryVerdict {
        self.session = OverrideSession::new();
        self.deferred.clear();
        self.schedule(DeferredTask::EnsureGenericMaterial);
        let verdict = recovery::run(doc, &mut self.session);
        if verdict == RecoveryVerdict::Inactive {
            self.schedule(DeferredTask::BaselineCapture);
        }
        verdict
    }

    /// Pre-save: persist the current session fields, never a stale copy.
    pub fn on_before_save(&self, doc: &mut SceneDocument) {
        SessionMarker::from_session(&self.session).store(doc);
    }

    /// Pre-exit: revert the session so the document closes clean. If the
    /// revert comes back partial, the marker is re-persisted as active so
    /// the next load can recover and retry — fail-open toward
    /// recoverability, not toward silent data loss.
    pub fn on_before_exit(&mut self, doc: &mut SceneDocument) {
        if !self.session.is_active() && !self.session.recovery_forced() {
            return;
        }
        match self.session.cancel(doc) {
            Ok(report) if report.missing_materials == 0 => {
                SessionMarker::from_session(&self.session).store(doc);
            }
            Ok(report) => {
                let err = OverrideError::PartialRevert { failed: report.missing_materials };
                warn!("exit revert incomplete: {err}; marker re-persisted as active for recovery");
                self.persist_active_marker(doc);
            }
            Err(err) => {
                warn!("exit revert failed: {err}; marker re-persisted as active for recovery");
                self.persist_active_marker(doc);
            }
        }
    }

    /// Pre-render: re-assert the substitution so nodes added after apply
    /// render overridden too.
    pub fn on_before_render(&mut self, doc: &mut SceneDocument) {
        if !self.session.is_active() {
            return;
        }
        if let Err(err) = self.session.reassert(doc) {
            warn!("pre-render re-assert failed: {err}");
        }
    }

    fn persist_active_marker(&self, doc: &mut SceneDocument) {
        let mut marker = SessionMarker::from_session(&self.session);
        marker.active = true;
        marker.store(doc);
    }

    // Commands surfaced to the UI layer.

    pub fn apply(&mut self, doc: &mut SceneDocument) -> Result<()> {
        self.session.apply(doc)
    }

    pub fn cancel(&mut self, doc: &mut SceneDocument) -> Result<RestoreReport> {
        self.session.cancel(doc)
    }

    pub fn set_override_material(&mut self, doc: &SceneDocument, material: Option<&str>) -> Result<()> {
        if self.session.is_active() {
            return Err(OverrideError::InvalidState(
                "override material cannot change while the override is active",
            ));
        }
        if let Some(name) = material {
            if !doc.materials.has(name) {
                return Err(OverrideError::MissingReference { name: name.to_string() });
            }
        }
        self.session.settings.override_material = material.map(str::to_string);
        Ok(())
    }

    pub fn set_keep_generic(&mut self, keep: bool) {
        self.session.settings.keep_generic = keep;
    }

    pub fn add_exclude(&mut self, doc: &SceneDocument, material: &str) -> Result<bool> {
        self.session.add_exclude(doc, material)
    }

    pub fn remove_exclude(&mut self, index: usize) -> Result<()> {
        self.session.remove_exclude(index)
    }

    pub fn move_exclude(&mut self, index: usize, direction: MoveDirection) {
        self.session.move_exclude(index, direction);
    }

    pub fn sort_excludes(&mut self) {
        self.session.sort_excludes();
    }

    pub fn clear_excludes(&mut self) -> Result<()> {
        self.session.clear_excludes()
    }

    pub fn purge_empty_slots(&mut self, doc: &mut SceneDocument) -> Result<usize> {
        self.session.purge_empty_slots(doc)
    }

    pub fn purge_duplicates(&mut self, doc: &mut SceneDocument) -> usize {
        dedup::purge_duplicates(doc)
    }

    pub fn clear_session_data(&mut self) -> Result<()> {
        self.session.clear_session_data()
    }

    /// Drops all session state without touching the document. Used at host
    /// shutdown after `on_before_exit` has run.
    pub fn teardown(&mut self) {
        self.session = OverrideSession::new();
        self.deferred.clear();
    }
}
