use log::{info, warn};

use crate::document::{MaterialSlot, NodeId, SceneDocument};
use crate::errors::{OverrideError, Result};
use crate::graph::enumerate_nodes;
use crate::materialize::{self, StagingSet};
use crate::snapshot::{RestoreReport, SnapshotStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverrideStatus {
    #[default]
    Inactive,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
}

/// User-facing session settings: which material substitutes, which
/// materials are exempt, and what happens to backfilled slots on revert.
#[derive(Debug, Clone, Default)]
pub struct OverrideSettings {
    pub override_material: Option<String>,
    pub exclude: Vec<String>,
    pub keep_generic: bool,
}

impl OverrideSettings {
    pub fn is_excluded(&self, material: &str) -> bool {
        self.exclude.iter().any(|name| name == material)
    }
}

/// The override session state machine. Inactive -> Active via a successful
/// `apply`; Active -> Inactive via `cancel`. The recovery detector may
/// force Active without re-running apply when the document already holds
/// overridden materials.
#[derive(Debug, Default)]
pub struct OverrideSession {
    status: OverrideStatus,
    pub settings: OverrideSettings,
    pub(crate) snapshots: SnapshotStore,
    pub(crate) staging: Option<StagingSet>,
    recovery_forced: bool,
}

impl OverrideSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> OverrideStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status() == OverrideStatus::Active
    }

    pub fn recovery_forced(&self) -> bool {
        self.recovery_forced
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Used by the recovery detector only: the document is already in the
    /// overridden state, so the session becomes Active without apply.
    pub(crate) fn force_active(&mut self, snapshots: SnapshotStore) {
        self.status = OverrideStatus::Active;
        self.snapshots = snapshots;
        self.recovery_forced = true;
    }

    pub(crate) fn baseline_capture(&mut self, doc: &mut SceneDocument) {
        self.snapshots.clear();
        let nodes = enumerate_nodes(doc);
        self.snapshots.capture(doc, &nodes);
    }

    /// Applies the configured override to every eligible node: materialize
    /// collection instances, snapshot, backfill empty slots with the
    /// generic placeholder, then substitute everything that is neither
    /// excluded nor already the override material.
    pub fn apply(&mut self, doc: &mut SceneDocument) -> Result<()> {
        if self.is_active() {
            return Err(OverrideError::InvalidState("override is already active"));
        }
        let override_material = self
            .settings
            .override_material
            .clone()
            .ok_or(OverrideError::InvalidState("no override material configured"))?;
        if !doc.materials.has(&override_material) {
            return Err(OverrideError::MissingReference { name: override_material });
        }

        let materialized = materialize::materialize_instances(
            doc,
            &mut self.snapshots,
            &mut self.staging,
            &self.settings,
            &override_material,
        );
        let nodes = enumerate_nodes(doc);
        for &id in &nodes {
            override_node(doc, &mut self.snapshots, id, &self.settings, &override_material);
        }

        self.status = OverrideStatus::Active;
        self.recovery_forced = false;
        info!(
            "override '{override_material}' applied to {} node(s) ({} materialized)",
            self.snapshots.len(),
            materialized.len()
        );
        Ok(())
    }

    /// Reverts the session: restore every snapshot, then tear the staging
    /// collection down. Restore strictly precedes teardown — materialized
    /// copies whose collection is already gone cannot be reverted.
    pub fn cancel(&mut self, doc: &mut SceneDocument) -> Result<RestoreReport> {
        if !self.is_active() && !self.recovery_forced {
            return Err(OverrideError::InvalidState("no override session to cancel"));
        }
        let report = self.snapshots.restore(doc, self.settings.keep_generic);
        materialize::teardown(doc, &mut self.staging);
        self.status = OverrideStatus::Inactive;
        self.recovery_forced = false;
        if report.missing_materials > 0 {
            warn!(
                "revert finished with {} slot(s) stuck at the override value",
                report.missing_materials
            );
        } else {
            info!("override cancelled, {} node(s) restored", report.restored);
        }
        Ok(report)
    }

    /// Re-runs capture + substitution over the whole traversal, covering
    /// nodes added since apply. Everything already overridden is untouched,
    /// so this is safe to run before every render.
    pub fn reassert(&mut self, doc: &mut SceneDocument) -> Result<()> {
        if !self.is_active() {
            return Err(OverrideError::InvalidState("no active override session"));
        }
        let override_material = self
            .settings
            .override_material
            .clone()
            .ok_or(OverrideError::InvalidState("no override material configured"))?;
        if !doc.materials.has(&override_material) {
            return Err(OverrideError::MissingReference { name: override_material });
        }
        let nodes = enumerate_nodes(doc);
        for &id in &nodes {
            override_node(doc, &mut self.snapshots, id, &self.settings, &override_material);
        }
        Ok(())
    }

    /// Adds a material to the exclude list. Returns false (with a warning)
    /// when the material is already excluded.
    pub fn add_exclude(&mut self, doc: &SceneDocument, material: &str) -> Result<bool> {
        if self.is_active() {
            return Err(OverrideError::InvalidState("exclude list is frozen while the override is active"));
        }
        if !doc.materials.has(material) {
            return Err(OverrideError::MissingReference { name: material.to_string() });
        }
        if self.settings.is_excluded(material) {
            warn!("material '{material}' is already excluded");
            return Ok(false);
        }
        self.settings.exclude.push(material.to_string());
        Ok(true)
    }

    pub fn remove_exclude(&mut self, index: usize) -> Result<()> {
        if self.is_active() {
            return Err(OverrideError::InvalidState("exclude list is frozen while the override is active"));
        }
        if index < self.settings.exclude.len() {
            self.settings.exclude.remove(index);
        } else {
            warn!("remove_exclude: index {index} is out of range");
        }
        Ok(())
    }

    /// Reorders the exclude list. Order is presentation only, so this is
    /// legal while Active.
    pub fn move_exclude(&mut self, index: usize, direction: MoveDirection) {
        let len = self.settings.exclude.len();
        match direction {
            MoveDirection::Up if index > 0 && index < len => {
                self.settings.exclude.swap(index, index - 1);
            }
            MoveDirection::Down if index + 1 < len => {
                self.settings.exclude.swap(index, index + 1);
            }
            _ => {}
        }
    }

    pub fn sort_excludes(&mut self) {
        self.settings.exclude.sort();
    }

    pub fn clear_excludes(&mut self) -> Result<()> {
        if self.is_active() {
            return Err(OverrideError::InvalidState("exclude list is frozen while the override is active"));
        }
        self.settings.exclude.clear();
        Ok(())
    }

    /// Removes material-less slots from direct nodes. Rejected while
    /// Active: slot indices are snapshot identity.
    pub fn purge_empty_slots(&mut self, doc: &mut SceneDocument) -> Result<usize> {
        if self.is_active() {
            return Err(OverrideError::InvalidState("cannot purge slots while the override is active"));
        }
        Ok(doc.purge_empty_slots())
    }

    /// Resets settings to their defaults. Rejected while Active.
    pub fn clear_session_data(&mut self) -> Result<()> {
        if self.is_active() {
            return Err(OverrideError::InvalidState("cannot clear session data while the override is active"));
        }
        self.settings = OverrideSettings::default();
        Ok(())
    }
}

/// Capture + backfill + substitute for one node. Idempotent: capture is
/// skip-if-present, a slot already holding the override is left untouched,
/// and backfill finds nothing to fill on a second pass. Safe to run on a
/// node reached through several traversal paths.
pub(crate) fn override_node(
    doc: &mut SceneDocument,
    snapshots: &mut SnapshotStore,
    id: NodeId,
    settings: &OverrideSettings,
    override_material: &str,
) {
    let Some(node) = doc.node(id) else {
        return;
    };
    if !node.kind.is_overridable() {
        return;
    }

    snapshots.capture(doc, &[id]);
    let generic = doc.materials.ensure_generic();
    let binding_originals =
        snapshots.get(id).map(|s| s.geometry_node_materials.clone()).unwrap_or_default();

    let node = doc.node_mut(id).expect("node looked up above");
    if node.slots.is_empty() {
        node.slots.push(MaterialSlot::assigned(generic));
    }
    for slot in node.slots.iter_mut() {
        if slot.material.is_none() {
            slot.material = Some(generic.to_string());
        }
    }

    for slot in node.slots.iter_mut() {
        let Some(current) = slot.material.as_deref() else {
            continue;
        };
        if current != override_material && !settings.is_excluded(current) {
            slot.material = Some(override_material.to_string());
        }
    }

    // Geometry-node bindings substitute by their snapshotted original, so
    // a re-run keeps honoring the exclusion decision made at capture time.
    for modifier in &mut node.geometry_nodes {
        for binding in &mut modifier.bindings {
            let Some(original) = binding_originals.get(&binding.node_name) else {
                continue;
            };
            if original != override_material && !settings.is_excluded(original) {
                binding.material = Some(override_material.to_string());
            }
        }
    }
}
