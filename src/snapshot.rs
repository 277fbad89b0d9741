use log::{debug, warn};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::document::{NodeId, SceneDocument, SceneNode};
use crate::errors::{OverrideError, Result};

pub const PROP_ORIGINAL_MATERIALS: &str = "_original_materials";
pub const PROP_ORIGINAL_GEOM_NODE_MATERIALS: &str = "_original_geom_node_materials";
pub const PROP_HAD_NO_MATERIALS: &str = "_had_no_materials";
pub const PROP_EMPTY_SLOT_PREFIX: &str = "_empty_slot_";

/// Per-node record of pre-override material state. Mirrored into the
/// node's prop bag at capture time so it survives a host crash.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeSnapshot {
    /// Original material per slot, in slot order.
    pub slots: Vec<Option<String>>,
    /// Set-material binding name -> original material, across all
    /// geometry-nodes modifiers of the node.
    pub geometry_node_materials: BTreeMap<String, String>,
    pub had_no_slots: bool,
    pub empty_slots: BTreeSet<usize>,
}

impl NodeSnapshot {
    fn of_node(node: &SceneNode) -> Self {
        let slots: Vec<Option<String>> = node.slots.iter().map(|slot| slot.material.clone()).collect();
        let empty_slots = slots
            .iter()
            .enumerate()
            .filter(|(_, material)| material.is_none())
            .map(|(i, _)| i)
            .collect();
        let mut geometry_node_materials = BTreeMap::new();
        for modifier in &node.geometry_nodes {
            for binding in &modifier.bindings {
                if let Some(material) = &binding.material {
                    geometry_node_materials.insert(binding.node_name.clone(), material.clone());
                }
            }
        }
        Self { had_no_slots: slots.is_empty(), slots, geometry_node_materials, empty_slots }
    }
}

/// Counts reported by a restore pass. The pass never aborts; callers decide
/// whether a nonzero failure count is worth surfacing.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreReport {
    pub restored: usize,
    pub missing_materials: usize,
    pub missing_nodes: usize,
}

/// Session-owned store of node snapshots. Capture is skip-if-present, so at
/// most one original state exists per node per session; restore consumes
/// the snapshot.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    snapshots: HashMap<NodeId, NodeSnapshot>,
}

impl SnapshotStore {
    pub fn is_captured(&self, id: NodeId) -> bool {
        self.snapshots.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeSnapshot> {
        self.snapshots.get(&id)
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }

    /// Records current material state for every overridable node in `nodes`
    /// that has no snapshot yet. Referenced materials get their retained
    /// flag set so they cannot be garbage-collected while hidden under the
    /// override. Re-invoking on a captured node is a no-op.
    pub fn capture(&mut self, doc: &mut SceneDocument, nodes: &[NodeId]) {
        for &id in nodes {
            if self.snapshots.contains_key(&id) {
                continue;
            }
            let Some(node) = doc.node(id) else {
                continue;
            };
            if !node.kind.is_overridable() {
                continue;
            }
            let snapshot = NodeSnapshot::of_node(node);
            for name in snapshot.slots.iter().flatten().chain(snapshot.geometry_node_materials.values()) {
                if !doc.materials.set_retained(name) {
                    debug!("capture: material '{name}' referenced by a slot is not in the library");
                }
            }
            let node = doc.node_mut(id).expect("node looked up above");
            write_node_props(node, &snapshot);
            self.snapshots.insert(id, snapshot);
        }
    }

    /// Writes original material state back for every snapshotted node and
    /// consumes the snapshots. Missing materials leave the slot at its
    /// override value (logged, counted); the node's props are kept in that
    /// case so a later load can retry the revert.
    pub fn restore(&mut self, doc: &mut SceneDocument, keep_generic: bool) -> RestoreReport {
        let mut report = RestoreReport::default();
        let generic = doc.materials.ensure_generic();
        let mut ids: Vec<NodeId> = self.snapshots.keys().copied().collect();
        ids.sort();

        for id in ids {
            let snapshot = self.snapshots.remove(&id).expect("id collected from store");
            let Some(node) = doc.node(id) else {
                debug!("restore: node {id} no longer exists, dropping its snapshot");
                report.missing_nodes += 1;
                continue;
            };
            let node_name = node.name.clone();
            let mut failed = 0;

            for (index, original) in snapshot.slots.iter().enumerate() {
                match original {
                    Some(material) => {
                        if doc.materials.has(material) {
                            let material = material.clone();
                            let node = doc.node_mut(id).expect("node looked up above");
                            if let Some(slot) = node.slots.get_mut(index) {
                                slot.material = Some(material.clone());
                            } else {
                                warn!("restore: slot {index} of '{node_name}' is gone");
                            }
                            doc.materials.clear_retained(&material);
                        } else {
                            warn!(
                                "restore: material '{material}' for slot {index} of '{node_name}' no \
                                 longer exists, slot keeps its override value"
                            );
                            failed += 1;
                        }
                    }
                    None => {
                        // Originally empty: cleared, unless the revert policy
                        // keeps the generic placeholder in place.
                        let node = doc.node_mut(id).expect("node looked up above");
                        if let Some(slot) = node.slots.get_mut(index) {
                            slot.material = keep_generic.then(|| generic.to_string());
                        }
                    }
                }
            }

            if snapshot.had_no_slots {
                let node = doc.node_mut(id).expect("node looked up above");
                if keep_generic {
                    for slot in node.slots.iter_mut() {
                        slot.material = Some(generic.to_string());
                    }
                } else {
                    node.slots.clear();
                }
            }

            // Geometry-node bindings restore by name; a binding that gained
            // or lost its modifier since capture is skipped.
            for (binding_name, material) in &snapshot.geometry_node_materials {
                if doc.materials.has(material) {
                    let material = material.clone();
                    doc.materials.clear_retained(&material);
                    let node = doc.node_mut(id).expect("node looked up above");
                    for modifier in &mut node.geometry_nodes {
                        for binding in &mut modifier.bindings {
                            if binding.node_name == *binding_name {
                                binding.material = Some(material.clone());
                            }
                        }
                    }
                } else {
                    warn!(
                        "restore: geometry-node material '{material}' on '{node_name}' no longer \
                         exists, binding keeps its override value"
                    );
                    failed += 1;
                }
            }

            let node = doc.node_mut(id).expect("node looked up above");
            if failed == 0 {
                clear_node_props(node);
                report.restored += 1;
            } else {
                report.missing_materials += failed;
            }
        }
        report
    }

    /// Rebuilds the store from node props, for recovery after a crash.
    /// Corrupt entries are logged and skipped; the count of skips is
    /// returned alongside.
    pub fn rebuild_from_props(doc: &SceneDocument, nodes: &[NodeId]) -> (Self, usize) {
        let mut store = Self::default();
        let mut corrupt = 0;
        for &id in nodes {
            let Some(node) = doc.node(id) else {
                continue;
            };
            match decode_node_props(node) {
                Ok(Some(snapshot)) => {
                    store.snapshots.insert(id, snapshot);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!("recovery: {err}");
                    corrupt += 1;
                }
            }
        }
        (store, corrupt)
    }
}

fn write_node_props(node: &mut SceneNode, snapshot: &NodeSnapshot) {
    let slots: Vec<Value> = snapshot
        .slots
        .iter()
        .map(|material| material.as_ref().map(|m| Value::String(m.clone())).unwrap_or(Value::Null))
        .collect();
    node.props.insert(PROP_ORIGINAL_MATERIALS.to_string(), Value::Array(slots));
    if !snapshot.geometry_node_materials.is_empty() {
        let map: serde_json::Map<String, Value> = snapshot
            .geometry_node_materials
            .iter()
            .map(|(name, material)| (name.clone(), Value::String(material.clone())))
            .collect();
        node.props.insert(PROP_ORIGINAL_GEOM_NODE_MATERIALS.to_string(), Value::Object(map));
    }
    if snapshot.had_no_slots {
        node.props.insert(PROP_HAD_NO_MATERIALS.to_string(), Value::Bool(true));
    }
    for index in &snapshot.empty_slots {
        node.props.insert(format!("{PROP_EMPTY_SLOT_PREFIX}{index}"), Value::Bool(true));
    }
}

pub fn clear_node_props(node: &mut SceneNode) {
    node.props.remove(PROP_ORIGINAL_MATERIALS);
    node.props.remove(PROP_ORIGINAL_GEOM_NODE_MATERIALS);
    node.props.remove(PROP_HAD_NO_MATERIALS);
    node.props.retain(|key, _| !key.starts_with(PROP_EMPTY_SLOT_PREFIX));
}

/// Whether the node carries any snapshot prop, however partial. Used as the
/// override-internal marker by the recovery heuristic.
pub fn has_snapshot_props(node: &SceneNode) -> bool {
    node.props.contains_key(PROP_ORIGINAL_MATERIALS)
        || node.props.contains_key(PROP_HAD_NO_MATERIALS)
        || node.props.keys().any(|key| key.starts_with(PROP_EMPTY_SLOT_PREFIX))
}

/// Validating read of the legacy prop shape. `Ok(None)` means the node has
/// no snapshot props at all; a present-but-malformed value is
/// `CorruptSnapshot`, never silently partial data.
pub fn decode_node_props(node: &SceneNode) -> Result<Option<NodeSnapshot>> {
    if !has_snapshot_props(node) {
        return Ok(None);
    }
    let corrupt = |reason: &str| OverrideError::CorruptSnapshot {
        node: node.name.clone(),
        reason: reason.to_string(),
    };

    let mut snapshot = NodeSnapshot::default();

    match node.props.get(PROP_ORIGINAL_MATERIALS) {
        Some(Value::Array(entries)) => {
            for entry in entries {
                match entry {
                    Value::String(name) => snapshot.slots.push(Some(name.clone())),
                    Value::Null => snapshot.slots.push(None),
                    _ => return Err(corrupt("slot entry is neither a material name nor null")),
                }
            }
        }
        Some(_) => return Err(corrupt("original-materials value is not an array")),
        None => {}
    }

    match node.props.get(PROP_ORIGINAL_GEOM_NODE_MATERIALS) {
        Some(Value::Object(map)) => {
            for (name, value) in map {
                let Value::String(material) = value else {
                    return Err(corrupt("geometry-node entry is not a material name"));
                };
                snapshot.geometry_node_materials.insert(name.clone(), material.clone());
            }
        }
        Some(_) => return Err(corrupt("geometry-node value is not an object")),
        None => {}
    }

    match node.props.get(PROP_HAD_NO_MATERIALS) {
        Some(Value::Bool(flag)) => snapshot.had_no_slots = *flag,
        Some(_) => return Err(corrupt("had-no-materials value is not a bool")),
        None => {}
    }

    for key in node.props.keys() {
        if let Some(suffix) = key.strip_prefix(PROP_EMPTY_SLOT_PREFIX) {
            let index: usize =
                suffix.parse().map_err(|_| corrupt("empty-slot key has a non-numeric index"))?;
            snapshot.empty_slots.insert(index);
        }
    }

    Ok(Some(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{MaterialSlot, NodeKind};

    #[test]
    fn props_round_trip_matches_snapshot() {
        let mut node = SceneNode::new("torus", NodeKind::Mesh);
        node.slots.push(MaterialSlot::assigned("Red"));
        node.slots.push(MaterialSlot::empty());
        let snapshot = NodeSnapshot::of_node(&node);

        write_node_props(&mut node, &snapshot);
        let decoded = decode_node_props(&node).expect("decode").expect("snapshot present");
        assert_eq!(decoded, snapshot);

        clear_node_props(&mut node);
        assert!(!has_snapshot_props(&node));
    }

    #[test]
    fn malformed_slot_array_is_corrupt() {
        let mut node = SceneNode::new("torus", NodeKind::Mesh);
        node.props.insert(
            PROP_ORIGINAL_MATERIALS.to_string(),
            serde_json::json!([{"not": "a name"}]),
        );
        let err = decode_node_props(&node).expect_err("must reject");
        assert!(matches!(err, OverrideError::CorruptSnapshot { .. }));
    }
}
