use log::{debug, warn};
use std::collections::BTreeMap;

use crate::document::{CollectionFlags, CollectionId, NodeId, SceneCollection, SceneDocument};
use crate::session::{override_node, OverrideSettings};
use crate::snapshot::{clear_node_props, SnapshotStore};

pub const STAGING_COLLECTION: &str = "material_override_staging";

/// Session-owned record of the staging collection and which source
/// collections have already been materialized into it. Keyed by source so
/// a second apply (after a partially failed cancel) reuses the existing
/// copies instead of growing a second set.
#[derive(Debug)]
pub struct StagingSet {
    pub collection: CollectionId,
    pub materialized: BTreeMap<CollectionId, Vec<NodeId>>,
}

/// Deep-copies every instanced collection's Mesh/Curve members into the
/// hidden staging collection, gives each copy its own geometry data, and
/// snapshots + overrides the copies immediately. Returns the ids of newly
/// materialized nodes; collections materialized by an earlier call
/// contribute nothing.
pub fn materialize_instances(
    doc: &mut SceneDocument,
    snapshots: &mut SnapshotStore,
    staging: &mut Option<StagingSet>,
    settings: &OverrideSettings,
    override_material: &str,
) -> Vec<NodeId> {
    let mut sources: Vec<CollectionId> = Vec::new();
    for node in &doc.nodes {
        if let Some(id) = node.instance_collection {
            if !sources.contains(&id) {
                sources.push(id);
            }
        }
    }
    if sources.is_empty() {
        return Vec::new();
    }

    let staging_id = match staging {
        Some(set) => set.collection,
        None => {
            let mut collection = SceneCollection::new(STAGING_COLLECTION);
            collection.flags = CollectionFlags::staging();
            let id = collection.id;
            doc.collections.push(collection);
            *staging = Some(StagingSet { collection: id, materialized: BTreeMap::new() });
            debug!("staging collection created");
            id
        }
    };

    let mut new_ids = Vec::new();
    for source_id in sources {
        let set = staging.as_mut().expect("staging set initialized above");
        if set.materialized.contains_key(&source_id) {
            debug!("collection {source_id} already materialized, reusing copies");
            continue;
        }
        let Some(source) = doc.collection(source_id) else {
            warn!("instanced collection {source_id} does not exist, skipping");
            continue;
        };
        if source.id == staging_id {
            continue;
        }

        let templates: Vec<_> =
            source.members.iter().filter(|member| member.kind.is_overridable()).cloned().collect();
        let mut copy_ids = Vec::with_capacity(templates.len());
        for mut copy in templates {
            copy.id = NodeId::new();
            copy.name = format!("{}_staged", copy.name);
            copy.instance_collection = None;
            // A copy starts its own history: template snapshot props do not
            // describe it.
            clear_node_props(&mut copy);
            if let Some(geometry) = copy.geometry {
                if let Some(data) = doc.geometries.get(&geometry).cloned() {
                    copy.geometry = Some(doc.add_geometry(data));
                }
            }
            let id = copy.id;
            doc.collection_mut(staging_id).expect("staging collection exists").members.push(copy);
            copy_ids.push(id);
        }

        for &id in &copy_ids {
            override_node(doc, snapshots, id, settings, override_material);
        }
        staging
            .as_mut()
            .expect("staging set initialized above")
            .materialized
            .insert(source_id, copy_ids.clone());
        new_ids.extend(copy_ids);
    }
    new_ids
}

/// Deletes the staging collection and every materialized copy in it. The
/// engine restores snapshots first; a copy deleted here without a prior
/// restore can never be reverted.
pub fn teardown(doc: &mut SceneDocument, staging: &mut Option<StagingSet>) {
    let Some(set) = staging.take() else {
        return;
    };
    match doc.remove_collection(set.collection) {
        Some(collection) => {
            debug!("staging collection deleted ({} copies discarded)", collection.members.len());
        }
        None => warn!("staging collection was already removed externally"),
    }
}
