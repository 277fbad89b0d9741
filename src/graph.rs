use std::collections::HashSet;

use crate::document::{NodeId, SceneDocument};

/// Flattens the document into one ordered traversal list: direct nodes in
/// scene order, then for every node holding a collection-instance
/// reference, that collection's members in collection order. Expansion is
/// one level deep; nested instancing is not followed. A node reachable
/// through two instance references is listed once.
pub fn enumerate_nodes(doc: &SceneDocument) -> Vec<NodeId> {
    let mut out = Vec::with_capacity(doc.nodes.len());
    let mut seen = HashSet::new();

    for node in &doc.nodes {
        if seen.insert(node.id) {
            out.push(node.id);
        }
    }
    for node in &doc.nodes {
        let Some(collection_id) = node.instance_collection else {
            continue;
        };
        let Some(collection) = doc.collection(collection_id) else {
            continue;
        };
        for member in &collection.members {
            if seen.insert(member.id) {
                out.push(member.id);
            }
        }
    }
    out
}
