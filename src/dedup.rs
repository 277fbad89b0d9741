use log::info;
use std::collections::HashSet;

use crate::document::{NodeId, NodeKind, SceneDocument, SceneNode};

/// Signatures quantize coordinates to 5 decimal places, so meshes that
/// differ only by float noise below that threshold collapse together.
const QUANT_SCALE: f64 = 1e5;

fn quantize(value: f32) -> i64 {
    (f64::from(value) * QUANT_SCALE).round() as i64
}

/// Content-addressed structural signature: world-transformed vertex
/// positions quantized and sorted into canonical order, combined with the
/// node's quantized world location. None for non-Mesh nodes and meshes
/// without geometry data.
pub fn signature(doc: &SceneDocument, node: &SceneNode) -> Option<blake3::Hash> {
    if node.kind != NodeKind::Mesh {
        return None;
    }
    let geometry = doc.geometries.get(&node.geometry?)?;
    let matrix = node.transform.to_matrix();

    let mut points: Vec<[i64; 3]> = geometry
        .vertices
        .iter()
        .map(|vertex| {
            let world = matrix.transform_point3(glam::Vec3::from_array(*vertex));
            [quantize(world.x), quantize(world.y), quantize(world.z)]
        })
        .collect();
    points.sort_unstable();

    let mut hasher = blake3::Hasher::new();
    for point in &points {
        for component in point {
            hasher.update(&component.to_le_bytes());
        }
    }
    let location = &node.transform.translation;
    for component in [quantize(location.x), quantize(location.y), quantize(location.z)] {
        hasher.update(&component.to_le_bytes());
    }
    Some(hasher.finalize())
}

/// Deletes duplicate Mesh nodes in one pass over the direct node list.
/// Traversal is scene order, and the first node observed for a signature
/// is the one that survives; running twice removes nothing the second
/// time. Returns the number of nodes deleted.
pub fn purge_duplicates(doc: &mut SceneDocument) -> usize {
    let mut seen: HashSet<[u8; 32]> = HashSet::new();
    let mut doomed: Vec<NodeId> = Vec::new();
    for node in &doc.nodes {
        let Some(sig) = signature(doc, node) else {
            continue;
        };
        if !seen.insert(*sig.as_bytes()) {
            doomed.push(node.id);
        }
    }
    if doomed.is_empty() {
        return 0;
    }
    doc.nodes.retain(|node| !doomed.contains(&node.id));
    info!("purged {} duplicate node(s)", doomed.len());
    doomed.len()
}
