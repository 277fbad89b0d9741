use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet};

use crate::document::SceneDocument;
use crate::graph::enumerate_nodes;
use crate::persist::SessionMarker;
use crate::session::OverrideSession;
use crate::snapshot::{has_snapshot_props, SnapshotStore};

/// A material must be used more than this multiple of the average before
/// it looks like an override. Tuned toward false positives: a wrong
/// Active verdict costs a no-op cancel, a wrong Inactive verdict leaves
/// the scene stuck overridden.
pub const DOMINANCE_FACTOR: f32 = 2.0;
/// Retained-but-unused materials hiding under an override, below which
/// dominance alone is not believed.
pub const MIN_RETAINED_MATERIALS: usize = 4;

/// Confidence inputs for the classifier, separated out so tests can force
/// either verdict deterministically.
#[derive(Debug, Clone, Default)]
pub struct UsageStats {
    /// Usage per library material across Mesh/Curve nodes with at least
    /// one slot. Materials nothing points at count as zero: a scene full
    /// of unused (hidden) materials drags the average down, which is what
    /// an override looks like.
    pub counts: BTreeMap<String, usize>,
    /// Materials carrying the logical-retain flag.
    pub retained: BTreeSet<String>,
    /// Nodes carrying snapshot props (the override-internal marker).
    pub marker_nodes: usize,
}

impl UsageStats {
    pub fn collect(doc: &SceneDocument) -> Self {
        let mut stats = Self::default();
        for id in enumerate_nodes(doc) {
            let Some(node) = doc.node(id) else {
                continue;
            };
            if !node.kind.is_overridable() || node.slots.is_empty() {
                continue;
            }
            if has_snapshot_props(node) {
                stats.marker_nodes += 1;
            }
            for material in node.slot_materials() {
                *stats.counts.entry(material.to_string()).or_insert(0) += 1;
            }
        }
        for name in doc.materials.keys() {
            stats.counts.entry(name.to_string()).or_insert(0);
        }
        for name in doc.materials.retained_names() {
            stats.retained.insert(name.to_string());
        }
        stats
    }

    pub fn total_assignments(&self) -> usize {
        self.counts.values().sum()
    }

    /// Average assignments per library material.
    pub fn avg_usage(&self) -> f32 {
        if self.counts.is_empty() {
            return 0.0;
        }
        self.total_assignments() as f32 / self.counts.len() as f32
    }

    /// Most-used material; ties break to the lexically first name so the
    /// verdict is deterministic.
    pub fn most_common(&self) -> Option<(&str, usize)> {
        let mut best: Option<(&str, usize)> = None;
        for (name, &count) in &self.counts {
            if best.map(|(_, c)| count > c).unwrap_or(true) {
                best = Some((name.as_str(), count));
            }
        }
        best
    }

    pub fn retained_besides(&self, material: &str) -> usize {
        self.retained.iter().filter(|name| name.as_str() != material).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryVerdict {
    /// The explicit persisted marker said Active.
    ExplicitActive,
    /// No marker, but material usage looks overridden.
    LikelyActive { override_material: String },
    Inactive,
}

/// Heuristic half of the detector: histogram in, verdict out. A dominant
/// material alone is not enough; it must be backed by retained materials
/// hiding under it or by at least one node-level snapshot marker.
pub fn classify(stats: &UsageStats) -> RecoveryVerdict {
    let Some((material, count)) = stats.most_common() else {
        return RecoveryVerdict::Inactive;
    };
    if count as f32 <= DOMINANCE_FACTOR * stats.avg_usage() {
        return RecoveryVerdict::Inactive;
    }
    let corroborated =
        stats.retained_besides(material) >= MIN_RETAINED_MATERIALS || stats.marker_nodes > 0;
    if corroborated {
        RecoveryVerdict::LikelyActive { override_material: material.to_string() }
    } else {
        RecoveryVerdict::Inactive
    }
}

/// Runs once per document load, before any UI reflects session status.
/// Priority 1 is the explicit persisted marker; priority 2 the usage
/// heuristic. On an Active outcome the session is force-set with whatever
/// snapshot state the node props still hold, so a cancel is always legal
/// afterwards. An Inactive outcome leaves baseline capture to the caller's
/// deferred queue.
pub fn run(doc: &mut SceneDocument, session: &mut OverrideSession) -> RecoveryVerdict {
    let marker = match SessionMarker::load(doc) {
        Ok(marker) => marker,
        Err(err) => {
            warn!("recovery: persisted marker unreadable ({err}), falling back to heuristic");
            None
        }
    };

    if let Some(marker) = marker {
        if !marker.active {
            // An explicit inactive marker is trusted; no guessing. The
            // persisted settings still come back so the UI shows them.
            session.settings = marker.into_settings();
            return RecoveryVerdict::Inactive;
        }

        let mut settings = marker.into_settings();
        settings.override_material = settings.override_material.filter(|name| {
            let resolves = doc.materials.has(name);
            if !resolves {
                warn!("recovery: persisted override material '{name}' no longer resolves");
            }
            resolves
        });
        settings.exclude.retain(|name| {
            let resolves = doc.materials.has(name);
            if !resolves {
                warn!("recovery: persisted exclude material '{name}' no longer resolves, dropped");
            }
            resolves
        });
        session.settings = settings;

        let nodes = enumerate_nodes(doc);
        let (snapshots, corrupt) = SnapshotStore::rebuild_from_props(doc, &nodes);
        if corrupt > 0 {
            warn!("recovery: {corrupt} node snapshot(s) were corrupt and skipped");
        }
        info!("recovery: explicit marker found, session restored as active");
        session.force_active(snapshots);
        return RecoveryVerdict::ExplicitActive;
    }

    let stats = UsageStats::collect(doc);
    let verdict = classify(&stats);
    if let RecoveryVerdict::LikelyActive { override_material } = &verdict {
        info!(
            "recovery: no marker, but '{override_material}' dominates material usage; \
             forcing session active so it can be cancelled"
        );
        session.settings.override_material = Some(override_material.clone());
        let nodes = enumerate_nodes(doc);
        let (snapshots, corrupt) = SnapshotStore::rebuild_from_props(doc, &nodes);
        if corrupt > 0 {
            warn!("recovery: {corrupt} node snapshot(s) were corrupt and skipped");
        }
        session.force_active(snapshots);
    }
    verdict
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats_with(counts: &[(&str, usize)], retained: &[&str], marker_nodes: usize) -> UsageStats {
        UsageStats {
            counts: counts.iter().map(|(name, count)| (name.to_string(), *count)).collect(),
            retained: retained.iter().map(|name| name.to_string()).collect(),
            marker_nodes,
        }
    }

    #[test]
    fn dominant_material_with_retained_backing_reads_active() {
        let stats = stats_with(
            &[("Override", 9), ("Wood", 1), ("Steel", 1)],
            &["Wood", "Steel", "Glass", "Cloth", "Skin"],
            0,
        );
        assert_eq!(
            classify(&stats),
            RecoveryVerdict::LikelyActive { override_material: "Override".to_string() }
        );
    }

    #[test]
    fn dominance_without_corroboration_reads_inactive() {
        let stats = stats_with(&[("Override", 9), ("Wood", 1), ("Steel", 1)], &["Wood"], 0);
        assert_eq!(classify(&stats), RecoveryVerdict::Inactive);
    }

    #[test]
    fn node_marker_substitutes_for_retained_materials() {
        let stats = stats_with(&[("Override", 9), ("Wood", 1), ("Steel", 1)], &[], 1);
        assert_eq!(
            classify(&stats),
            RecoveryVerdict::LikelyActive { override_material: "Override".to_string() }
        );
    }

    #[test]
    fn balanced_histogram_reads_inactive() {
        let stats = stats_with(
            &[("A", 2), ("B", 2), ("C", 1), ("D", 2)],
            &["A", "B", "C", "D", "E"],
            3,
        );
        assert_eq!(classify(&stats), RecoveryVerdict::Inactive);
    }

    #[test]
    fn empty_scene_reads_inactive() {
        assert_eq!(classify(&UsageStats::default()), RecoveryVerdict::Inactive);
    }
}
