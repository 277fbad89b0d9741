use clay_engine::document::{MaterialSlot, NodeKind, SceneDocument, SceneNode};
use clay_engine::material_library::MaterialDefinition;
use clay_engine::persist::SessionMarker;
use clay_engine::recovery::RecoveryVerdict;
use clay_engine::{OverrideController, OverrideStatus};

fn add_material(doc: &mut SceneDocument, name: &str) {
    doc.materials.create(MaterialDefinition::named(name));
}

fn mesh_with_material(doc: &mut SceneDocument, name: &str, material: &str) {
    let mut node = SceneNode::new(name, NodeKind::Mesh);
    node.slots.push(MaterialSlot::assigned(material));
    doc.nodes.push(node);
}

/// Nine of ten nodes wear the same material and five retained materials
/// hide underneath: the heuristic must call this an active session even
/// though the explicit marker is gone.
#[test]
fn dominant_usage_with_retained_materials_forces_active() {
    let mut doc = SceneDocument::default();
    add_material(&mut doc, "Override");
    for name in ["Wood", "Steel", "Glass", "Cloth", "Skin"] {
        add_material(&mut doc, name);
        doc.materials.set_retained(name);
    }
    for i in 0..9 {
        mesh_with_material(&mut doc, &format!("mesh_{i}"), "Override");
    }
    mesh_with_material(&mut doc, "odd_one", "Wood");

    let mut controller = OverrideController::new();
    let verdict = controller.on_document_loaded(&mut doc);
    assert_eq!(
        verdict,
        RecoveryVerdict::LikelyActive { override_material: "Override".to_string() }
    );
    assert_eq!(controller.status(), OverrideStatus::Active);
    assert_eq!(
        controller.session().settings.override_material.as_deref(),
        Some("Override")
    );

    // A forced-active session can always be cancelled.
    controller.cancel(&mut doc).expect("cancel after recovery");
    assert_eq!(controller.status(), OverrideStatus::Inactive);
}

#[test]
fn balanced_usage_stays_inactive_and_schedules_baseline_capture() {
    let mut doc = SceneDocument::default();
    for name in ["A", "B", "C"] {
        add_material(&mut doc, name);
    }
    mesh_with_material(&mut doc, "a1", "A");
    mesh_with_material(&mut doc, "b1", "B");
    mesh_with_material(&mut doc, "c1", "C");

    let mut controller = OverrideController::new();
    let verdict = controller.on_document_loaded(&mut doc);
    assert_eq!(verdict, RecoveryVerdict::Inactive);
    assert_eq!(controller.status(), OverrideStatus::Inactive);
    assert!(controller.pending_tasks() > 0);

    controller.drain_deferred(&mut doc);
    assert_eq!(controller.session().snapshot_count(), 3);
    assert!(doc.materials.has("Generic"));
}

#[test]
fn explicit_marker_wins_over_the_histogram() {
    let mut doc = SceneDocument::default();
    add_material(&mut doc, "White");
    add_material(&mut doc, "Red");
    // Balanced usage: the heuristic alone would say inactive.
    mesh_with_material(&mut doc, "a", "White");
    mesh_with_material(&mut doc, "b", "Red");
    let marker = SessionMarker {
        active: true,
        override_material: Some("White".to_string()),
        keep_generic: true,
        exclude: vec!["Red".to_string()],
    };
    marker.store(&mut doc);

    let mut controller = OverrideController::new();
    assert_eq!(controller.on_document_loaded(&mut doc), RecoveryVerdict::ExplicitActive);
    assert_eq!(controller.status(), OverrideStatus::Active);
    let settings = &controller.session().settings;
    assert_eq!(settings.override_material.as_deref(), Some("White"));
    assert_eq!(settings.exclude, vec!["Red".to_string()]);
    assert!(settings.keep_generic);
}

#[test]
fn unresolvable_persisted_names_are_dropped_silently() {
    let mut doc = SceneDocument::default();
    add_material(&mut doc, "Red");
    let marker = SessionMarker {
        active: true,
        override_material: Some("LongGone".to_string()),
        keep_generic: false,
        exclude: vec!["Red".to_string(), "AlsoGone".to_string()],
    };
    marker.store(&mut doc);

    let mut controller = OverrideController::new();
    assert_eq!(controller.on_document_loaded(&mut doc), RecoveryVerdict::ExplicitActive);
    let settings = &controller.session().settings;
    assert_eq!(settings.override_material, None);
    assert_eq!(settings.exclude, vec!["Red".to_string()]);
}

#[test]
fn explicit_inactive_marker_suppresses_the_heuristic() {
    let mut doc = SceneDocument::default();
    add_material(&mut doc, "Override");
    for name in ["Wood", "Steel", "Glass", "Cloth", "Skin"] {
        add_material(&mut doc, name);
        doc.materials.set_retained(name);
    }
    for i in 0..9 {
        mesh_with_material(&mut doc, &format!("mesh_{i}"), "Override");
    }
    mesh_with_material(&mut doc, "odd_one", "Wood");
    let marker = SessionMarker {
        active: false,
        override_material: Some("Override".to_string()),
        keep_generic: false,
        exclude: Vec::new(),
    };
    marker.store(&mut doc);

    let mut controller = OverrideController::new();
    assert_eq!(controller.on_document_loaded(&mut doc), RecoveryVerdict::Inactive);
    assert_eq!(controller.status(), OverrideStatus::Inactive);
    // Persisted settings still come back for the UI.
    assert_eq!(
        controller.session().settings.override_material.as_deref(),
        Some("Override")
    );
}

#[test]
fn corrupt_marker_falls_back_to_the_heuristic() {
    let mut doc = SceneDocument::default();
    add_material(&mut doc, "A");
    add_material(&mut doc, "B");
    mesh_with_material(&mut doc, "a", "A");
    mesh_with_material(&mut doc, "b", "B");
    doc.props.insert("override_active".to_string(), serde_json::json!("yes"));

    let mut controller = OverrideController::new();
    assert_eq!(controller.on_document_loaded(&mut doc), RecoveryVerdict::Inactive);
    assert_eq!(controller.status(), OverrideStatus::Inactive);
}
