use clay_engine::document::{MaterialSlot, NodeKind, SceneDocument, SceneNode};
use clay_engine::material_library::MaterialDefinition;
use clay_engine::recovery::RecoveryVerdict;
use clay_engine::{OverrideController, OverrideStatus};

fn build_scene() -> (SceneDocument, Vec<clay_engine::document::NodeId>) {
    let mut doc = SceneDocument::default();
    for name in ["Red", "Green", "Blue", "White"] {
        doc.materials.create(MaterialDefinition::named(name));
    }
    let mut ids = Vec::new();
    for (name, material) in [("crate", "Red"), ("barrel", "Green"), ("pipe", "Blue")] {
        let mut node = SceneNode::new(name, NodeKind::Mesh);
        node.slots.push(MaterialSlot::assigned(material));
        node.slots.push(MaterialSlot::empty());
        ids.push(node.id);
        doc.nodes.push(node);
    }
    (doc, ids)
}

/// Apply, save mid-session, drop every in-memory structure, reload: the
/// persisted marker plus the node props must reconstruct a session that
/// cancels back to the exact original assignment.
#[test]
fn crashed_session_recovers_across_save_and_reload() {
    let (mut doc, ids) = build_scene();

    let mut controller = OverrideController::new();
    controller.on_document_loaded(&mut doc);
    controller.drain_deferred(&mut doc);
    controller.set_override_material(&doc, Some("White")).expect("set override");
    controller.add_exclude(&doc, "Green").expect("exclude Green");
    controller.apply(&mut doc).expect("apply");
    controller.on_before_save(&mut doc);

    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("overridden_scene.json");
    doc.save_to_path(&path).expect("save document");
    drop(controller);
    drop(doc);

    let mut doc = SceneDocument::load_from_path(&path).expect("load document");
    let mut controller = OverrideController::new();
    assert_eq!(controller.on_document_loaded(&mut doc), RecoveryVerdict::ExplicitActive);
    assert_eq!(controller.status(), OverrideStatus::Active);
    assert_eq!(controller.session().settings.exclude, vec!["Green".to_string()]);
    assert!(controller.session().snapshot_count() >= 3);

    controller.cancel(&mut doc).expect("cancel recovered session");
    let expected = [Some("Red"), Some("Green"), Some("Blue")];
    for (id, original) in ids.iter().zip(expected) {
        let node = doc.node(*id).expect("node survives reload");
        assert_eq!(node.slots[0].material.as_deref(), original);
        assert_eq!(node.slots[1].material, None);
        assert!(node.props.is_empty(), "{} kept snapshot props", node.name);
    }
}

#[test]
fn before_save_persists_current_fields_not_a_stale_copy() {
    let (mut doc, _) = build_scene();
    let mut controller = OverrideController::new();
    controller.on_document_loaded(&mut doc);
    controller.drain_deferred(&mut doc);

    controller.set_override_material(&doc, Some("White")).expect("set override");
    controller.on_before_save(&mut doc);
    assert_eq!(doc.props.get("override_active"), Some(&serde_json::json!(false)));

    controller.apply(&mut doc).expect("apply");
    controller.set_keep_generic(true);
    controller.on_before_save(&mut doc);
    assert_eq!(doc.props.get("override_active"), Some(&serde_json::json!(true)));
    assert_eq!(doc.props.get("keep_generic_material"), Some(&serde_json::json!(true)));
    assert_eq!(doc.props.get("override_material"), Some(&serde_json::json!("White")));
}

#[test]
fn clean_exit_reverts_and_persists_inactive_marker() {
    let (mut doc, ids) = build_scene();
    let mut controller = OverrideController::new();
    controller.on_document_loaded(&mut doc);
    controller.drain_deferred(&mut doc);
    controller.set_override_material(&doc, Some("White")).expect("set override");
    controller.apply(&mut doc).expect("apply");
    controller.on_before_save(&mut doc);

    controller.on_before_exit(&mut doc);
    assert_eq!(controller.status(), OverrideStatus::Inactive);
    assert_eq!(doc.props.get("override_active"), Some(&serde_json::json!(false)));
    let node = doc.node(ids[0]).expect("node");
    assert_eq!(node.slots[0].material.as_deref(), Some("Red"));
}

/// A revert that cannot fully restore (a material was deleted externally)
/// must leave the active marker in place so the next load can retry,
/// instead of silently recording a clean shutdown.
#[test]
fn partial_exit_revert_keeps_the_active_marker() {
    let (mut doc, _) = build_scene();
    let mut controller = OverrideController::new();
    controller.on_document_loaded(&mut doc);
    controller.drain_deferred(&mut doc);
    controller.set_override_material(&doc, Some("White")).expect("set override");
    controller.apply(&mut doc).expect("apply");
    controller.on_before_save(&mut doc);

    assert!(doc.materials.remove("Blue"), "external deletion");
    controller.on_before_exit(&mut doc);
    assert_eq!(doc.props.get("override_active"), Some(&serde_json::json!(true)));

    // The document is still loadable and the retry path still works.
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("partial_exit.json");
    doc.save_to_path(&path).expect("save document");
    let mut doc = SceneDocument::load_from_path(&path).expect("load document");
    let mut controller = OverrideController::new();
    assert_eq!(controller.on_document_loaded(&mut doc), RecoveryVerdict::ExplicitActive);
    controller.cancel(&mut doc).expect("retry cancel");
}
