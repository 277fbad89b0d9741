use serde_json::Value;

use crate::document::SceneDocument;
use crate::errors::{OverrideError, Result};
use crate::session::{OverrideSession, OverrideSettings};

pub const KEY_OVERRIDE_ACTIVE: &str = "override_active";
pub const KEY_OVERRIDE_MATERIAL: &str = "override_material";
pub const KEY_KEEP_GENERIC: &str = "keep_generic_material";
pub const KEY_EXCLUDE_MATERIALS: &str = "exclude_materials";

/// The explicit session marker persisted in document-level storage. The
/// on-disk shape is the legacy one (plain keys, names not ids); reads
/// validate every value instead of proceeding with partial data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionMarker {
    pub active: bool,
    pub override_material: Option<String>,
    pub keep_generic: bool,
    pub exclude: Vec<String>,
}

impl SessionMarker {
    pub fn from_session(session: &OverrideSession) -> Self {
        Self {
            active: session.is_active(),
            override_material: session.settings.override_material.clone(),
            keep_generic: session.settings.keep_generic,
            exclude: session.settings.exclude.clone(),
        }
    }

    pub fn into_settings(self) -> OverrideSettings {
        OverrideSettings {
            override_material: self.override_material,
            exclude: self.exclude,
            keep_generic: self.keep_generic,
        }
    }

    pub fn store(&self, doc: &mut SceneDocument) {
        doc.props.insert(KEY_OVERRIDE_ACTIVE.to_string(), Value::Bool(self.active));
        doc.props.insert(
            KEY_OVERRIDE_MATERIAL.to_string(),
            Value::String(self.override_material.clone().unwrap_or_default()),
        );
        doc.props.insert(KEY_KEEP_GENERIC.to_string(), Value::Bool(self.keep_generic));
        doc.props.insert(
            KEY_EXCLUDE_MATERIALS.to_string(),
            Value::Array(self.exclude.iter().map(|name| Value::String(name.clone())).collect()),
        );
    }

    /// `Ok(None)` when no marker was ever persisted. Malformed values fail
    /// as corrupt instead of being half-read.
    pub fn load(doc: &SceneDocument) -> Result<Option<Self>> {
        let corrupt = |reason: &str| OverrideError::CorruptSnapshot {
            node: "<document>".to_string(),
            reason: reason.to_string(),
        };

        let active = match doc.props.get(KEY_OVERRIDE_ACTIVE) {
            Some(Value::Bool(flag)) => *flag,
            Some(_) => return Err(corrupt("override-active value is not a bool")),
            None => return Ok(None),
        };

        let override_material = match doc.props.get(KEY_OVERRIDE_MATERIAL) {
            Some(Value::String(name)) if name.is_empty() => None,
            Some(Value::String(name)) => Some(name.clone()),
            Some(_) => return Err(corrupt("override-material value is not a string")),
            None => None,
        };

        let keep_generic = match doc.props.get(KEY_KEEP_GENERIC) {
            Some(Value::Bool(flag)) => *flag,
            Some(_) => return Err(corrupt("keep-generic value is not a bool")),
            None => false,
        };

        let exclude = match doc.props.get(KEY_EXCLUDE_MATERIALS) {
            Some(Value::Array(entries)) => {
                let mut names = Vec::with_capacity(entries.len());
                for entry in entries {
                    let Value::String(name) = entry else {
                        return Err(corrupt("exclude entry is not a material name"));
                    };
                    names.push(name.clone());
                }
                names
            }
            Some(_) => return Err(corrupt("exclude-materials value is not an array")),
            None => Vec::new(),
        };

        Ok(Some(Self { active, override_material, keep_generic, exclude }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_round_trips_through_document_props() {
        let mut doc = SceneDocument::default();
        let marker = SessionMarker {
            active: true,
            override_material: Some("White".to_string()),
            keep_generic: true,
            exclude: vec!["Red".to_string(), "Glass".to_string()],
        };
        marker.store(&mut doc);
        let loaded = SessionMarker::load(&doc).expect("load marker").expect("marker present");
        assert_eq!(loaded, marker);
    }

    #[test]
    fn absent_marker_loads_as_none() {
        let doc = SceneDocument::default();
        assert!(SessionMarker::load(&doc).expect("load marker").is_none());
    }

    #[test]
    fn malformed_exclude_list_is_corrupt() {
        let mut doc = SceneDocument::default();
        doc.props.insert(KEY_OVERRIDE_ACTIVE.to_string(), Value::Bool(true));
        doc.props.insert(KEY_EXCLUDE_MATERIALS.to_string(), Value::String("Red".to_string()));
        let err = SessionMarker::load(&doc).expect_err("must reject");
        assert!(matches!(err, OverrideError::CorruptSnapshot { .. }));
    }
}
