use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the shared placeholder assigned to slots that had no material,
/// so that every slot is substitutable.
pub const GENERIC_MATERIAL: &str = "Generic";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialDefinition {
    pub name: String,
    pub label: String,
    pub base_color_factor: [f32; 4],
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub emissive_factor: [f32; 3],
}

impl MaterialDefinition {
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            base_color_factor: [1.0, 1.0, 1.0, 1.0],
            metallic_factor: 0.0,
            roughness_factor: 0.5,
            emissive_factor: [0.0, 0.0, 0.0],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MaterialEntry {
    definition: MaterialDefinition,
    /// Logical-reference flag: the material is held alive by a snapshot
    /// even when no live slot points at it.
    retained: bool,
    permanent: bool,
}

/// Name-keyed material table for one document. Material identity is the
/// name; names are unique by construction of the map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaterialLibrary {
    entries: BTreeMap<String, MaterialEntry>,
}

impl MaterialLibrary {
    pub fn create(&mut self, definition: MaterialDefinition) {
        let name = definition.name.clone();
        self.entries.insert(name, MaterialEntry { definition, retained: false, permanent: false });
    }

    /// Creates the generic placeholder on first use. Permanent: it survives
    /// with zero references, like the registry default material.
    pub fn ensure_generic(&mut self) -> &'static str {
        if !self.entries.contains_key(GENERIC_MATERIAL) {
            let mut definition = MaterialDefinition::named(GENERIC_MATERIAL);
            definition.roughness_factor = 1.0;
            self.entries.insert(
                GENERIC_MATERIAL.to_string(),
                MaterialEntry { definition, retained: false, permanent: true },
            );
            debug!("generic placeholder material created");
        }
        GENERIC_MATERIAL
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    pub fn definition(&self, name: &str) -> Option<&MaterialDefinition> {
        self.entries.get(name).map(|entry| &entry.definition)
    }

    pub fn set_retained(&mut self, name: &str) -> bool {
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.retained = true;
                true
            }
            None => false,
        }
    }

    pub fn clear_retained(&mut self, name: &str) -> bool {
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.retained = false;
                true
            }
            None => false,
        }
    }

    pub fn is_retained(&self, name: &str) -> bool {
        self.entries.get(name).map(|entry| entry.retained).unwrap_or(false)
    }

    pub fn retained_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter(|(_, entry)| entry.retained).map(|(name, _)| name.as_str())
    }

    /// Removes a material unless it is permanent. Returns whether an entry
    /// was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.entries.get(name) {
            Some(entry) if !entry.permanent => {
                self.entries.remove(name);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
