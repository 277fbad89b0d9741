use anyhow::{Context, Result};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use uuid::Uuid;

use crate::material_library::MaterialLibrary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionId(Uuid);

impl CollectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GeometryId(Uuid);

impl GeometryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Mesh,
    Curve,
    Other,
}

impl NodeKind {
    /// Mesh and Curve nodes carry material slots; everything else is
    /// skipped by capture, backfill and substitution.
    pub fn is_overridable(self) -> bool {
        matches!(self, NodeKind::Mesh | NodeKind::Curve)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vec3Data {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuatData {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for QuatData {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }
    }
}

impl From<glam::Vec3> for Vec3Data {
    fn from(value: glam::Vec3) -> Self {
        Self { x: value.x, y: value.y, z: value.z }
    }
}

impl From<Vec3Data> for glam::Vec3 {
    fn from(value: Vec3Data) -> Self {
        glam::Vec3::new(value.x, value.y, value.z)
    }
}

impl From<glam::Quat> for QuatData {
    fn from(value: glam::Quat) -> Self {
        let v = value.normalize();
        Self { x: v.x, y: v.y, z: v.z, w: v.w }
    }
}

impl From<QuatData> for glam::Quat {
    fn from(value: QuatData) -> Self {
        glam::Quat::from_xyzw(value.x, value.y, value.z, value.w)
    }
}

fn default_scale() -> Vec3Data {
    Vec3Data { x: 1.0, y: 1.0, z: 1.0 }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transform3D {
    #[serde(default)]
    pub translation: Vec3Data,
    #[serde(default)]
    pub rotation: QuatData,
    #[serde(default = "default_scale")]
    pub scale: Vec3Data,
}

impl Default for Transform3D {
    fn default() -> Self {
        Self { translation: Vec3Data::default(), rotation: QuatData::default(), scale: default_scale() }
    }
}

impl Transform3D {
    pub fn to_matrix(&self) -> glam::Mat4 {
        glam::Mat4::from_scale_rotation_translation(
            self.scale.clone().into(),
            self.rotation.clone().into(),
            self.translation.clone().into(),
        )
    }
}

/// One material slot. Slot order within a node is significant: the index is
/// part of the identity a snapshot restores against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaterialSlot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material: Option<String>,
}

impl MaterialSlot {
    pub fn assigned(material: impl Into<String>) -> Self {
        Self { material: Some(material.into()) }
    }

    pub fn empty() -> Self {
        Self { material: None }
    }
}

/// A "set material" node inside a procedural geometry graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialNodeBinding {
    pub node_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeometryNodesModifier {
    pub name: String,
    #[serde(default)]
    pub bindings: Vec<MaterialNodeBinding>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeometryData {
    pub vertices: Vec<[f32; 3]>,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CollectionFlags: u8 {
        const HIDDEN = 1 << 0;
        const UNSELECTABLE = 1 << 1;
        const NON_RENDERING = 1 << 2;
    }
}

mod collection_flags_serde {
    use super::CollectionFlags;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(flags: &CollectionFlags, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(flags.bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<CollectionFlags, D::Error> {
        let bits = u8::deserialize(deserializer)?;
        Ok(CollectionFlags::from_bits_truncate(bits))
    }
}

impl CollectionFlags {
    /// Flag set used for the session's staging collection.
    pub fn staging() -> Self {
        Self::HIDDEN | Self::UNSELECTABLE | Self::NON_RENDERING
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneCollection {
    pub id: CollectionId,
    pub name: String,
    #[serde(default, with = "collection_flags_serde")]
    pub flags: CollectionFlags,
    #[serde(default)]
    pub members: Vec<SceneNode>,
}

impl SceneCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self { id: CollectionId::new(), name: name.into(), flags: CollectionFlags::empty(), members: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneNode {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub transform: Transform3D,
    #[serde(default)]
    pub slots: SmallVec<[MaterialSlot; 4]>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub geometry_nodes: Vec<GeometryNodesModifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_collection: Option<CollectionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<GeometryId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub props: BTreeMap<String, serde_json::Value>,
}

impl SceneNode {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
            kind,
            transform: Transform3D::default(),
            slots: SmallVec::new(),
            geometry_nodes: Vec::new(),
            instance_collection: None,
            geometry: None,
            props: BTreeMap::new(),
        }
    }

    pub fn slot_materials(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().filter_map(|slot| slot.material.as_deref())
    }
}

/// The single mutable scene document. Direct nodes keep scene order;
/// instanced templates and the session staging collection live in
/// `collections`; `props` is the document-level key/value storage the
/// session marker persists into.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneDocument {
    #[serde(default)]
    pub nodes: Vec<SceneNode>,
    #[serde(default)]
    pub collections: Vec<SceneCollection>,
    #[serde(default)]
    pub geometries: BTreeMap<GeometryId, GeometryData>,
    #[serde(default)]
    pub materials: MaterialLibrary,
    #[serde(default)]
    pub props: BTreeMap<String, serde_json::Value>,
}

impl SceneDocument {
    pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes
            .iter()
            .find(|node| node.id == id)
            .or_else(|| self.collections.iter().flat_map(|c| c.members.iter()).find(|node| node.id == id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        if let Some(index) = self.nodes.iter().position(|node| node.id == id) {
            return self.nodes.get_mut(index);
        }
        self.collections.iter_mut().flat_map(|c| c.members.iter_mut()).find(|node| node.id == id)
    }

    pub fn collection(&self, id: CollectionId) -> Option<&SceneCollection> {
        self.collections.iter().find(|c| c.id == id)
    }

    pub fn collection_mut(&mut self, id: CollectionId) -> Option<&mut SceneCollection> {
        self.collections.iter_mut().find(|c| c.id == id)
    }

    pub fn remove_collection(&mut self, id: CollectionId) -> Option<SceneCollection> {
        let index = self.collections.iter().position(|c| c.id == id)?;
        Some(self.collections.remove(index))
    }

    pub fn add_geometry(&mut self, data: GeometryData) -> GeometryId {
        let id = GeometryId::new();
        self.geometries.insert(id, data);
        id
    }

    /// Number of nodes (direct or collection members) sharing a geometry.
    /// More than one user means the data is linked, not independently owned.
    pub fn geometry_users(&self, id: GeometryId) -> usize {
        self.nodes
            .iter()
            .chain(self.collections.iter().flat_map(|c| c.members.iter()))
            .filter(|node| node.geometry == Some(id))
            .count()
    }

    /// Removes material-less slots from direct Mesh/Curve nodes. Returns the
    /// number of slots removed. Callers must not run this mid-session: slot
    /// indices are snapshot identity.
    pub fn purge_empty_slots(&mut self) -> usize {
        let mut removed = 0;
        for node in &mut self.nodes {
            if !node.kind.is_overridable() {
                continue;
            }
            let before = node.slots.len();
            node.slots.retain(|slot| slot.material.is_some());
            removed += before - node.slots.len();
        }
        removed
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("Reading document file {}", path.display()))?;
        let doc = serde_json::from_slice::<SceneDocument>(&bytes)
            .with_context(|| format!("Parsing document file {}", path.display()))?;
        Ok(doc)
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Creating document directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json.as_bytes())
            .with_context(|| format!("Writing document file {}", path.display()))?;
        Ok(())
    }
}
