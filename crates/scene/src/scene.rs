use beachscape_common::{NodeId, Rgb, Transform};
use glam::Vec3;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::geometry::MeshData;
use crate::resources::{CubeImage, TextureImage};

/// Index into the scene's append-only mesh table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u32);

/// Named texture slots. Materials reference slots, and slots are filled
/// whenever the matching image finishes loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextureSlot {
    Sand,
    Wall,
    Metal,
    /// Base color of the n-th imported model primitive.
    Model(u32),
}

/// One of the two cube-map capture passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CaptureSlot {
    A,
    B,
}

impl CaptureSlot {
    pub fn index(self) -> usize {
        match self {
            CaptureSlot::A => 0,
            CaptureSlot::B => 1,
        }
    }

    pub fn other(self) -> Self {
        match self {
            CaptureSlot::A => CaptureSlot::B,
            CaptureSlot::B => CaptureSlot::A,
        }
    }
}

/// Surface description for a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Material {
    /// Lambert + Blinn-Phong shading with a base color texture.
    Phong {
        texture: TextureSlot,
        color: Rgb,
        double_sided: bool,
    },
    /// Mirror surface sampling a capture pass's cube map.
    Reflective { capture: CaptureSlot, reflectivity: f32 },
}

/// A drawable object in the scene.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub transform: Transform,
    pub mesh: MeshId,
    pub material: Material,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
}

/// Linear distance fog.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fog {
    pub color: Rgb,
    pub near: f32,
    pub far: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmbientLight {
    pub color: Rgb,
    pub intensity: f32,
}

/// Directional light shining from `position` toward `target`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    pub color: Rgb,
    pub intensity: f32,
    pub position: Vec3,
    pub target: Vec3,
    pub cast_shadow: bool,
}

impl DirectionalLight {
    /// Unit vector pointing from the lit surface toward the light.
    pub fn direction_to_light(&self) -> Vec3 {
        (self.position - self.target).try_normalize().unwrap_or(Vec3::Y)
    }
}

/// Where a capture pass renders from, and which node it feeds.
///
/// The fed node samples the capture's cube map, so it is left out of the
/// capture's own render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureProbe {
    pub position: Vec3,
    pub near: f32,
    pub far: f32,
    pub feeds: Option<NodeId>,
}

impl Default for CaptureProbe {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            near: 1.0,
            far: 1000.0,
            feeds: None,
        }
    }
}

/// A filled texture slot and the scene revision at which it was filled.
#[derive(Debug, Clone)]
pub struct TextureEntry {
    pub image: Arc<TextureImage>,
    pub revision: u64,
}

/// Errors from scene mutations.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("node not found: {0:?}")]
    UnknownNode(NodeId),
    #[error("mesh not found: {0:?}")]
    UnknownMesh(MeshId),
    #[error("invalid mesh {name}: attribute lengths or indices out of range")]
    InvalidMesh { name: String },
}

/// The diorama's scene graph.
///
/// Mutations are append-only: meshes and nodes are added, transforms change,
/// texture slots and the background get filled. Nothing is removed, so a
/// renderer holding a `MeshId` or `NodeId` never sees it dangle.
///
/// Uses BTreeMap for deterministic iteration order of nodes.
#[derive(Debug, Default)]
pub struct Scene {
    nodes: BTreeMap<NodeId, Node>,
    meshes: Vec<Arc<MeshData>>,
    textures: BTreeMap<TextureSlot, TextureEntry>,
    background: Option<Arc<CubeImage>>,
    background_revision: u64,
    fog: Option<Fog>,
    ambient: Option<AmbientLight>,
    directional: Option<DirectionalLight>,
    probes: [CaptureProbe; 2],
    revision: u64,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonic counter bumped by every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &BTreeMap<NodeId, Node> {
        &self.nodes
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn meshes(&self) -> &[Arc<MeshData>] {
        &self.meshes
    }

    pub fn mesh(&self, id: MeshId) -> Option<&MeshData> {
        self.meshes.get(id.0 as usize).map(|m| m.as_ref())
    }

    /// Add a mesh to the mesh table. Returns its id.
    pub fn add_mesh(&mut self, name: &str, mesh: MeshData) -> Result<MeshId, SceneError> {
        if !mesh.is_valid() {
            return Err(SceneError::InvalidMesh { name: name.into() });
        }
        let id = MeshId(self.meshes.len() as u32);
        tracing::debug!(
            name,
            vertices = mesh.vertex_count(),
            triangles = mesh.triangle_count(),
            "mesh added"
        );
        self.meshes.push(Arc::new(mesh));
        self.bump();
        Ok(id)
    }

    /// Attach a node. Returns its id.
    pub fn attach(&mut self, node: Node) -> Result<NodeId, SceneError> {
        if node.mesh.0 as usize >= self.meshes.len() {
            return Err(SceneError::UnknownMesh(node.mesh));
        }
        let id = NodeId::new();
        tracing::debug!(id = %id.short(), name = %node.name, "node attached");
        self.nodes.insert(id, node);
        self.bump();
        Ok(id)
    }

    /// Mutate a node's transform in place.
    pub fn update_transform(
        &mut self,
        id: NodeId,
        f: impl FnOnce(&mut Transform),
    ) -> Result<(), SceneError> {
        let node = self.nodes.get_mut(&id).ok_or(SceneError::UnknownNode(id))?;
        f(&mut node.transform);
        self.bump();
        Ok(())
    }

    /// Add `delta` to a node's Euler rotation.
    pub fn rotate(&mut self, id: NodeId, delta: Vec3) -> Result<(), SceneError> {
        self.update_transform(id, |t| t.rotation += delta)
    }

    pub fn set_texture(&mut self, slot: TextureSlot, image: TextureImage) {
        self.bump();
        tracing::debug!(?slot, width = image.width, height = image.height, "texture set");
        self.textures.insert(
            slot,
            TextureEntry {
                image: Arc::new(image),
                revision: self.revision,
            },
        );
    }

    pub fn texture(&self, slot: TextureSlot) -> Option<&TextureEntry> {
        self.textures.get(&slot)
    }

    pub fn textures(&self) -> &BTreeMap<TextureSlot, TextureEntry> {
        &self.textures
    }

    pub fn set_background(&mut self, cube: CubeImage) {
        self.bump();
        tracing::debug!(size = cube.size, "background set");
        self.background = Some(Arc::new(cube));
        self.background_revision = self.revision;
    }

    pub fn background(&self) -> Option<&CubeImage> {
        self.background.as_deref()
    }

    /// Revision at which the background was last set (0 if never).
    pub fn background_revision(&self) -> u64 {
        self.background_revision
    }

    pub fn set_fog(&mut self, fog: Fog) {
        self.fog = Some(fog);
        self.bump();
    }

    pub fn fog(&self) -> Option<Fog> {
        self.fog
    }

    pub fn set_ambient(&mut self, light: AmbientLight) {
        self.ambient = Some(light);
        self.bump();
    }

    pub fn ambient(&self) -> Option<AmbientLight> {
        self.ambient
    }

    pub fn set_directional(&mut self, light: DirectionalLight) {
        self.directional = Some(light);
        self.bump();
    }

    pub fn directional(&self) -> Option<DirectionalLight> {
        self.directional
    }

    pub fn set_probe(&mut self, slot: CaptureSlot, probe: CaptureProbe) {
        self.probes[slot.index()] = probe;
        self.bump();
    }

    pub fn probe(&self, slot: CaptureSlot) -> &CaptureProbe {
        &self.probes[slot.index()]
    }

    fn bump(&mut self) {
        self.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry;

    fn scene_with_mesh() -> (Scene, MeshId) {
        let mut scene = Scene::new();
        let mesh = scene
            .add_mesh("sphere", geometry::sphere(0.5, 8, 6))
            .unwrap();
        (scene, mesh)
    }

    fn node(mesh: MeshId) -> Node {
        Node {
            name: "test".into(),
            transform: Transform::default(),
            mesh,
            material: Material::Phong {
                texture: TextureSlot::Sand,
                color: Rgb::WHITE,
                double_sided: false,
            },
            cast_shadow: false,
            receive_shadow: false,
        }
    }

    #[test]
    fn attach_appends_and_bumps_revision() {
        let (mut scene, mesh) = scene_with_mesh();
        let before = scene.revision();
        let id = scene.attach(node(mesh)).unwrap();
        assert_eq!(scene.node_count(), 1);
        assert!(scene.get(id).is_some());
        assert!(scene.revision() > before);
    }

    #[test]
    fn attach_rejects_unknown_mesh() {
        let mut scene = Scene::new();
        let err = scene.attach(node(MeshId(3))).unwrap_err();
        assert!(matches!(err, SceneError::UnknownMesh(MeshId(3))));
        assert_eq!(scene.node_count(), 0);
    }

    #[test]
    fn add_mesh_rejects_out_of_range_indices() {
        let mut scene = Scene::new();
        let mut mesh = geometry::plane(1.0, 1.0, 1, 1);
        mesh.indices.push(99);
        mesh.indices.push(0);
        mesh.indices.push(1);
        assert!(scene.add_mesh("bad", mesh).is_err());
        assert!(scene.meshes().is_empty());
    }

    #[test]
    fn rotate_accumulates_without_normalizing() {
        let (mut scene, mesh) = scene_with_mesh();
        let id = scene.attach(node(mesh)).unwrap();
        for _ in 0..1000 {
            scene.rotate(id, Vec3::splat(0.01)).unwrap();
        }
        let r = scene.get(id).unwrap().transform.rotation;
        // 10 rad is well past a full turn and must not wrap.
        assert!((r.x - 10.0).abs() < 5e-3);
        assert!((r.y - 10.0).abs() < 5e-3);
        assert!((r.z - 10.0).abs() < 5e-3);
    }

    #[test]
    fn rotate_unknown_node_errors() {
        let mut scene = Scene::new();
        let ghost = NodeId::new();
        assert!(matches!(
            scene.rotate(ghost, Vec3::ONE),
            Err(SceneError::UnknownNode(id)) if id == ghost
        ));
    }

    #[test]
    fn texture_slot_records_revision() {
        let mut scene = Scene::new();
        assert!(scene.texture(TextureSlot::Metal).is_none());
        scene.set_texture(TextureSlot::Metal, TextureImage::solid(1, 1, [255; 4]));
        let entry = scene.texture(TextureSlot::Metal).unwrap();
        assert_eq!(entry.revision, scene.revision());
    }

    #[test]
    fn background_revision_tracks_last_set() {
        let mut scene = Scene::new();
        assert_eq!(scene.background_revision(), 0);
        let cube = CubeImage {
            size: 1,
            faces: std::array::from_fn(|_| vec![0u8; 4]),
        };
        scene.set_background(cube);
        assert_eq!(scene.background_revision(), scene.revision());
        assert!(scene.background().is_some());
    }

    #[test]
    fn capture_slot_helpers() {
        assert_eq!(CaptureSlot::A.other(), CaptureSlot::B);
        assert_eq!(CaptureSlot::B.index(), 1);
        assert_eq!(Scene::new().probe(CaptureSlot::A).far, 1000.0);
    }

    #[test]
    fn directional_light_direction() {
        let light = DirectionalLight {
            color: Rgb::WHITE,
            intensity: 1.0,
            position: Vec3::new(0.0, 10.0, 0.0),
            target: Vec3::ZERO,
            cast_shadow: true,
        };
        assert_eq!(light.direction_to_light(), Vec3::Y);
    }
}
