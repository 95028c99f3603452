//! Scene graph: the diorama's authoritative object state.
//!
//! # Invariants
//! - Nodes are only ever appended; nothing is removed while the frame loop runs.
//! - Every mutation bumps the scene revision, so renderers can skip re-syncing
//!   an unchanged scene.
//! - Asset completions may attach content between any two frames.

pub mod diorama;
pub mod geometry;
pub mod resources;
pub mod scene;

pub use diorama::{
    AssetPaths, CameraConfig, ConfigError, DioramaConfig, DioramaHandles, ModelPlacement,
    attach_model, build_diorama,
};
pub use geometry::MeshData;
pub use resources::{CubeImage, Model, ModelPrimitive, TextureImage};
pub use scene::{
    AmbientLight, CaptureProbe, CaptureSlot, DirectionalLight, Fog, Material, MeshId, Node,
    Scene, SceneError, TextureEntry, TextureSlot,
};

pub fn crate_info() -> &'static str {
    "beachscape-scene v0.1.0"
}
