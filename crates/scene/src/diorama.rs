//! One-time construction of the beach diorama.
//!
//! `build_diorama` lays out the static scene in a fixed order: fog, lights,
//! sand, walls, torus knot, reflective spheres and capture probes. Textures,
//! the background and the beach model arrive later through asset loads and
//! are attached with the append-only helpers here and on [`Scene`].

use beachscape_common::{NodeId, Rgb, Transform};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, PI};
use std::path::{Path, PathBuf};

use crate::geometry;
use crate::resources::Model;
use crate::scene::{
    AmbientLight, CaptureProbe, CaptureSlot, DirectionalLight, Fog, Material, Node, Scene,
    SceneError, TextureSlot,
};

/// Viewpoint and orbit-control settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub position: Vec3,
    pub target: Vec3,
    /// Fraction of the remaining orbit motion applied per frame.
    pub damping_factor: f32,
    pub enable_zoom: bool,
    pub min_distance: f32,
    pub max_distance: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_degrees: 75.0,
            near: 0.1,
            far: 100.0,
            position: Vec3::new(0.0, 0.0, 10.0),
            target: Vec3::ZERO,
            damping_factor: 0.25,
            enable_zoom: true,
            min_distance: 1.0,
            max_distance: 60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FogConfig {
    pub color: Rgb,
    pub near: f32,
    pub far: f32,
}

impl Default for FogConfig {
    fn default() -> Self {
        Self {
            color: Rgb::from_hex(0xffffff),
            near: 5.0,
            far: 30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    pub ambient_intensity: f32,
    pub directional_intensity: f32,
    pub directional_position: Vec3,
    pub shadow_map_size: u32,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            ambient_intensity: 0.5,
            directional_intensity: 1.0,
            directional_position: Vec3::new(70.0, 50.0, 50.0),
            shadow_map_size: 2048,
        }
    }
}

/// Asset locations relative to the asset root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetPaths {
    pub background: PathBuf,
    pub sand: PathBuf,
    pub wall: PathBuf,
    pub metal: PathBuf,
    pub model: PathBuf,
}

impl Default for AssetPaths {
    fn default() -> Self {
        Self {
            background: "images/beach.jpg".into(),
            sand: "images/sand.jpg".into(),
            wall: "images/wall.jpg".into(),
            metal: "images/metal.jpg".into(),
            model: "models/beach_2020/scene.gltf".into(),
        }
    }
}

/// Placement applied to every primitive of the imported model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPlacement {
    pub position: Vec3,
    pub scale: f32,
    pub rotation_z: f32,
}

impl Default for ModelPlacement {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, -12.0),
            scale: 0.13,
            rotation_z: PI,
        }
    }
}

/// Every tunable constant of the diorama.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DioramaConfig {
    pub camera: CameraConfig,
    pub fog: FogConfig,
    pub lighting: LightingConfig,
    pub assets: AssetPaths,
    pub model: ModelPlacement,
    /// Radians added to the torus knot on each axis per frame.
    pub rotation_step: f32,
    /// Edge length of each capture cube face, in texels.
    pub capture_resolution: u32,
}

impl DioramaConfig {
    /// Load a config from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty JSON.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let cam = &self.camera;
        if !(cam.fov_degrees > 0.0 && cam.fov_degrees < 180.0) {
            return Err(ConfigError::Invalid(format!(
                "camera.fov_degrees must be in (0, 180), got {}",
                cam.fov_degrees
            )));
        }
        if !(cam.near > 0.0 && cam.far > cam.near) {
            return Err(ConfigError::Invalid(format!(
                "camera clip planes must satisfy 0 < near < far, got {} / {}",
                cam.near, cam.far
            )));
        }
        if !(0.0..=1.0).contains(&cam.damping_factor) {
            return Err(ConfigError::Invalid(format!(
                "camera.damping_factor must be in [0, 1], got {}",
                cam.damping_factor
            )));
        }
        if self.fog.far <= self.fog.near {
            return Err(ConfigError::Invalid(format!(
                "fog.far ({}) must exceed fog.near ({})",
                self.fog.far, self.fog.near
            )));
        }
        if self.capture_resolution == 0 || self.lighting.shadow_map_size == 0 {
            return Err(ConfigError::Invalid(
                "capture_resolution and shadow_map_size must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for DioramaConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            fog: FogConfig::default(),
            lighting: LightingConfig::default(),
            assets: AssetPaths::default(),
            model: ModelPlacement::default(),
            rotation_step: 0.01,
            capture_resolution: 256,
        }
    }
}

/// Errors from loading or validating a config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Ids of the nodes the rest of the app needs to reach after setup.
#[derive(Debug, Clone, Copy)]
pub struct DioramaHandles {
    pub sand: NodeId,
    pub walls: [NodeId; 3],
    pub torus_knot: NodeId,
    /// Sphere A samples capture B; sphere B samples capture A.
    pub spheres: [NodeId; 2],
}

fn phong(texture: TextureSlot, double_sided: bool) -> Material {
    Material::Phong {
        texture,
        color: Rgb::WHITE,
        double_sided,
    }
}

/// Build the static diorama.
pub fn build_diorama(config: &DioramaConfig) -> Result<(Scene, DioramaHandles), SceneError> {
    let _span = tracing::info_span!("build_diorama").entered();
    let mut scene = Scene::new();

    scene.set_fog(Fog {
        color: config.fog.color,
        near: config.fog.near,
        far: config.fog.far,
    });

    // Lights
    scene.set_ambient(AmbientLight {
        color: Rgb::WHITE,
        intensity: config.lighting.ambient_intensity,
    });
    scene.set_directional(DirectionalLight {
        color: Rgb::WHITE,
        intensity: config.lighting.directional_intensity,
        position: config.lighting.directional_position,
        target: Vec3::ZERO,
        cast_shadow: true,
    });

    // Box
    let sand_mesh = scene.add_mesh("sand", geometry::plane(15.0, 15.0, 100, 100))?;
    let wall_mesh = scene.add_mesh("wall", geometry::plane(15.0, 7.5, 100, 100))?;

    let sand = scene.attach(Node {
        name: "sand".into(),
        transform: Transform::from_position(Vec3::new(0.0, -3.0, 0.0))
            .with_rotation(Vec3::new(-FRAC_PI_2, 0.0, 0.0)),
        mesh: sand_mesh,
        material: phong(TextureSlot::Sand, true),
        cast_shadow: false,
        receive_shadow: true,
    })?;

    let wall_layout = [
        ("wall_east", Vec3::new(7.5, 0.75, 0.0), -FRAC_PI_2),
        ("wall_north", Vec3::new(0.0, 0.75, -7.5), -PI),
        ("wall_west", Vec3::new(-7.5, 0.75, 0.0), -FRAC_PI_2),
    ];
    let mut walls = [NodeId::default(); 3];
    for (slot, (name, position, yaw)) in walls.iter_mut().zip(wall_layout) {
        *slot = scene.attach(Node {
            name: name.into(),
            transform: Transform::from_position(position).with_rotation(Vec3::new(0.0, yaw, 0.0)),
            mesh: wall_mesh,
            material: phong(TextureSlot::Wall, true),
            cast_shadow: false,
            receive_shadow: true,
        })?;
    }

    // Torus knot
    let knot_mesh = scene.add_mesh(
        "torus_knot",
        geometry::torus_knot(0.5, 0.15, 100, 16, 2, 3),
    )?;
    let torus_knot = scene.attach(Node {
        name: "torus_knot".into(),
        transform: Transform::from_position(Vec3::new(0.0, 1.5, 0.0)),
        mesh: knot_mesh,
        material: phong(TextureSlot::Metal, false),
        cast_shadow: true,
        receive_shadow: true,
    })?;

    // Reflective spheres
    let sphere_mesh = scene.add_mesh("sphere", geometry::sphere(0.5, 32, 32))?;
    let sphere_layout = [
        ("mirror_a", Vec3::new(0.0, -0.35, 0.0), CaptureSlot::B),
        ("mirror_b", Vec3::new(0.0, -2.5, 3.5), CaptureSlot::A),
    ];
    let mut spheres = [NodeId::default(); 2];
    for (slot, (name, position, capture)) in spheres.iter_mut().zip(sphere_layout) {
        *slot = scene.attach(Node {
            name: name.into(),
            transform: Transform::from_position(position),
            mesh: sphere_mesh,
            material: Material::Reflective {
                capture,
                reflectivity: 1.0,
            },
            cast_shadow: true,
            receive_shadow: true,
        })?;
        // The capture a sphere samples is taken from that sphere's center.
        scene.set_probe(
            capture,
            CaptureProbe {
                position,
                feeds: Some(*slot),
                ..CaptureProbe::default()
            },
        );
    }

    tracing::info!(
        nodes = scene.node_count(),
        meshes = scene.meshes().len(),
        "diorama built"
    );

    Ok((
        scene,
        DioramaHandles {
            sand,
            walls,
            torus_knot,
            spheres,
        },
    ))
}

/// Attach every primitive of an imported model, overriding its placement.
///
/// The placement replaces each mesh node's own transform; the transforms of
/// its ancestors in the file still apply on top. Each primitive gets its own `TextureSlot::Model(n)`, numbered after the
/// model nodes already in the scene, so repeated attaches never collide.
pub fn attach_model(
    scene: &mut Scene,
    model: Model,
    placement: &ModelPlacement,
) -> Result<Vec<NodeId>, SceneError> {
    let transform = Transform::from_position(placement.position)
        .with_rotation(Vec3::new(0.0, 0.0, placement.rotation_z))
        .with_scale(Vec3::splat(placement.scale));

    let first_slot = scene
        .nodes()
        .values()
        .filter(|n| {
            matches!(
                n.material,
                Material::Phong {
                    texture: TextureSlot::Model(_),
                    ..
                }
            )
        })
        .count() as u32;

    let mut ids = Vec::with_capacity(model.primitives.len());
    for (i, primitive) in model.primitives.into_iter().enumerate() {
        let slot = TextureSlot::Model(first_slot + i as u32);
        let mesh = scene.add_mesh(&primitive.name, primitive.mesh)?;
        if let Some(image) = primitive.base_color {
            scene.set_texture(slot, image);
        }
        ids.push(scene.attach(Node {
            name: primitive.name,
            transform: transform.with_parent(primitive.parent),
            mesh,
            material: Material::Phong {
                texture: slot,
                color: primitive.color,
                double_sided: false,
            },
            cast_shadow: true,
            receive_shadow: true,
        })?);
    }

    tracing::info!(model = %model.name, primitives = ids.len(), "model attached");
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{ModelPrimitive, TextureImage};
    use glam::Mat4;

    #[test]
    fn default_config_matches_design_constants() {
        let c = DioramaConfig::default();
        assert_eq!(c.camera.fov_degrees, 75.0);
        assert_eq!(c.camera.near, 0.1);
        assert_eq!(c.camera.far, 100.0);
        assert_eq!(c.fog.near, 5.0);
        assert_eq!(c.fog.far, 30.0);
        assert_eq!(c.rotation_step, 0.01);
        assert_eq!(c.capture_resolution, 256);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), r#"{ "rotation_step": 0.02, "fog": { "far": 40.0 } }"#)
            .unwrap();
        let c = DioramaConfig::from_json_file(tmp.path()).unwrap();
        assert_eq!(c.rotation_step, 0.02);
        assert_eq!(c.fog.far, 40.0);
        assert_eq!(c.fog.near, 5.0);
        assert_eq!(c.capture_resolution, 256);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), r#"{ "fog": { "near": 30.0, "far": 5.0 } }"#).unwrap();
        let err = DioramaConfig::from_json_file(tmp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn save_and_reload_config() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut c = DioramaConfig::default();
        c.capture_resolution = 128;
        c.save_json(tmp.path()).unwrap();
        let loaded = DioramaConfig::from_json_file(tmp.path()).unwrap();
        assert_eq!(loaded.capture_resolution, 128);
    }

    #[test]
    fn diorama_layout() {
        let (scene, handles) = build_diorama(&DioramaConfig::default()).unwrap();
        // sand + 3 walls + knot + 2 spheres
        assert_eq!(scene.node_count(), 7);
        assert_eq!(scene.meshes().len(), 4);

        let knot = scene.get(handles.torus_knot).unwrap();
        assert_eq!(knot.transform.position, Vec3::new(0.0, 1.5, 0.0));
        assert_eq!(knot.transform.rotation, Vec3::ZERO);
        assert!(knot.cast_shadow && knot.receive_shadow);

        let sand = scene.get(handles.sand).unwrap();
        assert_eq!(sand.transform.position.y, -3.0);
        assert!(sand.receive_shadow);

        assert_eq!(scene.fog().unwrap().far, 30.0);
        assert_eq!(scene.ambient().unwrap().intensity, 0.5);
        assert!(scene.directional().unwrap().cast_shadow);
        assert!(scene.background().is_none());
    }

    #[test]
    fn capture_probes_exclude_the_sphere_they_feed() {
        let (scene, handles) = build_diorama(&DioramaConfig::default()).unwrap();
        let [a, b] = handles.spheres;

        // Sphere A samples capture B, so capture B renders from A and skips it.
        let probe_b = scene.probe(CaptureSlot::B);
        assert_eq!(probe_b.feeds, Some(a));
        assert_eq!(probe_b.position, scene.get(a).unwrap().transform.position);

        let probe_a = scene.probe(CaptureSlot::A);
        assert_eq!(probe_a.feeds, Some(b));
        assert!(matches!(
            scene.get(b).unwrap().material,
            Material::Reflective {
                capture: CaptureSlot::A,
                ..
            }
        ));
    }

    #[test]
    fn attach_model_applies_placement() {
        let (mut scene, _) = build_diorama(&DioramaConfig::default()).unwrap();
        let model = Model {
            name: "beach".into(),
            primitives: vec![
                ModelPrimitive {
                    name: "palm".into(),
                    mesh: geometry::sphere(1.0, 4, 3),
                    color: Rgb::WHITE,
                    base_color: Some(TextureImage::solid(2, 2, [0, 255, 0, 255])),
                    parent: Mat4::IDENTITY,
                },
                ModelPrimitive {
                    name: "rock".into(),
                    mesh: geometry::sphere(1.0, 4, 3),
                    color: Rgb::new(0.5, 0.5, 0.5),
                    base_color: None,
                    parent: Mat4::IDENTITY,
                },
            ],
        };
        let placement = ModelPlacement::default();
        let ids = attach_model(&mut scene, model, &placement).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(scene.node_count(), 9);

        let palm = scene.get(ids[0]).unwrap();
        assert_eq!(palm.transform.position, Vec3::new(0.0, 0.0, -12.0));
        assert_eq!(palm.transform.scale, Vec3::splat(0.13));
        assert_eq!(palm.transform.rotation.z, PI);
        assert!(palm.cast_shadow && palm.receive_shadow);
        assert!(scene.texture(TextureSlot::Model(0)).is_some());
        assert!(scene.texture(TextureSlot::Model(1)).is_none());
    }

    #[test]
    fn attach_model_keeps_parent_transform() {
        let (mut scene, _) = build_diorama(&DioramaConfig::default()).unwrap();
        // Z-up to Y-up root, as exporters commonly emit.
        let parent = Mat4::from_rotation_x(-FRAC_PI_2);
        let model = Model {
            name: "beach".into(),
            primitives: vec![ModelPrimitive {
                name: "dune".into(),
                mesh: geometry::sphere(1.0, 4, 3),
                color: Rgb::WHITE,
                base_color: None,
                parent,
            }],
        };
        let placement = ModelPlacement::default();
        let ids = attach_model(&mut scene, model, &placement).unwrap();

        let node = scene.get(ids[0]).unwrap();
        let local = Transform::from_position(placement.position)
            .with_rotation(Vec3::new(0.0, 0.0, placement.rotation_z))
            .with_scale(Vec3::splat(placement.scale));
        assert_eq!(node.transform.position, placement.position);
        assert!(node.transform.matrix().abs_diff_eq(parent * local.matrix(), 1e-5));

        // The placement offset (0, 0, -12) is rotated by the parent.
        let origin = node.transform.matrix().transform_point3(Vec3::ZERO);
        assert!((origin - Vec3::new(0.0, -12.0, 0.0)).length() < 1e-4);
    }
}
