use glam::{EulerRot, Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a node in the scene graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, for log lines and debug dumps.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// Spatial transform: position, Euler rotation, scale.
///
/// Rotation is stored as intrinsic XYZ Euler angles in radians and is never
/// normalized, so per-frame increments accumulate without bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
    /// Fixed transform of the enclosing hierarchy, applied after the local
    /// TRS. Identity for nodes placed directly in the scene.
    #[serde(default)]
    pub parent: Mat4,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
            parent: Mat4::IDENTITY,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    pub fn with_rotation(mut self, rotation: Vec3) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_parent(mut self, parent: Mat4) -> Self {
        self.parent = parent;
        self
    }

    pub fn quat(&self) -> Quat {
        Quat::from_euler(
            EulerRot::XYZ,
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
        )
    }

    /// Local-to-world matrix: scale, rotate, translate, then the parent.
    pub fn matrix(&self) -> Mat4 {
        self.parent * Mat4::from_scale_rotation_translation(self.scale, self.quat(), self.position)
    }
}

/// Linear RGB color with components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Build a color from a `0xRRGGBB` literal.
    pub fn from_hex(hex: u32) -> Self {
        Self {
            r: ((hex >> 16) & 0xff) as f32 / 255.0,
            g: ((hex >> 8) & 0xff) as f32 / 255.0,
            b: (hex & 0xff) as f32 / 255.0,
        }
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }

    pub fn scaled(self, intensity: f32) -> [f32; 3] {
        [self.r * intensity, self.g * intensity, self.b * intensity]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_uniqueness() {
        let a = NodeId::new();
        let b = NodeId::new();
        assert_ne!(a, b);
        assert_eq!(a.short().len(), 8);
    }

    #[test]
    fn transform_default_is_identity() {
        let t = Transform::default();
        assert_eq!(t.position, Vec3::ZERO);
        assert_eq!(t.rotation, Vec3::ZERO);
        assert_eq!(t.scale, Vec3::ONE);
        assert_eq!(t.matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn transform_matrix_applies_translation_last() {
        let t = Transform::from_position(Vec3::new(0.0, -3.0, 0.0))
            .with_rotation(Vec3::new(-std::f32::consts::FRAC_PI_2, 0.0, 0.0));
        // A plane built in XY faces +Z; after -pi/2 about X it faces +Y.
        let n = t.matrix().transform_vector3(Vec3::Z);
        assert!((n - Vec3::Y).length() < 1e-5);
        let p = t.matrix().transform_point3(Vec3::ZERO);
        assert!((p - Vec3::new(0.0, -3.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn parent_applies_after_local_transform() {
        let t = Transform::from_position(Vec3::new(1.0, 0.0, 0.0))
            .with_parent(Mat4::from_rotation_z(std::f32::consts::FRAC_PI_2));
        let p = t.matrix().transform_point3(Vec3::ZERO);
        assert!((p - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn rgb_from_hex() {
        assert_eq!(Rgb::from_hex(0xffffff), Rgb::WHITE);
        let c = Rgb::from_hex(0xff0000);
        assert_eq!(c.to_array(), [1.0, 0.0, 0.0]);
    }
}
