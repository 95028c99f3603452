//! CPU-side pixel and model data handed to the scene by asset loads.

use beachscape_common::Rgb;
use glam::{Mat4, Vec3};

use crate::geometry::MeshData;

/// An RGBA8 image in sRGB encoding, rows top to bottom.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureImage {
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take((width * height * 4) as usize)
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// Whether the pixel buffer matches the declared dimensions.
    pub fn is_consistent(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.pixels.len() == (self.width as usize) * (self.height as usize) * 4
    }
}

/// Six square RGBA8 faces in layer order +X, -X, +Y, -Y, +Z, -Z.
#[derive(Debug, Clone, PartialEq)]
pub struct CubeImage {
    pub size: u32,
    pub faces: [Vec<u8>; 6],
}

impl CubeImage {
    pub fn face_byte_len(&self) -> usize {
        (self.size as usize) * (self.size as usize) * 4
    }

    pub fn is_consistent(&self) -> bool {
        self.size > 0 && self.faces.iter().all(|f| f.len() == self.face_byte_len())
    }

    /// World direction through texel coordinate `(u, v)` of `face`.
    ///
    /// `u` runs left to right and `v` top to bottom, both in `[0, 1]`. This is
    /// the lookup convention of cube texture sampling, so anything written to
    /// a face with this mapping reads back correctly through a direction.
    pub fn face_direction(face: usize, u: f32, v: f32) -> Vec3 {
        let sc = 2.0 * u - 1.0;
        let tc = 2.0 * v - 1.0;
        match face {
            0 => Vec3::new(1.0, -tc, -sc),
            1 => Vec3::new(-1.0, -tc, sc),
            2 => Vec3::new(sc, 1.0, tc),
            3 => Vec3::new(sc, -1.0, -tc),
            4 => Vec3::new(sc, -tc, 1.0),
            _ => Vec3::new(-sc, -tc, -1.0),
        }
        .normalize()
    }
}

/// One drawable piece of an imported model.
#[derive(Debug, Clone)]
pub struct ModelPrimitive {
    pub name: String,
    pub mesh: MeshData,
    /// Multiplier applied to the base color texture.
    pub color: Rgb,
    pub base_color: Option<TextureImage>,
    /// Accumulated transform of the node's ancestors in the source file.
    /// The node's own transform is replaced by the model placement.
    pub parent: Mat4,
}

/// An imported model: one primitive per mesh primitive per mesh node, so a
/// mesh instanced by several nodes appears several times.
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub name: String,
    pub primitives: Vec<ModelPrimitive>,
}

impl Model {
    pub fn vertex_count(&self) -> usize {
        self.primitives.iter().map(|p| p.mesh.vertex_count()).sum()
    }

    pub fn triangle_count(&self) -> usize {
        self.primitives.iter().map(|p| p.mesh.triangle_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_texture_has_expected_size() {
        let t = TextureImage::solid(4, 2, [10, 20, 30, 255]);
        assert_eq!(t.byte_len(), 32);
        assert!(t.is_consistent());
        assert_eq!(&t.pixels[28..32], &[10, 20, 30, 255]);
    }

    #[test]
    fn truncated_texture_is_inconsistent() {
        let mut t = TextureImage::solid(2, 2, [0; 4]);
        t.pixels.pop();
        assert!(!t.is_consistent());
    }

    #[test]
    fn face_centers_point_along_axes() {
        let axes = [Vec3::X, -Vec3::X, Vec3::Y, -Vec3::Y, Vec3::Z, -Vec3::Z];
        for (face, axis) in axes.iter().enumerate() {
            let d = CubeImage::face_direction(face, 0.5, 0.5);
            assert!((d - *axis).length() < 1e-6, "face {face}");
        }
    }

    #[test]
    fn face_top_edge_of_side_faces_points_up() {
        for face in [0, 1, 4, 5] {
            assert!(CubeImage::face_direction(face, 0.5, 0.0).y > 0.5);
        }
    }

    #[test]
    fn cube_image_consistency() {
        let face = vec![0u8; 2 * 2 * 4];
        let cube = CubeImage {
            size: 2,
            faces: std::array::from_fn(|_| face.clone()),
        };
        assert!(cube.is_consistent());
        assert_eq!(cube.face_byte_len(), 16);
    }
}
