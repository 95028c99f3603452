//! Procedural mesh primitives for the diorama.
//!
//! All generators produce smooth normals and UVs with `v = 0` at the top edge
//! of the texture, matching how images are uploaded and how glTF stores UVs.

use glam::Vec3;
use std::f32::consts::PI;
use tracing::warn;

/// Indexed triangle mesh with per-vertex position, normal and UV.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Attribute arrays agree in length and every index points at a vertex.
    pub fn is_valid(&self) -> bool {
        let n = self.positions.len();
        self.normals.len() == n
            && self.uvs.len() == n
            && self.indices.len() % 3 == 0
            && self.indices.iter().all(|&i| (i as usize) < n)
    }

    /// Replace normals with per-vertex averages of the adjacent face normals.
    pub fn compute_normals(&mut self) {
        let mut acc = vec![Vec3::ZERO; self.positions.len()];
        for tri in self.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            let pa = Vec3::from(self.positions[a]);
            let pb = Vec3::from(self.positions[b]);
            let pc = Vec3::from(self.positions[c]);
            let n = (pb - pa).cross(pc - pa);
            acc[a] += n;
            acc[b] += n;
            acc[c] += n;
        }
        self.normals = acc
            .into_iter()
            .map(|n| n.try_normalize().unwrap_or(Vec3::Y).to_array())
            .collect();
    }

    fn push(&mut self, position: Vec3, normal: Vec3, uv: [f32; 2]) {
        self.positions.push(position.to_array());
        self.normals.push(normal.to_array());
        self.uvs.push(uv);
    }
}

/// Generate a subdivided plane in the XY plane, facing +Z.
///
/// # Arguments
/// * `width` - Extent along X
/// * `height` - Extent along Y
/// * `width_segments` / `height_segments` - Subdivisions (min 1, max 1024)
///
/// # Returns
/// `(width_segments + 1) × (height_segments + 1)` vertices and
/// `width_segments × height_segments × 2` triangles.
pub fn plane(width: f32, height: f32, width_segments: u32, height_segments: u32) -> MeshData {
    let ws = width_segments.clamp(1, 1024);
    let hs = height_segments.clamp(1, 1024);
    let seg_w = width / ws as f32;
    let seg_h = height / hs as f32;

    let mut mesh = MeshData::default();
    for iy in 0..=hs {
        let y = iy as f32 * seg_h - height * 0.5;
        for ix in 0..=ws {
            let x = ix as f32 * seg_w - width * 0.5;
            mesh.push(
                Vec3::new(x, -y, 0.0),
                Vec3::Z,
                [ix as f32 / ws as f32, iy as f32 / hs as f32],
            );
        }
    }

    let row = ws + 1;
    for iy in 0..hs {
        for ix in 0..ws {
            let a = ix + row * iy;
            let b = ix + row * (iy + 1);
            let c = (ix + 1) + row * (iy + 1);
            let d = (ix + 1) + row * iy;
            mesh.indices.extend_from_slice(&[a, b, d, b, c, d]);
        }
    }
    mesh
}

/// Generate a UV sphere centered at the origin.
///
/// The pole rows produce one triangle per segment instead of a degenerate
/// quad, so the index count is `3 × width_segments × (2 × height_segments - 2)`.
pub fn sphere(radius: f32, width_segments: u32, height_segments: u32) -> MeshData {
    let radius = if radius <= 0.0 {
        warn!("sphere: radius must be > 0.0, clamping to 0.001");
        0.001
    } else {
        radius
    };
    let ws = width_segments.clamp(3, 512);
    let hs = height_segments.clamp(2, 512);

    let mut mesh = MeshData::default();
    for iy in 0..=hs {
        let v = iy as f32 / hs as f32;
        for ix in 0..=ws {
            let u = ix as f32 / ws as f32;
            let phi = u * 2.0 * PI;
            let theta = v * PI;
            let p = Vec3::new(
                -radius * phi.cos() * theta.sin(),
                radius * theta.cos(),
                radius * phi.sin() * theta.sin(),
            );
            let n = p.try_normalize().unwrap_or(Vec3::Y);
            mesh.push(p, n, [u, v]);
        }
    }

    let row = ws + 1;
    for iy in 0..hs {
        for ix in 0..ws {
            let a = iy * row + ix + 1;
            let b = iy * row + ix;
            let c = (iy + 1) * row + ix;
            let d = (iy + 1) * row + ix + 1;
            if iy != 0 {
                mesh.indices.extend_from_slice(&[a, b, d]);
            }
            if iy != hs - 1 {
                mesh.indices.extend_from_slice(&[b, c, d]);
            }
        }
    }
    mesh
}

/// Generate a (p, q) torus knot tube.
///
/// # Arguments
/// * `radius` - Radius of the knot's base circle
/// * `tube` - Radius of the swept tube
/// * `tubular_segments` - Samples along the curve (min 3)
/// * `radial_segments` - Samples around the tube (min 3)
/// * `p`, `q` - Winding numbers around the axis of symmetry and the tube interior
pub fn torus_knot(
    radius: f32,
    tube: f32,
    tubular_segments: u32,
    radial_segments: u32,
    p: u32,
    q: u32,
) -> MeshData {
    let tub = tubular_segments.clamp(3, 4096);
    let rad = radial_segments.clamp(3, 512);
    let (p, q) = (p.max(1) as f32, q.max(1) as f32);

    let curve = |u: f32| -> Vec3 {
        let q_over_p = q / p * u;
        let cs = q_over_p.cos();
        Vec3::new(
            radius * (2.0 + cs) * 0.5 * u.cos(),
            radius * (2.0 + cs) * 0.5 * u.sin(),
            radius * q_over_p.sin() * 0.5,
        )
    };

    let mut mesh = MeshData::default();
    for i in 0..=tub {
        let u = i as f32 / tub as f32 * p * 2.0 * PI;
        let p1 = curve(u);
        let p2 = curve(u + 0.01);

        // Frenet-like frame from the curve tangent
        let t = p2 - p1;
        let n = p2 + p1;
        let b = t.cross(n).normalize();
        let n = b.cross(t).normalize();

        for j in 0..=rad {
            let v = j as f32 / rad as f32 * 2.0 * PI;
            let cx = -tube * v.cos();
            let cy = tube * v.sin();
            let pos = p1 + n * cx + b * cy;
            let normal = (pos - p1).try_normalize().unwrap_or(n);
            mesh.push(pos, normal, [i as f32 / tub as f32, j as f32 / rad as f32]);
        }
    }

    let row = rad + 1;
    for j in 1..=tub {
        for i in 1..=rad {
            let a = row * (j - 1) + (i - 1);
            let b = row * j + (i - 1);
            let c = row * j + i;
            let d = row * (j - 1) + i;
            mesh.indices.extend_from_slice(&[a, b, d, b, c, d]);
        }
    }
    mesh
}
