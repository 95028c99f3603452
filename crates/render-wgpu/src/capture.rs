use glam::{Mat4, Vec3};

/// Color format of the capture cube maps.
pub const CAPTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

/// Forward and up vectors for the six cube faces in layer order.
const FACES: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::Y),
    (Vec3::NEG_X, Vec3::Y),
    (Vec3::Y, Vec3::NEG_Z),
    (Vec3::NEG_Y, Vec3::Z),
    (Vec3::Z, Vec3::Y),
    (Vec3::NEG_Z, Vec3::Y),
];

/// View-projection for rendering cube face `face` (0..6) from `eye`.
///
/// The projection is mirrored in x so that texel `(u, v)` of the rendered
/// face holds what `CubeImage::face_direction(face, u, v)` sees. Mirroring
/// flips triangle winding, which the capture pipelines account for.
pub fn face_view_projection(face: usize, eye: Vec3, near: f32, far: f32) -> Mat4 {
    let (forward, up) = FACES[face.min(5)];
    let view = Mat4::look_at_rh(eye, eye + forward, up);
    let projection = Mat4::from_scale(Vec3::new(-1.0, 1.0, 1.0))
        * Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, near, far);
    projection * view
}

/// Direction cube face `face` looks along.
pub(crate) fn face_forward(face: usize) -> Vec3 {
    FACES[face.min(5)].0
}

/// One cube render target with a depth buffer and per-face attachments.
pub(crate) struct CaptureTarget {
    pub cube_view: wgpu::TextureView,
    pub face_views: Vec<wgpu::TextureView>,
    pub depth_view: wgpu::TextureView,
    pub resolution: u32,
}

impl CaptureTarget {
    pub fn new(device: &wgpu::Device, resolution: u32, label: &str) -> Self {
        let resolution = resolution.max(1);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: resolution,
                height: resolution,
                depth_or_array_layers: 6,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: CAPTURE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });

        let cube_view = texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        });
        let face_views: Vec<wgpu::TextureView> = (0..6)
            .map(|layer| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    base_array_layer: layer,
                    array_layer_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();

        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("capture_depth"),
            size: wgpu::Extent3d {
                width: resolution,
                height: resolution,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Depth32Float,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });

        Self {
            cube_view,
            face_views,
            depth_view: depth.create_view(&Default::default()),
            resolution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beachscape_scene::CubeImage;

    #[test]
    fn faces_map_texels_to_cube_directions() {
        let eye = Vec3::new(0.0, -0.35, 0.0);
        for face in 0..6 {
            let vp = face_view_projection(face, eye, 1.0, 1000.0);
            for (u, v) in [(0.5, 0.5), (0.1, 0.2), (0.9, 0.3), (0.25, 0.8)] {
                let dir = CubeImage::face_direction(face, u, v);
                let ndc = vp.project_point3(eye + dir * 10.0);
                assert!(
                    (ndc.x - (2.0 * u - 1.0)).abs() < 1e-4,
                    "face {face} u {u}: ndc.x {}",
                    ndc.x
                );
                assert!(
                    (ndc.y - (1.0 - 2.0 * v)).abs() < 1e-4,
                    "face {face} v {v}: ndc.y {}",
                    ndc.y
                );
                assert!((0.0..=1.0).contains(&ndc.z));
            }
        }
    }

    #[test]
    fn points_behind_face_are_clipped() {
        let vp = face_view_projection(0, Vec3::ZERO, 1.0, 1000.0);
        let clip = vp * Vec3::new(-5.0, 0.0, 0.0).extend(1.0);
        assert!(clip.w < 0.0);
    }
}
