//! Equirectangular backgrounds resampled into cube maps.

use beachscape_scene::{CubeImage, TextureImage};
use glam::Vec3;
use std::f32::consts::PI;
use std::path::Path;

use crate::AssetError;
use crate::texture::load_texture;

/// Largest face edge produced when the size is derived from the image.
const MAX_FACE_SIZE: u32 = 2048;

/// A latitude/longitude panorama: longitude along X, latitude along Y with
/// the zenith on the top row.
#[derive(Debug, Clone)]
pub struct EquirectImage {
    texture: TextureImage,
}

impl EquirectImage {
    pub fn new(texture: TextureImage) -> Result<Self, AssetError> {
        if !texture.is_consistent() {
            return Err(AssetError::InvalidImage(format!(
                "{}x{} panorama with {} bytes",
                texture.width,
                texture.height,
                texture.byte_len()
            )));
        }
        Ok(Self { texture })
    }

    pub fn open(path: &Path) -> Result<Self, AssetError> {
        Self::new(load_texture(path)?)
    }

    pub fn width(&self) -> u32 {
        self.texture.width
    }

    pub fn height(&self) -> u32 {
        self.texture.height
    }

    /// Bilinear lookup along a world direction. Longitude wraps, latitude clamps.
    pub fn sample(&self, dir: Vec3) -> [u8; 4] {
        let d = dir.try_normalize().unwrap_or(Vec3::Z);
        let u = d.z.atan2(d.x) / (2.0 * PI) + 0.5;
        let v = 0.5 - d.y.clamp(-1.0, 1.0).asin() / PI;

        let (w, h) = (self.texture.width as i64, self.texture.height as i64);
        let x = u * w as f32 - 0.5;
        let y = v * h as f32 - 0.5;
        let (x0, y0) = (x.floor(), y.floor());
        let (fx, fy) = (x - x0, y - y0);

        let texel = |xi: i64, yi: i64| -> [f32; 4] {
            let xi = xi.rem_euclid(w);
            let yi = yi.clamp(0, h - 1);
            let i = ((yi * w + xi) * 4) as usize;
            let p = &self.texture.pixels[i..i + 4];
            [p[0] as f32, p[1] as f32, p[2] as f32, p[3] as f32]
        };

        let (x0, y0) = (x0 as i64, y0 as i64);
        let t00 = texel(x0, y0);
        let t10 = texel(x0 + 1, y0);
        let t01 = texel(x0, y0 + 1);
        let t11 = texel(x0 + 1, y0 + 1);

        let mut out = [0u8; 4];
        for c in 0..4 {
            let top = t00[c] + (t10[c] - t00[c]) * fx;
            let bottom = t01[c] + (t11[c] - t01[c]) * fx;
            out[c] = (top + (bottom - top) * fy).round().clamp(0.0, 255.0) as u8;
        }
        out
    }

    /// Resample into six `face_size` square faces, clamped to
    /// `1..=MAX_FACE_SIZE`.
    pub fn to_cube_faces(&self, face_size: u32) -> CubeImage {
        let size = clamp_face_size(face_size);
        if size != face_size {
            tracing::warn!(requested = face_size, size, "cube face size clamped");
        }
        let _span = tracing::debug_span!("equirect_to_cube", size).entered();
        let faces = std::array::from_fn(|face| {
            let mut pixels = Vec::with_capacity(size as usize * size as usize * 4);
            for row in 0..size {
                let v = (row as f32 + 0.5) / size as f32;
                for col in 0..size {
                    let u = (col as f32 + 0.5) / size as f32;
                    pixels.extend_from_slice(&self.sample(CubeImage::face_direction(face, u, v)));
                }
            }
            pixels
        });
        CubeImage { size, faces }
    }

    /// Face size matching the panorama's vertical resolution.
    pub fn natural_face_size(&self) -> u32 {
        self.texture.height.min(MAX_FACE_SIZE)
    }
}

fn clamp_face_size(face_size: u32) -> u32 {
    face_size.clamp(1, MAX_FACE_SIZE)
}

/// Load a panorama and convert it to a cube map. With no explicit size the
/// faces match the image height.
pub fn load_background(path: &Path, face_size: Option<u32>) -> Result<CubeImage, AssetError> {
    let equirect = EquirectImage::open(path)?;
    let size = face_size.unwrap_or_else(|| equirect.natural_face_size());
    let cube = equirect.to_cube_faces(size);
    tracing::info!(
        path = %path.display(),
        source_width = equirect.width(),
        source_height = equirect.height(),
        face_size = cube.size,
        "background converted"
    );
    Ok(cube)
}
