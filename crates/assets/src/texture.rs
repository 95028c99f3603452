use beachscape_scene::TextureImage;
use image::{DynamicImage, ImageError};
use std::path::Path;

use crate::AssetError;

/// Decode an image file into an RGBA8 texture.
pub fn load_texture(path: &Path) -> Result<TextureImage, AssetError> {
    let img = image::open(path).map_err(|e| image_error(path, e))?;
    let texture = to_texture(img);
    tracing::debug!(
        path = %path.display(),
        width = texture.width,
        height = texture.height,
        "texture decoded"
    );
    Ok(texture)
}

pub(crate) fn to_texture(img: DynamicImage) -> TextureImage {
    let rgba = img.into_rgba8();
    let (width, height) = rgba.dimensions();
    TextureImage {
        width,
        height,
        pixels: rgba.into_raw(),
    }
}

pub(crate) fn image_error(path: &Path, err: ImageError) -> AssetError {
    match err {
        ImageError::IoError(io) => AssetError::Io(io),
        source => AssetError::Image {
            path: path.to_path_buf(),
            source,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    #[test]
    fn load_png_as_rgba() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sand.png");
        RgbaImage::from_pixel(3, 2, Rgba([200, 180, 120, 255]))
            .save(&path)
            .unwrap();

        let tex = load_texture(&path).unwrap();
        assert_eq!((tex.width, tex.height), (3, 2));
        assert!(tex.is_consistent());
        assert_eq!(&tex.pixels[..4], &[200, 180, 120, 255]);
    }

    #[test]
    fn rgb_images_gain_opaque_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wall.png");
        RgbImage::from_pixel(2, 2, Rgb([10, 20, 30])).save(&path).unwrap();

        let tex = load_texture(&path).unwrap();
        assert_eq!(&tex.pixels[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_texture(&dir.path().join("nope.png")).unwrap_err();
        assert!(matches!(err, AssetError::Io(_)));
    }

    #[test]
    fn garbage_file_is_image_error_naming_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metal.png");
        std::fs::write(&path, b"definitely not an image").unwrap();

        let err = load_texture(&path).unwrap_err();
        assert!(matches!(err, AssetError::Image { .. }));
        assert!(err.to_string().contains("metal.png"));
    }
}
