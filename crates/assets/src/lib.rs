//! Asset pipeline: decodes images and glTF models from the asset directory
//! into scene-ready data.
//!
//! The renderer never sees file paths. Loads produce [`TextureImage`],
//! [`CubeImage`] and [`Model`] values, either synchronously or on a
//! background thread through [`AssetLoader`].
//!
//! [`TextureImage`]: beachscape_scene::TextureImage
//! [`CubeImage`]: beachscape_scene::CubeImage
//! [`Model`]: beachscape_scene::Model

mod environment;
mod loader;
mod model;
mod texture;

use std::path::PathBuf;

pub use environment::{EquirectImage, load_background};
pub use loader::AssetLoader;
pub use model::load_model;
pub use texture::load_texture;

/// Errors from asset operations.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image decode error in {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("glTF parse error in {path}: {source}")]
    GltfParse {
        path: PathBuf,
        #[source]
        source: gltf::Error,
    },
    #[error("{path}: no triangle meshes found")]
    NoMeshes { path: PathBuf },
    #[error("mesh {mesh}: missing {attribute}")]
    MissingAttribute { mesh: String, attribute: &'static str },
    #[error("unsupported pixel format {0}")]
    UnsupportedPixelFormat(String),
    #[error("invalid image: {0}")]
    InvalidImage(String),
}

pub fn crate_info() -> &'static str {
    "beachscape-assets v0.1.0"
}
