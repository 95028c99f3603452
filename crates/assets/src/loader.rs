//! Fire-and-forget asset loading on background threads.

use beachscape_scene::{CubeImage, Model, TextureImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::environment::load_background;
use crate::model::load_model;
use crate::texture::load_texture;
use crate::AssetError;

/// Loads assets relative to a root directory, one background thread per
/// request.
///
/// Each request takes a completion handler that runs on the loader thread
/// exactly once, with either the decoded asset or the error. Handlers must
/// not touch the scene directly; forward the result to the thread that owns
/// it (the desktop app uses an event loop proxy).
#[derive(Debug, Clone)]
pub struct AssetLoader {
    root: PathBuf,
    in_flight: Arc<AtomicUsize>,
}

/// Decrements the in-flight count when a request finishes, even on panic.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl AssetLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    /// Number of requests whose handler has not returned yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn load_texture_async<F>(&self, relative: impl AsRef<Path>, on_done: F)
    where
        F: FnOnce(Result<TextureImage, AssetError>) + Send + 'static,
    {
        self.spawn("texture", self.resolve(relative), load_texture, on_done);
    }

    /// Load an equirectangular panorama and convert it to a cube map on the
    /// loader thread.
    pub fn load_background_async<F>(
        &self,
        relative: impl AsRef<Path>,
        face_size: Option<u32>,
        on_done: F,
    ) where
        F: FnOnce(Result<CubeImage, AssetError>) + Send + 'static,
    {
        self.spawn(
            "background",
            self.resolve(relative),
            move |p| load_background(p, face_size),
            on_done,
        );
    }

    pub fn load_model_async<F>(&self, relative: impl AsRef<Path>, on_done: F)
    where
        F: FnOnce(Result<Model, AssetError>) + Send + 'static,
    {
        self.spawn("model", self.resolve(relative), load_model, on_done);
    }

    fn spawn<T, L, F>(&self, kind: &'static str, path: PathBuf, load: L, on_done: F)
    where
        T: Send + 'static,
        L: FnOnce(&Path) -> Result<T, AssetError> + Send + 'static,
        F: FnOnce(Result<T, AssetError>) + Send + 'static,
    {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlight(self.in_flight.clone());
        tracing::debug!(kind, path = %path.display(), "asset load requested");

        let spawned = std::thread::Builder::new()
            .name(format!("asset-{kind}"))
            .spawn(move || {
                let _guard = guard;
                let result = load(&path);
                match &result {
                    Ok(_) => tracing::debug!(kind, path = %path.display(), "asset loaded"),
                    Err(e) => tracing::warn!(kind, path = %path.display(), "asset load failed: {e}"),
                }
                on_done(result);
            });

        // The closure (and with it the handler and the guard) is dropped on a
        // failed spawn, so the request ends without a callback.
        if let Err(e) = spawned {
            tracing::error!(kind, "failed to spawn asset loader thread: {e}");
        }
    }
}
