//! wgpu render backend for the beach diorama.
//!
//! Draws the scene with Phong shading, a directional shadow map and linear
//! fog; mirrors sample one of two cube-map capture passes; the background is
//! a cube skybox. The orbit camera turns pointer input into a `RenderView`.
//!
//! # Invariants
//! - Renderer never mutates scene state.
//! - Camera motion lives outside the frame driver.
//! - A capture pass never draws a node that samples its own cube map.

mod camera;
mod capture;
mod gpu;
mod shaders;

pub use camera::OrbitCamera;
pub use capture::{CAPTURE_FORMAT, face_view_projection};
pub use gpu::WgpuRenderer;
