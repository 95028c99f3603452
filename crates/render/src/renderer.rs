use beachscape_scene::{CameraConfig, CaptureSlot, Material, Scene};
use glam::{Mat4, Vec3};

/// Camera/view configuration for rendering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderView {
    /// Camera position in world space.
    pub eye: Vec3,
    /// Point the camera is looking at.
    pub target: Vec3,
    /// Vertical field of view in degrees.
    pub fov_degrees: f32,
    /// Width over height of the output surface.
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for RenderView {
    fn default() -> Self {
        Self::from_camera(&CameraConfig::default(), 2.0)
    }
}

impl RenderView {
    pub fn from_camera(camera: &CameraConfig, aspect: f32) -> Self {
        Self {
            eye: camera.position,
            target: camera.target,
            fov_degrees: camera.fov_degrees,
            aspect,
            near: camera.near,
            far: camera.far,
        }
    }

    /// Unit direction from the eye toward the target.
    pub fn forward(&self) -> Vec3 {
        (self.target - self.eye).normalize_or(Vec3::NEG_Z)
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, Vec3::Y)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(
            self.fov_degrees.to_radians(),
            self.aspect.max(1e-4),
            self.near,
            self.far,
        )
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}

/// Renderer-agnostic interface driven once per frame.
///
/// Implementations read the scene and never mutate it. Neither call reports
/// failure: a backend that cannot present a frame logs it and carries on.
pub trait SceneRenderer {
    /// Re-render the cube map of one capture pass from the current scene.
    fn refresh_capture(&mut self, slot: CaptureSlot, scene: &Scene);

    /// Render the scene through the primary viewpoint.
    fn render(&mut self, scene: &Scene, view: &RenderView);
}

/// One call observed by a [`RecordingRenderer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderCall {
    Capture { slot: CaptureSlot, revision: u64 },
    Render { revision: u64 },
}

/// Headless renderer that records every call, tagged with the scene revision
/// it saw. Used by tests and by the CLI's frame simulation.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    calls: Vec<RenderCall>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[RenderCall] {
        &self.calls
    }

    /// Capture slots in the order they were refreshed.
    pub fn capture_sequence(&self) -> Vec<CaptureSlot> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                RenderCall::Capture { slot, .. } => Some(*slot),
                RenderCall::Render { .. } => None,
            })
            .collect()
    }

    pub fn render_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, RenderCall::Render { .. }))
            .count()
    }
}

impl SceneRenderer for RecordingRenderer {
    fn refresh_capture(&mut self, slot: CaptureSlot, scene: &Scene) {
        self.calls.push(RenderCall::Capture {
            slot,
            revision: scene.revision(),
        });
    }

    fn render(&mut self, scene: &Scene, _view: &RenderView) {
        self.calls.push(RenderCall::Render {
            revision: scene.revision(),
        });
    }
}

/// Headless renderer that keeps only totals and the first few capture slots,
/// so its memory stays fixed however many frames run.
#[derive(Debug, Default)]
pub struct CountingRenderer {
    captures: [u64; 2],
    renders: u64,
    head: Vec<CaptureSlot>,
    last_capture: Option<CaptureSlot>,
}

impl CountingRenderer {
    /// Number of leading capture slots kept.
    pub const HEAD_LEN: usize = 8;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn capture_count(&self, slot: CaptureSlot) -> u64 {
        self.captures[slot.index()]
    }

    pub fn render_count(&self) -> u64 {
        self.renders
    }

    /// The first [`Self::HEAD_LEN`] capture slots, in refresh order.
    pub fn head(&self) -> &[CaptureSlot] {
        &self.head
    }

    pub fn last_capture(&self) -> Option<CaptureSlot> {
        self.last_capture
    }
}

impl SceneRenderer for CountingRenderer {
    fn refresh_capture(&mut self, slot: CaptureSlot, _scene: &Scene) {
        self.captures[slot.index()] += 1;
        if self.head.len() < Self::HEAD_LEN {
            self.head.push(slot);
        }
        self.last_capture = Some(slot);
    }

    fn render(&mut self, _scene: &Scene, _view: &RenderView) {
        self.renders += 1;
    }
}

/// Debug text renderer: a human-readable dump of what a frame would draw.
///
/// Useful for CLI output, logging, and testing the render interface.
#[derive(Debug, Default)]
pub struct DebugTextRenderer {
    last: String,
    last_capture: Option<CaptureSlot>,
}

impl DebugTextRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output of the most recent `render` call.
    pub fn last_output(&self) -> &str {
        &self.last
    }

    pub fn describe(&self, scene: &Scene, view: &RenderView) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "=== Scene (revision={}, nodes={}, meshes={}) ===\n",
            scene.revision(),
            scene.node_count(),
            scene.meshes().len()
        ));
        out.push_str(&format!(
            "Camera: eye=({:.1}, {:.1}, {:.1}) target=({:.1}, {:.1}, {:.1}) fov={:.0}\n",
            view.eye.x,
            view.eye.y,
            view.eye.z,
            view.target.x,
            view.target.y,
            view.target.z,
            view.fov_degrees
        ));
        if let Some(slot) = self.last_capture {
            out.push_str(&format!("Last capture: {slot:?}\n"));
        }
        out.push_str(&format!(
            "Background: {}  Textures: {}\n",
            if scene.background().is_some() {
                "loaded"
            } else {
                "pending"
            },
            scene.textures().len()
        ));

        for (id, node) in scene.nodes() {
            let p = node.transform.position;
            let r = node.transform.rotation;
            let kind = match node.material {
                Material::Phong { texture, .. } => format!("phong {texture:?}"),
                Material::Reflective { capture, .. } => format!("mirror <- {capture:?}"),
            };
            out.push_str(&format!(
                "  [{}] {:<12} pos=({:.2}, {:.2}, {:.2}) rot=({:.2}, {:.2}, {:.2}) {}\n",
                id.short(),
                node.name,
                p.x,
                p.y,
                p.z,
                r.x,
                r.y,
                r.z,
                kind
            ));
        }

        out
    }
}

impl SceneRenderer for DebugTextRenderer {
    fn refresh_capture(&mut self, slot: CaptureSlot, _scene: &Scene) {
        self.last_capture = Some(slot);
    }

    fn render(&mut self, scene: &Scene, view: &RenderView) {
        self.last = self.describe(scene, view);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beachscape_scene::{DioramaConfig, build_diorama};

    #[test]
    fn debug_renderer_empty_scene() {
        let scene = Scene::new();
        let mut renderer = DebugTextRenderer::new();
        renderer.render(&scene, &RenderView::default());

        assert!(renderer.last_output().contains("revision=0"));
        assert!(renderer.last_output().contains("nodes=0"));
        assert!(renderer.last_output().contains("Background: pending"));
    }

    #[test]
    fn debug_renderer_lists_diorama_nodes() {
        let (scene, _) = build_diorama(&DioramaConfig::default()).unwrap();
        let mut renderer = DebugTextRenderer::new();
        renderer.refresh_capture(CaptureSlot::B, &scene);
        renderer.render(&scene, &RenderView::default());

        let out = renderer.last_output();
        assert!(out.contains("nodes=7"));
        assert!(out.contains("torus_knot"));
        assert!(out.contains("mirror <- A"));
        assert!(out.contains("Last capture: B"));
    }

    #[test]
    fn render_view_default_uses_camera_constants() {
        let view = RenderView::default();
        assert_eq!(view.fov_degrees, 75.0);
        assert_eq!(view.near, 0.1);
        assert_eq!(view.far, 100.0);
        assert_eq!(view.eye, Vec3::new(0.0, 0.0, 10.0));
        assert!(view.view_projection().is_finite());
    }

    #[test]
    fn counting_renderer_state_stays_bounded() {
        let scene = Scene::new();
        let view = RenderView::default();
        let mut r = CountingRenderer::new();
        for frame in 0..200_000u64 {
            let slot = if frame % 2 == 0 { CaptureSlot::A } else { CaptureSlot::B };
            r.refresh_capture(slot, &scene);
            r.render(&scene, &view);
        }
        assert_eq!(r.capture_count(CaptureSlot::A), 100_000);
        assert_eq!(r.capture_count(CaptureSlot::B), 100_000);
        assert_eq!(r.render_count(), 200_000);
        assert_eq!(r.head().len(), CountingRenderer::HEAD_LEN);
        assert_eq!(&r.head()[..2], &[CaptureSlot::A, CaptureSlot::B]);
        assert!(r.head.capacity() <= CountingRenderer::HEAD_LEN * 2);
        assert_eq!(r.last_capture(), Some(CaptureSlot::B));
    }

    #[test]
    fn recording_renderer_tracks_order() {
        let scene = Scene::new();
        let mut r = RecordingRenderer::new();
        r.refresh_capture(CaptureSlot::A, &scene);
        r.render(&scene, &RenderView::default());
        assert_eq!(
            r.calls(),
            &[
                RenderCall::Capture {
                    slot: CaptureSlot::A,
                    revision: 0
                },
                RenderCall::Render { revision: 0 },
            ]
        );
        assert_eq!(r.capture_sequence(), vec![CaptureSlot::A]);
        assert_eq!(r.render_count(), 1);
    }
}
