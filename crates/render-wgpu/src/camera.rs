use beachscape_render::RenderView;
use beachscape_scene::CameraConfig;
use glam::Vec3;
use std::f32::consts::{PI, TAU};

const POLAR_EPSILON: f32 = 1e-4;

/// Orbit camera circling a target point, with damped rotation and clamped
/// zoom. Camera motion is not part of the frame driver; the app feeds the
/// resulting [`RenderView`] into each tick.
#[derive(Debug, Clone)]
pub struct OrbitCamera {
    pub target: Vec3,
    /// Distance from the target.
    pub radius: f32,
    /// Angle around +Y, measured from +Z toward +X.
    pub azimuth: f32,
    /// Angle down from +Y.
    pub polar: f32,
    pub fov_degrees: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    /// Fraction of the pending motion applied per update (0 disables damping).
    pub damping_factor: f32,
    pub enable_zoom: bool,
    pub min_distance: f32,
    pub max_distance: f32,
    pub rotate_speed: f32,
    pub zoom_speed: f32,
    pub enable_pan: bool,
    pub pan_speed: f32,
    azimuth_delta: f32,
    polar_delta: f32,
    pan_offset: Vec3,
    scale: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self::from_config(&CameraConfig::default(), 16.0 / 9.0)
    }
}

impl OrbitCamera {
    pub fn from_config(config: &CameraConfig, aspect: f32) -> Self {
        let offset = config.position - config.target;
        let radius = offset.length().max(POLAR_EPSILON);
        let azimuth = offset.x.atan2(offset.z);
        let polar = (offset.y / radius).clamp(-1.0, 1.0).acos();

        Self {
            target: config.target,
            radius,
            azimuth,
            polar: polar.clamp(POLAR_EPSILON, PI - POLAR_EPSILON),
            fov_degrees: config.fov_degrees,
            aspect,
            near: config.near,
            far: config.far,
            damping_factor: config.damping_factor,
            enable_zoom: config.enable_zoom,
            min_distance: config.min_distance,
            max_distance: config.max_distance,
            rotate_speed: 1.0,
            zoom_speed: 1.0,
            enable_pan: true,
            pan_speed: 1.0,
            azimuth_delta: 0.0,
            polar_delta: 0.0,
            pan_offset: Vec3::ZERO,
            scale: 1.0,
        }
    }

    /// Queue a rotation from a pointer drag of `(dx, dy)` pixels. A drag
    /// across the full viewport height turns the camera once around.
    pub fn rotate(&mut self, dx: f32, dy: f32, viewport_height: f32) {
        let h = viewport_height.max(1.0);
        self.azimuth_delta -= TAU * dx / h * self.rotate_speed;
        self.polar_delta -= TAU * dy / h * self.rotate_speed;
    }

    /// Queue a pan from a pointer drag of `(dx, dy)` pixels. The target
    /// moves in the view plane so the point under the cursor follows it.
    pub fn pan(&mut self, dx: f32, dy: f32, viewport_height: f32) {
        if !self.enable_pan {
            return;
        }
        let h = viewport_height.max(1.0);
        // World units per pixel at the target distance.
        let scale = 2.0 * self.radius * (self.fov_degrees.to_radians() / 2.0).tan() / h;
        let (right, up) = self.screen_axes();
        self.pan_offset += (up * dy - right * dx) * scale * self.pan_speed;
    }

    /// Queue a zoom. Positive steps move toward the target.
    pub fn zoom(&mut self, steps: f32) {
        if !self.enable_zoom {
            return;
        }
        self.scale *= 0.95_f32.powf(steps * self.zoom_speed);
    }

    /// Apply queued motion. With damping, only `damping_factor` of the
    /// pending rotation is applied and the rest decays over later updates.
    pub fn update(&mut self) {
        let damping = if self.damping_factor > 0.0 {
            self.damping_factor.min(1.0)
        } else {
            1.0
        };

        self.azimuth += self.azimuth_delta * damping;
        self.target += self.pan_offset * damping;
        self.polar = (self.polar + self.polar_delta * damping)
            .clamp(POLAR_EPSILON, PI - POLAR_EPSILON);
        self.radius = (self.radius * self.scale).clamp(self.min_distance, self.max_distance);

        self.azimuth_delta *= 1.0 - damping;
        self.polar_delta *= 1.0 - damping;
        self.pan_offset *= 1.0 - damping;
        self.scale = 1.0;
    }

    /// Camera right and up vectors in world space.
    fn screen_axes(&self) -> (Vec3, Vec3) {
        let forward = (self.target - self.position()).normalize_or(Vec3::NEG_Z);
        let right = forward.cross(Vec3::Y).normalize_or(Vec3::X);
        (right, right.cross(forward))
    }

    pub fn position(&self) -> Vec3 {
        let sin_polar = self.polar.sin();
        self.target
            + self.radius
                * Vec3::new(
                    sin_polar * self.azimuth.sin(),
                    self.polar.cos(),
                    sin_polar * self.azimuth.cos(),
                )
    }

    pub fn render_view(&self) -> RenderView {
        RenderView {
            eye: self.position(),
            target: self.target,
            fov_degrees: self.fov_degrees,
            aspect: self.aspect,
            near: self.near,
            far: self.far,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_camera_matches_config() {
        let cam = OrbitCamera::default();
        assert!((cam.position() - Vec3::new(0.0, 0.0, 10.0)).length() < 1e-4);
        assert_eq!(cam.damping_factor, 0.25);
        let vp = cam.render_view().view_projection();
        assert!(vp.is_finite());
    }

    #[test]
    fn damping_converges_to_full_rotation() {
        let mut cam = OrbitCamera::default();
        let start = cam.azimuth;
        cam.rotate(100.0, 0.0, 720.0);
        let expected = -TAU * 100.0 / 720.0;

        cam.update();
        // First update applies only a quarter.
        assert!(((cam.azimuth - start) - expected * 0.25).abs() < 1e-5);

        for _ in 0..200 {
            cam.update();
        }
        assert!(((cam.azimuth - start) - expected).abs() < 1e-4);
    }

    #[test]
    fn no_damping_applies_immediately() {
        let mut cam = OrbitCamera::default();
        cam.damping_factor = 0.0;
        let start = cam.polar;
        cam.rotate(0.0, -36.0, 720.0);
        cam.update();
        assert!(((cam.polar - start) - TAU * 36.0 / 720.0).abs() < 1e-5);
    }

    #[test]
    fn polar_angle_is_clamped() {
        let mut cam = OrbitCamera::default();
        cam.damping_factor = 0.0;
        cam.rotate(0.0, 100_000.0, 720.0);
        cam.update();
        assert!(cam.polar > 0.0);
        assert!(cam.render_view().view_projection().is_finite());
    }

    #[test]
    fn pan_moves_target_in_view_plane() {
        let mut cam = OrbitCamera::default();
        cam.damping_factor = 0.0;
        let offset = cam.position() - cam.target;

        // Drag right by half the viewport height: the target slides left.
        cam.pan(360.0, 0.0, 720.0);
        cam.update();
        let expected = 10.0 * (75.0_f32.to_radians() / 2.0).tan();
        assert!((cam.target - Vec3::new(-expected, 0.0, 0.0)).length() < 1e-4);
        // The camera travels with its target.
        assert!(((cam.position() - cam.target) - offset).length() < 1e-4);

        cam.pan(0.0, 360.0, 720.0);
        cam.update();
        assert!((cam.target.y - expected).abs() < 1e-4);
    }

    #[test]
    fn pan_is_damped_like_rotation() {
        let mut cam = OrbitCamera::default();
        cam.pan(-100.0, 0.0, 720.0);
        cam.update();
        let first = cam.target.x;
        assert!(first > 0.0);
        for _ in 0..200 {
            cam.update();
        }
        assert!((cam.target.x - first * 4.0).abs() < 1e-4);
    }

    #[test]
    fn pan_disabled_keeps_target() {
        let mut cam = OrbitCamera::default();
        cam.enable_pan = false;
        cam.pan(50.0, 50.0, 720.0);
        cam.update();
        assert_eq!(cam.target, Vec3::ZERO);
    }

    #[test]
    fn zoom_clamps_distance() {
        let mut cam = OrbitCamera::default();
        cam.zoom(1000.0);
        cam.update();
        assert_eq!(cam.radius, cam.min_distance);

        cam.zoom(-1000.0);
        cam.update();
        assert_eq!(cam.radius, cam.max_distance);
    }

    #[test]
    fn zoom_disabled_keeps_distance() {
        let mut cam = OrbitCamera::default();
        cam.enable_zoom = false;
        cam.zoom(10.0);
        cam.update();
        assert!((cam.radius - 10.0).abs() < 1e-5);
    }
}
