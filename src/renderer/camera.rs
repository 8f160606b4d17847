//! Orbit camera around a fixed target.

use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, PI};

use crate::linalg::{self, Mat4, Vec3};

pub const ROTATE_SPEED: f32 = 0.005;
pub const ZOOM_STEP: f32 = 0.1;
pub const MIN_DISTANCE: f32 = 0.8;
pub const MAX_DISTANCE: f32 = 8.0;
pub const FIELD_OF_VIEW: f32 = PI / 3.0;
pub const NEAR: f32 = 0.1;
pub const FAR: f32 = 50.0;

const ELEVATION_LIMIT: f32 = FRAC_PI_2 - 0.05;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrbitCamera {
    pub azimuth: f32,
    pub elevation: f32,
    pub distance: f32,
    pub target: Vec3,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self { azimuth: -FRAC_PI_4, elevation: PI / 5.0, distance: 2.8, target: [0.0; 3] }
    }
}

impl OrbitCamera {
    /// Pointer drag in pixels.
    pub fn rotate(&mut self, dx: f32, dy: f32) {
        self.azimuth += dx * ROTATE_SPEED;
        self.elevation = (self.elevation + dy * ROTATE_SPEED).clamp(-ELEVATION_LIMIT, ELEVATION_LIMIT);
    }

    /// One wheel tick per call; positive `direction` moves away.
    pub fn zoom(&mut self, direction: f32) {
        if direction == 0.0 || !direction.is_finite() {
            return;
        }
        self.distance = (self.distance * (1.0 + direction.signum() * ZOOM_STEP)).clamp(MIN_DISTANCE, MAX_DISTANCE);
    }

    pub fn reset(&mut self) {
        let target = self.target;
        *self = Self { target, ..Self::default() };
    }

    /// Straight down onto the bed.
    pub fn top(&mut self) {
        self.azimuth = 0.0;
        self.elevation = FRAC_PI_2 - 0.01;
        self.distance = 2.0;
    }

    pub fn iso(&mut self) {
        self.azimuth = -FRAC_PI_4;
        self.elevation = FRAC_PI_4;
        self.distance = 2.2;
    }

    pub fn eye(&self) -> Vec3 {
        let offset = linalg::spherical_to_cartesian(self.distance, self.azimuth, self.elevation);
        [offset[0] + self.target[0], offset[1] + self.target[1], offset[2] + self.target[2]]
    }

    pub fn view(&self) -> Mat4 {
        linalg::look_at(self.eye(), self.target, [0.0, 1.0, 0.0])
    }

    pub fn projection(&self, aspect: f32) -> Mat4 {
        let aspect = if aspect.is_finite() && aspect > 0.0 { aspect } else { 1.0 };
        linalg::perspective(FIELD_OF_VIEW, aspect, NEAR, FAR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elevation_is_clamped() {
        let mut camera = OrbitCamera::default();
        camera.rotate(0.0, 10_000.0);
        assert_eq!(camera.elevation, ELEVATION_LIMIT);
        camera.rotate(0.0, -20_000.0);
        assert_eq!(camera.elevation, -ELEVATION_LIMIT);
    }

    #[test]
    fn rotate_scales_pixels() {
        let mut camera = OrbitCamera::default();
        let start = camera.azimuth;
        camera.rotate(100.0, 0.0);
        assert!((camera.azimuth - start - 0.5).abs() < 1e-6);
    }

    #[test]
    fn zoom_is_multiplicative_and_bounded() {
        let mut camera = OrbitCamera::default();
        camera.zoom(1.0);
        assert!((camera.distance - 2.8 * 1.1).abs() < 1e-5);
        camera.zoom(-3.0);
        assert!((camera.distance - 2.8 * 1.1 * 0.9).abs() < 1e-5);
        for _ in 0..100 {
            camera.zoom(1.0);
        }
        assert_eq!(camera.distance, MAX_DISTANCE);
        for _ in 0..100 {
            camera.zoom(-1.0);
        }
        assert_eq!(camera.distance, MIN_DISTANCE);
    }

    #[test]
    fn presets_look_from_above() {
        let mut camera = OrbitCamera::default();
        camera.top();
        assert!(camera.eye()[1] > 1.9);
        camera.iso();
        assert!(camera.eye()[1] > 0.0);
        camera.reset();
        assert_eq!(camera, OrbitCamera::default());
    }
}
