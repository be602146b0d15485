use glam::{Mat4, Vec3, Vec4};

/// Pinhole camera aimed at a fixed target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in degrees.
    pub fov_y: f32,
}

impl Camera {
    pub fn look_at(eye: Vec3, target: Vec3, up: Vec3, fov_y: f32) -> Self {
        Self {
            eye,
            target,
            up,
            fov_y,
        }
    }

    pub fn forward(&self) -> Vec3 {
        (self.target - self.eye).try_normalize().unwrap_or(Vec3::Z)
    }

    /// Camera-to-world rotation. Local +X is right, +Y up and +Z the viewing
    /// direction; translation is left out, the eye travels separately.
    pub fn view_rotation(&self) -> Mat4 {
        let forward = self.forward();
        let right = self
            .up
            .cross(forward)
            .try_normalize()
            // up parallel to the view direction
            .unwrap_or_else(|| forward.any_orthonormal_vector());
        let up = forward.cross(right);
        Mat4::from_cols(
            right.extend(0.0),
            up.extend(0.0),
            forward.extend(0.0),
            Vec4::W,
        )
    }

    /// Half extents of the image plane at unit distance.
    pub fn viewport_scale(&self, width: u32, height: u32) -> [f32; 2] {
        let half = (self.fov_y.to_radians() * 0.5).tan();
        let aspect = width.max(1) as f32 / height.max(1) as f32;
        [half * aspect, half]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn looking_down_z_is_identity() {
        let cam = Camera::look_at(Vec3::ZERO, Vec3::Z, Vec3::Y, 40.0);
        let m = cam.view_rotation();
        assert!(m.abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }

    #[test]
    fn rotation_points_z_at_the_target() {
        let cam = Camera::look_at(Vec3::new(278.0, 273.0, -800.0), Vec3::ZERO, Vec3::Y, 40.0);
        let m = cam.view_rotation();
        let forward = m.transform_vector3(Vec3::Z);
        assert!(close(forward, (-cam.eye).normalize()));

        let right = m.transform_vector3(Vec3::X);
        let up = m.transform_vector3(Vec3::Y);
        assert!(right.dot(up).abs() < 1e-5);
        assert!(right.dot(forward).abs() < 1e-5);
        assert!(up.y > 0.0);
        assert!((m.determinant() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn degenerate_up_still_orthonormal() {
        let cam = Camera::look_at(Vec3::ZERO, Vec3::Y, Vec3::Y, 40.0);
        let m = cam.view_rotation();
        assert!(close(m.transform_vector3(Vec3::Z), Vec3::Y));
        assert!((m.determinant().abs() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn viewport_scale_follows_aspect() {
        let cam = Camera::look_at(Vec3::ZERO, Vec3::Z, Vec3::Y, 90.0);
        let [x, y] = cam.viewport_scale(200, 100);
        assert!((y - 1.0).abs() < 1e-5);
        assert!((x - 2.0).abs() < 1e-5);
        // zero height does not divide by zero
        assert!(cam.viewport_scale(10, 0)[0].is_finite());
    }
}
