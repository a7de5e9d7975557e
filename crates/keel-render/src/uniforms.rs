//! Per-frame uniform data.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Camera matrices the renderer reads each frame.
///
/// Implemented by whatever owns camera state; the renderer does no
/// camera math of its own.
pub trait CameraView {
    fn view_matrix(&self) -> Mat4;
    fn projection_matrix(&self) -> Mat4;
    fn position(&self) -> Vec3;
}

/// Uniform buffer contents (set 0, binding 0), std140 compatible.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub view_projection: [[f32; 4]; 4],
    pub camera_position: [f32; 4],
}

impl UniformBufferObject {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn from_camera<C: CameraView + ?Sized>(camera: &C) -> Self {
        let view = camera.view_matrix();
        let projection = camera.projection_matrix();
        Self {
            view: view.to_cols_array_2d(),
            projection: projection.to_cols_array_2d(),
            view_projection: (projection * view).to_cols_array_2d(),
            camera_position: camera.position().extend(1.0).to_array(),
        }
    }
}

impl Default for UniformBufferObject {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY.to_cols_array_2d(),
            projection: Mat4::IDENTITY.to_cols_array_2d(),
            view_projection: Mat4::IDENTITY.to_cols_array_2d(),
            camera_position: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct FixedCamera;

    impl CameraView for FixedCamera {
        fn view_matrix(&self) -> Mat4 {
            Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y)
        }

        fn projection_matrix(&self) -> Mat4 {
            Mat4::perspective_rh(std::f32::consts::FRAC_PI_4, 16.0 / 9.0, 0.1, 1000.0)
        }

        fn position(&self) -> Vec3 {
            Vec3::new(0.0, 0.0, 5.0)
        }
    }

    #[test]
    fn std140_size() {
        assert_eq!(UniformBufferObject::SIZE, 3 * 64 + 16);
    }

    #[test]
    fn view_projection_is_projection_times_view() {
        let camera = FixedCamera;
        let ubo = UniformBufferObject::from_camera(&camera);
        let expected = camera.projection_matrix() * camera.view_matrix();
        let actual = Mat4::from_cols_array_2d(&ubo.view_projection);

        for (a, e) in actual.to_cols_array().iter().zip(expected.to_cols_array()) {
            assert_relative_eq!(*a, e, epsilon = 1e-6);
        }
        assert_eq!(ubo.camera_position, [0.0, 0.0, 5.0, 1.0]);
    }

    #[test]
    fn origin_projects_to_view_center() {
        let ubo = UniformBufferObject::from_camera(&FixedCamera);
        let clip = Mat4::from_cols_array_2d(&ubo.view_projection) * glam::Vec4::W;
        assert_relative_eq!(clip.x / clip.w, 0.0, epsilon = 1e-6);
        assert_relative_eq!(clip.y / clip.w, 0.0, epsilon = 1e-6);
    }
}
