//! Camera Uniforms
//!
//! Per-frame camera block consumed by the sort, Z-bin and cluster stages and
//! by shading passes. Uploaded once per frame with [`LightClustering::update_camera`].
//!
//! View space is right-handed with the camera looking down -Z, so the view
//! depth used as sort key is `-z` of the view-space position. Projection
//! follows WebGPU conventions (NDC depth 0..1, Y up).
//!
//! [`LightClustering::update_camera`]: super::cluster_dispatch::LightClustering::update_camera

use glam::{Mat4, Vec3, Vec4};

/// GPU camera block.
///
/// WGSL Layout (208 bytes):
///   offset   0: view      (mat4x4<f32>)
///   offset  64: proj      (mat4x4<f32>)
///   offset 128: inv_proj  (mat4x4<f32>)
///   offset 192: viewport  (vec2<f32>)
///   offset 200: near      (f32)
///   offset 204: far       (f32)
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniforms {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub inv_proj: [[f32; 4]; 4],
    pub viewport: [f32; 2],
    pub near: f32,
    pub far: f32,
}

const _: () = {
    assert!(
        std::mem::size_of::<CameraUniforms>() == 208,
        "CameraUniforms must be exactly 208 bytes to match WGSL"
    );
};

impl Default for CameraUniforms {
    fn default() -> Self {
        Self::look_at(
            Vec3::new(0.0, 5.0, 12.0),
            Vec3::new(0.0, 3.0, 0.0),
            std::f32::consts::FRAC_PI_4,
            [1920.0, 1080.0],
            0.1,
            1000.0,
        )
    }
}

impl CameraUniforms {
    /// Build from explicit view and projection matrices.
    pub fn new(view: Mat4, proj: Mat4, viewport: [f32; 2], near: f32, far: f32) -> Self {
        Self {
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
            inv_proj: proj.inverse().to_cols_array_2d(),
            viewport,
            near,
            far,
        }
    }

    /// Perspective camera at `eye` looking at `target` with +Y up.
    ///
    /// Aspect ratio is taken from `viewport`.
    pub fn look_at(
        eye: Vec3,
        target: Vec3,
        fov_y: f32,
        viewport: [f32; 2],
        near: f32,
        far: f32,
    ) -> Self {
        let aspect = viewport[0] / viewport[1].max(1.0);
        let view = Mat4::look_at_rh(eye, target, Vec3::Y);
        let proj = Mat4::perspective_rh(fov_y, aspect, near, far);
        Self::new(view, proj, viewport, near, far)
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.view)
    }

    pub fn inverse_projection(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.inv_proj)
    }

    /// World-space point transformed into view space.
    pub fn view_position(&self, world: Vec3) -> Vec3 {
        self.view_matrix().transform_point3(world)
    }

    /// View depth (`-z` in view space); positive in front of the camera.
    pub fn view_depth(&self, world: Vec3) -> f32 {
        -self.view_position(world).z
    }

    /// View-space point on the ray through NDC `(x, y)` at view depth `depth`.
    ///
    /// Mirrors `view_point_at_depth` in `cluster_assign.wgsl`.
    pub fn view_point_at_depth(&self, ndc_x: f32, ndc_y: f32, depth: f32) -> Vec3 {
        let clip = self.inverse_projection() * Vec4::new(ndc_x, ndc_y, 0.0, 1.0);
        let on_near = clip.truncate() / clip.w;
        on_near * (depth / -on_near.z)
    }
}
