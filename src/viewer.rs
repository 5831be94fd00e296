//! Viewer descriptors.
//!
//! A viewer is anything geometry is built for: a scene camera, an editor
//! viewport, a shadow-casting light. The drawer only needs enough of it to
//! pick tessellation density and orient screen-facing primitives.

use glam::{Quat, Vec3};

/// Stable identifier of a viewer across frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ViewerId(pub u64);

/// Viewer descriptor consumed by the geometry builder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewer {
    pub id: ViewerId,
    pub position: Vec3,
    /// Orientation; the viewer looks down its local `-Z`.
    pub rotation: Quat,
    /// World size of one pixel as `slope * depth + intercept`.
    pub depth_to_pixel_size: (f32, f32),
    pub orthographic: bool,
}

impl Default for Viewer {
    fn default() -> Self {
        Self {
            id: ViewerId::default(),
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            depth_to_pixel_size: (0.001, 0.0),
            orthographic: false,
        }
    }
}

impl Viewer {
    /// Perspective viewer with vertical field of view `fov_y` (radians)
    /// rendering into a viewport `viewport_height` pixels tall.
    pub fn perspective(
        id: ViewerId,
        position: Vec3,
        rotation: Quat,
        fov_y: f32,
        viewport_height: f32,
    ) -> Self {
        let slope = 2.0 * (fov_y * 0.5).tan() / viewport_height.max(1.0);
        Self {
            id,
            position,
            rotation,
            depth_to_pixel_size: (slope, 0.0),
            orthographic: false,
        }
    }

    /// Orthographic viewer showing `world_height` units over
    /// `viewport_height` pixels.
    pub fn orthographic(
        id: ViewerId,
        position: Vec3,
        rotation: Quat,
        world_height: f32,
        viewport_height: f32,
    ) -> Self {
        Self {
            id,
            position,
            rotation,
            depth_to_pixel_size: (0.0, world_height / viewport_height.max(1.0)),
            orthographic: true,
        }
    }

    /// Perspective viewer at `position` looking at `target`.
    pub fn looking_at(id: ViewerId, position: Vec3, target: Vec3, fov_y: f32, viewport_height: f32) -> Self {
        let forward = (target - position).normalize_or_zero();
        let rotation = if forward == Vec3::ZERO {
            Quat::IDENTITY
        } else {
            Quat::from_rotation_arc(Vec3::NEG_Z, forward)
        };
        Self::perspective(id, position, rotation, fov_y, viewport_height)
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    /// Distance of `point` along the view direction. Zero for orthographic
    /// viewers and for points behind the viewer.
    pub fn depth_of(&self, point: Vec3) -> f32 {
        if self.orthographic {
            return 0.0;
        }
        (point - self.position).dot(self.forward()).max(0.0)
    }

    /// World size of one pixel at `point`.
    pub fn pixel_size_at(&self, point: Vec3) -> f32 {
        let (slope, intercept) = self.depth_to_pixel_size;
        slope * self.depth_of(point) + intercept
    }
}
