use glam::{Mat4, Quat, Vec2, Vec3};

use crate::color::Color;
use crate::command::{
    BoxData, CaptureData, CircleData, CircleXzData, PlaneData, SphereData, Tag, Text2dData,
    Text3dData, TriangleData,
};
use crate::encoder::{CommandEncoder, ScopeGuard};
use crate::text::LabelAlignment;

use std::f32::consts::TAU;

impl CommandEncoder {
    // --- scoped state ------------------------------------------------------

    /// Multiply the current matrix by `matrix` until the guard drops.
    pub fn with_matrix(&self, matrix: Mat4) -> ScopeGuard<'_> {
        self.push_matrix(matrix);
        ScopeGuard::new(self, Tag::PopMatrix)
    }

    /// Replace the current matrix with `matrix` until the guard drops.
    pub fn with_set_matrix(&self, matrix: Mat4) -> ScopeGuard<'_> {
        self.push_set_matrix(matrix);
        ScopeGuard::new(self, Tag::PopMatrix)
    }

    pub fn with_color(&self, color: Color) -> ScopeGuard<'_> {
        self.push_color(color);
        ScopeGuard::new(self, Tag::PopColor)
    }

    /// Keep everything drawn until the guard drops on screen for `seconds`.
    pub fn with_duration(&self, seconds: f32) -> ScopeGuard<'_> {
        self.push_duration(seconds);
        ScopeGuard::new(self, Tag::PopDuration)
    }

    /// Line width in pixels. With `auto_join`, consecutive lines sharing an
    /// endpoint are welded.
    pub fn with_line_width(&self, pixels: f32, auto_join: bool) -> ScopeGuard<'_> {
        self.push_line_width(pixels, auto_join);
        ScopeGuard::new(self, Tag::PopLineWidth)
    }

    // --- lines -------------------------------------------------------------

    pub fn line_colored(&self, a: Vec3, b: Vec3, color: Color) {
        let _color = self.with_color(color);
        self.line(a, b);
    }

    /// One `Line` record from `origin` to `origin + direction * length`.
    /// `direction` is not normalized.
    pub fn ray(&self, origin: Vec3, direction: Vec3, length: f32) {
        self.line(origin, origin + direction * length);
    }

    /// Connected line strip through `points`.
    pub fn polyline(&self, points: &[Vec3], closed: bool) {
        for pair in points.windows(2) {
            self.line(pair[0], pair[1]);
        }
        if closed && points.len() > 2 {
            self.line(points[points.len() - 1], points[0]);
        }
    }

    /// Cubic Bézier curve approximated by `segments` lines.
    pub fn bezier(&self, p0: Vec3, p1: Vec3, p2: Vec3, p3: Vec3, segments: u32) {
        let segments = segments.max(1);
        let point = |t: f32| {
            let u = 1.0 - t;
            p0 * (u * u * u) + p1 * (3.0 * u * u * t) + p2 * (3.0 * u * t * t) + p3 * (t * t * t)
        };
        let mut previous = p0;
        for i in 1..=segments {
            let next = point(i as f32 / segments as f32);
            self.line(previous, next);
            previous = next;
        }
    }

    /// Catmull-Rom spline through `points`, `segments` lines per span.
    ///
    /// The curve passes through every point; the end spans reuse the first
    /// and last point as their outer control point.
    pub fn catmull_rom(&self, points: &[Vec3], segments: u32) {
        if points.len() < 2 {
            return;
        }
        let segments = segments.max(1);
        let at = |i: isize| points[i.clamp(0, points.len() as isize - 1) as usize];
        let mut previous = points[0];
        for span in 0..points.len() as isize - 1 {
            let (p0, p1, p2, p3) = (at(span - 1), at(span), at(span + 1), at(span + 2));
            for i in 1..=segments {
                let t = i as f32 / segments as f32;
                let t2 = t * t;
                let t3 = t2 * t;
                let next = 0.5
                    * ((2.0 * p1)
                        + (p2 - p0) * t
                        + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
                        + (3.0 * p1 - p0 - 3.0 * p2 + p3) * t3);
                self.line(previous, next);
                previous = next;
            }
        }
    }

    /// Three `Line` records of length `size`, centered on `center`.
    pub fn cross(&self, center: Vec3, size: f32) {
        let half = size * 0.5;
        for axis in [Vec3::X, Vec3::Y, Vec3::Z] {
            self.line(center - axis * half, center + axis * half);
        }
    }

    /// Local axes as colored lines: X red, Y green, Z blue. Each line is
    /// wrapped in its own color scope.
    pub fn axes(&self, center: Vec3, size: f32) {
        for (axis, color) in [(Vec3::X, Color::RED), (Vec3::Y, Color::GREEN), (Vec3::Z, Color::BLUE)] {
            self.line_colored(center, center + axis * size, color);
        }
    }

    /// `2 * half_count + 1` lines along each of X and Z, `cell_size` apart.
    pub fn grid_xz(&self, center: Vec3, cell_size: f32, half_count: u32) {
        let extent = cell_size * half_count as f32;
        let n = half_count as i32;
        for i in -n..=n {
            let offset = i as f32 * cell_size;
            // Z-parallel
            self.line(
                center + Vec3::new(offset, 0.0, -extent),
                center + Vec3::new(offset, 0.0, extent),
            );
            // X-parallel
            self.line(
                center + Vec3::new(-extent, 0.0, offset),
                center + Vec3::new(extent, 0.0, offset),
            );
        }
    }

    /// Twelve `Line` records joining `corners`: the first four form the near
    /// rectangle, the last four the far one, in the same winding.
    pub fn frustum(&self, corners: &[Vec3; 8]) {
        for i in 0..4 {
            let j = (i + 1) % 4;
            self.line(corners[i], corners[j]);
            self.line(corners[i + 4], corners[j + 4]);
            self.line(corners[i], corners[i + 4]);
        }
    }

    /// Wireframe of the frustum whose clip space `view_proj` maps to `[-1, 1]³`
    /// (depth `[0, 1]`).
    pub fn frustum_from_matrix(&self, view_proj: Mat4) {
        let inverse = view_proj.inverse();
        let corner = |x: f32, y: f32, z: f32| inverse.project_point3(Vec3::new(x, y, z));
        let corners = [
            corner(-1.0, 1.0, 0.0),
            corner(1.0, 1.0, 0.0),
            corner(1.0, -1.0, 0.0),
            corner(-1.0, -1.0, 0.0),
            corner(-1.0, 1.0, 1.0),
            corner(1.0, 1.0, 1.0),
            corner(1.0, -1.0, 1.0),
            corner(-1.0, -1.0, 1.0),
        ];
        self.frustum(&corners);
    }

    // --- curves ------------------------------------------------------------

    /// Arc around `normal` from `start_angle` to `end_angle` (radians).
    pub fn arc(&self, center: Vec3, normal: Vec3, radius: f32, start_angle: f32, end_angle: f32) {
        self.record(
            Tag::Circle,
            &CircleData {
                center,
                normal,
                radius,
                start_angle,
                end_angle,
            },
        );
    }

    pub fn circle(&self, center: Vec3, normal: Vec3, radius: f32) {
        self.arc(center, normal, radius, 0.0, TAU);
    }

    pub fn circle_xz(&self, center: Vec3, radius: f32) {
        self.record(
            Tag::CircleXz,
            &CircleXzData {
                center,
                radius,
                start_angle: 0.0,
                end_angle: TAU,
            },
        );
    }

    pub fn circle_xy(&self, center: Vec3, radius: f32) {
        self.circle(center, Vec3::Z, radius);
    }

    /// Filled circle facing `normal`.
    pub fn disc(&self, center: Vec3, normal: Vec3, radius: f32) {
        self.record(
            Tag::Disc,
            &CircleData {
                center,
                normal,
                radius,
                start_angle: 0.0,
                end_angle: TAU,
            },
        );
    }

    pub fn disc_xz(&self, center: Vec3, radius: f32) {
        self.record(
            Tag::DiscXz,
            &CircleXzData {
                center,
                radius,
                start_angle: 0.0,
                end_angle: TAU,
            },
        );
    }

    pub fn disc_xy(&self, center: Vec3, radius: f32) {
        self.disc(center, Vec3::Z, radius);
    }

    /// Outline of a sphere as seen by each viewer.
    pub fn sphere_outline(&self, center: Vec3, radius: f32) {
        self.record(Tag::SphereOutline, &SphereData { center, radius });
    }

    // --- boxes, planes, triangles ------------------------------------------

    pub fn wire_box(&self, center: Vec3, size: Vec3) {
        self.record(Tag::WireBox, &BoxData { center, size });
    }

    pub fn solid_box(&self, center: Vec3, size: Vec3) {
        self.record(Tag::SolidBox, &BoxData { center, size });
    }

    /// A `WireBox` record spanning `min..max`.
    pub fn wire_aabb(&self, min: Vec3, max: Vec3) {
        self.wire_box((min + max) * 0.5, max - min);
    }

    /// Rectangle of `size` in the XZ plane of `rotation`.
    pub fn wire_plane(&self, center: Vec3, rotation: Quat, size: Vec2) {
        self.record(
            Tag::WirePlane,
            &PlaneData {
                center,
                rotation: rotation.to_array(),
                size,
            },
        );
    }

    pub fn solid_plane(&self, center: Vec3, rotation: Quat, size: Vec2) {
        self.record(
            Tag::SolidPlane,
            &PlaneData {
                center,
                rotation: rotation.to_array(),
                size,
            },
        );
    }

    pub fn wire_triangle(&self, a: Vec3, b: Vec3, c: Vec3) {
        self.record(Tag::WireTriangle, &TriangleData { a, b, c });
    }

    pub fn solid_triangle(&self, a: Vec3, b: Vec3, c: Vec3) {
        self.record(Tag::SolidTriangle, &TriangleData { a, b, c });
    }

    // --- captured meshes and text ------------------------------------------

    /// Have the host draw mesh `mesh_id` with the current matrix and color.
    pub fn mesh_capture(&self, mesh_id: u32) {
        self.record(Tag::CaptureState, &CaptureData { mesh_id });
    }

    /// Screen-facing label at `position`, glyphs `size_px` pixels tall.
    pub fn label_2d(&self, position: Vec3, text: &str, size_px: f32, alignment: LabelAlignment) {
        let glyphs = self.encode_text(text);
        if glyphs.is_empty() {
            return;
        }
        let data = Text2dData {
            center: position,
            pivot: alignment.pivot,
            pixel_offset: alignment.pixel_offset,
            size_px,
            glyph_count: glyphs.len() as u32,
        };
        self.record_text(Tag::Text2d, &data, &glyphs);
    }

    /// World-space label; `size` is the line height in world units and the
    /// alignment offset is in world units too.
    pub fn label_3d(&self, position: Vec3, rotation: Quat, text: &str, size: f32, alignment: LabelAlignment) {
        let glyphs = self.encode_text(text);
        if glyphs.is_empty() {
            return;
        }
        let data = Text3dData {
            center: position,
            rotation: rotation.to_array(),
            pivot: alignment.pivot,
            offset: alignment.pixel_offset,
            size,
            glyph_count: glyphs.len() as u32,
        };
        self.record_text(Tag::Text3d, &data, &glyphs);
    }

    fn encode_text(&self, text: &str) -> Vec<u16> {
        let mut glyphs = Vec::with_capacity(text.len());
        self.shared().glyphs().encode_into(text, &mut glyphs);
        glyphs
    }
}
