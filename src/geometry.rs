//! Geometry building: replay a command stream for one viewer.
//!
//! [`GeometryBuilder`] decodes a (static, dynamic or persistent) stream,
//! maintains the matrix / color / line-width stacks, and turns every drawing
//! record into vertices and indices in one of three kinds of geometry:
//!
//! - **Lines** — four [`LineVertex`]es per segment, extruded in screen space
//!   by the line shader; consecutive segments under an auto-join line width
//!   scope are welded at shared endpoints
//! - **Solids** — plain triangles ([`SolidVertex`])
//! - **Text** — glyph quads ([`TextVertex`]), either screen-facing or world
//!   space
//!
//! Curves are tessellated per viewer so that the screen-space deviation from
//! the true curve stays below [`DrawConfig::max_pixel_error`].
//!
//! Stack misuse is handled strictly: overflow, underflow or unclosed scopes
//! fail the whole stream and leave the output empty.

use std::f32::consts::{PI, TAU};

use glam::{Mat4, Quat, Vec2, Vec3};

use crate::color::Color;
use crate::command::{
    circle_basis, BoxData, CaptureData, CircleData, CircleXzData, LineData, LineWidthData,
    MatrixData, PlaneData, Record, RecordReader, ScopeKind, SphereData, Tag, Text2dData,
    Text3dData, TriangleData,
};
use crate::config::DrawConfig;
use crate::error::{DrawError, DrawResult};
use crate::pool::Poolable;
use crate::text::{layout, GlyphTable};
use crate::vertex::{LineVertex, SolidVertex, TextVertex};
use crate::viewer::Viewer;

/// Lowest segment count of a full circle.
pub const MIN_CIRCLE_STEPS: u32 = 3;

/// Line width used outside any line width scope, in pixels.
pub const DEFAULT_LINE_WIDTH: f32 = 1.0;

/// Squared distance under which two line endpoints count as shared.
const JOIN_EPSILON_SQ: f32 = 1e-10;

/// Segment count of a full circle for a given pixel error budget.
///
/// Returns `ceil(π / acos(1 − max_pixel_error · pixel_size / world_radius))`
/// clamped to `[MIN_CIRCLE_STEPS, max_steps]`. Non-decreasing in
/// `world_radius / pixel_size`.
///
/// ```
/// use redlilium_draw_commands::geometry::circle_steps;
///
/// let near = circle_steps(0.5, 0.001, 1.0, 512);
/// let far = circle_steps(0.5, 0.01, 1.0, 512);
/// assert!(near > far);
/// assert!(far >= 3);
/// ```
pub fn circle_steps(max_pixel_error: f32, pixel_size: f32, world_radius: f32, max_steps: u32) -> u32 {
    let max_steps = max_steps.max(MIN_CIRCLE_STEPS);
    if !(world_radius > 0.0) || !world_radius.is_finite() {
        return MIN_CIRCLE_STEPS;
    }
    let ratio = max_pixel_error * pixel_size / world_radius;
    if !ratio.is_finite() {
        return MIN_CIRCLE_STEPS;
    }
    if ratio <= 0.0 {
        return max_steps;
    }
    let half_angle = (1.0 - ratio).max(-1.0).acos();
    let steps = (PI / half_angle).ceil();
    if steps >= max_steps as f32 {
        max_steps
    } else {
        (steps as u32).max(MIN_CIRCLE_STEPS)
    }
}

/// Largest axis scale of the linear part of `matrix`.
fn max_scale(matrix: &Mat4) -> f32 {
    matrix
        .x_axis
        .truncate()
        .length()
        .max(matrix.y_axis.truncate().length())
        .max(matrix.z_axis.truncate().length())
}

/// Axis-aligned bounding volume.
///
/// Once a non-finite point is added the volume becomes infinite and stays
/// so; culling then never rejects it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub const INFINITE: Self = Self {
        min: Vec3::splat(f32::NEG_INFINITY),
        max: Vec3::splat(f32::INFINITY),
    };

    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    pub fn is_infinite(&self) -> bool {
        *self == Self::INFINITE
    }

    /// Grow to contain `point`. Returns `false` if `point` is not finite.
    pub fn extend(&mut self, point: Vec3) -> bool {
        if !point.is_finite() {
            *self = Self::INFINITE;
            return false;
        }
        if !self.is_infinite() {
            self.min = self.min.min(point);
            self.max = self.max.max(point);
        }
        true
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Which geometry buffer a piece of output lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GeometryKind {
    Lines,
    Solids,
    Text,
}

/// Indexed triangle mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData<V> {
    pub vertices: Vec<V>,
    pub indices: Vec<u32>,
}

impl<V> MeshData<V> {
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn clear(&mut self) {
        self.vertices.clear();
        self.indices.clear();
    }

    fn next_index(&self) -> u32 {
        self.vertices.len() as u32
    }

    fn capacity_bytes(&self) -> usize {
        self.vertices.capacity() * std::mem::size_of::<V>() + self.indices.capacity() * 4
    }
}

impl<V> Default for MeshData<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Externally built geometry that inherits the scope state it was captured in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapturedMesh {
    pub mesh_id: u32,
    pub matrix: Mat4,
    pub color: Color,
}

/// Number of records that produced output, per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrimitiveCounts {
    pub lines: u32,
    pub solids: u32,
    pub text: u32,
    pub captured: u32,
}

impl PrimitiveCounts {
    pub fn total(&self) -> u32 {
        self.lines + self.solids + self.text + self.captured
    }
}

/// Output of one build: geometry of all kinds plus its bounds.
#[derive(Debug, Clone, Default)]
pub struct GeometryBuffers {
    pub lines: MeshData<LineVertex>,
    pub solids: MeshData<SolidVertex>,
    pub text: MeshData<TextVertex>,
    pub captured: Vec<CapturedMesh>,
    pub bounds: Aabb,
    pub primitives: PrimitiveCounts,
}

impl GeometryBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.solids.clear();
        self.text.clear();
        self.captured.clear();
        self.bounds = Aabb::EMPTY;
        self.primitives = PrimitiveCounts::default();
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
            && self.solids.is_empty()
            && self.text.is_empty()
            && self.captured.is_empty()
    }
}

impl Poolable for GeometryBuffers {
    fn new_empty() -> Self {
        Self::new()
    }

    fn reset(&mut self) {
        self.clear();
    }

    fn capacity_bytes(&self) -> usize {
        self.lines.capacity_bytes()
            + self.solids.capacity_bytes()
            + self.text.capacity_bytes()
            + self.captured.capacity() * std::mem::size_of::<CapturedMesh>()
    }
}

/// Triangles of a box whose corners are indexed by `x | y << 1 | z << 2`.
#[rustfmt::skip]
const BOX_TRIANGLES: [u32; 36] = [
    0, 2, 1,  1, 2, 3, // -Z
    4, 5, 6,  5, 7, 6, // +Z
    0, 1, 4,  1, 5, 4, // -Y
    2, 6, 3,  3, 6, 7, // +Y
    0, 4, 2,  2, 4, 6, // -X
    1, 3, 5,  3, 7, 5, // +X
];

/// Edges of the same box.
#[rustfmt::skip]
const BOX_EDGES: [(usize, usize); 12] = [
    (0, 1), (2, 3), (4, 5), (6, 7),
    (0, 2), (1, 3), (4, 6), (5, 7),
    (0, 4), (1, 5), (2, 6), (3, 7),
];

/// Decodes command streams into [`GeometryBuffers`] for one viewer.
pub struct GeometryBuilder<'a> {
    config: &'a DrawConfig,
    glyphs: &'a GlyphTable,
    viewer: &'a Viewer,
}

impl<'a> GeometryBuilder<'a> {
    pub fn new(config: &'a DrawConfig, glyphs: &'a GlyphTable, viewer: &'a Viewer) -> Self {
        Self {
            config,
            glyphs,
            viewer,
        }
    }

    /// Append the geometry of `stream` to `out`.
    ///
    /// On error `out` is cleared.
    pub fn build(&self, stream: &[u8], out: &mut GeometryBuffers) -> DrawResult<()> {
        let mut replay = Replay::new(self, out);
        let result = replay.run(stream);
        if result.is_err() {
            out.clear();
        }
        result
    }

    /// Like [`build`](Self::build), but logs failures instead of returning them.
    pub fn build_or_clear(&self, stream: &[u8], out: &mut GeometryBuffers) {
        if let Err(err) = self.build(stream, out) {
            log::warn!("dropping malformed draw stream ({} bytes): {}", stream.len(), err);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LineJoint {
    end: Vec3,
    direction: Vec3,
    width: f32,
    color: [f32; 4],
    /// Index of the first of the two vertices at `end`.
    vertex: u32,
}

/// Replay state of one build.
struct Replay<'b, 'a> {
    builder: &'b GeometryBuilder<'a>,
    out: &'b mut GeometryBuffers,
    matrix: Mat4,
    matrix_stack: Vec<Mat4>,
    color: Color,
    color_stack: Vec<Color>,
    width: LineWidthData,
    width_stack: Vec<LineWidthData>,
    duration_depth: usize,
    last_line: Option<LineJoint>,
    warned_non_finite: bool,
    glyph_scratch: Vec<u16>,
}

fn push_bounded<T>(stack: &mut Vec<T>, value: T, kind: ScopeKind, max: usize) -> DrawResult<()> {
    if stack.len() >= max {
        return Err(DrawError::StackOverflow { kind, max });
    }
    stack.push(value);
    Ok(())
}

fn pop_or_underflow<T>(stack: &mut Vec<T>, kind: ScopeKind) -> DrawResult<T> {
    stack.pop().ok_or(DrawError::StackUnderflow(kind))
}

impl<'b, 'a> Replay<'b, 'a> {
    fn new(builder: &'b GeometryBuilder<'a>, out: &'b mut GeometryBuffers) -> Self {
        Self {
            builder,
            out,
            matrix: Mat4::IDENTITY,
            matrix_stack: Vec::new(),
            color: Color::WHITE,
            color_stack: Vec::new(),
            width: LineWidthData {
                pixels: DEFAULT_LINE_WIDTH,
                auto_join: 0,
            },
            width_stack: Vec::new(),
            duration_depth: 0,
            last_line: None,
            warned_non_finite: false,
            glyph_scratch: Vec::new(),
        }
    }

    fn run(&mut self, stream: &[u8]) -> DrawResult<()> {
        for record in RecordReader::new(stream) {
            let record = record?;
            if record.tag == Tag::Line {
                self.apply(&record)?;
            } else {
                // Only consecutive line records weld.
                self.last_line = None;
                self.apply(&record)?;
                self.last_line = None;
            }
        }
        let open = self.matrix_stack.len()
            + self.color_stack.len()
            + self.width_stack.len()
            + self.duration_depth;
        if open > 0 {
            return Err(DrawError::UnbalancedScopes { open });
        }
        Ok(())
    }

    fn apply(&mut self, record: &Record<'_>) -> DrawResult<()> {
        let max = self.builder.config.max_stack_depth;
        match record.tag {
            Tag::PushMatrix | Tag::PushSetMatrix => {
                let data: MatrixData = record.payload()?;
                push_bounded(&mut self.matrix_stack, self.matrix, ScopeKind::Matrix, max)?;
                self.matrix = if record.tag == Tag::PushMatrix {
                    self.matrix * data.matrix
                } else {
                    data.matrix
                };
            }
            Tag::PopMatrix => {
                self.matrix = pop_or_underflow(&mut self.matrix_stack, ScopeKind::Matrix)?;
            }
            Tag::PushColor => {
                let color: Color = record.payload()?;
                push_bounded(&mut self.color_stack, self.color, ScopeKind::Color, max)?;
                self.color = color;
            }
            Tag::PopColor => {
                self.color = pop_or_underflow(&mut self.color_stack, ScopeKind::Color)?;
            }
            Tag::PushLineWidth => {
                let width: LineWidthData = record.payload()?;
                push_bounded(&mut self.width_stack, self.width, ScopeKind::LineWidth, max)?;
                self.width = width;
            }
            Tag::PopLineWidth => {
                self.width = pop_or_underflow(&mut self.width_stack, ScopeKind::LineWidth)?;
            }
            Tag::PushDuration => {
                if self.duration_depth >= max {
                    return Err(DrawError::StackOverflow {
                        kind: ScopeKind::Duration,
                        max,
                    });
                }
                self.duration_depth += 1;
            }
            Tag::PopDuration => {
                if self.duration_depth == 0 {
                    return Err(DrawError::StackUnderflow(ScopeKind::Duration));
                }
                self.duration_depth -= 1;
            }
            Tag::Line => {
                let line: LineData = record.payload()?;
                let a = self.transform(line.a);
                let b = self.transform(line.b);
                let join = self.width.auto_join != 0;
                self.emit_line(a, b, join);
                self.out.primitives.lines += 1;
            }
            Tag::Circle | Tag::Disc => {
                let data: CircleData = record.payload()?;
                let (u, v) = circle_basis(data.normal);
                self.emit_circle(
                    record.tag == Tag::Disc,
                    data.center,
                    u,
                    v,
                    data.radius,
                    data.start_angle,
                    data.end_angle,
                );
            }
            Tag::CircleXz | Tag::DiscXz => {
                let data: CircleXzData = record.payload()?;
                self.emit_circle(
                    record.tag == Tag::DiscXz,
                    data.center,
                    Vec3::X,
                    Vec3::Z,
                    data.radius,
                    data.start_angle,
                    data.end_angle,
                );
            }
            Tag::SphereOutline => {
                let data: SphereData = record.payload()?;
                self.emit_sphere_outline(data);
            }
            Tag::WireBox | Tag::SolidBox => {
                let data: BoxData = record.payload()?;
                let half = data.size * 0.5;
                let corners: [Vec3; 8] = std::array::from_fn(|i| {
                    let sign = Vec3::new(
                        if i & 1 != 0 { 1.0 } else { -1.0 },
                        if i & 2 != 0 { 1.0 } else { -1.0 },
                        if i & 4 != 0 { 1.0 } else { -1.0 },
                    );
                    self.transform(data.center + half * sign)
                });
                if record.tag == Tag::SolidBox {
                    self.emit_solid(&corners, &BOX_TRIANGLES);
                } else {
                    for (a, b) in BOX_EDGES {
                        self.emit_line(corners[a], corners[b], false);
                    }
                    self.out.primitives.lines += 1;
                }
            }
            Tag::WirePlane | Tag::SolidPlane => {
                let data: PlaneData = record.payload()?;
                let rotation = data.rotation();
                let half = data.size * 0.5;
                let corners = [
                    Vec2::new(-half.x, -half.y),
                    Vec2::new(half.x, -half.y),
                    Vec2::new(half.x, half.y),
                    Vec2::new(-half.x, half.y),
                ]
                .map(|c| self.transform(data.center + rotation * Vec3::new(c.x, 0.0, c.y)));
                if record.tag == Tag::SolidPlane {
                    self.emit_solid(&corners, &[0, 1, 2, 0, 2, 3]);
                } else {
                    for i in 0..4 {
                        self.emit_line(corners[i], corners[(i + 1) % 4], false);
                    }
                    self.out.primitives.lines += 1;
                }
            }
            Tag::WireTriangle | Tag::SolidTriangle => {
                let data: TriangleData = record.payload()?;
                let corners = [data.a, data.b, data.c].map(|p| self.transform(p));
                if record.tag == Tag::SolidTriangle {
                    self.emit_solid(&corners, &[0, 1, 2]);
                } else {
                    for i in 0..3 {
                        self.emit_line(corners[i], corners[(i + 1) % 3], false);
                    }
                    self.out.primitives.lines += 1;
                }
            }
            Tag::CaptureState => {
                let data: CaptureData = record.payload()?;
                self.out.captured.push(CapturedMesh {
                    mesh_id: data.mesh_id,
                    matrix: self.matrix,
                    color: self.color,
                });
                self.out.primitives.captured += 1;
            }
            Tag::Text2d => {
                let data: Text2dData = record.payload()?;
                self.load_glyphs(record, data.glyph_count);
                let anchor = self.transform(data.center);
                self.extend_bounds(anchor);
                let color = self.color.to_array();
                let glyphs = std::mem::take(&mut self.glyph_scratch);
                let text = &mut self.out.text;
                layout(self.builder.glyphs, &glyphs, data.pivot, |quad| {
                    let base = text.next_index();
                    for (corner, uv) in quad.corners.iter().zip(quad.uvs) {
                        let offset = *corner * data.size_px + data.pixel_offset;
                        text.vertices.push(TextVertex {
                            anchor: anchor.to_array(),
                            offset: offset.to_array(),
                            uv: uv.to_array(),
                            color,
                            screen_space: 1.0,
                        });
                    }
                    text.indices
                        .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
                });
                self.glyph_scratch = glyphs;
                self.out.primitives.text += 1;
            }
            Tag::Text3d => {
                let data: Text3dData = record.payload()?;
                self.load_glyphs(record, data.glyph_count);
                let rotation: Quat = data.rotation();
                let glyphs = std::mem::take(&mut self.glyph_scratch);
                let mut corners = Vec::new();
                layout(self.builder.glyphs, &glyphs, data.pivot, |quad| {
                    corners.push(quad);
                });
                let color = self.color.to_array();
                for quad in corners {
                    let base = self.out.text.next_index();
                    for (corner, uv) in quad.corners.iter().zip(quad.uvs) {
                        let local = *corner * data.size + data.offset;
                        let world =
                            self.transform(data.center + rotation * Vec3::new(local.x, local.y, 0.0));
                        self.extend_bounds(world);
                        self.out.text.vertices.push(TextVertex {
                            anchor: world.to_array(),
                            offset: [0.0; 2],
                            uv: uv.to_array(),
                            color,
                            screen_space: 0.0,
                        });
                    }
                    self.out
                        .text
                        .indices
                        .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
                }
                self.glyph_scratch = glyphs;
                self.out.primitives.text += 1;
            }
        }
        Ok(())
    }

    fn transform(&self, point: Vec3) -> Vec3 {
        self.matrix.project_point3(point)
    }

    fn extend_bounds(&mut self, point: Vec3) {
        if !self.out.bounds.extend(point) && !self.warned_non_finite {
            self.warned_non_finite = true;
            if cfg!(debug_assertions) {
                log::warn!("non-finite draw coordinate {point}; bounds set to infinite");
            }
        }
    }

    fn load_glyphs(&mut self, record: &Record<'_>, count: u32) {
        self.glyph_scratch.clear();
        self.glyph_scratch.extend(record.glyphs(count));
    }

    /// Emit one segment, welding it to the previous one when allowed.
    fn emit_line(&mut self, a: Vec3, b: Vec3, join: bool) {
        self.extend_bounds(a);
        self.extend_bounds(b);
        let direction = (b - a).normalize_or_zero();
        let width = self.width.pixels;
        let color = self.color.to_array();
        let threshold = self.builder.config.line_join_cos_threshold;
        let lines = &mut self.out.lines;

        let welded = match self.last_line {
            Some(prev)
                if join
                    && prev.width == width
                    && prev.color == color
                    && prev.end.distance_squared(a) <= JOIN_EPSILON_SQ
                    && prev.direction.dot(direction) >= threshold =>
            {
                let averaged = (prev.direction + direction).normalize_or_zero();
                for v in &mut lines.vertices[prev.vertex as usize..prev.vertex as usize + 2] {
                    v.direction = averaged.to_array();
                }
                Some(prev.vertex)
            }
            _ => None,
        };

        let vertex = |position: Vec3, side: f32| LineVertex {
            position: position.to_array(),
            direction: direction.to_array(),
            color,
            width,
            side,
        };
        let start = match welded {
            Some(start) => start,
            None => {
                let start = lines.next_index();
                lines.vertices.push(vertex(a, -1.0));
                lines.vertices.push(vertex(a, 1.0));
                start
            }
        };
        let end = lines.next_index();
        lines.vertices.push(vertex(b, -1.0));
        lines.vertices.push(vertex(b, 1.0));
        lines
            .indices
            .extend_from_slice(&[start, start + 1, end, end, start + 1, end + 1]);

        self.last_line = Some(LineJoint {
            end: b,
            direction,
            width,
            color,
            vertex: end,
        });
    }

    fn emit_solid(&mut self, corners: &[Vec3], indices: &[u32]) {
        let color = self.color.to_array();
        for &corner in corners {
            self.extend_bounds(corner);
        }
        let solids = &mut self.out.solids;
        let base = solids.next_index();
        solids.vertices.extend(corners.iter().map(|p| SolidVertex {
            position: p.to_array(),
            color,
        }));
        solids.indices.extend(indices.iter().map(|i| base + i));
        self.out.primitives.solids += 1;
    }

    /// Segment count for an arc of `sweep` radians drawn through `matrix`.
    fn arc_segments(&self, matrix: &Mat4, center: Vec3, radius: f32, sweep: f32) -> u32 {
        let config = self.builder.config;
        let world_center = matrix.project_point3(center);
        let world_radius = radius.abs() * max_scale(matrix);
        let pixel_size = self.builder.viewer.pixel_size_at(world_center);
        let full = circle_steps(
            config.max_pixel_error,
            pixel_size,
            world_radius,
            config.max_circle_steps,
        );
        let fraction = (sweep.abs() / TAU).min(1.0);
        if fraction >= 1.0 {
            full
        } else {
            ((full as f32 * fraction).ceil() as u32).max(1)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_circle(
        &mut self,
        filled: bool,
        center: Vec3,
        u: Vec3,
        v: Vec3,
        radius: f32,
        start_angle: f32,
        end_angle: f32,
    ) {
        let matrix = self.matrix;
        self.emit_arc(&matrix, filled, center, u, v, radius, start_angle, end_angle);
    }

    /// Tessellate an arc in the plane spanned by `u`, `v` around `center`,
    /// all in the space of `matrix`.
    #[allow(clippy::too_many_arguments)]
    fn emit_arc(
        &mut self,
        matrix: &Mat4,
        filled: bool,
        center: Vec3,
        u: Vec3,
        v: Vec3,
        radius: f32,
        start_angle: f32,
        end_angle: f32,
    ) {
        let sweep = end_angle - start_angle;
        let segments = self.arc_segments(matrix, center, radius, sweep);
        let point = |i: u32| {
            let angle = start_angle + sweep * i as f32 / segments as f32;
            let (sin, cos) = angle.sin_cos();
            matrix.project_point3(center + (u * cos + v * sin) * radius)
        };

        if filled {
            let world_center = matrix.project_point3(center);
            let mut corners = Vec::with_capacity(segments as usize + 2);
            corners.push(world_center);
            corners.extend((0..=segments).map(point));
            let indices: Vec<u32> = (1..=segments).flat_map(|i| [0, i, i + 1]).collect();
            self.emit_solid(&corners, &indices);
        } else {
            let mut previous = point(0);
            for i in 1..=segments {
                let next = point(i);
                self.emit_line(previous, next, i > 1);
                previous = next;
            }
            self.out.primitives.lines += 1;
        }
    }

    /// Silhouette circle of a sphere as seen from the viewer.
    fn emit_sphere_outline(&mut self, data: SphereData) {
        let viewer = self.builder.viewer;
        let center = self.transform(data.center);
        let radius = data.radius.abs() * max_scale(&self.matrix);

        let (circle_center, circle_radius, normal) = if viewer.orthographic {
            (center, radius, viewer.forward())
        } else {
            let to_center = center - viewer.position;
            let distance = to_center.length();
            if distance <= radius {
                // Viewer inside the sphere: no silhouette.
                return;
            }
            let normal = to_center / distance;
            let radius_sq = radius * radius;
            let silhouette =
                radius * (distance * distance - radius_sq).max(0.0).sqrt() / distance;
            (center - normal * (radius_sq / distance), silhouette, normal)
        };

        let (u, v) = circle_basis(normal);
        self.emit_arc(
            &Mat4::IDENTITY,
            false,
            circle_center,
            u,
            v,
            circle_radius,
            0.0,
            TAU,
        );
    }
}
