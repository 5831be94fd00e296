/// Outline vertex, expanded to a screen-space ribbon by the line shader.
///
/// Every line segment contributes four vertices (two per endpoint, one on
/// each side) and six indices. Welded joints share the two vertices at the
/// joint, whose `direction` is the average of both segments.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LineVertex {
    pub position: [f32; 3],
    /// World-space direction of the segment at this vertex.
    pub direction: [f32; 3],
    pub color: [f32; 4],
    /// Line width in pixels.
    pub width: f32,
    /// `-1.0` or `1.0`: which side of the segment this vertex extrudes to.
    pub side: f32,
}

/// Solid triangle vertex: position + color.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SolidVertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

/// Text glyph vertex.
///
/// For screen-facing labels `anchor` is the label's world anchor and
/// `offset` the corner's pixel offset from it (`screen_space == 1.0`).
/// World-space labels carry the corner's world position in `anchor` and a
/// zero `offset`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TextVertex {
    pub anchor: [f32; 3],
    pub offset: [f32; 2],
    pub uv: [f32; 2],
    pub color: [f32; 4],
    pub screen_space: f32,
}
