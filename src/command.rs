//! Binary command record format.
//!
//! A command stream is a sequence of records. Each record is a `u32` tag word
//! followed by the tag's fixed-size POD payload. Text records are followed by
//! `glyph_count` `u16` glyph indices, padded to a multiple of 4 bytes.
//!
//! ```text
//! ┌──────────┬──────────────────────────┬──────────────────────┐
//! │ tag: u32 │ payload (size_of::<T>()) │ glyphs (text only)   │
//! └──────────┴──────────────────────────┴──────────────────────┘
//! ```
//!
//! Every push tag must be matched by a pop of the same [`ScopeKind`] at the
//! same depth within one writer buffer. Encoders do not enforce this;
//! decoders reject unbalanced streams.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec2, Vec3};

use crate::buffer::ByteReader;
use crate::color::Color;
use crate::error::{DrawError, DrawResult};

/// Size of the tag word preceding every payload.
pub const TAG_SIZE: usize = std::mem::size_of::<u32>();

/// Kind of scoped state a push/pop record manipulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Matrix,
    Color,
    LineWidth,
    /// Persistence scope with an absolute expiry time.
    Duration,
}

/// Lifetime category a record is routed to by the splitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Viewer-independent geometry, built once and shared by all viewers.
    Static,
    /// Viewer-dependent geometry, built per viewer.
    Dynamic,
    /// Anything drawn inside a duration scope; survives across ticks.
    Persistent,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Static, Category::Dynamic, Category::Persistent];

    pub fn index(self) -> usize {
        match self {
            Category::Static => 0,
            Category::Dynamic => 1,
            Category::Persistent => 2,
        }
    }
}

/// How the splitter treats a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagClass {
    Push(ScopeKind),
    Pop(ScopeKind),
    Draw(Category),
}

/// Record tags.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Multiply the current matrix by the payload matrix.
    PushMatrix = 1,
    /// Replace the current matrix with the payload matrix.
    PushSetMatrix = 2,
    PopMatrix = 3,
    PushColor = 4,
    PopColor = 5,
    PushLineWidth = 6,
    PopLineWidth = 7,
    PushDuration = 8,
    PopDuration = 9,
    Line = 10,
    Circle = 11,
    CircleXz = 12,
    Disc = 13,
    DiscXz = 14,
    SphereOutline = 15,
    WireBox = 16,
    SolidBox = 17,
    WirePlane = 18,
    SolidPlane = 19,
    WireTriangle = 20,
    SolidTriangle = 21,
    CaptureState = 22,
    Text2d = 23,
    Text3d = 24,
}

impl Tag {
    pub const ALL: [Tag; 24] = [
        Tag::PushMatrix,
        Tag::PushSetMatrix,
        Tag::PopMatrix,
        Tag::PushColor,
        Tag::PopColor,
        Tag::PushLineWidth,
        Tag::PopLineWidth,
        Tag::PushDuration,
        Tag::PopDuration,
        Tag::Line,
        Tag::Circle,
        Tag::CircleXz,
        Tag::Disc,
        Tag::DiscXz,
        Tag::SphereOutline,
        Tag::WireBox,
        Tag::SolidBox,
        Tag::WirePlane,
        Tag::SolidPlane,
        Tag::WireTriangle,
        Tag::SolidTriangle,
        Tag::CaptureState,
        Tag::Text2d,
        Tag::Text3d,
    ];

    pub fn from_u32(value: u32) -> Option<Tag> {
        match value {
            1..=24 => Some(Self::ALL[value as usize - 1]),
            _ => None,
        }
    }

    pub fn class(self) -> TagClass {
        use Category::*;
        match self {
            Tag::PushMatrix | Tag::PushSetMatrix => TagClass::Push(ScopeKind::Matrix),
            Tag::PopMatrix => TagClass::Pop(ScopeKind::Matrix),
            Tag::PushColor => TagClass::Push(ScopeKind::Color),
            Tag::PopColor => TagClass::Pop(ScopeKind::Color),
            Tag::PushLineWidth => TagClass::Push(ScopeKind::LineWidth),
            Tag::PopLineWidth => TagClass::Pop(ScopeKind::LineWidth),
            Tag::PushDuration => TagClass::Push(ScopeKind::Duration),
            Tag::PopDuration => TagClass::Pop(ScopeKind::Duration),
            Tag::Line
            | Tag::WireBox
            | Tag::SolidBox
            | Tag::WirePlane
            | Tag::SolidPlane
            | Tag::WireTriangle
            | Tag::SolidTriangle => TagClass::Draw(Static),
            Tag::Circle
            | Tag::CircleXz
            | Tag::Disc
            | Tag::DiscXz
            | Tag::SphereOutline
            | Tag::CaptureState
            | Tag::Text2d
            | Tag::Text3d => TagClass::Draw(Dynamic),
        }
    }

    /// Size of the fixed payload following the tag word.
    pub fn payload_size(self) -> usize {
        use std::mem::size_of;
        match self {
            Tag::PushMatrix | Tag::PushSetMatrix => size_of::<MatrixData>(),
            Tag::PushColor => size_of::<Color>(),
            Tag::PushLineWidth => size_of::<LineWidthData>(),
            Tag::PushDuration => size_of::<PersistData>(),
            Tag::PopMatrix | Tag::PopColor | Tag::PopLineWidth | Tag::PopDuration => 0,
            Tag::Line => size_of::<LineData>(),
            Tag::Circle | Tag::Disc => size_of::<CircleData>(),
            Tag::CircleXz | Tag::DiscXz => size_of::<CircleXzData>(),
            Tag::SphereOutline => size_of::<SphereData>(),
            Tag::WireBox | Tag::SolidBox => size_of::<BoxData>(),
            Tag::WirePlane | Tag::SolidPlane => size_of::<PlaneData>(),
            Tag::WireTriangle | Tag::SolidTriangle => size_of::<TriangleData>(),
            Tag::CaptureState => size_of::<CaptureData>(),
            Tag::Text2d => size_of::<Text2dData>(),
            Tag::Text3d => size_of::<Text3dData>(),
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct MatrixData {
    pub matrix: Mat4,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct LineWidthData {
    pub pixels: f32,
    /// Non-zero when consecutive lines should be welded at their joins.
    pub auto_join: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct PersistData {
    /// Absolute drawer-clock time (seconds) at which the scope expires.
    pub end_time: f64,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct LineData {
    pub a: Vec3,
    pub b: Vec3,
}

/// Circle, arc or disc in the plane perpendicular to `normal`.
///
/// Angles are measured in the basis returned by [`circle_basis`].
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct CircleData {
    pub center: Vec3,
    pub normal: Vec3,
    pub radius: f32,
    pub start_angle: f32,
    pub end_angle: f32,
}

/// Circle, arc or disc in the XZ plane. Angle 0 points along +X, growing
/// towards +Z.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct CircleXzData {
    pub center: Vec3,
    pub radius: f32,
    pub start_angle: f32,
    pub end_angle: f32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct SphereData {
    pub center: Vec3,
    pub radius: f32,
}

/// Axis-aligned box in the current matrix space.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct BoxData {
    pub center: Vec3,
    pub size: Vec3,
}

/// Rectangle lying in the local XZ plane of `rotation`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct PlaneData {
    pub center: Vec3,
    /// Quaternion stored as `[x, y, z, w]`.
    pub rotation: [f32; 4],
    pub size: Vec2,
}

impl PlaneData {
    pub fn rotation(&self) -> Quat {
        Quat::from_array(self.rotation)
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct TriangleData {
    pub a: Vec3,
    pub b: Vec3,
    pub c: Vec3,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct CaptureData {
    /// Identifier of externally built geometry.
    pub mesh_id: u32,
}

/// Screen-facing label anchored at a world position, sized in pixels.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Text2dData {
    pub center: Vec3,
    pub pivot: Vec2,
    pub pixel_offset: Vec2,
    pub size_px: f32,
    pub glyph_count: u32,
}

/// World-space label with an orientation, sized in world units.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Text3dData {
    pub center: Vec3,
    /// Quaternion stored as `[x, y, z, w]`.
    pub rotation: [f32; 4],
    pub pivot: Vec2,
    /// Offset in world units (scaled by nothing).
    pub offset: Vec2,
    pub size: f32,
    pub glyph_count: u32,
}

impl Text3dData {
    pub fn rotation(&self) -> Quat {
        Quat::from_array(self.rotation)
    }
}

/// Bytes occupied by `count` glyph indices, padded to 4 bytes.
pub fn glyph_bytes(count: u32) -> usize {
    (count as usize * 2 + 3) & !3
}

/// Orthonormal basis `(u, v)` spanning the plane perpendicular to `normal`.
///
/// Shared by encoder and geometry builder so that arc angles agree.
pub fn circle_basis(normal: Vec3) -> (Vec3, Vec3) {
    let n = normal.normalize_or_zero();
    if n == Vec3::ZERO {
        return (Vec3::X, Vec3::Z);
    }
    n.any_orthonormal_pair()
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// One decoded record, borrowing its bytes from the stream.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    pub tag: Tag,
    /// Offset of the tag word within the stream.
    pub offset: usize,
    /// Total record size including tag, payload and trailing glyphs.
    pub size: usize,
    payload: &'a [u8],
    trailing: &'a [u8],
}

impl<'a> Record<'a> {
    /// Decode the payload as `T`.
    ///
    /// `T` must be the payload type belonging to [`Self::tag`]; a size
    /// mismatch yields [`DrawError::Truncated`].
    pub fn payload<T: Pod>(&self) -> DrawResult<T> {
        ByteReader::new(self.payload).read_pod()
    }

    /// Trailing glyph indices of a text record.
    pub fn glyphs(&self, count: u32) -> impl Iterator<Item = u16> + 'a {
        self.trailing
            .chunks_exact(2)
            .take(count as usize)
            .map(|c| u16::from_ne_bytes([c[0], c[1]]))
    }

    /// Raw record bytes (tag word included).
    pub fn bytes(&self, stream: &'a [u8]) -> &'a [u8] {
        &stream[self.offset..self.offset + self.size]
    }
}

/// Iterator over the records of a command stream.
///
/// Yields an error and stops on unknown tags or truncated records.
pub struct RecordReader<'a> {
    reader: ByteReader<'a>,
    failed: bool,
}

impl<'a> RecordReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            reader: ByteReader::new(bytes),
            failed: false,
        }
    }

    pub fn offset(&self) -> usize {
        self.reader.offset()
    }

    fn read_record(&mut self) -> DrawResult<Record<'a>> {
        let offset = self.reader.offset();
        let raw: u32 = self.reader.read_pod()?;
        let tag = Tag::from_u32(raw).ok_or(DrawError::UnknownTag { tag: raw, offset })?;
        let payload = self.reader.take(tag.payload_size())?;
        let trailing_len = match tag {
            Tag::Text2d => {
                let data: Text2dData = bytemuck::pod_read_unaligned(payload);
                glyph_bytes(data.glyph_count)
            }
            Tag::Text3d => {
                let data: Text3dData = bytemuck::pod_read_unaligned(payload);
                glyph_bytes(data.glyph_count)
            }
            _ => 0,
        };
        let trailing = self.reader.take(trailing_len)?;
        Ok(Record {
            tag,
            offset,
            size: self.reader.offset() - offset,
            payload,
            trailing,
        })
    }
}

impl<'a> Iterator for RecordReader<'a> {
    type Item = DrawResult<Record<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.reader.is_at_end() {
            return None;
        }
        let record = self.read_record();
        self.failed = record.is_err();
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::CommandBuffer;

    #[test]
    fn tag_round_trip() {
        for tag in Tag::ALL {
            assert_eq!(Tag::from_u32(tag as u32), Some(tag));
        }
        assert_eq!(Tag::from_u32(0), None);
        assert_eq!(Tag::from_u32(25), None);
    }

    #[test]
    fn payloads_are_word_aligned() {
        for tag in Tag::ALL {
            assert_eq!(tag.payload_size() % 4, 0, "{tag:?}");
        }
    }

    #[test]
    fn glyph_padding() {
        assert_eq!(glyph_bytes(0), 0);
        assert_eq!(glyph_bytes(1), 4);
        assert_eq!(glyph_bytes(2), 4);
        assert_eq!(glyph_bytes(3), 8);
    }

    #[test]
    fn reader_walks_records() {
        let mut buf = CommandBuffer::new();
        buf.write_pod(&(Tag::PushColor as u32));
        buf.write_pod(&Color::RED);
        buf.write_pod(&(Tag::Line as u32));
        buf.write_pod(&LineData {
            a: Vec3::ZERO,
            b: Vec3::ONE,
        });
        buf.write_pod(&(Tag::PopColor as u32));

        let records: Vec<_> = RecordReader::new(buf.as_bytes())
            .collect::<DrawResult<_>>()
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].payload::<Color>().unwrap(), Color::RED);
        assert_eq!(records[1].payload::<LineData>().unwrap().b, Vec3::ONE);
        assert_eq!(records[2].size, TAG_SIZE);
    }

    #[test]
    fn reader_reports_unknown_tag_once() {
        let mut buf = CommandBuffer::new();
        buf.write_pod(&99u32);
        let mut reader = RecordReader::new(buf.as_bytes());
        assert_eq!(
            reader.next().unwrap().unwrap_err(),
            DrawError::UnknownTag { tag: 99, offset: 0 }
        );
        assert!(reader.next().is_none());
    }

    #[test]
    fn circle_basis_is_orthonormal() {
        let (u, v) = circle_basis(Vec3::new(0.3, 1.0, -0.2));
        let n = Vec3::new(0.3, 1.0, -0.2).normalize();
        assert!(u.dot(v).abs() < 1e-5);
        assert!(u.dot(n).abs() < 1e-5);
        assert!((u.length() - 1.0).abs() < 1e-5);
    }
}
