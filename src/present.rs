//! Hand-off of built geometry to the host renderer.
//!
//! The drawer does not own any GPU resources. At render time it collects the
//! geometry eligible for a viewer, sorts it by draw order and passes borrowed
//! slices to a [`PresentationSink`] implemented by the host.

use crate::geometry::{Aabb, CapturedMesh, GeometryKind};
use crate::vertex::{LineVertex, SolidVertex, TextVertex};
use crate::viewer::ViewerId;

/// Vertex slice of one geometry kind.
#[derive(Debug, Clone, Copy)]
pub enum VertexData<'a> {
    Lines(&'a [LineVertex]),
    Solids(&'a [SolidVertex]),
    Text(&'a [TextVertex]),
}

impl VertexData<'_> {
    pub fn kind(&self) -> GeometryKind {
        match self {
            VertexData::Lines(_) => GeometryKind::Lines,
            VertexData::Solids(_) => GeometryKind::Solids,
            VertexData::Text(_) => GeometryKind::Text,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            VertexData::Lines(v) => v.len(),
            VertexData::Solids(v) => v.len(),
            VertexData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw bytes, ready for a vertex buffer upload.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            VertexData::Lines(v) => bytemuck::cast_slice(v),
            VertexData::Solids(v) => bytemuck::cast_slice(v),
            VertexData::Text(v) => bytemuck::cast_slice(v),
        }
    }
}

/// One draw handed to the sink.
#[derive(Debug, Clone, Copy)]
pub enum PresentItem<'a> {
    /// Indexed triangle list.
    Mesh {
        vertices: VertexData<'a>,
        indices: &'a [u32],
        bounds: Aabb,
        draw_order: u64,
    },
    /// A host mesh drawn with the captured matrix and color.
    Captured { mesh: CapturedMesh, draw_order: u64 },
}

impl PresentItem<'_> {
    pub fn draw_order(&self) -> u64 {
        match self {
            PresentItem::Mesh { draw_order, .. } | PresentItem::Captured { draw_order, .. } => {
                *draw_order
            }
        }
    }
}

/// Receives the geometry of one viewer per render call.
pub trait PresentationSink {
    /// `items` are sorted by ascending draw order.
    fn present(&mut self, viewer: ViewerId, items: &[PresentItem<'_>]);
}

/// Sink that only counts what it is given. Handy for headless hosts.
#[derive(Debug, Default, Clone)]
pub struct CountingSink {
    pub calls: usize,
    pub meshes: usize,
    pub captured: usize,
    pub vertices: usize,
    pub indices: usize,
}

impl PresentationSink for CountingSink {
    fn present(&mut self, _viewer: ViewerId, items: &[PresentItem<'_>]) {
        self.calls += 1;
        for item in items {
            match item {
                PresentItem::Mesh {
                    vertices, indices, ..
                } => {
                    self.meshes += 1;
                    self.vertices += vertices.len();
                    self.indices += indices.len();
                }
                PresentItem::Captured { .. } => self.captured += 1,
            }
        }
    }
}

/// Sort items in place by draw order, keeping submission order for ties.
pub(crate) fn sort_items(items: &mut [PresentItem<'_>]) {
    items.sort_by_key(PresentItem::draw_order);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use glam::Mat4;

    #[test]
    fn sort_is_stable_by_draw_order() {
        let captured = |id, order| PresentItem::Captured {
            mesh: CapturedMesh {
                mesh_id: id,
                matrix: Mat4::IDENTITY,
                color: Color::WHITE,
            },
            draw_order: order,
        };
        let mut items = vec![captured(1, 5), captured(2, 1), captured(3, 5), captured(4, 0)];
        sort_items(&mut items);
        let ids: Vec<u32> = items
            .iter()
            .map(|item| match item {
                PresentItem::Captured { mesh, .. } => mesh.mesh_id,
                PresentItem::Mesh { .. } => unreachable!(),
            })
            .collect();
        assert_eq!(ids, vec![4, 2, 1, 3]);
    }

    #[test]
    fn vertex_bytes_match_layout() {
        let verts = [SolidVertex {
            position: [0.0; 3],
            color: [1.0; 4],
        }];
        let data = VertexData::Solids(&verts);
        assert_eq!(data.kind(), GeometryKind::Solids);
        assert_eq!(data.as_bytes().len(), std::mem::size_of::<SolidVertex>());
    }
}
