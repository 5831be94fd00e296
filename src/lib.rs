//! Deferred drawing commands for RedLilium Engine.
//!
//! Gizmos, debug shapes and labels are recorded as compact binary command
//! streams from any thread, then split, filtered and turned into vertex
//! geometry by background jobs. Rendering has one tick of latency.
//!
//! # Architecture
//!
//! - [`CommandEncoder`] — append-only recorder with per-thread writer buffers
//! - `splitter` — partitions a submission into static, dynamic and
//!   persistent streams
//! - `persist` — drops expired duration scopes from persistent streams
//! - [`geometry`] — replays a stream for one viewer into line, solid and
//!   text geometry
//! - [`CommandDrawer`] — lifecycle manager: encoder slots, processed entries,
//!   epochs, garbage collection, buffer pools and the render hand-off
//!
//! # Usage
//!
//! ```
//! use glam::{Mat4, Vec3};
//! use redlilium_draw_commands::{
//!     Color, CommandDrawer, CountingSink, DrawConfig, LabelAlignment, Viewer, ViewerId,
//! };
//!
//! let drawer = CommandDrawer::new(DrawConfig::default().with_worker_threads(0));
//! let camera = Viewer::looking_at(ViewerId(0), Vec3::new(0.0, 2.0, 8.0), Vec3::ZERO, 1.0, 720.0);
//!
//! // Any thread, any time during the tick:
//! {
//!     let encoder = drawer.frame_encoder();
//!     let _m = encoder.with_matrix(Mat4::from_translation(Vec3::Y));
//!     let _c = encoder.with_color(Color::GREEN);
//!     encoder.wire_box(Vec3::ZERO, Vec3::ONE);
//!     encoder.circle_xz(Vec3::ZERO, 2.0);
//!     encoder.label_2d(Vec3::ZERO, "origin", 14.0, LabelAlignment::BOTTOM_CENTER);
//! }
//!
//! // Cached drawing: skip encoding when nothing changed.
//! let hash = drawer.hash_begin().add(&Vec3::X).add("marker").finish();
//! if !drawer.try_draw(hash, None) {
//!     let encoder = drawer.get_encoder_for(hash, None);
//!     encoder.cross(Vec3::X, 0.5);
//!     encoder.submit().unwrap();
//! }
//!
//! // Once per frame:
//! drawer.advance_tick(1.0 / 60.0).unwrap();
//! let mut sink = CountingSink::default();
//! drawer.render_viewer(&camera, &mut sink).unwrap();
//! assert!(sink.meshes > 0);
//! ```

mod buffer;
mod color;
mod command;
mod config;
mod draw_api;
mod drawer;
mod encoder;
mod error;
pub mod geometry;
mod hash;
pub mod jobs;
mod persist;
pub mod pool;
mod present;
mod scope;
mod slots;
mod splitter;
mod store;
mod text;
mod vertex;
mod viewer;

pub use buffer::{ByteReader, CommandBuffer};
pub use color::Color;
pub use command::{
    BoxData, CaptureData, Category, CircleData, CircleXzData, LineData, LineWidthData,
    MatrixData, PersistData, PlaneData, Record, RecordReader, ScopeKind, SphereData, Tag,
    TagClass, Text2dData, Text3dData, TriangleData, TAG_SIZE,
};
pub use config::DrawConfig;
pub use drawer::{CommandDrawer, DrawerStats, PERSISTENT_DRAW_ORDER_OFFSET};
pub use encoder::{current_writer_id, CommandEncoder, ScopeGuard};
pub use error::{DrawError, DrawResult};
pub use hash::{DrawHash, DrawHasher, HashInput};
pub use jobs::{DependencyPolicy, JobCompleter, JobHandle, JobScheduler};
pub use persist::{filter_persistent, FilterOutcome};
pub use present::{CountingSink, PresentItem, PresentationSink, VertexData};
pub use scope::{RedrawScope, ScopeId};
pub use slots::EncoderHandle;
pub use splitter::split_streams;
pub use text::{GlyphInfo, GlyphTable, LabelAlignment, TextExtent};
pub use vertex::{LineVertex, SolidVertex, TextVertex};
pub use viewer::{Viewer, ViewerId};
