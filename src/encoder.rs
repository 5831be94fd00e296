//! Append-only command encoders.
//!
//! A [`CommandEncoder`] records drawing commands into per-thread writer
//! buffers. Every thread gets a small process-unique writer id on first use;
//! the encoder keeps one buffer per writer id, so threads recording into the
//! same encoder never touch the same buffer.
//!
//! Encoders obtained from [`CommandDrawer::get_encoder`](crate::CommandDrawer::get_encoder)
//! must be consumed exactly once, by [`submit`](CommandEncoder::submit),
//! [`submit_after`](CommandEncoder::submit_after) or
//! [`discard`](CommandEncoder::discard). Dropping one without doing so is a
//! leak: it is reported with `log::warn!` and treated as a discard.
//!
//! The drawing API itself (lines, circles, labels, scoped state) lives in
//! `draw_api.rs`.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytemuck::Pod;
use glam::{Mat4, Vec3};
use parking_lot::{Mutex, RwLock};

use crate::buffer::CommandBuffer;
use crate::color::Color;
use crate::command::{glyph_bytes, LineData, LineWidthData, MatrixData, PersistData, Tag, TAG_SIZE};
use crate::drawer::{DrawerShared, Submission};
use crate::error::DrawResult;
use crate::hash::DrawHash;
use crate::jobs::{DependencyPolicy, JobHandle};
use crate::scope::ScopeId;
use crate::slots::EncoderHandle;
use crate::viewer::ViewerId;

// ---------------------------------------------------------------------------
// Writer ids
// ---------------------------------------------------------------------------

static NEXT_WRITER_ID: AtomicUsize = AtomicUsize::new(0);
static FREE_WRITER_IDS: Mutex<Vec<usize>> = parking_lot::const_mutex(Vec::new());

struct WriterId(usize);

impl WriterId {
    fn acquire() -> Self {
        let id = FREE_WRITER_IDS
            .lock()
            .pop()
            .unwrap_or_else(|| NEXT_WRITER_ID.fetch_add(1, Ordering::Relaxed));
        Self(id)
    }
}

impl Drop for WriterId {
    fn drop(&mut self) {
        FREE_WRITER_IDS.lock().push(self.0);
    }
}

thread_local! {
    static WRITER_ID: WriterId = WriterId::acquire();
}

/// Writer id of the calling thread.
///
/// Ids are small and dense; a thread's id returns to the free list when the
/// thread exits and is handed to the next new thread.
pub fn current_writer_id() -> usize {
    // During thread teardown fall back to writer 0; its buffer is still
    // behind a mutex, so sharing it is safe.
    WRITER_ID.try_with(|id| id.0).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Single-record line: tag and payload written with one copy.
#[repr(C)]
#[derive(Copy, Clone, Pod, bytemuck::Zeroable)]
struct LineRecord {
    tag: u32,
    data: LineData,
}

/// Cache tags attached to the entries an encoder produces.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CacheTag {
    pub hash: Option<DrawHash>,
    pub scope: Option<ScopeId>,
}

/// Records drawing commands for one submission.
///
/// All recording methods take `&self`, so a single encoder can be shared
/// between threads (the drawer's per-frame encoder is).
pub struct CommandEncoder {
    shared: Arc<DrawerShared>,
    handle: EncoderHandle,
    /// Indexed by writer id; a slot holds a buffer once its writer recorded.
    writers: RwLock<Vec<Option<Mutex<CommandBuffer>>>>,
    viewers: Mutex<Option<Vec<ViewerId>>>,
    cache: CacheTag,
    disposed: bool,
}

impl CommandEncoder {
    pub(crate) fn new(shared: Arc<DrawerShared>, handle: EncoderHandle, cache: CacheTag) -> Self {
        Self {
            shared,
            handle,
            writers: RwLock::new(Vec::new()),
            viewers: Mutex::new(None),
            cache,
            disposed: false,
        }
    }

    pub fn handle(&self) -> EncoderHandle {
        self.handle
    }

    /// Restrict the submission to the given viewers. By default every
    /// viewer sees it.
    pub fn with_viewers(&self, viewers: &[ViewerId]) -> &Self {
        *self.viewers.lock() = Some(viewers.to_vec());
        self
    }

    /// Total bytes recorded so far across all writers.
    pub fn bytes_written(&self) -> usize {
        self.writers.read().iter().flatten().map(|w| w.lock().len()).sum()
    }

    /// Drawer clock at the last tick, in seconds.
    pub fn now(&self) -> f64 {
        self.shared.now()
    }

    pub(crate) fn shared(&self) -> &DrawerShared {
        &self.shared
    }

    /// Run `f` on the calling thread's writer buffer.
    #[inline]
    fn with_writer<R>(&self, f: impl FnOnce(&mut CommandBuffer) -> R) -> R {
        let id = current_writer_id();
        {
            let writers = self.writers.read();
            if let Some(Some(writer)) = writers.get(id) {
                return f(&mut writer.lock());
            }
        }
        let mut writers = self.writers.write();
        if writers.len() <= id {
            writers.resize_with(id + 1, || None);
        }
        let writer = writers[id].get_or_insert_with(|| Mutex::new(self.shared.acquire_command_buffer()));
        f(writer.get_mut())
    }

    /// Append a record through the generic path.
    pub fn record<T: Pod>(&self, tag: Tag, payload: &T) {
        debug_assert_eq!(tag.payload_size(), std::mem::size_of::<T>(), "{tag:?}");
        self.with_writer(|buf| {
            buf.reserve(TAG_SIZE + std::mem::size_of::<T>());
            buf.add(&(tag as u32));
            buf.add(payload);
        });
    }

    /// Append a payload-less record (pops).
    pub fn record_tag(&self, tag: Tag) {
        debug_assert_eq!(tag.payload_size(), 0, "{tag:?}");
        self.with_writer(|buf| buf.write_pod(&(tag as u32)));
    }

    /// Append a text record followed by its glyph indices.
    pub(crate) fn record_text<T: Pod>(&self, tag: Tag, payload: &T, glyphs: &[u16]) {
        let glyph_len = glyph_bytes(glyphs.len() as u32);
        self.with_writer(|buf| {
            buf.reserve(TAG_SIZE + std::mem::size_of::<T>() + glyph_len);
            buf.add(&(tag as u32));
            buf.add(payload);
            buf.add_bytes(bytemuck::cast_slice(glyphs));
            if glyphs.len() % 2 == 1 {
                buf.add(&0u16);
            }
        });
    }

    /// Line from `a` to `b` in the current matrix space.
    #[inline]
    pub fn line(&self, a: Vec3, b: Vec3) {
        let record = LineRecord {
            tag: Tag::Line as u32,
            data: LineData { a, b },
        };
        self.with_writer(|buf| buf.write_pod(&record));
    }

    // --- raw scope records -------------------------------------------------

    /// Multiply the current matrix by `matrix` until the matching pop.
    pub fn push_matrix(&self, matrix: Mat4) {
        self.record(Tag::PushMatrix, &MatrixData { matrix });
    }

    /// Replace the current matrix with `matrix` until the matching pop.
    pub fn push_set_matrix(&self, matrix: Mat4) {
        self.record(Tag::PushSetMatrix, &MatrixData { matrix });
    }

    pub fn pop_matrix(&self) {
        self.record_tag(Tag::PopMatrix);
    }

    pub fn push_color(&self, color: Color) {
        self.record(Tag::PushColor, &color);
    }

    pub fn pop_color(&self) {
        self.record_tag(Tag::PopColor);
    }

    pub fn push_line_width(&self, pixels: f32, auto_join: bool) {
        self.record(
            Tag::PushLineWidth,
            &LineWidthData {
                pixels,
                auto_join: auto_join as u32,
            },
        );
    }

    pub fn pop_line_width(&self) {
        self.record_tag(Tag::PopLineWidth);
    }

    /// Open a persistence scope ending `seconds` after the drawer clock.
    pub fn push_duration(&self, seconds: f32) {
        let end_time = self.shared.now() + f64::from(seconds);
        self.record(Tag::PushDuration, &PersistData { end_time });
    }

    pub fn pop_duration(&self) {
        self.record_tag(Tag::PopDuration);
    }

    // --- disposal ----------------------------------------------------------

    fn take_buffers(&mut self) -> Vec<CommandBuffer> {
        std::mem::take(self.writers.get_mut())
            .into_iter()
            .flatten()
            .map(Mutex::into_inner)
            .collect()
    }

    fn into_submission(mut self, dependency: Option<(JobHandle, DependencyPolicy)>) -> (Arc<DrawerShared>, Submission) {
        self.disposed = true;
        let submission = Submission {
            handle: self.handle,
            buffers: self.take_buffers(),
            viewers: self.viewers.get_mut().take(),
            hash: self.cache.hash,
            scope: self.cache.scope,
            dependency,
        };
        (Arc::clone(&self.shared), submission)
    }

    /// Hand the recorded commands to the drawer for splitting.
    ///
    /// Fails with [`DrawError::StaleEncoder`](crate::DrawError::StaleEncoder)
    /// if the drawer was cleared since this encoder was created.
    pub fn submit(self) -> DrawResult<()> {
        let (shared, submission) = self.into_submission(None);
        shared.submit(submission)
    }

    /// Submit once `dependency` completes.
    ///
    /// With [`DependencyPolicy::EndOfFrame`] the drawer waits (bounded) for
    /// the dependency at the next tick; with [`DependencyPolicy::Infinite`]
    /// the submission is held until the dependency resolves.
    pub fn submit_after(self, dependency: JobHandle, policy: DependencyPolicy) -> DrawResult<()> {
        let (shared, submission) = self.into_submission(Some((dependency, policy)));
        shared.submit(submission)
    }

    /// Drop everything recorded and free the encoder slot.
    pub fn discard(mut self) -> DrawResult<()> {
        self.disposed = true;
        let buffers = self.take_buffers();
        self.shared.discard(self.handle, buffers)
    }

    /// Consume without submitting and return the raw writer buffers.
    ///
    /// The encoder slot is freed as with [`discard`](Self::discard). Useful
    /// for feeding the splitter or geometry builder directly.
    pub fn into_buffers(mut self) -> Vec<CommandBuffer> {
        self.disposed = true;
        let buffers = self.take_buffers();
        if let Err(err) = self.shared.discard(self.handle, Vec::new()) {
            log::debug!("into_buffers on {:?}: {}", self.handle, err);
        }
        buffers
    }

    /// Submission of the drawer-owned per-frame encoder.
    pub(crate) fn submit_builtin(self) {
        let handle = self.handle;
        if let Err(err) = self.submit() {
            log::debug!("built-in encoder {:?} not submitted: {}", handle, err);
        }
    }
}

impl Drop for CommandEncoder {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        let buffers = self.take_buffers();
        if !self.handle.is_builtin() {
            let bytes: usize = buffers.iter().map(CommandBuffer::len).sum();
            log::warn!(
                "{:?} dropped without submit() or discard(); discarding {} bytes",
                self.handle,
                bytes
            );
        }
        if let Err(err) = self.shared.discard(self.handle, buffers) {
            log::debug!("dropped encoder {:?}: {}", self.handle, err);
        }
    }
}

impl std::fmt::Debug for CommandEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandEncoder")
            .field("handle", &self.handle)
            .field("bytes", &self.bytes_written())
            .finish()
    }
}

/// Ends a scope when dropped by appending the matching pop record.
///
/// Guards are tied to the thread that opened the scope, since each thread
/// records into its own writer buffer.
#[must_use = "the scope ends as soon as the guard is dropped"]
pub struct ScopeGuard<'a> {
    encoder: &'a CommandEncoder,
    pop: Tag,
    _not_send: PhantomData<*const ()>,
}

impl<'a> ScopeGuard<'a> {
    pub(crate) fn new(encoder: &'a CommandEncoder, pop: Tag) -> Self {
        Self {
            encoder,
            pop,
            _not_send: PhantomData,
        }
    }

    /// The encoder this scope records into.
    pub fn encoder(&self) -> &'a CommandEncoder {
        self.encoder
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.encoder.record_tag(self.pop);
    }
}

impl std::ops::Deref for ScopeGuard<'_> {
    type Target = CommandEncoder;

    fn deref(&self) -> &CommandEncoder {
        self.encoder
    }
}
