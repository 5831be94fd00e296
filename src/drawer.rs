use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use crate::buffer::CommandBuffer;
use crate::command::Category;
use crate::config::DrawConfig;
use crate::encoder::{CacheTag, CommandEncoder};
use crate::error::{DrawError, DrawResult};
use crate::geometry::{GeometryBuffers, GeometryBuilder};
use crate::hash::{DrawHash, DrawHasher};
use crate::jobs::{self, DependencyPolicy, InlineScheduler, JobHandle, JobScheduler, Promise, WorkerPool};
use crate::persist::{filter_persistent, FilterOutcome};
use crate::pool::BufferPool;
use crate::present::{sort_items, PresentItem, PresentationSink, VertexData};
use crate::scope::{RedrawScope, ScopeId};
use crate::slots::{EncoderHandle, EncoderSlots};
use crate::splitter::split_streams;
use crate::store::{BuiltGeometry, EntryCommands, GeometryState, ProcessedEntry, ProcessedStore};
use crate::text::GlyphTable;
use crate::viewer::{Viewer, ViewerId};

/// Added to the per-epoch submission index of persistent entries so they
/// composite after every static and dynamic entry.
pub const PERSISTENT_DRAW_ORDER_OFFSET: u64 = 1 << 40;

/// Everything an encoder hands over on submit.
pub(crate) struct Submission {
    pub handle: EncoderHandle,
    pub buffers: Vec<CommandBuffer>,
    pub viewers: Option<Vec<ViewerId>>,
    pub hash: Option<DrawHash>,
    pub scope: Option<ScopeId>,
    pub dependency: Option<(JobHandle, DependencyPolicy)>,
}

/// A split job whose encoder slot is released once it completed.
struct InFlightSplit {
    handle: EncoderHandle,
    /// Writer buffers handed back by the job for reuse.
    inputs: Promise<Vec<CommandBuffer>>,
}

/// Manager state. Only touched by orchestration calls, never by jobs.
struct DrawerState {
    epoch: u64,
    generation: u64,
    /// Submissions so far in this epoch; source of draw orders.
    submissions: u64,
    slots: EncoderSlots,
    store: ProcessedStore,
    command_pool: BufferPool<CommandBuffer>,
    geometry_pool: BufferPool<GeometryBuffers>,
    end_of_frame: Vec<JobHandle>,
    deferred: Vec<Submission>,
    in_flight: Vec<InFlightSplit>,
    /// Last epoch each viewer rendered in.
    viewers: HashMap<ViewerId, u64>,
    live_scopes: HashSet<ScopeId>,
}

impl DrawerState {
    fn new() -> Self {
        Self {
            epoch: 0,
            generation: 0,
            submissions: 0,
            slots: EncoderSlots::new(),
            store: ProcessedStore::new(),
            command_pool: BufferPool::new(),
            geometry_pool: BufferPool::new(),
            end_of_frame: Vec::new(),
            deferred: Vec::new(),
            in_flight: Vec::new(),
            viewers: HashMap::new(),
            live_scopes: HashSet::new(),
        }
    }

    fn recycle_command_buffer(&mut self, buffer: Arc<CommandBuffer>) {
        if let Ok(buffer) = Arc::try_unwrap(buffer) {
            if buffer.capacity() > 0 {
                self.command_pool.release(buffer, self.epoch);
            }
        }
    }

    /// Return an entry's buffers to the pools.
    fn release_entry(&mut self, entry: ProcessedEntry) {
        let commands = match entry.commands {
            EntryCommands::Ready(buffer) => Some(buffer),
            EntryCommands::Pending(promise) => promise.take(),
        };
        if let Some(buffer) = commands {
            self.recycle_command_buffer(buffer);
        }
        for built in entry.built {
            if let Some(geometry) = built.state.into_ready() {
                self.geometry_pool.release(geometry, self.epoch);
            }
        }
    }

    /// Drop the catch-up state, presentation marks and per-viewer geometry
    /// of `viewers`.
    fn forget_viewers(&mut self, viewers: &[ViewerId]) {
        let epoch = self.epoch;
        for viewer in viewers {
            self.viewers.remove(viewer);
        }
        for (_, entry) in self.store.iter_mut() {
            entry.presented.retain(|viewer, _| !viewers.contains(viewer));
            let mut i = 0;
            while i < entry.built.len() {
                if entry.built[i].viewer.is_some_and(|viewer| viewers.contains(&viewer)) {
                    let built = entry.built.swap_remove(i);
                    if let Some(geometry) = built.state.into_ready() {
                        self.geometry_pool.release(geometry, epoch);
                    }
                } else {
                    i += 1;
                }
            }
        }
    }

    /// Start of the catch-up range of `viewer`.
    fn catch_up_start(&self, viewer: ViewerId) -> u64 {
        let floor = self.epoch.saturating_sub(1);
        self.viewers
            .get(&viewer)
            .map_or(floor, |&last_seen| last_seen.max(floor))
    }
}

/// Whether `entry` should be shown to `viewer` this render.
fn eligible(entry: &ProcessedEntry, viewer: ViewerId, from: u64, current: u64, generation: u64) -> bool {
    entry.generation == generation
        && (from..=current).contains(&entry.version)
        && entry.visible_to(viewer)
        && (entry.version == current || entry.presented.get(&viewer) != Some(&entry.version))
}

/// Key of the geometry an entry needs for `viewer`. Static geometry is
/// shared.
fn geometry_key(category: Category, viewer: ViewerId) -> Option<ViewerId> {
    match category {
        Category::Static => None,
        Category::Dynamic | Category::Persistent => Some(viewer),
    }
}

/// State shared with encoders and redraw scopes.
pub(crate) struct DrawerShared {
    config: Arc<DrawConfig>,
    glyphs: RwLock<Arc<GlyphTable>>,
    scheduler: Arc<dyn JobScheduler>,
    /// Drawer time in seconds, as `f64` bits. Written once per tick.
    clock: AtomicU64,
    state: Mutex<DrawerState>,
}

impl DrawerShared {
    pub fn now(&self) -> f64 {
        f64::from_bits(self.clock.load(Ordering::Acquire))
    }

    pub fn glyphs(&self) -> Arc<GlyphTable> {
        Arc::clone(&self.glyphs.read())
    }

    pub fn acquire_command_buffer(&self) -> CommandBuffer {
        let mut state = self.state.lock();
        let epoch = state.epoch;
        state
            .command_pool
            .acquire(self.config.initial_buffer_capacity, epoch)
            .with_ceiling(self.config.max_buffer_bytes)
    }

    pub fn end_scope(&self, scope: ScopeId) {
        self.state.lock().live_scopes.remove(&scope);
    }

    pub fn discard(&self, handle: EncoderHandle, buffers: Vec<CommandBuffer>) -> DrawResult<()> {
        let mut state = self.state.lock();
        let epoch = state.epoch;
        for buffer in buffers {
            state.command_pool.release(buffer, epoch);
        }
        state.slots.check_open(handle)?;
        state.slots.release(handle)
    }

    pub fn submit(&self, submission: Submission) -> DrawResult<()> {
        let mut state = self.state.lock();
        let handle = submission.handle;
        if let Err(err) = state.slots.check_open(handle) {
            let epoch = state.epoch;
            for buffer in submission.buffers {
                state.command_pool.release(buffer, epoch);
            }
            return Err(err);
        }

        if submission.buffers.iter().all(CommandBuffer::is_empty) {
            let epoch = state.epoch;
            for buffer in submission.buffers {
                state.command_pool.release(buffer, epoch);
            }
            return state.slots.release(handle);
        }

        state.slots.mark_submitted(handle)?;
        let dependency = submission
            .dependency
            .as_ref()
            .map(|(dependency, policy)| (dependency.clone(), *policy));
        match dependency {
            Some((dependency, DependencyPolicy::Infinite)) if !dependency.is_complete() => {
                log::trace!("{:?} held until its dependency completes", handle);
                state.deferred.push(submission);
                return Ok(());
            }
            Some((dependency, DependencyPolicy::EndOfFrame)) => {
                state.end_of_frame.push(dependency);
            }
            _ => {}
        }
        self.schedule_split(&mut state, submission);
        Ok(())
    }

    /// Schedule the split job of `submission` and reserve its three entries.
    fn schedule_split(&self, state: &mut DrawerState, submission: Submission) {
        let Submission {
            handle,
            buffers,
            viewers,
            hash,
            scope,
            dependency,
        } = submission;
        let epoch = state.epoch;
        let outputs: [CommandBuffer; 3] = std::array::from_fn(|_| {
            state
                .command_pool
                .acquire(self.config.initial_buffer_capacity, epoch)
                .with_ceiling(self.config.max_buffer_bytes)
        });
        let output_slots: [Arc<Mutex<Option<Arc<CommandBuffer>>>>; 3] = Default::default();
        let input_slot = Arc::new(Mutex::new(None));

        let job_outputs = output_slots.clone();
        let job_inputs = Arc::clone(&input_slot);
        let max_depth = self.config.max_stack_depth;
        let dependencies: Vec<JobHandle> = dependency.into_iter().map(|(dep, _)| dep).collect();
        let bytes: usize = buffers.iter().map(CommandBuffer::len).sum();
        log::trace!("{:?} submitted: {} writer(s), {} bytes", handle, buffers.len(), bytes);

        let done = self.scheduler.schedule(
            &dependencies,
            Box::new(move || {
                let mut outputs = outputs;
                if let Err(err) = split_streams(buffers.iter().map(CommandBuffer::as_bytes), &mut outputs, max_depth) {
                    log::warn!("dropping submission of {:?}: {}", handle, err);
                }
                for (slot, output) in job_outputs.iter().zip(outputs) {
                    *slot.lock() = Some(Arc::new(output));
                }
                *job_inputs.lock() = Some(buffers);
            }),
        );

        let n = state.submissions;
        state.submissions += 1;
        let viewers: Option<Arc<[ViewerId]>> = viewers.map(Arc::from);
        for category in Category::ALL {
            let draw_order = match category {
                Category::Static => 3 * n,
                Category::Dynamic => 3 * n + 1,
                Category::Persistent => PERSISTENT_DRAW_ORDER_OFFSET + n,
            };
            let commands = Promise::from_parts(done.clone(), Arc::clone(&output_slots[category.index()]));
            state.store.insert(ProcessedEntry {
                category,
                hash,
                frame_scope: epoch,
                custom_scope: scope,
                version: epoch,
                viewers: viewers.clone(),
                draw_order,
                generation: state.generation,
                commands: EntryCommands::Pending(commands),
                revision: 0,
                built: Vec::new(),
                presented: HashMap::new(),
            });
        }
        state.in_flight.push(InFlightSplit {
            handle,
            inputs: Promise::from_parts(done, input_slot),
        });
    }
}

/// Aggregate counters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawerStats {
    pub epoch: u64,
    pub generation: u64,
    /// Encoder slots that are recording or waiting on their split job.
    pub live_encoders: usize,
    pub live_entries: usize,
    pub pooled_command_buffers: usize,
    pub pooled_geometry_buffers: usize,
    pub live_redraw_scopes: usize,
    /// Submissions held back by an unresolved `Infinite` dependency.
    pub pending_submissions: usize,
    /// Viewers with catch-up state.
    pub tracked_viewers: usize,
}

/// Deferred drawing-command manager.
///
/// Encoders record commands during a tick; [`advance_tick`](Self::advance_tick)
/// closes the tick, splits and filters what was submitted and collects
/// garbage; [`render_viewer`](Self::render_viewer) builds and presents the
/// geometry of the previous tick for one viewer.
///
/// # Example
///
/// ```
/// use glam::Vec3;
/// use redlilium_draw_commands::{
///     Color, CommandDrawer, CountingSink, DrawConfig, Viewer, ViewerId,
/// };
///
/// let drawer = CommandDrawer::new(DrawConfig::default().with_worker_threads(0));
/// {
///     let encoder = drawer.frame_encoder();
///     let _red = encoder.with_color(Color::RED);
///     encoder.line(Vec3::ZERO, Vec3::X);
/// }
/// drawer.advance_tick(1.0 / 60.0).unwrap();
///
/// let viewer = Viewer::looking_at(ViewerId(1), Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, 1.0, 720.0);
/// let mut sink = CountingSink::default();
/// drawer.render_viewer(&viewer, &mut sink).unwrap();
/// assert_eq!(sink.meshes, 1);
/// ```
pub struct CommandDrawer {
    shared: Arc<DrawerShared>,
    frame_encoder: RwLock<CommandEncoder>,
}

impl CommandDrawer {
    /// Create a drawer with its own scheduler: a [`WorkerPool`] with
    /// `config.worker_threads` threads, or an [`InlineScheduler`] if that is 0.
    pub fn new(config: DrawConfig) -> Self {
        let scheduler: Arc<dyn JobScheduler> = if config.worker_threads == 0 {
            Arc::new(InlineScheduler::new())
        } else {
            Arc::new(WorkerPool::new(config.worker_threads))
        };
        Self::with_scheduler(config, scheduler)
    }

    /// Create a drawer running its jobs on `scheduler`.
    pub fn with_scheduler(config: DrawConfig, scheduler: Arc<dyn JobScheduler>) -> Self {
        let shared = Arc::new(DrawerShared {
            config: Arc::new(config),
            glyphs: RwLock::new(Arc::new(GlyphTable::monospace_ascii())),
            scheduler,
            clock: AtomicU64::new(0f64.to_bits()),
            state: Mutex::new(DrawerState::new()),
        });
        let frame_encoder = Self::builtin_encoder(&shared);
        Self {
            shared,
            frame_encoder: RwLock::new(frame_encoder),
        }
    }

    fn builtin_encoder(shared: &Arc<DrawerShared>) -> CommandEncoder {
        let handle = shared.state.lock().slots.reserve(true);
        CommandEncoder::new(Arc::clone(shared), handle, CacheTag::default())
    }

    pub fn config(&self) -> &DrawConfig {
        &self.shared.config
    }

    /// Replace the glyph table used for labels.
    pub fn set_glyph_table(&self, glyphs: GlyphTable) {
        *self.shared.glyphs.write() = Arc::new(glyphs);
    }

    pub fn glyph_table(&self) -> Arc<GlyphTable> {
        self.shared.glyphs()
    }

    /// Drawer clock at the last tick, in seconds.
    pub fn now(&self) -> f64 {
        self.shared.now()
    }

    pub fn epoch(&self) -> u64 {
        self.shared.state.lock().epoch
    }

    pub fn generation(&self) -> u64 {
        self.shared.state.lock().generation
    }

    /// Switch generation. Persistent entries of other generations are
    /// dropped at the next tick and cached entries stop matching.
    pub fn set_generation(&self, generation: u64) {
        self.shared.state.lock().generation = generation;
    }

    /// The drawer-owned encoder of the current tick. Submitted
    /// automatically by [`advance_tick`](Self::advance_tick).
    ///
    /// Do not hold the guard across `advance_tick` or `clear`.
    pub fn frame_encoder(&self) -> RwLockReadGuard<'_, CommandEncoder> {
        self.frame_encoder.read()
    }

    /// A fresh encoder. Must be consumed with `submit`, `submit_after` or
    /// `discard`.
    pub fn get_encoder(&self) -> CommandEncoder {
        let handle = self.shared.state.lock().slots.reserve(false);
        CommandEncoder::new(Arc::clone(&self.shared), handle, CacheTag::default())
    }

    /// A fresh encoder whose entries are cached under `hash`.
    ///
    /// Entries previously cached under `hash` are released first. With a
    /// `scope`, the entries live until the scope is disposed instead of
    /// expiring by age.
    pub fn get_encoder_for(&self, hash: DrawHash, scope: Option<&RedrawScope>) -> CommandEncoder {
        let handle = {
            let mut state = self.shared.state.lock();
            let stale: Vec<usize> = state.store.lookup(hash).to_vec();
            for index in stale {
                if let Ok(entry) = state.store.remove(index) {
                    state.release_entry(entry);
                }
            }
            state.slots.reserve(false)
        };
        let cache = CacheTag {
            hash: Some(hash),
            scope: scope.map(RedrawScope::id),
        };
        CommandEncoder::new(Arc::clone(&self.shared), handle, cache)
    }

    /// Redraw the entries cached under `hash` this tick.
    ///
    /// Succeeds if they were drawn in this or the previous epoch (and belong
    /// to the current generation); their version is refreshed so they are
    /// presented again. Returns `false` if the caller has to encode anew.
    pub fn try_draw(&self, hash: DrawHash, scope: Option<&RedrawScope>) -> bool {
        let mut state = self.shared.state.lock();
        let state = &mut *state;
        let epoch = state.epoch;
        let generation = state.generation;
        let indices = state.store.lookup(hash).to_vec();
        let reusable = !indices.is_empty()
            && indices.iter().all(|&index| {
                state.store.get(index).is_some_and(|entry| {
                    entry.generation == generation && entry.version + 1 >= epoch
                })
            });
        if !reusable {
            return false;
        }
        for index in indices {
            if let Some(entry) = state.store.get_mut(index) {
                entry.version = epoch;
                if let Some(scope) = scope {
                    entry.custom_scope = Some(scope.id());
                }
            }
        }
        true
    }

    /// Start a content hash for the cache API.
    pub fn hash_begin(&self) -> DrawHasher {
        DrawHasher::new()
    }

    /// A new redraw scope tied to this drawer.
    pub fn redraw_scope(&self) -> RedrawScope {
        let (scope, id) = RedrawScope::new(Arc::downgrade(&self.shared));
        self.shared.state.lock().live_scopes.insert(id);
        scope
    }

    /// Free an open encoder slot by handle.
    ///
    /// Fails with [`DrawError::BuiltinEncoder`] for the drawer's own encoder
    /// and [`DrawError::StaleEncoder`] for handles no longer open.
    pub fn release_encoder(&self, handle: EncoderHandle) -> DrawResult<()> {
        self.shared.state.lock().slots.release_by_user(handle)
    }

    /// Close the current tick at drawer time `time` (seconds).
    ///
    /// Fails with [`DrawError::BlockingOnWorker`] on a worker thread, before
    /// anything changed.
    pub fn advance_tick(&self, time: f64) -> DrawResult<()> {
        let scheduler = &self.shared.scheduler;
        if scheduler.is_worker_thread() {
            return Err(DrawError::BlockingOnWorker);
        }
        self.shared.clock.store(time.to_bits(), Ordering::Release);

        // The frame encoder of the closing tick is submitted like any other.
        let fresh = Self::builtin_encoder(&self.shared);
        let previous = std::mem::replace(&mut *self.frame_encoder.write(), fresh);
        previous.submit_builtin();

        scheduler.flush();
        let end_of_frame = std::mem::take(&mut self.shared.state.lock().end_of_frame);
        let deadline = Instant::now() + self.shared.config.end_of_frame_timeout;
        for dependency in end_of_frame {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match dependency.wait_timeout(remaining) {
                Ok(()) => {}
                Err(err) => {
                    log::warn!(
                        "end-of-frame dependency still pending after {:?} ({}); its submission arrives late",
                        self.shared.config.end_of_frame_timeout,
                        err
                    );
                    break;
                }
            }
        }
        scheduler.flush();

        let mut state = self.shared.state.lock();
        let state = &mut *state;

        // Deferred submissions whose dependency resolved.
        let deferred = std::mem::take(&mut state.deferred);
        for submission in deferred {
            let ready = submission
                .dependency
                .as_ref()
                .map_or(true, |(dependency, _)| dependency.is_complete());
            if ready {
                self.shared.schedule_split(state, submission);
            } else {
                state.deferred.push(submission);
            }
        }

        self.schedule_filters(state, time);
        self.release_finished_splits(state);

        state.epoch += 1;
        state.submissions = 0;
        let epoch = state.epoch;
        for (_, entry) in state.store.iter_mut() {
            let scoped = entry
                .custom_scope
                .is_some_and(|scope| state.live_scopes.contains(&scope));
            if entry.category == Category::Persistent || scoped {
                entry.version = epoch;
            }
        }

        let released = self.collect_garbage(state);
        let trimmed_commands = state.command_pool.trim(epoch, self.shared.config.pool_trim_epochs);
        let trimmed_geometry = state.geometry_pool.trim(epoch, self.shared.config.pool_trim_epochs);
        log::debug!(
            "tick {}: released {} entries, {} live, pools {}/{} (trimmed: {}/{})",
            epoch,
            released,
            state.store.len(),
            state.command_pool.len(),
            state.geometry_pool.len(),
            trimmed_commands,
            trimmed_geometry
        );
        Ok(())
    }

    /// Filter persistent entries that were not submitted in this epoch.
    fn schedule_filters(&self, state: &mut DrawerState, now: f64) {
        let epoch = state.epoch;
        let generation = state.generation;
        let max_depth = self.shared.config.max_stack_depth;
        let scheduler = self.shared.scheduler.as_ref();
        for (_, entry) in state.store.iter_mut() {
            if entry.category != Category::Persistent || entry.frame_scope == epoch {
                continue;
            }
            let source = std::mem::replace(&mut entry.commands, EntryCommands::Ready(Arc::default()));
            let dependencies: Vec<JobHandle> = source
                .promise()
                .map(|promise| promise.handle().clone())
                .into_iter()
                .collect();
            let entry_generation = entry.generation;
            let filtered = jobs::spawn(scheduler, &dependencies, move || {
                let shared = match source {
                    EntryCommands::Ready(buffer) => buffer,
                    EntryCommands::Pending(promise) => promise.get_cloned().unwrap_or_default(),
                };
                let mut buffer = Arc::try_unwrap(shared).unwrap_or_else(|shared| (*shared).clone());
                match filter_persistent(&mut buffer, now, generation, entry_generation, max_depth) {
                    Ok(FilterOutcome::Alive) | Ok(FilterOutcome::Dead) => {}
                    Err(err) => log::warn!("dropping malformed persistent stream: {}", err),
                }
                Arc::new(buffer)
            });
            entry.commands = EntryCommands::Pending(filtered);
            entry.revision += 1;
        }
    }

    /// Release encoder slots whose split job completed and pool their
    /// writer buffers.
    fn release_finished_splits(&self, state: &mut DrawerState) {
        let epoch = state.epoch;
        let in_flight = std::mem::take(&mut state.in_flight);
        for split in in_flight {
            if !split.inputs.is_complete() {
                state.in_flight.push(split);
                continue;
            }
            if let Err(err) = state.slots.release(split.handle) {
                log::debug!("split of {:?} finished after clear: {}", split.handle, err);
            }
            for buffer in split.inputs.take().unwrap_or_default() {
                state.command_pool.release(buffer, epoch);
            }
        }
    }

    /// Release entries that are too old, whose scope ended, or that are
    /// empty, and forget idle viewers. Returns how many entries were
    /// released.
    fn collect_garbage(&self, state: &mut DrawerState) -> usize {
        let epoch = state.epoch;
        let slack = self.shared.config.gc_epoch_slack;
        let mut released = 0;
        for index in state.store.indices() {
            let Some(entry) = state.store.get_mut(index) else {
                continue;
            };
            let expired = epoch.saturating_sub(entry.version) > slack;
            let scope_ended = entry
                .custom_scope
                .is_some_and(|scope| !state.live_scopes.contains(&scope));
            if !(expired || scope_ended || entry.is_dead()) {
                continue;
            }
            match state.store.remove(index) {
                Ok(entry) => {
                    state.release_entry(entry);
                    released += 1;
                }
                Err(err) => log::debug!("gc: {}", err),
            }
        }

        let idle: Vec<ViewerId> = state
            .viewers
            .iter()
            .filter(|(_, &last_seen)| epoch.saturating_sub(last_seen) > slack)
            .map(|(&viewer, _)| viewer)
            .collect();
        if !idle.is_empty() {
            log::debug!("forgetting {} idle viewers", idle.len());
            state.forget_viewers(&idle);
        }
        released
    }

    /// Schedule geometry builds for everything `viewer` will be shown.
    ///
    /// Returns the handles of builds that have not completed yet.
    pub fn prepare_viewer(&self, viewer: &Viewer) -> Vec<JobHandle> {
        let glyphs = self.shared.glyphs();
        let mut state = self.shared.state.lock();
        let state = &mut *state;
        let current = state.epoch;
        let generation = state.generation;
        let from = state.catch_up_start(viewer.id);
        let scheduler = self.shared.scheduler.as_ref();
        let mut pending = Vec::new();

        for (_, entry) in state.store.iter_mut() {
            if !eligible(entry, viewer.id, from, current, generation) {
                continue;
            }
            let key = geometry_key(entry.category, viewer.id);
            let revision = entry.revision;

            // Drop outdated builds: older revisions, and per-viewer builds of
            // earlier epochs.
            let mut i = 0;
            while i < entry.built.len() {
                let built = &entry.built[i];
                let outdated =
                    built.revision != revision || (built.viewer.is_some() && built.epoch != current);
                if outdated {
                    let built = entry.built.swap_remove(i);
                    if let Some(geometry) = built.state.into_ready() {
                        state.geometry_pool.release(geometry, current);
                    }
                } else {
                    i += 1;
                }
            }

            if let Some(built) = entry.built.iter().find(|b| b.viewer == key) {
                if let GeometryState::Pending(promise) = &built.state {
                    if !promise.is_complete() {
                        pending.push(promise.handle().clone());
                    }
                }
                continue;
            }

            let source = entry.commands.clone();
            let dependencies: Vec<JobHandle> = source
                .promise()
                .map(|promise| promise.handle().clone())
                .into_iter()
                .collect();
            let config = Arc::clone(&self.shared.config);
            let glyphs = Arc::clone(&glyphs);
            let build_viewer = if key.is_some() { *viewer } else { Viewer::default() };
            let mut out = state.geometry_pool.acquire(0, current);
            let built = jobs::spawn(scheduler, &dependencies, move || {
                let stream = match source {
                    EntryCommands::Ready(buffer) => buffer,
                    EntryCommands::Pending(promise) => promise.get_cloned().unwrap_or_default(),
                };
                GeometryBuilder::new(&config, &glyphs, &build_viewer).build_or_clear(stream.as_bytes(), &mut out);
                out
            });
            if !built.is_complete() {
                pending.push(built.handle().clone());
            }
            entry.built.push(BuiltGeometry {
                viewer: key,
                epoch: current,
                revision,
                state: GeometryState::Pending(built),
            });
        }
        pending
    }

    /// Build (if needed) and present the geometry eligible for `viewer`.
    ///
    /// Waits for outstanding builds up to `end_of_frame_timeout`; what is
    /// still pending after that is skipped. The sink is called with the
    /// drawer locked and must not call back into it.
    pub fn render_viewer(&self, viewer: &Viewer, sink: &mut dyn PresentationSink) -> DrawResult<()> {
        let pending = self.prepare_viewer(viewer);
        self.shared.scheduler.flush();
        let deadline = Instant::now() + self.shared.config.end_of_frame_timeout;
        for handle in &pending {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match handle.wait_timeout(remaining) {
                Ok(()) => {}
                Err(DrawError::JobTimeout(_)) => {
                    log::warn!("{:?}: geometry not ready in time, presenting partial frame", viewer.id);
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        let mut state = self.shared.state.lock();
        let state = &mut *state;
        let current = state.epoch;
        let generation = state.generation;
        let from = state.catch_up_start(viewer.id);

        let mut visible = Vec::new();
        for (index, entry) in state.store.iter_mut() {
            if !eligible(entry, viewer.id, from, current, generation) {
                continue;
            }
            let key = geometry_key(entry.category, viewer.id);
            let revision = entry.revision;
            let Some(slot) = entry.built.iter().position(|b| {
                b.viewer == key && b.revision == revision && (key.is_none() || b.epoch == current)
            }) else {
                continue;
            };
            if entry.built[slot].state.resolve().is_some() {
                entry.presented.insert(viewer.id, entry.version);
                visible.push((index, slot));
            }
        }

        let mut items = Vec::new();
        for &(index, slot) in &visible {
            let Some(entry) = state.store.get(index) else {
                continue;
            };
            if let GeometryState::Ready(geometry) = &entry.built[slot].state {
                push_items(&mut items, geometry, entry.category, entry.draw_order);
            }
        }
        sort_items(&mut items);
        sink.present(viewer.id, &items);
        drop(items);

        state.viewers.insert(viewer.id, current);
        Ok(())
    }

    /// Forget a viewer's catch-up state and its per-viewer geometry.
    ///
    /// Viewers that do not render for more than `gc_epoch_slack` epochs are
    /// forgotten by the tick.
    pub fn forget_viewer(&self, viewer: ViewerId) {
        self.shared.state.lock().forget_viewers(&[viewer]);
    }

    /// Drop all entries and pending submissions. Outstanding encoder
    /// handles go stale.
    pub fn clear(&self) {
        {
            let mut state = self.shared.state.lock();
            state.slots.clear();
            state.deferred.clear();
            state.end_of_frame.clear();
            for entry in state.store.drain() {
                state.release_entry(entry);
            }
        }
        let fresh = Self::builtin_encoder(&self.shared);
        let previous = std::mem::replace(&mut *self.frame_encoder.write(), fresh);
        drop(previous);
        log::debug!("draw commands cleared");
    }

    pub fn stats(&self) -> DrawerStats {
        let state = self.shared.state.lock();
        DrawerStats {
            epoch: state.epoch,
            generation: state.generation,
            live_encoders: state.slots.live_count(),
            live_entries: state.store.len(),
            pooled_command_buffers: state.command_pool.len(),
            pooled_geometry_buffers: state.geometry_pool.len(),
            live_redraw_scopes: state.live_scopes.len(),
            pending_submissions: state.deferred.len(),
            tracked_viewers: state.viewers.len(),
        }
    }
}

impl Default for CommandDrawer {
    fn default() -> Self {
        Self::new(DrawConfig::default())
    }
}

impl std::fmt::Debug for CommandDrawer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDrawer").field("stats", &self.stats()).finish()
    }
}

/// Flatten one entry's geometry into presentation items.
fn push_items<'a>(items: &mut Vec<PresentItem<'a>>, geometry: &'a GeometryBuffers, category: Category, draw_order: u64) {
    let bounds = geometry.bounds;
    if !geometry.lines.is_empty() {
        items.push(PresentItem::Mesh {
            vertices: VertexData::Lines(&geometry.lines.vertices),
            indices: &geometry.lines.indices,
            bounds,
            draw_order,
        });
    }
    if !geometry.solids.is_empty() {
        items.push(PresentItem::Mesh {
            vertices: VertexData::Solids(&geometry.solids.vertices),
            indices: &geometry.solids.indices,
            bounds,
            draw_order,
        });
    }
    if !geometry.text.is_empty() {
        items.push(PresentItem::Mesh {
            vertices: VertexData::Text(&geometry.text.vertices),
            indices: &geometry.text.indices,
            bounds,
            draw_order,
        });
    }
    // Captured meshes of a dynamic entry slot in right after it.
    let captured_order = match category {
        Category::Dynamic => draw_order + 1,
        Category::Static | Category::Persistent => draw_order,
    };
    for mesh in &geometry.captured {
        items.push(PresentItem::Captured {
            mesh: *mesh,
            draw_order: captured_order,
        });
    }
}
