//! End-to-end tests of the draw command pipeline.
//!
//! Streams are recorded through real encoders, then driven through the
//! splitter, the persistence filter and the geometry builder, either
//! directly or by ticking an inline [`CommandDrawer`].
//!
//! # Test Categories
//!
//! - **Round trip**: every drawing operation survives split + build
//! - **Splitter**: balanced outputs, scope mirroring and elision
//! - **Tessellation**: segment counts follow screen size
//! - **Persistence**: duration scopes expire on the drawer clock
//! - **Lifecycle**: cache reuse, epoch garbage collection, pools

use glam::{Mat4, Quat, Vec2, Vec3};
use rstest::rstest;

use redlilium_draw_commands::geometry::{
    circle_steps, GeometryBuffers, GeometryBuilder, PrimitiveCounts, MIN_CIRCLE_STEPS,
};
use redlilium_draw_commands::{
    filter_persistent, split_streams, Category, Color, CommandBuffer, CommandDrawer,
    CommandEncoder, CountingSink, DrawConfig, FilterOutcome, GlyphTable, LabelAlignment,
    RecordReader, Tag, Viewer, ViewerId,
};

// ============================================================================
// Helpers
// ============================================================================

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn inline_drawer() -> CommandDrawer {
    init_logging();
    CommandDrawer::new(DrawConfig::default().with_worker_threads(0))
}

fn camera() -> Viewer {
    Viewer::looking_at(ViewerId(7), Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, 1.0, 1080.0)
}

/// Record with `draw` and return the writer buffers without submitting.
fn record(drawer: &CommandDrawer, draw: impl FnOnce(&CommandEncoder)) -> Vec<CommandBuffer> {
    let encoder = drawer.get_encoder();
    draw(&encoder);
    encoder.into_buffers()
}

fn split(buffers: &[CommandBuffer]) -> [CommandBuffer; 3] {
    let mut outputs: [CommandBuffer; 3] = Default::default();
    split_streams(buffers.iter().map(CommandBuffer::as_bytes), &mut outputs, 32)
        .expect("well-formed submission");
    outputs
}

fn build(stream: &CommandBuffer) -> GeometryBuffers {
    let config = DrawConfig::default();
    let glyphs = GlyphTable::monospace_ascii();
    let viewer = camera();
    let mut out = GeometryBuffers::new();
    GeometryBuilder::new(&config, &glyphs, &viewer)
        .build(stream.as_bytes(), &mut out)
        .expect("balanced stream");
    out
}

fn tags(stream: &CommandBuffer) -> Vec<Tag> {
    RecordReader::new(stream.as_bytes())
        .map(|r| r.expect("valid record").tag)
        .collect()
}

/// Decode every record and check the reader ends exactly at the end.
fn assert_fully_consumed(stream: &CommandBuffer) {
    let mut reader = RecordReader::new(stream.as_bytes());
    for record in reader.by_ref() {
        record.expect("valid record");
    }
    assert_eq!(reader.offset(), stream.len());
}

fn counts(lines: u32, solids: u32, text: u32, captured: u32) -> PrimitiveCounts {
    PrimitiveCounts {
        lines,
        solids,
        text,
        captured,
    }
}

// ============================================================================
// Round trip
// ============================================================================

#[rstest]
#[case::line(Category::Static, counts(1, 0, 0, 0), |e: &CommandEncoder| e.line(Vec3::ZERO, Vec3::X))]
#[case::wire_box(Category::Static, counts(1, 0, 0, 0), |e: &CommandEncoder| e.wire_box(Vec3::ZERO, Vec3::ONE))]
#[case::solid_box(Category::Static, counts(0, 1, 0, 0), |e: &CommandEncoder| e.solid_box(Vec3::ZERO, Vec3::ONE))]
#[case::wire_plane(Category::Static, counts(1, 0, 0, 0), |e: &CommandEncoder| e.wire_plane(Vec3::ZERO, Quat::IDENTITY, Vec2::ONE))]
#[case::solid_plane(Category::Static, counts(0, 1, 0, 0), |e: &CommandEncoder| e.solid_plane(Vec3::ZERO, Quat::IDENTITY, Vec2::ONE))]
#[case::wire_triangle(Category::Static, counts(1, 0, 0, 0), |e: &CommandEncoder| e.wire_triangle(Vec3::ZERO, Vec3::X, Vec3::Y))]
#[case::solid_triangle(Category::Static, counts(0, 1, 0, 0), |e: &CommandEncoder| e.solid_triangle(Vec3::ZERO, Vec3::X, Vec3::Y))]
#[case::circle(Category::Dynamic, counts(1, 0, 0, 0), |e: &CommandEncoder| e.circle(Vec3::ZERO, Vec3::Z, 1.0))]
#[case::arc(Category::Dynamic, counts(1, 0, 0, 0), |e: &CommandEncoder| e.arc(Vec3::ZERO, Vec3::Z, 1.0, 0.0, 1.0))]
#[case::circle_xz(Category::Dynamic, counts(1, 0, 0, 0), |e: &CommandEncoder| e.circle_xz(Vec3::ZERO, 1.0))]
#[case::disc(Category::Dynamic, counts(0, 1, 0, 0), |e: &CommandEncoder| e.disc(Vec3::ZERO, Vec3::Z, 1.0))]
#[case::disc_xz(Category::Dynamic, counts(0, 1, 0, 0), |e: &CommandEncoder| e.disc_xz(Vec3::ZERO, 1.0))]
#[case::sphere(Category::Dynamic, counts(1, 0, 0, 0), |e: &CommandEncoder| e.sphere_outline(Vec3::ZERO, 1.0))]
#[case::capture(Category::Dynamic, counts(0, 0, 0, 1), |e: &CommandEncoder| e.mesh_capture(3))]
#[case::label_2d(Category::Dynamic, counts(0, 0, 1, 0), |e: &CommandEncoder| e.label_2d(Vec3::ZERO, "hi", 16.0, LabelAlignment::CENTER))]
#[case::label_3d(Category::Dynamic, counts(0, 0, 1, 0), |e: &CommandEncoder| e.label_3d(Vec3::ZERO, Quat::IDENTITY, "hi", 0.5, LabelAlignment::CENTER))]
fn test_record_round_trip(
    #[case] category: Category,
    #[case] expected: PrimitiveCounts,
    #[case] draw: fn(&CommandEncoder),
) {
    let drawer = inline_drawer();
    let outputs = split(&record(&drawer, draw));

    for other in Category::ALL {
        if other != category {
            assert!(outputs[other.index()].is_empty(), "{:?} leaked into {:?}", category, other);
        }
    }
    let stream = &outputs[category.index()];
    assert_eq!(tags(stream).len(), 1);
    assert_fully_consumed(stream);
    assert_eq!(build(stream).primitives, expected);
}

// ============================================================================
// Splitter
// ============================================================================

#[rstest]
#[case::static_in_color(|e: &CommandEncoder| {
    let _c = e.with_color(Color::RED);
    e.line(Vec3::ZERO, Vec3::X);
}, [true, false, false])]
#[case::dynamic_in_matrix(|e: &CommandEncoder| {
    let _m = e.with_matrix(Mat4::from_translation(Vec3::Y));
    e.circle_xz(Vec3::ZERO, 1.0);
}, [false, true, false])]
#[case::mixed_nested(|e: &CommandEncoder| {
    let _m = e.with_matrix(Mat4::from_scale(Vec3::splat(2.0)));
    let _w = e.with_line_width(3.0, true);
    e.line(Vec3::ZERO, Vec3::X);
    let _c = e.with_color(Color::BLUE);
    e.disc_xz(Vec3::ZERO, 1.0);
}, [true, true, false])]
#[case::duration_only(|e: &CommandEncoder| {
    let _c = e.with_color(Color::GREEN);
    let _d = e.with_duration(5.0);
    e.line(Vec3::ZERO, Vec3::X);
    e.circle_xz(Vec3::ZERO, 1.0);
}, [false, false, true])]
#[case::everything(|e: &CommandEncoder| {
    e.wire_box(Vec3::ZERO, Vec3::ONE);
    e.mesh_capture(1);
    let _d = e.with_duration(1.0);
    e.cross(Vec3::ZERO, 1.0);
}, [true, true, true])]
fn test_splitter_outputs_are_balanced(
    #[case] draw: fn(&CommandEncoder),
    #[case] non_empty: [bool; 3],
) {
    let drawer = inline_drawer();
    let outputs = split(&record(&drawer, draw));
    for category in Category::ALL {
        let stream = &outputs[category.index()];
        assert_eq!(
            !stream.is_empty(),
            non_empty[category.index()],
            "unexpected contents in {:?}",
            category
        );
        // The builder enforces strict nesting, so a successful build proves balance.
        assert_fully_consumed(stream);
        build(stream);
    }
}

#[test]
fn test_empty_scopes_are_elided() {
    let drawer = inline_drawer();
    let outputs = split(&record(&drawer, |e| {
        let _m = e.with_matrix(Mat4::IDENTITY);
        let _c = e.with_color(Color::RED);
        let _w = e.with_line_width(2.0, false);
    }));
    assert!(outputs.iter().all(CommandBuffer::is_empty));

    // Only the scope that holds a primitive survives.
    let outputs = split(&record(&drawer, |e| {
        {
            let _c = e.with_color(Color::RED);
        }
        let _m = e.with_matrix(Mat4::IDENTITY);
        e.line(Vec3::ZERO, Vec3::X);
    }));
    assert_eq!(
        tags(&outputs[Category::Static.index()]),
        vec![Tag::PushMatrix, Tag::Line, Tag::PopMatrix]
    );
}

#[test]
fn test_scope_only_submission_leaves_no_entries() {
    let drawer = inline_drawer();
    let encoder = drawer.get_encoder();
    encoder.push_color(Color::RED);
    encoder.pop_color();
    encoder.submit().unwrap();
    drawer.advance_tick(0.0).unwrap();
    assert_eq!(drawer.stats().live_entries, 0);
}

// ============================================================================
// Tessellation
// ============================================================================

#[rstest]
fn test_circle_steps_are_monotonic(
    #[values(0.25, 0.5, 2.0)] max_pixel_error: f32,
    #[values(0.001, 0.01, 0.1)] pixel_size: f32,
) {
    let mut previous = 0;
    for i in 0..400 {
        let radius = i as f32 * 0.025;
        let steps = circle_steps(max_pixel_error, pixel_size, radius, 512);
        assert!(steps >= MIN_CIRCLE_STEPS);
        assert!(steps <= 512);
        assert!(steps >= previous, "steps decreased at radius {}", radius);
        previous = steps;
    }
}

#[rstest]
#[case(1.0, 2.0)]
#[case(2.0, 20.0)]
#[case(5.0, 50.0)]
fn test_nearer_circles_are_finer(#[case] near: f32, #[case] far: f32) {
    let drawer = inline_drawer();
    let vertices_at = |distance: f32| {
        let outputs = split(&record(&drawer, |e| e.circle_xy(Vec3::ZERO, 0.5)));
        let config = DrawConfig::default();
        let glyphs = GlyphTable::monospace_ascii();
        let viewer = Viewer::looking_at(ViewerId(1), Vec3::new(0.0, 0.0, distance), Vec3::ZERO, 1.0, 1080.0);
        let mut out = GeometryBuffers::new();
        GeometryBuilder::new(&config, &glyphs, &viewer)
            .build(outputs[Category::Dynamic.index()].as_bytes(), &mut out)
            .unwrap();
        out.lines.vertices.len()
    };
    assert!(vertices_at(near) >= vertices_at(far));
}

// ============================================================================
// Persistence
// ============================================================================

fn one_second_line(drawer: &CommandDrawer) -> CommandBuffer {
    let buffers = record(drawer, |e| {
        let _d = e.with_duration(1.0);
        e.line(Vec3::ZERO, Vec3::X);
    });
    let [static_out, dynamic_out, persistent] = split(&buffers);
    assert!(static_out.is_empty() && dynamic_out.is_empty());
    persistent
}

#[test]
fn test_duration_scope_expires() {
    let drawer = inline_drawer();
    assert_eq!(drawer.now(), 0.0);
    let persistent = one_second_line(&drawer);

    let mut at_half = persistent.clone();
    assert_eq!(
        filter_persistent(&mut at_half, 0.5, 0, 0, 32),
        Ok(FilterOutcome::Alive)
    );
    assert_eq!(at_half.as_bytes(), persistent.as_bytes());
    assert_eq!(build(&at_half).primitives.lines, 1);

    // Filtering is idempotent.
    assert_eq!(
        filter_persistent(&mut at_half, 0.5, 0, 0, 32),
        Ok(FilterOutcome::Alive)
    );
    assert_eq!(at_half.as_bytes(), persistent.as_bytes());

    let mut at_one_and_half = persistent.clone();
    assert_eq!(
        filter_persistent(&mut at_one_and_half, 1.5, 0, 0, 32),
        Ok(FilterOutcome::Dead)
    );
    assert!(at_one_and_half.is_empty());
}

#[test]
fn test_persistent_entry_lives_until_expiry() {
    let drawer = inline_drawer();
    {
        let encoder = drawer.frame_encoder();
        let _d = encoder.with_duration(1.0);
        encoder.line(Vec3::ZERO, Vec3::X);
    }

    drawer.advance_tick(0.5).unwrap();
    let mut sink = CountingSink::default();
    drawer.render_viewer(&camera(), &mut sink).unwrap();
    assert_eq!(sink.meshes, 1);
    assert_eq!(drawer.stats().live_entries, 1);

    // Still alive one tick later: persistent entries are presented every tick.
    drawer.advance_tick(0.75).unwrap();
    let mut sink = CountingSink::default();
    drawer.render_viewer(&camera(), &mut sink).unwrap();
    assert_eq!(sink.meshes, 1);

    drawer.advance_tick(1.5).unwrap();
    assert_eq!(drawer.stats().live_entries, 0);
    let mut sink = CountingSink::default();
    drawer.render_viewer(&camera(), &mut sink).unwrap();
    assert_eq!(sink.meshes, 0);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_cached_entries_are_reused() {
    let drawer = inline_drawer();
    let hash = drawer.hash_begin().add(&Vec3::X).add("marker").finish();
    assert!(!drawer.try_draw(hash, None));
    assert!(!drawer.try_draw(drawer.hash_begin().add("unknown").finish(), None));

    let encoder = drawer.get_encoder_for(hash, None);
    encoder.wire_box(Vec3::X, Vec3::ONE);
    encoder.submit().unwrap();
    drawer.advance_tick(0.0).unwrap();
    let mut sink = CountingSink::default();
    drawer.render_viewer(&camera(), &mut sink).unwrap();
    assert_eq!(sink.meshes, 1);

    // Next frame: no encoding, same output.
    assert!(drawer.try_draw(hash, None));
    drawer.advance_tick(0.016).unwrap();
    let mut sink = CountingSink::default();
    drawer.render_viewer(&camera(), &mut sink).unwrap();
    assert_eq!(sink.meshes, 1);
    assert_eq!(sink.vertices, 12 * 4);

    // Skipped frames age the entry out.
    for tick in 2..5 {
        drawer.advance_tick(tick as f64 * 0.016).unwrap();
    }
    assert!(!drawer.try_draw(hash, None));
    assert_eq!(drawer.stats().live_entries, 0);
}

#[test]
fn test_epoch_gc_returns_geometry_to_pool() {
    let drawer = inline_drawer();
    let encoder = drawer.get_encoder();
    encoder.line(Vec3::ZERO, Vec3::X);
    encoder.submit().unwrap();

    drawer.advance_tick(0.0).unwrap();
    assert_eq!(drawer.stats().live_entries, 1);
    let mut sink = CountingSink::default();
    drawer.render_viewer(&camera(), &mut sink).unwrap();
    assert_eq!(sink.meshes, 1);

    drawer.advance_tick(0.0).unwrap();
    let before = drawer.stats();
    assert_eq!(before.live_entries, 1);

    // Three epochs after submission the entry is older than the slack.
    drawer.advance_tick(0.0).unwrap();
    let after = drawer.stats();
    assert_eq!(after.epoch, 3);
    assert_eq!(after.live_entries, 0);
    assert_eq!(after.pooled_geometry_buffers, before.pooled_geometry_buffers + 1);
    assert!(after.pooled_command_buffers >= 1);
}

#[test]
fn test_matrix_and_color_apply_to_line() {
    let drawer = inline_drawer();
    let m = Mat4::from_scale_rotation_translation(
        Vec3::splat(2.0),
        Quat::from_rotation_y(0.5),
        Vec3::new(1.0, 2.0, 3.0),
    );
    let (a, b) = (Vec3::new(0.5, 0.0, 0.0), Vec3::new(0.0, 1.0, 1.0));
    let outputs = split(&record(&drawer, |e| {
        let _m = e.with_matrix(m);
        let _c = e.with_color(Color::RED);
        e.line(a, b);
    }));

    let stream = &outputs[Category::Static.index()];
    assert_eq!(
        tags(stream),
        vec![Tag::PushMatrix, Tag::PushColor, Tag::Line, Tag::PopColor, Tag::PopMatrix]
    );
    assert_fully_consumed(stream);

    let out = build(stream);
    assert_eq!(out.primitives, counts(1, 0, 0, 0));
    let start = Vec3::from(out.lines.vertices[0].position);
    let end = Vec3::from(out.lines.vertices[2].position);
    assert!(start.abs_diff_eq(m.transform_point3(a), 1e-5));
    assert!(end.abs_diff_eq(m.transform_point3(b), 1e-5));
    assert!(out
        .lines
        .vertices
        .iter()
        .all(|v| v.color == Color::RED.to_array()));
}

#[rstest]
fn test_frame_encoder_from_many_threads(#[values(0, 2)] worker_threads: usize) {
    init_logging();
    let drawer = CommandDrawer::new(DrawConfig::default().with_worker_threads(worker_threads));
    std::thread::scope(|s| {
        for i in 0..8 {
            let drawer = &drawer;
            s.spawn(move || {
                let encoder = drawer.frame_encoder();
                let _c = encoder.with_color(Color::YELLOW);
                encoder.line(Vec3::ZERO, Vec3::splat(i as f32 + 1.0));
            });
        }
    });
    drawer.advance_tick(0.0).unwrap();
    let mut sink = CountingSink::default();
    drawer.render_viewer(&camera(), &mut sink).unwrap();
    assert_eq!(sink.meshes, 1);
    assert_eq!(sink.vertices, 8 * 4);
}
