use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use glam::{Mat4, Vec3};

use redlilium_draw_commands::geometry::{GeometryBuffers, GeometryBuilder};
use redlilium_draw_commands::{
    split_streams, Color, CommandBuffer, CommandDrawer, CommandEncoder, CountingSink, DrawConfig,
    GlyphTable, LabelAlignment, Viewer, ViewerId,
};

const SHAPES: usize = 1_000;

fn inline_drawer() -> CommandDrawer {
    CommandDrawer::new(DrawConfig::default().with_worker_threads(0))
}

fn camera() -> Viewer {
    Viewer::looking_at(ViewerId(0), Vec3::new(0.0, 20.0, 60.0), Vec3::ZERO, 1.0, 1080.0)
}

/// A mixed scene: static boxes and lines, dynamic circles and labels.
fn encode_scene(encoder: &CommandEncoder) {
    for i in 0..SHAPES {
        let p = Vec3::new((i % 32) as f32, 0.0, (i / 32) as f32);
        let _m = encoder.with_matrix(Mat4::from_translation(p));
        let _c = encoder.with_color(Color::rgb(0.2, 0.8, (i % 7) as f32 / 7.0));
        encoder.wire_box(Vec3::ZERO, Vec3::splat(0.5));
        encoder.line(Vec3::ZERO, Vec3::Y);
        encoder.circle_xz(Vec3::ZERO, 0.4);
        if i % 16 == 0 {
            encoder.label_2d(Vec3::Y, "node", 12.0, LabelAlignment::BOTTOM_CENTER);
        }
    }
}

fn recorded_scene(drawer: &CommandDrawer) -> Vec<CommandBuffer> {
    let encoder = drawer.get_encoder();
    encode_scene(&encoder);
    encoder.into_buffers()
}

fn split_scene(buffers: &[CommandBuffer]) -> [CommandBuffer; 3] {
    let mut outputs: [CommandBuffer; 3] = Default::default();
    split_streams(buffers.iter().map(CommandBuffer::as_bytes), &mut outputs, 32)
        .expect("balanced scene");
    outputs
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn bench_encode(c: &mut Criterion) {
    let drawer = inline_drawer();
    let bytes: usize = recorded_scene(&drawer).iter().map(CommandBuffer::len).sum();

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(bytes as u64));
    group.bench_function("mixed_scene", |b| {
        b.iter(|| {
            let encoder = drawer.get_encoder();
            encode_scene(&encoder);
            black_box(encoder.into_buffers())
        });
    });
    group.finish();
}

// ---------------------------------------------------------------------------
// Splitting
// ---------------------------------------------------------------------------

fn bench_split(c: &mut Criterion) {
    let drawer = inline_drawer();
    let buffers = recorded_scene(&drawer);
    let bytes: usize = buffers.iter().map(CommandBuffer::len).sum();

    let mut group = c.benchmark_group("split");
    group.throughput(Throughput::Bytes(bytes as u64));
    group.bench_function("mixed_scene", |b| {
        b.iter_batched_ref(
            <[CommandBuffer; 3]>::default,
            |outputs| {
                for output in outputs.iter_mut() {
                    output.clear();
                }
                split_streams(buffers.iter().map(CommandBuffer::as_bytes), outputs, 32)
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

// ---------------------------------------------------------------------------
// Geometry building
// ---------------------------------------------------------------------------

fn bench_build(c: &mut Criterion) {
    let drawer = inline_drawer();
    let [static_stream, dynamic_stream, _] = split_scene(&recorded_scene(&drawer));
    let config = DrawConfig::default();
    let glyphs = GlyphTable::monospace_ascii();
    let viewer = camera();
    let builder = GeometryBuilder::new(&config, &glyphs, &viewer);

    let mut group = c.benchmark_group("build");
    group.throughput(Throughput::Elements(SHAPES as u64));
    let mut out = GeometryBuffers::new();
    group.bench_function("static", |b| {
        b.iter(|| {
            out.clear();
            builder.build(black_box(static_stream.as_bytes()), &mut out)
        });
    });
    group.bench_function("dynamic", |b| {
        b.iter(|| {
            out.clear();
            builder.build(black_box(dynamic_stream.as_bytes()), &mut out)
        });
    });
    group.finish();
}

// ---------------------------------------------------------------------------
// Full tick
// ---------------------------------------------------------------------------

fn bench_tick(c: &mut Criterion) {
    let drawer = inline_drawer();
    let viewer = camera();
    let mut time = 0.0;
    c.bench_function("tick_mixed_scene", |b| {
        b.iter(|| {
            encode_scene(&drawer.frame_encoder());
            time += 1.0 / 60.0;
            drawer.advance_tick(time).expect("tick");
            let mut sink = CountingSink::default();
            drawer.render_viewer(&viewer, &mut sink).expect("render");
            black_box(sink.vertices)
        });
    });
}

criterion_group!(benches, bench_encode, bench_split, bench_build, bench_tick);
criterion_main!(benches);
