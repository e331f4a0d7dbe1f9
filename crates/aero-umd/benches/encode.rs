#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
use std::sync::Arc;
#[cfg(not(target_arch = "wasm32"))]
use std::time::Duration;

#[cfg(not(target_arch = "wasm32"))]
use aero_protocol::aerogpu::aerogpu_cmd::{AerogpuIndexFormat, AerogpuPrimitiveTopology};
#[cfg(not(target_arch = "wasm32"))]
use aero_protocol::aerogpu::aerogpu_pci::AerogpuFormat;
#[cfg(not(target_arch = "wasm32"))]
use aero_umd::backend::{RecordingSubmitter, VecGuestAllocator};
#[cfg(not(target_arch = "wasm32"))]
use aero_umd::{
    Adapter, BindFlags, BufferDesc, ClearFlags, CpuAccessFlags, Device, DeviceOptions, MapType,
    ResourceId, RtvId, Stage, Texture2dDesc, Usage, VertexBufferBinding, Viewport,
};
#[cfg(not(target_arch = "wasm32"))]
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

#[cfg(not(target_arch = "wasm32"))]
fn criterion_config() -> Criterion {
    match std::env::var("AERO_BENCH_PROFILE").as_deref() {
        Ok("ci") => Criterion::default()
            .warm_up_time(Duration::from_millis(150))
            .measurement_time(Duration::from_millis(400))
            .sample_size(20)
            .noise_threshold(0.05),
        _ => Criterion::default()
            .warm_up_time(Duration::from_secs(1))
            .measurement_time(Duration::from_secs(2))
            .sample_size(50)
            .noise_threshold(0.03),
    }
}

#[cfg(not(target_arch = "wasm32"))]
struct Scene {
    rtv: RtvId,
    vertex_buffer: ResourceId,
    index_buffer: ResourceId,
}

#[cfg(not(target_arch = "wasm32"))]
fn scene_device() -> (Arc<RecordingSubmitter>, Device, Scene) {
    let submitter = Arc::new(RecordingSubmitter::new());
    let allocator = Arc::new(VecGuestAllocator::new(1 << 20));
    let adapter = Adapter::new(submitter.clone(), Some(allocator));
    let device = adapter.open_device(DeviceOptions::default());

    let target = device
        .create_texture2d(
            &Texture2dDesc {
                width: 64,
                height: 64,
                mip_levels: 1,
                array_layers: 1,
                format: AerogpuFormat::B8G8R8A8Unorm,
                usage: Usage::Default,
                bind_flags: BindFlags::RENDER_TARGET,
                cpu_access: CpuAccessFlags::empty(),
            },
            &[],
        )
        .unwrap();
    let rtv = device.create_render_target_view(target, None).unwrap();

    let vertex_buffer = device
        .create_buffer(
            &BufferDesc {
                size_bytes: 64 * 1024,
                usage: Usage::Dynamic,
                bind_flags: BindFlags::VERTEX_BUFFER,
                cpu_access: CpuAccessFlags::WRITE,
            },
            None,
        )
        .unwrap();
    let index_buffer = device
        .create_buffer(
            &BufferDesc {
                size_bytes: 16 * 1024,
                usage: Usage::Dynamic,
                bind_flags: BindFlags::INDEX_BUFFER,
                cpu_access: CpuAccessFlags::WRITE,
            },
            None,
        )
        .unwrap();

    let vs = device.create_shader(Stage::Vertex, &[0xA5; 512]).unwrap();
    let ps = device.create_shader(Stage::Pixel, &[0x5A; 512]).unwrap();
    device.bind_shaders(Some(vs), Some(ps), None).unwrap();

    // Drain the setup stream so iterations start from an empty writer.
    device.flush().unwrap();
    submitter.take_submissions();

    (
        submitter,
        device,
        Scene {
            rtv,
            vertex_buffer,
            index_buffer,
        },
    )
}

/// One frame the shape a translation layer produces: full target and state
/// setup, then draws that rebind the same buffers and topology every time.
#[cfg(not(target_arch = "wasm32"))]
fn encode_frame(device: &Device, scene: &Scene, draws: u32) -> u64 {
    device.set_render_targets(&[Some(scene.rtv)], None).unwrap();
    device
        .set_viewports(&[Viewport {
            x: 0.0,
            y: 0.0,
            width: 64.0,
            height: 64.0,
            min_depth: 0.0,
            max_depth: 1.0,
        }])
        .unwrap();
    device
        .clear(ClearFlags::COLOR, [0.0, 0.0, 0.0, 1.0], 1.0, 0)
        .unwrap();

    let binding = VertexBufferBinding {
        buffer: Some(scene.vertex_buffer),
        stride_bytes: 24,
        offset_bytes: 0,
    };
    for i in 0..draws {
        device.set_vertex_buffers(0, &[binding]).unwrap();
        device
            .set_index_buffer(Some(scene.index_buffer), AerogpuIndexFormat::Uint16, 0)
            .unwrap();
        device
            .set_primitive_topology(AerogpuPrimitiveTopology::TriangleList as u32)
            .unwrap();
        device.draw_indexed(3, 1, i.saturating_mul(3), 0, 0).unwrap();
    }
    device.present(0, 0).unwrap()
}

#[cfg(not(target_arch = "wasm32"))]
fn bench_frame_encode(c: &mut Criterion) {
    let (submitter, device, scene) = scene_device();

    let mut group = c.benchmark_group("frame_encode");
    for draws in [64u32, 1024] {
        group.throughput(criterion::Throughput::Elements(u64::from(draws)));
        group.bench_with_input(
            BenchmarkId::new("indexed_triangles", draws),
            &draws,
            |b, &draws| {
                b.iter(|| {
                    let fence = encode_frame(&device, &scene, black_box(draws));
                    black_box(fence);
                    black_box(submitter.take_submissions().len());
                });
            },
        );
    }
    group.finish();
}

#[cfg(not(target_arch = "wasm32"))]
fn bench_dynamic_discard_upload(c: &mut Criterion) {
    let mut group = c.benchmark_group("dynamic_discard_upload");
    for size in [4usize * 1024, 64 * 1024] {
        let submitter = Arc::new(RecordingSubmitter::new());
        let allocator = Arc::new(VecGuestAllocator::new(1 << 20));
        let adapter = Adapter::new(submitter.clone(), Some(allocator));
        let device = adapter.open_device(DeviceOptions::default());
        let buffer = device
            .create_buffer(
                &BufferDesc {
                    size_bytes: size as u64,
                    usage: Usage::Dynamic,
                    bind_flags: BindFlags::VERTEX_BUFFER,
                    cpu_access: CpuAccessFlags::WRITE,
                },
                None,
            )
            .unwrap();
        device.flush().unwrap();
        submitter.take_submissions();

        let payload = vec![0x3Cu8; size];
        group.throughput(criterion::Throughput::Bytes(size as u64));
        group.bench_with_input(
            BenchmarkId::new("map_write_unmap", size),
            &payload,
            |b, payload| {
                b.iter(|| {
                    device.map(buffer, 0, MapType::WriteDiscard, 0).unwrap();
                    device.write_mapped(buffer, 0, 0, black_box(payload)).unwrap();
                    device.unmap(buffer, 0).unwrap();
                    black_box(device.flush().unwrap());
                    submitter.take_submissions();
                });
            },
        );
    }
    group.finish();
}

#[cfg(not(target_arch = "wasm32"))]
criterion_group! {
    name = benches;
    config = criterion_config();
    targets = bench_frame_encode, bench_dynamic_discard_upload
}
#[cfg(not(target_arch = "wasm32"))]
criterion_main!(benches);
