//! Benchmarks for kernel compilation and dispatch overhead

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use parcl::prelude::*;

const SAXPY: &str = r#"
__kernel void saxpy(__global const float *x, __global float *y, float a, uint n) {
    size_t i = get_global_id(0);
    if (i < n) {
        y[i] = a * x[i] + y[i];
    }
}
"#;

fn setup() -> (Context, CommandQueue) {
    let config = Config::builder().device_mix("cpu").unwrap().build().unwrap();
    let registry = Registry::discover(&config).unwrap();
    let context = select_context(&registry, &[DeviceType::Cpu]).unwrap();
    let queue = CommandQueue::new(&context, &context.devices()[0], QueueProperties::new()).unwrap();
    (context, queue)
}

fn bench_build(c: &mut Criterion) {
    let (context, _queue) = setup();

    c.bench_function("build_saxpy", |b| {
        b.iter(|| Program::build(&context, black_box(SAXPY)).unwrap());
    });
}

fn bench_saxpy(c: &mut Criterion) {
    let (context, queue) = setup();
    let program = Program::build(&context, SAXPY).unwrap();
    let mut group = c.benchmark_group("saxpy");

    for &n in &[1_024usize, 16_384, 262_144] {
        let x = Buffer::from_slice(&context, AccessMode::ReadOnly, &vec![1.0f32; n]).unwrap();
        let y = Buffer::from_slice(&context, AccessMode::ReadWrite, &vec![2.0f32; n]).unwrap();
        let mut kernel = program.entry_point("saxpy").unwrap();
        kernel
            .set_args(&[(&x).into(), (&y).into(), 0.5f32.into(), (n as u32).into()])
            .unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                queue.enqueue_kernel(&kernel, &[n], None, &[]).unwrap();
                queue.finish().unwrap();
            });
        });
    }
    group.finish();
}

fn bench_round_trip(c: &mut Criterion) {
    let (context, queue) = setup();
    let data = vec![7u32; 65_536];
    let buffer = Buffer::new::<u32>(&context, AccessMode::ReadWrite, data.len()).unwrap();
    let mut out = vec![0u32; data.len()];

    c.bench_function("write_read_64k", |b| {
        b.iter(|| {
            let write = queue.enqueue_write(&buffer, black_box(&data), &[]).unwrap();
            queue.read_buffer(&buffer, &mut out, &[write]).unwrap();
        });
    });
}

criterion_group!(benches, bench_build, bench_saxpy, bench_round_trip);
criterion_main!(benches);
