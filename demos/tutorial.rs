//! End-to-end walk through the pipeline: discover devices, pick a context
//! with fallback, build a program, move data and time the kernel.
//!
//! Run with `RUST_LOG=parcl=debug cargo run --example tutorial` to see the
//! library's logs. Set `PARCL_PLATFORMS=cpu` to force the CPU fallback.

use parcl::prelude::*;
use parcl::profiling;

const SOURCE: &str = r#"
__kernel void decrement(__global const int *in, __global int *out) {
    size_t i = get_global_id(0);
    out[i] = in[i] - 1;
}

__kernel void square(__global float *data, uint n) {
    size_t i = get_global_id(0);
    if (i < n) {
        data[i] = data[i] * data[i];
    }
}
"#;

fn main() -> parcl::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let registry = Registry::discover(&Config::from_env()?)?;
    for platform in registry.platforms() {
        println!("platform: {} ({})", platform.name(), platform.info().version);
        for device in platform.devices() {
            let info = device.info();
            println!(
                "  {} [{}] compute units: {}, max work-group: {}, fp64: {}",
                info.name,
                info.device_type,
                info.compute_units,
                info.max_work_group_size,
                info.capabilities.fp64
            );
        }
    }

    let context = select_context(&registry, &[DeviceType::Accelerator, DeviceType::Gpu, DeviceType::Cpu])?;
    let device = context.devices()[0].clone();
    println!("running on: {}", device.name());

    let queue = CommandQueue::new(&context, &device, QueueProperties::new().profiling(true))?;
    let program = Program::build(&context, SOURCE)?;
    println!("kernels: {:?}", program.kernel_names());

    // decrement: [1..=8] -> [0..8]
    let input: Vec<i32> = (1..=8).collect();
    let a = Buffer::from_slice(&context, AccessMode::ReadOnly, &input)?;
    let b = Buffer::new::<i32>(&context, AccessMode::WriteOnly, input.len())?;

    let mut decrement = program.entry_point("decrement")?;
    decrement.set_arg(0, &a)?;
    decrement.set_arg(1, &b)?;
    let done = queue.enqueue_kernel(&decrement, &[input.len()], None, &[])?;

    let result = HostArray::<i32>::zeros(input.len());
    queue.enqueue_copy(&result, &b, &[done.clone()])?.wait()?;
    println!("decrement: {:?} -> {:?}", input, result.to_vec());

    let t = profiling::timeline(&done)?;
    println!(
        "  queued->submitted {:?}, submitted->start {:?}, execution {:?}",
        t.queue_delay(),
        t.dispatch_delay(),
        t.execution_time()
    );

    // square in place, in explicit work-groups of 16
    let n = 64;
    let data = Buffer::from_slice(&context, AccessMode::ReadWrite, &vec![3.0f32; n])?;
    let mut square = program.entry_point("square")?;
    square.set_args(&[(&data).into(), (n as u32).into()])?;
    let event = queue.enqueue_kernel(&square, &[n], Some(&[16][..]), &[])?;

    let mut squared = vec![0.0f32; n];
    queue.read_buffer(&data, &mut squared, &[event.clone()])?;
    println!("square: 3.0 -> {} in {:?}", squared[0], profiling::elapsed(&event)?);

    // A build error carries a positioned log.
    match Program::build(&context, "__kernel void bad(__global int *x) { x[0] = y; }") {
        Err(Error::Build { log }) => println!("build log:\n{}", log),
        other => println!("unexpected: {:?}", other.map(|p| p.kernel_names().len())),
    }

    queue.finish()?;

    #[cfg(feature = "telemetry")]
    println!("metrics: {:?}", context.metrics().snapshot());

    Ok(())
}
