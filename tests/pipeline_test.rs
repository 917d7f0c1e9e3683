mod common;

use common::*;
use parcl::platform::{DeviceInfo, PlatformInfo};
use parcl::prelude::*;
use proptest::prelude::*;

#[test]
fn test_end_to_end_decrement() {
    let registry = registry();
    let ctx = cpu_context(&registry);
    let queue = queue(&ctx, false);
    let program = Program::build(&ctx, DECREMENT).unwrap();

    let input: Vec<i32> = (1..=8).collect();
    let a = Buffer::from_slice(&ctx, AccessMode::ReadOnly, &input).unwrap();
    let b = Buffer::new::<i32>(&ctx, AccessMode::WriteOnly, input.len()).unwrap();

    let mut kernel = program.entry_point("decrement").unwrap();
    kernel.set_arg(0, &a).unwrap();
    kernel.set_arg(1, &b).unwrap();
    let done = queue.enqueue_kernel(&kernel, &[8], None, &[]).unwrap();

    let host = HostArray::<i32>::zeros(8);
    let read = queue.enqueue_copy(&host, &b, &[done]).unwrap();
    read.wait().unwrap();

    assert_eq!(host.to_vec(), (0..8).collect::<Vec<i32>>());
}

#[test]
fn test_explicit_work_groups_and_two_dims() {
    let registry = registry();
    let ctx = cpu_context(&registry);
    let queue = queue(&ctx, false);
    let program = Program::build(
        &ctx,
        r#"
        __kernel void index2d(__global uint *out, uint width) {
            size_t x = get_global_id(0);
            size_t y = get_global_id(1);
            out[y * width + x] = (uint)(y * 100 + x);
        }
        "#,
    )
    .unwrap();

    let out = Buffer::new::<u32>(&ctx, AccessMode::WriteOnly, 8 * 4).unwrap();
    let mut kernel = program.entry_point("index2d").unwrap();
    kernel.set_args(&[(&out).into(), 8u32.into()]).unwrap();

    let range = NdRange::new(&[8, 4]).unwrap().with_local(&[4, 2]).unwrap();
    queue.enqueue_nd_range(&kernel, &range, &[]).unwrap();

    let mut result = vec![0u32; 32];
    queue.read_buffer(&out, &mut result, &[]).unwrap();
    assert_eq!(result[0], 0);
    assert_eq!(result[7], 7);
    assert_eq!(result[8], 100);
    assert_eq!(result[31], 307);
}

#[test]
fn test_same_queue_commands_run_in_order() {
    let registry = registry();
    let ctx = cpu_context(&registry);
    let queue = queue(&ctx, true);
    let buf = Buffer::new::<u32>(&ctx, AccessMode::ReadWrite, 1024).unwrap();

    let first = queue.enqueue_write(&buf, &vec![1u32; 1024], &[]).unwrap();
    let second = queue.enqueue_write(&buf, &vec![2u32; 1024], &[]).unwrap();

    let mut out = vec![0u32; 1024];
    queue.read_buffer(&buf, &mut out, &[]).unwrap();
    assert!(out.iter().all(|&v| v == 2));

    let a = first.profiling_info().unwrap();
    let b = second.profiling_info().unwrap();
    assert!(b.start >= a.end);
}

#[test]
fn test_cross_queue_dependency() {
    let registry = registry();
    let platform = &registry.platforms()[0];
    let ctx = Context::new(platform.devices()).unwrap();
    let props = QueueProperties::new().profiling(true);
    let gpu = platform.devices_of_type(DeviceType::Gpu).remove(0);
    let cpu = platform.devices_of_type(DeviceType::Cpu).remove(0);
    let queue_a = CommandQueue::new(&ctx, &gpu, props).unwrap();
    let queue_b = CommandQueue::new(&ctx, &cpu, props).unwrap();

    let program = Program::build(&ctx, DECREMENT).unwrap();
    let src = Buffer::from_slice(&ctx, AccessMode::ReadOnly, &[10i32; 256]).unwrap();
    let mid = Buffer::new::<i32>(&ctx, AccessMode::ReadWrite, 256).unwrap();
    let dst = Buffer::new::<i32>(&ctx, AccessMode::WriteOnly, 256).unwrap();

    let mut first = program.entry_point("decrement").unwrap();
    first.set_args(&[(&src).into(), (&mid).into()]).unwrap();
    let mut second = program.entry_point("decrement").unwrap();
    second.set_args(&[(&mid).into(), (&dst).into()]).unwrap();

    let a = queue_a.enqueue_kernel(&first, &[256], None, &[]).unwrap();
    let b = queue_b.enqueue_kernel(&second, &[256], None, &[a.clone()]).unwrap();
    b.wait().unwrap();

    let ta = a.profiling_info().unwrap();
    let tb = b.profiling_info().unwrap();
    assert!(tb.start >= ta.end);

    let mut out = vec![0i32; 256];
    queue_b.read_buffer(&dst, &mut out, &[]).unwrap();
    assert!(out.iter().all(|&v| v == 8));
}

#[test]
fn test_invocations_are_distinct() {
    let registry = registry();
    let ctx = cpu_context(&registry);
    let program = Program::build(&ctx, DECREMENT).unwrap();

    let mut one = program.entry_point("decrement").unwrap();
    let two = program.entry_point("decrement").unwrap();
    assert_ne!(one.id(), two.id());
    assert_eq!(one.name(), two.name());

    let a = Buffer::from_slice(&ctx, AccessMode::ReadOnly, &[1i32; 4]).unwrap();
    let b = Buffer::new::<i32>(&ctx, AccessMode::WriteOnly, 4).unwrap();
    one.set_args(&[(&a).into(), (&b).into()]).unwrap();

    let queue = queue(&ctx, false);
    assert!(queue.enqueue_kernel(&one, &[4], None, &[]).is_ok());
    assert!(matches!(
        queue.enqueue_kernel(&two, &[4], None, &[]),
        Err(Error::ArgumentMismatch(_))
    ));

    assert!(matches!(
        program.entry_point("increment"),
        Err(Error::KernelNotFound(ref name)) if name == "increment"
    ));
}

#[test]
fn test_build_error_has_log() {
    let registry = registry();
    let ctx = cpu_context(&registry);

    let err = Program::build(&ctx, "__kernel void broken(__global int *a) { a[0] = }").unwrap_err();
    match err {
        Error::Build { log } => assert!(log.contains("program.cl:1:")),
        other => panic!("expected build error, got {:?}", other),
    }
}

#[test]
fn test_access_violation_at_enqueue() {
    let registry = registry();
    let ctx = cpu_context(&registry);
    let queue = queue(&ctx, false);
    let program = Program::build(&ctx, DECREMENT).unwrap();

    let a = Buffer::from_slice(&ctx, AccessMode::ReadOnly, &[1i32; 4]).unwrap();
    let read_only_out = Buffer::new::<i32>(&ctx, AccessMode::ReadOnly, 4).unwrap();

    let mut kernel = program.entry_point("decrement").unwrap();
    kernel.set_args(&[(&a).into(), (&read_only_out).into()]).unwrap();
    let err = queue.enqueue_kernel(&kernel, &[4], None, &[]).unwrap_err();
    assert!(matches!(err, Error::AccessViolation(_)));
}

#[test]
fn test_out_of_bounds_fails_at_sync_point() {
    let registry = registry();
    let ctx = cpu_context(&registry);
    let queue = queue(&ctx, false);
    let program = Program::build(&ctx, DECREMENT).unwrap();

    let a = Buffer::from_slice(&ctx, AccessMode::ReadOnly, &[1i32; 4]).unwrap();
    let b = Buffer::new::<i32>(&ctx, AccessMode::WriteOnly, 4).unwrap();
    let mut kernel = program.entry_point("decrement").unwrap();
    kernel.set_args(&[(&a).into(), (&b).into()]).unwrap();

    // Enqueue succeeds; the fault is only seen once the host synchronizes.
    let event = queue.enqueue_kernel(&kernel, &[8], None, &[]).unwrap();
    let err = queue.finish().unwrap_err();
    assert!(matches!(err, Error::ExecutionFailed(ref m) if m.contains("out-of-bounds")));
    assert_eq!(event.status(), EventStatus::Failed);
    assert!(event.wait().is_err());
}

#[test]
fn test_fallback_to_cpu() {
    let registry = cpu_only_registry();
    let platform = &registry.platforms()[0];
    assert!(matches!(
        Context::from_type(platform, DeviceType::Accelerator),
        Err(Error::NoMatchingDevice(_))
    ));
    assert!(Context::from_type(platform, DeviceType::Cpu).is_ok());

    let ctx = select_context(&registry, &[DeviceType::Accelerator, DeviceType::Gpu, DeviceType::Cpu]).unwrap();
    assert!(ctx.devices().iter().all(|d| d.device_type() == DeviceType::Cpu));

    let err = select_context(&registry, &[DeviceType::Gpu]).unwrap_err();
    assert!(err.is_device_selection());
}

#[test]
fn test_fp64_kernel_needs_capable_device() {
    let registry = registry();
    let platform = &registry.platforms()[0];
    let source = "__kernel void scale(__global double *x) { x[get_global_id(0)] *= 2.0; }";

    let gpu_ctx = Context::from_type(platform, DeviceType::Gpu).unwrap();
    assert!(matches!(Program::build(&gpu_ctx, source), Err(Error::Build { .. })));

    let cpu_ctx = Context::from_type(platform, DeviceType::Cpu).unwrap();
    assert!(Program::build(&cpu_ctx, source).is_ok());
}

#[test]
fn test_empty_device_list() {
    assert!(matches!(Context::new(&[]), Err(Error::NoMatchingDevice(_))));
}

#[test]
fn test_discovery_is_repeatable() {
    let config = Config::default();
    let first = Registry::discover(&config).unwrap();
    let second = Registry::discover(&config).unwrap();

    let platforms = |r: &Registry| -> Vec<PlatformInfo> {
        r.platforms().iter().map(|p| p.info().clone()).collect()
    };
    let devices = |r: &Registry| -> Vec<DeviceInfo> {
        r.all_devices().iter().map(|d| d.info().clone()).collect()
    };
    assert_eq!(platforms(&first), platforms(&second));
    assert_eq!(devices(&first), devices(&second));

    let categories: Vec<DeviceType> = first.all_devices().iter().map(|d| d.device_type()).collect();
    assert_eq!(categories, vec![DeviceType::Gpu, DeviceType::Cpu]);
}

#[test]
fn test_released_buffer_rejected() {
    let registry = registry();
    let ctx = cpu_context(&registry);
    let queue = queue(&ctx, false);
    let buf = Buffer::new::<u8>(&ctx, AccessMode::ReadWrite, 8).unwrap();
    buf.release();

    let err = queue.enqueue_write(&buf, &[0u8; 8], &[]).unwrap_err();
    assert!(matches!(err, Error::InvalidBuffer(_)));
}

#[cfg(feature = "telemetry")]
#[test]
fn test_context_metrics() {
    let registry = registry();
    let ctx = cpu_context(&registry);
    let queue = queue(&ctx, false);
    let program = Program::build(&ctx, DECREMENT).unwrap();

    let a = Buffer::from_slice(&ctx, AccessMode::ReadOnly, &[3i32; 16]).unwrap();
    let b = Buffer::new::<i32>(&ctx, AccessMode::WriteOnly, 16).unwrap();
    let mut kernel = program.entry_point("decrement").unwrap();
    kernel.set_args(&[(&a).into(), (&b).into()]).unwrap();
    queue.enqueue_kernel(&kernel, &[16], None, &[]).unwrap();
    queue.enqueue_write(&a, &[0i32; 16], &[]).unwrap();
    queue.finish().unwrap();

    let snapshot = ctx.metrics().snapshot();
    assert_eq!(snapshot.buffers_allocated, 2);
    assert_eq!(snapshot.kernels_launched, 1);
    assert_eq!(snapshot.copies, 1);
    assert_eq!(snapshot.bytes_transferred, 64);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_identity_round_trip(data in prop::collection::vec(any::<i32>(), 1..300)) {
        let registry = registry();
        let ctx = cpu_context(&registry);
        let queue = queue(&ctx, false);
        let program = Program::build(&ctx, IDENTITY).unwrap();

        let n = data.len();
        let input = Buffer::from_slice(&ctx, AccessMode::ReadOnly, &data).unwrap();
        let output = Buffer::new::<i32>(&ctx, AccessMode::WriteOnly, n).unwrap();

        let mut kernel = program.entry_point("identity").unwrap();
        kernel.set_args(&[(&input).into(), (&output).into(), (n as u32).into()]).unwrap();
        let run = queue.enqueue_kernel(&kernel, &[n], None, &[]).unwrap();

        let host = HostArray::<i32>::zeros(n);
        queue.enqueue_copy(&host, &output, &[run]).unwrap().wait().unwrap();
        prop_assert_eq!(host.to_vec(), data);
    }
}
