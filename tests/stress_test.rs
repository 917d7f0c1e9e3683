//! Stress tests for the dispatch pipeline.

mod common;

use common::*;
use parcl::prelude::*;
use std::thread;

#[test]
#[ignore] // Run with --ignored flag
fn stress_test_many_small_kernels() {
    let registry = registry();
    let ctx = cpu_context(&registry);
    let queue = queue(&ctx, false);
    let program = Program::build(&ctx, DECREMENT).unwrap();

    let a = Buffer::from_slice(&ctx, AccessMode::ReadWrite, &[1_000i32; 64]).unwrap();
    let b = Buffer::new::<i32>(&ctx, AccessMode::ReadWrite, 64).unwrap();
    let mut forward = program.entry_point("decrement").unwrap();
    forward.set_args(&[(&a).into(), (&b).into()]).unwrap();
    let mut backward = program.entry_point("decrement").unwrap();
    backward.set_args(&[(&b).into(), (&a).into()]).unwrap();

    for _ in 0..250 {
        queue.enqueue_kernel(&forward, &[64], None, &[]).unwrap();
        queue.enqueue_kernel(&backward, &[64], None, &[]).unwrap();
    }
    queue.finish().unwrap();

    let mut out = vec![0i32; 64];
    queue.read_buffer(&a, &mut out, &[]).unwrap();
    assert!(out.iter().all(|&v| v == 500));
}

#[test]
#[ignore]
fn stress_test_concurrent_queues() {
    let registry = registry();
    let ctx = cpu_context(&registry);
    let program = Program::build(&ctx, IDENTITY).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let ctx = ctx.clone();
            let program = program.clone();
            thread::spawn(move || {
                let queue = queue(&ctx, false);
                let data: Vec<i32> = (0..1024).map(|i| i * t).collect();
                let input = Buffer::from_slice(&ctx, AccessMode::ReadOnly, &data).unwrap();
                let output = Buffer::new::<i32>(&ctx, AccessMode::WriteOnly, 1024).unwrap();

                let mut kernel = program.entry_point("identity").unwrap();
                kernel.set_args(&[(&input).into(), (&output).into(), 1024u32.into()]).unwrap();
                for _ in 0..20 {
                    queue.enqueue_kernel(&kernel, &[1024], None, &[]).unwrap();
                }

                let mut out = vec![0i32; 1024];
                queue.read_buffer(&output, &mut out, &[]).unwrap();
                assert_eq!(out, data);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
#[ignore]
fn stress_test_out_of_order_fan_in() {
    let registry = registry();
    let ctx = cpu_context(&registry);
    let props = QueueProperties::new().out_of_order(true);
    let queue = CommandQueue::new(&ctx, &ctx.devices()[0], props).unwrap();

    let buffers: Vec<Buffer> = (0..64)
        .map(|_| Buffer::new::<u32>(&ctx, AccessMode::ReadWrite, 256).unwrap())
        .collect();
    let writes: Vec<Event> = buffers
        .iter()
        .enumerate()
        .map(|(i, buf)| queue.enqueue_write(buf, &vec![i as u32; 256], &[]).unwrap())
        .collect();

    queue.enqueue_marker(&writes).unwrap().wait().unwrap();
    for (i, buf) in buffers.iter().enumerate() {
        let mut out = vec![0u32; 256];
        queue.read_buffer(buf, &mut out, &[]).unwrap();
        assert!(out.iter().all(|&v| v == i as u32));
    }
}

#[test]
#[ignore]
fn stress_test_out_of_order_chains_on_few_engines() {
    init_tracing();
    let config = Config::builder().max_workers(2).queue_engines(2).build().unwrap();
    let registry = Registry::discover(&config).unwrap();
    let ctx = cpu_context(&registry);
    let queue = CommandQueue::new(&ctx, &ctx.devices()[0], QueueProperties::new().out_of_order(true)).unwrap();
    let gate = UserEvent::new(&ctx);

    // 200 chains of 50 dependent writes, all held back by one gate.
    let buffers: Vec<Buffer> = (0..200)
        .map(|_| Buffer::new::<u32>(&ctx, AccessMode::ReadWrite, 1).unwrap())
        .collect();
    let mut tails = Vec::new();
    for buf in &buffers {
        let mut prev = gate.event();
        for step in 0..50u32 {
            prev = queue.enqueue_write(buf, &[step], &[prev]).unwrap();
        }
        tails.push(prev);
    }

    // Independent work still runs while 10 000 commands wait.
    let free = Buffer::new::<u32>(&ctx, AccessMode::ReadWrite, 1).unwrap();
    queue.enqueue_write(&free, &[1u32], &[]).unwrap().wait().unwrap();

    gate.set_complete();
    wait_for_events(&tails).unwrap();
    for buf in &buffers {
        let mut out = [0u32];
        queue.read_buffer(buf, &mut out, &[]).unwrap();
        assert_eq!(out, [49]);
    }
    queue.finish().unwrap();
}
