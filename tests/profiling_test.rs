mod common;

use common::*;
use parcl::prelude::*;
use parcl::profiling;

#[test]
fn test_timestamps_are_ordered() {
    let registry = registry();
    let ctx = cpu_context(&registry);
    let queue = queue(&ctx, true);
    let program = Program::build(&ctx, DECREMENT).unwrap();

    let a = Buffer::from_slice(&ctx, AccessMode::ReadOnly, &[5i32; 4096]).unwrap();
    let b = Buffer::new::<i32>(&ctx, AccessMode::WriteOnly, 4096).unwrap();
    let mut kernel = program.entry_point("decrement").unwrap();
    kernel.set_args(&[(&a).into(), (&b).into()]).unwrap();

    let events: Vec<Event> = (0..4)
        .map(|_| queue.enqueue_kernel(&kernel, &[4096], None, &[]).unwrap())
        .collect();

    for event in &events {
        let t = profiling::timeline(event).unwrap();
        assert!(t.queued <= t.submitted);
        assert!(t.submitted <= t.start);
        assert!(t.start <= t.end);
        assert_eq!(profiling::elapsed(event).unwrap(), t.execution_time());
    }

    for pair in events.windows(2) {
        let earlier = pair[0].profiling_info().unwrap();
        let later = pair[1].profiling_info().unwrap();
        assert!(later.start >= earlier.end);
    }
}

#[test]
fn test_profiling_needs_profiling_queue() {
    let registry = registry();
    let ctx = cpu_context(&registry);
    let queue = queue(&ctx, false);
    let buf = Buffer::new::<u8>(&ctx, AccessMode::ReadWrite, 4).unwrap();

    let event = queue.enqueue_write(&buf, &[1u8, 2, 3, 4], &[]).unwrap();
    event.wait().unwrap();
    assert_eq!(profiling::elapsed(&event).unwrap_err(), Error::ProfilingUnavailable);
}

#[test]
fn test_profiling_waits_for_completion() {
    let registry = registry();
    let ctx = cpu_context(&registry);
    let queue = queue(&ctx, true);
    let gate = UserEvent::new(&ctx);

    let marker = queue.enqueue_marker(&[gate.event()]).unwrap();
    let reader = {
        let marker = marker.clone();
        std::thread::spawn(move || profiling::timeline(&marker))
    };

    std::thread::sleep(std::time::Duration::from_millis(20));
    assert!(!marker.is_complete());
    gate.set_complete();

    let t = reader.join().unwrap().unwrap();
    assert!(t.end >= t.start);
    assert_eq!(marker.status(), EventStatus::Complete);
}

#[test]
fn test_profiling_failed_command_reports_error() {
    let registry = registry();
    let ctx = cpu_context(&registry);
    let queue = queue(&ctx, true);
    let gate = UserEvent::new(&ctx);

    let marker = queue.enqueue_marker(&[gate.event()]).unwrap();
    gate.set_failed("host gave up");

    let err = profiling::timeline(&marker).unwrap_err();
    assert!(matches!(err, Error::ExecutionFailed(ref m) if m.contains("host gave up")));
    assert!(queue.finish().is_err());
}
