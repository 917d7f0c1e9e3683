#![allow(dead_code)]

use parcl::prelude::*;
use std::sync::Once;

static TRACING: Once = Once::new();

/// Route library logs to the test harness. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Registry with the default layout: one platform with a GPU and a CPU.
pub fn registry() -> Registry {
    init_tracing();
    let config = Config::builder().max_workers(4).build().unwrap();
    Registry::discover(&config).unwrap()
}

/// Registry whose only platform exposes a single CPU device.
pub fn cpu_only_registry() -> Registry {
    init_tracing();
    let config = Config::builder()
        .device_mix("cpu")
        .unwrap()
        .max_workers(2)
        .build()
        .unwrap();
    Registry::discover(&config).unwrap()
}

pub fn cpu_context(registry: &Registry) -> Context {
    Context::from_type(&registry.platforms()[0], DeviceType::Cpu).unwrap()
}

pub fn queue(context: &Context, profiling: bool) -> CommandQueue {
    let props = QueueProperties::new().profiling(profiling);
    CommandQueue::new(context, &context.devices()[0], props).unwrap()
}

pub const DECREMENT: &str = r#"
__kernel void decrement(__global const int *in, __global int *out) {
    size_t i = get_global_id(0);
    out[i] = in[i] - 1;
}
"#;

pub const IDENTITY: &str = r#"
__kernel void identity(__global const int *in, __global int *out, uint n) {
    size_t i = get_global_id(0);
    if (i < n) {
        out[i] = in[i];
    }
}
"#;
