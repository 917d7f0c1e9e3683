//! Command queues.
//!
//! A queue feeds one device of a context. Every `enqueue_*` call validates
//! its inputs synchronously, then returns an [`Event`] right away while the
//! command runs in the background. Execution failures do not surface at
//! enqueue time; they show up at a synchronization point: [`Event::wait`],
//! [`CommandQueue::finish`], a blocking read, or a profiling query.
//!
//! An in-order queue runs its commands one after another, in submission
//! order, on a dedicated engine thread. An out-of-order queue hands each
//! command to a fixed set of engine threads once its `wait_for` list is
//! satisfied, so a command held back by a dependency never occupies an
//! engine. Queues never order each other's commands except through
//! `wait_for`.

mod command;
mod event;
mod work_shape;

pub use command::CopyEndpoint;
pub use event::{wait_for_events, CommandType, Event, EventId, EventStatus, UserEvent};
pub use work_shape::NdRange;

use crate::context::{Context, ContextShared};
use crate::error::{Error, Result};
use crate::kernel::KernelInvocation;
use crate::memory::Buffer;
use crate::platform::Device;
use bytemuck::Pod;
use command::Command;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(u64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueProperties {
    /// Record command timestamps.
    pub profiling: bool,
    /// Start commands as soon as their dependencies allow.
    pub out_of_order: bool,
}

impl QueueProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profiling(mut self, enable: bool) -> Self {
        self.profiling = enable;
        self
    }

    pub fn out_of_order(mut self, enable: bool) -> Self {
        self.out_of_order = enable;
        self
    }
}

struct Job {
    command: Command,
    event: Event,
    wait_for: Vec<Event>,
}

/// State the background threads need to run commands.
struct Engine {
    #[cfg_attr(not(feature = "telemetry"), allow(dead_code))]
    context: Arc<ContextShared>,
    device: Device,
}

impl Engine {
    fn start(self: &Arc<Self>, name: String, jobs: Receiver<Job>) -> Result<()> {
        let engine = Arc::clone(self);
        thread::Builder::new()
            .name(name)
            .spawn(move || {
                for job in jobs {
                    engine.run(job);
                }
            })
            .map(drop)
            .map_err(|e| Error::executor(format!("failed to start queue engine: {}", e)))
    }

    fn run(&self, job: Job) {
        job.event.mark_submitted();

        let result = event::wait_dependencies(&job.wait_for).and_then(|()| {
            job.event.mark_running();
            job.command.execute(&self.device)
        });
        let device_ns = result.as_ref().ok().copied().flatten();
        let result = result.map(drop);

        let result = result.map_err(|err| match err {
            Error::ExecutionFailed(_) => err,
            other => Error::execution(other.to_string()),
        });

        match &result {
            Ok(()) => tracing::trace!(
                event = ?job.event.id(),
                command = %job.command.describe(),
                "command complete"
            ),
            Err(err) => tracing::warn!(
                event = ?job.event.id(),
                command = %job.command.describe(),
                error = %err,
                "command failed"
            ),
        }

        // Counters must be current once waiters wake.
        #[cfg(feature = "telemetry")]
        self.record(&job, result.is_err(), device_ns);

        job.event.finish(result, device_ns);
    }

    #[cfg(feature = "telemetry")]
    fn record(&self, job: &Job, failed: bool, device_ns: Option<u64>) {
        let metrics = &self.context.metrics;
        if failed {
            metrics.record_failure();
            return;
        }
        match &job.command {
            Command::Kernel { .. } => {
                let elapsed = device_ns.unwrap_or_else(|| {
                    crate::profiling::now_ns().saturating_sub(job.event.timestamps().start)
                });
                metrics.record_kernel(elapsed);
            }
            Command::Marker => {}
            other => metrics.record_copy(other.bytes()),
        }
    }
}

struct QueueInner {
    id: QueueId,
    context: Arc<ContextShared>,
    device: Device,
    properties: QueueProperties,
    sender: Sender<Job>,
    /// Unfinished commands. Held while submitting, which also fixes the
    /// submission order of an in-order queue.
    outstanding: Mutex<Vec<Event>>,
}

/// Ordered stream of commands for one device.
pub struct CommandQueue {
    inner: Arc<QueueInner>,
}

impl CommandQueue {
    /// Queue on `device`, which must be part of `context`.
    pub fn new(context: &Context, device: &Device, properties: QueueProperties) -> Result<Self> {
        if !context.contains(device) {
            return Err(Error::InvalidDevice(format!(
                "device '{}' is not part of context {:?}",
                device.name(),
                context.id()
            )));
        }
        if properties.profiling && !device.capabilities().profiling {
            return Err(Error::InvalidDevice(format!(
                "device '{}' cannot record command timestamps",
                device.name()
            )));
        }

        let id = QueueId(NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed));
        let engine = Arc::new(Engine {
            context: Arc::clone(&context.shared),
            device: device.clone(),
        });

        let engines = if properties.out_of_order {
            device.queue_engines()
        } else {
            1
        };
        let (sender, jobs) = unbounded::<Job>();
        for n in 0..engines {
            engine.start(format!("{}-q{}-{}", device.thread_name(), id.0, n), jobs.clone())?;
        }
        tracing::debug!(
            queue = ?id,
            device = device.name(),
            profiling = properties.profiling,
            out_of_order = properties.out_of_order,
            engines,
            "created command queue"
        );

        Ok(Self {
            inner: Arc::new(QueueInner {
                id,
                context: Arc::clone(&context.shared),
                device: device.clone(),
                properties,
                sender,
                outstanding: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn id(&self) -> QueueId {
        self.inner.id
    }

    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    pub fn properties(&self) -> QueueProperties {
        self.inner.properties
    }

    /// Copy between a buffer and host memory, or between two buffers.
    ///
    /// Host data is read at enqueue time; host memory written by the copy
    /// holds the result once the returned event completes.
    pub fn enqueue_copy<D, S>(&self, dst: D, src: S, wait_for: &[Event]) -> Result<Event>
    where
        D: Into<CopyEndpoint>,
        S: Into<CopyEndpoint>,
    {
        let command = Command::copy(dst.into(), src.into())?;
        self.submit(command, wait_for)
    }

    /// Write `data` to the start of `buffer`. The data is captured before
    /// this returns.
    pub fn enqueue_write<T: Pod>(&self, buffer: &Buffer, data: &[T], wait_for: &[Event]) -> Result<Event> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() > buffer.size() {
            return Err(Error::InvalidCopy(format!(
                "{} bytes do not fit buffer of {} bytes",
                bytes.len(),
                buffer.size()
            )));
        }
        self.submit(
            Command::Write {
                dst: buffer.clone(),
                data: bytes.to_vec(),
            },
            wait_for,
        )
    }

    /// Blocking read of the start of `buffer` into `out`.
    pub fn read_buffer<T: Pod>(&self, buffer: &Buffer, out: &mut [T], wait_for: &[Event]) -> Result<()> {
        let len = std::mem::size_of_val(out);
        if len > buffer.size() {
            return Err(Error::InvalidCopy(format!(
                "{} bytes requested from buffer of {} bytes",
                len,
                buffer.size()
            )));
        }

        let staging = Arc::new(RwLock::new(vec![0u8; len]));
        let event = self.submit(
            Command::Read {
                dst: staging.clone(),
                src: buffer.clone(),
                bytes: len,
            },
            wait_for,
        )?;
        event.wait()?;

        let bytes: &mut [u8] = bytemuck::cast_slice_mut(out);
        bytes.copy_from_slice(&staging.read());
        Ok(())
    }

    /// Launch `invocation` over `global` work-items, optionally in
    /// work-groups of shape `local`.
    pub fn enqueue_kernel(
        &self,
        invocation: &KernelInvocation,
        global: &[usize],
        local: Option<&[usize]>,
        wait_for: &[Event],
    ) -> Result<Event> {
        let mut range = NdRange::new(global)?;
        if let Some(local) = local {
            range = range.with_local(local)?;
        }
        self.enqueue_nd_range(invocation, &range, wait_for)
    }

    /// Launch `invocation` over `range`.
    ///
    /// Argument bindings are snapshotted here; changing them afterwards does
    /// not affect this launch.
    pub fn enqueue_nd_range(
        &self,
        invocation: &KernelInvocation,
        range: &NdRange,
        wait_for: &[Event],
    ) -> Result<Event> {
        let program = invocation.program();
        self.inner.context.ensure_same(program.context(), "program")?;
        if !program.is_built_for(&self.inner.device) {
            return Err(Error::InvalidDevice(format!(
                "program was not built for device '{}'",
                self.inner.device.name()
            )));
        }

        let geometry = range.resolve(self.inner.device.max_work_group_size())?;
        let launch = invocation.snapshot()?;

        tracing::debug!(
            queue = ?self.inner.id,
            kernel = invocation.name(),
            global = ?range.global(),
            local = ?&geometry.local[..range.dims()],
            "enqueue kernel"
        );

        self.submit(Command::Kernel { launch, geometry }, wait_for)
    }

    /// A command that completes once its dependencies have. With an empty
    /// `wait_for` it waits for every command enqueued before it.
    pub fn enqueue_marker(&self, wait_for: &[Event]) -> Result<Event> {
        self.submit(Command::Marker, wait_for)
    }

    /// Block until every command enqueued so far has finished. Returns the
    /// first failure among them.
    pub fn finish(&self) -> Result<()> {
        let pending: Vec<Event> = self.inner.outstanding.lock().clone();
        let result = wait_for_events(&pending);
        self.inner
            .outstanding
            .lock()
            .retain(|e| !pending.contains(e) && e.status() != EventStatus::Complete);
        result
    }

    /// Commands are handed to the device when enqueued, so there is nothing
    /// to flush.
    pub fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn submit(&self, command: Command, wait_for: &[Event]) -> Result<Event> {
        for buffer in command.buffers() {
            buffer.ensure_live()?;
            self.inner.context.ensure_same(&buffer.shared.context, "buffer")?;
        }
        if let Some(foreign) = wait_for.iter().find(|e| e.context_id() != self.inner.context.id) {
            return Err(Error::ContextMismatch(format!(
                "event {:?} belongs to another context",
                foreign.id()
            )));
        }

        // Failed events stay until `finish` has reported them.
        let mut outstanding = self.inner.outstanding.lock();
        outstanding.retain(|e| e.status() != EventStatus::Complete);

        let mut wait_for = wait_for.to_vec();
        if self.inner.properties.out_of_order && matches!(command, Command::Marker) && wait_for.is_empty() {
            wait_for = outstanding.clone();
        }

        let event = Event::new(command.command_type(), self.inner.context.id, self.inner.properties.profiling);
        let job = Job {
            command,
            event: event.clone(),
            wait_for,
        };

        if self.inner.properties.out_of_order {
            dispatch_when_ready(self.inner.sender.clone(), job);
        } else {
            self.inner
                .sender
                .send(job)
                .map_err(|_| Error::executor("queue engine has stopped"))?;
        }

        outstanding.push(event.clone());
        Ok(event)
    }
}

/// Send `job` to the engines once every event it waits for is terminal.
fn dispatch_when_ready(sender: Sender<Job>, job: Job) {
    let pending: Vec<Event> = job.wait_for.iter().filter(|e| !e.is_complete()).cloned().collect();
    if pending.is_empty() {
        send_job(&sender, job);
        return;
    }

    let remaining = Arc::new(AtomicUsize::new(pending.len()));
    let slot = Arc::new(Mutex::new(Some((sender, job))));
    for dep in pending {
        let remaining = Arc::clone(&remaining);
        let slot = Arc::clone(&slot);
        dep.on_complete(move || {
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                if let Some((sender, job)) = slot.lock().take() {
                    send_job(&sender, job);
                }
            }
        });
    }
}

fn send_job(sender: &Sender<Job>, job: Job) {
    if let Err(err) = sender.send(job) {
        err.into_inner()
            .event
            .complete(Err(Error::executor("queue engine has stopped")));
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("id", &self.inner.id)
            .field("device", &self.inner.device.name())
            .field("properties", &self.inner.properties)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::memory::{AccessMode, HostArray};
    use crate::platform::{DeviceType, Registry};
    use crate::program::Program;

    fn setup() -> (Registry, Context) {
        let registry = Registry::discover(&Config::default()).unwrap();
        let ctx = Context::from_type(&registry.platforms()[0], DeviceType::Cpu).unwrap();
        (registry, ctx)
    }

    #[test]
    fn test_write_then_read() {
        let (_registry, ctx) = setup();
        let queue = CommandQueue::new(&ctx, &ctx.devices()[0], QueueProperties::new()).unwrap();
        let buf = Buffer::new::<i32>(&ctx, AccessMode::ReadWrite, 4).unwrap();

        let write = queue.enqueue_write(&buf, &[1i32, 2, 3, 4], &[]).unwrap();
        let mut out = [0i32; 4];
        queue.read_buffer(&buf, &mut out, &[write]).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn test_copy_into_host_array() {
        let (_registry, ctx) = setup();
        let queue = CommandQueue::new(&ctx, &ctx.devices()[0], QueueProperties::new()).unwrap();
        let buf = Buffer::from_slice(&ctx, AccessMode::ReadWrite, &[7u16, 8, 9]).unwrap();
        let host = HostArray::<u16>::zeros(2);

        let event = queue.enqueue_copy(&host, &buf, &[]).unwrap();
        event.wait().unwrap();
        assert_eq!(event.command_type(), CommandType::ReadBuffer);
        assert_eq!(host.to_vec(), vec![7, 8]);
    }

    #[test]
    fn test_foreign_device_rejected() {
        let (registry, ctx) = setup();
        let gpu = registry.platforms()[0].devices_of_type(DeviceType::Gpu).remove(0);
        let err = CommandQueue::new(&ctx, &gpu, QueueProperties::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidDevice(_)));
    }

    #[test]
    fn test_kernel_fault_surfaces_at_finish() {
        let (_registry, ctx) = setup();
        let queue = CommandQueue::new(&ctx, &ctx.devices()[0], QueueProperties::new()).unwrap();
        let program = Program::build(
            &ctx,
            "kernel void k(__global int *o, int d) { o[get_global_id(0)] = 10 / d; }",
        )
        .unwrap();
        let out = Buffer::new::<i32>(&ctx, AccessMode::ReadWrite, 4).unwrap();

        let mut inv = program.entry_point("k").unwrap();
        inv.set_args(&[(&out).into(), 0i32.into()]).unwrap();
        let event = queue.enqueue_kernel(&inv, &[4], None, &[]).unwrap();

        let err = queue.finish().unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed(ref m) if m.contains("division by zero")));
        assert_eq!(event.status(), EventStatus::Failed);
        assert!(queue.finish().is_ok());
    }

    #[test]
    fn test_out_of_order_gated_commands_leave_engines_free() {
        let registry = Registry::discover(&Config::builder().queue_engines(2).build().unwrap()).unwrap();
        let ctx = Context::from_type(&registry.platforms()[0], DeviceType::Cpu).unwrap();
        let queue = CommandQueue::new(&ctx, &ctx.devices()[0], QueueProperties::new().out_of_order(true)).unwrap();
        let gate = UserEvent::new(&ctx);
        let buf = Buffer::new::<u32>(&ctx, AccessMode::ReadWrite, 1).unwrap();

        let gated: Vec<Event> = (0..2_000u32)
            .map(|i| queue.enqueue_write(&buf, &[i], &[gate.event()]).unwrap())
            .collect();

        let free = queue.enqueue_write(&buf, &[7u32], &[]).unwrap();
        free.wait().unwrap();
        assert!(gated.iter().all(|e| e.status() == EventStatus::Queued));

        gate.set_complete();
        queue.finish().unwrap();
        assert!(gated.iter().all(|e| e.status() == EventStatus::Complete));
    }

    #[test]
    fn test_out_of_order_failed_dependency_dispatches() {
        let (_registry, ctx) = setup();
        let queue = CommandQueue::new(&ctx, &ctx.devices()[0], QueueProperties::new().out_of_order(true)).unwrap();
        let gate = UserEvent::new(&ctx);

        let marker = queue.enqueue_marker(&[gate.event()]).unwrap();
        gate.set_failed("cancelled");
        let err = marker.wait().unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed(ref m) if m.contains("cancelled")));
    }

    #[test]
    fn test_out_of_order_marker_waits_for_all() {
        let (_registry, ctx) = setup();
        let props = QueueProperties::new().out_of_order(true).profiling(true);
        let queue = CommandQueue::new(&ctx, &ctx.devices()[0], props).unwrap();
        let gate = UserEvent::new(&ctx);
        let buf = Buffer::new::<u8>(&ctx, AccessMode::ReadWrite, 16).unwrap();

        let write = queue.enqueue_write(&buf, &[1u8; 16], &[gate.event()]).unwrap();
        let marker = queue.enqueue_marker(&[]).unwrap();
        assert!(!marker.is_complete());

        gate.set_complete();
        marker.wait().unwrap();
        assert!(write.is_complete());

        let w = write.profiling_info().unwrap();
        let m = marker.profiling_info().unwrap();
        assert!(m.start >= w.end);
    }
}
