use crate::context::{Context, ContextId};
use crate::error::{Error, Result};
use crate::profiling::{self, Timeline};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    NdRangeKernel,
    ReadBuffer,
    WriteBuffer,
    CopyBuffer,
    Marker,
    User,
}

/// Execution status of a command. `Complete` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventStatus {
    Queued,
    Submitted,
    Running,
    Complete,
    Failed,
}

impl EventStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Complete | EventStatus::Failed)
    }
}

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct EventState {
    status: EventStatus,
    error: Option<Error>,
    timeline: Timeline,
    on_complete: Vec<Callback>,
}

struct EventInner {
    id: EventId,
    command_type: CommandType,
    context: ContextId,
    profiling: bool,
    state: Mutex<EventState>,
    done: Condvar,
}

/// Completion token of one enqueued command.
///
/// Cheap to clone. Pass events in a `wait_for` list to order commands,
/// within one queue or across queues of the same context.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    pub(crate) fn new(command_type: CommandType, context: ContextId, profiling: bool) -> Self {
        let now = profiling::now_ns();
        Self {
            inner: Arc::new(EventInner {
                id: EventId(NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed)),
                command_type,
                context,
                profiling,
                state: Mutex::new(EventState {
                    status: EventStatus::Queued,
                    error: None,
                    timeline: Timeline {
                        queued: now,
                        ..Timeline::default()
                    },
                    on_complete: Vec::new(),
                }),
                done: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> EventId {
        self.inner.id
    }

    pub fn command_type(&self) -> CommandType {
        self.inner.command_type
    }

    pub fn status(&self) -> EventStatus {
        self.inner.state.lock().status
    }

    /// Whether the command has finished, successfully or not.
    pub fn is_complete(&self) -> bool {
        self.status().is_terminal()
    }

    pub(crate) fn context_id(&self) -> ContextId {
        self.inner.context
    }

    /// Block until the command finishes. Returns the command's failure,
    /// if any.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        while !state.status.is_terminal() {
            self.inner.done.wait(&mut state);
        }
        match &state.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Timestamps of the command. Waits for it to finish first.
    pub fn profiling_info(&self) -> Result<Timeline> {
        if !self.inner.profiling {
            return Err(Error::ProfilingUnavailable);
        }
        self.wait()?;
        Ok(self.inner.state.lock().timeline)
    }

    /// Timestamps as recorded so far, whatever the queue's profiling mode.
    #[cfg_attr(not(feature = "telemetry"), allow(dead_code))]
    pub(crate) fn timestamps(&self) -> Timeline {
        self.inner.state.lock().timeline
    }

    pub(crate) fn mark_submitted(&self) {
        let mut state = self.inner.state.lock();
        if state.status == EventStatus::Queued {
            state.status = EventStatus::Submitted;
            state.timeline.submitted = profiling::now_ns().max(state.timeline.queued);
        }
    }

    pub(crate) fn mark_running(&self) {
        let mut state = self.inner.state.lock();
        if !state.status.is_terminal() {
            state.status = EventStatus::Running;
            state.timeline.start = profiling::now_ns().max(state.timeline.submitted);
        }
    }

    /// Record the outcome and wake every waiter. Only the first call has
    /// an effect.
    pub(crate) fn complete(&self, result: Result<()>) {
        self.finish(result, None);
    }

    /// Like [`Event::complete`], with the execution time the device
    /// measured. `end` is then `start` plus that time, never past now.
    pub(crate) fn finish(&self, result: Result<()>, device_ns: Option<u64>) {
        let mut state = self.inner.state.lock();
        if state.status.is_terminal() {
            return;
        }

        let now = profiling::now_ns();
        let started = state.status == EventStatus::Running;
        let t = &mut state.timeline;
        t.submitted = t.submitted.max(t.queued);
        if !started {
            t.start = now.max(t.submitted);
        }
        t.end = match device_ns {
            Some(ns) => t.start.saturating_add(ns).min(now).max(t.start),
            None => now.max(t.start),
        };

        match result {
            Ok(()) => state.status = EventStatus::Complete,
            Err(err) => {
                state.status = EventStatus::Failed;
                state.error = Some(err);
            }
        }
        let callbacks = std::mem::take(&mut state.on_complete);
        drop(state);
        self.inner.done.notify_all();

        for callback in callbacks {
            callback();
        }
    }

    /// Run `f` once the event is terminal; right away if it already is.
    pub(crate) fn on_complete<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.status.is_terminal() {
            drop(state);
            f();
        } else {
            state.on_complete.push(Box::new(f));
        }
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Event {}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.inner.id)
            .field("command", &self.inner.command_type)
            .field("status", &self.status())
            .finish()
    }
}

/// Block until every event has finished. Returns the first failure in list
/// order after all of them are done.
pub fn wait_for_events(events: &[Event]) -> Result<()> {
    let mut first = None;
    for event in events {
        if let Err(err) = event.wait() {
            first.get_or_insert(err);
        }
    }
    first.map_or(Ok(()), Err)
}

/// Wait on a command's dependencies, turning a failed dependency into a
/// failure of the dependent command.
pub(crate) fn wait_dependencies(events: &[Event]) -> Result<()> {
    for event in events {
        if let Err(err) = event.wait() {
            return Err(Error::execution(format!(
                "dependency {:?} failed: {}",
                event.id(),
                err
            )));
        }
    }
    Ok(())
}

/// Event completed by the host rather than a queue. Useful for holding
/// back commands until the host is ready.
#[derive(Debug, Clone)]
pub struct UserEvent {
    event: Event,
}

impl UserEvent {
    pub fn new(context: &Context) -> Self {
        let event = Event::new(CommandType::User, context.id(), false);
        event.mark_submitted();
        Self { event }
    }

    /// The event to put in `wait_for` lists.
    pub fn event(&self) -> Event {
        self.event.clone()
    }

    pub fn set_complete(&self) {
        self.event.complete(Ok(()));
    }

    /// Fail the event; commands waiting on it fail too.
    pub fn set_failed<S: Into<String>>(&self, reason: S) {
        self.event.complete(Err(Error::execution(reason.into())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::platform::{DeviceType, Registry};
    use std::thread;
    use std::time::Duration;

    fn context() -> Context {
        let registry = Registry::discover(&Config::default()).unwrap();
        Context::from_type(&registry.platforms()[0], DeviceType::Cpu).unwrap()
    }

    #[test]
    fn test_lifecycle_timestamps() {
        let ctx = context();
        let event = Event::new(CommandType::Marker, ctx.id(), true);
        assert_eq!(event.status(), EventStatus::Queued);

        event.mark_submitted();
        event.mark_running();
        assert_eq!(event.status(), EventStatus::Running);
        event.complete(Ok(()));

        let t = event.profiling_info().unwrap();
        assert!(t.queued <= t.submitted && t.submitted <= t.start && t.start <= t.end);
        assert!(event.is_complete());
    }

    #[test]
    fn test_device_time_bounds_end() {
        let ctx = context();
        let event = Event::new(CommandType::NdRangeKernel, ctx.id(), true);
        event.mark_submitted();
        event.mark_running();
        thread::sleep(Duration::from_millis(5));
        event.finish(Ok(()), Some(1_000));

        let t = event.profiling_info().unwrap();
        assert_eq!(t.end - t.start, 1_000);
    }

    #[test]
    fn test_on_complete_runs_once_terminal() {
        let ctx = context();
        let event = Event::new(CommandType::Marker, ctx.id(), false);
        let hits = Arc::new(AtomicU64::new(0));

        let h = hits.clone();
        event.on_complete(move || {
            h.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(hits.load(Ordering::Relaxed), 0);

        event.complete(Ok(()));
        let h = hits.clone();
        event.on_complete(move || {
            h.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(hits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_profiling_disabled() {
        let ctx = context();
        let event = Event::new(CommandType::Marker, ctx.id(), false);
        event.complete(Ok(()));
        assert_eq!(event.profiling_info().unwrap_err(), Error::ProfilingUnavailable);
    }

    #[test]
    fn test_user_event_releases_waiter() {
        let ctx = context();
        let user = UserEvent::new(&ctx);
        let event = user.event();

        let waiter = thread::spawn(move || event.wait());
        thread::sleep(Duration::from_millis(20));
        user.set_complete();
        assert!(waiter.join().unwrap().is_ok());

        user.set_failed("too late");
        assert_eq!(user.event().status(), EventStatus::Complete);
    }

    #[test]
    fn test_failed_dependency_propagates() {
        let ctx = context();
        let user = UserEvent::new(&ctx);
        user.set_failed("cancelled");

        let err = wait_dependencies(&[user.event()]).unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed(ref m) if m.contains("cancelled")));
        assert!(wait_for_events(&[user.event()]).is_err());
    }
}
