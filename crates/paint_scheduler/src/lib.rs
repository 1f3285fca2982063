use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};

use log::{debug, info, warn};
use render_protocol::CancelListener;

mod queue;

pub use queue::pick_next;

pub const DEFAULT_WORKER_THREAD_NAME: &str = "paint_worker";

/// A unit of work for the paint worker. `priority` is read on every scan, so it
/// may change while the operation waits in the queue.
pub trait QueuedOperation: Send + Sync + 'static {
    /// Lower runs first; negative runs immediately.
    fn priority(&self) -> i32;
    fn run(&self);
}

#[derive(Debug)]
pub enum SchedulerError {
    ShutDown,
    Spawn(std::io::Error),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::ShutDown => write!(formatter, "paint scheduler is shut down"),
            SchedulerError::Spawn(error) => {
                write!(formatter, "failed to spawn paint worker thread: {error}")
            }
        }
    }
}

impl std::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SchedulerError::Spawn(error) => Some(error),
            SchedulerError::ShutDown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CancelOutcome {
    /// Queued operations removed without running.
    pub removed: usize,
    /// True when the call blocked until a matching running operation finished.
    pub waited: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    pub queued: usize,
    pub running: bool,
    pub completed: u64,
    pub panicked: u64,
}

struct QueueState<Op> {
    queue: Vec<Arc<Op>>,
    running: Option<Arc<Op>>,
    running_serial: u64,
    completed_serial: u64,
    panicked: u64,
    cancel_waiting: bool,
    shutdown: bool,
}

struct Shared<Op> {
    state: Mutex<QueueState<Op>>,
    signal: Condvar,
    listener: Option<Arc<dyn CancelListener>>,
}

impl<Op> Shared<Op> {
    fn lock(&self) -> MutexGuard<'_, QueueState<Op>> {
        self.state.lock().expect("paint queue lock poisoned")
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, QueueState<Op>>) -> MutexGuard<'a, QueueState<Op>> {
        self.signal.wait(guard).expect("paint queue lock poisoned")
    }
}

/// Single background worker draining a priority-ordered queue.
pub struct PaintScheduler<Op: QueuedOperation> {
    shared: Arc<Shared<Op>>,
    worker_id: ThreadId,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<Op: QueuedOperation> fmt::Debug for PaintScheduler<Op> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PaintScheduler")
            .field("worker_id", &self.worker_id)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<Op: QueuedOperation> PaintScheduler<Op> {
    /// Spawns the worker. `listener` hears both ends of every synchronous
    /// cancellation so it can unblock the running operation.
    pub fn start(
        thread_name: &str,
        listener: Option<Arc<dyn CancelListener>>,
    ) -> Result<Self, SchedulerError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                queue: Vec::new(),
                running: None,
                running_serial: 0,
                completed_serial: 0,
                panicked: 0,
                cancel_waiting: false,
                shutdown: false,
            }),
            signal: Condvar::new(),
            listener,
        });
        let worker_shared = Arc::clone(&shared);
        let join_handle = thread::Builder::new()
            .name(thread_name.to_owned())
            .spawn(move || worker_loop(worker_shared))
            .map_err(SchedulerError::Spawn)?;
        let worker_id = join_handle.thread().id();
        info!("paint worker '{thread_name}' started");
        Ok(Self {
            shared,
            worker_id,
            join_handle: Mutex::new(Some(join_handle)),
        })
    }

    pub fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    /// Queues `operation`. Never blocks on the worker.
    pub fn schedule(&self, operation: Op) -> Result<(), SchedulerError> {
        let mut state = self.shared.lock();
        if state.shutdown {
            return Err(SchedulerError::ShutDown);
        }
        state.queue.push(Arc::new(operation));
        self.shared.signal.notify_all();
        Ok(())
    }

    /// Removes every queued operation matching `predicate`. When the running
    /// operation matches and `wait_for_running` is set, blocks until it has
    /// finished; the listener is told before the wait starts and after it ends.
    /// Waiting is skipped when called from the worker itself.
    pub fn cancel<F>(&self, predicate: F, wait_for_running: bool) -> CancelOutcome
    where
        F: Fn(&Op) -> bool,
    {
        let mut state = self.shared.lock();
        let (removed, kept): (Vec<Arc<Op>>, Vec<Arc<Op>>) = std::mem::take(&mut state.queue)
            .into_iter()
            .partition(|operation| predicate(operation));
        state.queue = kept;

        let running_matches = state
            .running
            .as_ref()
            .is_some_and(|operation| predicate(operation));
        let mut waited = false;
        if running_matches && wait_for_running {
            if self.is_worker_thread() {
                warn!("paint operation tried to cancel itself synchronously; not waiting");
            } else {
                let target = state.running_serial;
                state.cancel_waiting = true;
                if let Some(listener) = &self.shared.listener {
                    listener.cancel_wait_started();
                }
                while state.completed_serial < target {
                    state = self.shared.wait(state);
                }
                waited = true;
            }
        }
        drop(state);

        let outcome = CancelOutcome {
            removed: removed.len(),
            waited,
        };
        drop(removed);
        if outcome.removed > 0 || outcome.waited {
            debug!(
                "cancelled {} queued paint operations (waited: {})",
                outcome.removed, outcome.waited
            );
        }
        outcome
    }

    /// Blocks until the queue is empty and nothing is running.
    pub fn flush(&self) {
        let mut state = self.shared.lock();
        while !state.shutdown
            && (!state.queue.is_empty()
                || state.running.is_some()
                || state.completed_serial < state.running_serial)
        {
            state = self.shared.wait(state);
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.shared.lock();
        SchedulerStats {
            queued: state.queue.len(),
            running: state.running.is_some(),
            completed: state.completed_serial,
            panicked: state.panicked,
        }
    }

    /// Stops the worker after its current operation and discards queued work.
    pub fn shutdown(&self) {
        let discarded = {
            let mut state = self.shared.lock();
            state.shutdown = true;
            self.shared.signal.notify_all();
            std::mem::take(&mut state.queue)
        };
        if !discarded.is_empty() {
            debug!("discarding {} queued paint operations", discarded.len());
        }
        drop(discarded);

        let join_handle = self
            .join_handle
            .lock()
            .expect("paint worker handle lock poisoned")
            .take();
        if let Some(join_handle) = join_handle {
            if self.is_worker_thread() {
                warn!("paint worker asked to join itself; detaching");
                return;
            }
            join_handle.join().expect("join paint worker thread");
            info!("paint worker stopped");
        }
    }
}

impl<Op: QueuedOperation> Drop for PaintScheduler<Op> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop<Op: QueuedOperation>(shared: Arc<Shared<Op>>) {
    loop {
        let operation = {
            let mut state = shared.lock();
            loop {
                if state.shutdown {
                    return;
                }
                if let Some(index) = pick_next(&state.queue, |operation| operation.priority()) {
                    let operation = state.queue.remove(index);
                    state.running = Some(Arc::clone(&operation));
                    state.running_serial += 1;
                    break operation;
                }
                state = shared.wait(state);
            }
        };

        let result = catch_unwind(AssertUnwindSafe(|| operation.run()));
        drop(operation);

        let mut state = shared.lock();
        // The operation's drop side effects are visible once `running` clears.
        drop(state.running.take());
        state.completed_serial = state.running_serial;
        if let Err(payload) = result {
            state.panicked += 1;
            warn!("paint operation panicked: {}", panic_message(payload.as_ref()));
        }
        if std::mem::take(&mut state.cancel_waiting) {
            if let Some(listener) = &shared.listener {
                listener.cancel_wait_finished();
            }
        }
        shared.signal.notify_all();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

static_assertions::assert_obj_safe!(QueuedOperation);
