//! Timers for execution contexts.
//!
//! Delays elapse on a tokio runtime. Expired timer ids come back over an
//! unbounded channel and their callbacks run on the host thread when the
//! owning context drains them, so content never runs off its own thread.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::context::ExecutionContext;

pub type TimerId = u32;

/// Host work scheduled on a context's timeline.
pub type HostTask = Box<dyn FnOnce(&ExecutionContext)>;

/// Repeating timers never fire faster than this.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

enum TimerTask {
    Script,
    Host(HostTask),
}

struct TimerEntry {
    repeating: bool,
    task: TimerTask,
    join: Option<JoinHandle<()>>,
}

pub(super) enum Expired {
    Script(TimerId),
    Host(HostTask),
}

/// Runtime used when the host thread is not inside one. The host thread
/// must stay outside tokio for blocking reads, so this is the usual case.
fn shared_timer_runtime() -> Option<&'static Runtime> {
    static RUNTIME: OnceLock<Option<Runtime>> = OnceLock::new();
    RUNTIME
        .get_or_init(|| {
            Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("scorm-timers")
                .enable_time()
                .build()
                .map_err(|err| warn!(target: "quickjs", error = %err, "timer runtime unavailable"))
                .ok()
        })
        .as_ref()
}

fn timer_handle() -> Option<Handle> {
    Handle::try_current()
        .ok()
        .or_else(|| shared_timer_runtime().map(|runtime| runtime.handle().clone()))
}

pub(super) struct TimerRegistry {
    handle: Option<Handle>,
    next_id: Cell<TimerId>,
    timers: RefCell<HashMap<TimerId, TimerEntry>>,
    fired_tx: UnboundedSender<TimerId>,
    fired_rx: RefCell<UnboundedReceiver<TimerId>>,
}

impl TimerRegistry {
    pub(super) fn new() -> Self {
        let (fired_tx, fired_rx) = unbounded_channel();
        Self {
            handle: timer_handle(),
            next_id: Cell::new(1),
            timers: RefCell::new(HashMap::new()),
            fired_tx,
            fired_rx: RefCell::new(fired_rx),
        }
    }

    fn next_id(&self) -> TimerId {
        let id = self.next_id.get();
        self.next_id.set(id.wrapping_add(1).max(1));
        id
    }

    fn schedule(&self, delay: Duration, repeating: bool, task: TimerTask) -> TimerId {
        let id = self.next_id();
        let delay = if repeating { delay.max(MIN_INTERVAL) } else { delay };
        let join = match &self.handle {
            Some(handle) => {
                let fired = self.fired_tx.clone();
                Some(handle.spawn(async move {
                    loop {
                        sleep(delay).await;
                        if fired.send(id).is_err() || !repeating {
                            break;
                        }
                    }
                }))
            }
            None => {
                warn!(target: "quickjs", timer = id, "no timer runtime; timer will never fire");
                None
            }
        };
        self.timers.borrow_mut().insert(
            id,
            TimerEntry {
                repeating,
                task,
                join,
            },
        );
        id
    }

    /// Backing store for `setTimeout` / `setInterval`.
    pub(super) fn set_script_timer(&self, delay: Duration, repeating: bool) -> TimerId {
        self.schedule(delay, repeating, TimerTask::Script)
    }

    pub(super) fn set_host_timeout(&self, delay: Duration, task: HostTask) -> TimerId {
        self.schedule(delay, false, TimerTask::Host(task))
    }

    pub(super) fn clear(&self, id: TimerId) {
        if let Some(entry) = self.timers.borrow_mut().remove(&id) {
            if let Some(join) = entry.join {
                join.abort();
            }
        }
    }

    pub(super) fn clear_all(&self) {
        let cleared: Vec<TimerEntry> = self.timers.borrow_mut().drain().map(|(_, entry)| entry).collect();
        for entry in cleared {
            if let Some(join) = entry.join {
                join.abort();
            }
        }
        let mut fired = self.fired_rx.borrow_mut();
        while fired.try_recv().is_ok() {}
    }

    pub(super) fn pending(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Timers that fired since the last call. One-shot entries are removed
    /// here; ids cleared in the meantime are skipped.
    pub(super) fn take_expired(&self) -> Vec<Expired> {
        let mut ids = Vec::new();
        {
            let mut fired = self.fired_rx.borrow_mut();
            while let Ok(id) = fired.try_recv() {
                ids.push(id);
            }
        }

        let mut expired = Vec::with_capacity(ids.len());
        let mut timers = self.timers.borrow_mut();
        for id in ids {
            let repeating = match timers.get(&id) {
                Some(entry) => entry.repeating,
                None => continue,
            };
            if repeating {
                expired.push(Expired::Script(id));
            } else if let Some(entry) = timers.remove(&id) {
                expired.push(match entry.task {
                    TimerTask::Script => Expired::Script(id),
                    TimerTask::Host(task) => Expired::Host(task),
                });
            }
        }
        if !expired.is_empty() {
            debug!(target: "quickjs", fired = expired.len(), "timers expired");
        }
        expired
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.clear_all();
    }
}
