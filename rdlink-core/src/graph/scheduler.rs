//! Schedulers
//!
//! A scheduler decides where protocol housekeeping runs: applying values
//! received from the counterpart, recording out-of-sync models, and the
//! like. Every implementation runs queued tasks one at a time in the order
//! they were queued, so a node never observes reordered updates.
//!
//! Three flavours are provided:
//!
//! - [`SynchronousScheduler`] runs tasks inline on the queuing thread.
//!   This is the default.
//! - [`ManualScheduler`] holds tasks until the host pumps it. It also
//!   implements [`Pump`] so a [`Trigger`](crate::reactive::Trigger) wait
//!   can drive it.
//! - [`SerialScheduler`] hands tasks to a single tokio task.

use std::cell::Cell;
use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::config::ProtocolConfig;
use crate::reactive::Pump;

/// Unit of work queued on a scheduler.
pub type Task = Box<dyn FnOnce() + Send>;

/// Runs tasks sequentially, in queue order.
pub trait Scheduler: Send + Sync {
    /// Queue a task.
    fn queue(&self, task: Task);

    /// Whether the calling thread is currently running this scheduler's tasks.
    fn is_active(&self) -> bool;
}

/// Runs every task immediately on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SynchronousScheduler;

impl Scheduler for SynchronousScheduler {
    fn queue(&self, task: Task) {
        task();
    }

    fn is_active(&self) -> bool {
        true
    }
}

thread_local! {
    static MANUAL_ACTIVE: Cell<bool> = const { Cell::new(false) };
    static SERIAL_ACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// Resets a thread-local "active" flag on drop, including during unwinding.
struct ActiveFlag(&'static std::thread::LocalKey<Cell<bool>>);

impl ActiveFlag {
    fn enter(key: &'static std::thread::LocalKey<Cell<bool>>) -> Self {
        key.with(|active| active.set(true));
        Self(key)
    }
}

impl Drop for ActiveFlag {
    fn drop(&mut self) {
        self.0.with(|active| active.set(false));
    }
}

/// Holds tasks until [`ManualScheduler::run_pending`] is called.
pub struct ManualScheduler {
    tasks: Mutex<VecDeque<Task>>,
    pause: Duration,
}

impl ManualScheduler {
    pub fn new(pause: Duration) -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            pause,
        }
    }

    /// Pumps in slices of the configured `pump_pause_ms`.
    pub fn from_config(config: &ProtocolConfig) -> Self {
        Self::new(config.pump_pause())
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Run queued tasks, including ones queued while running, until the
    /// queue is empty. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let _active = ActiveFlag::enter(&MANUAL_ACTIVE);
        let mut ran = 0;
        loop {
            let task = self.tasks.lock().pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new(Duration::from_millis(10))
    }
}

impl Scheduler for ManualScheduler {
    fn queue(&self, task: Task) {
        self.tasks.lock().push_back(task);
    }

    fn is_active(&self) -> bool {
        MANUAL_ACTIVE.with(|active| active.get())
    }
}

impl Pump for ManualScheduler {
    fn pump(&self) {
        self.run_pending();
    }

    fn pause(&self) -> Duration {
        self.pause
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending())
            .field("pause", &self.pause)
            .finish()
    }
}

enum Job {
    Run(Task),
    Flush(oneshot::Sender<()>),
}

/// Runs tasks on one tokio task, strictly in queue order.
#[derive(Clone)]
pub struct SerialScheduler {
    sender: mpsc::UnboundedSender<Job>,
}

impl SerialScheduler {
    /// Start the worker task on the given runtime.
    pub fn spawn(handle: &Handle) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        handle.spawn(async move {
            while let Some(job) = receiver.recv().await {
                match job {
                    Job::Run(task) => {
                        let _active = ActiveFlag::enter(&SERIAL_ACTIVE);
                        task();
                    }
                    Job::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });
        Self { sender }
    }

    /// Wait until every task queued before this call has run.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(Job::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

impl Scheduler for SerialScheduler {
    fn queue(&self, task: Task) {
        if self.sender.send(Job::Run(task)).is_err() {
            warn!("serial scheduler worker is gone, dropping task");
        }
    }

    fn is_active(&self) -> bool {
        SERIAL_ACTIVE.with(|active| active.get())
    }
}

impl std::fmt::Debug for SerialScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialScheduler")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn synchronous_runs_inline() {
        let ran = Arc::new(Mutex::new(false));
        let ran_clone = ran.clone();
        SynchronousScheduler.queue(Box::new(move || *ran_clone.lock() = true));
        assert!(*ran.lock());
    }

    #[test]
    fn manual_holds_until_pumped() {
        let scheduler = Arc::new(ManualScheduler::default());
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let log = log.clone();
            scheduler.queue(Box::new(move || log.lock().push(i)));
        }
        assert_eq!(scheduler.pending(), 3);
        assert!(log.lock().is_empty());

        assert_eq!(scheduler.run_pending(), 3);
        assert_eq!(*log.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn manual_runs_tasks_queued_while_running() {
        let scheduler = Arc::new(ManualScheduler::default());
        let log = Arc::new(Mutex::new(Vec::new()));

        let inner_scheduler = scheduler.clone();
        let inner_log = log.clone();
        scheduler.queue(Box::new(move || {
            assert!(inner_scheduler.is_active());
            inner_log.lock().push("outer");
            let log = inner_log.clone();
            inner_scheduler.queue(Box::new(move || log.lock().push("nested")));
        }));

        assert_eq!(scheduler.run_pending(), 2);
        assert_eq!(*log.lock(), vec!["outer", "nested"]);
        assert!(!scheduler.is_active());
    }

    #[test]
    fn manual_pause_follows_config() {
        let config = ProtocolConfig {
            pump_pause_ms: 25,
            ..ProtocolConfig::default()
        };
        let scheduler = ManualScheduler::from_config(&config);
        assert_eq!(scheduler.pause(), Duration::from_millis(25));
    }

    #[tokio::test]
    async fn serial_preserves_order() {
        let scheduler = SerialScheduler::spawn(&Handle::current());
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let log = log.clone();
            scheduler.queue(Box::new(move || log.lock().push(i)));
        }
        scheduler.flush().await;

        assert_eq!(*log.lock(), (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn serial_marks_worker_active() {
        let scheduler = SerialScheduler::spawn(&Handle::current());
        let observed = Arc::new(Mutex::new(None));
        let observed_clone = observed.clone();
        let probe = scheduler.clone();

        scheduler.queue(Box::new(move || {
            *observed_clone.lock() = Some(probe.is_active());
        }));
        scheduler.flush().await;

        assert_eq!(*observed.lock(), Some(true));
        assert!(!scheduler.is_active());
    }
}
