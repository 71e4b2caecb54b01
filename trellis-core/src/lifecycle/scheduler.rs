//! Frame Scheduler
//!
//! The runtime is single-threaded and cooperative: all "concurrency" is
//! interleaving across asynchronous boundaries driven by a host event loop.
//! The host drives this scheduler by calling [`Scheduler::tick`] once per
//! frame; queued tasks run when their frame comes up. Delays are measured in
//! frames, which keeps lifecycle sequencing deterministic and testable.
//!
//! Persistent tasks (the dirty checker's poll loop) re-arm themselves after
//! every run until canceled.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Options for [`Scheduler::queue_task`].
#[derive(Debug, Clone, Copy)]
pub struct QueueTaskOptions {
    /// Frames to wait before the first run. Zero runs on the next tick.
    pub delay: u64,
    /// Re-arm after every run instead of completing.
    pub persistent: bool,
    /// Run ahead of ordinary tasks that are due the same tick.
    pub preempt: bool,
    /// Allow the scheduler to recycle the task slot once finished.
    pub reusable: bool,
}

impl Default for QueueTaskOptions {
    fn default() -> Self {
        Self {
            delay: 0,
            persistent: false,
            preempt: false,
            reusable: false,
        }
    }
}

/// Counter for generating unique task IDs.
static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A queued unit of work. Cancelable until it has run (persistent tasks are
/// cancelable between runs).
pub struct ScheduledTask {
    id: u64,
    callback: Mutex<Option<Box<dyn FnMut() + Send>>>,
    due_frame: AtomicU64,
    delay: u64,
    persistent: bool,
    preempt: bool,
    reusable: bool,
    canceled: AtomicBool,
    done: AtomicBool,
}

impl ScheduledTask {
    /// This task's unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Prevent any further runs.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    /// True once the task has run (non-persistent) or been canceled.
    pub fn done(&self) -> bool {
        self.done.load(Ordering::SeqCst) || self.canceled.load(Ordering::SeqCst)
    }

    /// True when the task was canceled before completing.
    pub fn canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

/// Frame-driven task queue.
pub struct Scheduler {
    frame: AtomicU64,
    queue: Mutex<Vec<Arc<ScheduledTask>>>,
    free: Mutex<Vec<Arc<ScheduledTask>>>,
}

impl Scheduler {
    /// Create a scheduler at frame zero.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            frame: AtomicU64::new(0),
            queue: Mutex::new(Vec::new()),
            free: Mutex::new(Vec::new()),
        })
    }

    /// The current frame number.
    pub fn current_frame(&self) -> u64 {
        self.frame.load(Ordering::SeqCst)
    }

    /// Queue `callback` to run after `options.delay` frames.
    pub fn queue_task(
        &self,
        callback: impl FnMut() + Send + 'static,
        options: QueueTaskOptions,
    ) -> Arc<ScheduledTask> {
        let now = self.current_frame();
        let due = if options.preempt { now } else { now + options.delay + 1 };

        // Recycle a finished reusable slot when one with matching flags is
        // available.
        let recycled = {
            let mut free = self.free.lock().expect("free list lock poisoned");
            free.iter()
                .position(|t| {
                    t.delay == options.delay
                        && t.persistent == options.persistent
                        && t.preempt == options.preempt
                })
                .map(|p| free.remove(p))
        };
        let task = match recycled {
            Some(task) => {
                *task.callback.lock().expect("task callback lock poisoned") =
                    Some(Box::new(callback));
                task.due_frame.store(due, Ordering::SeqCst);
                task.canceled.store(false, Ordering::SeqCst);
                task.done.store(false, Ordering::SeqCst);
                task
            }
            None => Arc::new(ScheduledTask {
                id: TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
                callback: Mutex::new(Some(Box::new(callback))),
                due_frame: AtomicU64::new(due),
                delay: options.delay,
                persistent: options.persistent,
                preempt: options.preempt,
                reusable: options.reusable,
                canceled: AtomicBool::new(false),
                done: AtomicBool::new(false),
            }),
        };

        self.queue
            .lock()
            .expect("scheduler queue lock poisoned")
            .push(task.clone());
        task
    }

    /// Advance one frame and run every due task.
    ///
    /// Preempting tasks due this frame run first. Tasks queued by callbacks
    /// run no earlier than the next tick.
    pub fn tick(&self) {
        let frame = self.frame.fetch_add(1, Ordering::SeqCst) + 1;

        let mut due: Vec<Arc<ScheduledTask>> = Vec::new();
        {
            let mut queue = self.queue.lock().expect("scheduler queue lock poisoned");
            queue.retain(|task| {
                if task.canceled.load(Ordering::SeqCst) {
                    return false;
                }
                if task.due_frame.load(Ordering::SeqCst) <= frame {
                    due.push(task.clone());
                    // Persistent tasks re-arm; others leave the queue.
                    if task.persistent {
                        task.due_frame.store(frame + task.delay + 1, Ordering::SeqCst);
                        true
                    } else {
                        false
                    }
                } else {
                    true
                }
            });
        }
        due.sort_by_key(|task| (!task.preempt, task.id));

        for task in due {
            if task.persistent {
                let mut callback = task.callback.lock().expect("task callback lock poisoned");
                if let Some(cb) = callback.as_mut() {
                    cb();
                }
            } else {
                let callback = task
                    .callback
                    .lock()
                    .expect("task callback lock poisoned")
                    .take();
                if let Some(mut cb) = callback {
                    cb();
                }
                task.done.store(true, Ordering::SeqCst);
                if task.reusable {
                    self.free
                        .lock()
                        .expect("free list lock poisoned")
                        .push(task);
                }
            }
        }
    }

    /// Tick `frames` times.
    pub fn run_frames(&self, frames: u64) {
        for _ in 0..frames {
            self.tick();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn task_runs_on_next_tick() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let task = scheduler.queue_task(
            move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            },
            QueueTaskOptions::default(),
        );

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        scheduler.tick();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(task.done());

        // One-shot: further ticks do nothing.
        scheduler.tick();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_postpones_the_first_run() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        scheduler.queue_task(
            move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            },
            QueueTaskOptions {
                delay: 2,
                ..Default::default()
            },
        );

        scheduler.run_frames(2);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        scheduler.tick();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn persistent_task_re_arms_until_canceled() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let task = scheduler.queue_task(
            move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            },
            QueueTaskOptions {
                delay: 1,
                persistent: true,
                ..Default::default()
            },
        );

        // Runs every second frame.
        scheduler.run_frames(6);
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        task.cancel();
        scheduler.run_frames(4);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn canceled_task_never_runs() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let task = scheduler.queue_task(
            move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            },
            QueueTaskOptions::default(),
        );
        task.cancel();
        scheduler.run_frames(3);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(task.done());
    }

    #[test]
    fn preempting_task_runs_ahead_of_ordinary_ones() {
        let scheduler = Scheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_a = order.clone();
        scheduler.queue_task(
            move || order_a.lock().unwrap().push("ordinary"),
            QueueTaskOptions::default(),
        );
        let order_b = order.clone();
        scheduler.queue_task(
            move || order_b.lock().unwrap().push("preempt"),
            QueueTaskOptions {
                preempt: true,
                ..Default::default()
            },
        );

        scheduler.tick();
        assert_eq!(*order.lock().unwrap(), vec!["preempt", "ordinary"]);
    }

    #[test]
    fn reusable_slot_is_recycled() {
        let scheduler = Scheduler::new();
        let first = scheduler.queue_task(
            || {},
            QueueTaskOptions {
                reusable: true,
                ..Default::default()
            },
        );
        scheduler.tick();
        assert!(first.done());

        let second = scheduler.queue_task(
            || {},
            QueueTaskOptions {
                reusable: true,
                ..Default::default()
            },
        );
        assert_eq!(first.id(), second.id());
        assert!(!second.done());
        scheduler.tick();
        assert!(second.done());
    }
}
