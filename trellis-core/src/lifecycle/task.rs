//! Lifecycle Tasks
//!
//! Bind/attach/detach/unbind steps on nested controllers may themselves be
//! deferred (a nested template's own bind can be scheduled on a later frame),
//! and the framework must sequence them deterministically without blocking a
//! call stack. A [`LifecycleTask`] wraps one such possibly-deferred step with
//! exactly one terminal outcome.
//!
//! Four compositions cover the lifecycle graph:
//!
//! - [`LifecycleTask::deferred`]: run a step when the scheduler reaches it.
//! - [`LifecycleTask::continue_with`]: run a step after an antecedent
//!   completes; the step may itself return a further task.
//! - [`LifecycleTask::all`]: complete when every antecedent has completed.
//! - [`LifecycleTask::all_then`]: aggregate, then one more step.
//!
//! Cancellation is best-effort and pre-start only: a canceled task resolves
//! without running its step, but once the step has begun executing the
//! transition must not be abandoned and `cancel` is a no-op.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::scheduler::{QueueTaskOptions, Scheduler};

struct TaskState {
    done: AtomicBool,
    started: AtomicBool,
    canceled: AtomicBool,
    continuations: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl TaskState {
    fn pending() -> Arc<Self> {
        Arc::new(Self {
            done: AtomicBool::new(false),
            started: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
            continuations: Mutex::new(Vec::new()),
        })
    }

    fn complete(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        let continuations = {
            let mut guard = self
                .continuations
                .lock()
                .expect("continuation lock poisoned");
            std::mem::take(&mut *guard)
        };
        for continuation in continuations {
            continuation();
        }
    }
}

/// A composable, cancelable representation of one possibly-deferred
/// lifecycle step.
#[derive(Clone)]
pub struct LifecycleTask {
    inner: Arc<TaskState>,
}

impl LifecycleTask {
    fn pending() -> Self {
        Self {
            inner: TaskState::pending(),
        }
    }

    /// A task that already completed. Used for synchronous lifecycle steps.
    pub fn finished() -> Self {
        let task = Self::pending();
        task.inner.complete();
        task
    }

    /// Queue `step` on the scheduler; the task completes once it has run.
    pub fn deferred(scheduler: &Scheduler, step: impl FnOnce() + Send + 'static) -> Self {
        let task = Self::pending();
        let inner = task.inner.clone();
        let mut step = Some(step);
        scheduler.queue_task(
            move || {
                if inner.canceled.load(Ordering::SeqCst) {
                    return;
                }
                inner.started.store(true, Ordering::SeqCst);
                if let Some(step) = step.take() {
                    step();
                }
                inner.complete();
            },
            QueueTaskOptions::default(),
        );
        task
    }

    /// Run `step` after this task completes. The step may return a further
    /// task, in which case the continuation completes only when that inner
    /// task does.
    pub fn continue_with(
        &self,
        step: impl FnOnce() -> Option<LifecycleTask> + Send + 'static,
    ) -> LifecycleTask {
        let next = Self::pending();
        let next_inner = next.inner.clone();
        let mut step = Some(step);
        self.on_complete(Box::new(move || {
            if next_inner.canceled.load(Ordering::SeqCst) {
                return;
            }
            next_inner.started.store(true, Ordering::SeqCst);
            let follow = step.take().and_then(|step| step());
            match follow {
                Some(inner_task) => {
                    let next_inner = next_inner.clone();
                    inner_task.on_complete(Box::new(move || next_inner.complete()));
                }
                None => next_inner.complete(),
            }
        }));
        next
    }

    /// Complete when every antecedent has completed.
    pub fn all(tasks: &[LifecycleTask]) -> LifecycleTask {
        let pending: Vec<&LifecycleTask> = tasks.iter().filter(|t| !t.done()).collect();
        if pending.is_empty() {
            return Self::finished();
        }
        let aggregate = Self::pending();
        let remaining = Arc::new(AtomicUsize::new(pending.len()));
        for task in pending {
            let inner = aggregate.inner.clone();
            let remaining = remaining.clone();
            task.on_complete(Box::new(move || {
                if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                    inner.complete();
                }
            }));
        }
        aggregate
    }

    /// Complete every antecedent, then run one more step.
    pub fn all_then(
        tasks: &[LifecycleTask],
        step: impl FnOnce() -> Option<LifecycleTask> + Send + 'static,
    ) -> LifecycleTask {
        Self::all(tasks).continue_with(step)
    }

    /// True once the task has reached its terminal outcome.
    pub fn done(&self) -> bool {
        self.inner.done.load(Ordering::SeqCst)
    }

    /// True once the wrapped step has begun executing.
    pub fn has_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// True while `cancel` would still take effect.
    pub fn can_cancel(&self) -> bool {
        !self.has_started() && !self.done()
    }

    /// Cancel the task if its step has not begun.
    ///
    /// A canceled task resolves immediately without running its step, so
    /// downstream continuations still settle. Once the step has started this
    /// is a no-op: partially-applied lifecycle transitions are never
    /// abandoned.
    pub fn cancel(&self) {
        if !self.can_cancel() {
            return;
        }
        self.inner.canceled.store(true, Ordering::SeqCst);
        self.inner.complete();
    }

    /// True when the task was canceled before its step started.
    pub fn canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::SeqCst)
    }

    /// Drive the scheduler until this task completes or `frame_budget` runs
    /// out. Returns whether the task completed.
    pub fn wait(&self, scheduler: &Scheduler, frame_budget: u64) -> bool {
        let mut remaining = frame_budget;
        while !self.done() && remaining > 0 {
            scheduler.tick();
            remaining -= 1;
        }
        self.done()
    }

    fn on_complete(&self, continuation: Box<dyn FnOnce() + Send>) {
        {
            let mut guard = self
                .inner
                .continuations
                .lock()
                .expect("continuation lock poisoned");
            if !self.done() {
                guard.push(continuation);
                return;
            }
        }
        // Already settled: run the continuation directly.
        continuation();
    }
}
