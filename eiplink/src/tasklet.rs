//! Cooperative scheduler. Registered tasklets are stepped in list order by a
//! fixed pool of worker threads; a step either reschedules or completes,
//! and completed tasklets are unlinked and dropped. Step functions must not
//! block; socket work is non-blocking and suspends by rescheduling.

use lazy_static::lazy_static;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::Duration;

/// Worker pool size. One thread as shipped; the scheduler itself is
/// pool-capable.
const POOL_SIZE: usize = 1;

/// Sleep between passes once the list has been exhausted.
const IDLE_SLEEP: Duration = Duration::from_millis(500);

#[derive(Debug, Eq, PartialEq)]
pub enum Step {
    /// Leave the tasklet in the list; it will be stepped again.
    Reschedule,
    /// Unlink the tasklet and drop it along with its owned state.
    Done,
}

type StepFn = Box<dyn FnMut() -> Step + Send>;

/// A registered unit of cooperative work. The `run` mutex doubles as the
/// per-tasklet lock: a worker steps the tasklet only while holding it, so a
/// step function never runs re-entrantly.
pub struct Tasklet {
    run: Mutex<StepFn>,
    done: AtomicBool,
}

impl Tasklet {
    #[inline]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

pub type TaskletHandle = Arc<Tasklet>;

pub(crate) struct Scheduler {
    tasklets: Mutex<Vec<TaskletHandle>>,
}

impl Scheduler {
    pub(crate) fn new() -> Scheduler {
        Scheduler {
            tasklets: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn register(&self, step: StepFn) -> TaskletHandle {
        let tasklet = Arc::new(Tasklet {
            run: Mutex::new(step),
            done: AtomicBool::new(false),
        });

        self.tasklets
            .lock()
            .expect("Tasklet list lock poisoned")
            .push(tasklet.clone());

        tasklet
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.tasklets.lock().expect("Tasklet list lock poisoned").len()
    }

    /// One pass over the list: step every tasklet whose lock can be taken,
    /// then sweep out the completed ones.
    pub(crate) fn run_pass(&self) {
        let snapshot: Vec<TaskletHandle> = self
            .tasklets
            .lock()
            .expect("Tasklet list lock poisoned")
            .clone();

        for tasklet in &snapshot {
            if tasklet.is_done() {
                continue;
            }

            // Skip tasklets currently being stepped by another worker.
            if let Ok(mut run) = tasklet.run.try_lock() {
                if let Step::Done = (run)() {
                    tasklet.done.store(true, Ordering::Release);
                }
            }
        }

        self.tasklets
            .lock()
            .expect("Tasklet list lock poisoned")
            .retain(|t| !t.is_done());
    }
}

lazy_static! {
    static ref SCHEDULER: Scheduler = Scheduler::new();
}

static POOL_INIT: Once = Once::new();

/// Register a tasklet on the global scheduler, lazily spawning the worker
/// pool on first use. The returned handle can be kept for introspection; it
/// does not keep the tasklet scheduled past a `Step::Done`.
pub fn spawn<F>(step: F) -> TaskletHandle
where
    F: FnMut() -> Step + Send + 'static,
{
    init_pool();
    SCHEDULER.register(Box::new(step))
}

fn init_pool() {
    POOL_INIT.call_once(|| {
        for idx in 0..POOL_SIZE {
            thread::Builder::new()
                .name(format!("eiplink-tasklet-{}", idx))
                .spawn(runner)
                .expect("Failed to spawn tasklet worker");
        }
    });
}

fn runner() {
    loop {
        SCHEDULER.run_pass();
        thread::sleep(IDLE_SLEEP);
    }
}
