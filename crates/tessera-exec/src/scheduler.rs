//! Task-parallel execution of per-block work.
//!
//! A [`Task`] is the handle a stage receives: it can [`spawn`](Task::spawn) independent units of
//! work, or [`spawn_task`](Task::spawn_task) child tasks that spawn further units. A
//! [`TaskChain`] runs stages in order, and stage N+1 starts only once every unit spawned
//! (transitively) by stage N has finished.
//!
//! Units return [`ExecResult`]. The first error recorded by any unit stops the chain at the next
//! barrier and is returned to the caller; units that start after a failure skip their work.

use crate::error::{ExecError, ExecResult};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use rayon::{Scope, ThreadPool};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Worker threads. `None` uses the available parallelism.
    pub num_threads: Option<usize>,
}

impl SchedulerOptions {
    /// Read `TESSERA_NUM_THREADS`, then `RAYON_NUM_THREADS`.
    pub fn from_env() -> Self {
        let num_threads = ["TESSERA_NUM_THREADS", "RAYON_NUM_THREADS"]
            .iter()
            .find_map(|key| {
                std::env::var(key)
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .filter(|&n| n > 0)
            });
        Self { num_threads }
    }

    #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
    fn desired_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn build_pool(options: &SchedulerOptions) -> Option<ThreadPool> {
    let requested = options.desired_threads().max(1);
    let try_build = |n| {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .thread_name(|i| format!("tessera-worker-{i}"))
            .build()
    };

    match try_build(requested) {
        Ok(pool) => Some(pool),
        Err(_) if requested > 1 => try_build(1).ok(),
        Err(_) => None,
    }
}

/// Runs stages of block-parallel work.
///
/// Owns a dedicated thread pool when one can be built; otherwise every unit runs inline on the
/// calling thread with the same results.
pub struct Scheduler {
    #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
    pool: Option<ThreadPool>,
}

impl Scheduler {
    pub fn new(options: SchedulerOptions) -> Self {
        #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
        {
            let pool = build_pool(&options);
            match &pool {
                Some(pool) => {
                    log::debug!("scheduler pool with {} threads", pool.current_num_threads())
                }
                None => log::warn!("could not build a worker pool; running units inline"),
            }
            Self { pool }
        }
        #[cfg(not(all(feature = "parallel", not(target_arch = "wasm32"))))]
        {
            let _ = options;
            Self {}
        }
    }

    /// A scheduler that never leaves the calling thread.
    pub fn inline() -> Self {
        Self {
            #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
            pool: None,
        }
    }

    pub fn is_parallel(&self) -> bool {
        #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
        {
            self.pool.is_some()
        }
        #[cfg(not(all(feature = "parallel", not(target_arch = "wasm32"))))]
        {
            false
        }
    }

    /// Run one stage and wait for every unit it spawned.
    pub fn run<'env, F>(&self, stage: F) -> ExecResult<()>
    where
        F: for<'a> FnOnce(&Task<'a, 'env>) -> ExecResult<()> + Send + 'env,
    {
        let first_error: Arc<OnceLock<ExecError>> = Arc::new(OnceLock::new());

        #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
        if let Some(pool) = &self.pool {
            let slot = Arc::clone(&first_error);
            pool.scope(move |scope| {
                let task = Task {
                    spawner: Spawner::Scoped(scope),
                    first_error: slot,
                };
                task.run_unit(stage);
            });
            return first_error.get().cloned().map_or(Ok(()), Err);
        }

        let task = Task {
            spawner: Spawner::Inline(PhantomData),
            first_error: Arc::clone(&first_error),
        };
        task.run_unit(stage);
        first_error.get().cloned().map_or(Ok(()), Err)
    }

    /// Run `chain` stage by stage, stopping at the first barrier that observes an error.
    pub fn run_chain<'env>(&self, chain: TaskChain<'env>) -> ExecResult<()> {
        let stages = chain.stages.len();
        for (idx, stage) in chain.stages.into_iter().enumerate() {
            log::trace!("running stage {} of {}", idx + 1, stages);
            self.run(move |task| stage(task))?;
        }
        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerOptions::default())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("parallel", &self.is_parallel())
            .finish()
    }
}

enum Spawner<'a, 'env> {
    #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
    Scoped(&'a Scope<'env>),
    Inline(PhantomData<(&'a (), &'env ())>),
}

/// Handle for spawning parallel units of work inside a stage.
pub struct Task<'a, 'env> {
    spawner: Spawner<'a, 'env>,
    first_error: Arc<OnceLock<ExecError>>,
}

impl<'a, 'env> Task<'a, 'env> {
    /// Spawn one unit of work. Siblings run in no particular order.
    pub fn spawn<F>(&self, unit: F)
    where
        F: FnOnce() -> ExecResult<()> + Send + 'env,
    {
        self.spawn_task(move |_| unit());
    }

    /// Spawn a child task, which may spawn units of its own.
    pub fn spawn_task<F>(&self, unit: F)
    where
        F: for<'b> FnOnce(&Task<'b, 'env>) -> ExecResult<()> + Send + 'env,
    {
        let first_error = Arc::clone(&self.first_error);
        match &self.spawner {
            #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
            Spawner::Scoped(scope) => scope.spawn(move |scope| {
                let child = Task {
                    spawner: Spawner::Scoped(scope),
                    first_error,
                };
                child.run_unit(unit);
            }),
            Spawner::Inline(_) => {
                let child = Task {
                    spawner: Spawner::Inline(PhantomData),
                    first_error,
                };
                child.run_unit(unit);
            }
        }
    }

    /// Whether some unit of the current stage already failed.
    pub fn is_aborted(&self) -> bool {
        self.first_error.get().is_some()
    }

    fn run_unit<F>(&self, unit: F)
    where
        F: FnOnce(&Task<'a, 'env>) -> ExecResult<()>,
    {
        if self.is_aborted() {
            return;
        }
        if let Err(err) = unit(self) {
            if let Err(dropped) = self.first_error.set(err) {
                log::trace!("unit failed after the first error: {dropped}");
            }
        }
    }
}

type Stage<'env> = Box<dyn for<'a> FnOnce(&Task<'a, 'env>) -> ExecResult<()> + Send + 'env>;

/// Stages separated by barriers.
pub struct TaskChain<'env> {
    stages: Vec<Stage<'env>>,
}

impl<'env> TaskChain<'env> {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn then<F>(mut self, stage: F) -> Self
    where
        F: for<'a> FnOnce(&Task<'a, 'env>) -> ExecResult<()> + Send + 'env,
    {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl Default for TaskChain<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// One write-once result slot per block (or per batch), filled during fan-out and drained by the
/// fan-in stage.
pub(crate) struct Slots<T> {
    slots: Vec<Mutex<Option<T>>>,
}

impl<T> Slots<T> {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| Mutex::new(None)).collect(),
        }
    }

    pub(crate) fn put(&self, idx: usize, value: T) {
        if let Some(slot) = self.slots.get(idx) {
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
        }
    }

    /// Drain every slot in order; an unfilled slot is reported by index.
    pub(crate) fn take_all(&self) -> ExecResult<Vec<T>> {
        self.slots
            .iter()
            .enumerate()
            .map(|(block, slot)| {
                slot.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take()
                    .ok_or(ExecError::MissingBlockResult { block })
            })
            .collect()
    }
}
