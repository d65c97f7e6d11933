use std::sync::atomic::{AtomicBool, Ordering};

use error_stack::{IntoReport, ResultExt};
use parking_lot::Mutex;

use crate::Error;

/// Default thread count to use if we aren't able to determine
/// the number of cores.
const DEFAULT_THREAD_COUNT: usize = 8;

/// A pool of worker threads executing independent tasks.
///
/// Threads are spawned for each call to [WorkerPool::run_tasks] and joined
/// before it returns, so no task outlives the call.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    name: String,
    threads: usize,
}

impl WorkerPool {
    /// Create a worker pool with one thread per core.
    ///
    /// Args:
    ///   name: Used as the prefix of the worker thread names and in the
    ///     tracing spans for each worker thread.
    pub fn new(name: impl Into<String>) -> Self {
        let threads = core_affinity::get_core_ids()
            .as_ref()
            .map(Vec::len)
            .unwrap_or_else(|| {
                tracing::info!(
                    "No cores retrieved. Assuming default ({DEFAULT_THREAD_COUNT}) thread count"
                );
                DEFAULT_THREAD_COUNT
            });
        Self::with_threads(name, threads)
    }

    /// Create a worker pool with the given number of threads (at least one).
    pub fn with_threads(name: impl Into<String>, threads: usize) -> Self {
        Self {
            name: name.into(),
            threads: threads.max(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `f` on each task, returning the results in task order.
    ///
    /// Tasks are claimed by workers in order. After the first task fails no
    /// further tasks are started; tasks already running are completed. The
    /// first failure is reported as [Error::Task] with the task's report as
    /// its cause.
    pub fn run_tasks<T, R, E, F>(&self, tasks: Vec<T>, f: F) -> error_stack::Result<Vec<R>, Error>
    where
        T: Send,
        R: Send,
        E: error_stack::Context,
        F: Fn(usize, T) -> error_stack::Result<R, E> + Sync,
    {
        let count = tasks.len();
        if count == 0 {
            return Ok(Vec::new());
        }

        let queue = Mutex::new(tasks.into_iter().enumerate());
        let results: Mutex<Vec<Option<R>>> = Mutex::new((0..count).map(|_| None).collect());
        let failure: Mutex<Option<error_stack::Report<Error>>> = Mutex::new(None);
        let aborted = AtomicBool::new(false);
        let threads = self.threads.min(count);

        tracing::debug!(
            "Running {count} tasks on {threads} threads of pool '{}'",
            self.name
        );

        let joined: error_stack::Result<(), Error> = std::thread::scope(|scope| {
            let (queue, results, failure, aborted, f) = (&queue, &results, &failure, &aborted, &f);

            let spawned: Vec<_> = (0..threads)
                .map(|index| {
                    let span = tracing::info_span!("worker", pool = %self.name, index);
                    std::thread::Builder::new()
                        .name(format!("{}-{index}", self.name))
                        .spawn_scoped(scope, move || {
                            let _enter = span.enter();
                            loop {
                                if aborted.load(Ordering::Acquire) {
                                    tracing::debug!("Stopping worker {index} after failure");
                                    break;
                                }
                                let Some((task_index, task)) = queue.lock().next() else {
                                    break;
                                };

                                tracing::trace!("Worker {index} running task {task_index}");
                                match f(task_index, task) {
                                    Ok(result) => results.lock()[task_index] = Some(result),
                                    Err(report) => {
                                        aborted.store(true, Ordering::Release);
                                        let mut failure = failure.lock();
                                        if failure.is_none() {
                                            *failure = Some(
                                                report
                                                    .change_context(Error::Task { index: task_index }),
                                            );
                                        }
                                    }
                                }
                            }
                        })
                        .into_report()
                        .change_context(Error::SpawnWorker)
                })
                .collect();

            let mut panicked = false;
            let mut spawn_error = None;
            for handle in spawned {
                match handle {
                    Ok(handle) => panicked |= handle.join().is_err(),
                    Err(report) => {
                        aborted.store(true, Ordering::Release);
                        spawn_error.get_or_insert(report);
                    }
                }
            }

            if let Some(report) = spawn_error {
                return Err(report);
            }
            error_stack::ensure!(!panicked, Error::WorkerPanicked);
            Ok(())
        });
        joined?;

        if let Some(report) = failure.into_inner() {
            return Err(report);
        }

        results
            .into_inner()
            .into_iter()
            .collect::<Option<Vec<R>>>()
            .ok_or_else(|| error_stack::report!(Error::WorkerPanicked))
    }

    /// Run `f` on each task, discarding the (unit) results.
    pub fn for_each<T, E, F>(&self, tasks: Vec<T>, f: F) -> error_stack::Result<(), Error>
    where
        T: Send,
        E: error_stack::Context,
        F: Fn(usize, T) -> error_stack::Result<(), E> + Sync,
    {
        self.run_tasks(tasks, f)?;
        Ok(())
    }
}
