//! Execution of independent per-tile tasks
//!
//! Tasks are identified by their position in the submitted list. Outcomes
//! are collected into a map keyed by that id, so every reduction over them
//! is independent of completion order.
//!
//! Under [`FailurePolicy::Abort`] a batch stops starting new tasks once
//! any task has failed. Tasks already running finish; the batch error is
//! the failure with the lowest id among the tasks that ran.

use crate::types::{CanopyError, CanopyResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

pub type TaskId = usize;

/// What a batch does when one of its tasks fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// The first failure (lowest task id) fails the whole batch
    #[default]
    Abort,
    /// Failed tasks are logged, reported and left out of the result
    SkipAndContinue,
}

/// A task that failed under [`FailurePolicy::SkipAndContinue`]
#[derive(Debug)]
pub struct TaskFailure {
    pub id: TaskId,
    pub error: CanopyError,
}

/// Successful outcomes by task id plus the failures that were skipped
#[derive(Debug)]
pub struct Settled<R> {
    pub completed: BTreeMap<TaskId, R>,
    pub failures: Vec<TaskFailure>,
}

/// Run `run` over every task on the rayon pool
#[cfg(feature = "parallel")]
pub fn execute<T, R, F>(tasks: &[T], run: F) -> BTreeMap<TaskId, CanopyResult<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> CanopyResult<R> + Sync + Send,
{
    use rayon::prelude::*;
    tasks
        .par_iter()
        .enumerate()
        .map(|(id, task)| (id, run(task)))
        .collect()
}

/// Run `run` over every task sequentially
#[cfg(not(feature = "parallel"))]
pub fn execute<T, R, F>(tasks: &[T], run: F) -> BTreeMap<TaskId, CanopyResult<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> CanopyResult<R> + Sync + Send,
{
    tasks
        .iter()
        .enumerate()
        .map(|(id, task)| (id, run(task)))
        .collect()
}

/// Apply a failure policy to collected outcomes, walking them in id order
pub fn settle<R>(
    outcomes: BTreeMap<TaskId, CanopyResult<R>>,
    policy: FailurePolicy,
) -> CanopyResult<Settled<R>> {
    let mut completed = BTreeMap::new();
    let mut failures = Vec::new();

    for (id, outcome) in outcomes {
        match outcome {
            Ok(result) => {
                completed.insert(id, result);
            }
            Err(error) => match policy {
                FailurePolicy::Abort => return Err(error),
                FailurePolicy::SkipAndContinue => {
                    log::warn!("Skipping task {}: {}", id, error);
                    failures.push(TaskFailure { id, error });
                }
            },
        }
    }

    Ok(Settled { completed, failures })
}

/// Run every task and settle the outcomes under `policy`, stopping early
/// under [`FailurePolicy::Abort`]
pub fn run_tasks<T, R, F>(tasks: &[T], policy: FailurePolicy, run: F) -> CanopyResult<Settled<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> CanopyResult<R> + Sync + Send,
{
    let outcomes = match policy {
        FailurePolicy::SkipAndContinue => execute(tasks, run),
        FailurePolicy::Abort => {
            let failed = AtomicBool::new(false);
            let attempted = execute(tasks, |task| {
                if failed.load(Ordering::Relaxed) {
                    return Ok(None);
                }
                let outcome = run(task);
                if outcome.is_err() {
                    failed.store(true, Ordering::Relaxed);
                }
                outcome.map(Some)
            });

            let outcomes: BTreeMap<TaskId, CanopyResult<R>> = attempted
                .into_iter()
                .filter_map(|(id, outcome)| outcome.transpose().map(|outcome| (id, outcome)))
                .collect();
            if outcomes.len() < tasks.len() {
                log::warn!(
                    "Aborting batch: {} of {} tasks were not started",
                    tasks.len() - outcomes.len(),
                    tasks.len()
                );
            }
            outcomes
        }
    };
    settle(outcomes, policy)
}

/// Run `op` on a dedicated pool of `num_threads` workers, or on the
/// global pool when `None`
#[cfg(feature = "parallel")]
pub fn with_threads<R, OP>(num_threads: Option<usize>, op: OP) -> CanopyResult<R>
where
    R: Send,
    OP: FnOnce() -> R + Send,
{
    match num_threads {
        Some(threads) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| CanopyError::Processing(format!("Failed to build thread pool: {}", e)))?;
            Ok(pool.install(op))
        }
        None => Ok(op()),
    }
}

#[cfg(not(feature = "parallel"))]
pub fn with_threads<R, OP>(_num_threads: Option<usize>, op: OP) -> CanopyResult<R>
where
    R: Send,
    OP: FnOnce() -> R + Send,
{
    Ok(op())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_or_fail(value: &u64) -> CanopyResult<u64> {
        if *value % 5 == 4 {
            Err(CanopyError::Processing(format!("task {} failed", value)))
        } else {
            Ok(value * value)
        }
    }

    #[test]
    fn test_execute_keys_by_task_id() {
        let tasks: Vec<u64> = (0..100).collect();
        let outcomes = execute(&tasks, |v| Ok(v * 2));
        assert_eq!(outcomes.len(), 100);
        for (id, outcome) in outcomes {
            assert_eq!(outcome.unwrap(), id as u64 * 2);
        }
    }

    #[test]
    fn test_abort_returns_lowest_failure() {
        let tasks: Vec<u64> = (0..20).collect();
        let result = settle(execute(&tasks, square_or_fail), FailurePolicy::Abort);
        match result {
            Err(CanopyError::Processing(msg)) => assert_eq!(msg, "task 4 failed"),
            other => panic!("unexpected outcome: {:?}", other.map(|s| s.completed.len())),
        }
    }

    #[test]
    fn test_skip_and_continue_reports_failures() {
        let tasks: Vec<u64> = (0..20).collect();
        let settled = settle(execute(&tasks, square_or_fail), FailurePolicy::SkipAndContinue).unwrap();
        assert_eq!(settled.completed.len(), 16);
        let failed: Vec<TaskId> = settled.failures.iter().map(|f| f.id).collect();
        assert_eq!(failed, vec![4, 9, 14, 19]);
        assert_eq!(settled.completed[&3], 9);
    }

    #[test]
    fn test_abort_stops_starting_tasks() {
        let started = std::sync::atomic::AtomicUsize::new(0);
        let tasks: Vec<u64> = (0..200).collect();
        let result = with_threads(Some(2), || {
            run_tasks(&tasks, FailurePolicy::Abort, |v| {
                started.fetch_add(1, Ordering::SeqCst);
                if *v == 0 {
                    Err(CanopyError::Processing("first task failed".to_string()))
                } else {
                    std::thread::sleep(std::time::Duration::from_millis(1));
                    Ok(*v)
                }
            })
        })
        .unwrap();

        assert!(matches!(result, Err(CanopyError::Processing(_))));
        assert!(started.load(Ordering::SeqCst) < tasks.len());
    }

    #[test]
    fn test_run_tasks_skip_runs_everything() {
        let started = std::sync::atomic::AtomicUsize::new(0);
        let tasks: Vec<u64> = (0..20).collect();
        let settled = run_tasks(&tasks, FailurePolicy::SkipAndContinue, |v| {
            started.fetch_add(1, Ordering::SeqCst);
            square_or_fail(v)
        })
        .unwrap();

        assert_eq!(started.load(Ordering::SeqCst), 20);
        assert_eq!(settled.completed.len(), 16);
        assert_eq!(settled.failures.len(), 4);
    }

    #[test]
    fn test_with_threads_runs_op() {
        let sum = with_threads(Some(2), || {
            let tasks: Vec<u64> = (1..=10).collect();
            execute(&tasks, |v| Ok(*v))
                .into_values()
                .map(|r| r.unwrap())
                .sum::<u64>()
        })
        .unwrap();
        assert_eq!(sum, 55);
    }
}
