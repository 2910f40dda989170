//! Bounded concurrent execution of independent tasks.
//!
//! At most `limit` futures run at once, each one under its own timeout, and the
//! whole batch under an overall deadline. Outcomes come back positionally: slot `i`
//! belongs to task `i`, and a failing task never cancels its siblings.

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};

#[derive(Debug)]
pub enum TaskOutcome<T, E> {
    Done(T),
    Failed(E),
    /// The task exceeded its own timeout
    TimedOut,
    /// The batch deadline passed before the task finished
    Skipped,
}

impl<T, E> TaskOutcome<T, E> {
    pub fn ok(self) -> Option<T> {
        match self {
            TaskOutcome::Done(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolLimits {
    pub concurrency: usize,
    pub per_task: Duration,
    pub overall: Duration,
}

pub async fn run_bounded<F, T, E>(tasks: Vec<F>, limits: PoolLimits) -> Vec<TaskOutcome<T, E>>
where
    F: Future<Output = Result<T, E>>,
{
    let total = tasks.len();
    let deadline = Instant::now() + limits.overall;
    let per_task = limits.per_task;

    let mut pending = stream::iter(tasks.into_iter().enumerate().map(|(i, task)| async move {
        let outcome = match timeout(per_task, task).await {
            Ok(Ok(v)) => TaskOutcome::Done(v),
            Ok(Err(e)) => TaskOutcome::Failed(e),
            Err(_) => TaskOutcome::TimedOut,
        };
        (i, outcome)
    }))
    .buffer_unordered(limits.concurrency.max(1));

    let mut slots: Vec<Option<TaskOutcome<T, E>>> = (0..total).map(|_| None).collect();
    loop {
        match timeout_at(deadline, pending.next()).await {
            Ok(Some((i, outcome))) => slots[i] = Some(outcome),
            Ok(None) => break,
            Err(_) => {
                log::warn!("Pool deadline reached, {} task(s) left unfinished", slots.iter().filter(|s| s.is_none()).count());
                break;
            }
        }
    }

    slots.into_iter().map(|s| s.unwrap_or(TaskOutcome::Skipped)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::sleep;

    fn limits(concurrency: usize, per_task_ms: u64, overall_ms: u64) -> PoolLimits {
        PoolLimits {
            concurrency,
            per_task: Duration::from_millis(per_task_ms),
            overall: Duration::from_millis(overall_ms),
        }
    }

    #[tokio::test]
    async fn results_are_positional_and_failures_isolated() {
        let tasks: Vec<_> = (0..5u64)
            .map(|i| async move {
                sleep(Duration::from_millis(20 * (5 - i))).await;
                if i == 2 { Err("boom") } else { Ok(i * 10) }
            })
            .collect();

        let out = run_bounded(tasks, limits(5, 1_000, 5_000)).await;
        assert!(matches!(out[0], TaskOutcome::Done(0)));
        assert!(matches!(out[2], TaskOutcome::Failed("boom")));
        assert!(matches!(out[4], TaskOutcome::Done(40)));
    }

    #[tokio::test]
    async fn per_task_timeout_does_not_cancel_siblings() {
        let tasks: Vec<_> = [10u64, 500, 10]
            .into_iter()
            .map(|ms| async move {
                sleep(Duration::from_millis(ms)).await;
                Ok::<_, ()>(ms)
            })
            .collect();

        let out = run_bounded(tasks, limits(3, 100, 5_000)).await;
        assert!(matches!(out[0], TaskOutcome::Done(10)));
        assert!(matches!(out[1], TaskOutcome::TimedOut));
        assert!(matches!(out[2], TaskOutcome::Done(10)));
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ()>(())
                }
            })
            .collect();

        let out = run_bounded(tasks, limits(2, 1_000, 5_000)).await;
        assert_eq!(out.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn overall_deadline_marks_remaining_as_skipped() {
        let tasks: Vec<_> = [10u64, 2_000]
            .into_iter()
            .map(|ms| async move {
                sleep(Duration::from_millis(ms)).await;
                Ok::<_, ()>(ms)
            })
            .collect();

        let out = run_bounded(tasks, limits(2, 5_000, 200)).await;
        assert!(matches!(out[0], TaskOutcome::Done(10)));
        assert!(matches!(out[1], TaskOutcome::Skipped));
    }
}
