//! Worker pool and task router.
//!
//! Each worker owns an unbounded channel and a shared in-flight counter;
//! dispatch routes to the worker with the fewest pending tasks. Replies
//! travel over per-task channels, so a [`TaskHandle`] behaves like a
//! future the caller can block on. A crashed worker drops its queue,
//! which drops every queued job's reply sender and thereby rejects each
//! waiting handle exactly once; the router never retries on its own.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use thiserror::Error;

use crate::{
    state::EngineShared,
    tasks::{execute, TaskOutput, TaskSpec},
};

/// Infrastructure failure surfaced to a dispatcher. Validation outcomes
/// never take this path.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("worker pool unavailable: task {0} could not be serviced")]
    WorkerLost(u64),
    #[error("task {task_id} panicked on worker {worker}")]
    TaskPanicked { task_id: u64, worker: usize },
}

/// Future-like handle for one dispatched task. Dropping it abandons the
/// task: it still runs to completion, the result is simply discarded.
pub struct TaskHandle {
    task_id: u64,
    receiver: Receiver<Result<TaskOutput, DispatchError>>,
}

impl TaskHandle {
    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    /// Block until the task finishes. A closed channel means the worker
    /// died before replying.
    pub fn wait(self) -> Result<TaskOutput, DispatchError> {
        match self.receiver.recv() {
            Ok(result) => result,
            Err(_) => Err(DispatchError::WorkerLost(self.task_id)),
        }
    }
}

struct Job {
    task_id: u64,
    spec: TaskSpec,
    reply: Sender<Result<TaskOutput, DispatchError>>,
    // Decremented exactly once when the job leaves the system, whether
    // executed, failed, or dropped with a dead worker's queue.
    pending: PendingGuard,
}

struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

struct Worker {
    sender: Sender<Job>,
    pending: Arc<AtomicUsize>,
    thread: Option<JoinHandle<()>>,
}

/// Fixed pool of worker threads sharing the engine state by reference.
pub struct WorkerPool {
    workers: Vec<Worker>,
    next_task_id: AtomicU64,
}

/// Default worker count: logical cores minus one for the orchestrator,
/// never below one.
pub fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

impl WorkerPool {
    pub fn new(shared: Arc<EngineShared>, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let (sender, receiver) = unbounded::<Job>();
            let pending = Arc::new(AtomicUsize::new(0));
            let shared = Arc::clone(&shared);
            let thread = thread::Builder::new()
                .name(format!("map-worker-{worker_id}"))
                .spawn(move || run_worker(worker_id, shared, receiver))
                .expect("failed to spawn worker thread");
            workers.push(Worker {
                sender,
                pending,
                thread: Some(thread),
            });
        }
        log::info!("worker pool started with {worker_count} threads");
        Self {
            workers,
            next_task_id: AtomicU64::new(1),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Current in-flight counts, mainly for tests and diagnostics.
    pub fn pending_counts(&self) -> Vec<usize> {
        self.workers
            .iter()
            .map(|w| w.pending.load(Ordering::Acquire))
            .collect()
    }

    /// Route a task to the least-loaded worker.
    pub fn dispatch(&self, spec: TaskSpec) -> TaskHandle {
        let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = bounded(1);

        let target = self
            .workers
            .iter()
            .enumerate()
            .min_by_key(|(_, w)| w.pending.load(Ordering::Acquire))
            .map(|(idx, _)| idx);

        if let Some(idx) = target {
            let worker = &self.workers[idx];
            worker.pending.fetch_add(1, Ordering::AcqRel);
            log::debug!("task {task_id} ({}) -> worker {idx}", spec.name());
            let job = Job {
                task_id,
                spec,
                reply: reply_tx,
                pending: PendingGuard(Arc::clone(&worker.pending)),
            };
            if let Err(err) = worker.sender.send(job) {
                // Worker thread is gone; the returned job drops here and
                // the caller's handle rejects on wait.
                log::error!("task {task_id} lost: worker {idx} unavailable: {err}");
            }
        }

        TaskHandle {
            task_id,
            receiver: reply_rx,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &mut self.workers {
            // Closing the channel lets the thread drain and exit.
            let (closed, _) = unbounded();
            worker.sender = closed;
        }
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

fn run_worker(worker_id: usize, shared: Arc<EngineShared>, receiver: Receiver<Job>) {
    for job in receiver {
        let Job {
            task_id,
            spec,
            reply,
            pending,
        } = job;
        let outcome = catch_unwind(AssertUnwindSafe(|| execute(&shared, &spec)));
        let result = match outcome {
            Ok(output) => Ok(output),
            Err(_) => {
                log::error!("task {task_id} panicked on worker {worker_id}");
                Err(DispatchError::TaskPanicked {
                    task_id,
                    worker: worker_id,
                })
            }
        };
        // The in-flight count must drop before the caller can observe
        // the reply.
        drop(pending);
        // A dropped handle is an abandoned task; discarding is correct.
        let _ = reply.send(result);
    }
    log::debug!("worker {worker_id} shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::grid::YBand;

    fn pool(workers: usize) -> (Arc<EngineShared>, WorkerPool) {
        let shared = Arc::new(EngineShared::new(EngineConfig {
            grid_size: 32,
            max_factions: 16,
            ..EngineConfig::default()
        }));
        let pool = WorkerPool::new(Arc::clone(&shared), workers);
        (shared, pool)
    }

    #[test]
    fn dispatch_round_trips_a_result() {
        let (_shared, pool) = pool(2);
        let handle = pool.dispatch(TaskSpec::CalculateStats {
            band: None,
            now_ms: 0.0,
        });
        let output = handle.wait().expect("stats task");
        assert!(matches!(output, TaskOutput::Stats(_)));
        assert_eq!(pool.pending_counts(), vec![0, 0]);
    }

    #[test]
    fn concurrent_band_tasks_partition_cleanly() {
        let (shared, pool) = pool(4);
        let mut cell = crate::cell::Cell::empty();
        cell.faction = Some(1);
        for y in 0..32 {
            for x in 0..16 {
                shared.grid.write_cell(x, y, &cell);
            }
        }

        let bands = crate::grid::partition_bands(32, 4);
        let handles: Vec<TaskHandle> = bands
            .iter()
            .map(|band| {
                pool.dispatch(TaskSpec::CalculateStats {
                    band: Some(*band),
                    now_ms: 0.0,
                })
            })
            .collect();

        let mut banded_total = 0u64;
        for handle in handles {
            let TaskOutput::Stats(report) = handle.wait().expect("band stats") else {
                panic!("expected stats");
            };
            banded_total += report
                .per_faction
                .iter()
                .map(|stats| stats.tiles)
                .sum::<u64>();
        }

        let TaskOutput::Stats(full) = pool
            .dispatch(TaskSpec::CalculateStats {
                band: Some(YBand::full(32)),
                now_ms: 0.0,
            })
            .wait()
            .expect("full stats")
        else {
            panic!("expected stats");
        };
        let full_total: u64 = full.per_faction.iter().map(|stats| stats.tiles).sum();
        assert_eq!(banded_total, full_total);
        assert_eq!(full_total, 16 * 32);
    }

    #[test]
    fn panicking_task_rejects_its_handle_and_leaves_the_pool_serviceable() {
        let (_shared, pool) = pool(2);
        let crashed = pool.dispatch(TaskSpec::CrashForTests);
        match crashed.wait() {
            Err(DispatchError::TaskPanicked { .. }) | Err(DispatchError::WorkerLost(_)) => {}
            other => panic!("expected a rejected handle, got {other:?}"),
        }
        // The pool still services later dispatches.
        let output = pool
            .dispatch(TaskSpec::CalculateStats {
                band: None,
                now_ms: 0.0,
            })
            .wait()
            .expect("pool should survive a task panic");
        assert!(matches!(output, TaskOutput::Stats(_)));
        assert_eq!(pool.pending_counts(), vec![0, 0]);
    }

    #[test]
    fn least_loaded_routing_skips_busy_workers() {
        let (_shared, pool) = pool(3);
        // Pin workers 0 and 1 by inflating their in-flight counters; the
        // next dispatch must land on worker 2.
        pool.workers[0].pending.fetch_add(5, Ordering::AcqRel);
        pool.workers[1].pending.fetch_add(5, Ordering::AcqRel);

        let handle = pool.dispatch(TaskSpec::CalculateStats {
            band: None,
            now_ms: 0.0,
        });
        handle.wait().expect("stats");
        assert_eq!(pool.pending_counts(), vec![5, 5, 0]);

        pool.workers[0].pending.fetch_sub(5, Ordering::AcqRel);
        pool.workers[1].pending.fetch_sub(5, Ordering::AcqRel);
    }

    #[test]
    fn counters_settle_after_a_burst() {
        let (_shared, pool) = pool(3);
        let handles: Vec<TaskHandle> = (0..9)
            .map(|_| {
                pool.dispatch(TaskSpec::CalculateStats {
                    band: None,
                    now_ms: 0.0,
                })
            })
            .collect();
        for handle in handles {
            handle.wait().expect("stats");
        }
        assert_eq!(pool.pending_counts(), vec![0, 0, 0]);
    }
}
