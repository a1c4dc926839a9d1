//! I/O and CPU worker pools.
//!
//! Tasks run on the Tokio runtime; a [`WorkerPool`] decides when a task may
//! start. Admission follows the classic executor rules:
//!
//! 1. take a free **core** slot if one exists;
//! 2. otherwise wait in the queue, if fewer than `queue_capacity` tasks
//!    are already waiting;
//! 3. otherwise take a free **burst** slot (the `max - core` headroom);
//! 4. otherwise run immediately in the caller, unmetered.
//!
//! Every task is wrapped in the pool's task timeout. A timed-out task
//! resolves to `None` and is logged with its operation name, so no caller
//! ever waits longer than one timeout on a single unit of work.
//!
//! Pools are resized live by the adaptive manager. Growing adds slots
//! immediately; shrinking retires slots as running tasks release them and
//! never interrupts work in flight.

use crate::config::{PoolSettings, PoolsSettings};
use crate::error::PoolError;
use crate::models::PoolSnapshot;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy)]
struct Sizes {
    core: usize,
    max: usize,
}

/// A named, resizable admission gate with a per-task timeout.
#[derive(Debug)]
pub struct WorkerPool {
    name: String,
    core: Arc<Semaphore>,
    burst: Arc<Semaphore>,
    sizes: Mutex<Sizes>,
    queue_capacity: usize,
    task_timeout: Duration,
    active: AtomicUsize,
    burst_active: AtomicUsize,
    queued: AtomicUsize,
    completed: AtomicU64,
    submitted: AtomicU64,
}

impl WorkerPool {
    pub fn new(
        name: impl Into<String>,
        core: usize,
        max: usize,
        queue_capacity: usize,
        task_timeout: Duration,
    ) -> Result<Self, PoolError> {
        let name = name.into();
        check_sizes(&name, core, max)?;
        Ok(Self {
            core: Arc::new(Semaphore::new(core)),
            burst: Arc::new(Semaphore::new(max - core)),
            sizes: Mutex::new(Sizes { core, max }),
            queue_capacity,
            task_timeout,
            active: AtomicUsize::new(0),
            burst_active: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `fut` under this pool's admission rules and timeout.
    ///
    /// Returns `None` when the task (including its time in the queue)
    /// exceeded the pool's task timeout.
    pub async fn run<F, T>(&self, op: &str, fut: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        let outcome = tokio::time::timeout(self.task_timeout, async {
            let _slot = self.acquire_slot().await;
            fut.await
        })
        .await;
        self.completed.fetch_add(1, Ordering::Relaxed);

        match outcome {
            Ok(value) => Some(value),
            Err(_) => {
                error!(
                    pool = %self.name,
                    op,
                    timeout_ms = self.task_timeout.as_millis() as u64,
                    "Task timed out"
                );
                None
            }
        }
    }

    /// Spawn `fut` onto the runtime, gated by this pool.
    pub fn spawn<F, T>(self: &Arc<Self>, op: impl Into<String>, fut: F) -> JoinHandle<Option<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = Arc::clone(self);
        let op = op.into();
        tokio::spawn(async move { pool.run(&op, fut).await })
    }

    async fn acquire_slot(&self) -> Slot<'_> {
        if let Ok(permit) = Arc::clone(&self.core).try_acquire_owned() {
            return self.slot(Some(permit), false);
        }

        let waiting = self.queued.fetch_add(1, Ordering::SeqCst);
        let queue_guard = QueueGuard(&self.queued);
        if waiting < self.queue_capacity {
            // The semaphore is never closed, so this only fails in theory;
            // fall back to running unmetered rather than dropping the task.
            let permit = Arc::clone(&self.core).acquire_owned().await.ok();
            drop(queue_guard);
            return self.slot(permit, false);
        }
        drop(queue_guard);

        if let Ok(permit) = Arc::clone(&self.burst).try_acquire_owned() {
            return self.slot(Some(permit), true);
        }

        debug!(pool = %self.name, "Pool saturated; running task in caller");
        self.slot(None, false)
    }

    fn slot(&self, permit: Option<OwnedSemaphorePermit>, burst: bool) -> Slot<'_> {
        self.active.fetch_add(1, Ordering::SeqCst);
        if burst {
            self.burst_active.fetch_add(1, Ordering::SeqCst);
        }
        Slot {
            pool: self,
            _permit: permit,
            burst,
        }
    }

    fn sizes(&self) -> Sizes {
        *self.sizes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let sizes = self.sizes();
        let queued = self.queued.load(Ordering::SeqCst).min(self.queue_capacity);
        PoolSnapshot {
            name: self.name.clone(),
            active_count: self.active.load(Ordering::SeqCst),
            pool_size: sizes.core + self.burst_active.load(Ordering::SeqCst),
            core_pool_size: sizes.core,
            max_pool_size: sizes.max,
            queue_size: queued,
            queue_remaining: self.queue_capacity - queued,
            completed_task_count: self.completed.load(Ordering::Relaxed),
            task_count: self.submitted.load(Ordering::Relaxed),
        }
    }

    /// Change core and max sizes without touching running tasks.
    pub fn resize(&self, core: usize, max: usize) -> Result<(), PoolError> {
        check_sizes(&self.name, core, max)?;
        let mut sizes = self.sizes.lock().unwrap_or_else(PoisonError::into_inner);
        let old = *sizes;
        adjust_permits(&self.core, old.core, core);
        adjust_permits(&self.burst, old.max - old.core, max - core);
        *sizes = Sizes { core, max };
        Ok(())
    }

    /// Wait until nothing is running or queued, for at most `grace`.
    /// Returns whether the pool went idle in time.
    pub async fn drain(&self, grace: Duration) -> bool {
        let idle = async {
            while self.active.load(Ordering::SeqCst) > 0 || self.queued.load(Ordering::SeqCst) > 0
            {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(grace, idle).await.is_ok()
    }
}

fn check_sizes(pool: &str, core: usize, max: usize) -> Result<(), PoolError> {
    if core == 0 || core > max {
        return Err(PoolError::InvalidSize {
            pool: pool.to_string(),
            core,
            max,
        });
    }
    Ok(())
}

fn adjust_permits(semaphore: &Arc<Semaphore>, from: usize, to: usize) {
    if to > from {
        semaphore.add_permits(to - from);
    } else if to < from {
        retire_permits(Arc::clone(semaphore), from - to);
    }
}

/// Permanently remove `count` permits, waiting in the background for busy
/// ones to be released.
fn retire_permits(semaphore: Arc<Semaphore>, count: usize) {
    let Ok(count) = u32::try_from(count) else {
        warn!(count, "Refusing to retire an unrepresentable number of permits");
        return;
    };
    match Arc::clone(&semaphore).try_acquire_many_owned(count) {
        Ok(permits) => permits.forget(),
        Err(_) => match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Ok(permits) = semaphore.acquire_many_owned(count).await {
                        permits.forget();
                    }
                });
            }
            Err(_) => warn!(count, "No runtime to retire busy permits; shrink deferred"),
        },
    }
}

struct Slot<'a> {
    pool: &'a WorkerPool,
    _permit: Option<OwnedSemaphorePermit>,
    burst: bool,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.pool.active.fetch_sub(1, Ordering::SeqCst);
        if self.burst {
            self.pool.burst_active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

struct QueueGuard<'a>(&'a AtomicUsize);

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The two shared pools, passed explicitly to every component that needs them.
#[derive(Debug, Clone)]
pub struct Pools {
    /// Network-bound work: feed and article fetches, extraction.
    pub io: Arc<WorkerPool>,
    /// Pure computation: merging enrichment results, metric aggregation.
    pub cpu: Arc<WorkerPool>,
}

impl Pools {
    pub fn from_settings(settings: &PoolsSettings) -> Result<Self, PoolError> {
        let timeout = Duration::from_millis(settings.task_timeout_ms);
        let io = build_pool("io", &settings.io, timeout)?;

        let cores = available_cores();
        let cpu_core = settings.cpu.core_size.min(cores);
        let cpu_max = settings.cpu.max_size.min(cores * 2).max(cpu_core);
        let cpu = WorkerPool::new(
            "cpu",
            cpu_core,
            cpu_max,
            settings.cpu.queue_capacity,
            timeout,
        )?;
        info!(core = cpu_core, max = cpu_max, cores, "Created CPU pool");

        Ok(Self {
            io: Arc::new(io),
            cpu: Arc::new(cpu),
        })
    }

    /// Drain both pools, giving each up to `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        for pool in [&self.io, &self.cpu] {
            if pool.drain(grace).await {
                info!(pool = %pool.name(), "Pool drained");
            } else {
                warn!(
                    pool = %pool.name(),
                    grace_ms = grace.as_millis() as u64,
                    active = pool.snapshot().active_count,
                    "Pool still busy after grace period; abandoning remaining tasks"
                );
            }
        }
    }
}

fn build_pool(name: &str, settings: &PoolSettings, timeout: Duration) -> Result<WorkerPool, PoolError> {
    let pool = WorkerPool::new(
        name,
        settings.core_size,
        settings.max_size,
        settings.queue_capacity,
        timeout,
    )?;
    info!(
        pool = name,
        core = settings.core_size,
        max = settings.max_size,
        queue = settings.queue_capacity,
        "Created worker pool"
    );
    Ok(pool)
}

pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
