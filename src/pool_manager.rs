//! Adaptive resizing and periodic metrics for the worker pools.
//!
//! The sizing rule is a pure function of a [`PoolSnapshot`] so it can be
//! tested without a runtime:
//!
//! - **grow** when utilization (`active / pool_size`) exceeds the pool's
//!   high threshold or the queue is more than half full: core and max are
//!   multiplied by the scale factor, capped at the absolute maximum
//! - **shrink** when utilization is below the low threshold and the queue
//!   is under a tenth full: core is divided by the scale factor (never
//!   below the minimum) and max becomes the larger of `max / scale` and
//!   `1.5 * new core`
//! - otherwise leave the pool alone
//!
//! Sizes are truncated to integers after scaling.

use crate::config::{PoolSettings, PoolsSettings};
use crate::models::PoolSnapshot;
use crate::pool::{Pools, WorkerPool, available_cores};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

/// Thresholds and bounds for one pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingPolicy {
    pub high_load: f64,
    pub low_load: f64,
    pub scale_factor: f64,
    pub min_size: usize,
    pub absolute_max: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Grow { core: usize, max: usize },
    Shrink { core: usize, max: usize },
}

impl Adjustment {
    pub fn sizes(&self) -> (usize, usize) {
        match *self {
            Adjustment::Grow { core, max } | Adjustment::Shrink { core, max } => (core, max),
        }
    }
}

/// Fraction of provisioned slots that are busy.
pub fn utilization(snapshot: &PoolSnapshot) -> f64 {
    if snapshot.pool_size == 0 {
        return 0.0;
    }
    snapshot.active_count as f64 / snapshot.pool_size as f64
}

/// Fraction of queue capacity in use.
pub fn queue_occupancy(snapshot: &PoolSnapshot) -> f64 {
    let capacity = snapshot.queue_size + snapshot.queue_remaining;
    if capacity == 0 {
        return 0.0;
    }
    snapshot.queue_size as f64 / capacity as f64
}

/// Decide whether and how to resize a pool given its current state.
pub fn plan(snapshot: &PoolSnapshot, policy: &ScalingPolicy) -> Option<Adjustment> {
    let util = utilization(snapshot);
    let queued = queue_occupancy(snapshot);
    let core = snapshot.core_pool_size;
    let max = snapshot.max_pool_size;

    if util > policy.high_load || queued > 0.5 {
        let new_core = scale(core, policy.scale_factor).min(policy.absolute_max);
        let new_max = scale(max, policy.scale_factor).min(policy.absolute_max);
        if new_core > core || new_max > max {
            return Some(Adjustment::Grow {
                core: new_core,
                max: new_max,
            });
        }
    } else if util < policy.low_load && queued < 0.1 {
        let new_core = shrink(core, policy.scale_factor).max(policy.min_size);
        let new_max = shrink(max, policy.scale_factor).max(scale(new_core, 1.5));
        if new_core < core && new_max < max {
            return Some(Adjustment::Shrink {
                core: new_core,
                max: new_max,
            });
        }
    }
    None
}

fn scale(size: usize, factor: f64) -> usize {
    (size as f64 * factor) as usize
}

fn shrink(size: usize, factor: f64) -> usize {
    (size as f64 / factor) as usize
}

#[derive(Debug)]
struct ManagedPool {
    pool: Arc<WorkerPool>,
    policy: ScalingPolicy,
}

/// Periodically resizes the pools and logs their metrics.
#[derive(Debug)]
pub struct AdaptivePoolManager {
    managed: Vec<ManagedPool>,
    cpu: Arc<WorkerPool>,
    enabled: bool,
    adjustment_interval: Duration,
    metrics_interval: Duration,
}

impl AdaptivePoolManager {
    pub fn from_settings(pools: &Pools, settings: &PoolsSettings) -> Self {
        let adaptive = &settings.adaptive;
        let io_policy = policy_for(
            &settings.io,
            adaptive.io_high_load_threshold,
            adaptive.io_low_load_threshold,
            adaptive.scale_factor,
            settings.io.absolute_max_size,
        );
        let cpu_policy = policy_for(
            &settings.cpu,
            adaptive.cpu_high_load_threshold,
            adaptive.cpu_low_load_threshold,
            adaptive.scale_factor,
            settings.cpu.absolute_max_size.min(available_cores() * 2),
        );

        Self {
            managed: vec![
                ManagedPool {
                    pool: Arc::clone(&pools.io),
                    policy: io_policy,
                },
                ManagedPool {
                    pool: Arc::clone(&pools.cpu),
                    policy: cpu_policy,
                },
            ],
            cpu: Arc::clone(&pools.cpu),
            enabled: adaptive.enabled,
            adjustment_interval: Duration::from_millis(adaptive.adjustment_interval_ms),
            metrics_interval: Duration::from_millis(adaptive.metrics_interval_ms),
        }
    }

    /// Evaluate every pool once. Returns how many pools were resized.
    pub fn adjust_once(&self) -> usize {
        let mut resized = 0;
        for managed in &self.managed {
            let snapshot = managed.pool.snapshot();
            let Some(adjustment) = plan(&snapshot, &managed.policy) else {
                debug!(
                    pool = %snapshot.name,
                    utilization = utilization(&snapshot),
                    "Pool size unchanged"
                );
                continue;
            };
            let (core, max) = adjustment.sizes();
            match managed.pool.resize(core, max) {
                Ok(()) => {
                    info!(
                        pool = %snapshot.name,
                        ?adjustment,
                        from_core = snapshot.core_pool_size,
                        from_max = snapshot.max_pool_size,
                        core,
                        max,
                        "Resized pool"
                    );
                    resized += 1;
                }
                Err(e) => warn!(pool = %snapshot.name, error = %e, "Skipping pool resize"),
            }
        }
        resized
    }

    /// Log one metrics line per pool.
    pub fn log_metrics(&self) {
        for managed in &self.managed {
            let s = managed.pool.snapshot();
            info!(
                pool = %s.name,
                active = s.active_count,
                size = s.pool_size,
                core = s.core_pool_size,
                max = s.max_pool_size,
                queued = s.queue_size,
                queue_remaining = s.queue_remaining,
                completed = s.completed_task_count,
                submitted = s.task_count,
                utilization_pct = %format!("{:.1}", utilization(&s) * 100.0),
                queue_pct = %format!("{:.1}", queue_occupancy(&s) * 100.0),
                "Pool metrics"
            );
        }
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// Metrics are always logged; resizing only happens when enabled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let start = Instant::now();
        let mut adjust_tick = interval_at(start + self.adjustment_interval, self.adjustment_interval);
        adjust_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut metrics_tick = interval_at(start + self.metrics_interval, self.metrics_interval);
        metrics_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            enabled = self.enabled,
            adjust_every_ms = self.adjustment_interval.as_millis() as u64,
            metrics_every_ms = self.metrics_interval.as_millis() as u64,
            "Adaptive pool manager started"
        );

        loop {
            tokio::select! {
                _ = adjust_tick.tick(), if self.enabled => {
                    self.adjust_once();
                }
                _ = metrics_tick.tick() => {
                    self.cpu.run("pool metrics", async { self.log_metrics() }).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Adaptive pool manager stopped");
    }
}

fn policy_for(
    settings: &PoolSettings,
    high_load: f64,
    low_load: f64,
    scale_factor: f64,
    absolute_max: usize,
) -> ScalingPolicy {
    ScalingPolicy {
        high_load,
        low_load,
        scale_factor,
        min_size: settings.min_size,
        absolute_max,
    }
}
