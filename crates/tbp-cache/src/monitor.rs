// SPDX-License-Identifier: MIT OR Apache-2.0
//! Sampling monitor with alert thresholds.

use crate::{CacheMetricsSnapshot, MultiLevelCache};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

/// Alert thresholds checked on every sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// Alert when hit rate drops below this.
    pub hit_rate_min: f64,
    /// Alert when mean latency exceeds this.
    pub response_time_max_ms: f64,
    /// Alert when L1 residency exceeds this.
    pub memory_max_mb: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            hit_rate_min: 0.7,
            response_time_max_ms: 100.0,
            memory_max_mb: 1024.0,
        }
    }
}

/// Which threshold fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheAlertKind {
    /// Hit rate dropped below the floor.
    LowHitRate,
    /// Mean latency exceeded the ceiling.
    SlowResponses,
    /// L1 residency exceeded the ceiling.
    HighMemory,
}

/// A threshold violation handed to alert callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheAlert {
    /// Which threshold fired.
    pub kind: CacheAlertKind,
    /// Observed value.
    pub value: f64,
    /// Configured threshold.
    pub threshold: f64,
    /// Sample time.
    pub at: DateTime<Utc>,
}

type AlertCallback = dyn Fn(&CacheAlert) + Send + Sync;

/// Periodic sampler over a [`MultiLevelCache`].
///
/// Keeps a bounded history of [`CacheMetricsSnapshot`]s and invokes every
/// registered callback when a threshold is crossed.
pub struct CacheMonitor {
    history: Arc<Mutex<VecDeque<CacheMetricsSnapshot>>>,
    callbacks: Arc<Mutex<Vec<Arc<AlertCallback>>>>,
    task: JoinHandle<()>,
}

impl CacheMonitor {
    /// Samples retained in the history ring.
    pub const HISTORY_CAPACITY: usize = 300;

    /// Start sampling `cache` every `interval` (the contract default is 1 s).
    pub fn start(
        cache: Arc<MultiLevelCache>,
        interval: Duration,
        thresholds: AlertThresholds,
    ) -> Self {
        let history: Arc<Mutex<VecDeque<CacheMetricsSnapshot>>> =
            Arc::new(Mutex::new(VecDeque::new()));
        let callbacks: Arc<Mutex<Vec<Arc<AlertCallback>>>> = Arc::new(Mutex::new(Vec::new()));

        let task = {
            let history = history.clone();
            let callbacks = callbacks.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    let snapshot = cache.metrics();
                    check_thresholds(&snapshot, &thresholds, &callbacks);
                    let mut history = history.lock().expect("metrics history poisoned");
                    if history.len() >= Self::HISTORY_CAPACITY {
                        history.pop_front();
                    }
                    history.push_back(snapshot);
                }
            })
        };

        Self {
            history,
            callbacks,
            task,
        }
    }

    /// Register an alert callback.
    pub fn on_alert(&self, callback: impl Fn(&CacheAlert) + Send + Sync + 'static) {
        self.callbacks
            .lock()
            .expect("alert callbacks poisoned")
            .push(Arc::new(callback));
    }

    /// Snapshot the sampled history, oldest first.
    pub fn history(&self) -> Vec<CacheMetricsSnapshot> {
        self.history
            .lock()
            .expect("metrics history poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Stop sampling.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for CacheMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn check_thresholds(
    snapshot: &CacheMetricsSnapshot,
    thresholds: &AlertThresholds,
    callbacks: &Arc<Mutex<Vec<Arc<AlertCallback>>>>,
) {
    let mut alerts = Vec::new();
    if snapshot.operations > 0 && snapshot.hit_rate < thresholds.hit_rate_min {
        alerts.push(CacheAlert {
            kind: CacheAlertKind::LowHitRate,
            value: snapshot.hit_rate,
            threshold: thresholds.hit_rate_min,
            at: Utc::now(),
        });
    }
    if snapshot.avg_response_time_ms > thresholds.response_time_max_ms {
        alerts.push(CacheAlert {
            kind: CacheAlertKind::SlowResponses,
            value: snapshot.avg_response_time_ms,
            threshold: thresholds.response_time_max_ms,
            at: Utc::now(),
        });
    }
    if snapshot.memory_usage_mb > thresholds.memory_max_mb {
        alerts.push(CacheAlert {
            kind: CacheAlertKind::HighMemory,
            value: snapshot.memory_usage_mb,
            threshold: thresholds.memory_max_mb,
            at: Utc::now(),
        });
    }

    if alerts.is_empty() {
        return;
    }
    let callbacks = callbacks.lock().expect("alert callbacks poisoned").clone();
    for alert in &alerts {
        warn!(
            kind = ?alert.kind,
            value = alert.value,
            threshold = alert.threshold,
            "cache alert"
        );
        for callback in &callbacks {
            callback(alert);
        }
    }
}
