use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex, Semaphore};
use tracing::{debug, info, warn};

use outreach_core::config::QueueConfig;
use outreach_core::{Error, Result};

use crate::job::{Job, JobStatus};
use crate::memory::MemorySnapshot;

/// Snapshot returned by [`InteractionQueue::queue_status`], consumed by the
/// health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub active: usize,
    pub queued: usize,
    pub tracked: usize,
    pub concurrency: usize,
    pub memory: MemorySnapshot,
}

/// Serializes asynchronous jobs onto the shared browser session.
///
/// Admission is FIFO; at most `concurrency` jobs run at once (default 1 —
/// exactly one browser session exists, and two drivers would corrupt each
/// other's page state). The queue tracks every job's lifecycle and bounds
/// its own memory via cap, TTL, and pressure-triggered eviction.
#[derive(Clone)]
pub struct InteractionQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    jobs: Mutex<HashMap<String, Job>>,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    config: QueueConfig,
}

impl InteractionQueue {
    pub fn new(config: QueueConfig) -> Self {
        // Below-1 inputs are clamped up rather than rejected.
        let concurrency = config.concurrency.max(1);
        Self {
            inner: Arc::new(QueueInner {
                jobs: Mutex::new(HashMap::new()),
                semaphore: Arc::new(Semaphore::new(concurrency)),
                concurrency,
                config,
            }),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    /// Admit a job and run it once the concurrency ceiling allows.
    ///
    /// The task's return value is handed back to the caller; a task error is
    /// captured into the job record and re-surfaced as the caller's error.
    /// The queue itself never retries — retry policy belongs to the caller
    /// or the heal manager.
    pub async fn enqueue<F, T>(&self, kind: &str, meta: Value, task: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
        T: Serialize + Send,
    {
        let job = Job::new(kind, meta);
        let job_id = job.id.clone();
        {
            let mut jobs = self.inner.jobs.lock().await;
            jobs.insert(job_id.clone(), job);
        }
        debug!(job_id = %job_id, kind = kind, "Job admitted");

        // Fair semaphore: waiters are released in admission order, which is
        // what makes C=1 strictly FIFO.
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Queue("queue semaphore closed".to_string()))?;

        {
            let mut jobs = self.inner.jobs.lock().await;
            if let Some(j) = jobs.get_mut(&job_id) {
                j.status = JobStatus::Running;
                j.started_at = Some(Utc::now());
            }
        }
        debug!(job_id = %job_id, "Job started");

        let outcome = task.await;

        {
            let mut jobs = self.inner.jobs.lock().await;
            if let Some(j) = jobs.get_mut(&job_id) {
                j.finished_at = Some(Utc::now());
                match &outcome {
                    Ok(value) => {
                        j.status = JobStatus::Succeeded;
                        j.result = serde_json::to_value(value).ok();
                    }
                    Err(e) => {
                        j.status = JobStatus::Failed;
                        j.error = Some(e.to_string());
                    }
                }
            }
        }
        drop(permit);

        match &outcome {
            Ok(_) => debug!(job_id = %job_id, "Job succeeded"),
            Err(e) => warn!(job_id = %job_id, error = %e, "Job failed"),
        }

        self.evict_old_jobs().await;
        outcome
    }

    /// Current lifecycle record for a job, or `None` for unknown ids.
    pub async fn get_status(&self, job_id: &str) -> Option<Job> {
        let jobs = self.inner.jobs.lock().await;
        jobs.get(job_id).cloned()
    }

    /// Terminal result/error view for a job, or `None` for unknown ids.
    pub async fn get_result(&self, job_id: &str) -> Option<Value> {
        let jobs = self.inner.jobs.lock().await;
        jobs.get(job_id).map(|j| {
            json!({
                "id": j.id,
                "status": j.status.to_string(),
                "result": j.result,
                "error": j.error,
            })
        })
    }

    pub async fn queue_status(&self) -> QueueStatus {
        let jobs = self.inner.jobs.lock().await;
        let active = jobs
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .count();
        let queued = jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .count();
        QueueStatus {
            active,
            queued,
            tracked: jobs.len(),
            concurrency: self.inner.concurrency,
            memory: MemorySnapshot::sample(self.inner.config.memory_threshold),
        }
    }

    /// Sample heap pressure; at or above the threshold, evict down to 50%
    /// of the tracked-job cap (oldest completed first).
    pub async fn check_memory_pressure(&self) -> MemorySnapshot {
        let snapshot = MemorySnapshot::sample(self.inner.config.memory_threshold);
        if snapshot.is_under_pressure {
            warn!(
                used_mb = snapshot.used_mb,
                ratio = snapshot.ratio,
                threshold = snapshot.threshold,
                "Memory pressure detected, evicting tracked jobs aggressively"
            );
            self.evict_to_cap(self.inner.config.max_tracked_jobs / 2)
                .await;
        }
        snapshot
    }

    /// Routine eviction, run after every job completion: keep tracked jobs
    /// at or under the cap. Queued/Running jobs are never evicted.
    async fn evict_old_jobs(&self) {
        self.evict_to_cap(self.inner.config.max_tracked_jobs).await;
    }

    async fn evict_to_cap(&self, cap: usize) {
        let mut jobs = self.inner.jobs.lock().await;
        if jobs.len() <= cap {
            return;
        }
        let mut terminal: Vec<(String, DateTime<Utc>)> = jobs
            .values()
            .filter(|j| j.status.is_terminal())
            .map(|j| (j.id.clone(), j.finished_at.unwrap_or(j.created_at)))
            .collect();
        terminal.sort_by_key(|(_, finished)| *finished);

        let mut removed = 0;
        for (id, _) in terminal {
            if jobs.len() <= cap {
                break;
            }
            jobs.remove(&id);
            removed += 1;
        }
        if removed > 0 {
            debug!(removed, cap, "Evicted old jobs");
        }
    }

    /// TTL eviction: drop terminal jobs whose finish time is older than the
    /// configured TTL, regardless of the cap. Bounds memory growth even
    /// under low job volume.
    pub async fn evict_expired(&self) -> usize {
        let ttl = Duration::from_secs(self.inner.config.completed_ttl_mins * 60);
        let cutoff = Utc::now() - chrono::Duration::from_std(ttl).unwrap_or_default();
        let mut jobs = self.inner.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, j| {
            if !j.status.is_terminal() {
                return true;
            }
            j.finished_at.map_or(true, |f| f > cutoff)
        });
        let removed = before - jobs.len();
        if removed > 0 {
            debug!(removed, "TTL sweep evicted terminal jobs");
        }
        removed
    }

    /// Periodic sweep loop: TTL eviction plus a memory-pressure check.
    pub async fn run_sweeper(self, mut shutdown: broadcast::Receiver<()>) {
        let period = Duration::from_secs(self.inner.config.sweep_interval_mins * 60);
        info!(period_secs = period.as_secs(), "Queue sweeper started");
        let mut interval = tokio::time::interval(period);
        // The first tick fires immediately; skip it.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.evict_expired().await;
                    self.check_memory_pressure().await;
                }
                _ = shutdown.recv() => {
                    info!("Queue sweeper shutting down");
                    break;
                }
            }
        }
    }
}
