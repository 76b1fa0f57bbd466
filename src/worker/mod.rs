//! Deferred job pool
//!
//! Post-commit work (KYC evaluation, level refresh) is posted to a bounded
//! queue drained by a fixed set of workers. Posting never blocks the caller:
//! a full queue drops the job with a warning. Each (kind, user, event) runs at
//! most once, guarded by a 24 h marker in the cache.

use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cache::Cache;
use crate::kyc::{KycOutcome, KycService};
use crate::models::UserLevel;
use crate::store::Store;

const MARKER_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Re-evaluate KYC indicators for a user
    EvaluateKyc { user_id: Uuid, event_id: String },
    /// Recompute the user's badge level from total conversions
    RefreshLevel { user_id: Uuid, event_id: String },
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::EvaluateKyc { .. } => "evaluate_kyc",
            Job::RefreshLevel { .. } => "refresh_level",
        }
    }

    fn marker_key(&self) -> String {
        let (user_id, event_id) = match self {
            Job::EvaluateKyc { user_id, event_id } | Job::RefreshLevel { user_id, event_id } => {
                (user_id, event_id)
            }
        };
        format!("job:{}:{}:{}", self.kind(), user_id, event_id)
    }
}

/// Executes jobs against the shared backends
pub struct JobRunner {
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    kyc: KycService,
}

impl JobRunner {
    pub fn new(store: Arc<dyn Store>, cache: Arc<dyn Cache>) -> Self {
        Self {
            kyc: KycService::new(store.clone()),
            store,
            cache,
        }
    }

    pub async fn run(&self, job: Job) {
        match self.cache.set_nx(&job.marker_key(), "1", MARKER_TTL).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(kind = job.kind(), "Job already handled, skipping");
                return;
            }
            Err(e) => {
                tracing::warn!(
                    event_type = "cache_degraded",
                    kind = job.kind(),
                    error = %e,
                    "Job marker unavailable, skipping job"
                );
                return;
            }
        }

        let result = match &job {
            Job::EvaluateKyc { user_id, .. } => self.evaluate_kyc(*user_id).await,
            Job::RefreshLevel { user_id, .. } => self.refresh_level(*user_id).await,
        };

        if let Err(e) = result {
            tracing::error!(kind = job.kind(), error = %e, "Deferred job failed");
        }
    }

    async fn evaluate_kyc(&self, user_id: Uuid) -> Result<(), crate::store::StoreError> {
        match self.kyc.evaluate(user_id, Utc::now()).await? {
            KycOutcome::Escalated(reasons) => {
                tracing::info!(%user_id, ?reasons, "KYC required");
            }
            KycOutcome::Unchanged(_) | KycOutcome::Clear => {}
        }
        Ok(())
    }

    async fn refresh_level(&self, user_id: Uuid) -> Result<(), crate::store::StoreError> {
        let Some(user) = self.store.get_user(user_id).await? else {
            return Ok(());
        };

        let level = UserLevel::from_conversions(user.total_conversions);
        if user.level != level.as_str() {
            self.store.set_user_level(user_id, level.as_str()).await?;
            tracing::info!(%user_id, level = level.as_str(), "User level changed");
        }
        Ok(())
    }
}

#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Handle used to post jobs
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<Job>,
    pending: Arc<Pending>,
}

impl JobQueue {
    /// Spawn `workers` tasks draining a queue of `capacity` jobs
    pub fn start(
        workers: usize,
        capacity: usize,
        runner: Arc<JobRunner>,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let pending = Arc::new(Pending::default());

        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let receiver = receiver.clone();
                let runner = runner.clone();
                let pending = pending.clone();

                tokio::spawn(async move {
                    loop {
                        let job = { receiver.lock().await.recv().await };
                        match job {
                            Some(job) => {
                                runner.run(job).await;
                                pending.done();
                            }
                            None => break,
                        }
                    }
                    tracing::debug!(worker_id, "Job worker stopped");
                })
            })
            .collect();

        (Self { sender, pending }, handles)
    }

    /// Post a job without waiting. Returns whether it was queued.
    pub fn enqueue(&self, job: Job) -> bool {
        self.pending.count.fetch_add(1, Ordering::AcqRel);

        match self.sender.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.pending.done();
                tracing::warn!(kind = job.kind(), "Job queue full, dropping job");
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                self.pending.done();
                tracing::warn!(kind = job.kind(), "Job queue closed, dropping job");
                false
            }
        }
    }

    /// Number of queued or running jobs
    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::Acquire)
    }

    /// Wait until every posted job has finished
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.pending.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::models::User;
    use crate::store::MemoryStore;

    async fn setup(workers: usize, capacity: usize) -> (JobQueue, MemoryStore, User) {
        let store = MemoryStore::new();
        let user = User::new("promoter");
        store.insert_user(user.clone()).await;

        let runner = Arc::new(JobRunner::new(
            Arc::new(store.clone()),
            Arc::new(MemoryCache::new()),
        ));
        let (queue, _handles) = JobQueue::start(workers, capacity, runner);
        (queue, store, user)
    }

    #[tokio::test]
    async fn test_refresh_level_runs() {
        let (queue, store, user) = setup(2, 16).await;

        assert!(queue.enqueue(Job::RefreshLevel {
            user_id: user.id,
            event_id: "c1".to_string(),
        }));
        queue.wait_idle().await;

        let user = store.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(user.level, "rookie");
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_job_marker_dedups() {
        let cache = Arc::new(MemoryCache::new());
        let store = MemoryStore::new();
        let runner = JobRunner::new(Arc::new(store), cache.clone());
        let job = Job::EvaluateKyc {
            user_id: Uuid::new_v4(),
            event_id: "e1".to_string(),
        };

        runner.run(job.clone()).await;
        assert!(cache.exists(&job.marker_key()).await.unwrap());
        assert!(!cache.set_nx(&job.marker_key(), "1", MARKER_TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        // No workers draining, so the second job finds the queue full
        let (sender, _receiver) = mpsc::channel(1);
        let queue = JobQueue {
            sender,
            pending: Arc::new(Pending::default()),
        };

        let job = |n: u32| Job::RefreshLevel {
            user_id: Uuid::nil(),
            event_id: n.to_string(),
        };
        assert!(queue.enqueue(job(1)));
        assert!(!queue.enqueue(job(2)));
        assert_eq!(queue.pending(), 1);
    }

    #[test]
    fn test_marker_key() {
        let job = Job::EvaluateKyc {
            user_id: Uuid::nil(),
            event_id: "abc".to_string(),
        };
        assert_eq!(
            job.marker_key(),
            format!("job:evaluate_kyc:{}:abc", Uuid::nil())
        );
    }
}
