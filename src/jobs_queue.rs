use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, Notify};

use crate::jobs::Job;

pub type SubscriptionGroupId = String;

const TICK_INTERVAL: Duration = Duration::from_millis(200);

struct Shard {
    /// Revocation/shutdown jobs, always popped before `normal`
    /// (spec.md section 4.4 "must never starve revocation/shutdown jobs").
    high_priority: AsyncMutex<VecDeque<Job>>,
    normal: AsyncMutex<VecDeque<Job>>,
    queued: AtomicI64,
    in_flight: AtomicI64,
    changed: Notify,
}

impl Shard {
    fn new() -> Self {
        Self {
            high_priority: AsyncMutex::new(VecDeque::new()),
            normal: AsyncMutex::new(VecDeque::new()),
            queued: AtomicI64::new(0),
            in_flight: AtomicI64::new(0),
            changed: Notify::new(),
        }
    }

    fn is_drained(&self) -> bool {
        self.queued.load(Ordering::SeqCst) == 0 && self.in_flight.load(Ordering::SeqCst) == 0
    }
}

/// Multi-producer multi-consumer queue partitioned by subscription group
/// (spec.md section 2 "JobsQueue", section 4.5).
///
/// Invariant: [`JobsQueue::wait`] returns only when both queue depth and
/// in-flight counter are zero for the shard.
#[derive(Default, Clone)]
pub struct JobsQueue {
    shards: Arc<std::sync::Mutex<HashMap<SubscriptionGroupId, Arc<Shard>>>>,
}

impl JobsQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, group_id: &SubscriptionGroupId) {
        self.shards
            .lock()
            .unwrap()
            .entry(group_id.clone())
            .or_insert_with(|| Arc::new(Shard::new()));
    }

    fn shard(&self, group_id: &SubscriptionGroupId) -> Arc<Shard> {
        let mut shards = self.shards.lock().unwrap();
        shards
            .entry(group_id.clone())
            .or_insert_with(|| Arc::new(Shard::new()))
            .clone()
    }

    pub async fn push(&self, group_id: &SubscriptionGroupId, job: Job) {
        let shard = self.shard(group_id);
        shard.queued.fetch_add(1, Ordering::SeqCst);

        if job.is_high_priority() {
            shard.high_priority.lock().await.push_back(job);
        } else {
            shard.normal.lock().await.push_back(job);
        }

        shard.changed.notify_waiters();
    }

    /// Pops the next job for a group, preferring high-priority
    /// (revocation/shutdown) jobs. Marks the job in-flight; callers must call
    /// [`JobsQueue::complete`] once the job has finished executing.
    pub async fn pop(&self, group_id: &SubscriptionGroupId) -> Option<Job> {
        let shard = self.shard(group_id);

        let job = {
            let mut high = shard.high_priority.lock().await;
            if let Some(job) = high.pop_front() {
                Some(job)
            } else {
                drop(high);
                shard.normal.lock().await.pop_front()
            }
        };

        if job.is_some() {
            shard.queued.fetch_sub(1, Ordering::SeqCst);
            shard.in_flight.fetch_add(1, Ordering::SeqCst);
        }

        job
    }

    /// Reports that a previously popped job finished executing.
    pub fn complete(&self, group_id: &SubscriptionGroupId) {
        let shard = self.shard(group_id);
        let remaining = shard.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        debug_assert!(remaining >= 0, "in_flight went negative");
        shard.changed.notify_waiters();
    }

    /// Blocks until the shard reports zero queued and zero in-flight jobs,
    /// invoking `tick` on a <=200ms timer so the caller can pump
    /// events-polling while it waits (spec.md section 4.1 step 4, section 4.5).
    pub async fn wait<F>(&self, group_id: &SubscriptionGroupId, mut tick: F)
    where
        F: FnMut(),
    {
        let shard = self.shard(group_id);

        loop {
            if shard.is_drained() {
                return;
            }

            let notified = shard.changed.notified();
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(TICK_INTERVAL) => {
                    tick();
                }
            }

            if shard.is_drained() {
                return;
            }
        }
    }

    /// Drops all queued jobs for a group and resets in-flight accounting
    /// (spec.md section 4.5 `clear`, used on Listener restart).
    pub async fn clear(&self, group_id: &SubscriptionGroupId) {
        let shard = self.shard(group_id);
        shard.high_priority.lock().await.clear();
        shard.normal.lock().await.clear();
        shard.queued.store(0, Ordering::SeqCst);
        shard.in_flight.store(0, Ordering::SeqCst);
        shard.changed.notify_waiters();
    }

    pub fn empty(&self, group_id: &SubscriptionGroupId) -> bool {
        self.shard(group_id).is_drained()
    }
}
