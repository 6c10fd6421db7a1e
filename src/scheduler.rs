use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::coordinator::JobOutcome;
use crate::jobs::Job;
use crate::jobs_queue::{JobsQueue, SubscriptionGroupId};

/// Receives job batches and dispatches them to workers per its policy
/// (spec.md section 2 "Scheduler", section 4.4).
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn on_schedule_consumption(&self, group: &SubscriptionGroupId, jobs: Vec<Job>);
    async fn on_schedule_idle(&self, group: &SubscriptionGroupId, jobs: Vec<Job>);
    async fn on_schedule_revocation(&self, group: &SubscriptionGroupId, jobs: Vec<Job>);
    async fn on_schedule_shutdown(&self, group: &SubscriptionGroupId, jobs: Vec<Job>);
    async fn on_schedule_periodic(&self, group: &SubscriptionGroupId, jobs: Vec<Job>);

    /// Periodic tick from the Listener's `wait` loop (spec.md section 4.4).
    fn on_manage(&self);

    /// Invoked on restart: drops this group's in-flight bookkeeping
    /// (spec.md section 4.4 `on_clear`).
    async fn on_clear(&self, group: &SubscriptionGroupId);
}

/// Runs one job to completion: drives the executor's lifecycle callback and,
/// for consume jobs, reports the outcome back to the Coordinator (spec.md
/// section 2 data-flow: "worker threads execute, calling Executor ... ->
/// Coordinator.decrement").
///
/// User-code failures are captured here and never propagate
/// (spec.md section 7, class 1).
async fn run_job(job: Job) {
    match job {
        Job::Consume {
            key,
            executor,
            coordinator,
            messages,
            active_job,
        } => {
            let (result, ctx) = executor.run_consume(&messages, active_job).await;

            if ctx.was_marked() {
                coordinator.mark_as_consumed();
            }
            if let Some(offset) = ctx.requested_pause() {
                coordinator.request_pause(offset);
            }
            if let Some(offset) = ctx.requested_seek() {
                coordinator.request_seek(offset);
            }
            if ctx.retry_requested() {
                coordinator.request_retry_after_pause();
            }

            let outcome = match &result {
                Ok(()) => JobOutcome::success(),
                Err(err) => {
                    tracing::warn!(
                        topic = %key.tp.topic,
                        partition = key.tp.partition,
                        virtual_group_id = key.virtual_group_id,
                        error = %err,
                        "consume job failed"
                    );
                    JobOutcome::failure()
                }
            };
            coordinator.decrement(key.virtual_group_id, outcome);
        }
        Job::Idle { executors, .. } => {
            for executor in executors {
                executor.run_idle().await;
            }
        }
        Job::Revoked { executor } => executor.run_revoked().await,
        Job::Shutdown { executor } => executor.run_shutdown().await,
        Job::Periodic { executor } => executor.run_periodic().await,
    }
}

/// Default FIFO-per-group scheduler with a bounded worker pool
/// (spec.md section 4.4 "Default policy").
///
/// Revocation and shutdown jobs are pushed to the high-priority lane of the
/// [`JobsQueue`] shard, so they are always popped ahead of consumption jobs
/// of the same topic-partition, regardless of push order.
pub struct DefaultScheduler {
    queue: JobsQueue,
    concurrency: Arc<Semaphore>,
}

impl DefaultScheduler {
    pub fn new(queue: JobsQueue, concurrency: usize) -> Self {
        Self {
            queue,
            concurrency: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    async fn dispatch(&self, group: &SubscriptionGroupId, jobs: Vec<Job>) {
        for job in jobs {
            self.queue.push(group, job).await;

            let queue = self.queue.clone();
            let group = group.clone();
            let permit = self.concurrency.clone().acquire_owned().await.expect("semaphore closed");

            tokio::spawn(async move {
                let _permit = permit;
                if let Some(job) = queue.pop(&group).await {
                    run_job(job).await;
                    queue.complete(&group);
                }
            });
        }
    }
}

#[async_trait]
impl Scheduler for DefaultScheduler {
    async fn on_schedule_consumption(&self, group: &SubscriptionGroupId, jobs: Vec<Job>) {
        self.dispatch(group, jobs).await;
    }

    async fn on_schedule_idle(&self, group: &SubscriptionGroupId, jobs: Vec<Job>) {
        self.dispatch(group, jobs).await;
    }

    async fn on_schedule_revocation(&self, group: &SubscriptionGroupId, jobs: Vec<Job>) {
        self.dispatch(group, jobs).await;
    }

    async fn on_schedule_shutdown(&self, group: &SubscriptionGroupId, jobs: Vec<Job>) {
        self.dispatch(group, jobs).await;
    }

    async fn on_schedule_periodic(&self, group: &SubscriptionGroupId, jobs: Vec<Job>) {
        self.dispatch(group, jobs).await;
    }

    fn on_manage(&self) {
        tracing::trace!("scheduler.on_manage");
    }

    async fn on_clear(&self, group: &SubscriptionGroupId) {
        self.queue.clear(group).await;
    }
}
