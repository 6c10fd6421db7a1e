use std::sync::Arc;

use crate::coordinator::Coordinator;
use crate::executor::{Executor, ExecutorKey};
use crate::message::{Message, TopicPartition, VirtualGroupId};

/// The typed units of work the Scheduler dispatches (spec.md section 2
/// "JobsBuilder": consume, idle, revoked, shutdown, periodic).
pub enum Job {
    /// A batch of messages for one virtual group of one topic-partition.
    Consume {
        key: ExecutorKey,
        executor: Arc<Executor>,
        coordinator: Arc<Coordinator>,
        messages: Vec<Message>,
        /// `TopicConfig::active_job` for this topic (spec.md section 2
        /// "ActiveJob-style dispatch"), surfaced to user code via
        /// `ConsumeContext::active_job`.
        active_job: bool,
    },
    /// An empty poll result for a topic-partition: no coordinator increment
    /// (spec.md section 4.1 step 5: "If messages is empty -> one idle job").
    /// Carries every executor already assigned to the partition so their
    /// `on_idle` callback can run.
    Idle {
        tp: TopicPartition,
        executors: Vec<Arc<Executor>>,
    },
    /// One per existing executor for a just-revoked topic-partition
    /// (spec.md section 4.1 step 3).
    Revoked { executor: Arc<Executor> },
    /// One per existing executor, issued during shutdown (spec.md section 4.1
    /// "Shutdown").
    Shutdown { executor: Arc<Executor> },
    /// One per executor for an assigned, idle topic-partition with
    /// `periodics` enabled (spec.md section 4.1 step 7).
    Periodic { executor: Arc<Executor> },
}

impl Job {
    pub fn virtual_group_id(&self) -> Option<VirtualGroupId> {
        match self {
            Job::Consume { key, .. } => Some(key.virtual_group_id),
            _ => None,
        }
    }

    pub fn topic_partition(&self) -> Option<TopicPartition> {
        match self {
            Job::Consume { key, .. } => Some(key.tp.clone()),
            Job::Idle { tp, .. } => Some(tp.clone()),
            Job::Revoked { executor } | Job::Shutdown { executor } | Job::Periodic { executor } => {
                Some(executor.key().tp.clone())
            }
        }
    }

    /// Whether this job kind must never be starved behind consumption jobs
    /// of the same topic-partition (spec.md section 4.4).
    pub fn is_high_priority(&self) -> bool {
        matches!(self, Job::Revoked { .. } | Job::Shutdown { .. })
    }
}

/// Hook called on every job immediately before it is handed to the
/// Scheduler (spec.md section 4.1 step 5: "Both first call before_schedule on
/// each job"). Left as a no-op extension point; concrete strategies may
/// override it to, e.g., install `on_finished` callbacks.
pub trait BeforeSchedule: Send + Sync {
    fn before_schedule(&self, job: &Job);
}

#[derive(Default)]
pub struct NoopBeforeSchedule;

impl BeforeSchedule for NoopBeforeSchedule {
    fn before_schedule(&self, _job: &Job) {}
}

/// Constructs typed jobs from buffered messages and partitioner output
/// (spec.md section 2 "JobsBuilder").
pub struct JobsBuilder;

impl JobsBuilder {
    pub fn idle(tp: TopicPartition, executors: Vec<Arc<Executor>>) -> Job {
        Job::Idle { tp, executors }
    }

    pub fn consume(
        key: ExecutorKey,
        executor: Arc<Executor>,
        coordinator: Arc<Coordinator>,
        messages: Vec<Message>,
        active_job: bool,
    ) -> Job {
        Job::Consume {
            key,
            executor,
            coordinator,
            messages,
            active_job,
        }
    }

    pub fn revoked(executor: Arc<Executor>) -> Job {
        Job::Revoked { executor }
    }

    pub fn shutdown(executor: Arc<Executor>) -> Job {
        Job::Shutdown { executor }
    }

    pub fn periodic(executor: Arc<Executor>) -> Job {
        Job::Periodic { executor }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::JobOutcome;
    use crate::executor::{ConsumeContext, Consumer};
    use crate::pause_tracker::BackoffConfig;
    use async_trait::async_trait;

    struct NoopConsumer;

    #[async_trait]
    impl Consumer for NoopConsumer {
        async fn consume(&self, _messages: &[Message], _ctx: &ConsumeContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn revoked_and_shutdown_are_high_priority() {
        let key = ExecutorKey::new(TopicPartition::new("orders", 0), 0);
        let executor = Arc::new(Executor::new(key, Box::new(NoopConsumer)));

        assert!(JobsBuilder::revoked(executor.clone()).is_high_priority());
        assert!(JobsBuilder::shutdown(executor).is_high_priority());
    }

    #[test]
    fn consume_job_is_not_high_priority() {
        let tp = TopicPartition::new("orders", 0);
        let key = ExecutorKey::new(tp.clone(), 0);
        let executor = Arc::new(Executor::new(key.clone(), Box::new(NoopConsumer)));
        let coordinator = Arc::new(Coordinator::new(tp, BackoffConfig::default()));

        let job = JobsBuilder::consume(key, executor, coordinator, vec![], false);
        assert!(!job.is_high_priority());
        let _ = JobOutcome::success();
    }
}
