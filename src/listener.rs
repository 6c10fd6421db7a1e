use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::client::Client;
use crate::config::Config;
use crate::coordinator::CoordinatorsBuffer;
use crate::error::{emit_error_occurred, emit_forced_shutdown, ClientError, ErrorEventKind};
use crate::executor::{ConsumerFactory, ExecutorKey, ExecutorsBuffer};
use crate::filter::FilterFactory;
use crate::jobs::{BeforeSchedule, Job, JobsBuilder, NoopBeforeSchedule};
use crate::jobs_queue::{JobsQueue, SubscriptionGroupId};
use crate::message::TopicPartition;
use crate::partitioner::{IdentityPartitioner, Partitioner};
use crate::scheduler::Scheduler;
use crate::strategy::StrategyRegistry;
use crate::usage_tracker::UsageTracker;

const BOOT_POLL_TIMEOUT_MS: u64 = 100;
const RESTART_BACKOFF: Duration = Duration::from_secs(1);

/// Drives the fetch loop for one subscription group, tying every other
/// component together (spec.md section 2 "Listener", section 4.1).
///
/// One `Listener` owns exactly one `Client`, one `MessagesBuffer`'s worth of
/// per-cycle state, one `CoordinatorsBuffer`, one `ExecutorsBuffer`, and one
/// queue-partition inside the shared `JobsQueue` (spec.md section 3
/// "Subscription Group").
pub struct Listener {
    group: SubscriptionGroupId,
    client: Arc<dyn Client>,
    config: Config,
    partitioners: HashMap<String, Box<dyn Partitioner>>,
    scheduler: Arc<dyn Scheduler>,
    queue: JobsQueue,
    before_schedule: Arc<dyn BeforeSchedule>,
    status: crate::status::Status,

    coordinators: Arc<CoordinatorsBuffer>,
    executors: Arc<ExecutorsBuffer>,
    strategies: Arc<StrategyRegistry>,
    usage_tracker: Mutex<UsageTracker>,
    installed_callbacks: Mutex<HashSet<TopicPartition>>,
    /// SPEC_FULL.md section B.4: count of `restart()` invocations.
    restart_count: AtomicU64,
}

impl Listener {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        group: SubscriptionGroupId,
        client: Arc<dyn Client>,
        config: Config,
        consumer_factory: ConsumerFactory,
        partitioners: HashMap<String, Box<dyn Partitioner>>,
        scheduler: Arc<dyn Scheduler>,
        queue: JobsQueue,
        status: crate::status::Status,
        filter_factory: Option<FilterFactory>,
    ) -> Self {
        let strategies = Arc::new(StrategyRegistry::new(config.topics.clone(), filter_factory));
        queue.register(&group);

        Self {
            group,
            client,
            config,
            partitioners,
            scheduler,
            queue,
            before_schedule: Arc::new(NoopBeforeSchedule),
            status,
            coordinators: Arc::new(CoordinatorsBuffer::new()),
            executors: Arc::new(ExecutorsBuffer::new(consumer_factory)),
            strategies,
            usage_tracker: Mutex::new(UsageTracker::new()),
            installed_callbacks: Mutex::new(HashSet::new()),
            restart_count: AtomicU64::new(0),
        }
    }

    /// SPEC_FULL.md section B.4: number of fetch-loop restarts so far.
    pub fn restart_count(&self) -> u64 {
        self.restart_count.load(Ordering::SeqCst)
    }

    pub fn with_before_schedule(mut self, before_schedule: Arc<dyn BeforeSchedule>) -> Self {
        self.before_schedule = before_schedule;
        self
    }

    fn partitioner_for(&self, topic: &str) -> &dyn Partitioner {
        self.partitioners
            .get(topic)
            .map(|p| p.as_ref())
            .unwrap_or(&IDENTITY)
    }

    /// Idempotent: flips the shared status cell so every Listener (and any
    /// other reader) observes `done?` on its next check (spec.md section 5
    /// "the method is idempotent and guarded by a mutex plus a stopped flag" —
    /// here the flag is the atomic `Status` cell itself, so repeated calls are
    /// naturally idempotent without an extra guard).
    pub fn shutdown(&self) {
        self.status.begin_quieting();
    }

    /// Runs the fetch loop until `shutdown()` is observed and the group has
    /// fully drained (spec.md section 4.1).
    pub async fn run(&self) {
        self.boot().await;

        while !self.status.done() {
            if let Err(err) = self.run_iteration().await {
                emit_error_occurred(ErrorEventKind::FetchLoopError, &*err);
                self.restart().await;
                emit_error_occurred(ErrorEventKind::FetchLoopRestart, &*err);
                tokio::time::sleep(RESTART_BACKOFF).await;
            }
        }

        self.quiesce().await;
        self.run_shutdown().await;
    }

    async fn boot(&self) {
        self.client.events_poll(BOOT_POLL_TIMEOUT_MS);
    }

    /// One pass of the `Running` phase's ordered steps (spec.md section 4.1
    /// "Running iteration").
    async fn run_iteration(&self) -> anyhow::Result<()> {
        self.resume_paused_partitions()?;

        let messages = self
            .client
            .batch_poll(self.config.process.max_messages, Duration::from_millis(self.config.process.max_wait_time_ms))
            .await?;

        let mut by_partition: std::collections::BTreeMap<TopicPartition, Vec<crate::message::Message>> =
            std::collections::BTreeMap::new();
        for message in messages {
            by_partition.entry(message.topic_partition()).or_default().push(message);
        }

        self.build_and_schedule_revoked_jobs().await?;
        self.wait_pinging().await;

        self.build_and_schedule_flow_jobs(&by_partition).await?;
        self.wait_pinging().await;

        if self.has_periodics() {
            self.build_and_schedule_periodic_jobs().await?;
            self.wait_pinging().await;
        }

        Ok(())
    }

    fn resume_paused_partitions(&self) -> Result<(), ClientError> {
        let now = Instant::now();
        for (tp, coordinator) in self.coordinators.snapshot() {
            if coordinator.manual_pause() {
                continue;
            }

            let should_resume = {
                let tracker = coordinator.pause_tracker().lock().unwrap();
                tracker.is_paused() && tracker.window_elapsed(now)
            };

            if should_resume {
                self.client.resume(&tp)?;
                coordinator.pause_tracker().lock().unwrap().clear_pause();
            }
        }
        Ok(())
    }

    async fn build_and_schedule_revoked_jobs(&self) -> Result<(), ClientError> {
        let revoked = self.client.revoked_partitions();
        if revoked.is_empty() {
            return Ok(());
        }

        for (topic, partitions) in revoked {
            for partition in partitions {
                let tp = TopicPartition::new(topic.clone(), partition);

                self.usage_tracker.lock().unwrap().revoke(&tp);
                self.coordinators.revoke(&tp);

                let executors = self.executors.executors_for(&tp);
                let jobs: Vec<Job> = executors.into_iter().map(JobsBuilder::revoked).collect();
                for job in &jobs {
                    self.before_schedule.before_schedule(job);
                }
                self.scheduler.on_schedule_revocation(&self.group, jobs).await;

                // Jobs are built against the current executor set before the
                // buffer is purged (spec.md section 4.1 step 3).
                self.executors.revoke(&tp);
            }
        }

        Ok(())
    }

    async fn build_and_schedule_flow_jobs(
        &self,
        by_partition: &std::collections::BTreeMap<TopicPartition, Vec<crate::message::Message>>,
    ) -> Result<(), ClientError> {
        let mut idle_jobs = Vec::new();
        let mut consume_jobs = Vec::new();

        for (tp, messages) in by_partition {
            self.usage_tracker.lock().unwrap().track(tp);

            let coordinator = self
                .coordinators
                .find_or_create(tp, self.config.process.pause.as_backoff_config());
            self.ensure_strategy_installed(tp, &coordinator);

            if messages.is_empty() {
                let executors = self.executors.executors_for(tp);
                idle_jobs.push(JobsBuilder::idle(tp.clone(), executors));
                continue;
            }

            let partitioner = self.partitioner_for(&tp.topic);
            let groups = partitioner.call(messages.clone());
            coordinator.start(&groups);

            let active_job = self.config.topics.get(&tp.topic).map(|c| c.active_job).unwrap_or(false);

            for (group_id, sub_batch) in groups {
                let key = ExecutorKey::new(tp.clone(), group_id);
                let executor = self.executors.find_or_create(&key);
                coordinator.increment();
                consume_jobs.push(JobsBuilder::consume(key, executor, coordinator.clone(), sub_batch, active_job));
            }
        }

        for job in idle_jobs.iter().chain(consume_jobs.iter()) {
            self.before_schedule.before_schedule(job);
        }

        self.scheduler.on_schedule_idle(&self.group, idle_jobs).await;
        self.scheduler.on_schedule_consumption(&self.group, consume_jobs).await;

        Ok(())
    }

    fn has_periodics(&self) -> bool {
        self.config.topics.values().any(|c| c.periodics.is_some())
    }

    async fn build_and_schedule_periodic_jobs(&self) -> Result<(), ClientError> {
        let mut jobs = Vec::new();

        for (tp, _) in self.coordinators.snapshot() {
            let topic_config = match self.config.topics.get(&tp.topic) {
                Some(cfg) if cfg.periodics.is_some() => cfg,
                _ => continue,
            };

            let idle_threshold = Duration::from_millis(topic_config.periodics.as_ref().unwrap().interval_ms);

            let is_active = self.usage_tracker.lock().unwrap().is_active(&tp, idle_threshold);
            if is_active {
                continue;
            }

            self.usage_tracker.lock().unwrap().track(&tp);

            let mut executors = self.executors.executors_for(&tp);
            if executors.is_empty() {
                let key = ExecutorKey::new(tp.clone(), crate::message::DEFAULT_VIRTUAL_GROUP_ID);
                executors.push(self.executors.find_or_create(&key));
            }

            for executor in executors {
                jobs.push(JobsBuilder::periodic(executor));
            }
        }

        for job in &jobs {
            self.before_schedule.before_schedule(job);
        }
        self.scheduler.on_schedule_periodic(&self.group, jobs).await;

        Ok(())
    }

    /// Blocks until this group's queue shard drains, pumping events-polling
    /// and the scheduler's `on_manage` tick (spec.md section 4.1 step 4/6/8).
    async fn wait_pinging(&self) {
        let client = self.client.clone();
        let scheduler = self.scheduler.clone();
        self.queue
            .wait(&self.group, move || {
                client.events_poll(0);
                scheduler.on_manage();
            })
            .await;
    }

    /// Installs the one-shot-per-coordinator `on_finished` continuation
    /// exactly once (spec.md section 4.2: "installed by the Strategy before
    /// the first increment"). Subsequent batches on the same coordinator
    /// reuse the same callback, since it reads the finished batch's state
    /// from its arguments rather than captured per-batch data.
    fn ensure_strategy_installed(&self, tp: &TopicPartition, coordinator: &Arc<crate::coordinator::Coordinator>) {
        let mut installed = self.installed_callbacks.lock().unwrap();
        if !installed.insert(tp.clone()) {
            return;
        }

        let strategy = self.strategies.find_or_create(tp);
        let client = self.client.clone();
        let coordinator_for_callback = coordinator.clone();

        coordinator.register_on_finished(Box::new(move |last_message, _success| {
            if let Err(err) = strategy.handle_after_consume(&coordinator_for_callback, client.as_ref(), last_message) {
                emit_error_occurred(ErrorEventKind::FetchLoopError, &err);
            }
        }));
    }

    /// `restart` (spec.md section 4.1 "Error handling"): drains and clears
    /// this group's queue slice, resets scheduler state, resets the Client,
    /// resets coordinators, and discards executors so stale user-consumer
    /// state tied to the previous rdkafka generation is dropped.
    async fn restart(&self) {
        self.restart_count.fetch_add(1, Ordering::SeqCst);
        self.queue.clear(&self.group).await;
        self.scheduler.on_clear(&self.group).await;

        if let Err(err) = self.client.reset() {
            emit_error_occurred(ErrorEventKind::FetchLoopError, &err);
        }

        self.coordinators.clear();
        self.executors.clear();
        self.usage_tracker.lock().unwrap().clear();
        self.installed_callbacks.lock().unwrap().clear();
    }

    /// `Quieting` phase (spec.md section 4.1): stop scheduling regular jobs,
    /// but keep pinging and still build revoked-job batches so long-running
    /// jobs observe cluster changes, then wait for the shard to drain.
    async fn quiesce(&self) {
        self.client.ping();
        if let Err(err) = self.build_and_schedule_revoked_jobs().await {
            emit_error_occurred(ErrorEventKind::FetchLoopError, &err);
        }
        self.wait_pinging().await;
        self.status.mark_quiet();
    }

    /// `Shutdown` (spec.md section 4.1): one shutdown job per executor,
    /// drain, then close the Client. Coordinating "all peer slices in the
    /// same consumer group are done" is the Kafka consumer-group protocol
    /// itself, which spec.md section 1 places out of scope; this Listener
    /// only waits for the process-wide quiet transition before closing its
    /// own Client.
    ///
    /// The drain wait is bounded by `ProcessConfig::shutdown_timeout_ms`
    /// (SPEC_FULL.md section B.3): if the queue hasn't drained by then, the
    /// Listener stops waiting and closes the Client anyway, emitting
    /// `connection.listener.forced_shutdown`.
    async fn run_shutdown(&self) {
        let jobs: Vec<Job> = self.executors.all().into_iter().map(JobsBuilder::shutdown).collect();
        for job in &jobs {
            self.before_schedule.before_schedule(job);
        }
        self.scheduler.on_schedule_shutdown(&self.group, jobs).await;

        let timeout = Duration::from_millis(self.config.process.shutdown_timeout_ms);
        if tokio::time::timeout(timeout, self.wait_pinging()).await.is_err() {
            emit_forced_shutdown(self.config.process.shutdown_timeout_ms);
        }

        // `quiesce` always runs immediately before this method in `run`, so
        // the process is already past the Quiet transition by construction.

        self.client.ping();
        self.client.stop();
        self.status.begin_stopping();
        self.status.mark_stopped();
    }
}

static IDENTITY: IdentityPartitioner = IdentityPartitioner;
