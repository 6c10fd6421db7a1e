use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::message::{Message, TopicPartition, VirtualGroupId};

/// Callback handle passed to [`Consumer::consume`] (spec.md section 6 "User
/// consumer (external)": `mark_as_consumed(message)`, `pause(offset)`,
/// `seek(offset)`, `retry_after_pause()`). These calls are the only way user
/// code can influence the Strategy's post-consume decision
/// (`src/strategy.rs`) beyond its `Result` return value -- in particular,
/// whether a manual-offset-management topic commits at all depends on
/// whether `mark_as_consumed` was called during this `consume`.
///
/// One instance is created per `consume` call and discarded afterward; it
/// carries no state across batches.
#[derive(Default)]
pub struct ConsumeContext {
    marked: AtomicBool,
    pause_offset: Mutex<Option<i64>>,
    seek_offset: Mutex<Option<i64>>,
    retry_after_pause: AtomicBool,
    active_job: bool,
}

impl ConsumeContext {
    pub(crate) fn new(active_job: bool) -> Self {
        Self {
            active_job,
            ..Default::default()
        }
    }

    /// Records that `message` (and, by the spec's commit semantics,
    /// everything before it) has been explicitly handled by user code.
    pub fn mark_as_consumed(&self, _message: &Message) {
        self.marked.store(true, Ordering::SeqCst);
    }

    /// Requests that the partition be paused and next resumed from `offset`,
    /// under manual control rather than the Strategy's automatic retry
    /// backoff (long-running-job use, spec.md section 6).
    pub fn pause(&self, offset: i64) {
        *self.pause_offset.lock().unwrap() = Some(offset);
    }

    /// Requests a seek to `offset` independent of any pause.
    pub fn seek(&self, offset: i64) {
        *self.seek_offset.lock().unwrap() = Some(offset);
    }

    /// Requests that this batch be retried after a backoff pause even though
    /// `consume` is about to return `Ok` -- used by long-running jobs that
    /// want backpressure without reporting failure.
    pub fn retry_after_pause(&self) {
        self.retry_after_pause.store(true, Ordering::SeqCst);
    }

    /// True when the topic has `active_job: true` configured (spec.md
    /// section 2 "ActiveJob-style dispatch"), signaling that this batch
    /// should be enqueued to an external job system rather than processed
    /// inline.
    pub fn active_job(&self) -> bool {
        self.active_job
    }

    pub(crate) fn was_marked(&self) -> bool {
        self.marked.load(Ordering::SeqCst)
    }

    pub(crate) fn requested_pause(&self) -> Option<i64> {
        *self.pause_offset.lock().unwrap()
    }

    pub(crate) fn requested_seek(&self) -> Option<i64> {
        *self.seek_offset.lock().unwrap()
    }

    pub(crate) fn retry_requested(&self) -> bool {
        self.retry_after_pause.load(Ordering::SeqCst)
    }
}

/// The user-provided consumer object (spec.md section 6 "User consumer
/// (external)"). Lifecycle methods are invoked by the [`Executor`] that owns
/// this instance; the payload behavior itself is out of scope (spec.md
/// section 1).
#[async_trait]
pub trait Consumer: Send + Sync {
    async fn on_before_consume(&self, _messages: &[Message]) {}

    async fn consume(&self, messages: &[Message], ctx: &ConsumeContext) -> anyhow::Result<()>;

    async fn on_after_consume(&self, _messages: &[Message]) {}

    async fn on_idle(&self) {}

    async fn on_periodic(&self) {}

    async fn on_revoked(&self) {}

    async fn on_shutdown(&self) {}
}

/// Key identifying one executor: a `(topic, partition, virtual_group_id)`
/// triple (spec.md section 3 "Executor").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutorKey {
    pub tp: TopicPartition,
    pub virtual_group_id: VirtualGroupId,
}

impl ExecutorKey {
    pub fn new(tp: TopicPartition, virtual_group_id: VirtualGroupId) -> Self {
        Self { tp, virtual_group_id }
    }
}

/// Binds a user consumer instance to one `(topic, partition, virtual_group_id)`
/// and drives its lifecycle callbacks (spec.md section 2 "Executor").
///
/// The inner `tokio::sync::Mutex` both owns the consumer and enforces the
/// "at most one job per executor runs at a time" invariant: a worker must
/// hold the lock for the duration of a single job.
pub struct Executor {
    key: ExecutorKey,
    consumer: tokio::sync::Mutex<Box<dyn Consumer>>,
}

impl Executor {
    pub fn new(key: ExecutorKey, consumer: Box<dyn Consumer>) -> Self {
        Self {
            key,
            consumer: tokio::sync::Mutex::new(consumer),
        }
    }

    pub fn key(&self) -> &ExecutorKey {
        &self.key
    }

    /// Runs one consume job. Exclusive access to the consumer is held for the
    /// full `on_before_consume -> consume -> on_after_consume` sequence.
    /// Returns the consumer's result alongside the [`ConsumeContext`] it was
    /// given, so the caller can forward any `mark_as_consumed`/`pause`/`seek`/
    /// `retry_after_pause` calls to the Coordinator.
    pub async fn run_consume(&self, messages: &[Message], active_job: bool) -> (anyhow::Result<()>, ConsumeContext) {
        let consumer = self.consumer.lock().await;
        consumer.on_before_consume(messages).await;
        let ctx = ConsumeContext::new(active_job);
        let result = consumer.consume(messages, &ctx).await;
        consumer.on_after_consume(messages).await;
        (result, ctx)
    }

    pub async fn run_idle(&self) {
        self.consumer.lock().await.on_idle().await;
    }

    pub async fn run_periodic(&self) {
        self.consumer.lock().await.on_periodic().await;
    }

    pub async fn run_revoked(&self) {
        self.consumer.lock().await.on_revoked().await;
    }

    pub async fn run_shutdown(&self) {
        self.consumer.lock().await.on_shutdown().await;
    }
}

/// A factory that lazily builds the user consumer for a newly observed
/// executor key (spec.md section 4.1 "created lazily on first message
/// arrival").
pub type ConsumerFactory = Arc<dyn Fn(&ExecutorKey) -> Box<dyn Consumer> + Send + Sync>;

/// Indexed store of [`Executor`]s keyed by `(topic, partition,
/// virtual_group_id)` (spec.md section 2 "ExecutorsBuffer").
pub struct ExecutorsBuffer {
    executors: std::sync::Mutex<HashMap<ExecutorKey, Arc<Executor>>>,
    factory: ConsumerFactory,
}

impl ExecutorsBuffer {
    pub fn new(factory: ConsumerFactory) -> Self {
        Self {
            executors: std::sync::Mutex::new(HashMap::new()),
            factory,
        }
    }

    /// Returns the executor for `key`, creating it (and its user consumer)
    /// lazily if this is the first message seen for that key.
    pub fn find_or_create(&self, key: &ExecutorKey) -> Arc<Executor> {
        let mut executors = self.executors.lock().unwrap();
        executors
            .entry(key.clone())
            .or_insert_with(|| {
                let consumer = (self.factory)(key);
                Arc::new(Executor::new(key.clone(), consumer))
            })
            .clone()
    }

    pub fn get(&self, key: &ExecutorKey) -> Option<Arc<Executor>> {
        self.executors.lock().unwrap().get(key).cloned()
    }

    /// Removes and returns every executor for the given topic-partition,
    /// regardless of virtual group id (spec.md section 4.1 step 3: "call
    /// ExecutorsBuffer.revoke" after building one revoked job per existing
    /// executor for that TP).
    pub fn revoke(&self, tp: &TopicPartition) -> Vec<Arc<Executor>> {
        let mut executors = self.executors.lock().unwrap();
        let keys: Vec<_> = executors
            .keys()
            .filter(|k| &k.tp == tp)
            .cloned()
            .collect();

        keys.into_iter()
            .filter_map(|key| executors.remove(&key))
            .collect()
    }

    /// All executors for a topic-partition, without removing them. Used to
    /// build revoked/shutdown jobs before the buffer purge.
    pub fn executors_for(&self, tp: &TopicPartition) -> Vec<Arc<Executor>> {
        self.executors
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| &k.tp == tp)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<Executor>> {
        self.executors.lock().unwrap().values().cloned().collect()
    }

    pub fn clear(&self) -> Vec<Arc<Executor>> {
        let mut executors = self.executors.lock().unwrap();
        executors.drain().map(|(_, v)| v).collect()
    }

    pub fn len(&self) -> usize {
        self.executors.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingConsumer {
        consumed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Consumer for CountingConsumer {
        async fn consume(&self, messages: &[Message], _ctx: &ConsumeContext) -> anyhow::Result<()> {
            self.consumed.fetch_add(messages.len(), Ordering::SeqCst);
            Ok(())
        }
    }

    fn factory(consumed: Arc<AtomicUsize>) -> ConsumerFactory {
        Arc::new(move |_key| Box::new(CountingConsumer { consumed: consumed.clone() }) as Box<dyn Consumer>)
    }

    fn message(offset: i64) -> Message {
        Message {
            topic: "orders".into(),
            partition: 0,
            offset,
            timestamp: None,
            key: None,
            payload: None,
            headers: vec![],
        }
    }

    #[tokio::test]
    async fn find_or_create_builds_lazily_and_reuses() {
        let consumed = Arc::new(AtomicUsize::new(0));
        let buffer = ExecutorsBuffer::new(factory(consumed.clone()));
        let key = ExecutorKey::new(TopicPartition::new("orders", 0), 0);

        let a = buffer.find_or_create(&key);
        let b = buffer.find_or_create(&key);
        assert!(Arc::ptr_eq(&a, &b));

        let (result, _ctx) = a.run_consume(&[message(1), message(2)], false).await;
        result.unwrap();
        assert_eq!(consumed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn revoke_removes_all_virtual_groups_for_partition() {
        let consumed = Arc::new(AtomicUsize::new(0));
        let buffer = ExecutorsBuffer::new(factory(consumed));
        let tp = TopicPartition::new("orders", 0);

        buffer.find_or_create(&ExecutorKey::new(tp.clone(), 0));
        buffer.find_or_create(&ExecutorKey::new(tp.clone(), 1));
        buffer.find_or_create(&ExecutorKey::new(TopicPartition::new("orders", 1), 0));

        let revoked = buffer.revoke(&tp);
        assert_eq!(revoked.len(), 2);
        assert_eq!(buffer.len(), 1);
    }

    struct MarkingConsumer;

    #[async_trait]
    impl Consumer for MarkingConsumer {
        async fn consume(&self, messages: &[Message], ctx: &ConsumeContext) -> anyhow::Result<()> {
            for message in messages {
                ctx.mark_as_consumed(message);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn consume_context_reports_explicit_mark_back_to_the_caller() {
        let key = ExecutorKey::new(TopicPartition::new("orders", 0), 0);
        let executor = Executor::new(key, Box::new(MarkingConsumer));

        let (result, ctx) = executor.run_consume(&[message(1)], false).await;
        result.unwrap();

        assert!(ctx.was_marked());
        assert_eq!(ctx.requested_pause(), None);
        assert!(!ctx.active_job());
    }

    struct LongRunningJobConsumer;

    #[async_trait]
    impl Consumer for LongRunningJobConsumer {
        async fn consume(&self, _messages: &[Message], ctx: &ConsumeContext) -> anyhow::Result<()> {
            ctx.pause(42);
            ctx.seek(42);
            ctx.retry_after_pause();
            Ok(())
        }
    }

    #[tokio::test]
    async fn consume_context_carries_pause_seek_and_retry_requests() {
        let key = ExecutorKey::new(TopicPartition::new("orders", 0), 0);
        let executor = Executor::new(key, Box::new(LongRunningJobConsumer));

        let (result, ctx) = executor.run_consume(&[message(1)], true).await;
        result.unwrap();

        assert_eq!(ctx.requested_pause(), Some(42));
        assert_eq!(ctx.requested_seek(), Some(42));
        assert!(ctx.retry_requested());
        assert!(ctx.active_job());
    }
}
