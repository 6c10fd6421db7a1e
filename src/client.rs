use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer as RdConsumer, ConsumerContext, Rebalance};
use rdkafka::message::{Header, Headers, OwnedHeaders, OwnedMessage};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::Message as RdMessage;

use crate::error::ClientError;
use crate::message::{Message, TopicPartition};

/// The opaque external Kafka client collaborator (spec.md section 6
/// "Client (external)"). The core only ever talks to this trait; the wire
/// protocol itself is out of scope (spec.md section 1).
#[async_trait]
pub trait Client: Send + Sync {
    /// Polls up to `max_messages` messages, or until `max_wait` elapses,
    /// whichever comes first. librdkafka itself has no native batch-poll, so
    /// implementations loop single polls within the deadline.
    async fn batch_poll(&self, max_messages: usize, max_wait: Duration) -> Result<Vec<Message>, ClientError>;

    fn events_poll(&self, timeout_ms: u64);

    fn ping(&self);

    fn pause(&self, tp: &TopicPartition, until: Option<Instant>) -> Result<(), ClientError>;

    fn resume(&self, tp: &TopicPartition) -> Result<(), ClientError>;

    fn seek(&self, tp: &TopicPartition, offset: i64) -> Result<(), ClientError>;

    fn commit_offsets(&self, tp: &TopicPartition, offset: i64) -> Result<(), ClientError>;

    fn stop(&self);

    fn reset(&self) -> Result<(), ClientError>;

    /// `rebalance_manager.revoked_partitions` (spec.md section 6): topics
    /// mapped to the partitions the broker revoked since the last drain.
    fn revoked_partitions(&self) -> HashMap<String, Vec<i32>>;

    fn query_watermark_offsets(&self, tp: &TopicPartition) -> Result<(i64, i64), ClientError>;

    fn offsets_for_times(
        &self,
        targets: &[(TopicPartition, i64)],
        timeout: Duration,
    ) -> Result<HashMap<TopicPartition, i64>, ClientError>;

    async fn produce(&self, topic: &str, message: &Message) -> Result<(), ClientError>;
}

/// Tracks partitions revoked by the broker's rebalance protocol, written from
/// librdkafka's rebalance callback thread and read from the Listener thread
/// as an atomic snapshot pointer rather than a lock (spec.md section 9
/// "Assignment tracking").
#[derive(Clone)]
struct RebalanceTracker {
    revoked: Arc<ArcSwap<HashMap<String, Vec<i32>>>>,
}

impl Default for RebalanceTracker {
    fn default() -> Self {
        Self {
            revoked: Arc::new(ArcSwap::from_pointee(HashMap::new())),
        }
    }
}

impl RebalanceTracker {
    fn record_revoked(&self, tpl: &TopicPartitionList) {
        self.revoked.rcu(|current| {
            let mut next = (**current).clone();
            for elem in tpl.elements() {
                next.entry(elem.topic().to_string()).or_default().push(elem.partition());
            }
            next
        });
    }

    fn take(&self) -> HashMap<String, Vec<i32>> {
        (*self.revoked.swap(Arc::new(HashMap::new()))).clone()
    }
}

struct CoreConsumerContext {
    tracker: RebalanceTracker,
}

impl ClientContext for CoreConsumerContext {}

impl ConsumerContext for CoreConsumerContext {
    fn pre_rebalance(&self, rebalance: &Rebalance) {
        if let Rebalance::Revoke(tpl) = rebalance {
            self.tracker.record_revoked(tpl);
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance) {
        tracing::debug!(?rebalance, "post_rebalance");
    }
}

/// Production [`Client`] implementation backed by `rdkafka`'s `BaseConsumer`
/// and `FutureProducer` (spec.md section 6, grounded on the teacher's use of
/// `rdkafka::consumer::StreamConsumer` / `ClientConfig` in `source/kafka.rs`,
/// adapted here to the synchronous `BaseConsumer` the Listener's
/// poll-then-dispatch loop needs).
pub struct RdKafkaClient {
    consumer: BaseConsumer<CoreConsumerContext>,
    producer: FutureProducer,
    tracker: RebalanceTracker,
}

impl RdKafkaClient {
    pub fn new(client_config: &ClientConfig, topics: &[&str]) -> Result<Self, ClientError> {
        let tracker = RebalanceTracker::default();
        let context = CoreConsumerContext {
            tracker: tracker.clone(),
        };

        let consumer: BaseConsumer<CoreConsumerContext> = client_config
            .create_with_context(context)
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        consumer
            .subscribe(topics)
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let producer: FutureProducer = client_config
            .create()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            consumer,
            producer,
            tracker,
        })
    }

    fn message_from_owned(owned: OwnedMessage) -> Message {
        let headers = owned
            .headers()
            .map(|h| {
                (0..h.count())
                    .filter_map(|i| {
                        let header = h.get(i);
                        Some((header.key.to_string(), header.value.map(|v| v.to_vec()).unwrap_or_default()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Message {
            topic: owned.topic().to_string(),
            partition: owned.partition(),
            offset: owned.offset(),
            timestamp: owned.timestamp().to_millis(),
            key: owned.key().map(|k| k.to_vec()),
            payload: owned.payload().map(|p| p.to_vec()),
            headers,
        }
    }
}

#[async_trait]
impl Client for RdKafkaClient {
    async fn batch_poll(&self, max_messages: usize, max_wait: Duration) -> Result<Vec<Message>, ClientError> {
        let deadline = Instant::now() + max_wait;
        let mut messages = Vec::with_capacity(max_messages.min(256));

        while messages.len() < max_messages {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match self.consumer.poll(remaining.min(Duration::from_millis(100))) {
                Some(Ok(borrowed)) => messages.push(Self::message_from_owned(borrowed.detach())),
                Some(Err(e)) => return Err(ClientError::Transport(e.to_string())),
                None => {
                    if !messages.is_empty() {
                        break;
                    }
                    if Instant::now() >= deadline {
                        break;
                    }
                }
            }
        }

        Ok(messages)
    }

    fn events_poll(&self, timeout_ms: u64) {
        let _ = self.consumer.poll(Duration::from_millis(timeout_ms));
    }

    fn ping(&self) {
        let _ = self.consumer.poll(Duration::from_millis(0));
    }

    fn pause(&self, tp: &TopicPartition, _until: Option<Instant>) -> Result<(), ClientError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition(&tp.topic, tp.partition);
        self.consumer
            .pause(&tpl)
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    fn resume(&self, tp: &TopicPartition) -> Result<(), ClientError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition(&tp.topic, tp.partition);
        self.consumer
            .resume(&tpl)
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    fn seek(&self, tp: &TopicPartition, offset: i64) -> Result<(), ClientError> {
        self.consumer
            .seek(&tp.topic, tp.partition, Offset::Offset(offset), Duration::from_secs(5))
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    fn commit_offsets(&self, tp: &TopicPartition, offset: i64) -> Result<(), ClientError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&tp.topic, tp.partition, Offset::Offset(offset))
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        self.consumer
            .commit(&tpl, rdkafka::consumer::CommitMode::Async)
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    fn stop(&self) {
        self.consumer.unsubscribe();
    }

    fn reset(&self) -> Result<(), ClientError> {
        // Rebalance bookkeeping is cleared; the underlying rdkafka handle
        // itself is recreated by the Listener on restart (spec.md section 4.1
        // "resets events-poller and Client").
        self.tracker.take();
        Ok(())
    }

    fn revoked_partitions(&self) -> HashMap<String, Vec<i32>> {
        self.tracker.take()
    }

    fn query_watermark_offsets(&self, tp: &TopicPartition) -> Result<(i64, i64), ClientError> {
        self.consumer
            .fetch_watermarks(&tp.topic, tp.partition, Duration::from_secs(5))
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    fn offsets_for_times(
        &self,
        targets: &[(TopicPartition, i64)],
        timeout: Duration,
    ) -> Result<HashMap<TopicPartition, i64>, ClientError> {
        let mut tpl = TopicPartitionList::new();
        for (tp, ts) in targets {
            tpl.add_partition_offset(&tp.topic, tp.partition, Offset::Offset(*ts))
                .map_err(|e| ClientError::Transport(e.to_string()))?;
        }

        let resolved = self
            .consumer
            .offsets_for_times(tpl, timeout)
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let mut result = HashMap::new();
        for elem in resolved.elements() {
            if let Offset::Offset(offset) = elem.offset() {
                result.insert(TopicPartition::new(elem.topic(), elem.partition()), offset);
            }
        }

        Ok(result)
    }

    async fn produce(&self, topic: &str, message: &Message) -> Result<(), ClientError> {
        let mut headers = OwnedHeaders::new();
        for (key, value) in &message.headers {
            headers = headers.insert(Header {
                key,
                value: Some(value),
            });
        }

        let mut record = FutureRecord::to(topic).headers(headers);
        if let Some(payload) = message.payload.as_ref() {
            record = record.payload(payload);
        }
        if let Some(key) = message.key.as_ref() {
            record = record.key(key);
        }

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| ClientError::Transport(e.to_string()))?;

        Ok(())
    }
}
