use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use partition_core::{Client, ClientError, Message, TopicPartition};

/// Installs a best-effort tracing subscriber for the test binary; the core
/// itself never does this (spec.md section 1), but seeing `strategy.dlq.dispatch`
/// and friends is useful when a test fails.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// An in-memory stand-in for the broker collaborator, so the fetch loop,
/// coordinator, and strategy layers can be driven end-to-end without a live
/// Kafka cluster (SPEC_FULL.md section A.4).
#[derive(Default)]
pub struct FakeClient {
    batches: Mutex<VecDeque<Vec<Message>>>,
    watermarks: Mutex<HashMap<TopicPartition, (i64, i64)>>,
    revoked: Mutex<HashMap<String, Vec<i32>>>,

    pub committed: Mutex<Vec<(TopicPartition, i64)>>,
    pub paused: Mutex<Vec<TopicPartition>>,
    pub resumed: Mutex<Vec<TopicPartition>>,
    pub seeks: Mutex<Vec<(TopicPartition, i64)>>,
    pub produced: Mutex<Vec<(String, Message)>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one generation's worth of messages to be returned by the next
    /// `batch_poll` call; an empty queue yields an empty poll.
    pub fn enqueue_batch(&self, messages: Vec<Message>) {
        self.batches.lock().unwrap().push_back(messages);
    }

    pub fn set_watermarks(&self, tp: TopicPartition, low: i64, high: i64) {
        self.watermarks.lock().unwrap().insert(tp, (low, high));
    }

    pub fn queue_revocation(&self, topic: &str, partition: i32) {
        self.revoked
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push(partition);
    }
}

#[async_trait]
impl Client for FakeClient {
    async fn batch_poll(&self, _max_messages: usize, _max_wait: Duration) -> Result<Vec<Message>, ClientError> {
        Ok(self.batches.lock().unwrap().pop_front().unwrap_or_default())
    }

    fn events_poll(&self, _timeout_ms: u64) {}

    fn ping(&self) {}

    fn pause(&self, tp: &TopicPartition, _until: Option<Instant>) -> Result<(), ClientError> {
        self.paused.lock().unwrap().push(tp.clone());
        Ok(())
    }

    fn resume(&self, tp: &TopicPartition) -> Result<(), ClientError> {
        self.resumed.lock().unwrap().push(tp.clone());
        Ok(())
    }

    fn seek(&self, tp: &TopicPartition, offset: i64) -> Result<(), ClientError> {
        self.seeks.lock().unwrap().push((tp.clone(), offset));
        Ok(())
    }

    fn commit_offsets(&self, tp: &TopicPartition, offset: i64) -> Result<(), ClientError> {
        self.committed.lock().unwrap().push((tp.clone(), offset));
        Ok(())
    }

    fn stop(&self) {}

    fn reset(&self) -> Result<(), ClientError> {
        Ok(())
    }

    fn revoked_partitions(&self) -> HashMap<String, Vec<i32>> {
        std::mem::take(&mut *self.revoked.lock().unwrap())
    }

    fn query_watermark_offsets(&self, tp: &TopicPartition) -> Result<(i64, i64), ClientError> {
        self.watermarks
            .lock()
            .unwrap()
            .get(tp)
            .copied()
            .ok_or_else(|| ClientError::UnknownPartition(tp.clone()))
    }

    fn offsets_for_times(
        &self,
        _targets: &[(TopicPartition, i64)],
        _timeout: Duration,
    ) -> Result<HashMap<TopicPartition, i64>, ClientError> {
        Ok(HashMap::new())
    }

    async fn produce(&self, topic: &str, message: &Message) -> Result<(), ClientError> {
        self.produced.lock().unwrap().push((topic.to_string(), message.clone()));
        Ok(())
    }
}

pub fn message(topic: &str, partition: i32, offset: i64) -> Message {
    Message {
        topic: topic.to_string(),
        partition,
        offset,
        timestamp: None,
        key: None,
        payload: Some(offset.to_string().into_bytes()),
        headers: vec![],
    }
}
