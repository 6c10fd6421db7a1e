use std::fmt;

/// Identifies a single partition of a single topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

/// A stable integer identifying a virtual partition group within a single
/// batch. Messages sharing the same `group_id` in the same batch preserve
/// broker order; order across group ids is unspecified.
pub type VirtualGroupId = u64;

/// The virtual group id used when virtual partitioning is disabled for a
/// topic: every message in the batch belongs to the same, single group.
pub const DEFAULT_VIRTUAL_GROUP_ID: VirtualGroupId = 0;

/// A single polled message, detached from the underlying transport so it can
/// outlive the poll call that produced it and be passed freely between
/// threads.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: Option<i64>,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub headers: Vec<(String, Vec<u8>)>,
}

impl Message {
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    /// The offset one past this message: what a consumer commits in order to
    /// mark this message, and everything before it, as consumed.
    pub fn next_offset(&self) -> i64 {
        self.offset + 1
    }
}

/// A batch of messages belonging to one topic-partition, as handed to a
/// [`crate::partitioner::Partitioner`].
pub type MessageBatch = Vec<Message>;
