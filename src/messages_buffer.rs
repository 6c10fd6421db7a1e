use std::collections::BTreeMap;

use crate::message::{Message, TopicPartition};

/// Holds the single-generation raw batch from one `Client::batch_poll` call,
/// grouped by topic-partition (spec.md section 2 "MessagesBuffer").
///
/// Cleared at the start of every poll cycle; never carries state across
/// cycles.
#[derive(Debug, Default)]
pub struct MessagesBuffer {
    by_partition: BTreeMap<TopicPartition, Vec<Message>>,
}

impl MessagesBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the buffer's contents with a freshly polled batch, grouping
    /// messages by topic-partition. Broker order within a partition is
    /// preserved.
    pub fn fill(&mut self, messages: Vec<Message>) {
        self.by_partition.clear();

        for message in messages {
            self.by_partition
                .entry(message.topic_partition())
                .or_default()
                .push(message);
        }
    }

    pub fn clear(&mut self) {
        self.by_partition.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.by_partition.is_empty()
    }

    /// Iterates `(topic_partition, messages)` pairs in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = (&TopicPartition, &Vec<Message>)> {
        self.by_partition.iter()
    }

    pub fn partitions(&self) -> impl Iterator<Item = &TopicPartition> {
        self.by_partition.keys()
    }

    pub fn messages_for(&self, tp: &TopicPartition) -> Option<&Vec<Message>> {
        self.by_partition.get(tp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(topic: &str, partition: i32, offset: i64) -> Message {
        Message {
            topic: topic.into(),
            partition,
            offset,
            timestamp: None,
            key: None,
            payload: None,
            headers: vec![],
        }
    }

    #[test]
    fn groups_messages_by_topic_partition() {
        let mut buffer = MessagesBuffer::new();
        buffer.fill(vec![
            message("orders", 0, 10),
            message("orders", 1, 5),
            message("orders", 0, 11),
        ]);

        let tp0 = TopicPartition::new("orders", 0);
        let tp1 = TopicPartition::new("orders", 1);

        assert_eq!(buffer.messages_for(&tp0).unwrap().len(), 2);
        assert_eq!(buffer.messages_for(&tp1).unwrap().len(), 1);
        assert_eq!(buffer.messages_for(&tp0).unwrap()[0].offset, 10);
        assert_eq!(buffer.messages_for(&tp0).unwrap()[1].offset, 11);
    }

    #[test]
    fn fill_clears_previous_generation() {
        let mut buffer = MessagesBuffer::new();
        buffer.fill(vec![message("orders", 0, 10)]);
        buffer.fill(vec![message("orders", 1, 5)]);

        assert!(buffer.messages_for(&TopicPartition::new("orders", 0)).is_none());
        assert!(buffer.messages_for(&TopicPartition::new("orders", 1)).is_some());
    }

    #[test]
    fn empty_fill_is_empty() {
        let mut buffer = MessagesBuffer::new();
        buffer.fill(vec![]);
        assert!(buffer.is_empty());
    }
}
