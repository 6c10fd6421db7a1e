use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::message::{Message, VirtualGroupId, DEFAULT_VIRTUAL_GROUP_ID};

/// Splits a topic-partition's batch into virtual-partition groups (spec.md
/// section 2 "Partitioner", section 4.1 step 5). Implementations must preserve
/// broker order of messages assigned to the same `group_id`.
pub trait Partitioner: Send + Sync {
    fn call(&self, messages: Vec<Message>) -> Vec<(VirtualGroupId, Vec<Message>)>;
}

/// The identity partitioner: virtual partitioning disabled, every message
/// belongs to the single default group. Used whenever a topic does not
/// declare `virtual_partitions` (spec.md section 2 "identity when VP disabled").
#[derive(Debug, Default)]
pub struct IdentityPartitioner;

impl Partitioner for IdentityPartitioner {
    fn call(&self, messages: Vec<Message>) -> Vec<(VirtualGroupId, Vec<Message>)> {
        if messages.is_empty() {
            return Vec::new();
        }

        vec![(DEFAULT_VIRTUAL_GROUP_ID, messages)]
    }
}

/// A user-supplied key extraction function, matching the
/// `virtual_partitions.partitioner: fn(message) -> key` configuration
/// surface (spec.md section 6).
pub type KeyExtractor = Box<dyn Fn(&Message) -> Vec<u8> + Send + Sync>;

/// Splits a batch into up to `max_partitions` virtual groups by hashing a
/// user-extracted key. Messages with the same key always land in the same
/// group within a batch, which is what preserves per-key order (spec.md
/// section 3 "VirtualPartition group_id" invariant).
pub struct HashPartitioner {
    key_fn: KeyExtractor,
    max_partitions: u64,
}

impl HashPartitioner {
    pub fn new(key_fn: KeyExtractor, max_partitions: u64) -> Self {
        assert!(max_partitions > 0, "max_partitions must be positive");
        Self {
            key_fn,
            max_partitions,
        }
    }

    fn group_id(&self, message: &Message) -> VirtualGroupId {
        let key = (self.key_fn)(message);
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() % self.max_partitions
    }
}

impl Partitioner for HashPartitioner {
    fn call(&self, messages: Vec<Message>) -> Vec<(VirtualGroupId, Vec<Message>)> {
        let mut groups: std::collections::BTreeMap<VirtualGroupId, Vec<Message>> =
            std::collections::BTreeMap::new();

        for message in messages {
            let group_id = self.group_id(&message);
            groups.entry(group_id).or_default().push(message);
        }

        groups.into_iter().collect()
    }
}
