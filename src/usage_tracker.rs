use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::message::TopicPartition;

/// Tracks last-activity time per topic-partition so the Listener can decide
/// which assigned partitions are eligible for a periodic job (spec.md
/// section 2, section 4.1 step 7: "whose UsageTracker is not active").
#[derive(Debug, Default)]
pub struct UsageTracker {
    last_activity: HashMap<TopicPartition, Instant>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records activity for `tp` at the current instant.
    pub fn track(&mut self, tp: &TopicPartition) {
        self.last_activity.insert(tp.clone(), Instant::now());
    }

    /// Marks `tp` as revoked: its activity record is dropped so a later
    /// reassignment starts with a clean idle clock.
    pub fn revoke(&mut self, tp: &TopicPartition) {
        self.last_activity.remove(tp);
    }

    /// True when `tp` has seen activity within `idle_threshold` of now.
    /// A partition with no recorded activity at all is never "active".
    pub fn is_active(&self, tp: &TopicPartition, idle_threshold: Duration) -> bool {
        self.last_activity
            .get(tp)
            .map(|last| last.elapsed() < idle_threshold)
            .unwrap_or(false)
    }

    pub fn clear(&mut self) {
        self.last_activity.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn untracked_partition_is_not_active() {
        let tracker = UsageTracker::new();
        let tp = TopicPartition::new("orders", 0);

        assert!(!tracker.is_active(&tp, Duration::from_secs(60)));
    }

    #[test]
    fn tracked_partition_is_active_until_threshold_elapses() {
        let mut tracker = UsageTracker::new();
        let tp = TopicPartition::new("orders", 0);

        tracker.track(&tp);
        assert!(tracker.is_active(&tp, Duration::from_millis(50)));

        sleep(Duration::from_millis(60));
        assert!(!tracker.is_active(&tp, Duration::from_millis(50)));
    }

    #[test]
    fn revoke_clears_activity() {
        let mut tracker = UsageTracker::new();
        let tp = TopicPartition::new("orders", 0);

        tracker.track(&tp);
        tracker.revoke(&tp);

        assert!(!tracker.is_active(&tp, Duration::from_secs(60)));
    }
}
