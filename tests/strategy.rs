mod common;

use common::{message, FakeClient};
use partition_core::config::{DeadLetterQueueConfig, DlqDispatchMethod, FilteringConfig, TopicConfig, VirtualPartitionsConfig};
use partition_core::coordinator::{Coordinator, JobOutcome};
use partition_core::pause_tracker::BackoffConfig;
use partition_core::strategy::Strategy;
use partition_core::{Filter, Message, TopicPartition};

#[test]
fn manual_offset_management_topic_does_not_auto_commit_without_mark() {
    let tp = TopicPartition::new("orders", 0);
    let coordinator = Coordinator::new(tp.clone(), BackoffConfig::default());
    coordinator.start(&[(0, vec![message("orders", 0, 5)])]);
    coordinator.increment();
    coordinator.decrement(0, JobOutcome::success());

    let config = TopicConfig {
        manual_offset_management: true,
        ..Default::default()
    };
    let strategy = Strategy::new(tp, config, None);
    let client = FakeClient::new();

    strategy
        .handle_after_consume(&coordinator, &client, Some(message("orders", 0, 5)))
        .unwrap();

    assert!(client.committed.lock().unwrap().is_empty());
}

#[test]
fn manual_offset_management_topic_commits_once_explicitly_marked() {
    let tp = TopicPartition::new("orders", 0);
    let coordinator = Coordinator::new(tp.clone(), BackoffConfig::default());
    coordinator.start(&[(0, vec![message("orders", 0, 5)])]);
    coordinator.mark_as_consumed();
    coordinator.increment();
    coordinator.decrement(0, JobOutcome::success());

    let config = TopicConfig {
        manual_offset_management: true,
        ..Default::default()
    };
    let strategy = Strategy::new(tp.clone(), config, None);
    let client = FakeClient::new();

    strategy
        .handle_after_consume(&coordinator, &client, Some(message("orders", 0, 5)))
        .unwrap();

    assert_eq!(client.committed.lock().unwrap().as_slice(), &[(tp, 6)]);
}

/// spec.md section 8 scenario 4: an ActiveJob + DLQ + Filter +
/// manual-offset-management + virtual-partitions topic still commits, once,
/// after both virtual groups finish -- the final paragraph of spec.md
/// section 4.3 carves this combination out of the "only commit when marked"
/// rule, since virtual groups interleave and there is no single message the
/// user could mark.
#[test]
fn scenario_4_aj_dlq_filter_mom_vp_commits_once_after_both_groups_finish() {
    let tp = TopicPartition::new("orders", 0);
    let coordinator = Coordinator::new(tp.clone(), BackoffConfig::default());

    let config = TopicConfig {
        manual_offset_management: true,
        active_job: true,
        dead_letter_queue: Some(DeadLetterQueueConfig {
            topic: Some("orders.dlq".to_string()),
            max_retries: 2,
            dispatch_method: DlqDispatchMethod::ProduceAsync,
        }),
        virtual_partitions: Some(VirtualPartitionsConfig { max_partitions: 2 }),
        filtering: Some(FilteringConfig { cursor_timeout_ms: 1_000 }),
        ..Default::default()
    };
    let strategy = Strategy::new(tp.clone(), config, None);
    let client = FakeClient::new();

    let group_a: Vec<Message> = (10..20).step_by(2).map(|o| message("orders", 0, o)).collect();
    let group_b: Vec<Message> = (11..20).step_by(2).map(|o| message("orders", 0, o)).collect();

    // First pass: group A fails, group B succeeds -- no commit yet.
    coordinator.start(&[(0, group_a.clone()), (1, group_b.clone())]);
    coordinator.increment();
    coordinator.increment();
    coordinator.decrement(0, JobOutcome::failure());
    coordinator.decrement(1, JobOutcome::success());

    strategy
        .handle_after_consume(&coordinator, &client, Some(message("orders", 0, 19)))
        .unwrap();
    assert!(client.committed.lock().unwrap().is_empty());

    // Second pass: both groups succeed -- single commit at the batch's end.
    coordinator.start(&[(0, group_a), (1, group_b)]);
    coordinator.increment();
    coordinator.increment();
    coordinator.decrement(0, JobOutcome::success());
    coordinator.decrement(1, JobOutcome::success());

    strategy
        .handle_after_consume(&coordinator, &client, Some(message("orders", 0, 19)))
        .unwrap();

    assert_eq!(client.committed.lock().unwrap().as_slice(), &[(tp, 20)]);
}

struct DropAboveOffset(i64);

impl Filter for DropAboveOffset {
    fn should_drop(&self, message: &Message) -> bool {
        message.offset > self.0
    }
}

#[test]
fn filter_seeks_back_to_and_pauses_on_the_earliest_dropped_tail_offset() {
    let tp = TopicPartition::new("orders", 0);
    let coordinator = Coordinator::new(tp.clone(), BackoffConfig::default());
    let batch = vec![message("orders", 0, 5), message("orders", 0, 6), message("orders", 0, 7)];
    coordinator.start(&[(0, batch)]);
    coordinator.increment();
    coordinator.decrement(0, JobOutcome::success());

    let config = TopicConfig {
        filtering: Some(FilteringConfig { cursor_timeout_ms: 30_000 }),
        ..Default::default()
    };
    let strategy = Strategy::new(tp.clone(), config, Some(Box::new(DropAboveOffset(5))));
    let client = FakeClient::new();

    strategy
        .handle_after_consume(&coordinator, &client, Some(message("orders", 0, 7)))
        .unwrap();

    assert_eq!(client.seeks.lock().unwrap().as_slice(), &[(tp.clone(), 6)]);
    assert_eq!(client.paused.lock().unwrap().as_slice(), &[tp]);
}

#[test]
fn revoked_coordinator_short_circuits_before_any_client_call() {
    let tp = TopicPartition::new("orders", 0);
    let coordinator = Coordinator::new(tp.clone(), BackoffConfig::default());
    coordinator.mark_revoked();
    coordinator.start(&[(0, vec![message("orders", 0, 5)])]);
    coordinator.increment();
    coordinator.decrement(0, JobOutcome::failure());

    let strategy = Strategy::new(tp, TopicConfig::default(), None);
    let client = FakeClient::new();

    strategy
        .handle_after_consume(&coordinator, &client, Some(message("orders", 0, 5)))
        .unwrap();

    assert!(client.committed.lock().unwrap().is_empty());
    assert!(client.produced.lock().unwrap().is_empty());
    assert!(client.paused.lock().unwrap().is_empty());
}
