use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::message::{Message, TopicPartition, VirtualGroupId};
use crate::pause_tracker::{BackoffConfig, PauseTracker};

/// A job's outcome as reported to [`Coordinator::decrement`].
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub ok: bool,
}

impl JobOutcome {
    pub fn success() -> Self {
        Self { ok: true }
    }

    pub fn failure() -> Self {
        Self { ok: false }
    }
}

type FinishedCallback = Box<dyn Fn(Option<Message>, bool) + Send + Sync>;

/// Tracks outstanding virtual-partition jobs for one topic-partition across
/// one batch generation, firing `on_finished` exactly once when the last job
/// completes (spec.md section 3 "Coordinator", section 4.2).
///
/// `on_finished` runs synchronously on the thread that decrements the
/// outstanding count to zero; the decrement-to-zero synchronizes-with every
/// prior decrement, so the callback observes a stable aggregate
/// (spec.md section 4.2 "Ordering guarantee").
pub struct Coordinator {
    tp: TopicPartition,
    outstanding_jobs: AtomicI64,
    success: AtomicBool,
    manual_pause: AtomicBool,
    revoked: AtomicBool,
    seek_offset: AtomicI64,
    pause_tracker: Mutex<PauseTracker>,
    finished_callbacks: Mutex<Vec<FinishedCallback>>,
    last_group_message: Mutex<HashMap<VirtualGroupId, Message>>,
    batch_start_message: Mutex<Option<Message>>,
    finished_count: AtomicU64,
    marked: AtomicBool,
    user_pause_offset: Mutex<Option<i64>>,
    user_seek_offset: Mutex<Option<i64>>,
    retry_after_pause_requested: AtomicBool,
    batch_messages: Mutex<Vec<Message>>,
    processed_count: AtomicU64,
    retried_count: AtomicU64,
    dlq_dispatched_count: AtomicU64,
}

impl Coordinator {
    pub fn new(tp: TopicPartition, backoff: BackoffConfig) -> Self {
        Self {
            tp,
            outstanding_jobs: AtomicI64::new(0),
            success: AtomicBool::new(true),
            manual_pause: AtomicBool::new(false),
            revoked: AtomicBool::new(false),
            seek_offset: AtomicI64::new(0),
            pause_tracker: Mutex::new(PauseTracker::new(backoff)),
            finished_callbacks: Mutex::new(Vec::new()),
            last_group_message: Mutex::new(HashMap::new()),
            batch_start_message: Mutex::new(None),
            finished_count: AtomicU64::new(0),
            marked: AtomicBool::new(false),
            user_pause_offset: Mutex::new(None),
            user_seek_offset: Mutex::new(None),
            retry_after_pause_requested: AtomicBool::new(false),
            batch_messages: Mutex::new(Vec::new()),
            processed_count: AtomicU64::new(0),
            retried_count: AtomicU64::new(0),
            dlq_dispatched_count: AtomicU64::new(0),
        }
    }

    pub fn topic_partition(&self) -> &TopicPartition {
        &self.tp
    }

    /// Installs an `on_finished(last_group_message, success)` continuation.
    /// Must be called by the Strategy layer before the first `increment` of
    /// a batch (spec.md section 4.2: "installed by the Strategy before the
    /// first increment").
    pub fn register_on_finished(&self, cb: FinishedCallback) {
        self.finished_callbacks.lock().unwrap().push(cb);
    }

    /// Resets per-batch state and records each virtual group's last message,
    /// so `on_finished` can later report the right `last_group_message` per
    /// group (spec.md section 4.2 `start`).
    pub fn start(&self, groups: &[(VirtualGroupId, Vec<Message>)]) {
        self.success.store(true, Ordering::SeqCst);
        self.outstanding_jobs.store(0, Ordering::SeqCst);
        self.marked.store(false, Ordering::SeqCst);
        self.retry_after_pause_requested.store(false, Ordering::SeqCst);
        *self.user_pause_offset.lock().unwrap() = None;
        *self.user_seek_offset.lock().unwrap() = None;

        let mut batch_messages: Vec<Message> = groups
            .iter()
            .flat_map(|(_, messages)| messages.iter().cloned())
            .collect();
        batch_messages.sort_by_key(|m| m.offset);
        *self.batch_messages.lock().unwrap() = batch_messages;

        let mut last_group_message = self.last_group_message.lock().unwrap();
        last_group_message.clear();
        for (group_id, messages) in groups {
            if let Some(last) = messages.last() {
                last_group_message.insert(*group_id, last.clone());
            }
        }
        drop(last_group_message);

        let batch_start = groups
            .iter()
            .flat_map(|(_, messages)| messages.iter())
            .min_by_key(|m| m.offset)
            .cloned();

        if let Some(start) = &batch_start {
            self.seek_offset.store(start.offset, Ordering::SeqCst);
        }
        *self.batch_start_message.lock().unwrap() = batch_start;
    }

    /// The lowest-offset message in the current batch, i.e. the "skippable
    /// message" candidate used when retries are exhausted (spec.md section 4.3).
    pub fn batch_start_message(&self) -> Option<Message> {
        self.batch_start_message.lock().unwrap().clone()
    }

    /// The current batch's messages across every virtual group, offset-sorted
    /// (spec.md section 4.3 post-filtering scans the tail of this set).
    pub fn batch_messages(&self) -> Vec<Message> {
        self.batch_messages.lock().unwrap().clone()
    }

    /// Records that user code explicitly called `mark_as_consumed` during
    /// this batch (spec.md section 6, gates manual-offset-management commits).
    pub fn mark_as_consumed(&self) {
        self.marked.store(true, Ordering::SeqCst);
    }

    pub fn marked(&self) -> bool {
        self.marked.load(Ordering::SeqCst)
    }

    /// Records a user-requested indefinite pause at `offset` (spec.md
    /// section 6 `pause`, the long-running-job path).
    pub fn request_pause(&self, offset: i64) {
        *self.user_pause_offset.lock().unwrap() = Some(offset);
    }

    pub fn requested_pause(&self) -> Option<i64> {
        *self.user_pause_offset.lock().unwrap()
    }

    /// Records a user-requested seek to `offset` (spec.md section 6 `seek`).
    pub fn request_seek(&self, offset: i64) {
        *self.user_seek_offset.lock().unwrap() = Some(offset);
    }

    pub fn requested_seek(&self) -> Option<i64> {
        *self.user_seek_offset.lock().unwrap()
    }

    /// Records a user-requested `retry_after_pause` (spec.md section 6), the
    /// long-running-job resumption path distinct from an indefinite pause.
    pub fn request_retry_after_pause(&self) {
        self.retry_after_pause_requested.store(true, Ordering::SeqCst);
    }

    pub fn retry_after_pause_requested(&self) -> bool {
        self.retry_after_pause_requested.load(Ordering::SeqCst)
    }

    /// SPEC_FULL.md section B.4 counters: one message successfully processed.
    pub fn record_processed(&self) {
        self.processed_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn processed_count(&self) -> u64 {
        self.processed_count.load(Ordering::SeqCst)
    }

    /// SPEC_FULL.md section B.4 counters: one message scheduled for retry.
    pub fn record_retried(&self) {
        self.retried_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn retried_count(&self) -> u64 {
        self.retried_count.load(Ordering::SeqCst)
    }

    /// SPEC_FULL.md section B.4 counters: one message dispatched to the DLQ.
    pub fn record_dlq_dispatched(&self) {
        self.dlq_dispatched_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn dlq_dispatched_count(&self) -> u64 {
        self.dlq_dispatched_count.load(Ordering::SeqCst)
    }

    /// Must be called from the Listener before a job is scheduled
    /// (spec.md section 4.2 `increment`).
    pub fn increment(&self) {
        self.outstanding_jobs.fetch_add(1, Ordering::SeqCst);
    }

    /// Reports completion of one job. When the outstanding count reaches
    /// zero, fires every registered `on_finished` callback synchronously,
    /// passing the overall batch's last group message (by highest offset
    /// across all virtual groups) and the aggregate success flag.
    pub fn decrement(&self, group_id: VirtualGroupId, outcome: JobOutcome) {
        if !outcome.ok {
            self.success.store(false, Ordering::SeqCst);
        }

        let remaining = self.outstanding_jobs.fetch_sub(1, Ordering::SeqCst) - 1;
        debug_assert!(remaining >= 0, "outstanding_jobs went negative");

        if remaining == 0 {
            let success = self.success.load(Ordering::SeqCst);
            let last_message = {
                let messages = self.last_group_message.lock().unwrap();
                messages
                    .values()
                    .max_by_key(|m| m.offset)
                    .cloned()
                    .or_else(|| messages.get(&group_id).cloned())
            };

            self.finished_count.fetch_add(1, Ordering::SeqCst);

            tracing::debug!(
                topic = %self.tp.topic,
                partition = self.tp.partition,
                success,
                "coordinator.finished"
            );

            let callbacks = self.finished_callbacks.lock().unwrap();
            for cb in callbacks.iter() {
                cb(last_message.clone(), success);
            }
        }
    }

    pub fn outstanding_jobs(&self) -> i64 {
        self.outstanding_jobs.load(Ordering::SeqCst)
    }

    pub fn success(&self) -> bool {
        self.success.load(Ordering::SeqCst)
    }

    pub fn manual_pause(&self) -> bool {
        self.manual_pause.load(Ordering::SeqCst)
    }

    pub fn set_manual_pause(&self, paused: bool) {
        self.manual_pause.store(paused, Ordering::SeqCst);
        self.pause_tracker.lock().unwrap().set_manual_pause(paused);
    }

    pub fn revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }

    pub fn mark_revoked(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }

    pub fn seek_offset(&self) -> i64 {
        self.seek_offset.load(Ordering::SeqCst)
    }

    pub fn set_seek_offset(&self, offset: i64) {
        self.seek_offset.store(offset, Ordering::SeqCst);
    }

    pub fn pause_tracker(&self) -> &Mutex<PauseTracker> {
        &self.pause_tracker
    }

    /// Number of `start -> drain` cycles that have fully completed. Exposed
    /// for tests asserting the "fires exactly once per start" invariant
    /// (spec.md section 8).
    pub fn finished_count(&self) -> u64 {
        self.finished_count.load(Ordering::SeqCst)
    }
}

/// Lookup of per-partition [`Coordinator`]s, lifecycle reset on rebalance
/// (spec.md section 2 "CoordinatorsBuffer").
#[derive(Default)]
pub struct CoordinatorsBuffer {
    coordinators: Mutex<HashMap<TopicPartition, Arc<Coordinator>>>,
}

impl CoordinatorsBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_or_create(&self, tp: &TopicPartition, backoff: BackoffConfig) -> Arc<Coordinator> {
        let mut coordinators = self.coordinators.lock().unwrap();
        coordinators
            .entry(tp.clone())
            .or_insert_with(|| Arc::new(Coordinator::new(tp.clone(), backoff)))
            .clone()
    }

    pub fn get(&self, tp: &TopicPartition) -> Option<Arc<Coordinator>> {
        self.coordinators.lock().unwrap().get(tp).cloned()
    }

    /// Marks `tp`'s coordinator revoked, if one exists (spec.md section 4.1
    /// step 3).
    pub fn revoke(&self, tp: &TopicPartition) {
        if let Some(coordinator) = self.coordinators.lock().unwrap().get(tp) {
            coordinator.mark_revoked();
        }
    }

    /// Drops all coordinators, e.g. on Listener restart (spec.md section 4.1
    /// "resets coordinators").
    pub fn clear(&self) {
        self.coordinators.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.coordinators.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A stable snapshot of every tracked topic-partition and its coordinator,
    /// used by the Listener's `resume_paused_partitions` step (spec.md
    /// section 4.1 step 1).
    pub fn snapshot(&self) -> Vec<(TopicPartition, Arc<Coordinator>)> {
        self.coordinators
            .lock()
            .unwrap()
            .iter()
            .map(|(tp, c)| (tp.clone(), c.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

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

    #[test]
    fn on_finished_fires_once_when_outstanding_reaches_zero() {
        let coordinator = Coordinator::new(TopicPartition::new("orders", 0), BackoffConfig::default());

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        coordinator.register_on_finished(Box::new(move |_msg, success| {
            assert!(success);
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let groups = vec![(0u64, vec![message(10), message(11)]), (1u64, vec![message(12)])];
        coordinator.start(&groups);
        coordinator.increment();
        coordinator.increment();

        coordinator.decrement(0, JobOutcome::success());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        coordinator.decrement(1, JobOutcome::success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.finished_count(), 1);
    }

    #[test]
    fn success_is_and_of_all_job_outcomes() {
        let coordinator = Coordinator::new(TopicPartition::new("orders", 0), BackoffConfig::default());
        coordinator.start(&[(0, vec![message(1)])]);
        coordinator.increment();
        coordinator.increment();

        coordinator.decrement(0, JobOutcome::success());
        coordinator.decrement(0, JobOutcome::failure());

        assert!(!coordinator.success());
    }

    #[test]
    fn last_group_message_is_highest_offset_across_groups() {
        let coordinator = Coordinator::new(TopicPartition::new("orders", 0), BackoffConfig::default());

        let captured = Arc::new(Mutex::new(None));
        let captured_clone = captured.clone();
        coordinator.register_on_finished(Box::new(move |msg, _| {
            *captured_clone.lock().unwrap() = msg;
        }));

        let groups = vec![(0u64, vec![message(19)]), (1u64, vec![message(18)])];
        coordinator.start(&groups);
        coordinator.increment();
        coordinator.increment();
        coordinator.decrement(0, JobOutcome::success());
        coordinator.decrement(1, JobOutcome::success());

        let captured = captured.lock().unwrap().clone().unwrap();
        assert_eq!(captured.offset, 19);
    }

    #[test]
    fn coordinators_buffer_revoke_and_clear() {
        let buffer = CoordinatorsBuffer::new();
        let tp = TopicPartition::new("orders", 0);
        let coordinator = buffer.find_or_create(&tp, BackoffConfig::default());
        assert!(!coordinator.revoked());

        buffer.revoke(&tp);
        assert!(coordinator.revoked());

        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn per_batch_user_state_resets_on_start() {
        let coordinator = Coordinator::new(TopicPartition::new("orders", 0), BackoffConfig::default());

        coordinator.start(&[(0, vec![message(1)])]);
        coordinator.mark_as_consumed();
        coordinator.request_pause(5);
        coordinator.request_seek(7);
        coordinator.request_retry_after_pause();
        assert!(coordinator.marked());
        assert_eq!(coordinator.requested_pause(), Some(5));
        assert_eq!(coordinator.requested_seek(), Some(7));
        assert!(coordinator.retry_after_pause_requested());

        coordinator.start(&[(0, vec![message(2)])]);
        assert!(!coordinator.marked());
        assert_eq!(coordinator.requested_pause(), None);
        assert_eq!(coordinator.requested_seek(), None);
        assert!(!coordinator.retry_after_pause_requested());
    }

    #[test]
    fn batch_messages_is_offset_sorted_across_groups() {
        let coordinator = Coordinator::new(TopicPartition::new("orders", 0), BackoffConfig::default());
        coordinator.start(&[(0, vec![message(11), message(13)]), (1, vec![message(10), message(12)])]);

        let offsets: Vec<i64> = coordinator.batch_messages().iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![10, 11, 12, 13]);
    }

    #[test]
    fn metrics_counters_accumulate() {
        let coordinator = Coordinator::new(TopicPartition::new("orders", 0), BackoffConfig::default());
        coordinator.record_processed();
        coordinator.record_processed();
        coordinator.record_retried();
        coordinator.record_dlq_dispatched();

        assert_eq!(coordinator.processed_count(), 2);
        assert_eq!(coordinator.retried_count(), 1);
        assert_eq!(coordinator.dlq_dispatched_count(), 1);
    }
}
