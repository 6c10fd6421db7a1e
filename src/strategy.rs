use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::client::Client;
use crate::config::{DlqDispatchMethod, TopicConfig};
use crate::coordinator::Coordinator;
use crate::error::ClientError;
use crate::filter::{trailing_drop_boundary, Filter, FilterFactory};
use crate::message::{Message, TopicPartition};

/// Fallback retry budget for topics that enable DLQ-style retry/skip
/// behavior without configuring a `dead_letter_queue` block (spec.md
/// section 4.3 assumes a `dlq.max_retries`; absent one, the DLQ dispatch
/// step is simply skipped but the retry budget still applies).
const DEFAULT_MAX_RETRIES: u32 = 2;

/// The post-consume policy for one topic, selected by its declared feature
/// set (spec.md section 4.3). Rather than one type per combination, the
/// feature flags already living on [`TopicConfig`] are read directly —
/// `handle_after_consume` is the single straight-line decision tree the
/// design notes call for, not a class hierarchy.
pub struct Strategy {
    tp: TopicPartition,
    config: TopicConfig,
    filter: Option<Box<dyn Filter>>,
}

impl Strategy {
    pub fn new(tp: TopicPartition, config: TopicConfig, filter: Option<Box<dyn Filter>>) -> Self {
        Self { tp, config, filter }
    }

    fn max_retries(&self) -> u32 {
        self.config
            .dead_letter_queue
            .as_ref()
            .map(|dlq| dlq.max_retries)
            .unwrap_or(DEFAULT_MAX_RETRIES)
    }

    /// Runs the decision tree of spec.md section 4.3 against one finished
    /// batch. Called from `Coordinator::decrement`'s `on_finished` thread, so
    /// everything here executes with a stable, happens-before view of the
    /// batch's aggregate outcome.
    pub fn handle_after_consume(
        &self,
        coordinator: &Coordinator,
        client: &dyn Client,
        last_group_message: Option<Message>,
    ) -> Result<(), ClientError> {
        if coordinator.revoked() {
            return Ok(());
        }

        if coordinator.success() {
            self.handle_success(coordinator, client, last_group_message)
        } else {
            self.handle_failure(coordinator, client)
        }
    }

    fn handle_success(
        &self,
        coordinator: &Coordinator,
        client: &dyn Client,
        last_group_message: Option<Message>,
    ) -> Result<(), ClientError> {
        coordinator.pause_tracker().lock().unwrap().reset();
        coordinator.record_processed();

        if coordinator.manual_pause() {
            return Ok(());
        }

        if let Some(offset) = coordinator.requested_seek() {
            client.seek(&self.tp, offset)?;
        }

        if coordinator.requested_pause().is_some() {
            client.pause(&self.tp, None)?;
            coordinator.set_manual_pause(true);
            return Ok(());
        }

        if coordinator.retry_after_pause_requested() {
            let now = Instant::now();
            let backoff = coordinator.pause_tracker().lock().unwrap().register_failure(now);
            client.pause(&self.tp, Some(now + backoff))?;
            client.seek(&self.tp, coordinator.seek_offset())?;
            return Ok(());
        }

        // spec.md section 4.3: plain manual_offset_management topics only
        // commit when the user explicitly marked a message during this
        // batch; the final paragraph carves out an exception when virtual
        // partitions are enabled too -- there, commits happen once at the
        // batch's end regardless of per-message marking, since virtual
        // groups interleave and there is no single "the user's" message to
        // mark.
        let should_commit = !self.config.manual_offset_management
            || self.config.virtual_partitions_enabled()
            || coordinator.marked();

        if should_commit {
            if let Some(message) = &last_group_message {
                client.commit_offsets(&self.tp, message.next_offset())?;
            }
        }

        if let Some(filter) = &self.filter {
            let batch = coordinator.batch_messages();
            if let Some(boundary) = trailing_drop_boundary(filter.as_ref(), &batch) {
                let cursor_timeout = self
                    .config
                    .filtering
                    .as_ref()
                    .map(|f| Duration::from_millis(f.cursor_timeout_ms))
                    .unwrap_or_default();
                client.seek(&self.tp, boundary)?;
                client.pause(&self.tp, Some(Instant::now() + cursor_timeout))?;
            }
        }

        Ok(())
    }

    fn handle_failure(&self, coordinator: &Coordinator, client: &dyn Client) -> Result<(), ClientError> {
        let now = Instant::now();
        let max_retries = self.max_retries();

        let (attempt, backoff) = {
            let mut tracker = coordinator.pause_tracker().lock().unwrap();
            let backoff = tracker.register_failure(now);
            (tracker.attempt(), backoff)
        };

        if attempt <= max_retries {
            tracing::debug!(
                topic = %self.tp.topic,
                partition = self.tp.partition,
                attempt,
                max_retries,
                "strategy.retry.pause"
            );
            client.pause(&self.tp, Some(now + backoff))?;
            client.seek(&self.tp, coordinator.seek_offset())?;
            coordinator.record_retried();
            return Ok(());
        }

        coordinator.pause_tracker().lock().unwrap().reset();

        let skippable = coordinator.batch_start_message();

        if let Some(dlq) = &self.config.dead_letter_queue {
            if let (Some(message), Some(dlq_topic)) = (&skippable, &dlq.topic) {
                if dlq.dispatch_method != DlqDispatchMethod::Invalid {
                    let dlq_message = Self::with_origin_headers(message);
                    tracing::debug!(
                        topic = %self.tp.topic,
                        partition = self.tp.partition,
                        offset = message.offset,
                        dlq_topic = %dlq_topic,
                        "strategy.dlq.dispatch"
                    );
                    futures::executor::block_on(client.produce(dlq_topic, &dlq_message))?;
                    coordinator.record_dlq_dispatched();
                }
            }
        }

        if let Some(message) = &skippable {
            client.commit_offsets(&self.tp, message.next_offset())?;
        }

        // Nominal pause, immediately resumable on the next tick (SPEC_FULL.md
        // section B.3), so the next `resume_paused_partitions` re-fetches from
        // the post-skip position.
        coordinator.pause_tracker().lock().unwrap().pause_immediate(now);
        client.pause(&self.tp, Some(now))?;

        Ok(())
    }

    /// Attaches `original_topic` / `original_partition` / `original_offset`
    /// headers to a copy of `message` (SPEC_FULL.md section B.2), preserving
    /// its own key/payload/headers per the round-trip property (spec.md
    /// section 8).
    fn with_origin_headers(message: &Message) -> Message {
        let mut dlq_message = message.clone();
        dlq_message.headers.push(("original_topic".to_string(), message.topic.clone().into_bytes()));
        dlq_message
            .headers
            .push(("original_partition".to_string(), message.partition.to_string().into_bytes()));
        dlq_message
            .headers
            .push(("original_offset".to_string(), message.offset.to_string().into_bytes()));
        dlq_message
    }
}

/// Lazily builds and caches one [`Strategy`] per topic-partition, keyed off
/// each topic's declared feature set (spec.md section 4.3: "selected by the
/// declared feature set of a topic"). Mirrors [`crate::coordinator::CoordinatorsBuffer`]'s
/// find-or-create shape.
#[derive(Default)]
pub struct StrategyRegistry {
    topics: HashMap<String, TopicConfig>,
    filter_factory: Option<FilterFactory>,
    strategies: Mutex<HashMap<TopicPartition, Arc<Strategy>>>,
}

impl StrategyRegistry {
    pub fn new(topics: HashMap<String, TopicConfig>, filter_factory: Option<FilterFactory>) -> Self {
        Self {
            topics,
            filter_factory,
            strategies: Mutex::new(HashMap::new()),
        }
    }

    pub fn find_or_create(&self, tp: &TopicPartition) -> Arc<Strategy> {
        let mut strategies = self.strategies.lock().unwrap();
        strategies
            .entry(tp.clone())
            .or_insert_with(|| {
                let config = self.topics.get(&tp.topic).cloned().unwrap_or_default();
                let filter = if config.filtering.is_some() {
                    self.filter_factory.as_ref().map(|factory| factory(&tp.topic))
                } else {
                    None
                };
                Arc::new(Strategy::new(tp.clone(), config, filter))
            })
            .clone()
    }

    pub fn topic_config(&self, topic: &str) -> TopicConfig {
        self.topics.get(topic).cloned().unwrap_or_default()
    }
}
