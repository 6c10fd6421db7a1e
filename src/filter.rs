use std::sync::Arc;

use crate::message::Message;

/// A per-topic message filter (spec.md section 6 "filtering: {factory: fn ->
/// Filter}"). Supplied out-of-band at construction time the same way a
/// [`crate::partitioner::Partitioner`] or [`crate::executor::ConsumerFactory`]
/// is -- YAML only carries the serializable `cursor_timeout_ms` knob
/// (`src/config.rs`'s `FilteringConfig`); the filter's decision logic is
/// user code, not configuration.
///
/// `handle_post_filtering` (spec.md section 4.3) only cares about the tail of
/// a finished batch: once the filter starts keeping a message, scanning from
/// the end, everything before it is left alone.
pub trait Filter: Send + Sync {
    /// True if `message` should be dropped from the tail of a finished batch.
    fn should_drop(&self, message: &Message) -> bool;
}

/// Lazily builds the [`Filter`] for a topic, mirroring
/// [`crate::executor::ConsumerFactory`]'s shape.
pub type FilterFactory = Arc<dyn Fn(&str) -> Box<dyn Filter> + Send + Sync>;

/// Scans `messages` from the tail backward, stopping at the first message the
/// filter keeps. Returns the offset of the earliest dropped message in that
/// trailing run -- the point `handle_post_filtering` seeks back to so those
/// messages are re-fetched once the filter's cursor times out.
pub fn trailing_drop_boundary(filter: &dyn Filter, messages: &[Message]) -> Option<i64> {
    let mut boundary = None;
    for message in messages.iter().rev() {
        if filter.should_drop(message) {
            boundary = Some(message.offset);
        } else {
            break;
        }
    }
    boundary
}
