use std::collections::HashMap;
use std::time::Duration;

use crate::client::Client;
use crate::error::CoreError;
use crate::message::TopicPartition;

const OFFSETS_FOR_TIMES_TIMEOUT: Duration = Duration::from_secs(2);

/// One topic's partition spec, as accepted by [`TplBuilder::build`]
/// (spec.md section 4.6).
#[derive(Debug, Clone)]
pub enum PartitionsSpec {
    /// A bare list of partition numbers: start from offset 0.
    List(Vec<i32>),
    /// A map from partition to a per-partition offset request.
    Offsets(HashMap<i32, OffsetRequest>),
}

#[derive(Debug, Clone, Copy)]
pub enum OffsetRequest {
    /// Non-negative: use as-is.
    Absolute(i64),
    /// Negative `-N`: take the last `N` messages.
    FromTail(u64),
    /// A timestamp to resolve via `offsets_for_times`.
    Timestamp(i64),
}

/// Normalizes ad-hoc partition/offset specs into a flat, ready-to-subscribe
/// topic-partition-offset list (spec.md section 4.6 "Iterator / TplBuilder").
pub struct TplBuilder<'a> {
    client: &'a dyn Client,
}

impl<'a> TplBuilder<'a> {
    pub fn new(client: &'a dyn Client) -> Self {
        Self { client }
    }

    pub fn build(
        &self,
        specs: &HashMap<String, PartitionsSpec>,
    ) -> Result<Vec<(TopicPartition, i64)>, CoreError> {
        let mut result = Vec::new();
        let mut timestamp_targets: Vec<(TopicPartition, i64)> = Vec::new();

        for (topic, spec) in specs {
            match spec {
                PartitionsSpec::List(partitions) => {
                    for &partition in partitions {
                        result.push((TopicPartition::new(topic.clone(), partition), 0));
                    }
                }
                PartitionsSpec::Offsets(by_partition) => {
                    for (&partition, request) in by_partition {
                        let tp = TopicPartition::new(topic.clone(), partition);
                        match request {
                            OffsetRequest::Absolute(offset) => result.push((tp, *offset)),
                            OffsetRequest::FromTail(n) => {
                                let offset = self.resolve_from_tail(&tp, *n)?;
                                result.push((tp, offset));
                            }
                            OffsetRequest::Timestamp(ts) => {
                                timestamp_targets.push((tp, *ts));
                            }
                        }
                    }
                }
            }
        }

        if !timestamp_targets.is_empty() {
            let resolved = self
                .client
                .offsets_for_times(&timestamp_targets, OFFSETS_FOR_TIMES_TIMEOUT)
                .map_err(CoreError::Client)?;

            for (tp, _) in &timestamp_targets {
                let offset = resolved.get(tp).copied().ok_or_else(|| {
                    CoreError::InvalidTimeBasedOffsetError(
                        tp.clone(),
                        "offsets_for_times returned no result for this partition".into(),
                    )
                })?;
                result.push((tp.clone(), offset));
            }
        }

        Ok(result)
    }

    /// `max(low_watermark, high_watermark + N)` -- clamped so a request for
    /// more messages than the partition holds starts at the low watermark
    /// (spec.md section 8 scenario 6).
    fn resolve_from_tail(&self, tp: &TopicPartition, n: u64) -> Result<i64, CoreError> {
        let (low, high) = self.client.query_watermark_offsets(tp).map_err(CoreError::Client)?;
        let requested = high - n as i64;
        Ok(requested.max(low))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::message::Message;
    use async_trait::async_trait;
    use std::time::Instant;

    struct FakeClient {
        watermarks: HashMap<TopicPartition, (i64, i64)>,
        times: HashMap<TopicPartition, i64>,
    }

    #[async_trait]
    impl Client for FakeClient {
        async fn batch_poll(&self, _: usize, _: Duration) -> Result<Vec<Message>, ClientError> {
            Ok(vec![])
        }
        fn events_poll(&self, _: u64) {}
        fn ping(&self) {}
        fn pause(&self, _: &TopicPartition, _: Option<Instant>) -> Result<(), ClientError> {
            Ok(())
        }
        fn resume(&self, _: &TopicPartition) -> Result<(), ClientError> {
            Ok(())
        }
        fn seek(&self, _: &TopicPartition, _: i64) -> Result<(), ClientError> {
            Ok(())
        }
        fn commit_offsets(&self, _: &TopicPartition, _: i64) -> Result<(), ClientError> {
            Ok(())
        }
        fn stop(&self) {}
        fn reset(&self) -> Result<(), ClientError> {
            Ok(())
        }
        fn revoked_partitions(&self) -> HashMap<String, Vec<i32>> {
            HashMap::new()
        }
        fn query_watermark_offsets(&self, tp: &TopicPartition) -> Result<(i64, i64), ClientError> {
            self.watermarks
                .get(tp)
                .copied()
                .ok_or_else(|| ClientError::UnknownPartition(tp.clone()))
        }
        fn offsets_for_times(
            &self,
            targets: &[(TopicPartition, i64)],
            _: Duration,
        ) -> Result<HashMap<TopicPartition, i64>, ClientError> {
            let mut result = HashMap::new();
            for (tp, _) in targets {
                if let Some(offset) = self.times.get(tp) {
                    result.insert(tp.clone(), *offset);
                }
            }
            Ok(result)
        }
        async fn produce(&self, _: &str, _: &Message) -> Result<(), ClientError> {
            Ok(())
        }
    }

    #[test]
    fn from_tail_computes_high_minus_n() {
        use maplit::hashmap;

        let tp = TopicPartition::new("orders", 0);
        let client = FakeClient {
            watermarks: hashmap! { tp.clone() => (0, 100) },
            times: HashMap::new(),
        };
        let builder = TplBuilder::new(&client);

        let specs = hashmap! {
            "orders".to_string() => PartitionsSpec::Offsets(hashmap! { 0 => OffsetRequest::FromTail(5) }),
        };

        let result = builder.build(&specs).unwrap();
        assert_eq!(result, vec![(tp, 95)]);
    }

    #[test]
    fn from_tail_clamps_to_low_watermark() {
        use maplit::hashmap;

        let tp = TopicPartition::new("orders", 0);
        let client = FakeClient {
            watermarks: hashmap! { tp.clone() => (98, 100) },
            times: HashMap::new(),
        };
        let builder = TplBuilder::new(&client);

        let specs = hashmap! {
            "orders".to_string() => PartitionsSpec::Offsets(hashmap! { 0 => OffsetRequest::FromTail(5) }),
        };

        let result = builder.build(&specs).unwrap();
        assert_eq!(result, vec![(tp, 98)]);
    }

    #[test]
    fn list_spec_starts_from_zero() {
        let client = FakeClient {
            watermarks: HashMap::new(),
            times: HashMap::new(),
        };
        let builder = TplBuilder::new(&client);

        let mut specs = HashMap::new();
        specs.insert("orders".to_string(), PartitionsSpec::List(vec![0, 1, 2]));

        let mut result = builder.build(&specs).unwrap();
        result.sort_by_key(|(tp, _)| tp.partition);

        assert_eq!(
            result,
            vec![
                (TopicPartition::new("orders", 0), 0),
                (TopicPartition::new("orders", 1), 0),
                (TopicPartition::new("orders", 2), 0),
            ]
        );
    }

    #[test]
    fn missing_timestamp_resolution_is_an_error() {
        let client = FakeClient {
            watermarks: HashMap::new(),
            times: HashMap::new(),
        };
        let builder = TplBuilder::new(&client);

        let mut specs = HashMap::new();
        let mut by_partition = HashMap::new();
        by_partition.insert(0, OffsetRequest::Timestamp(1_700_000_000_000));
        specs.insert("orders".to_string(), PartitionsSpec::Offsets(by_partition));

        let err = builder.build(&specs).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTimeBasedOffsetError(_, _)));
    }
}
