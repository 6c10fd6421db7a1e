//! Partition processing core for a Kafka consumer runtime.
//!
//! This crate implements the subsystem that turns a stream of polled
//! messages from a single subscription group into scheduled units of work:
//! virtual partitioning, offset checkpointing, retry-with-backoff and
//! dead-letter-queue escalation, and rebalance-safe shutdown. The Kafka wire
//! protocol itself, license verification, and the pluggable consumer payload
//! are external collaborators; this crate only specifies their interfaces
//! (see [`client::Client`] and [`executor::Consumer`]).

pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod filter;
pub mod jobs;
pub mod jobs_queue;
pub mod listener;
pub mod message;
pub mod messages_buffer;
pub mod partitioner;
pub mod pause_tracker;
pub mod scheduler;
pub mod status;
pub mod strategy;
pub mod tpl_builder;
pub mod usage_tracker;

pub use client::{Client, RdKafkaClient};
pub use config::Config;
pub use coordinator::{Coordinator, CoordinatorsBuffer, JobOutcome};
pub use error::{ClientError, CoreError};
pub use executor::{ConsumeContext, Consumer, Executor, ExecutorKey, ExecutorsBuffer};
pub use filter::{Filter, FilterFactory};
pub use jobs::{Job, JobsBuilder};
pub use jobs_queue::JobsQueue;
pub use listener::Listener;
pub use message::{Message, TopicPartition, VirtualGroupId};
pub use scheduler::{DefaultScheduler, Scheduler};
pub use status::Status;
pub use strategy::{Strategy, StrategyRegistry};
