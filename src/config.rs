use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::CoreError;
use crate::pause_tracker::BackoffConfig;

/// How a skipped message is produced to its DLQ topic (spec.md section 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlqDispatchMethod {
    ProduceAsync,
    ProduceSync,
    /// Catches any value that isn't one of the two above, so misconfiguration
    /// is caught by [`Config::validate`] with a typed error instead of a raw
    /// deserialization failure (spec.md section 8 scenario 5).
    #[serde(other)]
    Invalid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeadLetterQueueConfig {
    pub topic: Option<String>,
    #[serde(default = "DeadLetterQueueConfig::default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "DeadLetterQueueConfig::default_dispatch_method")]
    pub dispatch_method: DlqDispatchMethod,
}

impl DeadLetterQueueConfig {
    fn default_max_retries() -> u32 {
        2
    }

    fn default_dispatch_method() -> DlqDispatchMethod {
        DlqDispatchMethod::ProduceAsync
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilteringConfig {
    #[serde(default = "FilteringConfig::default_cursor_timeout_ms")]
    pub cursor_timeout_ms: u64,
}

impl FilteringConfig {
    fn default_cursor_timeout_ms() -> u64 {
        60_000
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VirtualPartitionsConfig {
    pub max_partitions: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeriodicsConfig {
    pub interval_ms: u64,
}

/// Per-topic feature configuration (spec.md section 6 "Configuration surface").
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopicConfig {
    #[serde(default)]
    pub manual_offset_management: bool,
    #[serde(default)]
    pub dead_letter_queue: Option<DeadLetterQueueConfig>,
    #[serde(default)]
    pub filtering: Option<FilteringConfig>,
    #[serde(default)]
    pub virtual_partitions: Option<VirtualPartitionsConfig>,
    #[serde(default)]
    pub long_running_job: bool,
    #[serde(default)]
    pub periodics: Option<PeriodicsConfig>,
    #[serde(default)]
    pub active_job: bool,
}

impl TopicConfig {
    pub fn virtual_partitions_enabled(&self) -> bool {
        self.virtual_partitions.is_some()
    }

    pub fn dlq_enabled(&self) -> bool {
        self.dead_letter_queue.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PauseConfig {
    #[serde(default = "PauseConfig::default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "PauseConfig::default_max_timeout_ms")]
    pub max_timeout_ms: u64,
    #[serde(default = "PauseConfig::default_with_exponential_backoff")]
    pub with_exponential_backoff: bool,
}

impl PauseConfig {
    fn default_timeout_ms() -> u64 {
        1_000
    }

    fn default_max_timeout_ms() -> u64 {
        30_000
    }

    fn default_with_exponential_backoff() -> bool {
        true
    }

    pub fn as_backoff_config(&self) -> BackoffConfig {
        BackoffConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            max_timeout: Duration::from_millis(self.max_timeout_ms),
            with_exponential_backoff: self.with_exponential_backoff,
        }
    }
}

impl Default for PauseConfig {
    fn default() -> Self {
        Self {
            timeout_ms: Self::default_timeout_ms(),
            max_timeout_ms: Self::default_max_timeout_ms(),
            with_exponential_backoff: Self::default_with_exponential_backoff(),
        }
    }
}

/// Per-process configuration (spec.md section 6).
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    #[serde(default = "ProcessConfig::default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub pause: PauseConfig,
    #[serde(default = "ProcessConfig::default_max_messages")]
    pub max_messages: usize,
    #[serde(default = "ProcessConfig::default_max_wait_time_ms")]
    pub max_wait_time_ms: u64,
    /// SPEC_FULL.md section B.3: the grace period the forced-shutdown timer
    /// allows before `wait` stops blocking regardless of queue state.
    #[serde(default = "ProcessConfig::default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl ProcessConfig {
    fn default_concurrency() -> usize {
        num_cpus_fallback()
    }

    fn default_max_messages() -> usize {
        100
    }

    fn default_max_wait_time_ms() -> u64 {
        1_000
    }

    fn default_shutdown_timeout_ms() -> u64 {
        60_000
    }
}

fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            concurrency: Self::default_concurrency(),
            pause: PauseConfig::default(),
            max_messages: Self::default_max_messages(),
            max_wait_time_ms: Self::default_max_wait_time_ms(),
            shutdown_timeout_ms: Self::default_shutdown_timeout_ms(),
        }
    }
}

/// The full configuration surface for one subscription group (spec.md
/// section 6). Parsed the way the teacher parses its own YAML configuration,
/// validated synchronously at setup time (spec.md section 7, class 3).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub process: ProcessConfig,
    #[serde(default)]
    pub topics: HashMap<String, TopicConfig>,
}

impl Config {
    pub fn parse(contents: &str) -> Result<Self, CoreError> {
        let config: Config = serde_yaml::from_str(contents)
            .map_err(|e| CoreError::InvalidConfigurationError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Raised synchronously at setup time, fatal to process boot (spec.md
    /// section 7, class 3 "Configuration / programmer failure").
    pub fn validate(&self) -> Result<(), CoreError> {
        for (topic, cfg) in &self.topics {
            if let Some(dlq) = &cfg.dead_letter_queue {
                if dlq.dispatch_method == DlqDispatchMethod::Invalid {
                    return Err(CoreError::InvalidConfigurationError(format!(
                        "topic {topic}: unknown dead_letter_queue.dispatch_method"
                    )));
                }

                if dlq.topic.is_none() {
                    return Err(CoreError::InvalidConfigurationError(format!(
                        "topic {topic}: dead_letter_queue configured without a topic"
                    )));
                }
            }

            if let Some(vp) = &cfg.virtual_partitions {
                if vp.max_partitions == 0 {
                    return Err(CoreError::InvalidConfigurationError(format!(
                        "topic {topic}: virtual_partitions.max_partitions must be positive"
                    )));
                }
            }
        }

        Ok(())
    }
}
