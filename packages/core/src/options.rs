//! Lock-level configuration and per-job overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LockError, LockLabel};
use crate::job::ResolvedJobOptions;
use crate::log::LogSink;

/// Which waiting jobs are kicked out when a key's wait queue grows past `queue_size`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowStrategy {
    /// Evict the most recently queued jobs.
    #[default]
    EvictNewest,
    /// Evict the jobs that have waited longest.
    EvictOldest,
    /// Keep the incoming job and evict the ones queued right before it.
    ReplaceNewest,
}

impl OverflowStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverflowStrategy::EvictNewest => "evict_newest",
            OverflowStrategy::EvictOldest => "evict_oldest",
            OverflowStrategy::ReplaceNewest => "replace_newest",
        }
    }
}

impl std::str::FromStr for OverflowStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "evict_newest" | "newest" => Ok(OverflowStrategy::EvictNewest),
            "evict_oldest" | "oldest" => Ok(OverflowStrategy::EvictOldest),
            "replace_newest" => Ok(OverflowStrategy::ReplaceNewest),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for OverflowStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration for one lock instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockOptions {
    /// Written in log lines and error messages to tell locks apart.
    pub name: String,
    /// How long a job may wait for its keys. `None` disables the timeout.
    #[serde(with = "duration_ms")]
    pub wait_timeout: Option<Duration>,
    /// How long a job may hold its keys once executing. `None` disables the timeout.
    ///
    /// Without it, a unit of work that never completes keeps its keys forever.
    #[serde(with = "duration_ms")]
    pub execution_timeout: Option<Duration>,
    /// Max number of waiting jobs per key. `None` means unbounded.
    pub queue_size: Option<usize>,
    /// Eviction policy applied when `queue_size` is exceeded.
    pub overflow_strategy: OverflowStrategy,
    /// Capture a backtrace at acquire time and attach it to lock errors.
    pub extend_stack_traces: bool,
    /// Where internal log lines go.
    #[serde(skip)]
    pub log: LogSink,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            wait_timeout: None,
            execution_timeout: None,
            queue_size: None,
            overflow_strategy: OverflowStrategy::default(),
            extend_stack_traces: true,
            log: LogSink::default(),
        }
    }
}

impl LockOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read options from `KEYLOCK_*` environment variables.
    pub fn from_env() -> Result<Self, LockError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read options through an arbitrary variable lookup.
    ///
    /// Unset or empty variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, LockError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut options = Self::default();

        if let Some(name) = var("KEYLOCK_NAME") {
            options.name = name;
        }
        let label = LockLabel::new(&options.name);

        if let Some(value) = var("KEYLOCK_WAIT_TIMEOUT_MS") {
            options.wait_timeout = Some(parse_millis(&label, "KEYLOCK_WAIT_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = var("KEYLOCK_EXECUTION_TIMEOUT_MS") {
            options.execution_timeout =
                Some(parse_millis(&label, "KEYLOCK_EXECUTION_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = var("KEYLOCK_QUEUE_SIZE") {
            let size = value.parse::<usize>().map_err(|_| {
                LockError::invalid_argument(&label, "KEYLOCK_QUEUE_SIZE", "a non-negative integer", &value)
            })?;
            options.queue_size = Some(size);
        }
        if let Some(value) = var("KEYLOCK_OVERFLOW_STRATEGY") {
            options.overflow_strategy = value.parse().map_err(|_| {
                LockError::invalid_argument(
                    &label,
                    "KEYLOCK_OVERFLOW_STRATEGY",
                    "evict_newest|evict_oldest|replace_newest",
                    &value,
                )
            })?;
        }
        if let Some(value) = var("KEYLOCK_EXTEND_STACK_TRACES") {
            options.extend_stack_traces =
                parse_flag(&value).ok_or_else(|| {
                    LockError::invalid_argument(&label, "KEYLOCK_EXTEND_STACK_TRACES", "a boolean", &value)
                })?;
        }
        if let Some(value) = var("KEYLOCK_LOG") {
            let enabled = parse_flag(&value).ok_or_else(|| {
                LockError::invalid_argument(&label, "KEYLOCK_LOG", "a boolean", &value)
            })?;
            options.log = if enabled { LogSink::Tracing } else { LogSink::Disabled };
        }

        Ok(options)
    }

    /// Set the lock name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the default wait timeout.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Set the default execution timeout.
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    /// Bound the number of waiting jobs per key.
    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.queue_size = Some(size);
        self
    }

    pub fn with_overflow_strategy(mut self, strategy: OverflowStrategy) -> Self {
        self.overflow_strategy = strategy;
        self
    }

    pub fn with_extend_stack_traces(mut self, enabled: bool) -> Self {
        self.extend_stack_traces = enabled;
        self
    }

    /// Set the log sink.
    pub fn with_log(mut self, log: LogSink) -> Self {
        self.log = log;
        self
    }

    /// Send log lines to a closure.
    pub fn with_log_fn<F>(self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.with_log(LogSink::custom(f))
    }
}

fn parse_millis(label: &LockLabel, argument: &str, value: &str) -> Result<Duration, LockError> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| LockError::invalid_argument(label, argument, "a duration in milliseconds", value))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// A per-job override of a lock-level option.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Setting<T> {
    /// Use the lock's value.
    #[default]
    Inherit,
    /// Use this value for the job.
    Set(T),
    /// Turn the option off for the job.
    Disabled,
}

impl<T: Copy> Setting<T> {
    pub fn resolve(self, fallback: Option<T>) -> Option<T> {
        match self {
            Setting::Inherit => fallback,
            Setting::Set(value) => Some(value),
            Setting::Disabled => None,
        }
    }
}

/// Options for a single acquisition. Anything left at `Inherit` comes from [`LockOptions`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOptions {
    pub wait_timeout: Setting<Duration>,
    pub execution_timeout: Setting<Duration>,
    pub extend_stack_traces: Option<bool>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Setting::Set(timeout);
        self
    }

    /// Let this job wait forever, whatever the lock's default.
    pub fn without_wait_timeout(mut self) -> Self {
        self.wait_timeout = Setting::Disabled;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Setting::Set(timeout);
        self
    }

    pub fn without_execution_timeout(mut self) -> Self {
        self.execution_timeout = Setting::Disabled;
        self
    }

    pub fn with_extend_stack_traces(mut self, enabled: bool) -> Self {
        self.extend_stack_traces = Some(enabled);
        self
    }

    /// Merge onto the lock defaults.
    pub fn resolve(&self, lock: &LockOptions) -> ResolvedJobOptions {
        ResolvedJobOptions {
            wait_timeout: self.wait_timeout.resolve(lock.wait_timeout),
            execution_timeout: self.execution_timeout.resolve(lock.execution_timeout),
            extend_stack_traces: self.extend_stack_traces.unwrap_or(lock.extend_stack_traces),
        }
    }
}

/// Serde adapter storing `Option<Duration>` as integer milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
