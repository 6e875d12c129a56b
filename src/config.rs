use crate::error::{Error, Result};
use crate::executor::PanicStrategy;
use std::time::Duration;

/// Minimum/maximum thread counts for the worker and I/O lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolLimits {
    pub min_workers: usize,
    pub max_workers: usize,
    pub min_io: usize,
    pub max_io: usize,
}

impl PoolLimits {
    pub fn new(min_workers: usize, max_workers: usize, min_io: usize, max_io: usize) -> Self {
        Self {
            min_workers,
            max_workers,
            min_io,
            max_io,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_workers > self.max_workers {
            return Err(Error::config(format!(
                "min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if self.min_io > self.max_io {
            return Err(Error::config(format!(
                "min_io ({}) exceeds max_io ({})",
                self.min_io, self.max_io
            )));
        }
        Ok(())
    }
}

impl Default for PoolLimits {
    fn default() -> Self {
        let cpus = num_cpus::get();
        Self {
            min_workers: cpus,
            max_workers: cpus * 4,
            min_io: 1,
            max_io: cpus * 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub limits: PoolLimits,
    pub thread_name_prefix: String,
    pub stack_size: Option<usize>,
    pub queue_capacity: usize,
    /// How long a worker above the minimum waits for work before retiring.
    pub idle_keep_alive: Duration,
    pub panic_strategy: PanicStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: PoolLimits::default(),
            thread_name_prefix: "taskweave".to_string(),
            stack_size: Some(2 * 1024 * 1024),
            queue_capacity: 10_000,
            idle_keep_alive: Duration::from_secs(10),
            panic_strategy: PanicStrategy::default(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        self.limits.validate()?;

        if self.thread_name_prefix.is_empty() {
            return Err(Error::config("thread_name_prefix must not be empty"));
        }

        if let Some(size) = self.stack_size {
            if size < 64 * 1024 {
                return Err(Error::config("stack_size too small (min 64 KiB)"));
            }
        }

        if self.queue_capacity == 0 {
            return Err(Error::config("queue_capacity must be > 0"));
        }

        if self.idle_keep_alive.is_zero() {
            return Err(Error::config("idle_keep_alive must be > 0"));
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn limits(mut self, limits: PoolLimits) -> Self {
        self.config.limits = limits;
        self
    }

    pub fn workers(mut self, min: usize, max: usize) -> Self {
        self.config.limits.min_workers = min;
        self.config.limits.max_workers = max;
        self
    }

    pub fn io_threads(mut self, min: usize, max: usize) -> Self {
        self.config.limits.min_io = min;
        self.config.limits.max_io = max;
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn idle_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.config.idle_keep_alive = keep_alive;
        self
    }

    pub fn panic_strategy(mut self, strategy: PanicStrategy) -> Self {
        self.config.panic_strategy = strategy;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_builder_rejects_inverted_limits() {
        let result = Config::builder().workers(4, 2).build();
        assert!(matches!(result, Err(Error::Config(_))));

        let result = Config::builder().io_threads(3, 1).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_rejects_zero_capacity() {
        let result = Config::builder().queue_capacity(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_limits_are_accepted() {
        let limits = PoolLimits::new(0, 0, 0, 0);
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn test_builder_sets_fields() {
        let config = Config::builder()
            .workers(1, 3)
            .io_threads(0, 2)
            .thread_name_prefix("unit")
            .queue_capacity(16)
            .build()
            .unwrap();

        assert_eq!(config.limits, PoolLimits::new(1, 3, 0, 2));
        assert_eq!(config.thread_name_prefix, "unit");
        assert_eq!(config.queue_capacity, 16);
    }
}
