//! Processor tuning.

use std::time::Duration;

use eko_core::Config;

/// Shortest period the driver's ticker accepts.
pub const MIN_OBSERVATION_INTERVAL: Duration = Duration::from_millis(1);

/// Timing knobs of the reconciliation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Delay between periodic reconciliation cycles.
    pub observation_interval: Duration,
    /// Upper bound for each runtime or storage call made by a cycle.
    pub call_timeout: Duration,
    /// How long `destroy` waits for closed pipelines to flush.
    pub shutdown_grace: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            observation_interval: Duration::from_secs(5),
            call_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl ProcessorConfig {
    /// Observation interval, raised to [`MIN_OBSERVATION_INTERVAL`] when zero.
    pub fn ticker_period(&self) -> Duration {
        self.observation_interval.max(MIN_OBSERVATION_INTERVAL)
    }
}

impl From<&Config> for ProcessorConfig {
    fn from(config: &Config) -> Self {
        Self {
            observation_interval: config.observation_interval(),
            call_timeout: config.call_timeout(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_interval_gets_minimum_period() {
        let config = ProcessorConfig {
            observation_interval: Duration::ZERO,
            ..ProcessorConfig::default()
        };
        assert_eq!(config.ticker_period(), MIN_OBSERVATION_INTERVAL);
        assert_eq!(
            ProcessorConfig::default().ticker_period(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_from_config() {
        let config = Config {
            observation_interval_ms: 250,
            call_timeout_ms: 100,
            ..Config::default()
        };
        let processor = ProcessorConfig::from(&config);
        assert_eq!(processor.observation_interval, Duration::from_millis(250));
        assert_eq!(processor.call_timeout, Duration::from_millis(100));
    }
}
