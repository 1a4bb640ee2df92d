use serde::{Deserialize, Serialize};

/// Pipeline tuning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    // Worker pool configuration
    /// Maximum number of concurrently executing step requests.
    pub max_workers: usize,

    // Queue configuration
    /// Capacity of the execution request queue.
    pub queue_capacity: usize,

    // Status broadcast configuration
    /// Per-subscriber buffered delta capacity. When a subscriber lags past
    /// this, its oldest deltas are dropped; the publisher never blocks.
    pub broadcast_capacity: usize,

    // Clip definition window
    /// Minimum duration, in seconds, of a defined short clip.
    pub clip_min_secs: f64,
    /// Maximum duration, in seconds, of a defined short clip.
    pub clip_max_secs: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            queue_capacity: 256,
            broadcast_capacity: 64,
            clip_min_secs: 3.0,
            clip_max_secs: 60.0,
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_workers == 0 {
            return Err("max_workers must be greater than 0".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be greater than 0".to_string());
        }
        if self.broadcast_capacity == 0 {
            return Err("broadcast_capacity must be greater than 0".to_string());
        }
        if !(self.clip_min_secs >= 0.0) {
            return Err("clip_min_secs must be non-negative".to_string());
        }
        if !(self.clip_max_secs > self.clip_min_secs) {
            return Err("clip_max_secs must exceed clip_min_secs".to_string());
        }
        Ok(())
    }

    /// Small queues and a tight pool, suitable for tests.
    pub fn development() -> Self {
        Self {
            max_workers: 2,
            queue_capacity: 32,
            broadcast_capacity: 16,
            ..Default::default()
        }
    }
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
        }
    }

    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.config.max_workers = max_workers;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn broadcast_capacity(mut self, capacity: usize) -> Self {
        self.config.broadcast_capacity = capacity;
        self
    }

    pub fn clip_window(mut self, min_secs: f64, max_secs: f64) -> Self {
        self.config.clip_min_secs = min_secs;
        self.config.clip_max_secs = max_secs;
        self
    }

    pub fn build(self) -> Result<PipelineConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for PipelineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_development_config() {
        let config = PipelineConfig::development();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_workers, 2);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = PipelineConfig::default();

        config.max_workers = 0;
        assert!(config.validate().is_err());
        config.max_workers = 4;

        config.clip_min_secs = 10.0;
        config.clip_max_secs = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = PipelineConfig::builder()
            .max_workers(8)
            .queue_capacity(512)
            .clip_window(2.0, 30.0)
            .build()
            .unwrap();
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.queue_capacity, 512);
        assert_eq!(config.clip_max_secs, 30.0);
    }
}
