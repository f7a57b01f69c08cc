// Protocol configuration
//
// Every timing and sizing knob of an encounter node in one serde struct, so
// the CLI can persist it as JSON and tests can shrink the clock.

use crate::bloom::BloomParams;
use crate::store::MatchPolicy;
use crate::{EncounterError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Lifetime of one ephemeral identity
    pub epoch_duration_ms: u64,
    /// Shares needed to reconstruct (`t`)
    pub share_threshold: u8,
    /// Shares broadcast per epoch (`n`)
    pub share_count: u8,
    /// Epochs per bloom window
    pub window_epochs: u32,
    /// Windows covered by snapshots and queries, current one included
    pub retained_windows: usize,
    pub bloom: BloomParams,
    /// Concurrent peer buffers before the oldest is evicted
    pub peer_buffer_capacity: usize,
    /// Interval between scheduled exposure actions
    pub query_interval_ms: u64,
    /// How long a node keeps uploading after being reported positive
    pub positive_period_ms: u64,
    /// Probability that an outgoing share is dropped before broadcast
    pub broadcast_drop_probability: f64,
    /// Runtime timer granularity
    pub tick_interval_ms: u64,
    pub match_policy: MatchPolicy,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            epoch_duration_ms: 15_000,
            share_threshold: 3,
            share_count: 5,
            window_epochs: 6,
            retained_windows: 2,
            bloom: BloomParams::default(),
            peer_buffer_capacity: 1024,
            query_interval_ms: 540_000,
            positive_period_ms: 0,
            broadcast_drop_probability: 0.0,
            tick_interval_ms: 250,
            match_policy: MatchPolicy::for_params(BloomParams::default()),
        }
    }
}

impl ProtocolConfig {
    /// Validate protocol configuration
    pub fn validate(&self) -> Result<()> {
        if self.share_threshold == 0 {
            return Err(EncounterError::InvalidConfig(
                "share_threshold must be at least 1".to_string(),
            ));
        }
        if self.share_threshold > self.share_count {
            return Err(EncounterError::InvalidConfig(format!(
                "share_threshold {} must not exceed share_count {}",
                self.share_threshold, self.share_count
            )));
        }
        if self.epoch_duration_ms == 0 {
            return Err(EncounterError::InvalidConfig(
                "epoch_duration_ms must be greater than 0".to_string(),
            ));
        }
        if self.window_epochs == 0 {
            return Err(EncounterError::InvalidConfig(
                "window_epochs must be greater than 0".to_string(),
            ));
        }
        if self.retained_windows == 0 {
            return Err(EncounterError::InvalidConfig(
                "retained_windows must be at least 1".to_string(),
            ));
        }
        if self.peer_buffer_capacity == 0 {
            return Err(EncounterError::InvalidConfig(
                "peer_buffer_capacity must be greater than 0".to_string(),
            ));
        }
        if self.query_interval_ms == 0 || self.tick_interval_ms == 0 {
            return Err(EncounterError::InvalidConfig(
                "query_interval_ms and tick_interval_ms must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.broadcast_drop_probability) {
            return Err(EncounterError::InvalidConfig(format!(
                "broadcast_drop_probability {} must be within [0, 1]",
                self.broadcast_drop_probability
            )));
        }
        self.bloom.validate()?;
        self.match_policy.validate()
    }

    pub fn epoch_duration(&self) -> Duration {
        Duration::from_millis(self.epoch_duration_ms)
    }

    pub fn window_duration(&self) -> Duration {
        self.epoch_duration() * self.window_epochs
    }

    pub fn query_interval(&self) -> Duration {
        Duration::from_millis(self.query_interval_ms)
    }

    pub fn positive_period(&self) -> Duration {
        Duration::from_millis(self.positive_period_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| EncounterError::SerializationError(e.to_string()))
    }

    /// Parse and validate
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| EncounterError::SerializationError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
