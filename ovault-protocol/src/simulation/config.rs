use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Knobs of the simulated delivery layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Seed for the relayer's path order and duplicate injection.
    pub seed: u64,
    /// Probability that a delivered packet is delivered again in the same round.
    pub duplicate_delivery_rate: f64,
    // Interval of the async relayer task
    #[serde(with = "humantime_serde")]
    pub relayer_tick: Duration,
    /// Upper bound on rounds for `run_until_idle`.
    pub max_rounds: usize,
    /// How many finalized packets are kept for `redeliver`; oldest are evicted first.
    #[serde(default = "default_delivered_retention")]
    pub delivered_retention: usize,
}

fn default_delivered_retention() -> usize {
    4096
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            seed: 7,
            duplicate_delivery_rate: 0.0,
            relayer_tick: Duration::from_millis(10),
            max_rounds: 64,
            delivered_retention: default_delivered_retention(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_uses_human_readable_duration() {
        let json = r#"{"seed":1,"duplicate_delivery_rate":0.25,"relayer_tick":"50ms","max_rounds":10}"#;
        let config: SimulationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.relayer_tick, Duration::from_millis(50));
        let back = serde_json::to_string(&config).unwrap();
        assert!(back.contains("\"50ms\""));
        assert_eq!(config.delivered_retention, 4096);
    }
}
