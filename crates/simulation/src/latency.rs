//! Pluggable network latency models.
//!
//! A model maps a sender/receiver pair plus an externally supplied jitter
//! digit to a delivery delay. Keeping the randomness outside makes every
//! model a pure function, so the same seeded RNG reproduces the same run
//! and tests can pin exact delays.

use aggsim_types::{Millis, Node};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Maps a node pair and a jitter digit in `0..100` to a delay.
pub trait LatencyModel {
    fn delay_ms(&self, from: &Node, to: &Node, jitter_digit: u8) -> Millis;
}

/// Selects and parameterizes a latency model at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LatencyConfig {
    /// Constant 1 ms delivery.
    None,
    /// Distance-proportional delay with jitter.
    Distance,
    /// Percentile table built from cumulative (proportion %, value) pairs.
    Empirical {
        proportions: Vec<u32>,
        values: Vec<Millis>,
    },
}

impl LatencyConfig {
    /// Build the configured model. Empirical tables are validated here and
    /// a malformed distribution aborts the run before it starts.
    pub fn build(&self) -> Result<Box<dyn LatencyModel>, ConfigError> {
        match self {
            LatencyConfig::None => Ok(Box::new(NoLatency)),
            LatencyConfig::Distance => Ok(Box::new(DistanceLatency)),
            LatencyConfig::Empirical {
                proportions,
                values,
            } => Ok(Box::new(EmpiricalLatency::from_distribution(
                proportions,
                values,
            )?)),
        }
    }
}

/// Constant 1 ms. Never 0, so message ordering stays strict: a reply can
/// never arrive in the same drain pass as the message that caused it.
#[derive(Debug, Clone, Copy)]
pub struct NoLatency;

impl LatencyModel for NoLatency {
    fn delay_ms(&self, _from: &Node, _to: &Node, _jitter_digit: u8) -> Millis {
        1
    }
}

/// Delay proportional to the distance between the two nodes.
///
/// The base delay is `10 + 200 * normalized_distance` milliseconds, scaled
/// by `max(50 - jitter_digit, 1)`. The clamp keeps the model total over the
/// full `0..100` jitter domain: without it the multiplier goes negative for
/// digits above 50.
#[derive(Debug, Clone, Copy)]
pub struct DistanceLatency;

impl LatencyModel for DistanceLatency {
    fn delay_ms(&self, from: &Node, to: &Node, jitter_digit: u8) -> Millis {
        let raw = 10 + (200.0 * from.normalized_distance(to)).round() as Millis;
        let factor = 50u64.saturating_sub(Millis::from(jitter_digit)).max(1);
        raw * factor
    }
}

/// Delay drawn from a measured distribution.
///
/// The table has exactly 100 slots; the jitter digit indexes it directly,
/// so a uniformly drawn digit samples the distribution's percentiles.
#[derive(Debug, Clone)]
pub struct EmpiricalLatency {
    table: Vec<Millis>,
}

impl EmpiricalLatency {
    /// Build the percentile table from cumulative (proportion %, value)
    /// pairs: `proportions[i]` percent of messages take up to `values[i]`
    /// milliseconds, linearly interpolated from the previous band's value.
    ///
    /// Proportions must sum to exactly 100 and fill exactly 100 slots;
    /// anything else is a fatal [`ConfigError`].
    pub fn from_distribution(
        proportions: &[u32],
        values: &[Millis],
    ) -> Result<Self, ConfigError> {
        if proportions.len() != values.len() {
            return Err(ConfigError::LengthMismatch {
                proportions: proportions.len(),
                values: values.len(),
            });
        }
        let sum: u32 = proportions.iter().sum();
        if sum != 100 {
            return Err(ConfigError::ProportionSum { got: sum });
        }

        let mut table = Vec::with_capacity(100);
        let mut prev = 0.0f64;
        for (index, (&share, &value)) in proportions.iter().zip(values).enumerate() {
            if share == 0 {
                return Err(ConfigError::ZeroProportion { index });
            }
            let step = (value as f64 - prev) / f64::from(share);
            for k in 1..=share {
                table.push((prev + step * f64::from(k)).round() as Millis);
            }
            prev = value as f64;
        }

        if table.len() != 100 {
            return Err(ConfigError::TableSlots { got: table.len() });
        }
        Ok(Self { table })
    }

    /// The underlying 100-slot table, ascending within each band.
    pub fn table(&self) -> &[Millis] {
        &self.table
    }
}

impl LatencyModel for EmpiricalLatency {
    fn delay_ms(&self, _from: &Node, _to: &Node, jitter_digit: u8) -> Millis {
        self.table[jitter_digit as usize % 100]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aggsim_types::NodeRegistry;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn two_nodes() -> NodeRegistry {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut registry = NodeRegistry::new();
        registry.add_node_at_random(&mut rng);
        registry.add_node_at_random(&mut rng);
        registry
    }

    #[test]
    fn no_latency_is_one_millisecond() {
        let registry = two_nodes();
        let model = NoLatency;
        for digit in 0..100 {
            assert_eq!(model.delay_ms(registry.get(0), registry.get(1), digit), 1);
        }
    }

    #[test]
    fn distance_delay_stays_positive_across_jitter_domain() {
        let registry = two_nodes();
        let model = DistanceLatency;
        for digit in 0..100 {
            let delay = model.delay_ms(registry.get(0), registry.get(1), digit);
            assert!(delay >= 10, "digit {digit} produced delay {delay}");
        }
    }

    #[test]
    fn distance_low_jitter_means_long_delay() {
        let registry = two_nodes();
        let model = DistanceLatency;
        let slow = model.delay_ms(registry.get(0), registry.get(1), 0);
        let fast = model.delay_ms(registry.get(0), registry.get(1), 49);
        assert_eq!(slow, fast * 50);
    }

    #[test]
    fn empirical_table_interpolates_per_band() {
        let model = EmpiricalLatency::from_distribution(&[50, 50], &[10, 20]).unwrap();
        let table = model.table();
        assert_eq!(table.len(), 100);
        // First band rises toward 10, second band from 10 toward 20.
        assert!(table[0] <= 1);
        assert_eq!(table[24], 5);
        assert_eq!(table[49], 10);
        assert_eq!(table[74], 15);
        assert_eq!(table[99], 20);
        assert!(table.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn empirical_rejects_sum_other_than_100() {
        let err = EmpiricalLatency::from_distribution(&[50, 49], &[10, 20]).unwrap_err();
        assert_eq!(err, ConfigError::ProportionSum { got: 99 });

        let err = EmpiricalLatency::from_distribution(&[50, 51], &[10, 20]).unwrap_err();
        assert_eq!(err, ConfigError::ProportionSum { got: 101 });
    }

    #[test]
    fn empirical_rejects_mismatched_arrays() {
        let err = EmpiricalLatency::from_distribution(&[100], &[10, 20]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::LengthMismatch {
                proportions: 1,
                values: 2
            }
        );
    }

    #[test]
    fn empirical_rejects_zero_width_band() {
        let err = EmpiricalLatency::from_distribution(&[0, 100], &[10, 20]).unwrap_err();
        assert_eq!(err, ConfigError::ZeroProportion { index: 0 });
    }

    #[test]
    fn empirical_accepts_measured_distribution() {
        // A distribution of the shape real deployments produce.
        let proportions = [1, 33, 17, 12, 8, 5, 4, 3, 3, 1, 1, 2, 1, 1, 8];
        let values = [62, 65, 69, 82, 85, 87, 90, 92, 95, 137, 205, 210, 235, 347, 1250];
        let model = EmpiricalLatency::from_distribution(&proportions, &values).unwrap();
        assert_eq!(model.table().len(), 100);
        assert_eq!(model.table()[99], 1250);
    }
}
