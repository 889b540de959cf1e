//! Fatal configuration errors, reported at construction.

use thiserror::Error;

/// A simulation setup that cannot produce a meaningful run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("latency distribution proportions sum to {got}, expected exactly 100")]
    ProportionSum { got: u32 },

    #[error(
        "latency distribution proportion and value arrays differ in length \
         ({proportions} vs {values})"
    )]
    LengthMismatch { proportions: usize, values: usize },

    #[error("latency distribution band {index} has zero proportion")]
    ZeroProportion { index: usize },

    #[error("latency distribution produced {got} table slots, expected exactly 100")]
    TableSlots { got: usize },

    #[error("population size must be greater than zero")]
    EmptyPopulation,
}
