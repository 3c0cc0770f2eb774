//! Health-check strategy: which subset of a snapshot to probe (design §4.J).

use crate::error::CircuitMeshError;

/// `ALL` probes every endpoint in the snapshot; `Partial` probes a bounded
/// subset, expanding lazily as probed endpoints turn unhealthy. Setting both
/// a count and a ratio bound is a config error, enforced by only exposing
/// the two `partial_*` constructors (never both fields at once).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HealthCheckStrategy {
    All,
    Partial(PartialBound),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PartialBound {
    MaxCount(usize),
    MaxRatio(f64),
}

impl HealthCheckStrategy {
    pub fn all() -> Self {
        Self::All
    }

    pub fn partial_max_count(max_count: usize) -> Result<Self, CircuitMeshError> {
        if max_count == 0 {
            return Err(CircuitMeshError::config("max_count must be at least 1"));
        }
        Ok(Self::Partial(PartialBound::MaxCount(max_count)))
    }

    pub fn partial_max_ratio(max_ratio: f64) -> Result<Self, CircuitMeshError> {
        if !(max_ratio > 0.0 && max_ratio <= 1.0) {
            return Err(CircuitMeshError::config("max_ratio must be in (0, 1]"));
        }
        Ok(Self::Partial(PartialBound::MaxRatio(max_ratio)))
    }

    /// How many of `total` candidate endpoints should be under active probe.
    pub fn target_count(&self, total: usize) -> usize {
        match self {
            Self::All => total,
            Self::Partial(PartialBound::MaxCount(n)) => (*n).min(total),
            Self::Partial(PartialBound::MaxRatio(r)) => {
                if total == 0 {
                    0
                } else {
                    (((total as f64) * r).ceil() as usize).clamp(1, total)
                }
            }
        }
    }
}
