//! Duration models.
//!
//! States sample their occupation time from a [`TimeModel`]. Transport
//! states pass the leg distance; every other caller passes zero, which the
//! non-spatial models ignore.

use rand_distr::{Exp, LogNormal, Normal};
use serde::{Deserialize, Serialize};

use crate::fixed::{Fixed64, Position, SimTime, checked_div_64, duration_from_f64};
use crate::rng::SimRng;

/// Shape of a random duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distribution {
    Normal,
    Lognormal,
    Exponential,
    Constant,
}

/// How a distance-based model measures a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Manhattan,
    Euclidean,
}

impl DistanceMetric {
    pub fn measure(&self, a: &Position, b: &Position) -> Fixed64 {
        match self {
            DistanceMetric::Manhattan => a.manhattan(b),
            DistanceMetric::Euclidean => a.euclidean(b),
        }
    }
}

/// Errors raised when a time model is constructed with unusable parameters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimeModelError {
    #[error("{distribution:?} distribution needs a positive location, got {location}")]
    NonPositiveLocation {
        distribution: Distribution,
        location: f64,
    },
    #[error("scale must be non-negative and finite, got {0}")]
    InvalidScale(f64),
    #[error("sequence time model has no values")]
    EmptySequence,
    #[error("distance time model needs a positive speed")]
    NonPositiveSpeed,
}

/// A duration model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TimeModel {
    /// The same duration every time.
    Constant { duration: SimTime },
    /// Random durations. `location` is the mean, `scale` the standard
    /// deviation (ignored by `Exponential` and `Constant`).
    Distribution {
        distribution: Distribution,
        location: f64,
        scale: f64,
    },
    /// Cycles through a fixed list of durations.
    Sequence {
        values: Vec<SimTime>,
        #[serde(default)]
        cursor: usize,
    },
    /// `reaction_time + distance / speed`.
    Distance {
        speed: Fixed64,
        reaction_time: SimTime,
        #[serde(default)]
        metric: DistanceMetric,
    },
}

impl TimeModel {
    pub fn constant(duration: f64) -> Self {
        TimeModel::Constant {
            duration: duration_from_f64(duration),
        }
    }

    pub fn sequence(values: &[f64]) -> Self {
        TimeModel::Sequence {
            values: values.iter().map(|v| duration_from_f64(*v)).collect(),
            cursor: 0,
        }
    }

    /// Reject parameter combinations that could never sample.
    pub fn validate(&self) -> Result<(), TimeModelError> {
        match self {
            TimeModel::Constant { .. } => Ok(()),
            TimeModel::Distribution {
                distribution,
                location,
                scale,
            } => {
                if !scale.is_finite() || *scale < 0.0 {
                    return Err(TimeModelError::InvalidScale(*scale));
                }
                let needs_positive =
                    matches!(distribution, Distribution::Lognormal | Distribution::Exponential);
                if needs_positive && !(*location > 0.0) {
                    return Err(TimeModelError::NonPositiveLocation {
                        distribution: *distribution,
                        location: *location,
                    });
                }
                Ok(())
            }
            TimeModel::Sequence { values, .. } => {
                if values.is_empty() {
                    Err(TimeModelError::EmptySequence)
                } else {
                    Ok(())
                }
            }
            TimeModel::Distance { speed, .. } => {
                if *speed <= Fixed64::ZERO {
                    Err(TimeModelError::NonPositiveSpeed)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Draw the next duration. Sequence models advance their cursor.
    pub fn sample(&mut self, rng: &mut SimRng, distance: Fixed64) -> SimTime {
        match self {
            TimeModel::Constant { duration } => *duration,
            TimeModel::Distribution {
                distribution,
                location,
                scale,
            } => duration_from_f64(sample_distribution(*distribution, *location, *scale, rng)),
            TimeModel::Sequence { values, cursor } => {
                if values.is_empty() {
                    return SimTime::ZERO;
                }
                let value = values[*cursor % values.len()];
                *cursor = (*cursor + 1) % values.len();
                value
            }
            TimeModel::Distance { .. } => self.expected(distance),
        }
    }

    /// The mean duration, without consuming randomness. Used by the
    /// shortest-processing-time policies.
    pub fn expected(&self, distance: Fixed64) -> SimTime {
        match self {
            TimeModel::Constant { duration } => *duration,
            TimeModel::Distribution { location, .. } => duration_from_f64(*location),
            TimeModel::Sequence { values, cursor } => {
                if values.is_empty() {
                    SimTime::ZERO
                } else {
                    values[*cursor % values.len()]
                }
            }
            TimeModel::Distance {
                speed,
                reaction_time,
                ..
            } => {
                let travel = checked_div_64(distance, *speed).unwrap_or(Fixed64::ZERO);
                reaction_time.saturating_add(travel).max(SimTime::ZERO)
            }
        }
    }

    /// Distance between two points as this model measures it. Non-spatial
    /// models use Manhattan distance.
    pub fn distance(&self, a: &Position, b: &Position) -> Fixed64 {
        match self {
            TimeModel::Distance { metric, .. } => metric.measure(a, b),
            _ => a.manhattan(b),
        }
    }
}

fn sample_distribution(kind: Distribution, location: f64, scale: f64, rng: &mut SimRng) -> f64 {
    match kind {
        Distribution::Constant => location,
        Distribution::Normal => match Normal::new(location, scale) {
            Ok(normal) => rng.sample(&normal),
            Err(_) => location,
        },
        Distribution::Lognormal => {
            // Parameterised by the mean and deviation of the lognormal
            // itself, not of the underlying normal.
            if location <= 0.0 {
                return 0.0;
            }
            let variance = scale * scale;
            let mu = (location * location / (location * location + variance).sqrt()).ln();
            let sigma = (1.0 + variance / (location * location)).ln().sqrt();
            match LogNormal::new(mu, sigma) {
                Ok(lognormal) => rng.sample(&lognormal),
                Err(_) => location,
            }
        }
        Distribution::Exponential => {
            if location <= 0.0 {
                return 0.0;
            }
            match Exp::new(1.0 / location) {
                Ok(exp) => rng.sample(&exp),
                Err(_) => location,
            }
        }
    }
}
