use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
pub type Fixed64 = I32F32;

/// Virtual simulation time. Monotonic and never negative.
///
/// Fixed-point keeps event ordering exact: two wakeups computed from the
/// same durations always compare equal, on every platform.
pub type SimTime = Fixed64;

/// Convert an f64 to Fixed64, saturating at the representable range.
/// Use for initialization and for converting sampled durations.
#[inline]
pub fn f64_to_fixed64(v: f64) -> Fixed64 {
    if v.is_nan() {
        return Fixed64::ZERO;
    }
    Fixed64::saturating_from_num(v)
}

/// Convert Fixed64 to f64. Use only for sampling and display.
#[inline]
pub fn fixed64_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}

/// Convert a sampled duration into simulation time. Negative samples
/// (e.g. from the left tail of a normal distribution) clamp to zero.
#[inline]
pub fn duration_from_f64(v: f64) -> SimTime {
    f64_to_fixed64(v).max(SimTime::ZERO)
}

/// Checked division for Fixed64 that returns None on zero divisor.
#[inline]
pub fn checked_div_64(a: Fixed64, b: Fixed64) -> Option<Fixed64> {
    a.checked_div(b)
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// A point on the shop floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Position {
    pub x: Fixed64,
    pub y: Fixed64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x: f64_to_fixed64(x),
            y: f64_to_fixed64(y),
        }
    }

    /// |dx| + |dy|, saturating.
    pub fn manhattan(&self, other: &Position) -> Fixed64 {
        let dx = (self.x - other.x).saturating_abs();
        let dy = (self.y - other.y).saturating_abs();
        dx.saturating_add(dy)
    }

    /// Straight-line distance. Computed in f64 and converted back.
    pub fn euclidean(&self, other: &Position) -> Fixed64 {
        let dx = fixed64_to_f64(self.x - other.x);
        let dy = fixed64_to_f64(self.y - other.y);
        f64_to_fixed64((dx * dx + dy * dy).sqrt())
    }
}
