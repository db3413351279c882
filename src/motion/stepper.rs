// src/motion/stepper.rs - Even step distribution across the two actuators

/// Spreads whole-step totals for actuators A and B over the fewest plan steps.
///
/// The plan has `max(|a|, |b|)` steps. The actuator with the larger count
/// steps every time; the other steps whenever its rounded proportional target
/// advances, so after step `i` of `n` its running count is
/// `round(i * total / n)` and never more than half a step from the ideal path.
#[derive(Debug, Clone)]
pub struct StepGenerator {
    total_a: i64,
    total_b: i64,
    len: u64,
    index: u64,
    done_a: i64,
    done_b: i64,
}

impl StepGenerator {
    pub fn new(total_a: i64, total_b: i64) -> Self {
        Self {
            total_a,
            total_b,
            len: total_a.unsigned_abs().max(total_b.unsigned_abs()),
            index: 0,
            done_a: 0,
            done_b: 0,
        }
    }

    /// Round fractional actuator deltas to whole steps first.
    pub fn from_fractional(a: f64, b: f64) -> Self {
        Self::new(a.round() as i64, b.round() as i64)
    }

    pub fn totals(&self) -> (i64, i64) {
        (self.total_a, self.total_b)
    }

    /// Signed step count of each actuator so far.
    pub fn position(&self) -> (i64, i64) {
        (self.done_a, self.done_b)
    }

    fn target(total: i64, index: u64, len: u64) -> i64 {
        let magnitude = (total.unsigned_abs() as u128 * index as u128 * 2 + len as u128) / (2 * len as u128);
        let magnitude = magnitude as i64;
        if total < 0 { -magnitude } else { magnitude }
    }
}

impl Iterator for StepGenerator {
    type Item = (i8, i8);

    fn next(&mut self) -> Option<(i8, i8)> {
        if self.index >= self.len {
            return None;
        }
        self.index += 1;
        let a = Self::target(self.total_a, self.index, self.len);
        let b = Self::target(self.total_b, self.index, self.len);
        let step = ((a - self.done_a) as i8, (b - self.done_b) as i8);
        self.done_a = a;
        self.done_b = b;
        Some(step)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.len - self.index) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for StepGenerator {}
