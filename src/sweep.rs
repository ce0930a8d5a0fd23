//! Parameter sweep planning.
//!
//! A sweep is the cartesian product of three inclusive integer ranges
//! (stimulator channel, vibration frequency, volume), visited channel-major,
//! frequency-mid, volume-minor. [`SweepPlan`] produces the conditions lazily
//! and can be cloned or re-created from the same parameters to restart.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Inclusive integer range walked with a fixed positive step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepRange {
    /// First value.
    pub start: i64,
    /// Last value (inclusive, reached only if on the step grid).
    pub end: i64,
    /// Distance between consecutive values.
    pub step: i64,
}

impl SweepRange {
    /// Creates a range.
    #[must_use]
    pub fn new(start: i64, end: i64, step: i64) -> Self {
        Self { start, end, step }
    }

    /// Number of values in the range, `None` when it does not fit a `usize`.
    #[must_use]
    pub fn checked_len(&self) -> Option<usize> {
        if self.step <= 0 || self.start > self.end {
            return Some(0);
        }
        let span = i128::from(self.end) - i128::from(self.start);
        usize::try_from(span / i128::from(self.step) + 1).ok()
    }

    /// Number of values in the range; zero when degenerate, saturating at
    /// `usize::MAX`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.checked_len().unwrap_or(usize::MAX)
    }

    /// True when the range yields no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at position `index`. Caller guarantees `index < len()`, which
    /// keeps the result between `start` and `end`.
    fn nth_value(&self, index: usize) -> i64 {
        let value = i128::from(self.start) + i128::from(self.step) * index as i128;
        i64::try_from(value).unwrap_or(self.end)
    }
}

impl fmt::Display for SweepRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}, Steps: {}", self.start, self.end, self.step)
    }
}

/// Immutable description of one experiment sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepParameters {
    /// Stimulator channel range.
    pub channel: SweepRange,
    /// Vibration frequency range.
    pub frequency: SweepRange,
    /// Volume range.
    pub volume: SweepRange,
    /// ON/OFF cycles recorded per condition.
    pub measurements_number: u32,
    /// Stimulus ON time per cycle.
    pub duration_on: Duration,
    /// Stimulus OFF time per cycle.
    pub duration_off: Duration,
    /// Recording time before the first cycle of a condition and after the
    /// stimulator shows up during the baseline window.
    pub pre_start: Duration,
    /// Run the acquisition keepalive task during the sweep.
    pub keep_ble_alive: bool,
}

impl SweepParameters {
    /// Lazily enumerates every condition of this sweep.
    #[must_use]
    pub fn plan(&self) -> SweepPlan {
        plan(self)
    }

    /// Number of conditions, `None` when it does not fit a `usize`.
    #[must_use]
    pub fn condition_count(&self) -> Option<usize> {
        self.channel
            .checked_len()?
            .checked_mul(self.frequency.checked_len()?)?
            .checked_mul(self.volume.checked_len()?)
    }
}

impl fmt::Display for SweepParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Channel Range: {}", self.channel)?;
        writeln!(f, "Volume Range: {}", self.volume)?;
        writeln!(f, "Frequency Range: {}", self.frequency)?;
        write!(
            f,
            "Measurements: Number = {}, Duration_on = {:?}, Duration_off = {:?}, Pre-start = {:?}",
            self.measurements_number, self.duration_on, self.duration_off, self.pre_start
        )
    }
}

/// One concrete (channel, frequency, volume) triple under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SweepCondition {
    /// Stimulator channel.
    pub channel: i64,
    /// Vibration frequency.
    pub frequency: i64,
    /// Volume.
    pub volume: i64,
}

impl fmt::Display for SweepCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Chan={} Freq={} Vol={}",
            self.channel, self.frequency, self.volume
        )
    }
}

/// Restartable, lazily evaluated sequence of sweep conditions.
#[derive(Debug, Clone)]
pub struct SweepPlan {
    channel: SweepRange,
    frequency: SweepRange,
    volume: SweepRange,
    next: usize,
    total: usize,
}

/// Builds the condition sequence for `params`.
///
/// The total saturates at `usize::MAX`; configuration loading rejects sweeps
/// that large.
#[must_use]
pub fn plan(params: &SweepParameters) -> SweepPlan {
    let total = params
        .channel
        .len()
        .saturating_mul(params.frequency.len())
        .saturating_mul(params.volume.len());
    SweepPlan {
        channel: params.channel,
        frequency: params.frequency,
        volume: params.volume,
        next: 0,
        total,
    }
}

impl SweepPlan {
    /// Total number of conditions, consumed or not.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }
}

impl Iterator for SweepPlan {
    type Item = SweepCondition;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let per_channel = self.frequency.len().saturating_mul(self.volume.len());
        let index = self.next;
        self.next += 1;

        Some(SweepCondition {
            channel: self.channel.nth_value(index / per_channel),
            frequency: self.frequency.nth_value((index % per_channel) / self.volume.len()),
            volume: self.volume.nth_value(index % self.volume.len()),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SweepPlan {}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(channel: SweepRange, frequency: SweepRange, volume: SweepRange) -> SweepParameters {
        SweepParameters {
            channel,
            frequency,
            volume,
            measurements_number: 1,
            duration_on: Duration::from_secs(1),
            duration_off: Duration::from_secs(1),
            pre_start: Duration::ZERO,
            keep_ble_alive: false,
        }
    }

    #[test]
    fn test_range_len_follows_floor_formula() {
        assert_eq!(SweepRange::new(10, 20, 10).len(), 2);
        assert_eq!(SweepRange::new(0, 8, 3).len(), 3); // 0, 3, 6
        assert_eq!(SweepRange::new(5, 5, 1).len(), 1);
        assert_eq!(SweepRange::new(6, 5, 1).len(), 0);
        assert_eq!(SweepRange::new(0, 5, 0).len(), 0);
    }

    #[test]
    fn test_plan_is_channel_major_volume_minor() {
        let p = params(
            SweepRange::new(1, 2, 1),
            SweepRange::new(10, 20, 10),
            SweepRange::new(40, 50, 10),
        );
        let got: Vec<(i64, i64, i64)> = plan(&p)
            .map(|c| (c.channel, c.frequency, c.volume))
            .collect();
        assert_eq!(
            got,
            vec![
                (1, 10, 40),
                (1, 10, 50),
                (1, 20, 40),
                (1, 20, 50),
                (2, 10, 40),
                (2, 10, 50),
                (2, 20, 40),
                (2, 20, 50),
            ]
        );
    }

    #[test]
    fn test_plan_count_matches_product() {
        let p = params(
            SweepRange::new(0, 8, 2),
            SweepRange::new(50, 250, 25),
            SweepRange::new(10, 100, 30),
        );
        let expected = 5 * 9 * 4;
        let plan = plan(&p);
        assert_eq!(plan.total(), expected);
        assert_eq!(plan.len(), expected);
        assert_eq!(plan.count(), expected);
    }

    #[test]
    fn test_degenerate_range_yields_nothing() {
        let p = params(
            SweepRange::new(1, 1, 1),
            SweepRange::new(30, 10, 10),
            SweepRange::new(50, 50, 1),
        );
        assert_eq!(plan(&p).next(), None);
    }

    #[test]
    fn test_huge_range_length_does_not_overflow() {
        let full = SweepRange::new(i64::MIN, i64::MAX, 1);
        assert_eq!(full.checked_len(), None);
        assert_eq!(full.len(), usize::MAX);
        assert_eq!(SweepRange::new(i64::MIN, i64::MAX, i64::MAX).checked_len(), Some(3));
    }

    #[test]
    fn test_huge_product_saturates_instead_of_panicking() {
        let wide = SweepRange::new(0, 10_000_000, 1);
        let p = params(wide, wide, wide);
        assert_eq!(p.condition_count(), None);

        let mut plan = plan(&p);
        assert_eq!(plan.total(), usize::MAX);
        assert_eq!(
            plan.next(),
            Some(SweepCondition {
                channel: 0,
                frequency: 0,
                volume: 0
            })
        );
        assert_eq!(plan.next().map(|c| c.volume), Some(1));
    }

    #[test]
    fn test_condition_count_matches_plan() {
        let p = params(
            SweepRange::new(1, 2, 1),
            SweepRange::new(10, 20, 10),
            SweepRange::new(40, 50, 10),
        );
        assert_eq!(p.condition_count(), Some(8));
    }

    #[test]
    fn test_plan_is_restartable() {
        let p = params(
            SweepRange::new(1, 3, 1),
            SweepRange::new(10, 10, 1),
            SweepRange::new(50, 60, 5),
        );
        let mut first = p.plan();
        first.next();
        let resumed = first.clone();
        assert_eq!(resumed.len(), 8);
        assert_eq!(p.plan().collect::<Vec<_>>(), p.plan().collect::<Vec<_>>());
    }
}
