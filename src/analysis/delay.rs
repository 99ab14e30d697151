//! Detection latency between two crossing streams.
//!
//! Typically the reference stream comes from a fast detector on the raw signal and the
//! comparison stream from the filtered one. For every comparison crossing, the delay is the
//! distance to the latest reference crossing of the same direction that is not later.

use anyhow::anyhow;
use anyhow::Result;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::crossings::{CrossingEvents, Direction};

/// Delays, in samples, of the crossings of one direction.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DelayStats {
    pub delays: Vec<usize>,
}

impl DelayStats {
    /// Largest delay, `None` if there were no crossings.
    pub fn max(&self) -> Option<usize> {
        self.delays.iter().copied().max()
    }

    /// Average delay, `None` if there were no crossings.
    pub fn mean(&self) -> Option<f64> {
        if self.delays.is_empty() {
            None
        } else {
            Some(self.delays.iter().sum::<usize>() as f64 / self.delays.len() as f64)
        }
    }
}

/// Delays of both directions.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DelayReport {
    pub up: DelayStats,
    pub down: DelayStats,
}

/// Computes the delay of each comparison crossing of one direction.
///
/// # Arguments
///
/// * `reference` - Strictly increasing reference crossing indices.
/// * `comparison` - Crossing indices to measure.
/// * `direction` - Direction of both streams, used in error messages.
///
/// # Errors
///
/// Returns an error if `reference` is not strictly increasing, or if a comparison crossing
/// has no reference crossing at or before it. Callers comparing arbitrary detectors must be
/// prepared for the latter: segmentation does not guarantee it.
///
/// # Examples
///
/// ```
/// use breath_algos::analysis::crossings::Direction;
/// use breath_algos::analysis::delay::direction_delays;
/// let stats = direction_delays(&[10, 20, 30], &[12, 23], Direction::Up).unwrap();
/// assert_eq!(stats.delays, vec![2, 3]);
/// assert_eq!(stats.max(), Some(3));
/// assert_eq!(stats.mean(), Some(2.5));
/// ```
pub fn direction_delays(
    reference: &[usize],
    comparison: &[usize],
    direction: Direction,
) -> Result<DelayStats> {
    if reference.windows(2).any(|w| w[0] >= w[1]) {
        return Err(anyhow!(
            "Reference {:?} crossings must be strictly increasing",
            direction
        ));
    }
    let delays = comparison
        .iter()
        .map(|&index| {
            let preceding = reference.partition_point(|&r| r <= index);
            match preceding.checked_sub(1) {
                Some(matched) => Ok(index - reference[matched]),
                None => Err(anyhow!(
                    "No reference {:?} crossing at or before index {}",
                    direction,
                    index
                )),
            }
        })
        .collect::<Result<Vec<usize>>>()?;
    Ok(DelayStats { delays })
}

/// Computes the delays of both directions of `comparison` against `reference`.
pub fn event_delays(reference: &CrossingEvents, comparison: &CrossingEvents) -> Result<DelayReport> {
    Ok(DelayReport {
        up: direction_delays(&reference.up, &comparison.up, Direction::Up)?,
        down: direction_delays(&reference.down, &comparison.down, Direction::Down)?,
    })
}
