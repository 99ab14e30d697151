//! Breath-cycle segmentation by hysteresis zero-crossing detection on the derivative.
//!
//! A rising derivative above the rise threshold marks the start of an inhale, a falling one
//! below the fall threshold the start of an exhale. Noise bumps on real sensors produce short
//! reversals, so every new crossing is first treated as tentative:
//!
//! - it is confirmed if the last opposite crossing is older than the debounce window, or if the
//!   derivative swung past the spike override since the envelopes were last reset;
//! - otherwise the *previous* opposite crossing is retracted and nothing is recorded, which
//!   collapses a bump-and-reverse pair into the single crossing that preceded it.
//!
//! Alongside the crossings, the detector tracks the signal and derivative envelopes and an
//! estimate of the current cycle duration, reported for every sample.
//!
//! # Example
//!
//! ```rust
//! use breath_algos::analysis::crossings::{Crossing, Direction, ZeroCrossingDetector};
//!
//! let mut detector = ZeroCrossingDetector::new();
//! let steps: Vec<_> = [0.0, 5.0, 5.0]
//!     .iter()
//!     .map(|&dx| detector.process(0.0, dx))
//!     .collect();
//! assert_eq!(
//!     steps[1].crossing,
//!     Some(Crossing::Confirmed { direction: Direction::Up, index: 1 })
//! );
//! assert_eq!(detector.events().up, vec![1]);
//! ```

use anyhow::anyhow;
use anyhow::Result;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Cycle period, in samples, reported until two crossings of a direction exist.
pub const DEFAULT_PERIOD: usize = 50;

/// Weight kept by the slow signal envelope on each relaxation step.
const SIGNAL_ENVELOPE_KEEP: f64 = 0.99;
/// Weight kept by the slow derivative envelope on each relaxation step.
const DERIVATIVE_ENVELOPE_KEEP: f64 = 0.95;

/// Direction of a crossing: `Up` starts an inhale, `Down` starts an exhale.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

/// Hysteresis state of the detector.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Sign {
    /// No crossing seen yet.
    Neutral,
    Rising,
    Falling,
}

/// Thresholds of the crossing detector, tuned for the breath sensor dynamics.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct CrossingThresholds {
    /// Derivative value above which the state flips to rising.
    pub rise: f64,
    /// Derivative value below which the state flips to falling.
    pub fall: f64,
    /// Number of samples within which an opposite crossing is considered noise.
    pub debounce: usize,
    /// Derivative magnitude that confirms a crossing regardless of the debounce window.
    pub spike: f64,
}

impl Default for CrossingThresholds {
    fn default() -> Self {
        Self {
            rise: 3.0,
            fall: -3.0,
            debounce: 4,
            spike: 8.0,
        }
    }
}

impl CrossingThresholds {
    pub fn validate(&self) -> Result<()> {
        if !self.rise.is_finite() || !self.fall.is_finite() || !self.spike.is_finite() {
            return Err(anyhow!("Crossing thresholds must be finite"));
        }
        if self.fall >= self.rise {
            return Err(anyhow!(
                "Fall threshold ({}) must be below the rise threshold ({})",
                self.fall,
                self.rise
            ));
        }
        if self.spike < 0.0 {
            return Err(anyhow!("Spike override must not be negative"));
        }
        Ok(())
    }
}

/// Outcome of a threshold crossing.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Crossing {
    /// A crossing recorded at `index`.
    Confirmed { direction: Direction, index: usize },
    /// The earlier crossing at `index` was removed as noise.
    Retracted { direction: Direction, index: usize },
}

/// Per-sample derived metrics.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, PartialEq, Clone, Copy, Default)]
pub struct CycleMetrics {
    /// Estimated cycle duration in samples.
    pub duration: f64,
    pub x_min: f64,
    pub x_max: f64,
    pub x_delta: f64,
    pub dx_min: f64,
    pub dx_max: f64,
    pub dx_delta: f64,
}

/// Result of processing one sample.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct CrossingStep {
    pub crossing: Option<Crossing>,
    pub metrics: CycleMetrics,
}

/// Up and down crossing indices, each strictly increasing.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct CrossingEvents {
    pub up: Vec<usize>,
    pub down: Vec<usize>,
}

impl CrossingEvents {
    pub fn get(&self, direction: Direction) -> &[usize] {
        match direction {
            Direction::Up => &self.up,
            Direction::Down => &self.down,
        }
    }

    fn get_mut(&mut self, direction: Direction) -> &mut Vec<usize> {
        match direction {
            Direction::Up => &mut self.up,
            Direction::Down => &mut self.down,
        }
    }
}

/// Cycle period of one direction: the larger of the last complete cycle and the cycle in
/// progress, so a lengthening cycle is not under-estimated.
fn period(events: &[usize], index: usize) -> usize {
    match events {
        [.., prev, last] => (last - prev).max(index - last),
        _ => DEFAULT_PERIOD,
    }
}

/// Fast bounds over the current segment plus slow bounds that leak toward them.
#[derive(Debug, Clone, Default)]
struct Envelope {
    fast_min: f64,
    fast_max: f64,
    slow_min: f64,
    slow_max: f64,
}

impl Envelope {
    fn include(&mut self, value: f64) {
        self.fast_min = self.fast_min.min(value);
        self.fast_max = self.fast_max.max(value);
    }

    /// Moves each slow bound toward its fast bound, only when the fast bound is tighter.
    fn relax(&mut self, keep: f64) {
        if self.slow_min < self.fast_min {
            self.slow_min = keep * self.slow_min + (1.0 - keep) * self.fast_min;
        }
        if self.slow_max > self.fast_max {
            self.slow_max = keep * self.slow_max + (1.0 - keep) * self.fast_max;
        }
    }

    fn lower(&self) -> f64 {
        self.fast_min.min(self.slow_min)
    }

    fn upper(&self) -> f64 {
        self.fast_max.max(self.slow_max)
    }
}

/// Streaming breath-cycle segmentation session.
///
/// Owns all running state of one pass over a signal. Feed it one `(signal, derivative)` pair
/// per sample with `process`.
#[derive(Debug, Clone)]
pub struct ZeroCrossingDetector {
    thresholds: CrossingThresholds,
    sign: Sign,
    index: usize,
    events: CrossingEvents,
    signal: Envelope,
    derivative: Envelope,
}

impl Default for ZeroCrossingDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ZeroCrossingDetector {
    /// Creates a detector with the default thresholds.
    pub fn new() -> Self {
        Self {
            thresholds: CrossingThresholds::default(),
            sign: Sign::Neutral,
            index: 0,
            events: CrossingEvents::default(),
            signal: Envelope::default(),
            derivative: Envelope::default(),
        }
    }

    /// Creates a detector with custom thresholds.
    ///
    /// # Errors
    ///
    /// Returns an error if the thresholds are invalid.
    pub fn with_thresholds(thresholds: CrossingThresholds) -> Result<Self> {
        thresholds.validate()?;
        Ok(Self {
            thresholds,
            ..Self::new()
        })
    }

    pub fn thresholds(&self) -> &CrossingThresholds {
        &self.thresholds
    }

    pub fn sign(&self) -> Sign {
        self.sign
    }

    /// Number of samples processed so far.
    pub fn len(&self) -> usize {
        self.index
    }

    pub fn is_empty(&self) -> bool {
        self.index == 0
    }

    /// Crossings confirmed so far.
    pub fn events(&self) -> &CrossingEvents {
        &self.events
    }

    pub fn into_events(self) -> CrossingEvents {
        self.events
    }

    /// Processes one sample of the signal and its derivative.
    pub fn process(&mut self, x: f64, dx: f64) -> CrossingStep {
        let index = self.index;
        self.index += 1;

        self.signal.include(x);
        self.derivative.include(dx);

        let crossing = if self.sign != Sign::Rising && dx > self.thresholds.rise {
            self.sign = Sign::Rising;
            Some(self.resolve(Direction::Up, index, dx))
        } else if self.sign != Sign::Falling && dx < self.thresholds.fall {
            self.sign = Sign::Falling;
            Some(self.resolve(Direction::Down, index, dx))
        } else {
            None
        };

        let duration =
            (period(&self.events.up, index) + period(&self.events.down, index)) as f64 / 2.0;

        self.signal.relax(SIGNAL_ENVELOPE_KEEP);
        self.derivative.relax(DERIVATIVE_ENVELOPE_KEEP);

        let (x_min, x_max) = (self.signal.lower(), self.signal.upper());
        let (dx_min, dx_max) = (self.derivative.lower(), self.derivative.upper());
        CrossingStep {
            crossing,
            metrics: CycleMetrics {
                duration,
                x_min,
                x_max,
                x_delta: x_max - x_min,
                dx_min,
                dx_max,
                dx_delta: dx_max - dx_min,
            },
        }
    }

    /// Confirms a tentative crossing or retracts the opposite crossing it would pair with.
    fn resolve(&mut self, direction: Direction, index: usize, dx: f64) -> Crossing {
        let spike = match direction {
            Direction::Up => self.derivative.fast_min < -self.thresholds.spike,
            Direction::Down => self.derivative.fast_max > self.thresholds.spike,
        };
        let opposite = direction.opposite();
        match self.events.get(opposite).last().copied() {
            Some(last) if index - last <= self.thresholds.debounce && !spike => {
                self.events.get_mut(opposite).pop();
                trace!(?opposite, index = last, at = index, "retracted crossing");
                Crossing::Retracted {
                    direction: opposite,
                    index: last,
                }
            }
            _ => {
                self.confirm(direction, index, dx);
                debug!(?direction, index, dx, "confirmed crossing");
                Crossing::Confirmed { direction, index }
            }
        }
    }

    /// Records a crossing and starts a new segment of the envelopes.
    ///
    /// On an up crossing the slow derivative bounds restart from the previous fast maximum,
    /// on a down crossing from the previous fast minimum.
    fn confirm(&mut self, direction: Direction, index: usize, dx: f64) {
        match direction {
            Direction::Up => {
                self.signal.slow_min = self.signal.fast_min;
                self.signal.fast_max = self.signal.fast_min;
                self.derivative.slow_min = self.derivative.fast_max;
                self.derivative.slow_max = self.derivative.fast_max;
                self.derivative.fast_max = dx;
            }
            Direction::Down => {
                self.signal.fast_min = self.signal.fast_max;
                self.signal.slow_max = self.signal.fast_max;
                self.derivative.slow_min = self.derivative.fast_min;
                self.derivative.slow_max = self.derivative.fast_min;
                self.derivative.fast_min = dx;
            }
        }
        self.events.get_mut(direction).push(index);
    }
}

/// Crossings and per-sample metrics of a whole signal.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segmentation {
    pub events: CrossingEvents,
    pub duration: Vec<f64>,
    pub x_min: Vec<f64>,
    pub x_max: Vec<f64>,
    pub x_delta: Vec<f64>,
    pub dx_min: Vec<f64>,
    pub dx_max: Vec<f64>,
    pub dx_delta: Vec<f64>,
}

impl Segmentation {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            events: CrossingEvents::default(),
            duration: Vec::with_capacity(capacity),
            x_min: Vec::with_capacity(capacity),
            x_max: Vec::with_capacity(capacity),
            x_delta: Vec::with_capacity(capacity),
            dx_min: Vec::with_capacity(capacity),
            dx_max: Vec::with_capacity(capacity),
            dx_delta: Vec::with_capacity(capacity),
        }
    }

    fn push(&mut self, metrics: &CycleMetrics) {
        self.duration.push(metrics.duration);
        self.x_min.push(metrics.x_min);
        self.x_max.push(metrics.x_max);
        self.x_delta.push(metrics.x_delta);
        self.dx_min.push(metrics.dx_min);
        self.dx_max.push(metrics.dx_max);
        self.dx_delta.push(metrics.dx_delta);
    }

    /// Number of processed samples.
    pub fn len(&self) -> usize {
        self.duration.len()
    }

    pub fn is_empty(&self) -> bool {
        self.duration.is_empty()
    }
}

/// Segments a signal into breath cycles using the default thresholds.
///
/// # Arguments
///
/// * `signal` - The (filtered) position signal.
/// * `derivative` - Its rate of change, same length.
///
/// # Errors
///
/// Returns an error if the two sequences differ in length.
pub fn zero_crossings(signal: &[f64], derivative: &[f64]) -> Result<Segmentation> {
    zero_crossings_with(signal, derivative, CrossingThresholds::default())
}

/// Segments a signal into breath cycles with custom thresholds.
pub fn zero_crossings_with(
    signal: &[f64],
    derivative: &[f64],
    thresholds: CrossingThresholds,
) -> Result<Segmentation> {
    if signal.len() != derivative.len() {
        return Err(anyhow!(
            "Signal and derivative must have the same length ({} != {})",
            signal.len(),
            derivative.len()
        ));
    }
    let mut detector = ZeroCrossingDetector::with_thresholds(thresholds)?;
    let mut segmentation = Segmentation::with_capacity(signal.len());
    for (&x, &dx) in signal.iter().zip(derivative) {
        let step = detector.process(x, dx);
        segmentation.push(&step.metrics);
    }
    segmentation.events = detector.into_events();
    Ok(segmentation)
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};

    use super::*;

    fn is_strictly_increasing(indices: &[usize]) -> bool {
        indices.windows(2).all(|w| w[0] < w[1])
    }

    #[test]
    fn test_crossing_on_debounce_boundary_is_retracted() {
        // the down crossing comes exactly 4 samples after the up crossing
        let dx = [0.0, 0.0, 4.0, 4.0, 0.0, 0.0, -4.0, -4.0, 0.0, 0.0];
        let x = [0.0, 0.0, 1.0, 2.0, 2.0, 2.0, 1.0, 0.0, 0.0, 0.0];
        let mut detector = ZeroCrossingDetector::new();
        let steps: Vec<CrossingStep> = x
            .iter()
            .zip(dx.iter())
            .map(|(&x, &dx)| detector.process(x, dx))
            .collect();
        assert_eq!(
            steps[2].crossing,
            Some(Crossing::Confirmed {
                direction: Direction::Up,
                index: 2
            })
        );
        assert_eq!(
            steps[6].crossing,
            Some(Crossing::Retracted {
                direction: Direction::Up,
                index: 2
            })
        );
        assert!(detector.events().up.is_empty());
        assert!(detector.events().down.is_empty());
        assert_eq!(detector.sign(), Sign::Falling);
    }

    #[test]
    fn test_single_breath_cycle() {
        let dx = [0.0, 0.0, 4.0, 4.0, 0.0, 0.0, 0.0, -4.0, -4.0, 0.0, 0.0];
        let x = [0.0, 0.0, 1.0, 2.0, 2.0, 2.0, 2.0, 1.0, 0.0, 0.0, 0.0];
        let segmentation = zero_crossings(&x, &dx).unwrap();
        assert_eq!(segmentation.events.up, vec![2]);
        assert_eq!(segmentation.events.down, vec![7]);
        assert_eq!(segmentation.len(), x.len());
        assert!(segmentation
            .duration
            .iter()
            .all(|&d| d == DEFAULT_PERIOD as f64));
    }

    #[test]
    fn test_spike_overrides_debounce() {
        let dx = [0.0, 4.0, 9.0, 0.0, -4.0, 0.0];
        let x = [0.0; 6];
        let segmentation = zero_crossings(&x, &dx).unwrap();
        assert_eq!(segmentation.events.up, vec![1]);
        assert_eq!(segmentation.events.down, vec![4]);
    }

    #[test]
    fn test_hysteresis_without_rearm() {
        // staying above the rise threshold never produces a second up crossing
        let dx = [4.0, 5.0, 2.0, 6.0, 1.0, 4.0];
        let segmentation = zero_crossings(&[0.0; 6], &dx).unwrap();
        assert_eq!(segmentation.events.up, vec![0]);
        assert!(segmentation.events.down.is_empty());
    }

    #[test]
    fn test_bump_and_reverse_is_collapsed() {
        // inhale at 1, exhale at 10, a short bump up at 12 retracts the exhale,
        // the following fall is then accepted as the exhale
        let mut dx = vec![0.0; 25];
        dx[1] = 5.0;
        dx[10] = -5.0;
        dx[12] = 5.0;
        dx[14] = -5.0;
        let segmentation = zero_crossings(&vec![0.0; 25], &dx).unwrap();
        assert_eq!(segmentation.events.up, vec![1]);
        assert_eq!(segmentation.events.down, vec![14]);
    }

    #[test]
    fn test_period_estimate() {
        let mut dx = vec![0.0; 40];
        for &i in &[0, 10, 20] {
            dx[i] = 5.0;
        }
        for &i in &[5, 15, 25] {
            dx[i] = -5.0;
        }
        let segmentation = zero_crossings(&vec![0.0; 40], &dx).unwrap();
        assert_eq!(segmentation.events.up, vec![0, 10, 20]);
        assert_eq!(segmentation.events.down, vec![5, 15, 25]);
        // before the second down crossing the down period defaults to 50
        assert_eq!(segmentation.duration[12], (10 + 50) as f64 / 2.0);
        assert_eq!(segmentation.duration[16], 10.0);
        // the cycle in progress dominates once it is longer than the last one
        assert_eq!(segmentation.duration[39], ((39 - 20) + (39 - 25)) as f64 / 2.0);
    }

    #[test]
    fn test_envelope_reset_and_relaxation() {
        let mut dx = vec![0.0; 22];
        dx[1] = 10.0;
        dx[7] = -7.0;
        dx[13] = 4.0;
        dx[19] = -4.0;
        let x = [
            0.0, 2.0, 5.0, 8.0, 10.0, 10.0, 10.0, 9.0, 7.0, 5.0, 3.0, 2.0, 2.0, 2.0, 3.0, 5.0,
            6.0, 6.0, 6.0, 5.0, 4.0, 3.0,
        ];
        let s = zero_crossings(&x, &dx).unwrap();
        assert_eq!(s.events.up, vec![1, 13]);
        assert_eq!(s.events.down, vec![7, 19]);
        let close = |a: f64, b: f64| (a - b).abs() < 1e-9;

        // down at 7: the slow signal minimum leaks toward the new fast minimum of 10
        assert!(close(s.x_min[7], 0.1), "x_min[7] = {}", s.x_min[7]);
        assert!(close(s.dx_min[7], -7.0));
        assert!(close(s.dx_max[7], 10.0));

        // up at 13: the slow derivative maximum restarts from the previous peak of 10
        // and relaxes toward the new fast maximum of 4
        assert!(close(s.dx_max[13], 9.7), "dx_max[13] = {}", s.dx_max[13]);
        assert!(close(s.dx_max[14], 9.415), "dx_max[14] = {}", s.dx_max[14]);
        assert!(close(s.dx_min[13], -7.0));
        assert!(close(s.dx_delta[13], 16.7));
        assert!(close(s.x_min[13], 2.0));
        assert!(close(s.x_max[13], 9.92), "x_max[13] = {}", s.x_max[13]);
        assert!(close(s.x_max[14], 9.8508), "x_max[14] = {}", s.x_max[14]);

        // down at 19: the slow derivative minimum restarts from the previous trough of -7
        // while the slow maximum drops to it, leaving the fast maximum of 4
        assert!(close(s.dx_min[19], -6.85), "dx_min[19] = {}", s.dx_min[19]);
        assert!(close(s.dx_min[20], -6.7075), "dx_min[20] = {}", s.dx_min[20]);
        assert!(close(s.dx_max[19], 4.0));
        assert!(close(s.x_max[19], 6.0));
    }

    #[test]
    fn test_envelope_tracks_signal_range() {
        let x: Vec<f64> = (0..200)
            .map(|i| 10.0 * (i as f64 * std::f64::consts::TAU / 40.0).sin())
            .collect();
        let dx: Vec<f64> = (0..200)
            .map(|i| 15.7 * (i as f64 * std::f64::consts::TAU / 40.0).cos())
            .collect();
        let segmentation = zero_crossings(&x, &dx).unwrap();
        assert!(segmentation.events.up.len() >= 4);
        assert!(segmentation.events.down.len() >= 4);
        let last = segmentation.len() - 1;
        assert!(segmentation.x_delta[last] > 15.0 && segmentation.x_delta[last] < 25.0);
        assert!((segmentation.duration[last] - 40.0).abs() <= 2.0);
    }

    #[test]
    fn test_noisy_signal_invariants() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let x: Vec<f64> = (0..600)
            .map(|i| 20.0 * (i as f64 * 0.16).sin() + rng.gen_range(-3.0..3.0))
            .collect();
        let dx: Vec<f64> = x.windows(2).map(|w| (w[1] - w[0]) / 0.1).collect();
        let x = &x[1..];
        let segmentation = zero_crossings(x, &dx).unwrap();
        assert!(is_strictly_increasing(&segmentation.events.up));
        assert!(is_strictly_increasing(&segmentation.events.down));
        for i in 0..segmentation.len() {
            assert!(segmentation.x_delta[i] >= 0.0);
            assert!(segmentation.dx_delta[i] >= 0.0);
            assert!(segmentation.x_min[i] <= segmentation.x_max[i]);
            assert!(segmentation.duration[i] > 0.0);
        }
    }

    #[test]
    fn test_custom_thresholds() {
        let thresholds = CrossingThresholds {
            rise: 4.0,
            fall: -5.0,
            debounce: 5,
            spike: 8.0,
        };
        let dx = [0.0, 3.5, 4.5, 0.0, -4.5, 0.0];
        let segmentation = zero_crossings_with(&[0.0; 6], &dx, thresholds).unwrap();
        assert_eq!(segmentation.events.up, vec![2]);
        assert!(segmentation.events.down.is_empty());
        let inverted = CrossingThresholds {
            rise: -1.0,
            fall: 1.0,
            ..thresholds
        };
        assert!(ZeroCrossingDetector::with_thresholds(inverted).is_err());
    }

    #[test]
    fn test_degenerate_inputs() {
        let segmentation = zero_crossings(&[], &[]).unwrap();
        assert!(segmentation.is_empty());
        assert!(segmentation.events.up.is_empty());
        let single = zero_crossings(&[1.0], &[0.0]).unwrap();
        assert_eq!(single.len(), 1);
        assert!(single.events.down.is_empty());
        assert!(zero_crossings(&[1.0, 2.0], &[0.0]).is_err());
    }

    #[test]
    fn test_step_matches_batch() {
        let x: Vec<f64> = (0..80).map(|i| (i as f64 * 0.3).sin() * 8.0).collect();
        let dx: Vec<f64> = (0..80).map(|i| (i as f64 * 0.3).cos() * 24.0).collect();
        let segmentation = zero_crossings(&x, &dx).unwrap();
        let mut detector = ZeroCrossingDetector::new();
        for i in 0..x.len() {
            let step = detector.process(x[i], dx[i]);
            assert_eq!(step.metrics.x_delta, segmentation.x_delta[i]);
            assert_eq!(step.metrics.dx_max, segmentation.dx_max[i]);
        }
        assert_eq!(detector.len(), x.len());
        assert_eq!(detector.events(), &segmentation.events);
    }
}
