//! Drift removal with a first-order high-pass filter.
//!
//! `y[n] = x[n] - x[n-1] + alpha * y[n-1]`, starting from a zero state so the initial offset
//! of the signal is removed rather than preserved.

use anyhow::anyhow;
use anyhow::Result;

use super::filter::{apply_zeroed, FilterDescriptor};

fn check_alpha(alpha: f64) -> Result<()> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(anyhow!(
            "Centering alpha must be in the open interval (0, 1), got {}",
            alpha
        ));
    }
    Ok(())
}

/// The centering filter `[1, -1] / [1, -alpha]`.
pub fn centering_filter(alpha: f64) -> Result<FilterDescriptor> {
    check_alpha(alpha)?;
    FilterDescriptor::new(vec![1.0, -1.0], vec![1.0, -alpha])
}

/// Removes slow drift and DC bias from a signal.
///
/// # Arguments
///
/// * `signal` - The samples to center.
/// * `alpha` - Pole of the filter in `(0, 1)`. Values close to 1 only track out very slow drift.
///
/// # Errors
///
/// Returns an error if `alpha` is outside `(0, 1)`.
pub fn center(signal: &[f64], alpha: f64) -> Result<Vec<f64>> {
    apply_zeroed(signal, &centering_filter(alpha)?)
}

/// Streaming centering filter whose pole ramps from a fast initial value to the target.
///
/// After each sample `alpha <- 0.8 * alpha + 0.2 * target`, so the offset left after a reset is
/// removed within a few samples while the settled filter only tracks slow drift.
#[derive(Debug, Clone)]
pub struct AdaptiveCentering {
    alpha: f64,
    initial: f64,
    target: f64,
    prev_input: f64,
    prev_output: f64,
}

impl AdaptiveCentering {
    const RAMP: f64 = 0.8;

    /// # Errors
    ///
    /// Returns an error if either pole is outside `(0, 1)`.
    pub fn new(initial: f64, target: f64) -> Result<Self> {
        check_alpha(initial)?;
        check_alpha(target)?;
        Ok(Self {
            alpha: initial,
            initial,
            target,
            prev_input: 0.0,
            prev_output: 0.0,
        })
    }

    /// Current pole of the filter.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Zeroes the filter state and restarts the pole ramp.
    pub fn reset(&mut self) {
        self.alpha = self.initial;
        self.prev_input = 0.0;
        self.prev_output = 0.0;
    }

    pub fn process(&mut self, input: f64) -> f64 {
        let output = input - self.prev_input + self.alpha * self.prev_output;
        self.prev_input = input;
        self.prev_output = output;
        self.alpha = Self::RAMP * self.alpha + (1.0 - Self::RAMP) * self.target;
        output
    }
}
