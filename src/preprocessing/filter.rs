//! Recursive (IIR) filter application with zero-transient initialization.
//!
//! Filters are described by their numerator and denominator coefficients
//! (`b` and `a`), already designed elsewhere. This module only applies them:
//!
//! - `FilterDescriptor`: the coefficient pair plus validation, steady-state computation and a
//!   read-only `FilterReport` for display.
//! - `StreamingFilter`: a transposed direct form II delay line processing one sample at a time.
//! - `apply` / `apply_zeroed`: batch application over a slice, with the delay line primed by the
//!   first sample or left at zero.
//! - `SignalFilter` trait and `FilterStrategy` enum: the seam used by the pipeline to swap in
//!   custom filters.
//!
//! # Example
//!
//! ```rust
//! use breath_algos::preprocessing::filter::{apply, FilterDescriptor};
//!
//! let lowpass = FilterDescriptor::breath_lowpass();
//! let signal = vec![12.0; 16];
//! let filtered = apply(&signal, &lowpass).unwrap();
//! // primed with the first sample, a constant input passes without a startup transient
//! assert!(filtered.iter().all(|y| (y - 12.0).abs() < 1e-6));
//! ```

use anyhow::anyhow;
use anyhow::Result;
use nalgebra::{DMatrix, DVector};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A linear recursive filter given by its transfer function coefficients.
///
/// `denominator[0]` is conventionally 1; other leading values are normalized away when the
/// filter is applied. Both sequences must be non-empty and finite, and the denominator must
/// have a non-zero leading coefficient. The fields are public so that descriptors can be built
/// from configuration; validation happens every time the filter is applied.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct FilterDescriptor {
    pub numerator: Vec<f64>,
    pub denominator: Vec<f64>,
}

/// Display view of a filter: order, coefficients and the unit-step steady state.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct FilterReport {
    pub order: usize,
    pub numerator: Vec<f64>,
    pub denominator: Vec<f64>,
    pub steady_state: Vec<f64>,
}

impl FilterDescriptor {
    /// Creates a validated filter descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if either coefficient sequence is empty, contains non-finite values,
    /// or if the denominator is all zero or has a zero leading coefficient.
    pub fn new(numerator: Vec<f64>, denominator: Vec<f64>) -> Result<Self> {
        let filter = Self {
            numerator,
            denominator,
        };
        filter.validate()?;
        Ok(filter)
    }

    /// Creates a numerator-only (FIR) filter, the denominator being the identity `[1]`.
    pub fn fir(kernel: Vec<f64>) -> Result<Self> {
        Self::new(kernel, vec![1.0])
    }

    /// 3rd order Butterworth low-pass at 0.3 of the Nyquist rate.
    ///
    /// Removes the high frequency wiggle of the position signal before differentiation.
    pub fn breath_lowpass() -> Self {
        let gain = 4.95329964e-2;
        Self {
            numerator: vec![gain, 3.0 * gain, 3.0 * gain, gain],
            denominator: vec![1.0, -1.16191748, 6.95942756e-1, -1.37761301e-1],
        }
    }

    /// 2nd order Butterworth low-pass at 0.03 of the Nyquist rate.
    ///
    /// Used to smooth slowly varying cycle metrics such as the peak-to-peak amplitude.
    pub fn envelope_smoothing() -> Self {
        let gain = 2.08056714e-3;
        Self {
            numerator: vec![gain, 2.0 * gain, gain],
            denominator: vec![1.0, -1.86689228, 8.75214548e-1],
        }
    }

    /// Checks that the descriptor can be applied.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first malformed coefficient sequence found.
    pub fn validate(&self) -> Result<()> {
        if self.numerator.is_empty() {
            return Err(anyhow!("Filter numerator must not be empty"));
        }
        if self.denominator.is_empty() {
            return Err(anyhow!("Filter denominator must not be empty"));
        }
        if self
            .numerator
            .iter()
            .chain(self.denominator.iter())
            .any(|c| !c.is_finite())
        {
            return Err(anyhow!("Filter coefficients must be finite"));
        }
        if self.denominator.iter().all(|&c| c == 0.0) {
            return Err(anyhow!("Filter denominator must not be all zero"));
        }
        if self.denominator[0] == 0.0 {
            return Err(anyhow!(
                "Leading denominator coefficient must be non-zero"
            ));
        }
        Ok(())
    }

    /// Filter order, `max(len(numerator), len(denominator)) - 1`.
    pub fn order(&self) -> usize {
        self.numerator.len().max(self.denominator.len()).max(1) - 1
    }

    /// Coefficients divided by `denominator[0]` and zero padded to a common length.
    fn normalized(&self) -> Result<(Vec<f64>, Vec<f64>)> {
        self.validate()?;
        let n = self.order() + 1;
        let a0 = self.denominator[0];
        let pad = |coeffs: &[f64]| -> Vec<f64> {
            (0..n)
                .map(|i| coeffs.get(i).map_or(0.0, |c| c / a0))
                .collect()
        };
        Ok((pad(&self.numerator), pad(&self.denominator)))
    }

    /// Computes the delay-line state of the filter after settling on a unit step.
    ///
    /// Scaling this state by a value `v` yields the state of a filter that has seen the
    /// constant input `v` forever, which is what removes the startup transient. The state has
    /// `order()` entries and is obtained by solving `(I - A^T) zi = b[1..] - a[1..] * b[0]`,
    /// with `A` the companion matrix of the denominator.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor is malformed, or if the steady state is undefined
    /// because the filter has a pole at `z = 1`.
    pub fn steady_state(&self) -> Result<Vec<f64>> {
        let (b, a) = self.normalized()?;
        let m = b.len() - 1;
        if m == 0 {
            return Ok(Vec::new());
        }
        let i_minus_a = DMatrix::from_fn(m, m, |i, j| {
            let mut value = if i == j { 1.0 } else { 0.0 };
            if j == 0 {
                value += a[i + 1];
            }
            if j == i + 1 {
                value -= 1.0;
            }
            value
        });
        let rhs = DVector::from_fn(m, |i, _| b[i + 1] - a[i + 1] * b[0]);
        let zi = i_minus_a.lu().solve(&rhs).ok_or_else(|| {
            anyhow!("Filter steady state is undefined: the filter has a pole at z = 1")
        })?;
        if zi.iter().any(|z| !z.is_finite()) {
            return Err(anyhow!("Filter steady state is not finite"));
        }
        Ok(zi.data.into())
    }

    /// Read-only summary of the filter for reporting collaborators.
    pub fn report(&self) -> Result<FilterReport> {
        Ok(FilterReport {
            order: self.order(),
            numerator: self.numerator.clone(),
            denominator: self.denominator.clone(),
            steady_state: self.steady_state()?,
        })
    }
}

/// A recursive filter processing one sample at a time.
///
/// Owns its delay line; two signals must never share one instance.
#[derive(Debug, Clone)]
pub struct StreamingFilter {
    b: Vec<f64>,
    a: Vec<f64>,
    steady: Vec<f64>,
    state: Vec<f64>,
}

impl StreamingFilter {
    /// Creates a filter with a zeroed delay line.
    ///
    /// # Errors
    ///
    /// Fails if the descriptor is malformed or has no defined steady state.
    pub fn new(filter: &FilterDescriptor) -> Result<Self> {
        let (b, a) = filter.normalized()?;
        let steady = filter.steady_state()?;
        let state = vec![0.0; steady.len()];
        Ok(Self {
            b,
            a,
            steady,
            state,
        })
    }

    /// Sets the delay line to the steady state for a constant input of `value`.
    pub fn prime(&mut self, value: f64) {
        for (state, steady) in self.state.iter_mut().zip(&self.steady) {
            *state = steady * value;
        }
    }

    /// Clears the delay line.
    pub fn reset(&mut self) {
        self.state.iter_mut().for_each(|s| *s = 0.0);
    }

    pub fn state(&self) -> &[f64] {
        &self.state
    }

    /// Feeds one sample through the filter and returns the output sample.
    pub fn process(&mut self, input: f64) -> f64 {
        let output = self.b[0] * input + self.state.first().copied().unwrap_or(0.0);
        let m = self.state.len();
        for k in 0..m {
            let next = if k + 1 < m { self.state[k + 1] } else { 0.0 };
            self.state[k] = self.b[k + 1] * input + next - self.a[k + 1] * output;
        }
        output
    }
}

/// Applies a recursive filter to a signal without a startup transient.
///
/// The delay line is initialized to the filter's unit-step steady state scaled by `signal[0]`,
/// so for a filter with unity DC gain the first output equals the first input.
///
/// # Arguments
///
/// * `signal` - The samples to filter.
/// * `filter` - The filter coefficients.
///
/// # Returns
///
/// The filtered signal, same length as the input. An empty input yields an empty output.
///
/// # Errors
///
/// Returns an error if the filter descriptor is malformed or has no defined steady state.
/// Stability is not checked: an unstable filter silently diverges.
pub fn apply(signal: &[f64], filter: &FilterDescriptor) -> Result<Vec<f64>> {
    let mut stream = StreamingFilter::new(filter)?;
    let Some(&first) = signal.first() else {
        return Ok(Vec::new());
    };
    stream.prime(first);
    Ok(signal.iter().map(|&x| stream.process(x)).collect())
}

/// Applies a recursive filter starting from a zeroed delay line.
pub fn apply_zeroed(signal: &[f64], filter: &FilterDescriptor) -> Result<Vec<f64>> {
    let mut stream = StreamingFilter::new(filter)?;
    Ok(signal.iter().map(|&x| stream.process(x)).collect())
}

/// A filter applied to a whole signal at once.
#[cfg_attr(test, mockall::automock)]
pub trait SignalFilter {
    /// Filters `signal`, returning a sequence of the same length.
    fn filter(&self, signal: &[f64]) -> Result<Vec<f64>>;
}

impl SignalFilter for FilterDescriptor {
    fn filter(&self, signal: &[f64]) -> Result<Vec<f64>> {
        apply(signal, self)
    }
}

/// Available filter strategies for pipeline stages.
/// User provided filters can be passed via the `Custom` variant.
pub enum FilterStrategy {
    /// Zero-transient IIR filter given by its coefficients.
    Iir(FilterDescriptor),
    /// A custom filter implementing `SignalFilter`. It must be `Sync` and `Send` so that
    /// pipelines can analyse independent recordings in parallel.
    Custom(Box<dyn SignalFilter + Sync + Send>),
}

impl SignalFilter for FilterStrategy {
    fn filter(&self, signal: &[f64]) -> Result<Vec<f64>> {
        match self {
            FilterStrategy::Iir(descriptor) => descriptor.filter(signal),
            FilterStrategy::Custom(filter) => filter.filter(signal),
        }
    }
}
