//! Numeric differentiation with backward finite-difference kernels.
//!
//! The kernels are numerator-only filters of accuracy order 1 to 6. Higher orders give a
//! smoother estimate at the cost of a longer lag. They are applied with the same
//! zero-transient initialization as any other filter, so a signal starting at rest yields a
//! derivative starting at zero.

use anyhow::anyhow;
use anyhow::Result;

use super::filter::{apply, FilterDescriptor, StreamingFilter};

/// Backward finite-difference coefficients, indexed by accuracy order - 1.
const FINITE_DIFFERENCES: [&[f64]; 6] = [
    &[1.0, -1.0],
    &[3.0 / 2.0, -2.0, 1.0 / 2.0],
    &[11.0 / 6.0, -3.0, 3.0 / 2.0, -1.0 / 3.0],
    &[25.0 / 12.0, -4.0, 3.0, -4.0 / 3.0, 1.0 / 4.0],
    &[137.0 / 60.0, -5.0, 5.0, -10.0 / 3.0, 5.0 / 4.0, -1.0 / 5.0],
    &[
        49.0 / 20.0,
        -6.0,
        15.0 / 2.0,
        -20.0 / 3.0,
        15.0 / 4.0,
        -6.0 / 5.0,
        1.0 / 6.0,
    ],
];

/// Highest supported accuracy order.
pub const MAX_ORDER: usize = FINITE_DIFFERENCES.len();

/// Returns the finite-difference kernel for an accuracy order in `1..=6`.
///
/// # Errors
///
/// Returns an error for any other order.
pub fn kernel(order: usize) -> Result<&'static [f64]> {
    order
        .checked_sub(1)
        .and_then(|idx| FINITE_DIFFERENCES.get(idx).copied())
        .ok_or_else(|| {
            anyhow!(
                "Derivative order must be between 1 and {}, got {}",
                MAX_ORDER,
                order
            )
        })
}

/// The kernel for `order` as a filter descriptor.
pub fn kernel_filter(order: usize) -> Result<FilterDescriptor> {
    FilterDescriptor::fir(kernel(order)?.to_vec())
}

fn check_dt(dt: f64) -> Result<()> {
    if !dt.is_finite() || dt <= 0.0 {
        return Err(anyhow!(
            "Sampling interval must be positive and finite, got {}",
            dt
        ));
    }
    Ok(())
}

/// Computes the rate of change of a uniformly sampled signal.
///
/// # Arguments
///
/// * `signal` - The samples to differentiate.
/// * `order` - Accuracy order of the finite-difference kernel, `1..=6`.
/// * `dt` - Sampling interval.
///
/// # Returns
///
/// The derivative, same length as the input.
///
/// # Errors
///
/// Returns an error if `order` is out of range or `dt` is not a positive finite number.
///
/// # Examples
///
/// ```
/// use breath_algos::preprocessing::derivative::derivative;
/// let ramp: Vec<f64> = (0..10).map(|i| 0.5 * i as f64).collect();
/// let slope = derivative(&ramp, 1, 0.1).unwrap();
/// assert!((slope[5] - 5.0).abs() < 1e-9);
/// ```
pub fn derivative(signal: &[f64], order: usize, dt: f64) -> Result<Vec<f64>> {
    check_dt(dt)?;
    let filtered = apply(signal, &kernel_filter(order)?)?;
    Ok(filtered.into_iter().map(|d| d / dt).collect())
}

/// Per-sample differentiator, primed like `derivative` on the first value it is given.
#[derive(Debug, Clone)]
pub struct StreamingDerivative {
    filter: StreamingFilter,
    dt: f64,
}

impl StreamingDerivative {
    pub fn new(order: usize, dt: f64) -> Result<Self> {
        check_dt(dt)?;
        Ok(Self {
            filter: StreamingFilter::new(&kernel_filter(order)?)?,
            dt,
        })
    }

    /// Sets the kernel history as if `value` had been constant forever.
    pub fn prime(&mut self, value: f64) {
        self.filter.prime(value);
    }

    pub fn process(&mut self, value: f64) -> f64 {
        self.filter.process(value) / self.dt
    }
}
