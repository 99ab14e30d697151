//! End-to-end breath analysis of a stored signal.
//!
//! The pipeline chains the preprocessing and analysis stages:
//!
//! 1. **Low-pass**: removes sensor wiggle, zero-transient so the DC-biased signal starts clean.
//! 2. **Derivative**: finite-difference rate of change of the filtered position.
//! 3. **Segmentation**: hysteresis zero crossings plus per-sample envelopes and cycle duration.
//! 4. **Centering**: drift removal of the filtered position.
//! 5. **Smoothing** (optional): low-pass of the amplitude and duration metrics.
//!
//! # Example
//!
//! ```rust
//! use breath_algos::analysis::pipeline::{BreathPipeline, PipelineConfig};
//!
//! let signal: Vec<f64> = (0..300)
//!     .map(|i| 30.0 * (i as f64 * std::f64::consts::TAU / 40.0).sin())
//!     .collect();
//! let pipeline = BreathPipeline::new(PipelineConfig::default()).unwrap();
//! let analysis = pipeline.analyze(&signal).unwrap();
//! assert!(analysis.segmentation.events.up.len() >= 6);
//! ```

use anyhow::anyhow;
use anyhow::Result;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::crossings::{zero_crossings_with, CrossingThresholds, Segmentation};
use super::delay::{event_delays, DelayReport};
use crate::preprocessing::center::{center, AdaptiveCentering};
use crate::preprocessing::derivative::{derivative, kernel};
use crate::preprocessing::filter::{apply, FilterDescriptor, FilterStrategy, SignalFilter};

/// Parameters of the breath analysis.
///
/// The defaults are the values tuned for the breath sensor sampled every 100 ms.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Sampling interval.
    pub dt: f64,
    /// Low-pass filter applied to the position before differentiation.
    pub lowpass: FilterDescriptor,
    /// Accuracy order of the finite-difference derivative, `1..=6`.
    pub derivative_order: usize,
    /// Pole of the centering filter.
    pub centering_alpha: f64,
    /// Starting pole of the adaptive centering used by streaming sessions.
    pub centering_initial_alpha: f64,
    /// Filter smoothing the amplitude and duration metrics, if any.
    pub smoothing: Option<FilterDescriptor>,
    pub thresholds: CrossingThresholds,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dt: 0.1,
            lowpass: FilterDescriptor::breath_lowpass(),
            derivative_order: 4,
            centering_alpha: 0.995,
            centering_initial_alpha: 0.8,
            smoothing: Some(FilterDescriptor::envelope_smoothing()),
            thresholds: CrossingThresholds::default(),
        }
    }
}

impl PipelineConfig {
    /// Checks every parameter before anything is computed.
    ///
    /// # Errors
    ///
    /// Returns the first invalid parameter found.
    pub fn validate(&self) -> Result<()> {
        if !self.dt.is_finite() || self.dt <= 0.0 {
            return Err(anyhow!(
                "Sampling interval must be positive and finite, got {}",
                self.dt
            ));
        }
        self.lowpass.steady_state()?;
        kernel(self.derivative_order)?;
        AdaptiveCentering::new(self.centering_initial_alpha, self.centering_alpha)?;
        if let Some(smoothing) = &self.smoothing {
            smoothing.steady_state()?;
        }
        self.thresholds.validate()
    }
}

/// Low-passed amplitude and duration metrics.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmoothedMetrics {
    pub x_delta: Vec<f64>,
    pub dx_delta: Vec<f64>,
    pub duration: Vec<f64>,
}

/// All intermediate and final sequences of one analysis, for inspection and plotting.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BreathAnalysis {
    pub filtered: Vec<f64>,
    pub derivative: Vec<f64>,
    pub centered: Vec<f64>,
    pub segmentation: Segmentation,
    pub smoothed: Option<SmoothedMetrics>,
}

/// Batch breath analysis with a validated configuration.
pub struct BreathPipeline {
    config: PipelineConfig,
    lowpass: FilterStrategy,
}

impl BreathPipeline {
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let lowpass = FilterStrategy::Iir(config.lowpass.clone());
        Ok(Self { config, lowpass })
    }

    /// Replaces the low-pass stage, e.g. with a custom filter.
    pub fn with_lowpass(mut self, lowpass: FilterStrategy) -> Self {
        self.lowpass = lowpass;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the full pipeline on one uniformly sampled signal.
    ///
    /// # Errors
    ///
    /// Returns an error if a stage fails, or if a custom low-pass changes the signal length.
    pub fn analyze(&self, signal: &[f64]) -> Result<BreathAnalysis> {
        let filtered = self.lowpass.filter(signal)?;
        if filtered.len() != signal.len() {
            return Err(anyhow!(
                "Low-pass stage returned {} samples for {} inputs",
                filtered.len(),
                signal.len()
            ));
        }
        let derivative = derivative(&filtered, self.config.derivative_order, self.config.dt)?;
        let segmentation = zero_crossings_with(&filtered, &derivative, self.config.thresholds)?;
        let centered = center(&filtered, self.config.centering_alpha)?;
        let smoothed = match &self.config.smoothing {
            Some(smoothing) => Some(SmoothedMetrics {
                x_delta: apply(&segmentation.x_delta, smoothing)?,
                dx_delta: apply(&segmentation.dx_delta, smoothing)?,
                duration: apply(&segmentation.duration, smoothing)?,
            }),
            None => None,
        };
        debug!(
            samples = signal.len(),
            up = segmentation.events.up.len(),
            down = segmentation.events.down.len(),
            "analyzed breath signal"
        );
        Ok(BreathAnalysis {
            filtered,
            derivative,
            centered,
            segmentation,
            smoothed,
        })
    }

    /// Segments the raw signal with a first-order derivative and no low-pass.
    ///
    /// This is the fastest possible detector, used as the latency reference.
    pub fn raw_crossings(&self, signal: &[f64]) -> Result<Segmentation> {
        let derivative = derivative(signal, 1, self.config.dt)?;
        zero_crossings_with(signal, &derivative, self.config.thresholds)
    }

    /// Delay of the filtered detector behind the raw one.
    ///
    /// # Errors
    ///
    /// Besides stage failures, fails when a filtered crossing has no raw crossing of the
    /// same direction at or before it.
    pub fn latency(&self, signal: &[f64]) -> Result<DelayReport> {
        let raw = self.raw_crossings(signal)?;
        let analysis = self.analyze(signal)?;
        event_delays(&raw.events, &analysis.segmentation.events)
    }

    /// Analyzes independent signals in parallel, each with fresh state.
    pub fn analyze_batch<S>(&self, signals: &[S]) -> Result<Vec<BreathAnalysis>>
    where
        S: AsRef<[f64]> + Sync,
    {
        signals
            .par_iter()
            .map(|signal| self.analyze(signal.as_ref()))
            .collect()
    }
}
