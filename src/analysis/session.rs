//! Per-sample breath analysis for live sensors.
//!
//! `BreathSession` owns every piece of running state (filter delay lines, centering, envelope
//! trackers and crossing history) and is fed one position sample at a time. For the same
//! configuration and input it produces the same filtered signal, derivative and crossings as
//! `BreathPipeline::analyze`, including the smoothed amplitude and duration metrics. Only the
//! centering differs, ramping its pole up from a fast initial value so the offset after a
//! restart is removed quickly.

use anyhow::Result;

use super::crossings::{Crossing, CrossingEvents, CycleMetrics, ZeroCrossingDetector};
use super::pipeline::PipelineConfig;
use crate::preprocessing::center::AdaptiveCentering;
use crate::preprocessing::derivative::StreamingDerivative;
use crate::preprocessing::filter::{FilterDescriptor, StreamingFilter};

/// Low-passed amplitude and duration of one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothedSample {
    pub x_delta: f64,
    pub dx_delta: f64,
    pub duration: f64,
}

/// Everything computed for one incoming sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionStep {
    pub filtered: f64,
    pub derivative: f64,
    pub centered: f64,
    pub crossing: Option<Crossing>,
    pub metrics: CycleMetrics,
    /// Present when the configuration has a smoothing filter.
    pub smoothed: Option<SmoothedSample>,
}

#[derive(Debug, Clone)]
struct MetricSmoothing {
    x_delta: StreamingFilter,
    dx_delta: StreamingFilter,
    duration: StreamingFilter,
}

impl MetricSmoothing {
    fn new(filter: &FilterDescriptor) -> Result<Self> {
        Ok(Self {
            x_delta: StreamingFilter::new(filter)?,
            dx_delta: StreamingFilter::new(filter)?,
            duration: StreamingFilter::new(filter)?,
        })
    }

    fn prime(&mut self, metrics: &CycleMetrics) {
        self.x_delta.prime(metrics.x_delta);
        self.dx_delta.prime(metrics.dx_delta);
        self.duration.prime(metrics.duration);
    }

    fn process(&mut self, metrics: &CycleMetrics) -> SmoothedSample {
        SmoothedSample {
            x_delta: self.x_delta.process(metrics.x_delta),
            dx_delta: self.dx_delta.process(metrics.dx_delta),
            duration: self.duration.process(metrics.duration),
        }
    }
}

/// Streaming breath analysis session.
#[derive(Debug, Clone)]
pub struct BreathSession {
    lowpass: StreamingFilter,
    derivative: StreamingDerivative,
    centering: AdaptiveCentering,
    detector: ZeroCrossingDetector,
    smoothing: Option<MetricSmoothing>,
}

impl BreathSession {
    /// Creates a session from a pipeline configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            lowpass: StreamingFilter::new(&config.lowpass)?,
            derivative: StreamingDerivative::new(config.derivative_order, config.dt)?,
            centering: AdaptiveCentering::new(
                config.centering_initial_alpha,
                config.centering_alpha,
            )?,
            detector: ZeroCrossingDetector::with_thresholds(config.thresholds)?,
            smoothing: config
                .smoothing
                .as_ref()
                .map(MetricSmoothing::new)
                .transpose()?,
        })
    }

    /// Processes one position sample.
    ///
    /// The first sample primes the low-pass, the derivative and the metric smoothing so none
    /// of them starts with a transient.
    pub fn push(&mut self, sample: f64) -> SessionStep {
        let first = self.detector.is_empty();
        if first {
            self.lowpass.prime(sample);
        }
        let filtered = self.lowpass.process(sample);
        if first {
            self.derivative.prime(filtered);
        }
        let derivative = self.derivative.process(filtered);
        let centered = self.centering.process(filtered);
        let step = self.detector.process(filtered, derivative);
        let smoothed = self.smoothing.as_mut().map(|smoothing| {
            if first {
                smoothing.prime(&step.metrics);
            }
            smoothing.process(&step.metrics)
        });
        SessionStep {
            filtered,
            derivative,
            centered,
            crossing: step.crossing,
            metrics: step.metrics,
            smoothed,
        }
    }

    /// Number of samples processed.
    pub fn len(&self) -> usize {
        self.detector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detector.is_empty()
    }

    pub fn events(&self) -> &CrossingEvents {
        self.detector.events()
    }
}
