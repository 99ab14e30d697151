//! Breath-cycle analysis for respiration position sensors
//!
//! This crate conditions a noisy, DC-biased breath position signal and segments it into
//! inhale/exhale cycles. It provides zero-transient recursive filtering, finite-difference
//! differentiation and a hysteresis zero-crossing detector with adaptive envelopes.

pub mod analysis;
pub mod preprocessing;
