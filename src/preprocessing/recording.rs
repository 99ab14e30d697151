//! Ingest of timestamped sensor readings.
//!
//! The breath sensor delivers `(timestamp, position)` pairs at a nominal period. `Recording`
//! prepares them for the uniform-sample pipeline, and `resample` interpolates irregular readings
//! onto an exact grid the way the sensor firmware does between polls.

use anyhow::anyhow;
use anyhow::Result;
use tracing::warn;

/// Raw ADC readings the sensor reports on false contact.
pub const FALSE_CONTACT_READINGS: [f64; 2] = [0.0, 1023.0];

/// Largest gap between two readings, in grid periods, that `resample` fills.
pub const MAX_GAP_PERIODS: f64 = 1000.0;

/// Whether a raw reading comes from a false contact of the sensor.
pub fn is_false_contact(raw: f64) -> bool {
    FALSE_CONTACT_READINGS.contains(&raw)
}

/// A recording of position readings with their timestamps.
///
/// Positions are offset so that the first reading is zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recording {
    times: Vec<f64>,
    positions: Vec<f64>,
}

impl Recording {
    /// Builds a recording from raw `(timestamp, position)` records.
    ///
    /// The last record is dropped, as the logger writes an incomplete final row.
    ///
    /// # Examples
    ///
    /// ```
    /// use breath_algos::preprocessing::recording::Recording;
    /// let records = [(0.0, 512.0), (0.1, 515.0), (0.2, 509.0), (0.3, 0.0)];
    /// let recording = Recording::from_records(&records);
    /// assert_eq!(recording.positions(), &[0.0, 3.0, -3.0]);
    /// ```
    pub fn from_records(records: &[(f64, f64)]) -> Self {
        Self::from_records_rejecting(records, |_| false)
    }

    /// Builds a recording, replacing rejected raw positions with the last accepted one.
    ///
    /// Rejected readings before the first accepted one are dropped. The offset is taken from
    /// the first accepted reading.
    ///
    /// # Examples
    ///
    /// ```
    /// use breath_algos::preprocessing::recording::{is_false_contact, Recording};
    /// let records = [(0.0, 1023.0), (0.1, 512.0), (0.2, 0.0), (0.3, 509.0), (0.4, 0.0)];
    /// let recording = Recording::from_records_rejecting(&records, is_false_contact);
    /// assert_eq!(recording.times(), &[0.1, 0.2, 0.3]);
    /// assert_eq!(recording.positions(), &[0.0, 0.0, -3.0]);
    /// ```
    pub fn from_records_rejecting<F>(records: &[(f64, f64)], reject: F) -> Self
    where
        F: Fn(f64) -> bool,
    {
        let complete = &records[..records.len().saturating_sub(1)];
        let mut held: Option<f64> = None;
        let mut raw = Vec::with_capacity(complete.len());
        for &(t, x) in complete {
            if !reject(x) {
                held = Some(x);
            }
            if let Some(x) = held {
                raw.push((t, x));
            }
        }
        let offset = raw.first().map_or(0.0, |&(_, x)| x);
        let (times, positions) = raw.into_iter().map(|(t, x)| (t, x - offset)).unzip();
        Self { times, positions }
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Differences between successive timestamps, to report sampling jitter.
    pub fn intervals(&self) -> Vec<f64> {
        self.times.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Positions interpolated onto a uniform grid of the given period.
    pub fn resampled(&self, period: f64) -> Result<Vec<f64>> {
        resample(&self.times, &self.positions, period)
    }
}

/// Linearly interpolates readings onto the grid `t_0 + k * period`.
///
/// # Arguments
///
/// * `times` - Reading timestamps, expected to be increasing.
/// * `values` - Reading values.
/// * `period` - Grid spacing.
///
/// # Returns
///
/// One value per grid point from the first reading up to the last one. Readings whose
/// timestamp is not finite or does not increase are skipped with a warning.
///
/// # Errors
///
/// Returns an error if the slices have different lengths, if `period` is not positive and
/// finite, or if two successive readings are more than `MAX_GAP_PERIODS` periods apart.
pub fn resample(times: &[f64], values: &[f64], period: f64) -> Result<Vec<f64>> {
    if times.len() != values.len() {
        return Err(anyhow!("Timestamps and values must have the same length."));
    }
    if !period.is_finite() || period <= 0.0 {
        return Err(anyhow!(
            "Resampling period must be positive and finite, got {}",
            period
        ));
    }
    let mut readings = times
        .iter()
        .copied()
        .zip(values.iter().copied())
        .filter(|&(t, _)| {
            if !t.is_finite() {
                warn!(t, "skipping reading with non-finite timestamp");
            }
            t.is_finite()
        });
    let Some((t0, x0)) = readings.next() else {
        return Ok(Vec::new());
    };
    let (mut t_prev, mut x_prev) = (t0, x0);
    let mut resampled = vec![x0];
    let mut k = 1usize;
    for (t_new, x_new) in readings {
        if t_new <= t_prev {
            warn!(t_prev, t_new, "skipping reading with non-increasing timestamp");
            continue;
        }
        if (t_new - t_prev) / period > MAX_GAP_PERIODS {
            return Err(anyhow!(
                "Gap between readings at {} and {} exceeds {} periods",
                t_prev,
                t_new,
                MAX_GAP_PERIODS
            ));
        }
        loop {
            let t = t0 + k as f64 * period;
            if t > t_new {
                break;
            }
            resampled.push(x_prev + (x_new - x_prev) * (t - t_prev) / (t_new - t_prev));
            k += 1;
        }
        t_prev = t_new;
        x_prev = x_new;
    }
    Ok(resampled)
}
