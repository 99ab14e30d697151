/// This module contains the submodules for breath-cycle analysis.
///
/// The available submodules are:
///
/// - `crossings`: Segments a signal into breath cycles by hysteresis zero crossings.
/// - `delay`: Measures detection latency between two crossing streams.
/// - `pipeline`: Runs the full analysis on a stored signal.
/// - `session`: Runs the same analysis one sample at a time.
pub mod crossings;
pub mod delay;
pub mod pipeline;
pub mod session;
