//! This module contains submodules for conditioning the breath position signal.
//!
//! The `filter` submodule applies recursive filters without startup transients.
//! The `derivative` submodule computes finite-difference rates of change.
//! The `center` submodule removes slow drift and DC bias.
//! The `recording` submodule prepares timestamped sensor readings.
pub mod center;
pub mod derivative;
pub mod filter;
pub mod recording;
