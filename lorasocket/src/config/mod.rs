//! Modem and socket configuration
//!
//! This module contains the parameter sets handed to the radio drivers and
//! the transport socket. It includes:
//! - Modem parameters (frequency, modulation, power, sync word)
//! - Per-chip supported ranges and their validation
//! - Socket parameters (chunk size, pacing, read timeout, duty cycle budget)

/// Radio modem parameters and chip limits
pub mod modem;

/// Transport socket parameters
pub mod socket;

pub use modem::{ConfigError, ModemConfig, ModemLimits, ModulationParams, TxAntenna};
pub use socket::{DutyCycleLimit, SocketConfig};
