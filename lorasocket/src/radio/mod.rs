//! Modem drivers
//!
//! Both chips sit behind [`ModemDriver`] so the socket layer never touches
//! registers or opcodes directly.

pub mod airtime;

/// Driver trait and chip-independent types
pub mod traits;

/// SX1276 driver
#[cfg(feature = "sx1276")]
pub mod sx127x;

/// SX1262 driver
#[cfg(feature = "sx1262")]
pub mod sx126x;

pub use traits::{ChipDetail, ModemDriver, ModemError, ModemStatus, ModemVariant, OpMode};

#[cfg(feature = "sx1276")]
pub use sx127x::SX1276;

#[cfg(feature = "sx1262")]
pub use sx126x::SX1262;
