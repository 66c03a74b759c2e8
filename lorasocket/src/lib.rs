//! Chunked message transport over LoRa modems in Rust
//!
//! This crate moves arbitrary payloads between sensors and a gateway over
//! point-to-point LoRa. Payloads are split into frame-sized chunks, sent with a
//! small header, and reassembled on the receiving side.
//!
//! # Features
//! - SX1276 and SX1262 drivers behind one `ModemDriver` trait
//! - Per-chip configuration validation before any register write
//! - Chunking, pacing and reassembly with fixed-capacity buffers
//! - Register diagnostics rendered as a readable report
//! - `no_std` by default on the embedded side, `SharedSocket` with `std`
//!
//! # Example
//! ```no_run
//! # use lorasocket::radio::ModemDriver;
//! # fn demo<D: ModemDriver, DELAY: embedded_hal::blocking::delay::DelayMs<u32>>(
//! #     mut modem: D,
//! #     delay: DELAY,
//! # ) -> Result<(), lorasocket::socket::SocketError> {
//! use lorasocket::{
//!     config::{ModemConfig, SocketConfig},
//!     socket::LoRaSocket,
//! };
//!
//! // 434 MHz, SF12, 125 kHz, 4/5 at the chip's usable power
//! modem.configure(&ModemConfig::for_variant(modem.variant()))?;
//!
//! let mut socket = LoRaSocket::new(modem, delay, SocketConfig::default());
//! socket.send(24, 0, &[0x00, 0x01, 0x10, 0x18])?;
//!
//! let message = socket.receive_message()?;
//! assert_eq!(message.sensor_id, 24);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(not(feature = "std"), no_std)]

/// Wire format of chunks
pub mod codec;

/// Modem and socket configuration
pub mod config;

/// Modem status reports
pub mod diagnostics;

/// Radio hardware abstraction layer
pub mod radio;

/// Chunking transport socket
pub mod socket;

pub use codec::{FormatError, FrameProfile, Packet};
pub use config::{ModemConfig, SocketConfig};
pub use radio::{ModemDriver, ModemError, ModemStatus, ModemVariant};
pub use socket::{LoRaSocket, Message, SocketError};
