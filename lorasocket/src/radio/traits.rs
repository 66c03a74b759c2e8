use core::fmt;

use super::airtime;
use crate::config::{ConfigError, ModemConfig};

/// Supported modem chips
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModemVariant {
    /// Semtech SX1276/77/78/79
    Sx1276,
    /// Semtech SX1261/62
    Sx1262,
}

impl ModemVariant {
    /// Chip name as printed in reports
    pub fn name(self) -> &'static str {
        match self {
            ModemVariant::Sx1276 => "SX1276",
            ModemVariant::Sx1262 => "SX1262",
        }
    }
}

/// Possible errors in modem operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModemError {
    /// SPI transfer error
    Spi,
    /// GPIO error
    Gpio,
    /// Chip missing or reporting an unexpected identity
    Hardware,
    /// BUSY line stuck high
    Busy,
    /// No packet or TX done within the deadline
    Timeout,
    /// Frame longer than the chip's buffer
    PayloadTooLarge(usize),
    /// Rejected configuration
    Config(ConfigError),
}

impl ModemError {
    /// Transport-level failure (bus, pins, chip)
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            ModemError::Spi | ModemError::Gpio | ModemError::Hardware | ModemError::Busy
        )
    }
}

impl From<ConfigError> for ModemError {
    fn from(error: ConfigError) -> Self {
        ModemError::Config(error)
    }
}

impl fmt::Display for ModemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModemError::Spi => write!(f, "SPI transfer failed"),
            ModemError::Gpio => write!(f, "GPIO access failed"),
            ModemError::Hardware => write!(f, "modem hardware not responding as expected"),
            ModemError::Busy => write!(f, "modem stayed busy"),
            ModemError::Timeout => write!(f, "modem operation timed out"),
            ModemError::PayloadTooLarge(len) => write!(f, "frame of {} bytes too large", len),
            ModemError::Config(error) => write!(f, "invalid configuration: {}", error),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ModemError {}

/// Chip operating mode, decoded from the variant's status register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OpMode {
    /// Sleep
    Sleep,
    /// Standby on the RC oscillator (SX1276 standby)
    StandbyRc,
    /// Standby on the crystal oscillator
    StandbyXosc,
    /// Frequency synthesis
    FrequencySynthesis,
    /// Transmitting
    Tx,
    /// Continuous or timed receive
    Rx,
    /// Single receive (SX1276)
    RxSingle,
    /// Channel activity detection
    Cad,
    /// Raw mode value not mapped above
    Unknown(u8),
}

impl OpMode {
    /// Short label for reports
    pub fn label(self) -> &'static str {
        match self {
            OpMode::Sleep => "SLEEP",
            OpMode::StandbyRc => "STDBY_RC",
            OpMode::StandbyXosc => "STDBY_XOSC",
            OpMode::FrequencySynthesis => "FS",
            OpMode::Tx => "TX",
            OpMode::Rx => "RX",
            OpMode::RxSingle => "RX_SINGLE",
            OpMode::Cad => "CAD",
            OpMode::Unknown(_) => "UNKNOWN",
        }
    }
}

/// Chip-specific part of a status snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChipDetail {
    /// SX1276 registers
    Sx1276 {
        /// RegVersion
        version: Option<u8>,
        /// Raw RegOpMode
        raw_op_mode: Option<u8>,
        /// RegIrqFlags
        irq_flags: Option<u8>,
    },
    /// SX1262 status pair
    Sx1262 {
        /// Raw GetStatus byte
        raw_status: Option<u8>,
        /// Command status field of GetStatus
        command_status: Option<u8>,
        /// GetDeviceErrors bits
        device_errors: Option<u16>,
    },
}

/// Register snapshot in a chip-independent shape
///
/// `None` marks a field whose register read failed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModemStatus {
    /// Chip the snapshot came from
    pub variant: ModemVariant,
    /// Operating mode
    pub op_mode: Option<OpMode>,
    /// Carrier frequency in Hz
    pub frequency: Option<u32>,
    /// Spreading factor
    pub spreading_factor: Option<u8>,
    /// Bandwidth in Hz
    pub bandwidth: Option<u32>,
    /// Coding rate denominator
    pub coding_rate: Option<u8>,
    /// Preamble length in symbols
    pub preamble_len: Option<u16>,
    /// Output power in dBm
    pub power: Option<i8>,
    /// Payload CRC on
    pub crc_enabled: Option<bool>,
    /// Implicit header mode
    pub implicit_header: Option<bool>,
    /// I/Q inverted on receive
    pub invert_iq_rx: Option<bool>,
    /// I/Q inverted on transmit
    pub invert_iq_tx: Option<bool>,
    /// Sync word as held by the chip (one byte on SX1276, two on SX1262)
    pub sync_word: Option<u16>,
    /// Raw receiver gain register
    pub rx_gain: Option<u8>,
    /// Receiver gain is boosted
    pub rx_boosted: Option<bool>,
    /// Chip-specific registers
    pub detail: ChipDetail,
}

impl ModemStatus {
    /// Snapshot with every field unread
    pub fn empty(variant: ModemVariant) -> Self {
        let detail = match variant {
            ModemVariant::Sx1276 => ChipDetail::Sx1276 {
                version: None,
                raw_op_mode: None,
                irq_flags: None,
            },
            ModemVariant::Sx1262 => ChipDetail::Sx1262 {
                raw_status: None,
                command_status: None,
                device_errors: None,
            },
        };
        Self {
            variant,
            op_mode: None,
            frequency: None,
            spreading_factor: None,
            bandwidth: None,
            coding_rate: None,
            preamble_len: None,
            power: None,
            crc_enabled: None,
            implicit_header: None,
            invert_iq_rx: None,
            invert_iq_tx: None,
            sync_word: None,
            rx_gain: None,
            rx_boosted: None,
            detail,
        }
    }
}

/// Radio modem interface shared by all chip variants
pub trait ModemDriver {
    /// Chip behind this driver
    fn variant(&self) -> ModemVariant;

    /// Largest frame the chip accepts
    fn max_payload(&self) -> usize {
        255
    }

    /// Time on air of a `len` byte frame in milliseconds
    ///
    /// Drivers that keep the applied configuration should use it; this falls back
    /// to the default settings.
    fn time_on_air_ms(&self, len: usize) -> u32 {
        airtime::airtime_ms(&ModemConfig::default(), len)
    }

    /// Validate and apply a configuration
    ///
    /// Nothing is written to the chip if validation fails.
    fn configure(&mut self, config: &ModemConfig) -> Result<(), ModemError>;

    /// Read a fresh status snapshot without changing the modem's state
    fn read_diagnostics(&mut self) -> ModemStatus;

    /// Transmit one frame and wait for TX done
    fn transmit(&mut self, buffer: &[u8]) -> Result<(), ModemError>;

    /// Fetch a pending frame into `buffer`, returning its length
    ///
    /// Arms the receiver if needed and returns `WouldBlock` while nothing is pending.
    fn try_receive(&mut self, buffer: &mut [u8]) -> nb::Result<usize, ModemError>;

    /// Block until a frame arrives or `timeout_ms` elapses
    fn receive(&mut self, buffer: &mut [u8], timeout_ms: u32) -> Result<usize, ModemError>;

    /// RSSI of the last received frame in dBm
    fn last_rssi(&mut self) -> Result<i16, ModemError>;

    /// SNR of the last received frame in dB
    fn last_snr(&mut self) -> Result<i8, ModemError>;

    /// Put the modem into sleep mode
    fn sleep(&mut self) -> Result<(), ModemError>;

    /// Put the modem into standby mode
    fn standby(&mut self) -> Result<(), ModemError>;
}
