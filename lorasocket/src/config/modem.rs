use core::fmt;
use core::ops::RangeInclusive;

use crate::radio::ModemVariant;

/// Bandwidths supported by both chips, in Hz
pub const SUPPORTED_BANDWIDTHS: [u32; 10] = [
    7_800, 10_400, 15_600, 20_800, 31_250, 41_700, 62_500, 125_000, 250_000, 500_000,
];

/// Radio modulation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModulationParams {
    /// Spreading factor (SF5-SF12 depending on chip)
    pub spreading_factor: u8,
    /// Bandwidth in Hz
    pub bandwidth: u32,
    /// Coding rate denominator (5 = 4/5 ... 8 = 4/8)
    pub coding_rate: u8,
}

/// Transmit antenna path (SX1276 only)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxAntenna {
    /// RFO pin, up to +15 dBm
    Rfo,
    /// PA_BOOST pin, up to +20 dBm
    PaBoost,
}

/// Modem configuration shared by all driver variants
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModemConfig {
    /// Carrier frequency in Hz
    pub frequency: u32,
    /// Modulation parameters
    pub modulation: ModulationParams,
    /// Output power in dBm
    pub power: i8,
    /// Transmit antenna path
    pub tx_antenna: TxAntenna,
    /// One-byte LoRa sync word
    pub sync_word: u8,
    /// Preamble length in symbols
    pub preamble_len: u16,
    /// Payload CRC generation and check
    pub crc_enabled: bool,
    /// Implicit (headerless) mode
    pub implicit_header: bool,
    /// Invert I/Q on receive
    pub invert_iq_rx: bool,
    /// Invert I/Q on transmit
    pub invert_iq_tx: bool,
    /// Boosted LNA gain on receive
    pub rx_boost: bool,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            frequency: 434_000_000,
            modulation: ModulationParams {
                spreading_factor: 12,
                bandwidth: 125_000,
                coding_rate: 5,
            },
            power: 22,
            tx_antenna: TxAntenna::PaBoost,
            sync_word: 0x12,
            preamble_len: 10,
            crc_enabled: true,
            implicit_header: false,
            invert_iq_rx: false,
            invert_iq_tx: false,
            rx_boost: true,
        }
    }
}

impl ModemConfig {
    /// Deployment defaults clamped to what `variant` accepts
    ///
    /// SX1276 tops out at 20 dBm on PA_BOOST; everything else matches [`Default`].
    pub fn for_variant(variant: ModemVariant) -> Self {
        let config = Self::default();
        match variant {
            ModemVariant::Sx1276 => config.with_power(*SX1276_LIMITS.power_pa_boost.end()),
            ModemVariant::Sx1262 => config,
        }
    }

    /// Set the carrier frequency in Hz
    pub fn with_frequency(mut self, frequency: u32) -> Self {
        self.frequency = frequency;
        self
    }

    /// Set spreading factor, bandwidth (Hz) and coding rate denominator
    pub fn with_modulation(mut self, spreading_factor: u8, bandwidth: u32, coding_rate: u8) -> Self {
        self.modulation = ModulationParams {
            spreading_factor,
            bandwidth,
            coding_rate,
        };
        self
    }

    /// Set the output power in dBm
    pub fn with_power(mut self, power: i8) -> Self {
        self.power = power;
        self
    }

    /// Set the one-byte sync word
    pub fn with_sync_word(mut self, sync_word: u8) -> Self {
        self.sync_word = sync_word;
        self
    }

    /// Set the transmit antenna path
    pub fn with_tx_antenna(mut self, tx_antenna: TxAntenna) -> Self {
        self.tx_antenna = tx_antenna;
        self
    }

    /// Check every parameter against the given chip limits
    pub fn validate(&self, limits: &ModemLimits) -> Result<(), ConfigError> {
        if !limits.frequency_bands.iter().any(|band| band.contains(&self.frequency)) {
            return Err(ConfigError::Frequency(self.frequency));
        }

        let sf = self.modulation.spreading_factor;
        if !limits.spreading_factor.contains(&sf) {
            return Err(ConfigError::SpreadingFactor(sf));
        }
        if sf == 6 && limits.sf6_needs_implicit_header && !self.implicit_header {
            return Err(ConfigError::ExplicitHeaderAtSf6);
        }

        if !SUPPORTED_BANDWIDTHS.contains(&self.modulation.bandwidth) {
            return Err(ConfigError::Bandwidth(self.modulation.bandwidth));
        }

        if !(5..=8).contains(&self.modulation.coding_rate) {
            return Err(ConfigError::CodingRate(self.modulation.coding_rate));
        }

        let power_range = match self.tx_antenna {
            TxAntenna::PaBoost => &limits.power_pa_boost,
            TxAntenna::Rfo => &limits.power_rfo,
        };
        if !power_range.contains(&self.power) {
            return Err(ConfigError::Power(self.power));
        }

        if self.preamble_len < 6 {
            return Err(ConfigError::PreambleLength(self.preamble_len));
        }

        Ok(())
    }
}

/// Supported parameter ranges of a modem chip
#[derive(Debug, Clone)]
pub struct ModemLimits {
    /// Accepted carrier frequency bands in Hz
    pub frequency_bands: &'static [RangeInclusive<u32>],
    /// Accepted spreading factors
    pub spreading_factor: RangeInclusive<u8>,
    /// Accepted power on the PA_BOOST path in dBm
    pub power_pa_boost: RangeInclusive<i8>,
    /// Accepted power on the RFO path in dBm
    pub power_rfo: RangeInclusive<i8>,
    /// SF6 only works in implicit header mode
    pub sf6_needs_implicit_header: bool,
}

/// SX1276/77/78/79 limits (datasheet rev. 7)
pub const SX1276_LIMITS: ModemLimits = ModemLimits {
    frequency_bands: &[
        137_000_000..=175_000_000,
        410_000_000..=525_000_000,
        862_000_000..=1_020_000_000,
    ],
    spreading_factor: 6..=12,
    power_pa_boost: 2..=20,
    power_rfo: -4..=15,
    sf6_needs_implicit_header: true,
};

/// SX1261/62 limits; the SX1262 has a single high-power PA
pub const SX1262_LIMITS: ModemLimits = ModemLimits {
    frequency_bands: &[150_000_000..=960_000_000],
    spreading_factor: 5..=12,
    power_pa_boost: -9..=22,
    power_rfo: -9..=22,
    sf6_needs_implicit_header: false,
};

/// Invalid modem parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Frequency (Hz) outside every supported band
    Frequency(u32),
    /// Unsupported spreading factor
    SpreadingFactor(u8),
    /// Unsupported bandwidth (Hz)
    Bandwidth(u32),
    /// Coding rate denominator outside 5..=8
    CodingRate(u8),
    /// Output power (dBm) outside the antenna path's range
    Power(i8),
    /// Preamble shorter than the chip minimum
    PreambleLength(u16),
    /// SF6 requested with explicit header mode
    ExplicitHeaderAtSf6,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Frequency(hz) => write!(f, "unsupported frequency {} Hz", hz),
            ConfigError::SpreadingFactor(sf) => write!(f, "unsupported spreading factor SF{}", sf),
            ConfigError::Bandwidth(hz) => write!(f, "unsupported bandwidth {} Hz", hz),
            ConfigError::CodingRate(cr) => write!(f, "unsupported coding rate 4/{}", cr),
            ConfigError::Power(dbm) => write!(f, "unsupported output power {} dBm", dbm),
            ConfigError::PreambleLength(len) => write!(f, "preamble length {} too short", len),
            ConfigError::ExplicitHeaderAtSf6 => write!(f, "SF6 requires implicit header mode"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}
