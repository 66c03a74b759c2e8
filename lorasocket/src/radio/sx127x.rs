use embedded_hal::{
    blocking::delay::DelayMs,
    blocking::spi::{Transfer, Write},
    digital::v2::{InputPin, OutputPin},
};
use heapless::Vec;
use log::{debug, info, warn};

use crate::config::modem::{SUPPORTED_BANDWIDTHS, SX1276_LIMITS};
use crate::config::{ModemConfig, TxAntenna};
use crate::radio::airtime;
use crate::radio::traits::{ChipDetail, ModemDriver, ModemError, ModemStatus, ModemVariant, OpMode};

// SX127x Register Map
const REG_FIFO: u8 = 0x00;
const REG_OP_MODE: u8 = 0x01;
const REG_FRF_MSB: u8 = 0x06;
const REG_FRF_MID: u8 = 0x07;
const REG_FRF_LSB: u8 = 0x08;
const REG_PA_CONFIG: u8 = 0x09;
const REG_OCP: u8 = 0x0B;
const REG_LNA: u8 = 0x0C;
const REG_FIFO_ADDR_PTR: u8 = 0x0D;
const REG_FIFO_TX_BASE_ADDR: u8 = 0x0E;
const REG_FIFO_RX_BASE_ADDR: u8 = 0x0F;
const REG_FIFO_RX_CURRENT_ADDR: u8 = 0x10;
const REG_IRQ_FLAGS: u8 = 0x12;
const REG_RX_NB_BYTES: u8 = 0x13;
const REG_PKT_SNR_VALUE: u8 = 0x19;
const REG_PKT_RSSI_VALUE: u8 = 0x1A;
const REG_MODEM_CONFIG_1: u8 = 0x1D;
const REG_MODEM_CONFIG_2: u8 = 0x1E;
const REG_PREAMBLE_MSB: u8 = 0x20;
const REG_PREAMBLE_LSB: u8 = 0x21;
const REG_PAYLOAD_LENGTH: u8 = 0x22;
const REG_MODEM_CONFIG_3: u8 = 0x26;
const REG_DETECTION_OPTIMIZE: u8 = 0x31;
const REG_INVERTIQ: u8 = 0x33;
const REG_DETECTION_THRESHOLD: u8 = 0x37;
const REG_SYNC_WORD: u8 = 0x39;
const REG_INVERTIQ2: u8 = 0x3B;
const REG_DIO_MAPPING_1: u8 = 0x40;
const REG_VERSION: u8 = 0x42;
const REG_PA_DAC: u8 = 0x4D;

// Operating Mode bits
const MODE_LONG_RANGE_MODE: u8 = 0x80;
const MODE_MASK: u8 = 0x07;
const MODE_SLEEP: u8 = 0x00;
const MODE_STDBY: u8 = 0x01;
const MODE_TX: u8 = 0x03;
const MODE_RX_CONTINUOUS: u8 = 0x05;

// PA Config
const PA_BOOST: u8 = 0x80;
const PA_DAC_DEFAULT: u8 = 0x84;
const PA_DAC_HIGH_POWER: u8 = 0x87;

// LNA
const LNA_GAIN_G1: u8 = 0x20;
const LNA_BOOST_HF: u8 = 0x03;

// IRQ Flags
const IRQ_TX_DONE_MASK: u8 = 0x08;
const IRQ_PAYLOAD_CRC_ERROR_MASK: u8 = 0x20;
const IRQ_RX_DONE_MASK: u8 = 0x40;

// DIO0 mapping
const DIO0_RX_DONE: u8 = 0x00;
const DIO0_TX_DONE: u8 = 0x40;

const SILICON_VERSION: u8 = 0x12;
const FXOSC: u64 = 32_000_000;
const FIFO_SIZE: usize = 256;
const RX_POLL_MS: u32 = 10;
const TX_MARGIN_MS: u32 = 100;

/// SX1276 Radio Driver
pub struct SX1276<SPI, CS, RESET, DIO0, DELAY>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
    RESET: OutputPin,
    DIO0: InputPin,
    DELAY: DelayMs<u32>,
{
    spi: SPI,
    cs: CS,
    reset: RESET,
    dio0: DIO0,
    delay: DELAY,
    config: Option<ModemConfig>,
    rx_armed: bool,
}

impl<SPI, CS, RESET, DIO0, DELAY> SX1276<SPI, CS, RESET, DIO0, DELAY>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
    RESET: OutputPin,
    DIO0: InputPin,
    DELAY: DelayMs<u32>,
{
    /// Create new instance of SX1276 driver
    ///
    /// Resets the chip and checks its silicon version.
    pub fn new(spi: SPI, cs: CS, reset: RESET, dio0: DIO0, delay: DELAY) -> Result<Self, ModemError> {
        let mut radio = Self {
            spi,
            cs,
            reset,
            dio0,
            delay,
            config: None,
            rx_armed: false,
        };

        radio.cs.set_high().map_err(|_| ModemError::Gpio)?;

        // Reset is active low: >100 us pulse, then 5 ms until the chip is ready
        radio.reset.set_low().map_err(|_| ModemError::Gpio)?;
        radio.delay.delay_ms(1);
        radio.reset.set_high().map_err(|_| ModemError::Gpio)?;
        radio.delay.delay_ms(10);

        let version = radio.read_register(REG_VERSION)?;
        if version != SILICON_VERSION {
            warn!("SX1276 reported version 0x{:02X}", version);
            return Err(ModemError::Hardware);
        }

        Ok(radio)
    }

    /// Release the bus and pins
    pub fn release(self) -> (SPI, CS, RESET, DIO0, DELAY) {
        (self.spi, self.cs, self.reset, self.dio0, self.delay)
    }

    /// Read a radio register
    fn read_register(&mut self, addr: u8) -> Result<u8, ModemError> {
        self.cs.set_low().map_err(|_| ModemError::Gpio)?;
        let mut buffer = [addr & 0x7F, 0];
        let result = self.spi.transfer(&mut buffer).map(|_| ()).map_err(|_| ModemError::Spi);
        self.cs.set_high().map_err(|_| ModemError::Gpio)?;
        result?;
        Ok(buffer[1])
    }

    /// Write to a radio register
    fn write_register(&mut self, addr: u8, value: u8) -> Result<(), ModemError> {
        self.cs.set_low().map_err(|_| ModemError::Gpio)?;
        let result = self.spi.write(&[addr | 0x80, value]).map_err(|_| ModemError::Spi);
        self.cs.set_high().map_err(|_| ModemError::Gpio)?;
        result
    }

    /// Set operating mode
    fn set_mode(&mut self, mode: u8) -> Result<(), ModemError> {
        self.write_register(REG_OP_MODE, MODE_LONG_RANGE_MODE | mode)
    }

    fn write_fifo(&mut self, data: &[u8]) -> Result<(), ModemError> {
        let mut frame: Vec<u8, { FIFO_SIZE + 1 }> = Vec::new();
        frame
            .push(REG_FIFO | 0x80)
            .map_err(|_| ModemError::PayloadTooLarge(data.len()))?;
        frame
            .extend_from_slice(data)
            .map_err(|_| ModemError::PayloadTooLarge(data.len()))?;

        self.cs.set_low().map_err(|_| ModemError::Gpio)?;
        let result = self.spi.write(&frame).map_err(|_| ModemError::Spi);
        self.cs.set_high().map_err(|_| ModemError::Gpio)?;
        result
    }

    fn read_fifo(&mut self, data: &mut [u8]) -> Result<(), ModemError> {
        let mut frame: Vec<u8, { FIFO_SIZE + 1 }> = Vec::new();
        frame
            .resize(data.len() + 1, 0)
            .map_err(|_| ModemError::PayloadTooLarge(data.len()))?;
        frame[0] = REG_FIFO & 0x7F;

        self.cs.set_low().map_err(|_| ModemError::Gpio)?;
        let result = self.spi.transfer(&mut frame).map(|_| ()).map_err(|_| ModemError::Spi);
        self.cs.set_high().map_err(|_| ModemError::Gpio)?;
        result?;

        data.copy_from_slice(&frame[1..]);
        Ok(())
    }

    fn set_frequency(&mut self, freq: u32) -> Result<(), ModemError> {
        let frf = (freq as u64 * (1 << 19) / FXOSC) as u32;
        self.write_register(REG_FRF_MSB, ((frf >> 16) & 0xFF) as u8)?;
        self.write_register(REG_FRF_MID, ((frf >> 8) & 0xFF) as u8)?;
        self.write_register(REG_FRF_LSB, (frf & 0xFF) as u8)
    }

    fn set_tx_power(&mut self, power: i8, antenna: TxAntenna) -> Result<(), ModemError> {
        let (pa_config, pa_dac) = match antenna {
            TxAntenna::PaBoost if power > 17 => (PA_BOOST | 0x70 | (power - 5) as u8, PA_DAC_HIGH_POWER),
            TxAntenna::PaBoost => (PA_BOOST | 0x70 | (power - 2) as u8, PA_DAC_DEFAULT),
            // Pmax = 10.8 + 0.6 * MaxPower, Pout = Pmax - (15 - OutputPower)
            TxAntenna::Rfo if power < 0 => ((power + 4) as u8, PA_DAC_DEFAULT),
            TxAntenna::Rfo => (0x70 | power as u8, PA_DAC_DEFAULT),
        };
        self.write_register(REG_PA_CONFIG, pa_config)?;
        self.write_register(REG_PA_DAC, pa_dac)?;
        // 240 mA over-current trip
        self.write_register(REG_OCP, 0x3B)
    }

    fn tx_timeout_ms(&self, len: usize) -> u32 {
        2 * self.time_on_air_ms(len) + TX_MARGIN_MS
    }

    fn arm_receiver(&mut self) -> Result<(), ModemError> {
        self.write_register(REG_DIO_MAPPING_1, DIO0_RX_DONE)?;
        self.write_register(REG_FIFO_ADDR_PTR, 0)?;
        self.set_mode(MODE_RX_CONTINUOUS)?;
        self.rx_armed = true;
        Ok(())
    }
}

fn decode_op_mode(raw: u8) -> OpMode {
    match raw & MODE_MASK {
        0 => OpMode::Sleep,
        1 => OpMode::StandbyRc,
        2 | 4 => OpMode::FrequencySynthesis,
        3 => OpMode::Tx,
        5 => OpMode::Rx,
        6 => OpMode::RxSingle,
        _ => OpMode::Cad,
    }
}

fn decode_power(pa_config: u8, pa_dac: u8) -> i8 {
    let output_power = (pa_config & 0x0F) as i8;
    if pa_config & PA_BOOST != 0 {
        if pa_dac & 0x07 == 0x07 {
            output_power + 5
        } else {
            output_power + 2
        }
    } else {
        let max_power = ((pa_config >> 4) & 0x07) as i16;
        (((108 + 6 * max_power) - 150) / 10) as i8 + output_power
    }
}

impl<SPI, CS, RESET, DIO0, DELAY> ModemDriver for SX1276<SPI, CS, RESET, DIO0, DELAY>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
    RESET: OutputPin,
    DIO0: InputPin,
    DELAY: DelayMs<u32>,
{
    fn variant(&self) -> ModemVariant {
        ModemVariant::Sx1276
    }

    fn time_on_air_ms(&self, len: usize) -> u32 {
        match &self.config {
            Some(config) => airtime::airtime_ms(config, len),
            None => airtime::airtime_ms(&ModemConfig::default(), len),
        }
    }

    fn configure(&mut self, config: &ModemConfig) -> Result<(), ModemError> {
        config.validate(&SX1276_LIMITS)?;

        // LoRa mode can only be selected from sleep
        self.set_mode(MODE_SLEEP)?;
        self.rx_armed = false;

        self.set_frequency(config.frequency)?;

        self.write_register(REG_FIFO_TX_BASE_ADDR, 0x00)?;
        self.write_register(REG_FIFO_RX_BASE_ADDR, 0x00)?;

        let modulation = config.modulation;
        let bw = SUPPORTED_BANDWIDTHS
            .iter()
            .position(|&b| b == modulation.bandwidth)
            .unwrap_or(7) as u8;
        let cr = modulation.coding_rate - 4;
        let modem_config1 = (bw << 4) | (cr << 1) | config.implicit_header as u8;
        let modem_config2 = (modulation.spreading_factor << 4) | ((config.crc_enabled as u8) << 2);
        let ldro = airtime::low_data_rate_optimize(modulation.spreading_factor, modulation.bandwidth);
        // AGC auto on
        let modem_config3 = ((ldro as u8) << 3) | 0x04;

        self.write_register(REG_MODEM_CONFIG_1, modem_config1)?;
        self.write_register(REG_MODEM_CONFIG_2, modem_config2)?;
        self.write_register(REG_MODEM_CONFIG_3, modem_config3)?;

        self.write_register(REG_PREAMBLE_MSB, (config.preamble_len >> 8) as u8)?;
        self.write_register(REG_PREAMBLE_LSB, (config.preamble_len & 0xFF) as u8)?;

        if modulation.spreading_factor == 6 {
            self.write_register(REG_DETECTION_OPTIMIZE, 0xC5)?;
            self.write_register(REG_DETECTION_THRESHOLD, 0x0C)?;
        } else {
            self.write_register(REG_DETECTION_OPTIMIZE, 0xC3)?;
            self.write_register(REG_DETECTION_THRESHOLD, 0x0A)?;
        }

        self.write_register(REG_SYNC_WORD, config.sync_word)?;

        let invert_iq = 0x26 | ((config.invert_iq_rx as u8) << 6) | config.invert_iq_tx as u8;
        self.write_register(REG_INVERTIQ, invert_iq)?;
        self.write_register(REG_INVERTIQ2, if config.invert_iq_rx { 0x19 } else { 0x1D })?;

        let lna = LNA_GAIN_G1 | if config.rx_boost { LNA_BOOST_HF } else { 0 };
        self.write_register(REG_LNA, lna)?;

        self.set_tx_power(config.power, config.tx_antenna)?;

        self.set_mode(MODE_STDBY)?;
        self.config = Some(config.clone());

        info!(
            "SX1276 configured: {} Hz, SF{}, {} Hz, 4/{}, {} dBm",
            config.frequency,
            modulation.spreading_factor,
            modulation.bandwidth,
            modulation.coding_rate,
            config.power
        );
        Ok(())
    }

    fn read_diagnostics(&mut self) -> ModemStatus {
        let mut status = ModemStatus::empty(ModemVariant::Sx1276);

        let raw_op_mode = self.read_register(REG_OP_MODE).ok();
        status.op_mode = raw_op_mode.map(decode_op_mode);

        status.frequency = match (
            self.read_register(REG_FRF_MSB),
            self.read_register(REG_FRF_MID),
            self.read_register(REG_FRF_LSB),
        ) {
            (Ok(msb), Ok(mid), Ok(lsb)) => {
                let frf = ((msb as u64) << 16) | ((mid as u64) << 8) | lsb as u64;
                Some(((frf * FXOSC) >> 19) as u32)
            }
            _ => None,
        };

        if let Ok(mc1) = self.read_register(REG_MODEM_CONFIG_1) {
            status.bandwidth = SUPPORTED_BANDWIDTHS.get((mc1 >> 4) as usize).copied();
            status.coding_rate = Some(((mc1 >> 1) & 0x07) + 4);
            status.implicit_header = Some(mc1 & 0x01 != 0);
        }

        if let Ok(mc2) = self.read_register(REG_MODEM_CONFIG_2) {
            status.spreading_factor = Some(mc2 >> 4);
            status.crc_enabled = Some(mc2 & 0x04 != 0);
        }

        status.preamble_len = match (
            self.read_register(REG_PREAMBLE_MSB),
            self.read_register(REG_PREAMBLE_LSB),
        ) {
            (Ok(msb), Ok(lsb)) => Some(((msb as u16) << 8) | lsb as u16),
            _ => None,
        };

        status.power = match (self.read_register(REG_PA_CONFIG), self.read_register(REG_PA_DAC)) {
            (Ok(pa_config), Ok(pa_dac)) => Some(decode_power(pa_config, pa_dac)),
            _ => None,
        };

        if let Ok(invert_iq) = self.read_register(REG_INVERTIQ) {
            status.invert_iq_rx = Some(invert_iq & 0x40 != 0);
            status.invert_iq_tx = Some(invert_iq & 0x01 != 0);
        }

        status.sync_word = self.read_register(REG_SYNC_WORD).ok().map(u16::from);

        if let Ok(lna) = self.read_register(REG_LNA) {
            status.rx_gain = Some(lna);
            status.rx_boosted = Some(lna & LNA_BOOST_HF == LNA_BOOST_HF);
        }

        status.detail = ChipDetail::Sx1276 {
            version: self.read_register(REG_VERSION).ok(),
            raw_op_mode,
            irq_flags: self.read_register(REG_IRQ_FLAGS).ok(),
        };

        status
    }

    fn transmit(&mut self, buffer: &[u8]) -> Result<(), ModemError> {
        if buffer.len() > self.max_payload() {
            return Err(ModemError::PayloadTooLarge(buffer.len()));
        }

        // Set standby mode
        self.set_mode(MODE_STDBY)?;
        self.rx_armed = false;

        self.write_register(REG_DIO_MAPPING_1, DIO0_TX_DONE)?;
        self.write_register(REG_FIFO_ADDR_PTR, 0)?;
        self.write_fifo(buffer)?;
        self.write_register(REG_PAYLOAD_LENGTH, buffer.len() as u8)?;

        // Start transmission
        self.set_mode(MODE_TX)?;

        // Wait for TX done
        let timeout_ms = self.tx_timeout_ms(buffer.len());
        let mut waited = 0;
        while !self.dio0.is_high().map_err(|_| ModemError::Gpio)? {
            if waited >= timeout_ms {
                warn!("SX1276 TX done not signalled after {} ms", waited);
                self.set_mode(MODE_STDBY)?;
                return Err(ModemError::Timeout);
            }
            self.delay.delay_ms(1);
            waited += 1;
        }

        // Clear IRQ flags
        self.write_register(REG_IRQ_FLAGS, IRQ_TX_DONE_MASK)?;
        debug!("SX1276 sent {} bytes", buffer.len());

        Ok(())
    }

    fn try_receive(&mut self, buffer: &mut [u8]) -> nb::Result<usize, ModemError> {
        if !self.rx_armed {
            self.arm_receiver()?;
            return Err(nb::Error::WouldBlock);
        }

        if !self.dio0.is_high().map_err(|_| ModemError::Gpio)? {
            return Err(nb::Error::WouldBlock);
        }

        let flags = self.read_register(REG_IRQ_FLAGS)?;
        self.write_register(REG_IRQ_FLAGS, flags)?;

        if flags & IRQ_RX_DONE_MASK == 0 {
            return Err(nb::Error::WouldBlock);
        }
        if flags & IRQ_PAYLOAD_CRC_ERROR_MASK != 0 {
            warn!("SX1276 dropped frame with CRC error");
            return Err(nb::Error::WouldBlock);
        }

        let len = self.read_register(REG_RX_NB_BYTES)? as usize;
        if len > buffer.len() {
            return Err(nb::Error::Other(ModemError::PayloadTooLarge(len)));
        }

        let rx_addr = self.read_register(REG_FIFO_RX_CURRENT_ADDR)?;
        self.write_register(REG_FIFO_ADDR_PTR, rx_addr)?;
        self.read_fifo(&mut buffer[..len])?;

        debug!("SX1276 received {} bytes", len);
        Ok(len)
    }

    fn receive(&mut self, buffer: &mut [u8], timeout_ms: u32) -> Result<usize, ModemError> {
        let mut waited = 0;
        loop {
            match self.try_receive(buffer) {
                Ok(len) => return Ok(len),
                Err(nb::Error::Other(error)) => return Err(error),
                Err(nb::Error::WouldBlock) => {}
            }
            if waited >= timeout_ms {
                return Err(ModemError::Timeout);
            }
            self.delay.delay_ms(RX_POLL_MS);
            waited += RX_POLL_MS;
        }
    }

    fn last_rssi(&mut self) -> Result<i16, ModemError> {
        let rssi_value = self.read_register(REG_PKT_RSSI_VALUE)?;
        let hf = self.config.as_ref().map_or(true, |c| c.frequency > 525_000_000);
        Ok(if hf { -157 } else { -164 } + rssi_value as i16)
    }

    fn last_snr(&mut self) -> Result<i8, ModemError> {
        let snr = self.read_register(REG_PKT_SNR_VALUE)?;
        Ok((snr as i8) / 4)
    }

    fn sleep(&mut self) -> Result<(), ModemError> {
        self.rx_armed = false;
        self.set_mode(MODE_SLEEP)
    }

    fn standby(&mut self) -> Result<(), ModemError> {
        self.rx_armed = false;
        self.set_mode(MODE_STDBY)
    }
}
