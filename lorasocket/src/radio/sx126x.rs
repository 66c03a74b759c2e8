use embedded_hal::{
    blocking::delay::DelayMs,
    blocking::spi::{Transfer, Write},
    digital::v2::{InputPin, OutputPin},
};
use heapless::Vec;
use log::{debug, info, warn};

use crate::config::modem::SX1262_LIMITS;
use crate::config::ModemConfig;
use crate::radio::airtime;
use crate::radio::traits::{ChipDetail, ModemDriver, ModemError, ModemStatus, ModemVariant, OpMode};

// SX126x Register Map
mod registers {
    pub const REG_IQ_POLARITY_SETUP: u16 = 0x0736;
    pub const REG_LORA_SYNC_WORD_MSB: u16 = 0x0740;
    pub const REG_RX_GAIN: u16 = 0x08AC;
}

mod commands {
    pub const GET_STATUS: u8 = 0xC0;
    pub const GET_DEVICE_ERRORS: u8 = 0x17;
    pub const SET_SLEEP: u8 = 0x84;
    pub const SET_STANDBY: u8 = 0x80;
    pub const SET_TX: u8 = 0x83;
    pub const SET_RX: u8 = 0x82;
    pub const SET_REGULATOR_MODE: u8 = 0x96;
    pub const CALIBRATE: u8 = 0x89;
    pub const CALIBRATE_IMAGE: u8 = 0x98;
    pub const SET_PA_CONFIG: u8 = 0x95;
    pub const WRITE_REGISTER: u8 = 0x0D;
    pub const READ_REGISTER: u8 = 0x1D;
    pub const WRITE_BUFFER: u8 = 0x0E;
    pub const READ_BUFFER: u8 = 0x1E;
    pub const SET_DIO_IRQ_PARAMS: u8 = 0x08;
    pub const GET_IRQ_STATUS: u8 = 0x12;
    pub const CLR_IRQ_STATUS: u8 = 0x02;
    pub const SET_DIO2_AS_RF_SWITCH_CTRL: u8 = 0x9D;
    pub const SET_DIO3_AS_TCXO_CTRL: u8 = 0x97;
    pub const SET_RF_FREQUENCY: u8 = 0x86;
    pub const SET_PKT_TYPE: u8 = 0x8A;
    pub const SET_TX_PARAMS: u8 = 0x8E;
    pub const SET_MODULATION_PARAMS: u8 = 0x8B;
    pub const SET_PKT_PARAMS: u8 = 0x8C;
    pub const GET_RX_BUFFER_STATUS: u8 = 0x13;
    pub const GET_PKT_STATUS: u8 = 0x14;
    pub const SET_BUFFER_BASE_ADDRESS: u8 = 0x8F;
}

// IRQ bits
const IRQ_TX_DONE: u16 = 0x0001;
const IRQ_RX_DONE: u16 = 0x0002;
const IRQ_HEADER_ERR: u16 = 0x0020;
const IRQ_CRC_ERR: u16 = 0x0040;
const IRQ_TIMEOUT: u16 = 0x0200;
const IRQ_ALL: u16 = 0xFFFF;

const STDBY_RC: u8 = 0x00;
const PACKET_TYPE_LORA: u8 = 0x01;
const RAMP_40_US: u8 = 0x02;
const RX_GAIN_POWER_SAVING: u8 = 0x94;
const RX_GAIN_BOOSTED: u8 = 0x96;
const NOP: u8 = 0x00;

const FXOSC: u64 = 32_000_000;
const BUFFER_SIZE: usize = 256;
const BUSY_TIMEOUT_MS: u32 = 1000;
const RX_POLL_MS: u32 = 10;
const TX_MARGIN_MS: u32 = 100;

/// SX1262 bandwidth codes, datasheet table 13-48
fn bandwidth_code(bandwidth: u32) -> u8 {
    match bandwidth {
        7_800 => 0x00,
        10_400 => 0x08,
        15_600 => 0x01,
        20_800 => 0x09,
        31_250 => 0x02,
        41_700 => 0x0A,
        62_500 => 0x03,
        250_000 => 0x05,
        500_000 => 0x06,
        _ => 0x04,
    }
}

/// Image calibration band for the given carrier
fn image_calibration(frequency: u32) -> [u8; 2] {
    match frequency {
        f if f > 900_000_000 => [0xE1, 0xE9],
        f if f > 850_000_000 => [0xD7, 0xDB],
        f if f > 770_000_000 => [0xC1, 0xC5],
        f if f > 460_000_000 => [0x75, 0x81],
        _ => [0x6B, 0x6F],
    }
}

/// TCXO supply voltage code for SetDio3AsTcxoCtrl
fn tcxo_voltage_code(millivolts: u16) -> u8 {
    match millivolts {
        0..=1600 => 0x00,
        1601..=1700 => 0x01,
        1701..=1800 => 0x02,
        1801..=2200 => 0x03,
        2201..=2400 => 0x04,
        2401..=2700 => 0x05,
        2701..=3000 => 0x06,
        _ => 0x07,
    }
}

/// Expand the one-byte LoRa sync word into the two register bytes (0x12 -> 0x1424)
pub fn expand_sync_word(sync_word: u8) -> [u8; 2] {
    [(sync_word & 0xF0) | 0x04, ((sync_word & 0x0F) << 4) | 0x04]
}

fn decode_chip_mode(status: u8) -> OpMode {
    match (status >> 4) & 0x07 {
        2 => OpMode::StandbyRc,
        3 => OpMode::StandbyXosc,
        4 => OpMode::FrequencySynthesis,
        5 => OpMode::Rx,
        6 => OpMode::Tx,
        other => OpMode::Unknown(other),
    }
}

/// SX1262 Radio Driver
pub struct SX1262<SPI, CS, RESET, BUSY, DIO1, DELAY>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
    RESET: OutputPin,
    BUSY: InputPin,
    DIO1: InputPin,
    DELAY: DelayMs<u32>,
{
    spi: SPI,
    cs: CS,
    reset: RESET,
    busy: BUSY,
    dio1: DIO1,
    delay: DELAY,
    tcxo_millivolts: Option<u16>,
    config: Option<ModemConfig>,
    rx_armed: bool,
}

impl<SPI, CS, RESET, BUSY, DIO1, DELAY> SX1262<SPI, CS, RESET, BUSY, DIO1, DELAY>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
    RESET: OutputPin,
    BUSY: InputPin,
    DIO1: InputPin,
    DELAY: DelayMs<u32>,
{
    /// Create new SX1262 driver instance
    ///
    /// # Arguments
    /// * `spi` - SPI interface
    /// * `cs` - Chip select pin
    /// * `reset` - Reset pin
    /// * `busy` - Busy pin
    /// * `dio1` - DIO1 interrupt pin
    /// * `delay` - Delay implementation
    pub fn new(
        spi: SPI,
        cs: CS,
        reset: RESET,
        busy: BUSY,
        dio1: DIO1,
        delay: DELAY,
    ) -> Result<Self, ModemError> {
        let mut radio = Self {
            spi,
            cs,
            reset,
            busy,
            dio1,
            delay,
            tcxo_millivolts: None,
            config: None,
            rx_armed: false,
        };

        radio.cs.set_high().map_err(|_| ModemError::Gpio)?;

        // Reset sequence
        radio.reset.set_low().map_err(|_| ModemError::Gpio)?;
        radio.delay.delay_ms(2);
        radio.reset.set_high().map_err(|_| ModemError::Gpio)?;
        radio.delay.delay_ms(10);

        // Wait for busy to go low indicating device is ready
        radio.wait_busy()?;

        radio.write_command(commands::SET_STANDBY, &[STDBY_RC])?;
        let status = radio.get_status()?;
        if decode_chip_mode(status) != OpMode::StandbyRc {
            warn!("SX1262 reported status 0x{:02X} after reset", status);
            return Err(ModemError::Hardware);
        }

        Ok(radio)
    }

    /// Drive a TCXO from DIO3 at the given supply voltage
    ///
    /// Takes effect on the next [`ModemDriver::configure`].
    pub fn with_tcxo(mut self, millivolts: u16) -> Self {
        self.tcxo_millivolts = Some(millivolts);
        self
    }

    /// Release the bus and pins
    pub fn release(self) -> (SPI, CS, RESET, BUSY, DIO1, DELAY) {
        (self.spi, self.cs, self.reset, self.busy, self.dio1, self.delay)
    }

    fn wait_busy(&mut self) -> Result<(), ModemError> {
        for _ in 0..BUSY_TIMEOUT_MS {
            if self.busy.is_low().map_err(|_| ModemError::Gpio)? {
                return Ok(());
            }
            self.delay.delay_ms(1);
        }
        Err(ModemError::Busy)
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), ModemError> {
        self.wait_busy()?;
        self.cs.set_low().map_err(|_| ModemError::Gpio)?;
        let result = self.spi.write(frame).map_err(|_| ModemError::Spi);
        self.cs.set_high().map_err(|_| ModemError::Gpio)?;
        result
    }

    fn transfer_frame(&mut self, frame: &mut [u8]) -> Result<(), ModemError> {
        self.wait_busy()?;
        self.cs.set_low().map_err(|_| ModemError::Gpio)?;
        let result = self.spi.transfer(frame).map(|_| ()).map_err(|_| ModemError::Spi);
        self.cs.set_high().map_err(|_| ModemError::Gpio)?;
        result
    }

    fn write_command(&mut self, command: u8, data: &[u8]) -> Result<(), ModemError> {
        let mut frame: Vec<u8, { BUFFER_SIZE + 2 }> = Vec::new();
        frame
            .push(command)
            .map_err(|_| ModemError::PayloadTooLarge(data.len()))?;
        frame
            .extend_from_slice(data)
            .map_err(|_| ModemError::PayloadTooLarge(data.len()))?;
        self.write_frame(&frame)
    }

    /// Issue a command with `prefix` bytes, skip one status byte and read the response
    fn read_command(&mut self, prefix: &[u8], response: &mut [u8]) -> Result<(), ModemError> {
        let header = prefix.len() + 1;
        let mut frame: Vec<u8, { BUFFER_SIZE + 4 }> = Vec::new();
        frame
            .resize(header + response.len(), NOP)
            .map_err(|_| ModemError::PayloadTooLarge(response.len()))?;
        frame[..prefix.len()].copy_from_slice(prefix);
        self.transfer_frame(&mut frame)?;
        response.copy_from_slice(&frame[header..]);
        Ok(())
    }

    fn get_status(&mut self) -> Result<u8, ModemError> {
        let mut frame = [commands::GET_STATUS, NOP];
        self.transfer_frame(&mut frame)?;
        Ok(frame[1])
    }

    fn get_device_errors(&mut self) -> Result<u16, ModemError> {
        let mut errors = [0u8; 2];
        self.read_command(&[commands::GET_DEVICE_ERRORS], &mut errors)?;
        Ok(u16::from_be_bytes(errors))
    }

    fn get_irq_status(&mut self) -> Result<u16, ModemError> {
        let mut irq = [0u8; 2];
        self.read_command(&[commands::GET_IRQ_STATUS], &mut irq)?;
        Ok(u16::from_be_bytes(irq))
    }

    fn clear_irq_status(&mut self, mask: u16) -> Result<(), ModemError> {
        self.write_command(commands::CLR_IRQ_STATUS, &mask.to_be_bytes())
    }

    fn write_register(&mut self, address: u16, data: &[u8]) -> Result<(), ModemError> {
        let mut frame: Vec<u8, 8> = Vec::new();
        frame
            .extend_from_slice(&address.to_be_bytes())
            .map_err(|_| ModemError::PayloadTooLarge(data.len()))?;
        frame
            .extend_from_slice(data)
            .map_err(|_| ModemError::PayloadTooLarge(data.len()))?;
        self.write_command(commands::WRITE_REGISTER, &frame)
    }

    fn read_register(&mut self, address: u16, data: &mut [u8]) -> Result<(), ModemError> {
        let [hi, lo] = address.to_be_bytes();
        self.read_command(&[commands::READ_REGISTER, hi, lo], data)
    }

    fn set_frequency(&mut self, freq: u32) -> Result<(), ModemError> {
        let frf = (((freq as u64) << 25) / FXOSC) as u32;
        self.write_command(commands::SET_RF_FREQUENCY, &frf.to_be_bytes())
    }

    fn set_packet_params(&mut self, payload_len: u8, invert_iq: bool) -> Result<(), ModemError> {
        let config = self.config.clone().unwrap_or_default();
        let [preamble_hi, preamble_lo] = config.preamble_len.to_be_bytes();
        self.write_command(
            commands::SET_PKT_PARAMS,
            &[
                preamble_hi,
                preamble_lo,
                config.implicit_header as u8,
                payload_len,
                config.crc_enabled as u8,
                invert_iq as u8,
            ],
        )?;

        // Errata 15.4: bit 2 of the IQ polarity register must be cleared for inverted IQ
        let mut iq = [0u8];
        self.read_register(registers::REG_IQ_POLARITY_SETUP, &mut iq)?;
        let iq = if invert_iq { iq[0] & !0x04 } else { iq[0] | 0x04 };
        self.write_register(registers::REG_IQ_POLARITY_SETUP, &[iq])
    }

    fn tx_timeout_ms(&self, len: usize) -> u32 {
        2 * self.time_on_air_ms(len) + TX_MARGIN_MS
    }

    fn arm_receiver(&mut self) -> Result<(), ModemError> {
        let invert_iq = self.config.as_ref().map_or(false, |c| c.invert_iq_rx);
        self.set_packet_params(0xFF, invert_iq)?;
        self.clear_irq_status(IRQ_ALL)?;
        // Continuous receive
        self.write_command(commands::SET_RX, &[0xFF, 0xFF, 0xFF])?;
        self.rx_armed = true;
        Ok(())
    }
}

impl<SPI, CS, RESET, BUSY, DIO1, DELAY> ModemDriver for SX1262<SPI, CS, RESET, BUSY, DIO1, DELAY>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
    RESET: OutputPin,
    BUSY: InputPin,
    DIO1: InputPin,
    DELAY: DelayMs<u32>,
{
    fn variant(&self) -> ModemVariant {
        ModemVariant::Sx1262
    }

    fn time_on_air_ms(&self, len: usize) -> u32 {
        match &self.config {
            Some(config) => airtime::airtime_ms(config, len),
            None => airtime::airtime_ms(&ModemConfig::default(), len),
        }
    }

    fn configure(&mut self, config: &ModemConfig) -> Result<(), ModemError> {
        config.validate(&SX1262_LIMITS)?;

        self.write_command(commands::SET_STANDBY, &[STDBY_RC])?;
        self.rx_armed = false;

        if let Some(millivolts) = self.tcxo_millivolts {
            // 5 ms startup in 15.625 us steps
            self.write_command(
                commands::SET_DIO3_AS_TCXO_CTRL,
                &[tcxo_voltage_code(millivolts), 0x00, 0x01, 0x40],
            )?;
        }

        // DC-DC regulator, then calibrate all blocks
        self.write_command(commands::SET_REGULATOR_MODE, &[0x01])?;
        self.write_command(commands::CALIBRATE, &[0x7F])?;
        self.write_command(commands::SET_DIO2_AS_RF_SWITCH_CTRL, &[0x01])?;
        self.write_command(commands::SET_PKT_TYPE, &[PACKET_TYPE_LORA])?;

        self.set_frequency(config.frequency)?;
        self.write_command(commands::CALIBRATE_IMAGE, &image_calibration(config.frequency))?;

        // SX1262 high-power PA table entry for +22 dBm
        self.write_command(commands::SET_PA_CONFIG, &[0x04, 0x07, 0x00, 0x01])?;
        self.write_command(commands::SET_TX_PARAMS, &[config.power as u8, RAMP_40_US])?;

        self.write_command(commands::SET_BUFFER_BASE_ADDRESS, &[0x00, 0x00])?;

        let modulation = config.modulation;
        let ldro = airtime::low_data_rate_optimize(modulation.spreading_factor, modulation.bandwidth);
        self.write_command(
            commands::SET_MODULATION_PARAMS,
            &[
                modulation.spreading_factor,
                bandwidth_code(modulation.bandwidth),
                modulation.coding_rate - 4,
                ldro as u8,
            ],
        )?;

        self.config = Some(config.clone());
        self.set_packet_params(0xFF, config.invert_iq_rx)?;

        self.write_register(
            registers::REG_LORA_SYNC_WORD_MSB,
            &expand_sync_word(config.sync_word),
        )?;

        let rx_gain = if config.rx_boost {
            RX_GAIN_BOOSTED
        } else {
            RX_GAIN_POWER_SAVING
        };
        self.write_register(registers::REG_RX_GAIN, &[rx_gain])?;

        let irq_mask = IRQ_TX_DONE | IRQ_RX_DONE | IRQ_HEADER_ERR | IRQ_CRC_ERR | IRQ_TIMEOUT;
        let [mask_hi, mask_lo] = irq_mask.to_be_bytes();
        self.write_command(
            commands::SET_DIO_IRQ_PARAMS,
            &[mask_hi, mask_lo, mask_hi, mask_lo, 0x00, 0x00, 0x00, 0x00],
        )?;

        info!(
            "SX1262 configured: {} Hz, SF{}, {} Hz, 4/{}, {} dBm",
            config.frequency,
            modulation.spreading_factor,
            modulation.bandwidth,
            modulation.coding_rate,
            config.power
        );
        Ok(())
    }

    fn read_diagnostics(&mut self) -> ModemStatus {
        let mut status = ModemStatus::empty(ModemVariant::Sx1262);

        let raw_status = self.get_status().ok();
        status.op_mode = raw_status.map(decode_chip_mode);

        // Modulation settings are write-only on this chip
        if let Some(config) = &self.config {
            status.frequency = Some(config.frequency);
            status.spreading_factor = Some(config.modulation.spreading_factor);
            status.bandwidth = Some(config.modulation.bandwidth);
            status.coding_rate = Some(config.modulation.coding_rate);
            status.preamble_len = Some(config.preamble_len);
            status.power = Some(config.power);
            status.crc_enabled = Some(config.crc_enabled);
            status.implicit_header = Some(config.implicit_header);
            status.invert_iq_rx = Some(config.invert_iq_rx);
            status.invert_iq_tx = Some(config.invert_iq_tx);
        }

        let mut sync_word = [0u8; 2];
        status.sync_word = self
            .read_register(registers::REG_LORA_SYNC_WORD_MSB, &mut sync_word)
            .ok()
            .map(|_| u16::from_be_bytes(sync_word));

        let mut rx_gain = [0u8];
        if self.read_register(registers::REG_RX_GAIN, &mut rx_gain).is_ok() {
            status.rx_gain = Some(rx_gain[0]);
            status.rx_boosted = Some(rx_gain[0] == RX_GAIN_BOOSTED);
        }

        status.detail = ChipDetail::Sx1262 {
            raw_status,
            command_status: raw_status.map(|s| (s >> 1) & 0x07),
            device_errors: self.get_device_errors().ok(),
        };

        status
    }

    fn transmit(&mut self, buffer: &[u8]) -> Result<(), ModemError> {
        if buffer.len() > self.max_payload() {
            return Err(ModemError::PayloadTooLarge(buffer.len()));
        }

        self.write_command(commands::SET_STANDBY, &[STDBY_RC])?;
        self.rx_armed = false;

        let invert_iq = self.config.as_ref().map_or(false, |c| c.invert_iq_tx);
        self.set_packet_params(buffer.len() as u8, invert_iq)?;

        // Write data to buffer at offset 0
        let mut frame: Vec<u8, BUFFER_SIZE> = Vec::new();
        frame
            .push(0x00)
            .map_err(|_| ModemError::PayloadTooLarge(buffer.len()))?;
        frame
            .extend_from_slice(buffer)
            .map_err(|_| ModemError::PayloadTooLarge(buffer.len()))?;
        self.write_command(commands::WRITE_BUFFER, &frame)?;

        self.clear_irq_status(IRQ_ALL)?;

        // Start transmission without chip timeout
        self.write_command(commands::SET_TX, &[0x00, 0x00, 0x00])?;

        // Wait for TX done interrupt
        let timeout_ms = self.tx_timeout_ms(buffer.len());
        let mut waited = 0;
        while !self.dio1.is_high().map_err(|_| ModemError::Gpio)? {
            if waited >= timeout_ms {
                warn!("SX1262 TX done not signalled after {} ms", waited);
                self.write_command(commands::SET_STANDBY, &[STDBY_RC])?;
                return Err(ModemError::Timeout);
            }
            self.delay.delay_ms(1);
            waited += 1;
        }

        let irq = self.get_irq_status()?;
        self.clear_irq_status(IRQ_ALL)?;
        if irq & IRQ_TX_DONE == 0 {
            warn!("SX1262 TX ended with IRQ 0x{:04X}", irq);
            return Err(ModemError::Timeout);
        }

        debug!("SX1262 sent {} bytes", buffer.len());
        Ok(())
    }

    fn try_receive(&mut self, buffer: &mut [u8]) -> nb::Result<usize, ModemError> {
        if !self.rx_armed {
            self.arm_receiver()?;
            return Err(nb::Error::WouldBlock);
        }

        if !self.dio1.is_high().map_err(|_| ModemError::Gpio)? {
            return Err(nb::Error::WouldBlock);
        }

        let irq = self.get_irq_status()?;
        self.clear_irq_status(IRQ_ALL)?;

        if irq & IRQ_RX_DONE == 0 {
            return Err(nb::Error::WouldBlock);
        }
        if irq & (IRQ_CRC_ERR | IRQ_HEADER_ERR) != 0 {
            warn!("SX1262 dropped frame with IRQ 0x{:04X}", irq);
            return Err(nb::Error::WouldBlock);
        }

        let mut rx_status = [0u8; 2];
        self.read_command(&[commands::GET_RX_BUFFER_STATUS], &mut rx_status)?;
        let [len, start] = rx_status;
        let len = len as usize;
        if len > buffer.len() {
            return Err(nb::Error::Other(ModemError::PayloadTooLarge(len)));
        }

        self.read_command(&[commands::READ_BUFFER, start], &mut buffer[..len])?;

        debug!("SX1262 received {} bytes", len);
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
        let mut status = [0u8; 3];
        self.read_command(&[commands::GET_PKT_STATUS], &mut status)?;
        Ok(-i16::from(status[0]) / 2)
    }

    fn last_snr(&mut self) -> Result<i8, ModemError> {
        let mut status = [0u8; 3];
        self.read_command(&[commands::GET_PKT_STATUS], &mut status)?;
        Ok((status[1] as i8) / 4)
    }

    fn sleep(&mut self) -> Result<(), ModemError> {
        self.rx_armed = false;
        // Warm start keeps the configuration
        self.write_command(commands::SET_SLEEP, &[0x04])
    }

    fn standby(&mut self) -> Result<(), ModemError> {
        self.rx_armed = false;
        self.write_command(commands::SET_STANDBY, &[STDBY_RC])
    }
}
