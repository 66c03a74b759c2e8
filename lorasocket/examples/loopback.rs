//! Sensor-to-gateway loopback on the host
//!
//! This example runs both ends of a link in one process:
//! - An in-memory modem pair standing in for two radios on the same channel
//! - A sensor thread sending a reading larger than one LoRa frame
//! - A gateway socket reassembling it and printing the modem report
//!
//! Run with `RUST_LOG=debug cargo run --example loopback` to see every chunk.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;
use std::time::Duration;

use embedded_hal::blocking::delay::DelayMs;
use log::info;
use lorasocket::{
    codec::field,
    config::{DutyCycleLimit, ModemConfig, SocketConfig},
    diagnostics,
    radio::{airtime, ModemDriver, ModemError, ModemStatus, ModemVariant},
    socket::{LoRaSocket, Message, SharedSocket},
};

const SENSOR_ID: u8 = 24;

/// Thread-sleep delay
struct StdDelay;

impl DelayMs<u32> for StdDelay {
    fn delay_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(ms as u64));
    }
}

/// One end of an in-memory radio link
struct LoopbackModem {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    config: Option<ModemConfig>,
}

impl LoopbackModem {
    fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = channel();
        let (b_tx, a_rx) = channel();
        (
            Self { tx: a_tx, rx: a_rx, config: None },
            Self { tx: b_tx, rx: b_rx, config: None },
        )
    }
}

impl ModemDriver for LoopbackModem {
    fn variant(&self) -> ModemVariant {
        ModemVariant::Sx1262
    }

    fn time_on_air_ms(&self, len: usize) -> u32 {
        let config = self.config.clone().unwrap_or_default();
        airtime::airtime_ms(&config, len)
    }

    fn configure(&mut self, config: &ModemConfig) -> Result<(), ModemError> {
        config.validate(&lorasocket::config::modem::SX1262_LIMITS)?;
        self.config = Some(config.clone());
        Ok(())
    }

    fn read_diagnostics(&mut self) -> ModemStatus {
        let mut status = ModemStatus::empty(ModemVariant::Sx1262);
        if let Some(config) = &self.config {
            status.frequency = Some(config.frequency);
            status.spreading_factor = Some(config.modulation.spreading_factor);
            status.bandwidth = Some(config.modulation.bandwidth);
            status.coding_rate = Some(config.modulation.coding_rate);
            status.power = Some(config.power);
            status.sync_word = Some(u16::from(config.sync_word));
        }
        status
    }

    fn transmit(&mut self, buffer: &[u8]) -> Result<(), ModemError> {
        self.tx.send(buffer.to_vec()).map_err(|_| ModemError::Hardware)
    }

    fn try_receive(&mut self, buffer: &mut [u8]) -> nb::Result<usize, ModemError> {
        let frame = self.rx.try_recv().map_err(|_| nb::Error::WouldBlock)?;
        buffer[..frame.len()].copy_from_slice(&frame);
        Ok(frame.len())
    }

    fn receive(&mut self, buffer: &mut [u8], timeout_ms: u32) -> Result<usize, ModemError> {
        let frame = self
            .rx
            .recv_timeout(Duration::from_millis(timeout_ms as u64))
            .map_err(|_| ModemError::Timeout)?;
        buffer[..frame.len()].copy_from_slice(&frame);
        Ok(frame.len())
    }

    fn last_rssi(&mut self) -> Result<i16, ModemError> {
        Ok(-40)
    }

    fn last_snr(&mut self) -> Result<i8, ModemError> {
        Ok(9)
    }

    fn sleep(&mut self) -> Result<(), ModemError> {
        Ok(())
    }

    fn standby(&mut self) -> Result<(), ModemError> {
        Ok(())
    }
}

fn on_message(message: &Message) {
    info!(
        "gateway got {} bytes from sensor {} (msg {})",
        message.payload.len(),
        message.sensor_id,
        message.msg_id
    );
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let (mut sensor_modem, mut gateway_modem) = LoopbackModem::pair();
    let modem_config = ModemConfig::for_variant(ModemVariant::Sx1262);
    sensor_modem.configure(&modem_config)?;
    gateway_modem.configure(&modem_config)?;

    let socket_config = SocketConfig::default()
        .with_tx_gap_ms(50)
        .with_read_timeout_ms(Some(5_000));

    // Sensors keep to 1% airtime per hour
    let sensor_config = socket_config.with_duty_cycle(DutyCycleLimit::default());
    let sensor = SharedSocket::new(LoRaSocket::new(sensor_modem, StdDelay, sensor_config));
    let mut gateway = LoRaSocket::new(gateway_modem, StdDelay, socket_config);
    gateway.subscribe(on_message);

    // A topic field followed by 600 bytes of samples: three chunks on the air
    let mut reading: heapless::Vec<u8, 640> = heapless::Vec::new();
    field::put_str(&mut reading, "sensor/24/vibration")?;
    for i in 0..600u32 {
        reading.push((i % 251) as u8).map_err(|_| "reading buffer full")?;
    }

    let sender = {
        let sensor = sensor.clone();
        thread::spawn(move || sensor.write(SENSOR_ID, &reading))
    };

    let message = gateway.receive_message()?;
    let msg_id = sender.join().map_err(|_| "sensor thread panicked")??;
    let (topic, samples) = field::take_str(&message.payload)?;
    println!(
        "msg {} on {}: {} samples",
        msg_id,
        topic,
        samples.len()
    );

    if let Some(remaining) = sensor.with(|socket| socket.airtime_remaining_ms())? {
        println!("sensor airtime left this hour: {} ms", remaining);
    }
    print!("{}", diagnostics::report(gateway.modem_mut()));
    Ok(())
}
