use lorasocket::{
    config::{ConfigError, ModemConfig},
    diagnostics::report,
    radio::{ChipDetail, ModemDriver, ModemError, OpMode, SX1262, SX1276},
};

use mock::{FakePin, NoopDelay, Sx1262Spi, Sx1276Spi};

type Sx1276Radio = SX1276<Sx1276Spi, FakePin, FakePin, FakePin, NoopDelay>;
type Sx1262Radio = SX1262<Sx1262Spi, FakePin, FakePin, FakePin, FakePin, NoopDelay>;

fn sx1276() -> (Sx1276Radio, Sx1276Spi, FakePin) {
    let spi = Sx1276Spi::new();
    let dio0 = FakePin::new(false);
    let radio = SX1276::new(
        spi.clone(),
        FakePin::new(true),
        FakePin::new(true),
        dio0.clone(),
        NoopDelay::new(),
    )
    .unwrap();
    (radio, spi, dio0)
}

fn sx1276_config() -> ModemConfig {
    // SX1276 PA_BOOST tops out at 20 dBm
    ModemConfig::default().with_power(17)
}

fn sx1262() -> (Sx1262Radio, Sx1262Spi, FakePin) {
    let dio1 = FakePin::new(false);
    let spi = Sx1262Spi::new(dio1.clone());
    let radio = SX1262::new(
        spi.clone(),
        FakePin::new(true),
        FakePin::new(true),
        FakePin::new(false),
        dio1.clone(),
        NoopDelay::new(),
    )
    .unwrap();
    (radio, spi, dio1)
}

#[test]
fn test_sx1276_rejects_wrong_silicon() {
    let spi = Sx1276Spi::new();
    spi.0.borrow_mut().regs[0x42] = 0x22;
    let result = SX1276::new(
        spi,
        FakePin::new(true),
        FakePin::new(true),
        FakePin::new(false),
        NoopDelay::new(),
    );
    assert!(matches!(result, Err(ModemError::Hardware)));
}

#[test]
fn test_sx1276_configure_writes_registers() {
    let (mut radio, spi, _) = sx1276();
    radio.configure(&sx1276_config()).unwrap();

    let chip = spi.0.borrow();
    // 434 MHz
    assert_eq!(&chip.regs[0x06..=0x08], &[0x6C, 0x80, 0x00]);
    // 125 kHz, 4/5, explicit header
    assert_eq!(chip.regs[0x1D], 0x72);
    // SF12, CRC on
    assert_eq!(chip.regs[0x1E], 0xC4);
    // Low data rate optimization, AGC auto
    assert_eq!(chip.regs[0x26], 0x0C);
    assert_eq!(chip.regs[0x39], 0x12);
    assert_eq!(chip.regs[0x0C], 0x23);
    assert_eq!(chip.regs[0x09], 0xFF);
    assert_eq!(chip.regs[0x4D], 0x84);
    assert_eq!(chip.regs[0x01], 0x81);
}

#[test]
fn test_sx1276_invalid_config_touches_nothing() {
    let (mut radio, spi, _) = sx1276();
    let writes_before = spi.0.borrow().writes.len();

    let result = radio.configure(&ModemConfig::default());
    assert_eq!(result, Err(ModemError::Config(ConfigError::Power(22))));

    let result = radio.configure(&sx1276_config().with_modulation(6, 125_000, 5));
    assert_eq!(result, Err(ModemError::Config(ConfigError::ExplicitHeaderAtSf6)));

    assert_eq!(spi.0.borrow().writes.len(), writes_before);
}

#[test]
fn test_sx1276_diagnostics_read_back() {
    let (mut radio, spi, _) = sx1276();
    radio.configure(&sx1276_config()).unwrap();
    let writes_before = spi.0.borrow().writes.len();

    let status = radio.read_diagnostics();
    assert_eq!(status.op_mode, Some(OpMode::StandbyRc));
    assert_eq!(status.frequency, Some(434_000_000));
    assert_eq!(status.spreading_factor, Some(12));
    assert_eq!(status.bandwidth, Some(125_000));
    assert_eq!(status.coding_rate, Some(5));
    assert_eq!(status.preamble_len, Some(10));
    assert_eq!(status.power, Some(17));
    assert_eq!(status.crc_enabled, Some(true));
    assert_eq!(status.implicit_header, Some(false));
    assert_eq!(status.invert_iq_rx, Some(false));
    assert_eq!(status.sync_word, Some(0x12));
    assert_eq!(status.rx_boosted, Some(true));
    assert!(matches!(
        status.detail,
        ChipDetail::Sx1276 {
            version: Some(0x12),
            ..
        }
    ));

    // Reading never writes
    assert_eq!(spi.0.borrow().writes.len(), writes_before);
}

#[test]
fn test_sx1276_report_survives_failed_reads() {
    let (mut radio, spi, _) = sx1276();
    radio.configure(&sx1276_config()).unwrap();
    spi.0.borrow_mut().failing_reads = vec![0x39, 0x42, 0x1D];

    let text = report(&mut radio);
    assert_eq!(text.lines().count(), 18);
    assert!(text.contains("Sync word:        <unavailable>\n"));
    assert!(text.contains("Version:          <unavailable>\n"));
    assert!(text.contains("Bandwidth:        <unavailable>\n"));
    assert!(text.contains("Spreading factor: SF12\n"));
    assert!(text.contains("Frequency:        434.000 MHz\n"));
}

#[test]
fn test_sx1276_transmit() {
    let (mut radio, spi, dio0) = sx1276();
    radio.configure(&sx1276_config()).unwrap();
    dio0.set(true);

    radio.transmit(&[0x18, 0x00, 0x00, 0x01]).unwrap();

    let chip = spi.0.borrow();
    assert_eq!(&chip.fifo[..4], &[0x18, 0x00, 0x00, 0x01]);
    assert_eq!(chip.regs[0x22], 4);
    assert_eq!(chip.regs[0x01], 0x83);
    assert!(chip.writes.contains(&(0x12, 0x08)));
}

#[test]
fn test_sx1276_transmit_errors() {
    let (mut radio, _, _) = sx1276();
    radio.configure(&sx1276_config()).unwrap();

    assert_eq!(
        radio.transmit(&[0u8; 256]),
        Err(ModemError::PayloadTooLarge(256))
    );
    // DIO0 never rises
    assert_eq!(radio.transmit(&[1, 2, 3]), Err(ModemError::Timeout));
}

#[test]
fn test_sx1276_receive() {
    let (mut radio, spi, dio0) = sx1276();
    radio.configure(&sx1276_config()).unwrap();

    let mut buffer = [0u8; 255];
    assert!(matches!(radio.try_receive(&mut buffer), Err(nb::Error::WouldBlock)));
    assert_eq!(spi.0.borrow().regs[0x01], 0x85);

    spi.0.borrow_mut().deliver(&[0x18, 0x18, 0x00, 0x00, 0x01, 0x10, 0x18], false);
    dio0.set(true);

    let len = radio.try_receive(&mut buffer).unwrap();
    assert_eq!(&buffer[..len], &[0x18, 0x18, 0x00, 0x00, 0x01, 0x10, 0x18]);
    assert_eq!(spi.0.borrow().regs[0x12], 0);

    // Flags are cleared, nothing further pending
    assert!(matches!(radio.try_receive(&mut buffer), Err(nb::Error::WouldBlock)));
}

#[test]
fn test_sx1276_drops_crc_errors() {
    let (mut radio, spi, dio0) = sx1276();
    radio.configure(&sx1276_config()).unwrap();

    let mut buffer = [0u8; 255];
    let _ = radio.try_receive(&mut buffer);
    spi.0.borrow_mut().deliver(&[1, 2, 3, 4], true);
    dio0.set(true);

    assert!(matches!(radio.try_receive(&mut buffer), Err(nb::Error::WouldBlock)));
    assert_eq!(radio.receive(&mut buffer, 50), Err(ModemError::Timeout));
}

#[test]
fn test_sx1276_spi_failure() {
    let (mut radio, spi, _) = sx1276();
    spi.0.borrow_mut().broken = true;
    assert_eq!(radio.configure(&sx1276_config()), Err(ModemError::Spi));
}

#[test]
fn test_sx1262_stuck_busy() {
    let dio1 = FakePin::new(false);
    let result = SX1262::new(
        Sx1262Spi::new(dio1.clone()),
        FakePin::new(true),
        FakePin::new(true),
        FakePin::new(true),
        dio1,
        NoopDelay::new(),
    );
    assert!(matches!(result, Err(ModemError::Busy)));
}

#[test]
fn test_sx1262_configure_commands() {
    let (mut radio, spi, _) = sx1262();
    radio.configure(&ModemConfig::default()).unwrap();

    let chip = spi.0.borrow();
    assert_eq!(chip.sent(0x86).last().unwrap().as_slice(), &[0x86, 0x1B, 0x20, 0x00, 0x00]);
    assert_eq!(chip.sent(0x98).last().unwrap().as_slice(), &[0x98, 0x6B, 0x6F]);
    assert_eq!(chip.sent(0x8E).last().unwrap().as_slice(), &[0x8E, 22, 0x02]);
    // SF12, 125 kHz, 4/5, LDRO on
    assert_eq!(chip.sent(0x8B).last().unwrap().as_slice(), &[0x8B, 12, 0x04, 0x01, 0x01]);
    // Preamble 10, explicit header, CRC on, standard IQ
    assert_eq!(
        chip.sent(0x8C).last().unwrap().as_slice(),
        &[0x8C, 0x00, 0x0A, 0x00, 0xFF, 0x01, 0x00]
    );
    assert_eq!(chip.regs[&0x0740], 0x14);
    assert_eq!(chip.regs[&0x0741], 0x24);
    assert_eq!(chip.regs[&0x08AC], 0x96);
}

#[test]
fn test_sx1262_invalid_config_touches_nothing() {
    let (mut radio, spi, _) = sx1262();
    let commands_before = spi.0.borrow().commands.len();

    let result = radio.configure(&ModemConfig::default().with_modulation(4, 125_000, 5));
    assert_eq!(result, Err(ModemError::Config(ConfigError::SpreadingFactor(4))));
    let result = radio.configure(&ModemConfig::default().with_frequency(1_000_000_000));
    assert_eq!(result, Err(ModemError::Config(ConfigError::Frequency(1_000_000_000))));

    assert_eq!(spi.0.borrow().commands.len(), commands_before);
}

#[test]
fn test_sx1262_diagnostics() {
    let (mut radio, spi, _) = sx1262();
    radio.configure(&ModemConfig::default()).unwrap();
    spi.0.borrow_mut().device_errors = 0x0040;
    let commands_before = spi.0.borrow().commands.len();

    let status = radio.read_diagnostics();
    assert_eq!(status.op_mode, Some(OpMode::StandbyRc));
    assert_eq!(status.frequency, Some(434_000_000));
    assert_eq!(status.spreading_factor, Some(12));
    assert_eq!(status.power, Some(22));
    assert_eq!(status.sync_word, Some(0x1424));
    assert_eq!(status.rx_gain, Some(0x96));
    assert_eq!(status.rx_boosted, Some(true));
    assert_eq!(
        status.detail,
        ChipDetail::Sx1262 {
            raw_status: Some(0x20),
            command_status: Some(0),
            device_errors: Some(0x0040),
        }
    );

    assert_eq!(spi.0.borrow().commands.len(), commands_before);
}

#[test]
fn test_sx1262_report_with_dead_bus() {
    let (mut radio, spi, _) = sx1262();
    radio.configure(&ModemConfig::default()).unwrap();
    spi.0.borrow_mut().broken = true;

    let text = report(&mut radio);
    assert!(text.starts_with("=== SX1262 diagnostics ===\n"));
    assert_eq!(text.lines().count(), 18);
    assert!(text.contains("Mode:             <unavailable>\n"));
    assert!(text.contains("Sync word:        <unavailable>\n"));
    assert!(text.contains("Device errors:    <unavailable>\n"));
    // Modulation comes from the applied configuration
    assert!(text.contains("Frequency:        434.000 MHz\n"));
}

#[test]
fn test_sx1262_transmit() {
    let (mut radio, spi, _) = sx1262();
    radio.configure(&ModemConfig::default()).unwrap();

    radio.transmit(&[0x18, 0x18, 0x00, 0x00, 0x01]).unwrap();

    let chip = spi.0.borrow();
    assert_eq!(&chip.buffer[..5], &[0x18, 0x18, 0x00, 0x00, 0x01]);
    assert_eq!(
        chip.sent(0x8C).last().unwrap().as_slice(),
        &[0x8C, 0x00, 0x0A, 0x00, 5, 0x01, 0x00]
    );
    assert_eq!(chip.irq, 0);
}

#[test]
fn test_sx1262_transmit_timeout() {
    let (mut radio, spi, _) = sx1262();
    radio.configure(&ModemConfig::default()).unwrap();
    spi.0.borrow_mut().tx_completes = false;

    assert_eq!(radio.transmit(&[1, 2, 3]), Err(ModemError::Timeout));
}

#[test]
fn test_sx1262_receive() {
    let (mut radio, spi, dio1) = sx1262();
    radio.configure(&ModemConfig::default()).unwrap();

    let mut buffer = [0u8; 255];
    assert!(matches!(radio.try_receive(&mut buffer), Err(nb::Error::WouldBlock)));
    assert_eq!(
        spi.0.borrow().sent(0x82).last().unwrap().as_slice(),
        &[0x82, 0xFF, 0xFF, 0xFF]
    );

    spi.0.borrow_mut().deliver(b"\x18\x18\x00\x00\x01\x10\x18", false);
    let len = radio.try_receive(&mut buffer).unwrap();
    assert_eq!(&buffer[..len], b"\x18\x18\x00\x00\x01\x10\x18");
    assert!(!dio1.get());

    spi.0.borrow_mut().deliver(&[9, 9, 9, 9, 9], true);
    assert!(matches!(radio.try_receive(&mut buffer), Err(nb::Error::WouldBlock)));
}

#[test]
fn test_sx1262_packet_quality() {
    let (mut radio, spi, _) = sx1262();
    spi.0.borrow_mut().packet_status = [100, 0xF8, 0];
    assert_eq!(radio.last_rssi(), Ok(-50));
    assert_eq!(radio.last_snr(), Ok(-2));
}
