use lorasocket::{
    codec::{self, field, FormatError, FrameProfile, Packet, HEADER_LEN, MAX_PACKET_LEN},
    config::{
        modem::{SX1262_LIMITS, SX1276_LIMITS},
        ConfigError, ModemConfig, SocketConfig, TxAntenna,
    },
    radio::{airtime, ModemVariant},
};

#[test]
fn test_default_modem_config() {
    let config = ModemConfig::default();
    assert_eq!(config.frequency, 434_000_000);
    assert_eq!(config.modulation.spreading_factor, 12);
    assert_eq!(config.modulation.bandwidth, 125_000);
    assert_eq!(config.modulation.coding_rate, 5);
    assert_eq!(config.power, 22);
    assert_eq!(config.tx_antenna, TxAntenna::PaBoost);
    assert_eq!(config.sync_word, 0x12);
    assert_eq!(config.preamble_len, 10);
    assert!(config.crc_enabled);
    assert!(!config.implicit_header);
    assert!(config.rx_boost);
}

#[test]
fn test_default_socket_config() {
    let config = SocketConfig::default();
    assert_eq!(config.max_chunk_size, 240);
    assert_eq!(config.tx_gap_ms, 2_000);
    assert_eq!(config.read_timeout_ms, Some(60_000));
    assert_eq!(config.profile, None);

    let config = config.with_profile(FrameProfile::Plain).with_read_timeout_ms(None);
    assert_eq!(config.profile, Some(FrameProfile::Plain));
    assert_eq!(config.read_timeout_ms, None);
}

#[test]
fn test_config_validation_per_chip() {
    let config = ModemConfig::default().with_frequency(950_000_000);
    assert_eq!(config.validate(&SX1262_LIMITS), Ok(()));
    assert_eq!(
        config.clone().with_frequency(100_000_000).validate(&SX1262_LIMITS),
        Err(ConfigError::Frequency(100_000_000))
    );
    assert_eq!(
        config.with_power(-10).validate(&SX1262_LIMITS),
        Err(ConfigError::Power(-10))
    );

    let config = ModemConfig::default().with_power(20).with_modulation(7, 500_000, 8);
    assert_eq!(config.validate(&SX1276_LIMITS), Ok(()));
    assert_eq!(
        config.with_modulation(7, 500_000, 9).validate(&SX1276_LIMITS),
        Err(ConfigError::CodingRate(9))
    );
}

#[test]
fn test_encode_reference_frame() {
    let frame = codec::encode(24, 0, 0, 1, &[0x00, 0x01, 0x10, 0x18]).unwrap();
    assert_eq!(&frame[..], &[0x18, 0x00, 0x00, 0x01, 0x00, 0x01, 0x10, 0x18]);

    let frame = FrameProfile::SensorPrefixed
        .encode(24, 0, 0, 1, &[0x00, 0x01, 0x10, 0x18])
        .unwrap();
    assert_eq!(
        &frame[..],
        &[0x18, 0x18, 0x00, 0x00, 0x01, 0x00, 0x01, 0x10, 0x18]
    );
}

#[test]
fn test_decode_logged_frame() {
    let packet = codec::decode(&[0x18, 0x18, 0x00, 0x00, 0x01, 0x10, 0x18]).unwrap();
    assert_eq!(
        (packet.sensor_id, packet.msg_id, packet.seq, packet.total),
        (24, 24, 0, 0)
    );
    assert!(packet.is_unchunked());
}

#[test]
fn test_decode_rejects_short_frames() {
    for len in 0..HEADER_LEN {
        let frame = [1u8; HEADER_LEN];
        assert!(matches!(
            codec::decode(&frame[..len]),
            Err(FormatError::TooShort { .. })
        ));
    }
}

#[test]
fn test_packet_reencodes_identically() {
    let bytes = [0x05, 0x09, 0x02, 0x04, 0xDE, 0xAD];
    for profile in [FrameProfile::Plain, FrameProfile::SensorPrefixed] {
        let mut frame = heapless::Vec::<u8, MAX_PACKET_LEN>::new();
        if profile == FrameProfile::SensorPrefixed {
            frame.push(0x05).unwrap();
        }
        frame.extend_from_slice(&bytes).unwrap();

        let packet = profile.decode(&frame).unwrap();
        assert_eq!(packet, Packet::new(5, 9, 2, 4, &[0xDE, 0xAD]).unwrap());
        assert_eq!(packet.encode(profile).unwrap(), frame);
    }
}

#[test]
fn test_profile_for_variant() {
    assert_eq!(FrameProfile::for_variant(ModemVariant::Sx1276).header_len(), 4);
    assert_eq!(FrameProfile::for_variant(ModemVariant::Sx1262).header_len(), 5);
}

#[test]
fn test_string_fields() {
    let mut payload = heapless::Vec::<u8, 64>::new();
    field::put_str(&mut payload, "MQTT").unwrap();
    field::put_str(&mut payload, "sensor/24").unwrap();

    let (protocol, rest) = field::take_str(&payload).unwrap();
    let (topic, rest) = field::take_str(rest).unwrap();
    assert_eq!(protocol, "MQTT");
    assert_eq!(topic, "sensor/24");
    assert!(rest.is_empty());
}

#[test]
fn test_airtime_bounds_tx_wait() {
    let fast = ModemConfig::default().with_modulation(7, 250_000, 5);
    let slow = ModemConfig::default();
    let fast_ms = airtime::airtime_ms(&fast, MAX_PACKET_LEN);
    let slow_ms = airtime::airtime_ms(&slow, MAX_PACKET_LEN);
    assert!(fast_ms < 300);
    assert!(slow_ms > 8_000);
}
