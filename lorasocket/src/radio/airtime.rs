//! LoRa time-on-air
//!
//! Integer form of the Semtech airtime formula (SX1276 datasheet 4.1.1.7,
//! SX1262 datasheet 6.1.4), used to bound how long a driver waits for TX done.

use crate::config::ModemConfig;

/// Symbol duration in microseconds
pub fn symbol_duration_us(spreading_factor: u8, bandwidth: u32) -> u64 {
    if bandwidth == 0 {
        return 0;
    }
    (1u64 << spreading_factor) * 1_000_000 / bandwidth as u64
}

/// Low data rate optimization is mandated above 16 ms symbols
pub fn low_data_rate_optimize(spreading_factor: u8, bandwidth: u32) -> bool {
    symbol_duration_us(spreading_factor, bandwidth) > 16_000
}

/// Time on air of a `payload_len` byte frame in microseconds
pub fn airtime_us(config: &ModemConfig, payload_len: usize) -> u64 {
    let sf = config.modulation.spreading_factor as i64;
    let bw = config.modulation.bandwidth;
    let t_sym = symbol_duration_us(config.modulation.spreading_factor, bw);

    // (preamble + 4.25) symbols
    let preamble_us = (4 * config.preamble_len as u64 + 17) * t_sym / 4;

    let de = low_data_rate_optimize(config.modulation.spreading_factor, bw) as i64;
    let h = config.implicit_header as i64;
    let crc = config.crc_enabled as i64;

    let numerator = 8 * payload_len as i64 - 4 * sf + 28 + 16 * crc - 20 * h;
    let denominator = 4 * (sf - 2 * de);
    let blocks = if numerator > 0 && denominator > 0 {
        (numerator + denominator - 1) / denominator
    } else {
        0
    };
    let payload_symbols = 8 + blocks as u64 * config.modulation.coding_rate as u64;

    preamble_us + payload_symbols * t_sym
}

/// Time on air in milliseconds, rounded up
pub fn airtime_ms(config: &ModemConfig, payload_len: usize) -> u32 {
    ((airtime_us(config, payload_len) + 999) / 1000) as u32
}
