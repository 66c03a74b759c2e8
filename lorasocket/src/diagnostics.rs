//! Human-readable modem status
//!
//! ```text
//! === SX1262 diagnostics ===
//! Mode:             STDBY_RC
//! Frequency:        434.000 MHz
//! Spreading factor: SF12
//! ...
//! ```

use core::fmt::{self, Display, Write};

use heapless::String;

use crate::radio::{ChipDetail, ModemDriver, ModemStatus};

/// Capacity of a rendered report
pub const REPORT_LEN: usize = 1024;

const UNAVAILABLE: &str = "<unavailable>";

/// Read a fresh snapshot from `driver` and render it
pub fn report<D: ModemDriver>(driver: &mut D) -> String<REPORT_LEN> {
    let status = driver.read_diagnostics();
    let mut out = String::new();
    // Every line is bounded, REPORT_LEN holds the longest report
    let _ = write!(out, "{}", Report(&status));
    out
}

/// Display adapter for a [`ModemStatus`]
pub struct Report<'a>(pub &'a ModemStatus);

struct Field<T>(Option<T>);

impl<T: Display> Display for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(value) => value.fmt(f),
            None => f.write_str(UNAVAILABLE),
        }
    }
}

struct OnOff(bool);

impl Display for OnOff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.0 { "on" } else { "off" })
    }
}

struct Hex<T>(T);

impl<T: fmt::UpperHex> Display for Hex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

struct Mhz(u32);

impl Display for Mhz {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03} MHz", self.0 / 1_000_000, (self.0 % 1_000_000) / 1_000)
    }
}

struct Khz(u32);

impl Display for Khz {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 % 1_000 {
            0 => write!(f, "{} kHz", self.0 / 1_000),
            rest => write!(f, "{}.{} kHz", self.0 / 1_000, rest / 100),
        }
    }
}

impl Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        writeln!(f, "=== {} diagnostics ===", s.variant.name())?;
        writeln!(f, "Mode:             {}", Field(s.op_mode.map(|m| m.label())))?;
        writeln!(f, "Frequency:        {}", Field(s.frequency.map(Mhz)))?;
        writeln!(
            f,
            "Spreading factor: {}",
            Field(s.spreading_factor.map(SfLabel))
        )?;
        writeln!(f, "Bandwidth:        {}", Field(s.bandwidth.map(Khz)))?;
        writeln!(
            f,
            "Coding rate:      {}",
            Field(s.coding_rate.map(CrLabel))
        )?;
        writeln!(f, "Preamble:         {}", Field(s.preamble_len))?;
        writeln!(f, "Output power:     {}", Field(s.power.map(Dbm)))?;
        writeln!(f, "CRC:              {}", Field(s.crc_enabled.map(OnOff)))?;
        writeln!(
            f,
            "Header:           {}",
            Field(s.implicit_header.map(|implicit| if implicit { "implicit" } else { "explicit" }))
        )?;
        writeln!(f, "Invert IQ RX:     {}", Field(s.invert_iq_rx.map(OnOff)))?;
        writeln!(f, "Invert IQ TX:     {}", Field(s.invert_iq_tx.map(OnOff)))?;
        writeln!(f, "Sync word:        {}", Field(s.sync_word.map(Hex)))?;
        writeln!(f, "RX gain:          {}", Field(s.rx_gain.map(Hex)))?;
        writeln!(f, "RX boosted:       {}", Field(s.rx_boosted.map(OnOff)))?;

        match s.detail {
            ChipDetail::Sx1276 {
                version,
                raw_op_mode,
                irq_flags,
            } => {
                writeln!(f, "Version:          {}", Field(version.map(Hex)))?;
                writeln!(f, "RegOpMode:        {}", Field(raw_op_mode.map(Hex)))?;
                writeln!(f, "IRQ flags:        {}", Field(irq_flags.map(Hex)))?;
            }
            ChipDetail::Sx1262 {
                raw_status,
                command_status,
                device_errors,
            } => {
                writeln!(f, "Status:           {}", Field(raw_status.map(Hex)))?;
                writeln!(f, "Command status:   {}", Field(command_status))?;
                writeln!(f, "Device errors:    {}", Field(device_errors.map(Hex16)))?;
            }
        }
        Ok(())
    }
}

struct SfLabel(u8);

impl Display for SfLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SF{}", self.0)
    }
}

struct CrLabel(u8);

impl Display for CrLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "4/{}", self.0)
    }
}

struct Dbm(i8);

impl Display for Dbm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} dBm", self.0)
    }
}

struct Hex16(u16);

impl Display for Hex16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::{ModemVariant, OpMode};

    #[test]
    fn empty_snapshot_renders_placeholders() {
        let status = ModemStatus::empty(ModemVariant::Sx1262);
        let mut out: String<REPORT_LEN> = String::new();
        write!(out, "{}", Report(&status)).unwrap();
        assert!(out.starts_with("=== SX1262 diagnostics ===\n"));
        assert_eq!(out.lines().count(), 18);
        assert!(out.lines().skip(1).all(|line| line.ends_with(UNAVAILABLE)));
    }

    #[test]
    fn values_are_formatted_with_units() {
        let mut status = ModemStatus::empty(ModemVariant::Sx1276);
        status.op_mode = Some(OpMode::StandbyRc);
        status.frequency = Some(434_000_000);
        status.bandwidth = Some(7_800);
        status.spreading_factor = Some(12);
        status.coding_rate = Some(5);
        status.power = Some(-4);
        status.sync_word = Some(0x12);

        let mut out: String<REPORT_LEN> = String::new();
        write!(out, "{}", Report(&status)).unwrap();
        assert!(out.contains("Mode:             STDBY_RC\n"));
        assert!(out.contains("Frequency:        434.000 MHz\n"));
        assert!(out.contains("Bandwidth:        7.8 kHz\n"));
        assert!(out.contains("Spreading factor: SF12\n"));
        assert!(out.contains("Coding rate:      4/5\n"));
        assert!(out.contains("Output power:     -4 dBm\n"));
        assert!(out.contains("Sync word:        0x12\n"));
        assert!(out.contains("Version:          <unavailable>\n"));
    }
}
