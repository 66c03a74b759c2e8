//! Chunk framing
//!
//! Every chunk on the air carries a small header in front of its payload:
//!
//! ```text
//! Plain:          [sensor_id][msg_id][seq][total][payload ...]
//! SensorPrefixed: [sensor_id][sensor_id][msg_id][seq][total][payload ...]
//! ```
//!
//! `total == 0` marks a legacy unchunked packet that forms a message on its own.
//! Otherwise `seq` must lie in `0..total`.

use core::fmt;

use heapless::Vec;

use crate::radio::ModemVariant;

/// Length-tagged sub-fields carried inside payloads
pub mod field;

/// Largest frame either modem can put on the air
pub const MAX_PACKET_LEN: usize = 255;

/// Size of the plain chunk header
pub const HEADER_LEN: usize = 4;

/// Encoded frame buffer
pub type Frame = Vec<u8, MAX_PACKET_LEN>;

/// Packet framing error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FormatError {
    /// Fewer bytes than the header needs
    TooShort {
        /// Bytes present
        len: usize,
        /// Header length of the profile
        needed: usize,
    },
    /// `seq` not below a non-zero `total`
    SequenceOutOfRange {
        /// Chunk index
        seq: u8,
        /// Chunk count
        total: u8,
    },
    /// Frame would exceed the modem's frame limit
    PayloadTooLarge(usize),
    /// Sensor-prefixed frame whose prefix differs from the header
    PrefixMismatch {
        /// Leading prefix byte
        prefix: u8,
        /// Sensor id in the header
        sensor_id: u8,
    },
    /// Length tag points past the end of the buffer
    Truncated,
    /// String field is not UTF-8
    InvalidUtf8,
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::TooShort { len, needed } => {
                write!(f, "packet too short: {} bytes, header needs {}", len, needed)
            }
            FormatError::SequenceOutOfRange { seq, total } => {
                write!(f, "chunk {} out of range for {} chunks", seq, total)
            }
            FormatError::PayloadTooLarge(len) => {
                write!(f, "frame of {} bytes exceeds {}", len, MAX_PACKET_LEN)
            }
            FormatError::PrefixMismatch { prefix, sensor_id } => write!(
                f,
                "prefix 0x{:02X} does not match sensor id 0x{:02X}",
                prefix, sensor_id
            ),
            FormatError::Truncated => write!(f, "length-tagged field truncated"),
            FormatError::InvalidUtf8 => write!(f, "string field is not valid UTF-8"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FormatError {}

/// Header layout used on the air
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameProfile {
    /// 4-byte header
    Plain,
    /// Sensor id byte followed by the 4-byte header
    SensorPrefixed,
}

impl FrameProfile {
    /// Profile spoken by the given modem variant
    pub fn for_variant(variant: ModemVariant) -> Self {
        match variant {
            ModemVariant::Sx1276 => FrameProfile::Plain,
            ModemVariant::Sx1262 => FrameProfile::SensorPrefixed,
        }
    }

    /// Header bytes in front of the payload
    pub const fn header_len(self) -> usize {
        match self {
            FrameProfile::Plain => HEADER_LEN,
            FrameProfile::SensorPrefixed => HEADER_LEN + 1,
        }
    }

    /// Largest payload a single frame can carry
    pub const fn max_payload(self) -> usize {
        MAX_PACKET_LEN - self.header_len()
    }

    /// Encode one chunk
    pub fn encode(
        self,
        sensor_id: u8,
        msg_id: u8,
        seq: u8,
        total: u8,
        payload: &[u8],
    ) -> Result<Frame, FormatError> {
        check_sequence(seq, total)?;

        let len = self.header_len() + payload.len();
        if len > MAX_PACKET_LEN {
            return Err(FormatError::PayloadTooLarge(len));
        }

        let mut frame = Frame::new();
        if self == FrameProfile::SensorPrefixed {
            frame
                .push(sensor_id)
                .map_err(|_| FormatError::PayloadTooLarge(len))?;
        }
        frame
            .extend_from_slice(&[sensor_id, msg_id, seq, total])
            .map_err(|_| FormatError::PayloadTooLarge(len))?;
        frame
            .extend_from_slice(payload)
            .map_err(|_| FormatError::PayloadTooLarge(len))?;
        Ok(frame)
    }

    /// Decode one chunk
    pub fn decode(self, bytes: &[u8]) -> Result<Packet, FormatError> {
        let needed = self.header_len();
        if bytes.len() < needed {
            return Err(FormatError::TooShort {
                len: bytes.len(),
                needed,
            });
        }
        if bytes.len() > MAX_PACKET_LEN {
            return Err(FormatError::PayloadTooLarge(bytes.len()));
        }

        let header = match self {
            FrameProfile::Plain => &bytes[..HEADER_LEN],
            FrameProfile::SensorPrefixed => {
                let header = &bytes[1..needed];
                if bytes[0] != header[0] {
                    return Err(FormatError::PrefixMismatch {
                        prefix: bytes[0],
                        sensor_id: header[0],
                    });
                }
                header
            }
        };

        Packet::new(header[0], header[1], header[2], header[3], &bytes[needed..])
    }
}

pub(crate) fn check_sequence(seq: u8, total: u8) -> Result<(), FormatError> {
    if total > 0 && seq >= total {
        return Err(FormatError::SequenceOutOfRange { seq, total });
    }
    Ok(())
}

/// One chunk of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Originating sensor
    pub sensor_id: u8,
    /// Message this chunk belongs to
    pub msg_id: u8,
    /// Chunk index
    pub seq: u8,
    /// Chunk count, 0 for unchunked packets
    pub total: u8,
    /// Chunk payload
    pub payload: Vec<u8, MAX_PACKET_LEN>,
}

impl Packet {
    /// Create a packet, checking the seq/total invariant
    pub fn new(
        sensor_id: u8,
        msg_id: u8,
        seq: u8,
        total: u8,
        payload: &[u8],
    ) -> Result<Self, FormatError> {
        check_sequence(seq, total)?;
        let payload =
            Vec::from_slice(payload).map_err(|_| FormatError::PayloadTooLarge(payload.len()))?;
        Ok(Self {
            sensor_id,
            msg_id,
            seq,
            total,
            payload,
        })
    }

    /// Legacy packet carrying a whole message without chunk metadata
    pub fn is_unchunked(&self) -> bool {
        self.total == 0
    }

    /// Encode under the given profile
    pub fn encode(&self, profile: FrameProfile) -> Result<Frame, FormatError> {
        profile.encode(self.sensor_id, self.msg_id, self.seq, self.total, &self.payload)
    }
}

/// Encode one chunk with the plain 4-byte header
pub fn encode(
    sensor_id: u8,
    msg_id: u8,
    seq: u8,
    total: u8,
    payload: &[u8],
) -> Result<Frame, FormatError> {
    FrameProfile::Plain.encode(sensor_id, msg_id, seq, total, payload)
}

/// Decode one chunk with the plain 4-byte header
pub fn decode(bytes: &[u8]) -> Result<Packet, FormatError> {
    FrameProfile::Plain.decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_header_then_payload() {
        let frame = encode(24, 0, 0, 1, &[0x00, 0x01, 0x10, 0x18]).unwrap();
        assert_eq!(&frame[..], &[0x18, 0x00, 0x00, 0x01, 0x00, 0x01, 0x10, 0x18]);
    }

    #[test]
    fn decodes_logged_seven_byte_buffer() {
        let packet = decode(b"\x18\x18\x00\x00\x01\x10\x18").unwrap();
        assert_eq!(packet.sensor_id, 24);
        assert_eq!(packet.msg_id, 24);
        assert_eq!(packet.seq, 0);
        assert_eq!(packet.total, 0);
        assert!(packet.is_unchunked());
        assert_eq!(&packet.payload[..], &[0x01, 0x10, 0x18]);
    }

    #[test]
    fn sensor_prefixed_reads_the_same_buffer_as_one_chunk() {
        let packet = FrameProfile::SensorPrefixed
            .decode(b"\x18\x18\x00\x00\x01\x10\x18")
            .unwrap();
        assert_eq!(packet.sensor_id, 24);
        assert_eq!(packet.msg_id, 0);
        assert_eq!(packet.seq, 0);
        assert_eq!(packet.total, 1);
        assert_eq!(&packet.payload[..], &[0x10, 0x18]);
    }

    #[test]
    fn sensor_prefixed_rejects_foreign_prefix() {
        let err = FrameProfile::SensorPrefixed
            .decode(&[0x01, 0x18, 0x00, 0x00, 0x01])
            .unwrap_err();
        assert_eq!(
            err,
            FormatError::PrefixMismatch {
                prefix: 0x01,
                sensor_id: 0x18
            }
        );
    }

    #[test]
    fn short_buffers_are_rejected() {
        for len in 0..HEADER_LEN {
            let bytes = [0u8; HEADER_LEN];
            assert_eq!(
                decode(&bytes[..len]),
                Err(FormatError::TooShort {
                    len,
                    needed: HEADER_LEN
                })
            );
        }
        assert!(matches!(
            FrameProfile::SensorPrefixed.decode(&[1, 1, 0, 0]),
            Err(FormatError::TooShort { len: 4, needed: 5 })
        ));
    }

    #[test]
    fn header_only_packet() {
        let frame = encode(7, 3, 0, 1, &[]).unwrap();
        assert_eq!(&frame[..], &[7, 3, 0, 1]);
        let packet = decode(&frame).unwrap();
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn seq_must_be_below_total() {
        assert_eq!(
            encode(1, 1, 2, 2, b"x"),
            Err(FormatError::SequenceOutOfRange { seq: 2, total: 2 })
        );
        assert_eq!(
            decode(&[1, 1, 5, 3]),
            Err(FormatError::SequenceOutOfRange { seq: 5, total: 3 })
        );
    }

    #[test]
    fn payload_limit_depends_on_profile() {
        let payload = [0xAA; 251];
        assert!(encode(1, 1, 0, 1, &payload).is_ok());
        assert_eq!(
            FrameProfile::SensorPrefixed.encode(1, 1, 0, 1, &payload),
            Err(FormatError::PayloadTooLarge(256))
        );
        assert_eq!(FrameProfile::SensorPrefixed.max_payload(), 250);
    }

    #[test]
    fn profile_follows_modem_variant() {
        assert_eq!(FrameProfile::for_variant(ModemVariant::Sx1276), FrameProfile::Plain);
        assert_eq!(
            FrameProfile::for_variant(ModemVariant::Sx1262),
            FrameProfile::SensorPrefixed
        );
    }
}
