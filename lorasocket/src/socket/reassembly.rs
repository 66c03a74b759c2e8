//! In-flight message table

use heapless::{FnvIndexMap, Vec};
use log::warn;

use super::{Message, SocketError};
use crate::codec::{check_sequence, Packet, MAX_PACKET_LEN};

/// Partial messages tracked at once
pub const MAX_INFLIGHT: usize = 4;

/// Chunks accepted per message
pub const MAX_CHUNKS: usize = 16;

/// Reassembled payload limit
pub const MAX_MESSAGE_LEN: usize = MAX_CHUNKS * crate::config::socket::DEFAULT_MAX_CHUNK_SIZE;

type Key = (u8, u8);

struct Partial {
    total: u8,
    stamp: u32,
    chunks: Vec<(u8, Vec<u8, MAX_PACKET_LEN>), MAX_CHUNKS>,
}

impl Partial {
    fn new(total: u8, stamp: u32) -> Self {
        Self {
            total,
            stamp,
            chunks: Vec::new(),
        }
    }

    fn store(&mut self, seq: u8, payload: Vec<u8, MAX_PACKET_LEN>) {
        if let Some(slot) = self.chunks.iter_mut().find(|slot| slot.0 == seq) {
            slot.1 = payload;
            return;
        }
        // seq < total <= MAX_CHUNKS, so a fresh seq always fits
        let _ = self.chunks.push((seq, payload));
    }

    fn is_complete(&self) -> bool {
        self.chunks.len() == self.total as usize
    }

    fn assemble(mut self, sensor_id: u8, msg_id: u8) -> Result<Message, SocketError> {
        self.chunks.sort_unstable_by_key(|(seq, _)| *seq);
        let len: usize = self.chunks.iter().map(|(_, p)| p.len()).sum();
        let mut payload = Vec::new();
        for (_, chunk) in self.chunks.iter() {
            payload
                .extend_from_slice(chunk)
                .map_err(|_| SocketError::PayloadTooLarge(len))?;
        }
        Ok(Message {
            sensor_id,
            msg_id,
            payload,
        })
    }
}

/// Collects chunks keyed by `(sensor_id, msg_id)` until a message is whole
pub struct Reassembler {
    inflight: FnvIndexMap<Key, Partial, MAX_INFLIGHT>,
    next_stamp: u32,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    /// Empty table
    pub fn new() -> Self {
        Self {
            inflight: FnvIndexMap::new(),
            next_stamp: 0,
        }
    }

    /// Partial messages currently held
    pub fn pending(&self) -> usize {
        self.inflight.len()
    }

    /// Drop every partial message
    pub fn clear(&mut self) {
        self.inflight.clear();
    }

    /// Add one chunk, returning the message it completes
    ///
    /// Chunks with `seq >= total` are rejected even when built by hand, so a
    /// completed message always holds exactly the seqs `0..total`.
    pub fn insert(&mut self, packet: Packet) -> Result<Option<Message>, SocketError> {
        check_sequence(packet.seq, packet.total)?;
        if packet.is_unchunked() {
            let payload = Vec::from_slice(&packet.payload)
                .map_err(|_| SocketError::PayloadTooLarge(packet.payload.len()))?;
            return Ok(Some(Message {
                sensor_id: packet.sensor_id,
                msg_id: packet.msg_id,
                payload,
            }));
        }
        if packet.total as usize > MAX_CHUNKS {
            return Err(SocketError::TooManyChunks(packet.total));
        }

        let key = (packet.sensor_id, packet.msg_id);
        let stamp = self.next_stamp;

        match self.inflight.get_mut(&key) {
            Some(entry) if entry.total != packet.total => {
                warn!(
                    "sensor {} msg {}: total changed {} -> {}, restarting",
                    packet.sensor_id, packet.msg_id, entry.total, packet.total
                );
                *entry = Partial::new(packet.total, stamp);
                self.next_stamp = self.next_stamp.wrapping_add(1);
            }
            Some(_) => {}
            None => {
                if self.inflight.len() == MAX_INFLIGHT {
                    self.evict_oldest();
                }
                // A slot was just freed
                let _ = self.inflight.insert(key, Partial::new(packet.total, stamp));
                self.next_stamp = self.next_stamp.wrapping_add(1);
            }
        }

        let complete = match self.inflight.get_mut(&key) {
            Some(entry) => {
                entry.store(packet.seq, packet.payload);
                entry.is_complete()
            }
            None => false,
        };

        if !complete {
            return Ok(None);
        }
        match self.inflight.remove(&key) {
            Some(entry) => entry.assemble(key.0, key.1).map(Some),
            None => Ok(None),
        }
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .inflight
            .iter()
            .max_by_key(|(_, entry)| self.next_stamp.wrapping_sub(entry.stamp))
            .map(|(key, _)| *key);
        if let Some(key) = oldest {
            warn!("evicting incomplete message: sensor {} msg {}", key.0, key.1);
            self.inflight.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FormatError;

    fn chunk(sensor_id: u8, msg_id: u8, seq: u8, total: u8, payload: &[u8]) -> Packet {
        Packet::new(sensor_id, msg_id, seq, total, payload).unwrap()
    }

    #[test]
    fn single_chunk_message() {
        let mut table = Reassembler::new();
        let message = table.insert(chunk(1, 7, 0, 1, b"abc")).unwrap().unwrap();
        assert_eq!((message.sensor_id, message.msg_id), (1, 7));
        assert_eq!(&message.payload[..], b"abc");
        assert_eq!(table.pending(), 0);
    }

    #[test]
    fn out_of_order_chunks_are_ordered_by_seq() {
        let mut table = Reassembler::new();
        assert!(table.insert(chunk(1, 1, 2, 3, b"ef")).unwrap().is_none());
        assert!(table.insert(chunk(1, 1, 0, 3, b"ab")).unwrap().is_none());
        let message = table.insert(chunk(1, 1, 1, 3, b"cd")).unwrap().unwrap();
        assert_eq!(&message.payload[..], b"abcdef");
    }

    #[test]
    fn duplicate_seq_overwrites() {
        let mut table = Reassembler::new();
        table.insert(chunk(1, 1, 0, 2, b"old")).unwrap();
        table.insert(chunk(1, 1, 0, 2, b"new")).unwrap();
        let message = table.insert(chunk(1, 1, 1, 2, b"!")).unwrap().unwrap();
        assert_eq!(&message.payload[..], b"new!");
    }

    #[test]
    fn unchunked_packet_completes_immediately() {
        let mut table = Reassembler::new();
        let message = table.insert(chunk(24, 24, 0, 0, b"\x01\x10\x18")).unwrap().unwrap();
        assert_eq!(&message.payload[..], &[0x01, 0x10, 0x18]);
        assert_eq!(table.pending(), 0);
    }

    #[test]
    fn changed_total_restarts_entry() {
        let mut table = Reassembler::new();
        table.insert(chunk(1, 1, 0, 3, b"a")).unwrap();
        table.insert(chunk(1, 1, 1, 3, b"b")).unwrap();
        assert!(table.insert(chunk(1, 1, 0, 2, b"x")).unwrap().is_none());
        let message = table.insert(chunk(1, 1, 1, 2, b"y")).unwrap().unwrap();
        assert_eq!(&message.payload[..], b"xy");
    }

    #[test]
    fn out_of_range_seq_rejected() {
        let mut table = Reassembler::new();
        assert!(table.insert(chunk(1, 1, 0, 2, b"A")).unwrap().is_none());

        let mut stray = chunk(1, 1, 1, 2, b"Z");
        stray.seq = 5;
        assert_eq!(
            table.insert(stray).unwrap_err(),
            SocketError::Format(FormatError::SequenceOutOfRange { seq: 5, total: 2 })
        );

        // The partial entry is untouched and still needs seq 1
        assert_eq!(table.pending(), 1);
        let message = table.insert(chunk(1, 1, 1, 2, b"B")).unwrap().unwrap();
        assert_eq!(&message.payload[..], b"AB");
    }

    #[test]
    fn too_many_chunks_rejected() {
        let mut table = Reassembler::new();
        assert_eq!(
            table.insert(chunk(1, 1, 0, 17, b"a")).unwrap_err(),
            SocketError::TooManyChunks(17)
        );
        assert_eq!(table.pending(), 0);
    }

    #[test]
    fn full_table_evicts_oldest() {
        let mut table = Reassembler::new();
        for msg_id in 0..MAX_INFLIGHT as u8 {
            table.insert(chunk(1, msg_id, 0, 2, b"a")).unwrap();
        }
        assert_eq!(table.pending(), MAX_INFLIGHT);

        // msg 0 is the oldest and makes room for msg 9
        table.insert(chunk(1, 9, 0, 2, b"a")).unwrap();
        assert_eq!(table.pending(), MAX_INFLIGHT);
        for msg_id in [1, 2, 3, 9] {
            assert!(table.insert(chunk(1, msg_id, 1, 2, b"b")).unwrap().is_some());
        }

        // msg 0 starts over
        assert!(table.insert(chunk(1, 0, 1, 2, b"b")).unwrap().is_none());
        assert_eq!(table.pending(), 1);
    }

    #[test]
    fn same_msg_id_from_different_sensors_kept_apart() {
        let mut table = Reassembler::new();
        table.insert(chunk(1, 5, 0, 2, b"a")).unwrap();
        table.insert(chunk(2, 5, 0, 2, b"x")).unwrap();
        let first = table.insert(chunk(1, 5, 1, 2, b"b")).unwrap().unwrap();
        let second = table.insert(chunk(2, 5, 1, 2, b"y")).unwrap().unwrap();
        assert_eq!(&first.payload[..], b"ab");
        assert_eq!(&second.payload[..], b"xy");
    }
}
