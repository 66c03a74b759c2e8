//! Message transport over a LoRa modem
//!
//! [`LoRaSocket`] splits outbound payloads into chunks that fit one radio frame
//! and stitches inbound chunks back into [`Message`]s:
//!
//! ```text
//! send:    payload -> chunk(seq 0..total) -> encode -> airtime budget -> transmit, tx_gap apart
//! receive: try_receive -> decode -> Reassembler -> subscribers + queue
//! ```

use core::fmt;

use embedded_hal::blocking::delay::DelayMs;
use heapless::{Deque, Vec};
use log::{debug, info, warn};

use crate::codec::{FormatError, FrameProfile, Packet, MAX_PACKET_LEN};
use crate::config::SocketConfig;
use crate::radio::{ModemDriver, ModemError, ModemStatus};

pub mod duty_cycle;
pub mod reassembly;
#[cfg(feature = "std")]
pub mod shared;

pub use duty_cycle::DutyCycle;
pub use reassembly::{Reassembler, MAX_CHUNKS, MAX_INFLIGHT, MAX_MESSAGE_LEN};
#[cfg(feature = "std")]
pub use shared::SharedSocket;

/// Completed messages held for `receive_message`/`read`
pub const RX_QUEUE_DEPTH: usize = 4;

/// Callbacks that can be registered with `subscribe`
pub const MAX_SUBSCRIBERS: usize = 4;

/// Callback invoked for every completed message
pub type Subscriber = fn(&Message);

/// Socket errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SocketError {
    /// Modem failure
    Modem(ModemError),
    /// Frame could not be encoded or decoded
    Format(FormatError),
    /// Nothing arrived within the read timeout
    Timeout,
    /// Payload needs more than `MAX_CHUNKS` chunks or exceeds the message buffer
    PayloadTooLarge(usize),
    /// Transmit airtime budget spent; it refills after `wait_ms`
    DutyCycleExceeded {
        /// Time until the budget window restarts
        wait_ms: u32,
    },
    /// Chunk announces more chunks than a message may hold
    TooManyChunks(u8),
    /// Socket no longer usable
    Closed,
}

impl From<ModemError> for SocketError {
    fn from(error: ModemError) -> Self {
        SocketError::Modem(error)
    }
}

impl From<FormatError> for SocketError {
    fn from(error: FormatError) -> Self {
        SocketError::Format(error)
    }
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketError::Modem(error) => write!(f, "modem: {}", error),
            SocketError::Format(error) => write!(f, "framing: {}", error),
            SocketError::Timeout => write!(f, "read timed out"),
            SocketError::PayloadTooLarge(len) => write!(f, "payload of {} bytes too large", len),
            SocketError::DutyCycleExceeded { wait_ms } => {
                write!(f, "duty cycle budget spent, {} ms until it refills", wait_ms)
            }
            SocketError::TooManyChunks(total) => {
                write!(f, "{} chunks exceed the limit of {}", total, MAX_CHUNKS)
            }
            SocketError::Closed => write!(f, "socket closed"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SocketError {}

/// Payload reassembled from one or more chunks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Originating sensor
    pub sensor_id: u8,
    /// Message id chosen by the sender
    pub msg_id: u8,
    /// Reassembled payload
    pub payload: Vec<u8, MAX_MESSAGE_LEN>,
}

/// Chunking transport on top of a modem driver
pub struct LoRaSocket<D, DELAY>
where
    D: ModemDriver,
    DELAY: DelayMs<u32>,
{
    modem: D,
    delay: DELAY,
    config: SocketConfig,
    profile: FrameProfile,
    reassembler: Reassembler,
    queue: Deque<Message, RX_QUEUE_DEPTH>,
    subscribers: Vec<Subscriber, MAX_SUBSCRIBERS>,
    next_msg_id: u8,
    sent_before: bool,
    duty_cycle: Option<DutyCycle>,
    rx_buffer: [u8; MAX_PACKET_LEN],
}

impl<D, DELAY> LoRaSocket<D, DELAY>
where
    D: ModemDriver,
    DELAY: DelayMs<u32>,
{
    /// Wrap a configured modem
    ///
    /// The frame profile follows the modem variant unless `config.profile` is set.
    pub fn new(modem: D, delay: DELAY, config: SocketConfig) -> Self {
        let profile = config
            .profile
            .unwrap_or_else(|| FrameProfile::for_variant(modem.variant()));
        Self {
            modem,
            delay,
            config,
            profile,
            reassembler: Reassembler::new(),
            queue: Deque::new(),
            subscribers: Vec::new(),
            next_msg_id: 0,
            sent_before: false,
            duty_cycle: config.duty_cycle.map(DutyCycle::new),
            rx_buffer: [0; MAX_PACKET_LEN],
        }
    }

    /// Frame layout in use
    pub fn profile(&self) -> FrameProfile {
        self.profile
    }

    /// Current socket settings
    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// Payload bytes carried per chunk
    pub fn chunk_size(&self) -> usize {
        let frame_limit = self.modem.max_payload().min(MAX_PACKET_LEN);
        self.config
            .max_chunk_size
            .min(frame_limit.saturating_sub(self.profile.header_len()))
            .max(1)
    }

    /// Send `payload` as message `msg_id`, one chunk per frame
    ///
    /// Nothing is transmitted if the message needs more than `MAX_CHUNKS` chunks
    /// (a receiver could never complete it) or if its airtime does not fit the
    /// duty cycle budget. Otherwise returns on the first failed transmission;
    /// chunks already sent are not recalled.
    pub fn send(&mut self, sensor_id: u8, msg_id: u8, payload: &[u8]) -> Result<(), SocketError> {
        let chunk_size = self.chunk_size();
        let chunks = if payload.is_empty() {
            1
        } else {
            (payload.len() + chunk_size - 1) / chunk_size
        };
        if chunks > MAX_CHUNKS {
            return Err(SocketError::PayloadTooLarge(payload.len()));
        }
        let total = chunks as u8;

        if let Some(duty_cycle) = &self.duty_cycle {
            let header_len = self.profile.header_len();
            let airtime_ms = (0..chunks)
                .map(|seq| {
                    let start = seq * chunk_size;
                    let end = (start + chunk_size).min(payload.len());
                    self.modem.time_on_air_ms(header_len + end - start)
                })
                .fold(0u32, u32::saturating_add);
            if let Err(error) = duty_cycle.check(airtime_ms) {
                warn!(
                    "msg {} needs {} ms airtime, {} ms left in this window",
                    msg_id,
                    airtime_ms,
                    duty_cycle.remaining_ms()
                );
                return Err(error);
            }
        }

        for seq in 0..total {
            let start = seq as usize * chunk_size;
            let end = (start + chunk_size).min(payload.len());
            let frame = self
                .profile
                .encode(sensor_id, msg_id, seq, total, &payload[start..end])?;

            if self.sent_before {
                self.delay.delay_ms(self.config.tx_gap_ms);
                self.elapse(self.config.tx_gap_ms);
            }
            self.sent_before = true;

            let airtime_ms = self.modem.time_on_air_ms(frame.len());
            if let Some(duty_cycle) = &self.duty_cycle {
                duty_cycle.check(airtime_ms)?;
            }
            self.modem.transmit(&frame)?;
            if let Some(duty_cycle) = &mut self.duty_cycle {
                duty_cycle.consume(airtime_ms);
            }
            debug!(
                "sent chunk {}/{} of msg {} ({} bytes)",
                seq + 1,
                total,
                msg_id,
                frame.len()
            );
        }
        Ok(())
    }

    /// Send `payload` under the next message id and return that id
    pub fn write(&mut self, sensor_id: u8, payload: &[u8]) -> Result<u8, SocketError> {
        let msg_id = self.next_msg_id;
        self.next_msg_id = self.next_msg_id.wrapping_add(1);
        self.send(sensor_id, msg_id, payload)?;
        Ok(msg_id)
    }

    /// Register a callback for completed messages
    ///
    /// Returns `false` once `MAX_SUBSCRIBERS` callbacks are registered.
    pub fn subscribe(&mut self, callback: Subscriber) -> bool {
        self.subscribers.push(callback).is_ok()
    }

    /// Feed one decoded chunk, returning the message it completes
    ///
    /// Completed messages are also handed to subscribers and queued for reading.
    pub fn on_receive(&mut self, packet: Packet) -> Result<Option<Message>, SocketError> {
        debug!(
            "chunk {}/{} of sensor {} msg {}",
            packet.seq, packet.total, packet.sensor_id, packet.msg_id
        );
        let message = match self.reassembler.insert(packet)? {
            Some(message) => message,
            None => return Ok(None),
        };

        info!(
            "message {} from sensor {} complete ({} bytes)",
            message.msg_id,
            message.sensor_id,
            message.payload.len()
        );
        for callback in self.subscribers.iter() {
            callback(&message);
        }
        if self.queue.is_full() {
            if let Some(dropped) = self.queue.pop_front() {
                warn!(
                    "receive queue full, dropping msg {} from sensor {}",
                    dropped.msg_id, dropped.sensor_id
                );
            }
        }
        // Room was made above
        let _ = self.queue.push_back(message.clone());
        Ok(Some(message))
    }

    /// Run one non-blocking receive step
    ///
    /// `Ok(())` means a frame was consumed; malformed frames are dropped with a warning.
    pub fn poll(&mut self) -> nb::Result<(), SocketError> {
        let len = self
            .modem
            .try_receive(&mut self.rx_buffer)
            .map_err(|error| error.map(SocketError::Modem))?;

        let packet = match self.profile.decode(&self.rx_buffer[..len]) {
            Ok(packet) => packet,
            Err(error) => {
                warn!("dropping {} byte frame: {}", len, error);
                return Ok(());
            }
        };

        if let Err(error) = self.on_receive(packet) {
            warn!("dropping chunk: {}", error);
        }
        Ok(())
    }

    /// Take a queued message, draining pending frames from the modem until one completes
    pub fn try_receive_message(&mut self) -> nb::Result<Message, SocketError> {
        loop {
            if let Some(message) = self.queue.pop_front() {
                return Ok(message);
            }
            self.poll()?;
        }
    }

    /// Wait for the next completed message within the read timeout
    ///
    /// With a zero timeout this checks once and reports `Timeout` if nothing is ready.
    pub fn receive_message(&mut self) -> Result<Message, SocketError> {
        let timeout = self.config.read_timeout_ms;
        let mut waited: u32 = 0;
        loop {
            match self.try_receive_message() {
                Ok(message) => return Ok(message),
                Err(nb::Error::Other(error)) => return Err(error),
                Err(nb::Error::WouldBlock) => {}
            }
            if let Some(timeout) = timeout {
                if waited >= timeout {
                    return Err(SocketError::Timeout);
                }
            }
            self.delay.delay_ms(self.config.poll_interval_ms);
            self.elapse(self.config.poll_interval_ms);
            waited = waited.saturating_add(self.config.poll_interval_ms);
        }
    }

    /// Read queued payload bytes as a stream
    ///
    /// Blocks like `receive_message` when nothing is queued. Whatever does not fit
    /// in `buf` stays at the front of the queue for the next read.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, SocketError> {
        let mut message = match self.queue.pop_front() {
            Some(message) => message,
            None => self.receive_message()?,
        };

        let len = buf.len().min(message.payload.len());
        buf[..len].copy_from_slice(&message.payload[..len]);

        if len < message.payload.len() {
            let rest = message.payload.len() - len;
            message.payload.rotate_left(len);
            message.payload.truncate(rest);
            // The popped slot is still free
            let _ = self.queue.push_front(message);
        }
        Ok(len)
    }

    /// Payload bytes waiting in the receive queue
    pub fn available(&self) -> usize {
        self.queue.iter().map(|message| message.payload.len()).sum()
    }

    /// Set the read timeout: `None` blocks forever, `Some(0)` never blocks
    pub fn set_timeout(&mut self, timeout_ms: Option<u32>) {
        self.config.read_timeout_ms = timeout_ms;
    }

    /// Block forever or not at all on reads
    pub fn set_blocking(&mut self, blocking: bool) {
        self.config.read_timeout_ms = if blocking { None } else { Some(0) };
    }

    /// Account for `ms` spent outside the socket, e.g. sleeping between readings
    ///
    /// Only matters with a duty cycle budget, whose window advances with it.
    pub fn elapse(&mut self, ms: u32) {
        if let Some(duty_cycle) = &mut self.duty_cycle {
            duty_cycle.advance(ms);
        }
    }

    /// Airtime left in the current duty cycle window, `None` without a budget
    pub fn airtime_remaining_ms(&self) -> Option<u32> {
        self.duty_cycle.as_ref().map(DutyCycle::remaining_ms)
    }

    /// Direct access to the modem, e.g. to reconfigure it
    pub fn modem_mut(&mut self) -> &mut D {
        &mut self.modem
    }

    /// Fresh register snapshot from the modem
    pub fn diagnostics(&mut self) -> ModemStatus {
        self.modem.read_diagnostics()
    }

    /// Give back the modem and delay
    pub fn release(self) -> (D, DELAY) {
        (self.modem, self.delay)
    }
}
