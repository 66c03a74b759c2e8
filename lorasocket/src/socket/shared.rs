//! Socket shared between threads

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use embedded_hal::blocking::delay::DelayMs;

use super::{LoRaSocket, Message, SocketError};
use crate::radio::{ModemDriver, ModemStatus};

/// Cloneable handle giving threads exclusive turns on one socket
///
/// `send` holds the lock for the whole message, so chunks of two messages
/// never interleave on the air. Blocking receives release it between polls.
pub struct SharedSocket<D, DELAY>
where
    D: ModemDriver,
    DELAY: DelayMs<u32>,
{
    inner: Arc<Mutex<LoRaSocket<D, DELAY>>>,
}

impl<D, DELAY> Clone for SharedSocket<D, DELAY>
where
    D: ModemDriver,
    DELAY: DelayMs<u32>,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D, DELAY> SharedSocket<D, DELAY>
where
    D: ModemDriver,
    DELAY: DelayMs<u32>,
{
    /// Move a socket behind the lock
    pub fn new(socket: LoRaSocket<D, DELAY>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(socket)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, LoRaSocket<D, DELAY>>, SocketError> {
        // Poisoned: a holder panicked mid-transmission
        self.inner.lock().map_err(|_| SocketError::Closed)
    }

    /// Run `f` with exclusive access to the socket
    pub fn with<R>(&self, f: impl FnOnce(&mut LoRaSocket<D, DELAY>) -> R) -> Result<R, SocketError> {
        let mut socket = self.lock()?;
        Ok(f(&mut socket))
    }

    /// See [`LoRaSocket::send`]
    pub fn send(&self, sensor_id: u8, msg_id: u8, payload: &[u8]) -> Result<(), SocketError> {
        self.lock()?.send(sensor_id, msg_id, payload)
    }

    /// See [`LoRaSocket::write`]
    pub fn write(&self, sensor_id: u8, payload: &[u8]) -> Result<u8, SocketError> {
        self.lock()?.write(sensor_id, payload)
    }

    /// See [`LoRaSocket::poll`]
    pub fn poll(&self) -> nb::Result<(), SocketError> {
        self.lock().map_err(nb::Error::Other)?.poll()
    }

    /// Wait for a message, taking the lock only for each poll
    ///
    /// `None` waits forever.
    pub fn receive_message(&self, timeout: Option<Duration>) -> Result<Message, SocketError> {
        let started = Instant::now();
        loop {
            let interval = {
                let mut socket = self.lock()?;
                match socket.try_receive_message() {
                    Ok(message) => return Ok(message),
                    Err(nb::Error::Other(error)) => return Err(error),
                    Err(nb::Error::WouldBlock) => socket.config().poll_interval_ms,
                }
            };
            if let Some(timeout) = timeout {
                if started.elapsed() >= timeout {
                    return Err(SocketError::Timeout);
                }
            }
            std::thread::sleep(Duration::from_millis(interval as u64));
        }
    }

    /// See [`LoRaSocket::diagnostics`]
    pub fn diagnostics(&self) -> Result<ModemStatus, SocketError> {
        Ok(self.lock()?.diagnostics())
    }

    /// Recover the socket if this is the last handle
    pub fn into_inner(self) -> Result<LoRaSocket<D, DELAY>, Self> {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => Ok(mutex.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())),
            Err(inner) => Err(Self { inner }),
        }
    }
}
