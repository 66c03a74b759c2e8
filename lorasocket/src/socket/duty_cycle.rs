//! Transmit airtime accounting
//!
//! A fixed window budget: airtime is summed until the window has passed, then
//! the sum starts over. There is no clock underneath, so the socket reports
//! the time it spends (transmitting, pacing, polling) and callers report the
//! rest through [`LoRaSocket::elapse`](super::LoRaSocket::elapse).

use log::info;

use super::SocketError;
use crate::config::DutyCycleLimit;

/// Airtime used in the current window
#[derive(Debug, Clone)]
pub struct DutyCycle {
    limit: DutyCycleLimit,
    used_ms: u32,
    elapsed_ms: u32,
}

impl DutyCycle {
    /// Fresh window with the whole budget available
    pub fn new(limit: DutyCycleLimit) -> Self {
        Self {
            limit,
            used_ms: 0,
            elapsed_ms: 0,
        }
    }

    /// Airtime left in this window
    pub fn remaining_ms(&self) -> u32 {
        self.limit.budget_ms.saturating_sub(self.used_ms)
    }

    /// Time until the budget refills
    pub fn until_reset_ms(&self) -> u32 {
        self.limit.window_ms.saturating_sub(self.elapsed_ms)
    }

    /// Fail with `DutyCycleExceeded` unless `airtime_ms` fits the remaining budget
    pub fn check(&self, airtime_ms: u32) -> Result<(), SocketError> {
        if airtime_ms > self.remaining_ms() {
            return Err(SocketError::DutyCycleExceeded {
                wait_ms: self.until_reset_ms(),
            });
        }
        Ok(())
    }

    /// Book a transmission of `airtime_ms`
    pub fn consume(&mut self, airtime_ms: u32) {
        self.advance(airtime_ms);
        self.used_ms = self.used_ms.saturating_add(airtime_ms);
    }

    /// Let `ms` pass
    pub fn advance(&mut self, ms: u32) {
        self.elapsed_ms = self.elapsed_ms.saturating_add(ms);
        if self.elapsed_ms >= self.limit.window_ms {
            if self.used_ms > 0 {
                info!("duty cycle window over, {} ms airtime budget restored", self.used_ms);
            }
            self.used_ms = 0;
            self.elapsed_ms = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(budget_ms: u32, window_ms: u32) -> DutyCycleLimit {
        DutyCycleLimit { budget_ms, window_ms }
    }

    #[test]
    fn budget_runs_out() {
        let mut duty = DutyCycle::new(limit(1_000, 100_000));
        assert_eq!(duty.check(600), Ok(()));
        duty.consume(600);
        assert_eq!(duty.remaining_ms(), 400);
        assert_eq!(duty.check(400), Ok(()));
        assert_eq!(
            duty.check(401),
            Err(SocketError::DutyCycleExceeded { wait_ms: 99_400 })
        );
    }

    #[test]
    fn window_end_restores_budget() {
        let mut duty = DutyCycle::new(limit(1_000, 10_000));
        duty.consume(1_000);
        assert!(duty.check(1).is_err());

        duty.advance(8_999);
        assert_eq!(duty.until_reset_ms(), 1);
        assert!(duty.check(1).is_err());

        duty.advance(1);
        assert_eq!(duty.remaining_ms(), 1_000);
        assert_eq!(duty.until_reset_ms(), 10_000);
    }
}
