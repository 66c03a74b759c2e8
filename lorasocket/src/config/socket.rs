use crate::codec::FrameProfile;

/// Payload bytes per chunk: 250 on-air bytes minus the 4-byte header, rounded down
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 240;

/// Minimum gap between two chunk transmissions in milliseconds
pub const DEFAULT_TX_GAP_MS: u32 = 2_000;

/// Default receive timeout in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u32 = 60_000;

/// Airtime allowed per window at 1% duty cycle, in milliseconds
pub const DEFAULT_DUTY_CYCLE_BUDGET_MS: u32 = 36_000;

/// Duty cycle accounting window in milliseconds
pub const DEFAULT_DUTY_CYCLE_WINDOW_MS: u32 = 3_600_000;

/// Transmit airtime budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DutyCycleLimit {
    /// Airtime allowed per window
    pub budget_ms: u32,
    /// Window length; the budget refills completely once it has passed
    pub window_ms: u32,
}

impl Default for DutyCycleLimit {
    /// 1%: 36 s of airtime per hour
    fn default() -> Self {
        Self {
            budget_ms: DEFAULT_DUTY_CYCLE_BUDGET_MS,
            window_ms: DEFAULT_DUTY_CYCLE_WINDOW_MS,
        }
    }
}

/// Transport socket configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketConfig {
    /// Upper bound for payload bytes per chunk; the modem's frame limit may lower it
    pub max_chunk_size: usize,
    /// Gap enforced between consecutive chunk transmissions
    pub tx_gap_ms: u32,
    /// `None` blocks forever, `Some(0)` never blocks
    pub read_timeout_ms: Option<u32>,
    /// Interval between receive polls while blocking
    pub poll_interval_ms: u32,
    /// Frame layout override; `None` selects the modem variant's profile
    pub profile: Option<FrameProfile>,
    /// Transmit airtime budget; `None` sends without accounting
    pub duty_cycle: Option<DutyCycleLimit>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            tx_gap_ms: DEFAULT_TX_GAP_MS,
            read_timeout_ms: Some(DEFAULT_READ_TIMEOUT_MS),
            poll_interval_ms: 10,
            profile: None,
            duty_cycle: None,
        }
    }
}

impl SocketConfig {
    /// Set the chunk size upper bound
    pub fn with_max_chunk_size(mut self, max_chunk_size: usize) -> Self {
        self.max_chunk_size = max_chunk_size;
        self
    }

    /// Set the gap between chunk transmissions
    pub fn with_tx_gap_ms(mut self, tx_gap_ms: u32) -> Self {
        self.tx_gap_ms = tx_gap_ms;
        self
    }

    /// Set the read timeout
    pub fn with_read_timeout_ms(mut self, read_timeout_ms: Option<u32>) -> Self {
        self.read_timeout_ms = read_timeout_ms;
        self
    }

    /// Force a frame profile regardless of modem variant
    pub fn with_profile(mut self, profile: FrameProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Enforce a transmit airtime budget
    pub fn with_duty_cycle(mut self, limit: DutyCycleLimit) -> Self {
        self.duty_cycle = Some(limit);
        self
    }
}
