use fugit::ExtU32;

use crate::{time::Duration, Position};

/// Scheduler cadence while the chip is awake.
pub const GPS_THREAD_INTERVAL: Duration = Duration::from_ticks(200);
/// Scheduler cadence in every other phase.
pub const IDLE_TICK: Duration = Duration::from_ticks(5_000);
/// Minimum spacing between `ChipHooks::while_active` calls.
pub const WHILE_ACTIVE_INTERVAL: Duration = Duration::from_ticks(5_000);
/// `has_flow` holds this long after the hooks last saw well-formed traffic.
pub const FLOW_TIMEOUT: Duration = Duration::from_ticks(5_000);

/// Ticks to keep counting satellites after the first fix before a fixed-position node parks
/// the chip.
pub const FIXED_POSITION_DELAY_TICKS: u8 = 20;

/// Consecutive frame errors while awake before connectivity is reported degraded.
pub const FRAME_ERROR_THRESHOLD: u8 = 3;

/// Deadline for acks to reconfiguration sent on wake.
pub const RECONFIGURE_ACK_TIMEOUT: Duration = Duration::from_ticks(250);

/// Runtime policy, read fresh on every tick so changes apply without a restart.
#[derive(defmt::Format, Debug, Copy, Clone, PartialEq)]
pub struct GpsConfig {
    /// How long to sleep between fixes.
    pub update_interval: Duration,
    /// How long to stay awake looking for a fix.
    pub attempt_time: Duration,
    /// Set on nodes that never move. After the first fix the chip is parked.
    pub fixed_position: Option<Position>,
    /// Cycle the chip between awake and asleep. When false it stays awake.
    pub power_saving: bool,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            update_interval: 120.secs(),
            attempt_time: 60.secs(),
            fixed_position: None,
            power_saving: true,
        }
    }
}

impl GpsConfig {
    /// Longest awake window, or `None` to stay awake indefinitely.
    pub fn wake_time(&self) -> Option<Duration> {
        self.power_saving.then_some(self.attempt_time)
    }

    /// A fix older than this no longer counts as a lock.
    pub fn fix_lifetime(&self) -> Duration {
        self.update_interval + self.attempt_time
    }
}
