//! GNSS chip driver core: probing, power cycling, and status reporting.
//!
//! A [`Gps`] owns the serial transport and the device state. The application constructs one,
//! calls [`Gps::tick`] from its scheduler whenever the returned delay has elapsed, and hands
//! it to the power-management code as a [`PreSuspend`] handler.

use defmt::{debug, info, trace};
use tinyvec::ArrayVec;

use crate::{
    error::GpsError,
    hooks::ChipHooks,
    time::{elapsed, Clock, Instant},
    transport::Transport,
    ubx::packets::{MonVerHeader, MON_VER_EXTENSION_LEN},
    FixedStr,
};

pub mod ack;
pub mod config;
pub mod power;
pub mod probe;
pub mod status;

#[cfg(test)]
pub(crate) mod sim;

use ack::Arbiter;
use config::FLOW_TIMEOUT;
use status::GpsStatus;

#[derive(defmt::Format, Debug, Copy, Clone, PartialEq, Eq)]
pub enum GnssModel {
    Mtk,
    Ublox,
    Uc6850,
    Unknown,
}

#[derive(defmt::Format, Debug, Copy, Clone, PartialEq, Eq)]
pub enum PowerPhase {
    Disconnected,
    Probing,
    Awake,
    Asleep,
}

pub const MAX_EXTENSIONS: usize = 10;

/// Identification reported by a u-blox chip in MON-VER.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChipModelInfo {
    pub sw_version: FixedStr<30>,
    pub hw_version: FixedStr<10>,
    pub extensions: ArrayVec<[FixedStr<MON_VER_EXTENSION_LEN>; MAX_EXTENSIONS]>,
    /// The chip reported more than `MAX_EXTENSIONS` extension strings.
    pub extensions_truncated: bool,
}

impl ChipModelInfo {
    pub fn from_mon_ver(payload: &[u8]) -> Option<Self> {
        let header_len = core::mem::size_of::<MonVerHeader>();
        let header: MonVerHeader =
            bytemuck::try_pod_read_unaligned(payload.get(..header_len)?).ok()?;

        let mut info = ChipModelInfo {
            sw_version: FixedStr::from_nul_padded(&header.sw_version),
            hw_version: FixedStr::from_nul_padded(&header.hw_version),
            ..Default::default()
        };
        for ext in payload[header_len..].chunks_exact(MON_VER_EXTENSION_LEN) {
            if info
                .extensions
                .try_push(FixedStr::from_nul_padded(ext))
                .is_some()
            {
                info.extensions_truncated = true;
                break;
            }
        }
        Some(info)
    }

    /// u-blox 7 generation, which predates multi-constellation tracking.
    pub fn is_gen7(&self) -> bool {
        self.hw_version.as_str() == "00070000"
    }

    /// Major protocol version from the `PROTVER=` extension, e.g. 34 for `PROTVER=34.10`.
    pub fn protocol_version(&self) -> Option<u8> {
        self.extensions.iter().find_map(|ext| {
            let rest = ext
                .as_str()
                .strip_prefix("PROTVER=")
                .or_else(|| ext.as_str().strip_prefix("PROTVER "))?;
            rest.split('.').next()?.trim().parse().ok()
        })
    }
}

impl defmt::Format for ChipModelInfo {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "sw={} hw={} extensions={=usize}",
            self.sw_version,
            self.hw_version,
            self.extensions.len()
        );
        for ext in self.extensions.iter() {
            defmt::write!(fmt, " [{}]", ext);
        }
    }
}

#[derive(defmt::Format, Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct FixState {
    pub satellites: u8,
    /// The last fix is younger than update interval + attempt time.
    pub has_valid_location: bool,
    pub last_fix: Option<Instant>,
}

/// Everything observable about the chip. Mutated only by the scheduler; every setter raises
/// `should_publish` when the value actually changes.
#[derive(defmt::Format, Debug, Copy, Clone)]
pub struct DeviceState {
    pub model: GnssModel,
    pub model_info: Option<ChipModelInfo>,
    pub baud_rate: Option<u32>,
    pub phase: PowerPhase,
    pub fix: FixState,
    /// Time has been taken from the chip at least once.
    pub has_time: bool,
    pub connected: bool,
    pub should_publish: bool,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            model: GnssModel::Unknown,
            model_info: None,
            baud_rate: None,
            phase: PowerPhase::Disconnected,
            fix: FixState::default(),
            has_time: false,
            connected: false,
            should_publish: false,
        }
    }
}

impl DeviceState {
    pub fn set_phase(&mut self, phase: PowerPhase) {
        if self.phase != phase {
            debug!("gps: {} -> {}", self.phase, phase);
            self.phase = phase;
            self.should_publish = true;
        }
    }

    pub fn set_valid_location(&mut self, valid: bool) {
        if self.fix.has_valid_location != valid {
            if valid {
                debug!("gps: hasValidLocation RISING EDGE");
            } else {
                debug!("gps: hasValidLocation FALLING EDGE");
            }
            self.fix.has_valid_location = valid;
            self.should_publish = true;
        }
    }

    pub fn set_satellites(&mut self, n: u8) {
        if self.fix.satellites != n {
            trace!("gps: {=u8} satellites", n);
            self.fix.satellites = n;
            self.should_publish = true;
        }
    }

    pub fn set_connected(&mut self, connected: bool) {
        if self.connected != connected {
            self.connected = connected;
            self.should_publish = true;
        }
    }

    /// What subscribers are told. A disconnected chip never reports a lock.
    pub fn status(&self) -> GpsStatus {
        let live = self.phase != PowerPhase::Disconnected;
        GpsStatus {
            phase: self.phase,
            model: self.model,
            has_lock: live && self.fix.has_valid_location,
            satellites: if live { self.fix.satellites } else { 0 },
            is_connected: live && self.connected,
        }
    }
}

/// Handler the power-management subsystem calls synchronously before it suspends the CPU
/// and powers down shared resources. `Ok` means it is safe to proceed.
pub trait PreSuspend {
    fn prepare_suspend(&mut self) -> Result<(), GpsError>;
}

pub struct Gps<T, C, H> {
    transport: Option<T>,
    clock: C,
    hooks: H,
    arbiter: Arbiter,
    state: DeviceState,

    needs_probe: bool,
    wake_allowed: bool,
    wake_requested: bool,
    reconfigure_pending: bool,
    parked: bool,
    fixed_delay_ctr: u8,
    frame_errors: u8,
    degraded: bool,

    last_wake_start: Instant,
    last_sleep_start: Instant,
    last_while_active: Instant,
    last_flow: Option<Instant>,
}

impl<T, C, H> Gps<T, C, H>
where
    T: Transport,
    C: Clock,
    H: ChipHooks,
{
    /// `transport` is `None` on boards without a GNSS uart; the driver then stays
    /// disconnected.
    pub fn new(transport: Option<T>, clock: C, hooks: H) -> Self {
        let now = clock.now();
        Self {
            transport,
            clock,
            hooks,
            arbiter: Arbiter::new(),
            state: DeviceState::default(),
            needs_probe: true,
            wake_allowed: true,
            wake_requested: false,
            reconfigure_pending: false,
            parked: false,
            fixed_delay_ctr: 0,
            frame_errors: 0,
            degraded: false,
            last_wake_start: now,
            last_sleep_start: now,
            last_while_active: now,
            last_flow: None,
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn status(&self) -> GpsStatus {
        self.state.status()
    }

    pub fn phase(&self) -> PowerPhase {
        self.state.phase
    }

    pub fn model(&self) -> GnssModel {
        self.state.model
    }

    pub fn model_info(&self) -> Option<&ChipModelInfo> {
        self.state.model_info.as_ref()
    }

    /// True if we have acquired a lock that is still fresh.
    pub fn has_lock(&self) -> bool {
        self.status().has_lock
    }

    /// True if the chip is talking to us.
    pub fn is_connected(&self) -> bool {
        self.status().is_connected
    }

    /// True if the hooks have seen well-formed traffic recently.
    pub fn has_flow(&self) -> bool {
        self.last_flow
            .map_or(false, |t| elapsed(&self.clock, t) < FLOW_TIMEOUT)
    }

    pub fn satellites(&self) -> u8 {
        self.status().satellites
    }

    /// The chip is held asleep, either because wake is forbidden or because a fixed-position
    /// node has parked it.
    pub fn is_power_saving(&self) -> bool {
        !self.wake_allowed || self.parked
    }

    /// Persistent frame errors have been seen while awake.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    /// Probe again on the next tick, e.g. after probing was exhausted.
    pub fn request_probe(&mut self) {
        info!("gps: re-probe requested");
        self.needs_probe = true;
        if self.state.phase != PowerPhase::Disconnected {
            self.state.set_phase(PowerPhase::Disconnected);
        }
    }

    /// Some chips need a factory reset to recover from a bad saved configuration.
    pub fn factory_reset(&mut self) -> bool {
        match self.transport.as_mut() {
            Some(transport) => self.hooks.factory_reset(transport),
            None => false,
        }
    }
}

impl<T, C, H> PreSuspend for Gps<T, C, H>
where
    T: Transport,
    C: Clock,
    H: ChipHooks,
{
    fn prepare_suspend(&mut self) -> Result<(), GpsError> {
        debug!("gps: preparing for suspend");
        self.force_wake(false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mon_ver_payload(extensions: &[&str]) -> std::vec::Vec<u8> {
        let mut payload = std::vec![0u8; 40];
        payload[..21].copy_from_slice(b"ROM SPG 5.10 (7b202e)");
        payload[30..38].copy_from_slice(b"000A0000");
        for ext in extensions {
            let mut field = [0u8; 30];
            field[..ext.len()].copy_from_slice(ext.as_bytes());
            payload.extend_from_slice(&field);
        }
        payload
    }

    #[test]
    fn mon_ver_decodes_versions_and_extensions() {
        let payload = mon_ver_payload(&["FWVER=SPG 5.10", "PROTVER=34.10", "MOD=MAX-M10S"]);
        let info = ChipModelInfo::from_mon_ver(&payload).unwrap();
        assert_eq!(info.sw_version.as_str(), "ROM SPG 5.10 (7b202e)");
        assert_eq!(info.hw_version.as_str(), "000A0000");
        assert_eq!(info.extensions.len(), 3);
        assert_eq!(info.protocol_version(), Some(34));
        assert!(!info.extensions_truncated);
        assert!(!info.is_gen7());
    }

    #[test]
    fn mon_ver_caps_extension_list() {
        let exts = ["GPS;GLO"; 12];
        let info = ChipModelInfo::from_mon_ver(&mon_ver_payload(&exts)).unwrap();
        assert_eq!(info.extensions.len(), MAX_EXTENSIONS);
        assert!(info.extensions_truncated);
        assert_eq!(info.protocol_version(), None);
    }

    #[test]
    fn mon_ver_too_short_is_rejected() {
        assert!(ChipModelInfo::from_mon_ver(&[0u8; 12]).is_none());
    }

    #[test]
    fn disconnected_status_reports_nothing() {
        let mut state = DeviceState::default();
        state.fix.has_valid_location = true;
        state.fix.satellites = 7;
        state.connected = true;
        let status = state.status();
        assert!(!status.has_lock);
        assert!(!status.is_connected);
        assert_eq!(status.satellites, 0);
    }

    #[test]
    fn setters_flag_only_real_changes() {
        let mut state = DeviceState::default();
        state.set_phase(PowerPhase::Disconnected);
        state.set_satellites(0);
        assert!(!state.should_publish);
        state.set_satellites(4);
        assert!(state.should_publish);
    }
}
