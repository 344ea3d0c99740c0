//! Seam between the driver core and the code that understands a chip's navigation output.

use chrono::{DateTime, Utc};
use defmt::{debug, error, info, trace, warn};

use crate::{
    gps::status::dop_string,
    transport::Transport,
    ubx::{
        packets::{CfgCfg, CfgRst, NavPvt},
        ParsedPacket, SendablePacket, UbxParser, UbxScratch,
    },
    Position,
};

/// Per-tick callbacks made by the scheduler while the chip is awake, one at a time.
pub trait ChipHooks {
    /// Drain pending serial input. Returns true if at least one well-formed message was seen.
    fn while_idle<T: Transport>(&mut self, transport: &mut T) -> bool;

    /// Periodic work while the chip is awake, at most every `WHILE_ACTIVE_INTERVAL`.
    fn while_active<T: Transport>(&mut self, _transport: &mut T) {}

    /// True once the chip has reported a valid time.
    fn look_for_time(&mut self) -> bool;

    /// True if a new fix arrived since the last call.
    fn look_for_location(&mut self) -> bool;

    /// Satellites in use, if the chip reports it.
    fn satellites(&self) -> Option<u8> {
        None
    }

    /// Return the chip to factory settings. True if the request was sent.
    fn factory_reset<T: Transport>(&mut self, _transport: &mut T) -> bool {
        false
    }
}

/// Bytes drained per `while_idle` call, so a chatty chip cannot stall the tick.
const IDLE_READ_BUDGET: usize = 1024;

/// Hooks for u-blox chips streaming NAV-PVT.
#[derive(Default)]
pub struct UbxNavHooks {
    parser: UbxParser,
    last_pvt: Option<NavPvt>,
    new_time: bool,
    new_fix: bool,
    time: Option<DateTime<Utc>>,
    position: Option<Position>,
}

impl UbxNavHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_nav_pvt(&self) -> Option<&NavPvt> {
        self.last_pvt.as_ref()
    }

    /// UTC time from the most recent NAV-PVT with valid date and time.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.time
    }

    pub fn position(&self) -> Option<Position> {
        self.position
    }

    fn on_nav_pvt(&mut self, pvt: NavPvt) {
        trace!(
            "gps: fix_type={=u8} sv={=u8} lat={=f32} lon={=f32} pdop={=str}",
            pvt.fix_type,
            pvt.sum_sv,
            pvt.lat_degrees(),
            pvt.lon_degrees(),
            dop_string(pvt.p_dop as u32)
        );
        if let Some(time) = pvt.datetime() {
            self.time = Some(time);
            self.new_time = true;
        }
        if pvt.has_fix() {
            self.position = Some(pvt.position());
            self.new_fix = true;
        }
        self.last_pvt = Some(pvt);
    }
}

impl ChipHooks for UbxNavHooks {
    fn while_idle<T: Transport>(&mut self, transport: &mut T) -> bool {
        let mut saw_message = false;
        for _ in 0..IDLE_READ_BUDGET {
            let b = match transport.read() {
                Ok(b) => b,
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(e)) => {
                    error!("gps: uart read error: {}", defmt::Debug2Format(&e));
                    break;
                }
            };
            match self.parser.process_byte(b) {
                Some(Ok(ParsedPacket::NavPvt(pvt))) => {
                    saw_message = true;
                    self.on_nav_pvt(pvt);
                }
                Some(Ok(_)) => saw_message = true,
                Some(Err(e)) => debug!("gps: dropped frame: {}", e),
                None => {}
            }
        }
        saw_message
    }

    fn look_for_time(&mut self) -> bool {
        core::mem::take(&mut self.new_time)
    }

    fn look_for_location(&mut self) -> bool {
        core::mem::take(&mut self.new_fix)
    }

    fn satellites(&self) -> Option<u8> {
        self.last_pvt.map(|pvt| pvt.sum_sv)
    }

    fn factory_reset<T: Transport>(&mut self, transport: &mut T) -> bool {
        info!("gps: factory reset");
        let mut scratch = UbxScratch::new();
        let clear = CfgCfg::clear_all().write_into(&mut scratch);
        let ok = transport.write_all(&scratch[..clear]).is_ok();

        // cold start, controlled software reset
        let reset = CfgRst {
            nav_bbr_mask: 0xffff,
            reset_mode: 0x01,
        }
        .write_into(&mut scratch);
        let ok = ok && transport.write_all(&scratch[..reset]).is_ok();
        if !ok {
            warn!("gps: factory reset not sent");
        }
        self.last_pvt = None;
        self.time = None;
        self.position = None;
        ok
    }
}
