//! Finding the chip: which baud rate it talks at, and which dialect it speaks.
//!
//! u-blox chips are recognised by acking a UBX poll. Chips that ignore UBX are asked to
//! identify themselves over NMEA and classified by the text they send back.

use defmt::{debug, error, info, warn};
use fugit::ExtU32;

use super::{
    ack::{Arbiter, ResponseOutcome},
    config::GpsConfig,
    ChipModelInfo, GnssModel,
};
use crate::{
    error::GpsError,
    nmea,
    time::{Clock, Duration},
    transport::{clear_buffer, Transport},
    ubx::{
        cfg::{self, CfgItem, LowPowerMode},
        packets::{
            CfgCfg, CfgGnss, CfgItfm, CfgMsg, CfgNav5, CfgNavx5, CfgPm2, CfgRate, CfgRxm,
            CfgValSet, Poll,
        },
        SendablePacket, CLASS_MON, CLASS_NAV, ID_NAV_PVT,
    },
};

/// Tried in order. Most chips ship at 9600, which is tried again last in case the chip was
/// still booting the first time round.
pub const SERIAL_SPEEDS: [u32; 6] = [9600, 4800, 38400, 57600, 115200, 9600];
pub const PROBE_TRIES: usize = 2;

pub const ACK_TIMEOUT: Duration = Duration::from_ticks(750);
pub const MON_VER_TIMEOUT: Duration = Duration::from_ticks(1200);
/// How long to listen for a reply to the text identification queries.
pub const TEXT_SCAN_WINDOW: Duration = Duration::from_ticks(500);
pub const TEXT_ACK_TIMEOUT: Duration = Duration::from_ticks(250);

const MTK_SIGNATURES: [&[u8]; 3] = [
    b"$GPTXT,01,01,02,SW=",
    b"$GNTXT,01,01,02,SW=",
    b"$PMTK",
];
const UC6850_SIGNATURE: &[u8] = b"$PDTINFO";

#[derive(defmt::Format, Debug, Copy, Clone)]
pub struct Detection {
    pub model: GnssModel,
    pub baud_rate: u32,
    pub info: Option<ChipModelInfo>,
}

/// Walk `SERIAL_SPEEDS` until something answers. Issues at most
/// `PROBE_TRIES * SERIAL_SPEEDS.len()` probe polls.
pub fn probe<T, C>(
    transport: &mut T,
    clock: &C,
    arbiter: &mut Arbiter,
) -> Result<Detection, GpsError>
where
    T: Transport,
    C: Clock,
{
    for baud_rate in SERIAL_SPEEDS {
        if let Err(e) = transport.set_baud_rate(baud_rate) {
            error!(
                "gps: cannot set {=u32} baud: {}",
                baud_rate,
                defmt::Debug2Format(&e)
            );
            continue;
        }

        for attempt in 1..=PROBE_TRIES {
            debug!("gps: probing at {=u32} baud, try {=usize}", baud_rate, attempt);
            if let Some((model, info)) = probe_once(transport, clock, arbiter) {
                info!("gps: found {} at {=u32} baud", model, baud_rate);
                return Ok(Detection {
                    model,
                    baud_rate,
                    info,
                });
            }
        }
    }

    warn!("gps: no chip answered at any baud rate");
    Err(GpsError::ProbingExhausted)
}

fn probe_once<T, C>(
    transport: &mut T,
    clock: &C,
    arbiter: &mut Arbiter,
) -> Option<(GnssModel, Option<ChipModelInfo>)>
where
    T: Transport,
    C: Clock,
{
    clear_buffer(transport);
    match arbiter.exchange(transport, clock, Poll::CFG_RATE, ACK_TIMEOUT) {
        // a nak still means something parsed our UBX
        ResponseOutcome::PositiveAck | ResponseOutcome::NegativeAck => {
            let info = read_model_info(transport, clock, arbiter);
            return Some((GnssModel::Ublox, info));
        }
        ResponseOutcome::FrameError => {
            debug!("gps: garbled reply to UBX poll, likely wrong baud rate");
        }
        ResponseOutcome::None => {}
    }

    clear_buffer(transport);
    for query in ["PCAS06,0", "PDTINFO"] {
        if let Err(e) = nmea::write_sentence(transport, query) {
            error!("gps: {=str} not sent: {}", query, e);
            return None;
        }
    }
    arbiter
        .await_line(transport, clock, TEXT_SCAN_WINDOW, classify_line)
        .map(|model| (model, None))
}

fn classify_line(line: &[u8]) -> Option<GnssModel> {
    if MTK_SIGNATURES.iter().any(|sig| line.starts_with(sig)) {
        Some(GnssModel::Mtk)
    } else if line.starts_with(UC6850_SIGNATURE) {
        Some(GnssModel::Uc6850)
    } else {
        None
    }
}

/// Ask a u-blox chip for MON-VER.
pub fn read_model_info<T, C>(
    transport: &mut T,
    clock: &C,
    arbiter: &mut Arbiter,
) -> Option<ChipModelInfo>
where
    T: Transport,
    C: Clock,
{
    clear_buffer(transport);
    arbiter.send(transport, Poll::MON_VER).ok()?;
    let payload = arbiter.await_message(transport, clock, CLASS_MON, 0x04, MON_VER_TIMEOUT)?;
    let info = ChipModelInfo::from_mon_ver(&payload);
    match &info {
        Some(info) => {
            info!("gps: {}", info);
            if info.extensions_truncated {
                warn!("gps: MON-VER extension list truncated");
            }
        }
        None => warn!("gps: short MON-VER payload ({=usize} bytes)", payload.len()),
    }
    info
}

/// Outcome of the one-time configuration after a successful probe.
#[derive(defmt::Format, Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ConfigReport {
    pub sent: u8,
    pub acked: u8,
    pub rejected: u8,
    pub unanswered: u8,
}

/// Apply our message set, rate, and power settings. Rejected or unanswered commands are
/// logged; the chip keeps working with whatever it accepted.
pub fn configure<T, C>(
    transport: &mut T,
    clock: &C,
    arbiter: &mut Arbiter,
    detection: &Detection,
    config: &GpsConfig,
) -> ConfigReport
where
    T: Transport,
    C: Clock,
{
    let mut session = Session {
        transport,
        clock,
        arbiter,
        report: ConfigReport::default(),
    };
    match detection.model {
        GnssModel::Ublox => {
            let protver = detection.info.as_ref().and_then(|i| i.protocol_version());
            match protver {
                Some(v) if v >= cfg::VALSET_MIN_PROTVER => session.ublox_valset(config),
                _ => session.ublox_legacy(config, detection.info.as_ref()),
            }
        }
        GnssModel::Mtk => session.casic(),
        GnssModel::Uc6850 => session.unicore(),
        GnssModel::Unknown => {}
    }
    let report = session.report;
    if report.rejected > 0 || report.unanswered > 0 {
        warn!("gps: configuration incomplete: {}", report);
    } else {
        debug!("gps: configured: {}", report);
    }
    report
}

struct Session<'a, T, C> {
    transport: &'a mut T,
    clock: &'a C,
    arbiter: &'a mut Arbiter,
    report: ConfigReport,
}

impl<'a, T, C> Session<'a, T, C>
where
    T: Transport,
    C: Clock,
{
    fn ubx<P: SendablePacket>(&mut self, what: &str, packet: P) {
        self.report.sent += 1;
        let outcome = self
            .arbiter
            .exchange(self.transport, self.clock, packet, ACK_TIMEOUT);
        match outcome {
            ResponseOutcome::PositiveAck => self.report.acked += 1,
            ResponseOutcome::NegativeAck => {
                warn!("gps: {=str} rejected", what);
                self.report.rejected += 1;
            }
            ResponseOutcome::FrameError | ResponseOutcome::None => {
                warn!("gps: no ack for {=str} ({})", what, outcome);
                self.report.unanswered += 1;
            }
        }
    }

    fn text(&mut self, body: &str, ack: Option<&str>) {
        self.report.sent += 1;
        if let Err(e) = nmea::write_sentence(self.transport, body) {
            error!("gps: {=str} not sent: {}", body, e);
            self.report.unanswered += 1;
            return;
        }
        let Some(sentinel) = ack else {
            return;
        };
        match self
            .arbiter
            .await_ack_for_text(self.transport, self.clock, sentinel, TEXT_ACK_TIMEOUT)
        {
            ResponseOutcome::PositiveAck => self.report.acked += 1,
            _ => {
                warn!("gps: no ack for {=str}", body);
                self.report.unanswered += 1;
            }
        }
    }

    fn ublox_legacy(&mut self, config: &GpsConfig, info: Option<&ChipModelInfo>) {
        use cfg::{NMEA_CLASS, NMEA_GGA, NMEA_GLL, NMEA_GSA, NMEA_GSV, NMEA_RMC, NMEA_VTG};

        for (id, rate) in [
            (NMEA_GLL, 0),
            (NMEA_GSA, 0),
            (NMEA_GSV, 0),
            (NMEA_VTG, 0),
            (NMEA_RMC, 1),
            (NMEA_GGA, 1),
        ] {
            self.ubx("CFG-MSG", CfgMsg::uart1(NMEA_CLASS, id, rate));
        }
        self.ubx("CFG-MSG", CfgMsg::uart1(CLASS_NAV, ID_NAV_PVT, 1));

        let gen7 = info.map_or(false, ChipModelInfo::is_gen7);
        if gen7 {
            self.ubx("CFG-GNSS", CfgGnss::gen7());
        } else {
            self.ubx("CFG-GNSS", CfgGnss::gen8());
        }
        self.ubx("CFG-ITFM", CfgItfm::enabled());
        self.ubx(
            "CFG-NAVX5",
            CfgNavx5 {
                version: if gen7 { 0 } else { 2 },
                use_aop: true,
            },
        );

        self.ubx(
            "CFG-RATE",
            CfgRate {
                meas_rate_ms: 1000,
                nav_rate: 1,
                time_ref: 1,
            },
        );
        self.ubx(
            "CFG-NAV5",
            CfgNav5 {
                dyn_model: dyn_model(config),
            },
        );
        if config.power_saving {
            self.ubx(
                "CFG-PM2",
                CfgPm2 {
                    flags: cfg::PM2_FLAGS_CYCLIC,
                    update_period_ms: 1000,
                    search_period_ms: 10_000,
                    on_time_s: 1,
                    min_acq_time_s: 0,
                },
            );
        }
        self.ubx("CFG-RXM", CfgRxm::for_config(config));
        self.ubx("CFG-CFG", CfgCfg::save_all());
    }

    fn ublox_valset(&mut self, config: &GpsConfig) {
        let operate_mode = if config.power_saving {
            cfg::OPERATEMODE_PSMCT
        } else {
            cfg::OPERATEMODE_FULL
        };
        let items: [CfgItem; 13] = [
            (cfg::CFG_UART1OUTPROT_NMEA, true).into(),
            (cfg::CFG_UART1OUTPROT_UBX, true).into(),
            (cfg::CFG_MSGOUT_NMEA_GLL_UART1, 0_u8).into(),
            (cfg::CFG_MSGOUT_NMEA_GSA_UART1, 0_u8).into(),
            (cfg::CFG_MSGOUT_NMEA_GSV_UART1, 0_u8).into(),
            (cfg::CFG_MSGOUT_NMEA_VTG_UART1, 0_u8).into(),
            (cfg::CFG_MSGOUT_NMEA_RMC_UART1, 1_u8).into(),
            (cfg::CFG_MSGOUT_NMEA_GGA_UART1, 1_u8).into(),
            (cfg::CFG_MSGOUT_UBX_NAV_PVT_UART1, 1_u8).into(),
            (cfg::CFG_RATE_MEAS, 1000_u16).into(),
            (cfg::CFG_NAVSPG_DYNMODEL, dyn_model(config)).into(),
            (cfg::CFG_ITFM_ENABLE, true).into(),
            (cfg::CFG_PM_OPERATEMODE, operate_mode).into(),
        ];
        self.ubx(
            "CFG-VALSET",
            CfgValSet {
                ram: true,
                bbr: true,
                flash: false,
                items,
            },
        );
    }

    /// CASIC-family chips (sold as MTK-compatible) never ack.
    fn casic(&mut self) {
        // GPS + BDS + GLONASS
        self.text("PCAS04,7", None);
        // GGA and RMC only
        self.text("PCAS03,1,0,0,0,1,0,0,0,0,0,,,0,0", None);
        self.text("PCAS11,3", None);
    }

    fn unicore(&mut self) {
        const OK: Option<&str> = Some("response=OK");
        // GLL, GSA, GSV and VTG off
        for body in ["CFGMSG,0,1,0", "CFGMSG,0,2,0", "CFGMSG,0,3,0", "CFGMSG,0,5,0"] {
            self.text(body, OK);
        }
        self.text("CFGSYS,h15", OK);
    }
}

fn dyn_model(config: &GpsConfig) -> u8 {
    if config.fixed_position.is_some() {
        cfg::DYNMODEL_STATIONARY
    } else {
        cfg::DYNMODEL_PORTABLE
    }
}

impl CfgRxm {
    pub fn for_config(config: &GpsConfig) -> Self {
        CfgRxm {
            lp_mode: if config.power_saving {
                LowPowerMode::PowerSave
            } else {
                LowPowerMode::Continuous
            },
        }
    }
}

/// How long the prober may take in the worst case, for callers sizing watchdogs.
pub fn worst_case_probe_time() -> Duration {
    let per_try = ACK_TIMEOUT + TEXT_SCAN_WINDOW;
    let tries = (SERIAL_SPEEDS.len() * PROBE_TRIES) as u32;
    (per_try.to_millis() * tries).millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gps::sim::{SimChip, SimClock};
    use crate::ubx::CLASS_CFG;
    use std::vec::Vec;

    #[test]
    fn finds_ublox_at_third_rate() {
        let clock = SimClock::new();
        let mut chip = SimChip::ublox(&clock, 38400);
        let mut arbiter = Arbiter::new();

        let detection = probe(&mut chip, &clock, &mut arbiter).unwrap();
        assert_eq!(detection.model, GnssModel::Ublox);
        assert_eq!(detection.baud_rate, 38400);
        // two silent rates with two tries each, then one try at 38400
        assert_eq!(chip.probes, 2 * PROBE_TRIES + 1);
        assert_eq!(chip.baud_changes, [9600, 4800, 38400]);

        let info = detection.info.unwrap();
        assert_eq!(info.hw_version.as_str(), "00080000");
        assert_eq!(info.protocol_version(), Some(18));
    }

    #[test]
    fn silent_chip_exhausts_every_rate() {
        let clock = SimClock::new();
        let mut chip = SimChip::silent(&clock);
        let mut arbiter = Arbiter::new();

        assert_eq!(
            probe(&mut chip, &clock, &mut arbiter).unwrap_err(),
            GpsError::ProbingExhausted
        );
        assert_eq!(chip.probes, SERIAL_SPEEDS.len() * PROBE_TRIES);
        assert_eq!(chip.baud_changes, SERIAL_SPEEDS);
        assert!(clock.now_ms() <= worst_case_probe_time().to_millis() + 100);
    }

    #[test]
    fn nak_still_identifies_ublox() {
        let clock = SimClock::new();
        let mut chip = SimChip::ublox(&clock, 9600).nak(CLASS_CFG, 0x08);
        let mut arbiter = Arbiter::new();

        let detection = probe(&mut chip, &clock, &mut arbiter).unwrap();
        assert_eq!(detection.model, GnssModel::Ublox);
        assert_eq!(chip.probes, 1);
    }

    #[test]
    fn garbled_acks_are_not_a_detection() {
        let clock = SimClock::new();
        let mut chip = SimChip::ublox(&clock, 9600).corrupt_acks();
        let mut arbiter = Arbiter::new();

        assert!(probe(&mut chip, &clock, &mut arbiter).is_err());
    }

    #[test]
    fn finds_casic_chip_by_text_banner() {
        let clock = SimClock::new();
        let mut chip = SimChip::mtk(&clock, 115200);
        let mut arbiter = Arbiter::new();

        let detection = probe(&mut chip, &clock, &mut arbiter).unwrap();
        assert_eq!(detection.model, GnssModel::Mtk);
        assert_eq!(detection.baud_rate, 115200);
        assert!(detection.info.is_none());
    }

    #[test]
    fn finds_unicore_chip() {
        let clock = SimClock::new();
        let mut chip = SimChip::uc6850(&clock, 9600);
        let mut arbiter = Arbiter::new();

        let detection = probe(&mut chip, &clock, &mut arbiter).unwrap();
        assert_eq!(detection.model, GnssModel::Uc6850);

        let report = configure(
            &mut chip,
            &clock,
            &mut arbiter,
            &detection,
            &GpsConfig::default(),
        );
        assert_eq!(report.sent, 5);
        assert_eq!(report.acked, 5);
    }

    #[test]
    fn legacy_config_survives_a_nak() {
        let clock = SimClock::new();
        let mut chip = SimChip::ublox(&clock, 9600).nak(CLASS_CFG, 0x24);
        let mut arbiter = Arbiter::new();
        let detection = probe(&mut chip, &clock, &mut arbiter).unwrap();

        let report = configure(
            &mut chip,
            &clock,
            &mut arbiter,
            &detection,
            &GpsConfig::default(),
        );
        assert_eq!(report.sent, 15);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.acked, 14);
        // everything after the rejected CFG-NAV5 was still sent
        assert_eq!(chip.frames_of(CLASS_CFG, 0x09), 1);
    }

    #[test]
    fn new_chips_get_one_valset() {
        let clock = SimClock::new();
        let mut chip = SimChip::ublox(&clock, 9600).protver("34.10");
        let mut arbiter = Arbiter::new();
        let detection = probe(&mut chip, &clock, &mut arbiter).unwrap();

        let report = configure(
            &mut chip,
            &clock,
            &mut arbiter,
            &detection,
            &GpsConfig::default(),
        );
        assert_eq!(report.sent, 1);
        assert_eq!(report.acked, 1);
        assert_eq!(chip.frames_of(CLASS_CFG, 0x8a), 1);
        assert_eq!(chip.frames_of(CLASS_CFG, 0x01), 0);

        let items = valset_items(chip.cfg_payloads(0x8a).next().unwrap());
        assert_eq!(items.len(), 13);
        for key in [
            cfg::CFG_UART1OUTPROT_UBX,
            cfg::CFG_MSGOUT_UBX_NAV_PVT_UART1,
            cfg::CFG_ITFM_ENABLE,
        ] {
            assert!(items.contains(&(key, 1)), "{:#x} not enabled", key);
        }
        assert!(items.contains(&(cfg::CFG_RATE_MEAS, 1000)));
    }

    /// Key/value pairs of a CFG-VALSET payload, sized by the storage bits of each key.
    fn valset_items(payload: &[u8]) -> Vec<(u32, u64)> {
        let mut items = Vec::new();
        let mut rest = &payload[4..];
        while rest.len() >= 4 {
            let key = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
            let size = match (key >> 28) & 0x07 {
                1 | 2 => 1,
                3 => 2,
                4 => 4,
                _ => 8,
            };
            let mut value = [0u8; 8];
            value[..size].copy_from_slice(&rest[4..4 + size]);
            items.push((key, u64::from_le_bytes(value)));
            rest = &rest[4 + size..];
        }
        items
    }

    fn configured_legacy(mut chip: SimChip, clock: &SimClock, config: &GpsConfig) -> SimChip {
        let mut arbiter = Arbiter::new();
        let detection = probe(&mut chip, clock, &mut arbiter).unwrap();
        configure(&mut chip, clock, &mut arbiter, &detection, config);
        chip
    }

    #[test]
    fn legacy_config_streams_nav_pvt() {
        let clock = SimClock::new();
        let chip = configured_legacy(SimChip::ublox(&clock, 9600), &clock, &GpsConfig::default());

        assert_eq!(chip.frames_of(CLASS_CFG, 0x01), 7);
        let nav_pvt: Vec<&[u8]> = chip
            .cfg_payloads(0x01)
            .filter(|p| p[..2] == [CLASS_NAV, ID_NAV_PVT])
            .collect();
        assert_eq!(nav_pvt, [&[CLASS_NAV, ID_NAV_PVT, 0, 1, 0, 0, 0, 0][..]]);
    }

    #[test]
    fn legacy_config_sets_constellations_jamming_and_aop() {
        let clock = SimClock::new();
        let chip = configured_legacy(SimChip::ublox(&clock, 9600), &clock, &GpsConfig::default());

        let gnss = chip.cfg_payloads(0x3e).next().unwrap();
        assert_eq!(gnss[3], 6);
        // GLONASS is the last block and enabled
        assert_eq!(gnss[44], cfg::GNSS_GLONASS);
        assert_eq!(gnss[48] & 0x01, 0x01);
        assert_eq!(chip.frames_of(CLASS_CFG, 0x39), 1);
        let navx5 = chip.cfg_payloads(0x23).next().unwrap();
        assert_eq!(&navx5[..2], &[2, 0]);
        assert_eq!(navx5[27], 1);
    }

    #[test]
    fn gen7_gets_its_own_constellations_and_navx5() {
        let clock = SimClock::new();
        let chip = configured_legacy(
            SimChip::ublox(&clock, 9600).hw_version("00070000"),
            &clock,
            &GpsConfig::default(),
        );

        let gnss = chip.cfg_payloads(0x3e).next().unwrap();
        assert_eq!(gnss[3], 3);
        assert!(!gnss[4..]
            .chunks_exact(8)
            .any(|block| block[0] == cfg::GNSS_GLONASS));
        let navx5 = chip.cfg_payloads(0x23).next().unwrap();
        assert_eq!(&navx5[..2], &[0, 0]);
    }

    #[test]
    fn fixed_position_uses_stationary_model() {
        let clock = SimClock::new();
        let config = GpsConfig {
            fixed_position: Some(crate::Position {
                lat: 59.9,
                lon: 10.7,
            }),
            ..GpsConfig::default()
        };
        let chip = configured_legacy(SimChip::ublox(&clock, 9600), &clock, &config);
        let nav5 = chip.cfg_payloads(0x24).next().unwrap();
        assert_eq!(nav5[2], cfg::DYNMODEL_STATIONARY);

        let chip = configured_legacy(SimChip::ublox(&clock, 9600), &clock, &GpsConfig::default());
        let nav5 = chip.cfg_payloads(0x24).next().unwrap();
        assert_eq!(nav5[2], cfg::DYNMODEL_PORTABLE);
    }

    #[test]
    fn casic_config_is_fire_and_forget() {
        let clock = SimClock::new();
        let mut chip = SimChip::mtk(&clock, 9600);
        let mut arbiter = Arbiter::new();
        let detection = probe(&mut chip, &clock, &mut arbiter).unwrap();

        let before = clock.now_ms();
        let report = configure(
            &mut chip,
            &clock,
            &mut arbiter,
            &detection,
            &GpsConfig::default(),
        );
        assert_eq!(report.sent, 3);
        assert_eq!(report.unanswered, 0);
        assert_eq!(clock.now_ms(), before);
        assert!(chip.sentences.iter().any(|s| s == "$PCAS11,3*1E"));
    }
}
