use core::iter::{empty, Empty};

use crate::Position;
use bytemuck::{Pod, Zeroable};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tinyvec::{ArrayVec, ArrayVecIterator};

use super::{
    cfg::{
        CfgItem, LowPowerMode, GNSS_BEIDOU, GNSS_GALILEO, GNSS_GLONASS, GNSS_GPS, GNSS_QZSS,
        GNSS_SBAS, SIG_L1CA, SIG_QZSS_L1CA_L1S,
    },
    generator::SendablePacket,
    CLASS_CFG, CLASS_MON, CLASS_RXM, MAX_PAYLOAD,
};

////////////////////////////////////////////////////////////////////////////////
// Packets which can be parsed /////////////////////////////////////////////////
////////////////////////////////////////////////////////////////////////////////

// SAFETY: All fields are naturally aligned, so there is no padding.
// Also, this device has the same endianness as UBX (little)
#[repr(C)]
#[derive(defmt::Format, Pod, Zeroable, Copy, Clone, Debug, PartialEq)]
pub struct NavPvt {
    pub i_tow: u32,
    pub year: u16,
    pub month: u8,
    pub day: u8,

    pub hour: u8,
    pub min: u8,
    pub sec: u8,
    pub valid: u8,

    pub t_acc: u32,
    pub nano: i32,

    pub fix_type: u8,
    pub flags: u8,
    pub flags2: u8,
    pub sum_sv: u8,

    pub lon: i32,
    pub lat: i32,
    pub height: i32,
    pub h_msl: i32,
    pub h_acc: u32,
    pub v_acc: u32,
    pub vel_n: i32,
    pub vel_e: i32,
    pub vel_d: i32,
    pub g_speed: i32,
    pub head_mot: i32,
    pub s_acc: u32,
    pub head_acc: u32,

    pub p_dop: u16,
    pub flags3: u16,

    pub reserved0_a: [u8; 4],
    pub head_veh: i32,

    pub mag_dec: i16,
    pub mag_acc: u16,
}

impl NavPvt {
    const VALID_DATE: u8 = 1 << 0;
    const VALID_TIME: u8 = 1 << 1;
    const GNSS_FIX_OK: u8 = 1 << 0;

    pub fn lat_degrees(&self) -> f32 {
        (self.lat as f32) * 1e-7
    }

    pub fn lon_degrees(&self) -> f32 {
        (self.lon as f32) * 1e-7
    }

    pub fn position(&self) -> Position {
        Position {
            lat: self.lat_degrees(),
            lon: self.lon_degrees(),
        }
    }

    /// A 2D or better fix that the receiver itself flags as valid.
    pub fn has_fix(&self) -> bool {
        (2..=4).contains(&self.fix_type) && self.flags & Self::GNSS_FIX_OK != 0
    }

    /// UTC date and time, if the receiver flags both as valid.
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        if self.valid & (Self::VALID_DATE | Self::VALID_TIME) != Self::VALID_DATE | Self::VALID_TIME
        {
            return None;
        }
        let date = NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)?;
        let time = NaiveTime::from_hms_opt(self.hour as u32, self.min as u32, self.sec as u32)?;
        Some(DateTime::from_naive_utc_and_offset(
            NaiveDateTime::new(date, time),
            Utc,
        ))
    }
}

/// Fixed head of a MON-VER payload; `MON_VER_EXTENSION_LEN`-byte extension strings follow.
#[repr(C)]
#[derive(Pod, Zeroable, Copy, Clone, Debug)]
pub struct MonVerHeader {
    pub sw_version: [u8; 30],
    pub hw_version: [u8; 10],
}

pub const MON_VER_EXTENSION_LEN: usize = 30;

////////////////////////////////////////////////////////////////////////////////
// Packets which can be generated //////////////////////////////////////////////
////////////////////////////////////////////////////////////////////////////////

/// Empty-payload request; the chip answers with the current contents of `class`/`id`.
#[derive(Copy, Clone, Debug)]
pub struct Poll {
    pub class: u8,
    pub id: u8,
}

impl Poll {
    pub const CFG_RATE: Poll = Poll {
        class: CLASS_CFG,
        id: 0x08,
    };
    pub const MON_VER: Poll = Poll {
        class: CLASS_MON,
        id: 0x04,
    };
}

impl SendablePacket for Poll {
    type I = Empty<u8>;

    fn class(&self) -> u8 {
        self.class
    }

    fn id(&self) -> u8 {
        self.id
    }

    fn payload_len(&self) -> usize {
        0
    }

    fn payload_bytes(self) -> Self::I {
        empty()
    }
}

/// Legacy per-port output rate for one message.
pub struct CfgMsg {
    pub msg_class: u8,
    pub msg_id: u8,
    /// I2C, UART1, UART2, USB, SPI, reserved
    pub rates: [u8; 6],
}

impl CfgMsg {
    pub fn uart1(msg_class: u8, msg_id: u8, rate: u8) -> Self {
        Self {
            msg_class,
            msg_id,
            rates: [0, rate, 0, 0, 0, 0],
        }
    }
}

impl SendablePacket for CfgMsg {
    type I = core::array::IntoIter<u8, 8>;

    fn class(&self) -> u8 {
        CLASS_CFG
    }

    fn id(&self) -> u8 {
        0x01
    }

    fn payload_len(&self) -> usize {
        8
    }

    fn payload_bytes(self) -> Self::I {
        let r = self.rates;
        [self.msg_class, self.msg_id, r[0], r[1], r[2], r[3], r[4], r[5]].into_iter()
    }
}

pub struct CfgRate {
    pub meas_rate_ms: u16,
    pub nav_rate: u16,
    /// 0 = UTC, 1 = GPS time
    pub time_ref: u16,
}

impl SendablePacket for CfgRate {
    type I = core::array::IntoIter<u8, 6>;

    fn class(&self) -> u8 {
        CLASS_CFG
    }

    fn id(&self) -> u8 {
        0x08
    }

    fn payload_len(&self) -> usize {
        6
    }

    fn payload_bytes(self) -> Self::I {
        let [m0, m1] = self.meas_rate_ms.to_le_bytes();
        let [n0, n1] = self.nav_rate.to_le_bytes();
        let [t0, t1] = self.time_ref.to_le_bytes();
        [m0, m1, n0, n1, t0, t1].into_iter()
    }
}

/// Navigation engine settings. Only the dynamic model is applied.
pub struct CfgNav5 {
    pub dyn_model: u8,
}

impl SendablePacket for CfgNav5 {
    type I = core::array::IntoIter<u8, 36>;

    fn class(&self) -> u8 {
        CLASS_CFG
    }

    fn id(&self) -> u8 {
        0x24
    }

    fn payload_len(&self) -> usize {
        36
    }

    fn payload_bytes(self) -> Self::I {
        let mut payload = [0u8; 36];
        // mask: apply dynModel only
        payload[0] = 0x01;
        payload[2] = self.dyn_model;
        payload.into_iter()
    }
}

pub struct CfgRxm {
    pub lp_mode: LowPowerMode,
}

impl SendablePacket for CfgRxm {
    type I = core::array::IntoIter<u8, 2>;

    fn class(&self) -> u8 {
        CLASS_CFG
    }

    fn id(&self) -> u8 {
        0x11
    }

    fn payload_len(&self) -> usize {
        2
    }

    fn payload_bytes(self) -> Self::I {
        [0x08, self.lp_mode as u8].into_iter()
    }
}

/// Power management for power-save mode (version 1 layout).
pub struct CfgPm2 {
    pub flags: u32,
    pub update_period_ms: u32,
    pub search_period_ms: u32,
    pub on_time_s: u16,
    pub min_acq_time_s: u16,
}

impl SendablePacket for CfgPm2 {
    type I = core::array::IntoIter<u8, 44>;

    fn class(&self) -> u8 {
        CLASS_CFG
    }

    fn id(&self) -> u8 {
        0x3b
    }

    fn payload_len(&self) -> usize {
        44
    }

    fn payload_bytes(self) -> Self::I {
        let mut payload = [0u8; 44];
        payload[0] = 0x01;
        payload[4..8].copy_from_slice(&self.flags.to_le_bytes());
        payload[8..12].copy_from_slice(&self.update_period_ms.to_le_bytes());
        payload[12..16].copy_from_slice(&self.search_period_ms.to_le_bytes());
        payload[20..22].copy_from_slice(&self.on_time_s.to_le_bytes());
        payload[22..24].copy_from_slice(&self.min_acq_time_s.to_le_bytes());
        payload.into_iter()
    }
}

/// One constellation's entry in CFG-GNSS.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GnssBlock {
    pub gnss_id: u8,
    /// Tracking channels reserved for this constellation
    pub res_trk_ch: u8,
    pub max_trk_ch: u8,
    pub enable: bool,
    pub sig_cfg_mask: u8,
}

impl GnssBlock {
    pub const fn new(gnss_id: u8, res_trk_ch: u8, max_trk_ch: u8, enable: bool) -> Self {
        Self {
            gnss_id,
            res_trk_ch,
            max_trk_ch,
            enable,
            sig_cfg_mask: SIG_L1CA,
        }
    }
}

/// Constellation selection.
pub struct CfgGnss<const N: usize> {
    pub blocks: [GnssBlock; N],
}

impl CfgGnss<3> {
    /// u-blox 7: GPS, SBAS and QZSS.
    pub fn gen7() -> Self {
        Self {
            blocks: [
                GnssBlock::new(GNSS_GPS, 8, 16, true),
                GnssBlock::new(GNSS_SBAS, 1, 3, true),
                GnssBlock::new(GNSS_QZSS, 0, 3, true),
            ],
        }
    }
}

impl CfgGnss<6> {
    /// u-blox 8 and later: GPS, SBAS, QZSS and GLONASS. Galileo and BeiDou off.
    pub fn gen8() -> Self {
        Self {
            blocks: [
                GnssBlock::new(GNSS_GPS, 8, 16, true),
                GnssBlock::new(GNSS_SBAS, 1, 3, true),
                GnssBlock::new(GNSS_GALILEO, 4, 8, false),
                GnssBlock::new(GNSS_BEIDOU, 8, 16, false),
                GnssBlock {
                    sig_cfg_mask: SIG_QZSS_L1CA_L1S,
                    ..GnssBlock::new(GNSS_QZSS, 0, 3, true)
                },
                GnssBlock::new(GNSS_GLONASS, 8, 14, true),
            ],
        }
    }
}

impl<const N: usize> SendablePacket for CfgGnss<N> {
    type I = ArrayVecIterator<[u8; MAX_PAYLOAD]>;

    fn class(&self) -> u8 {
        CLASS_CFG
    }

    fn id(&self) -> u8 {
        0x3e
    }

    fn payload_len(&self) -> usize {
        4 + 8 * N
    }

    fn payload_bytes(self) -> Self::I {
        let mut payload = ArrayVec::<[u8; MAX_PAYLOAD]>::new();
        // msgVer, numTrkChHw (read only), numTrkChUse: all, numConfigBlocks
        payload.extend_from_slice(&[0x00, 0x00, 0xff, N as u8]);
        for block in self.blocks {
            let flags = (block.enable as u32) | ((block.sig_cfg_mask as u32) << 16);
            let [f0, f1, f2, f3] = flags.to_le_bytes();
            let bytes = [
                block.gnss_id,
                block.res_trk_ch,
                block.max_trk_ch,
                0,
                f0,
                f1,
                f2,
                f3,
            ];
            // an oversize set is refused by `write_into` before we get here
            if payload.len() + bytes.len() > payload.capacity() {
                break;
            }
            payload.extend_from_slice(&bytes);
        }
        payload.into_iter()
    }
}

/// Jamming and interference monitor.
pub struct CfgItfm {
    pub enable: bool,
    /// Broadband jamming threshold, dB
    pub bb_threshold: u8,
    /// CW jamming threshold, dB
    pub cw_threshold: u8,
    /// 0 unknown, 1 passive, 2 active
    pub ant_setting: u8,
}

impl CfgItfm {
    const ALGORITHM_BITS: u32 = 0x16_b156;
    const GENERAL_BITS: u32 = 0x31e;

    pub fn enabled() -> Self {
        Self {
            enable: true,
            bb_threshold: 3,
            cw_threshold: 15,
            ant_setting: 0,
        }
    }
}

impl SendablePacket for CfgItfm {
    type I = core::array::IntoIter<u8, 8>;

    fn class(&self) -> u8 {
        CLASS_CFG
    }

    fn id(&self) -> u8 {
        0x39
    }

    fn payload_len(&self) -> usize {
        8
    }

    fn payload_bytes(self) -> Self::I {
        let config = (self.bb_threshold as u32 & 0x0f)
            | ((self.cw_threshold as u32 & 0x1f) << 4)
            | (Self::ALGORITHM_BITS << 9)
            | ((self.enable as u32) << 31);
        let config2 = Self::GENERAL_BITS | ((self.ant_setting as u32 & 0x03) << 12);
        let [c0, c1, c2, c3] = config.to_le_bytes();
        let [d0, d1, d2, d3] = config2.to_le_bytes();
        [c0, c1, c2, c3, d0, d1, d2, d3].into_iter()
    }
}

/// Navigation engine expert settings. Only AssistNow Autonomous is applied.
pub struct CfgNavx5 {
    /// 0 on u-blox 7, 2 on u-blox 8
    pub version: u16,
    pub use_aop: bool,
}

impl CfgNavx5 {
    const MASK1_AOP: u16 = 1 << 14;
}

impl SendablePacket for CfgNavx5 {
    type I = core::array::IntoIter<u8, 40>;

    fn class(&self) -> u8 {
        CLASS_CFG
    }

    fn id(&self) -> u8 {
        0x23
    }

    fn payload_len(&self) -> usize {
        40
    }

    fn payload_bytes(self) -> Self::I {
        let mut payload = [0u8; 40];
        payload[0..2].copy_from_slice(&self.version.to_le_bytes());
        payload[2..4].copy_from_slice(&Self::MASK1_AOP.to_le_bytes());
        payload[27] = self.use_aop as u8;
        payload.into_iter()
    }
}

/// Put the receiver into backup for `duration_ms`, or indefinitely when 0.
pub struct RxmPmreq {
    pub duration_ms: u32,
    pub backup: bool,
}

impl SendablePacket for RxmPmreq {
    type I = core::array::IntoIter<u8, 8>;

    fn class(&self) -> u8 {
        CLASS_RXM
    }

    fn id(&self) -> u8 {
        0x41
    }

    fn payload_len(&self) -> usize {
        8
    }

    fn payload_bytes(self) -> Self::I {
        let [d0, d1, d2, d3] = self.duration_ms.to_le_bytes();
        let flags = if self.backup { 1 << 1 } else { 0 };
        [d0, d1, d2, d3, flags, 0, 0, 0].into_iter()
    }
}

pub struct CfgValSet<const N: usize> {
    pub ram: bool,
    pub bbr: bool,
    pub flash: bool,
    pub items: [CfgItem; N],
}

impl<const N: usize> CfgValSet<N> {
    pub fn layers(&self) -> u8 {
        (if self.ram { 1 << 0 } else { 0 })
            | (if self.bbr { 1 << 1 } else { 0 })
            | (if self.flash { 1 << 2 } else { 0 })
    }
}

impl<const N: usize> SendablePacket for CfgValSet<N> {
    type I = ArrayVecIterator<[u8; MAX_PAYLOAD]>;

    fn class(&self) -> u8 {
        CLASS_CFG
    }

    fn id(&self) -> u8 {
        0x8a
    }

    fn payload_len(&self) -> usize {
        4 + self.items.iter().map(|i| i.packed_size()).sum::<usize>()
    }

    fn payload_bytes(self) -> Self::I {
        let mut payload = ArrayVec::<[u8; MAX_PAYLOAD]>::new();
        let bytes = [0x01, self.layers(), 0x00, 0x00]
            .into_iter()
            .chain(self.items.into_iter().flat_map(|i| i.to_bytes()));
        for b in bytes {
            // an oversize set is refused by `write_into` before we get here
            if payload.try_push(b).is_some() {
                break;
            }
        }
        payload.into_iter()
    }
}

pub struct CfgCfg {
    pub clear_mask: u32,
    pub save_mask: u32,
    pub load_mask: u32,
    pub dev_bbr: bool,
    pub dev_flash: bool,
    pub dev_eeprom: bool,
    pub dev_spi_flash: bool,
}

impl CfgCfg {
    /// Persist the current configuration to battery-backed RAM and flash.
    pub fn save_all() -> Self {
        Self {
            clear_mask: 0,
            save_mask: 0xffff_ffff,
            load_mask: 0,
            dev_bbr: true,
            dev_flash: true,
            dev_eeprom: false,
            dev_spi_flash: false,
        }
    }

    /// Revert to factory defaults.
    pub fn clear_all() -> Self {
        Self {
            clear_mask: 0xffff_ffff,
            save_mask: 0,
            load_mask: 0xffff_ffff,
            dev_bbr: true,
            dev_flash: true,
            dev_eeprom: false,
            dev_spi_flash: false,
        }
    }

    pub fn device_mask(&self) -> u8 {
        (if self.dev_bbr { 1 << 0 } else { 0 })
            | (if self.dev_flash { 1 << 1 } else { 0 })
            | (if self.dev_eeprom { 1 << 2 } else { 0 })
            | (if self.dev_spi_flash { 1 << 3 } else { 0 })
    }
}

impl SendablePacket for CfgCfg {
    type I = core::array::IntoIter<u8, 13>;

    fn class(&self) -> u8 {
        CLASS_CFG
    }

    fn id(&self) -> u8 {
        0x09
    }

    fn payload_len(&self) -> usize {
        13
    }

    fn payload_bytes(self) -> Self::I {
        let mut payload = [0u8; 13];
        payload[0..4].copy_from_slice(&self.clear_mask.to_le_bytes());
        payload[4..8].copy_from_slice(&self.save_mask.to_le_bytes());
        payload[8..12].copy_from_slice(&self.load_mask.to_le_bytes());
        payload[12] = self.device_mask();
        payload.into_iter()
    }
}

pub struct CfgRst {
    pub nav_bbr_mask: u16,
    pub reset_mode: u8,
}

impl SendablePacket for CfgRst {
    type I = core::array::IntoIter<u8, 4>;

    fn class(&self) -> u8 {
        CLASS_CFG
    }

    fn id(&self) -> u8 {
        0x04
    }

    fn payload_len(&self) -> usize {
        4
    }

    fn payload_bytes(self) -> Self::I {
        let [m0, m1] = self.nav_bbr_mask.to_le_bytes();
        [m0, m1, self.reset_mode, 0].into_iter()
    }
}
