use tinyvec::ArrayVec;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CfgItem {
    U1(u32, u8),
    U2(u32, u16),
    U4(u32, u32),
    U8(u32, u64),
}

impl CfgItem {
    pub fn packed_size(&self) -> usize {
        match self {
            CfgItem::U1(_, _) => 5,
            CfgItem::U2(_, _) => 6,
            CfgItem::U4(_, _) => 8,
            CfgItem::U8(_, _) => 12,
        }
    }

    pub fn to_bytes(&self) -> impl Iterator<Item = u8> {
        let mut arr = ArrayVec::<[u8; 12]>::new();
        match *self {
            CfgItem::U1(key, val) => {
                arr.extend(key.to_le_bytes());
                arr.extend(val.to_le_bytes());
            }
            CfgItem::U2(key, val) => {
                arr.extend(key.to_le_bytes());
                arr.extend(val.to_le_bytes());
            }
            CfgItem::U4(key, val) => {
                arr.extend(key.to_le_bytes());
                arr.extend(val.to_le_bytes());
            }
            CfgItem::U8(key, val) => {
                arr.extend(key.to_le_bytes());
                arr.extend(val.to_le_bytes());
            }
        }
        arr.into_iter()
    }
}

impl From<(u32, bool)> for CfgItem {
    fn from((key, val): (u32, bool)) -> Self {
        CfgItem::U1(key, val as u8)
    }
}

impl From<(u32, u8)> for CfgItem {
    fn from((key, val): (u32, u8)) -> Self {
        CfgItem::U1(key, val)
    }
}

impl From<(u32, u16)> for CfgItem {
    fn from((key, val): (u32, u16)) -> Self {
        CfgItem::U2(key, val)
    }
}

impl From<(u32, u32)> for CfgItem {
    fn from((key, val): (u32, u32)) -> Self {
        CfgItem::U4(key, val)
    }
}

impl From<(u32, u64)> for CfgItem {
    fn from((key, val): (u32, u64)) -> Self {
        CfgItem::U8(key, val)
    }
}

/// CFG-RXM low power mode
#[derive(defmt::Format, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum LowPowerMode {
    Continuous = 0,
    PowerSave = 1,
}

// Legacy NMEA message ids, class 0xf0
pub const NMEA_CLASS: u8 = 0xf0;
pub const NMEA_GGA: u8 = 0x00;
pub const NMEA_GLL: u8 = 0x01;
pub const NMEA_GSA: u8 = 0x02;
pub const NMEA_GSV: u8 = 0x03;
pub const NMEA_RMC: u8 = 0x04;
pub const NMEA_VTG: u8 = 0x05;

pub const DYNMODEL_PORTABLE: u8 = 0;
pub const DYNMODEL_STATIONARY: u8 = 2;

// CFG-GNSS constellation ids
pub const GNSS_GPS: u8 = 0;
pub const GNSS_SBAS: u8 = 1;
pub const GNSS_GALILEO: u8 = 2;
pub const GNSS_BEIDOU: u8 = 3;
pub const GNSS_QZSS: u8 = 5;
pub const GNSS_GLONASS: u8 = 6;

/// CFG-GNSS signal masks
pub const SIG_L1CA: u8 = 0x01;
pub const SIG_QZSS_L1CA_L1S: u8 = 0x05;

/// CFG-PM2 flags: cyclic tracking, wait for a time fix, keep ephemeris fresh
pub const PM2_FLAGS_CYCLIC: u32 = (1 << 17) | (1 << 12) | (1 << 10);

// Key/value configuration (CFG-VALSET), protocol 27 and later
pub const VALSET_MIN_PROTVER: u8 = 27;

pub const CFG_UART1OUTPROT_UBX: u32 = 0x1074_0001;
pub const CFG_UART1OUTPROT_NMEA: u32 = 0x1074_0002;

pub const CFG_MSGOUT_UBX_NAV_PVT_UART1: u32 = 0x2091_0007;
pub const CFG_MSGOUT_NMEA_GGA_UART1: u32 = 0x2091_00bb;
pub const CFG_MSGOUT_NMEA_GLL_UART1: u32 = 0x2091_00ca;
pub const CFG_MSGOUT_NMEA_GSA_UART1: u32 = 0x2091_00c0;
pub const CFG_MSGOUT_NMEA_GSV_UART1: u32 = 0x2091_00c5;
pub const CFG_MSGOUT_NMEA_RMC_UART1: u32 = 0x2091_00ac;
pub const CFG_MSGOUT_NMEA_VTG_UART1: u32 = 0x2091_00b1;

pub const CFG_RATE_MEAS: u32 = 0x3021_0001;
pub const CFG_NAVSPG_DYNMODEL: u32 = 0x2011_0021;
pub const CFG_ITFM_ENABLE: u32 = 0x1041_000d;

pub const CFG_PM_OPERATEMODE: u32 = 0x20d0_0001;
pub const OPERATEMODE_FULL: u8 = 0;
pub const OPERATEMODE_PSMCT: u8 = 2;
