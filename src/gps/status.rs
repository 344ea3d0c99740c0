//! Change-triggered status notifications to the rest of the firmware.

use super::{DeviceState, GnssModel, PowerPhase};

#[derive(defmt::Format, Debug, Copy, Clone, PartialEq, Eq)]
pub struct GpsStatus {
    pub phase: PowerPhase,
    pub model: GnssModel,
    pub has_lock: bool,
    pub satellites: u8,
    pub is_connected: bool,
}

/// Subscriber for status updates, e.g. the node-info broadcaster or a display.
pub trait StatusSink {
    fn publish(&mut self, status: &GpsStatus);
}

impl<F: FnMut(&GpsStatus)> StatusSink for F {
    fn publish(&mut self, status: &GpsStatus) {
        self(status)
    }
}

/// Hand the current status to `sink` if anything observable changed since the last call.
/// Returns whether an update was emitted.
pub fn publish_update<S: StatusSink + ?Sized>(state: &mut DeviceState, sink: &mut S) -> bool {
    if !core::mem::take(&mut state.should_publish) {
        return false;
    }
    let status = state.status();
    defmt::debug!("gps: publish {}", status);
    sink.publish(&status);
    true
}

/// Plain-language rating of a dilution of precision given in hundredths, as in NAV-PVT
/// `p_dop`.
pub fn dop_string(dop: u32) -> &'static str {
    match dop / 100 {
        0..=1 => "ideal",
        2 => "excellent",
        3..=5 => "good",
        6..=10 => "moderate",
        11..=20 => "fair",
        _ => "poor",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[test]
    fn publishes_once_per_change() {
        let mut state = DeviceState::default();
        let mut seen = Vec::new();
        let mut sink = |s: &GpsStatus| seen.push(*s);

        state.set_phase(PowerPhase::Probing);
        assert!(publish_update(&mut state, &mut sink));
        assert!(!publish_update(&mut state, &mut sink));

        state.set_phase(PowerPhase::Probing);
        assert!(!publish_update(&mut state, &mut sink));

        state.set_connected(true);
        assert!(publish_update(&mut state, &mut sink));

        drop(sink);
        assert_eq!(seen.len(), 2);
        assert!(seen[1].is_connected);
    }

    #[test]
    fn dop_ratings() {
        assert_eq!(dop_string(99), "ideal");
        assert_eq!(dop_string(199), "ideal");
        assert_eq!(dop_string(250), "excellent");
        assert_eq!(dop_string(500), "good");
        assert_eq!(dop_string(1099), "moderate");
        assert_eq!(dop_string(2000), "fair");
        assert_eq!(dop_string(2100), "poor");
        assert_eq!(dop_string(9999), "poor");
    }
}
