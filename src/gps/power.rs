//! The periodic state machine: probe once, then cycle the chip between awake and asleep.

use defmt::{debug, error, info, warn};

use super::{
    ack::ResponseOutcome,
    config::{
        GpsConfig, FIXED_POSITION_DELAY_TICKS, FLOW_TIMEOUT, FRAME_ERROR_THRESHOLD,
        GPS_THREAD_INTERVAL, IDLE_TICK, RECONFIGURE_ACK_TIMEOUT, WHILE_ACTIVE_INTERVAL,
    },
    probe,
    status::{publish_update, StatusSink},
    GnssModel, Gps, PowerPhase,
};
use crate::{
    error::GpsError,
    hooks::ChipHooks,
    nmea,
    time::{elapsed, Clock, Duration},
    transport::Transport,
    ubx::packets::{CfgRxm, RxmPmreq},
};

/// Any traffic on the line wakes a sleeping chip.
const WAKE_PULSE: [u8; 2] = [0xff, 0xff];

impl<T, C, H> Gps<T, C, H>
where
    T: Transport,
    C: Clock,
    H: ChipHooks,
{
    /// Run one scheduler step and publish any status change to `sink`. Returns how long to
    /// wait before the next call.
    pub fn tick<S: StatusSink + ?Sized>(&mut self, config: &GpsConfig, sink: &mut S) -> Duration {
        self.expire_stale(config);
        match self.state.phase {
            PowerPhase::Disconnected | PowerPhase::Probing => {
                if core::mem::take(&mut self.needs_probe) {
                    self.connect(config);
                }
            }
            PowerPhase::Awake | PowerPhase::Asleep => self.step(config),
        }

        publish_update(&mut self.state, sink);

        if self.state.phase == PowerPhase::Awake {
            GPS_THREAD_INTERVAL
        } else {
            IDLE_TICK
        }
    }

    /// `false` puts the chip to sleep now and keeps it there; `true` lifts that and wakes it
    /// on the next tick.
    pub fn force_wake(&mut self, on: bool) {
        if on {
            debug!("gps: wake requested");
            self.wake_allowed = true;
            self.parked = false;
            self.fixed_delay_ctr = 0;
            if self.state.phase == PowerPhase::Asleep {
                self.wake_requested = true;
            }
        } else {
            debug!("gps: wake forbidden");
            self.wake_allowed = false;
            self.wake_requested = false;
            if self.state.phase == PowerPhase::Awake {
                self.go_to_sleep(None);
            }
        }
    }

    fn connect(&mut self, config: &GpsConfig) {
        let Some(transport) = self.transport.as_mut() else {
            warn!("gps: {}", GpsError::TransportAbsent);
            return;
        };

        self.state.set_phase(PowerPhase::Probing);
        match probe::probe(transport, &self.clock, &mut self.arbiter) {
            Ok(detection) => {
                probe::configure(
                    transport,
                    &self.clock,
                    &mut self.arbiter,
                    &detection,
                    config,
                );
                self.state.model = detection.model;
                self.state.model_info = detection.info;
                self.state.baud_rate = Some(detection.baud_rate);
                self.state.set_connected(true);
                self.frame_errors = 0;
                self.degraded = false;
                self.wake_up();
                // configure just did it
                self.reconfigure_pending = false;
            }
            Err(e) => {
                warn!("gps: {}, giving up until asked to probe again", e);
                self.state.model = GnssModel::Unknown;
                self.state.model_info = None;
                self.state.baud_rate = None;
                self.state.set_connected(false);
                self.state.set_phase(PowerPhase::Disconnected);
            }
        }
    }

    fn step(&mut self, config: &GpsConfig) {
        if self.state.phase == PowerPhase::Asleep {
            let forced = core::mem::take(&mut self.wake_requested);
            let rested = self
                .sleep_time(config)
                .map_or(false, |t| elapsed(&self.clock, self.last_sleep_start) > t);
            if self.wake_allowed && (forced || rested) {
                self.wake_up();
            }
        }

        if self.state.phase == PowerPhase::Awake {
            self.step_awake(config);
        }
    }

    fn step_awake(&mut self, config: &GpsConfig) {
        let now = self.clock.now();

        if core::mem::take(&mut self.reconfigure_pending) {
            self.reconfigure(config);
        }

        if let Some(transport) = self.transport.as_mut() {
            if self.hooks.while_idle(transport) {
                self.last_flow = Some(now);
                self.state.set_connected(true);
            }
        }

        if elapsed(&self.clock, self.last_while_active) >= WHILE_ACTIVE_INTERVAL {
            self.last_while_active = now;
            if let Some(transport) = self.transport.as_mut() {
                self.hooks.while_active(transport);
            }
        }

        if !self.state.has_time && self.hooks.look_for_time() {
            info!("gps: got time");
            self.state.has_time = true;
        }

        let got_location = self.hooks.look_for_location();
        if got_location {
            self.state.fix.last_fix = Some(now);
            self.state.set_valid_location(true);
        }
        if let Some(n) = self.hooks.satellites() {
            self.state.set_satellites(n);
        }

        if config.fixed_position.is_some() && self.state.fix.has_valid_location && !self.parked {
            // keep counting satellites for a while before parking
            self.fixed_delay_ctr = self.fixed_delay_ctr.saturating_add(1);
            if self.fixed_delay_ctr >= FIXED_POSITION_DELAY_TICKS {
                info!("gps: fixed position, parking chip");
                self.parked = true;
                self.go_to_sleep(None);
            }
            return;
        }

        let Some(wake_time) = config.wake_time() else {
            return;
        };
        let too_long = elapsed(&self.clock, self.last_wake_start) > wake_time;
        if (got_location && self.state.has_time) || too_long {
            if too_long {
                debug!("gps: no fix after {}, going back to sleep", wake_time);
            }
            let sleep_for = self.sleep_time(config);
            self.go_to_sleep(sleep_for);
        }
    }

    /// `None` means sleep until woken.
    fn sleep_time(&self, config: &GpsConfig) -> Option<Duration> {
        if self.parked && config.fixed_position.is_some() {
            None
        } else {
            Some(config.update_interval)
        }
    }

    /// Forget fixes and traffic once they are too old to count, before the clock wraps far
    /// enough to make them look recent.
    fn expire_stale(&mut self, config: &GpsConfig) {
        let lifetime = config.fix_lifetime();
        if let Some(t) = self.state.fix.last_fix {
            if elapsed(&self.clock, t) >= lifetime {
                self.state.fix.last_fix = None;
            }
        }
        self.state.set_valid_location(self.state.fix.last_fix.is_some());

        if let Some(t) = self.last_flow {
            if elapsed(&self.clock, t) >= FLOW_TIMEOUT {
                self.last_flow = None;
            }
        }
    }

    fn wake_up(&mut self) {
        if !self.wake_allowed {
            debug!("gps: wake inhibited");
            self.go_to_sleep(None);
            return;
        }
        if self.state.phase == PowerPhase::Awake {
            return;
        }

        self.last_wake_start = self.clock.now();
        if let Some(transport) = self.transport.as_mut() {
            if let Err(e) = transport.write_all(&WAKE_PULSE) {
                error!("gps: wake write failed: {}", defmt::Debug2Format(&e));
            }
        }
        self.reconfigure_pending = self.state.model == GnssModel::Ublox;
        self.state.set_phase(PowerPhase::Awake);
    }

    fn go_to_sleep(&mut self, sleep_for: Option<Duration>) {
        if self.state.phase == PowerPhase::Asleep {
            return;
        }

        self.last_sleep_start = self.clock.now();
        if let Some(transport) = self.transport.as_mut() {
            match self.state.model {
                GnssModel::Ublox => {
                    let request = RxmPmreq {
                        duration_ms: sleep_for.map_or(0, |d| d.to_millis()),
                        backup: true,
                    };
                    if let Err(e) = self.arbiter.send(transport, request) {
                        error!("gps: sleep request failed: {}", e);
                    }
                }
                GnssModel::Mtk => {
                    if let Err(e) = nmea::write_sentence(transport, "PMTK161,0") {
                        error!("gps: standby request failed: {}", e);
                    }
                }
                GnssModel::Uc6850 | GnssModel::Unknown => {
                    debug!("gps: no standby command for {}", self.state.model);
                }
            }
        }
        self.state.set_phase(PowerPhase::Asleep);
    }

    /// Power settings may be lost in backup; reapply them on every wake.
    fn reconfigure(&mut self, config: &GpsConfig) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        let outcome = self.arbiter.exchange(
            transport,
            &self.clock,
            CfgRxm::for_config(config),
            RECONFIGURE_ACK_TIMEOUT,
        );
        match outcome {
            ResponseOutcome::PositiveAck => {
                if self.degraded {
                    info!("gps: link recovered");
                }
                self.frame_errors = 0;
                self.degraded = false;
            }
            ResponseOutcome::FrameError => {
                self.frame_errors = self.frame_errors.saturating_add(1);
                if self.frame_errors >= FRAME_ERROR_THRESHOLD && !self.degraded {
                    warn!(
                        "gps: {=u8} frame errors in a row, link degraded",
                        self.frame_errors
                    );
                    self.degraded = true;
                }
            }
            ResponseOutcome::NegativeAck => warn!("gps: CFG-RXM rejected on wake"),
            ResponseOutcome::None => debug!("gps: no ack for CFG-RXM on wake"),
        }
    }
}
