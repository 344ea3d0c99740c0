//! Millisecond time, in the units of the SysTick monotonic.

pub type Instant = fugit::TimerInstantU32<1000>;
pub type Duration = fugit::MillisDurationU32;

/// Monotonic millisecond clock. Wraps after ~49 days; comparisons are wrap-aware.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Time since `since`, or zero if `since` lies in the future.
pub fn elapsed<C: Clock + ?Sized>(clock: &C, since: Instant) -> Duration {
    clock
        .now()
        .checked_duration_since(since)
        .unwrap_or(Duration::from_ticks(0))
}
