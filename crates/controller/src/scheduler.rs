//! Interval-aligned control loop.
//!
//! Cycles run back to back with the loop suspended until the next wall-clock
//! boundary in between (`:00` and `:30` for a 30-minute interval).  The first
//! cycle runs immediately at startup.
//!
//! ```text
//! ┌──▶ cancelled? ──yes──▶ exit
//! │        │ no
//! │    run cycle (never interrupted, a watering hold always completes)
//! │        │
//! └── wait until next boundary ◀──or── cancellation
//! ```

use std::future::Future;
use std::time::Duration;

use time::{OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::pipeline::Controller;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of wall-clock time and the only way the controller suspends.
/// Retry backoff, the pump hold and the inter-cycle wait all go through
/// `sleep`, so tests can drive the loop without real waiting.
pub trait Clock {
    /// Local wall-clock time.
    fn now(&self) -> PrimitiveDateTime;

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()>;
}

/// Tokio timers plus the system clock shifted to a fixed UTC offset.
///
/// The offset is resolved once at startup, before any other thread exists,
/// because `time` refuses to query it from a multi-threaded process.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: UtcOffset,
}

impl SystemClock {
    pub fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> PrimitiveDateTime {
        let now = OffsetDateTime::now_utc().to_offset(self.offset);
        PrimitiveDateTime::new(now.date(), now.time())
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

// ---------------------------------------------------------------------------
// Boundary arithmetic
// ---------------------------------------------------------------------------

/// Seconds from `now` until the next multiple of `interval_minutes` past the
/// hour.  Standing exactly on a boundary yields a full interval.
///
/// `interval_minutes` must be non-zero and divide 60 (enforced by config
/// validation).
pub fn seconds_until_next_boundary(now: Time, interval_minutes: u32) -> u64 {
    let interval = u64::from(interval_minutes);
    let minute = u64::from(now.minute());
    let second = u64::from(now.second());

    let minutes_to_next = interval - minute % interval;
    (60 - second) + (minutes_to_next - 1) * 60
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

/// Drive `controller` until `cancel` fires.  Cancellation is honoured at the
/// top of the loop and while waiting for the next boundary, never mid-cycle.
pub async fn run<C: Clock>(
    controller: &mut Controller<C>,
    interval_minutes: u32,
    cancel: &CancellationToken,
) {
    info!(interval_minutes, "scheduler started");

    loop {
        if cancel.is_cancelled() {
            info!("cancellation requested — scheduler stopping");
            break;
        }

        let report = controller.run_cycle().await;
        debug!(
            sampled = report.sample.is_some(),
            forecast = ?report.forecast,
            decision = ?report.decision,
            "cycle finished"
        );

        let now = controller.clock().now();
        let wait = seconds_until_next_boundary(now.time(), interval_minutes);
        info!(seconds = wait, "next interval");

        tokio::select! {
            _ = controller.clock().sleep(Duration::from_secs(wait)) => {}
            _ = cancel.cancelled() => {}
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::WATER_DURATION;
    use crate::testing::{
        sample_at, test_controller, test_controller_with, Fixed, ManualClock, ScriptedProbe,
        TestRig,
    };
    use time::macros::{datetime, time};

    // -- seconds_until_next_boundary ------------------------------------------

    #[test]
    fn boundary_from_mid_interval() {
        assert_eq!(seconds_until_next_boundary(time!(14:07:10), 30), 1370);
    }

    #[test]
    fn boundary_second_half_of_hour() {
        // 14:45:00 → 15:00:00
        assert_eq!(seconds_until_next_boundary(time!(14:45:00), 30), 900);
    }

    #[test]
    fn boundary_one_second_before() {
        assert_eq!(seconds_until_next_boundary(time!(14:29:59), 30), 1);
    }

    #[test]
    fn boundary_exactly_on_boundary_waits_full_interval() {
        assert_eq!(seconds_until_next_boundary(time!(14:30:00), 30), 1800);
    }

    #[test]
    fn boundary_hourly_interval() {
        assert_eq!(seconds_until_next_boundary(time!(09:59:30), 60), 30);
        assert_eq!(seconds_until_next_boundary(time!(09:00:00), 60), 3600);
    }

    #[test]
    fn boundary_short_interval() {
        // 5-minute interval: 10:12:20 → 10:15:00
        assert_eq!(seconds_until_next_boundary(time!(10:12:20), 5), 160);
    }

    #[test]
    fn boundary_never_zero() {
        for minute in 0..60u8 {
            for second in [0u8, 1, 30, 59] {
                let t = Time::from_hms(0, minute, second).unwrap();
                let s = seconds_until_next_boundary(t, 30);
                assert!((1..=1800).contains(&s), "{t}: {s}");
            }
        }
    }

    // -- run ----------------------------------------------------------------

    #[tokio::test]
    async fn run_exits_immediately_when_already_cancelled() {
        let clock = ManualClock::new(datetime!(2024-06-01 14:07:10));
        let (mut controller, handles) = test_controller(clock, ScriptedProbe::always(50.0));
        let cancel = CancellationToken::new();
        cancel.cancel();

        run(&mut controller, 30, &cancel).await;

        assert!(handles.sink.borrow().is_empty(), "no cycle should have run");
        assert!(controller.clock().sleeps().is_empty());
    }

    #[tokio::test]
    async fn run_waits_for_boundaries_until_cancelled() {
        let cancel = CancellationToken::new();
        let clock = ManualClock::new(datetime!(2024-06-01 14:07:10))
            .cancel_after_sleeps(2, cancel.clone());
        let (mut controller, handles) = test_controller(clock, ScriptedProbe::always(50.0));

        run(&mut controller, 30, &cancel).await;

        // Two full cycles, each followed by a boundary wait.
        assert_eq!(handles.sink.borrow().len(), 2);
        let sleeps = controller.clock().sleeps();
        assert_eq!(
            sleeps,
            vec![Duration::from_secs(1370), Duration::from_secs(1800)]
        );

        let rows = handles.sink.borrow();
        assert_eq!(rows[0].timestamp, datetime!(2024-06-01 14:07:10));
        assert_eq!(rows[1].timestamp, datetime!(2024-06-01 14:30:00));
    }

    #[tokio::test]
    async fn cancellation_during_watering_lets_pump_finish() {
        // The first sleep is the pump hold; cancel fires while it is running.
        let cancel = CancellationToken::new();
        let clock = ManualClock::new(datetime!(2024-06-01 14:07:10))
            .cancel_after_sleeps(1, cancel.clone());
        let rig = TestRig {
            history: (0..47).map(|i| sample_at(i, 35.0)).collect(),
            // -1.0 * 10 + 30 = 20.0, below the threshold
            forecaster: Box::new(Fixed(-1.0)),
            ..TestRig::new(clock)
        };
        let (mut controller, handles) = test_controller_with(rig);

        run(&mut controller, 30, &cancel).await;

        assert_eq!(*handles.pump.borrow(), vec![true, false]);
        assert_eq!(handles.sink.borrow().len(), 1, "exactly one cycle");
        assert_eq!(controller.clock().sleeps()[0], WATER_DURATION);
    }
}
