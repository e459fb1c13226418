use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::{Result, bail};
use chrono::{DateTime, Local, NaiveTime, TimeDelta, TimeZone};
use tracing::debug;

use crate::schedule::resolver::anchor_time_of_day;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimingSourceKind {
    System,
    Frozen,
}

/// Where "real now" comes from. The simulated clock layers its offset on top.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Local>;
    fn label(&self) -> &'static str;
}

pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn label(&self) -> &'static str {
        "SYSTEM_CLOCK"
    }
}

/// A clock that never advances. Used for reproducible reports.
pub struct FrozenTimeSource {
    at: DateTime<Local>,
}

impl FrozenTimeSource {
    pub fn new(at: DateTime<Local>) -> Self {
        Self { at }
    }

    pub fn today_at(time: NaiveTime) -> Self {
        let today = Local::now().date_naive();
        Self::new(anchor_time_of_day(&Local, today, time))
    }
}

impl TimeSource for FrozenTimeSource {
    fn now(&self) -> DateTime<Local> {
        self.at
    }

    fn label(&self) -> &'static str {
        "FROZEN"
    }
}

pub fn select_source(
    kind: TimingSourceKind,
    frozen_at: Option<NaiveTime>,
) -> Result<Box<dyn TimeSource>> {
    match (kind, frozen_at) {
        (TimingSourceKind::System, None) => Ok(Box::new(SystemTimeSource)),
        (TimingSourceKind::System, Some(_)) => {
            bail!("--frozen-at cannot be combined with the system timing source")
        }
        (TimingSourceKind::Frozen, Some(at)) => Ok(Box::new(FrozenTimeSource::today_at(at))),
        (TimingSourceKind::Frozen, None) => bail!("frozen timing source requires --frozen-at"),
    }
}

/// `real + offset_ms`. An offset that would leave chrono's representable range
/// leaves the instant unshifted.
pub fn simulated_now<Tz: TimeZone>(real: DateTime<Tz>, offset_ms: i64) -> DateTime<Tz> {
    let Some(delta) = TimeDelta::try_milliseconds(offset_ms) else {
        return real;
    };
    match real.clone().checked_add_signed(delta) {
        Some(shifted) => shifted,
        None => real,
    }
}

/// Real time plus an operator-controlled offset. The offset is atomic so any
/// thread may read it while the coordinator adjusts it.
pub struct SimulatedClock {
    source: Box<dyn TimeSource>,
    offset_ms: AtomicI64,
}

impl SimulatedClock {
    pub fn new(source: Box<dyn TimeSource>) -> Self {
        Self {
            source,
            offset_ms: AtomicI64::new(0),
        }
    }

    pub fn now(&self) -> DateTime<Local> {
        simulated_now(self.source.now(), self.offset_ms())
    }

    pub fn real_now(&self) -> DateTime<Local> {
        self.source.now()
    }

    pub fn source_label(&self) -> &'static str {
        self.source.label()
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Acquire)
    }

    pub fn set_offset_ms(&self, offset_ms: i64) {
        self.offset_ms.store(offset_ms, Ordering::Release);
        debug!(offset_ms, "clock offset set");
    }

    /// Adds `delta_ms` to the offset, saturating at the i64 bounds. Returns the
    /// new offset.
    pub fn shift_offset_ms(&self, delta_ms: i64) -> i64 {
        let previous = self
            .offset_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(delta_ms))
            })
            .unwrap_or_else(|current| current);
        let offset_ms = previous.saturating_add(delta_ms);
        debug!(delta_ms, offset_ms, "clock offset shifted");
        offset_ms
    }
}
