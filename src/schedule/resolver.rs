use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, Offset, TimeZone};
use serde::Serialize;

use crate::schedule::model::ScheduleItem;

pub const DEFAULT_ITEM_DURATION_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Length given to the chronologically last item when it has no end time.
    pub default_duration: Duration,
    /// How long an overrun item stays active before the hold is released.
    /// `None` holds it until a later item starts.
    pub overtime_hold: Option<Duration>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            default_duration: Duration::minutes(DEFAULT_ITEM_DURATION_MINUTES),
            overtime_hold: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Idle,
    Running,
    Overtime,
    Ended,
}

impl SegmentStatus {
    pub fn label(self) -> &'static str {
        match self {
            SegmentStatus::Idle => "IDLE",
            SegmentStatus::Running => "RUNNING",
            SegmentStatus::Overtime => "OVERTIME",
            SegmentStatus::Ended => "ENDED",
        }
    }
}

/// What is happening at one instant. Derived on every tick, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentState {
    pub active_item: Option<ScheduleItem>,
    pub next_item: Option<ScheduleItem>,
    pub progress: f64,
    pub time_left_ms: i64,
    pub is_overtime: bool,
    pub total_duration_ms: i64,
    pub status: SegmentStatus,
}

impl SegmentState {
    pub fn empty() -> Self {
        Self {
            active_item: None,
            next_item: None,
            progress: 0.0,
            time_left_ms: 0,
            is_overtime: false,
            total_duration_ms: 0,
            status: SegmentStatus::Idle,
        }
    }
}

impl Default for SegmentState {
    fn default() -> Self {
        Self::empty()
    }
}

/// An item placed on a concrete day, with its effective end filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub item: &'a ScheduleItem,
    pub start_ms: i64,
    pub end_ms: i64,
    pub end_inferred: bool,
}

impl Segment<'_> {
    pub fn contains(&self, instant_ms: i64) -> bool {
        self.start_ms <= instant_ms && instant_ms < self.end_ms
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }
}

/// Sorts a copy of `items` by start time (stable, so ties keep their original
/// order) and anchors every item to `date` in `timezone`.
///
/// Effective end: the item's own end time, else the next item's start, else
/// `start + default_duration` for the chronologically last item.
pub fn timeline<'a, Tz>(
    items: &'a [ScheduleItem],
    date: NaiveDate,
    timezone: &Tz,
    default_duration: Duration,
) -> Vec<Segment<'a>>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    let mut sorted = items.iter().collect::<Vec<_>>();
    sorted.sort_by_key(|item| item.start_time);

    let starts = sorted
        .iter()
        .map(|item| anchor_time_of_day(timezone, date, item.start_time).timestamp_millis())
        .collect::<Vec<_>>();

    sorted
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let start_ms = starts[index];
            let (end_ms, end_inferred) = match item.end_time {
                Some(end) => (
                    anchor_time_of_day(timezone, date, end).timestamp_millis(),
                    false,
                ),
                None => match starts.get(index + 1) {
                    Some(next_start_ms) => (*next_start_ms, true),
                    None => (
                        start_ms.saturating_add(default_duration.num_milliseconds()),
                        true,
                    ),
                },
            };
            Segment {
                item,
                start_ms,
                end_ms,
                end_inferred,
            }
        })
        .collect()
}

/// Pure function of `(items, instant, options)`. Schedule times are anchored to
/// the calendar date of `instant`.
pub fn resolve<Tz>(
    items: &[ScheduleItem],
    instant: &DateTime<Tz>,
    options: &ResolveOptions,
) -> SegmentState
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    if items.is_empty() {
        return SegmentState::empty();
    }

    let segments = timeline(
        items,
        instant.date_naive(),
        &instant.timezone(),
        options.default_duration,
    );
    let instant_ms = instant.timestamp_millis();

    let next_item = segments
        .iter()
        .find(|segment| segment.start_ms > instant_ms)
        .map(|segment| segment.item.clone());
    let active = segments
        .iter()
        .find(|segment| segment.contains(instant_ms))
        .or_else(|| held_segment(&segments, instant_ms, options.overtime_hold));

    let Some(active) = active else {
        let status = if next_item.is_some() {
            SegmentStatus::Idle
        } else {
            SegmentStatus::Ended
        };
        return SegmentState {
            next_item,
            status,
            ..SegmentState::empty()
        };
    };

    let total_duration_ms = active.duration_ms();
    let time_left_ms = active.end_ms - instant_ms;
    let elapsed_ms = instant_ms - active.start_ms;
    let (progress, is_overtime) = if total_duration_ms <= 0 || time_left_ms < 0 {
        (1.0, true)
    } else {
        (elapsed_ms as f64 / total_duration_ms as f64, false)
    };

    SegmentState {
        active_item: Some(active.item.clone()),
        next_item,
        progress,
        time_left_ms,
        is_overtime,
        total_duration_ms,
        status: if is_overtime {
            SegmentStatus::Overtime
        } else {
            SegmentStatus::Running
        },
    }
}

/// Effective end of `item` on `date`, using the whole schedule for the
/// next-item lookup. `None` when `item` is not part of `items`.
pub fn effective_end<Tz>(
    items: &[ScheduleItem],
    item: &ScheduleItem,
    date: NaiveDate,
    timezone: &Tz,
    default_duration: Duration,
) -> Option<i64>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    timeline(items, date, timezone, default_duration)
        .into_iter()
        .find(|segment| segment.item.id == item.id)
        .map(|segment| segment.end_ms)
}

/// The most recently started item keeps the stage while nothing else has
/// started, optionally only for `hold` past its end.
fn held_segment<'s, 'a>(
    segments: &'s [Segment<'a>],
    instant_ms: i64,
    hold: Option<Duration>,
) -> Option<&'s Segment<'a>> {
    let held = segments
        .iter()
        .rev()
        .find(|segment| segment.start_ms <= instant_ms)?;
    match hold {
        Some(limit) if instant_ms.saturating_sub(held.end_ms) > limit.num_milliseconds() => None,
        _ => Some(held),
    }
}

/// Places a wall-clock time on `date`. Repeated wall times take the first
/// occurrence; skipped wall times are read with the offset in force before the
/// gap.
pub fn anchor_time_of_day<Tz>(timezone: &Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Tz>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    let naive = date.and_time(time);
    match timezone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(first, _second) => first,
        LocalResult::None => {
            let before_gap = timezone
                .from_local_datetime(&(naive - Duration::hours(3)))
                .earliest()
                .map(|dt| *dt.offset());
            match before_gap {
                Some(offset) => {
                    let utc_seconds = i64::from(offset.fix().local_minus_utc());
                    timezone.from_utc_datetime(&(naive - Duration::seconds(utc_seconds)))
                }
                None => timezone.from_utc_datetime(&naive),
            }
        }
    }
}
