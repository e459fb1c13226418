use chrono::{Duration, Local};
use tracing::info;

use crate::clock::SimulatedClock;
use crate::error::TimeTravelError;
use crate::schedule::model::ScheduleItem;
use crate::schedule::resolver::{anchor_time_of_day, effective_end};

/// How far before an item's effective end a near-end jump lands.
pub const NEAR_END_LEAD_MS: i64 = 5_000;

pub fn adjust_by(clock: &SimulatedClock, delta_minutes: i64) -> i64 {
    let offset_ms = clock.shift_offset_ms(delta_minutes.saturating_mul(60_000));
    info!(delta_minutes, offset_ms, "time travel adjusted");
    offset_ms
}

pub fn reset_offset(clock: &SimulatedClock) {
    clock.set_offset_ms(0);
    info!("time travel reset");
}

/// Aligns simulated now with `item`'s start on the real current day.
pub fn jump_to_item_start(clock: &SimulatedClock, item: &ScheduleItem) -> i64 {
    let real = clock.real_now();
    let target = anchor_time_of_day(&Local, real.date_naive(), item.start_time);
    jump_to(clock, target.timestamp_millis(), real.timestamp_millis(), item)
}

/// Aligns simulated now with [`NEAR_END_LEAD_MS`] before `item`'s effective
/// end, inferred against the whole of `items`.
pub fn jump_to_near_end(
    clock: &SimulatedClock,
    items: &[ScheduleItem],
    item: &ScheduleItem,
    default_duration: Duration,
) -> Result<i64, TimeTravelError> {
    let real = clock.real_now();
    let end_ms = effective_end(items, item, real.date_naive(), &Local, default_duration)
        .ok_or_else(|| TimeTravelError::UnknownItem(item.id.clone()))?;
    Ok(jump_to(
        clock,
        end_ms.saturating_sub(NEAR_END_LEAD_MS),
        real.timestamp_millis(),
        item,
    ))
}

fn jump_to(clock: &SimulatedClock, target_ms: i64, real_ms: i64, item: &ScheduleItem) -> i64 {
    let offset_ms = target_ms.saturating_sub(real_ms);
    clock.set_offset_ms(offset_ms);
    info!(item = %item.title, offset_ms, "time travel jump");
    offset_ms
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveTime, Timelike};

    use super::*;
    use crate::clock::testing::ManualTimeSource;
    use crate::schedule::resolver::{ResolveOptions, resolve};

    fn hm(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
    }

    fn noon_clock() -> (SimulatedClock, ManualTimeSource) {
        let manual = ManualTimeSource::at(2026, 6, 15, 12, 0, 0);
        (SimulatedClock::new(Box::new(manual.clone())), manual)
    }

    #[test]
    fn adjust_accumulates_minutes_and_reset_clears() {
        let (clock, _manual) = noon_clock();
        assert_eq!(adjust_by(&clock, 15), 15 * 60_000);
        assert_eq!(adjust_by(&clock, -5), 10 * 60_000);
        assert_eq!(clock.now().minute(), 10);

        reset_offset(&clock);
        assert_eq!(clock.offset_ms(), 0);
        assert_eq!(clock.now(), clock.real_now());
    }

    #[test]
    fn jump_to_start_lands_exactly_on_the_item() {
        let (clock, _manual) = noon_clock();
        let item = ScheduleItem::new("Keynote", hm(9, 30), None);

        jump_to_item_start(&clock, &item);
        let now = clock.now();
        assert_eq!((now.hour(), now.minute(), now.second()), (9, 30, 0));
        assert_eq!(now.nanosecond(), 0);
        assert_eq!(now.date_naive(), clock.real_now().date_naive());
    }

    #[test]
    fn jump_samples_real_time_afresh() {
        let (clock, manual) = noon_clock();
        let item = ScheduleItem::new("Keynote", hm(9, 30), None);

        jump_to_item_start(&clock, &item);
        manual.advance_ms(42_123);
        jump_to_item_start(&clock, &item);

        let now = clock.now();
        assert_eq!((now.hour(), now.minute(), now.second()), (9, 30, 0));
        assert_eq!(now.timestamp_subsec_millis(), 0);
    }

    #[test]
    fn near_end_jump_leaves_five_seconds() {
        let (clock, _manual) = noon_clock();
        let items = vec![
            ScheduleItem::new("A", hm(9, 0), None),
            ScheduleItem::new("B", hm(9, 30), None),
        ];
        let options = ResolveOptions::default();

        jump_to_near_end(&clock, &items, &items[0], options.default_duration)
            .expect("item is scheduled");
        let state = resolve(&items, &clock.now(), &options);
        assert_eq!(
            state.active_item.map(|item| item.title),
            Some("A".to_string())
        );
        assert_eq!(state.time_left_ms, NEAR_END_LEAD_MS);
        assert!(!state.is_overtime);
    }

    #[test]
    fn near_end_of_last_item_uses_default_duration() {
        let (clock, _manual) = noon_clock();
        let items = vec![ScheduleItem::new("Closing", hm(15, 0), None)];

        jump_to_near_end(&clock, &items, &items[0], Duration::minutes(60))
            .expect("item is scheduled");
        let now = clock.now();
        assert_eq!((now.hour(), now.minute(), now.second()), (15, 59, 55));
    }

    #[test]
    fn near_end_rejects_unknown_item() {
        let (clock, _manual) = noon_clock();
        let items = vec![ScheduleItem::new("A", hm(9, 0), None)];
        let stranger = ScheduleItem::new("B", hm(10, 0), None);

        let err = jump_to_near_end(&clock, &items, &stranger, Duration::minutes(60))
            .expect_err("unknown item should fail");
        assert_eq!(err, TimeTravelError::UnknownItem(stranger.id.clone()));
        assert_eq!(clock.offset_ms(), 0);
    }
}
