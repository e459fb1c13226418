use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use tracing::{debug, warn};

use crate::api::{ApiSharedState, RuntimeSnapshot, TimelineEntry};
use crate::clock::SimulatedClock;
use crate::display::{format_countdown, headline};
use crate::error::{IngestError, TimeTravelError};
use crate::overtime::OvertimeNotifier;
use crate::schedule::model::{ItemId, Schedule, parse_schedule_response};
use crate::schedule::resolver::{ResolveOptions, SegmentState, resolve, timeline};
use crate::schedule::store::ScheduleStore;
use crate::time_travel;

#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub state: SegmentState,
    pub overtime_fired: bool,
}

/// Owns every piece of mutable timer state. Each mutation recomputes the
/// segment immediately so observers never see a stale reading.
pub struct TimerSession {
    store: ScheduleStore,
    clock: SimulatedClock,
    notifier: OvertimeNotifier,
    options: ResolveOptions,
    state: SegmentState,
    api_state: Option<Arc<Mutex<ApiSharedState>>>,
}

impl TimerSession {
    pub fn new(
        schedule: Schedule,
        clock: SimulatedClock,
        notifier: OvertimeNotifier,
        options: ResolveOptions,
    ) -> Self {
        Self {
            store: ScheduleStore::new(schedule),
            clock,
            notifier,
            options,
            state: SegmentState::empty(),
            api_state: None,
        }
    }

    pub fn with_api_state(mut self, api_state: Option<Arc<Mutex<ApiSharedState>>>) -> Self {
        self.api_state = api_state;
        self
    }

    pub fn tick(&mut self) -> TickOutcome {
        let now = self.clock.now();
        let schedule = self.store.snapshot();
        let state = resolve(schedule.items(), &now, &self.options);
        let overtime_fired = self.notifier.observe(
            state.is_overtime,
            state.active_item.as_ref().map(|item| item.title.as_str()),
        );
        self.state = state.clone();
        self.publish(&now, &schedule);
        TickOutcome {
            state,
            overtime_fired,
        }
    }

    pub fn state(&self) -> &SegmentState {
        &self.state
    }

    pub fn schedule(&self) -> Arc<Schedule> {
        self.store.snapshot()
    }

    pub fn generation(&self) -> u64 {
        self.store.generation()
    }

    pub fn clock(&self) -> &SimulatedClock {
        &self.clock
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    pub fn overtime_cues_fired(&self) -> u64 {
        self.notifier.fired()
    }

    pub fn replace_schedule(&mut self, schedule: Schedule) -> TickOutcome {
        self.store.replace(schedule);
        self.tick()
    }

    /// Parses a schedule service response and adopts it only when every entry
    /// is valid. On failure the current schedule stays in place.
    pub fn ingest(&mut self, response: &str) -> Result<TickOutcome, IngestError> {
        match parse_schedule_response(response) {
            Ok(schedule) => Ok(self.replace_schedule(schedule)),
            Err(err) => {
                warn!(error = %err, "schedule ingestion rejected");
                Err(err)
            }
        }
    }

    pub fn clear_schedule(&mut self) -> TickOutcome {
        self.store.clear();
        self.tick()
    }

    pub fn adjust_by(&mut self, delta_minutes: i64) -> TickOutcome {
        time_travel::adjust_by(&self.clock, delta_minutes);
        self.tick()
    }

    pub fn reset_offset(&mut self) -> TickOutcome {
        time_travel::reset_offset(&self.clock);
        self.tick()
    }

    pub fn jump_to_item_start(&mut self, id: &ItemId) -> Result<TickOutcome, TimeTravelError> {
        let schedule = self.store.snapshot();
        let item = schedule
            .find(id)
            .ok_or_else(|| TimeTravelError::UnknownItem(id.clone()))?;
        time_travel::jump_to_item_start(&self.clock, item);
        Ok(self.tick())
    }

    pub fn jump_to_near_end(&mut self, id: &ItemId) -> Result<TickOutcome, TimeTravelError> {
        let schedule = self.store.snapshot();
        let item = schedule
            .find(id)
            .ok_or_else(|| TimeTravelError::UnknownItem(id.clone()))?;
        time_travel::jump_to_near_end(
            &self.clock,
            schedule.items(),
            item,
            self.options.default_duration,
        )?;
        Ok(self.tick())
    }

    /// Near-end jump on whatever is currently active. `None` when nothing is.
    pub fn jump_active_to_near_end(&mut self) -> Option<Result<TickOutcome, TimeTravelError>> {
        let id = self.state.active_item.as_ref()?.id.clone();
        Some(self.jump_to_near_end(&id))
    }

    fn publish(&self, now: &DateTime<Local>, schedule: &Schedule) {
        let Some(api_state) = self.api_state.as_ref() else {
            return;
        };
        let headline = headline(&self.state, schedule.is_empty());
        let runtime = RuntimeSnapshot {
            simulated_iso_local: now.to_rfc3339(),
            real_iso_local: self.clock.real_now().to_rfc3339(),
            offset_ms: self.clock.offset_ms(),
            source_label: self.clock.source_label().to_string(),
            segment: self.state.clone(),
            countdown: format_countdown(self.state.time_left_ms, self.state.is_overtime),
            headline: headline.label.unwrap_or_default().to_string(),
            title: headline.title,
            overtime_latch: self.notifier.latch_state(),
            overtime_cues_fired: self.notifier.fired(),
            schedule_generation: self.store.generation(),
            updated_unix_ms: Local::now().timestamp_millis(),
        };
        let entries = timeline(
            schedule.items(),
            now.date_naive(),
            &Local,
            self.options.default_duration,
        )
        .iter()
        .map(TimelineEntry::from_segment)
        .collect();

        match api_state.lock() {
            Ok(mut guard) => {
                guard.runtime = runtime;
                guard.timeline = entries;
            }
            Err(_) => debug!("display feed state lock poisoned; skipping publish"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::NaiveTime;

    use super::*;
    use crate::clock::testing::ManualTimeSource;
    use crate::schedule::model::ScheduleItem;
    use crate::schedule::resolver::SegmentStatus;

    fn hm(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
    }

    fn two_items() -> Schedule {
        Schedule::new(vec![
            ScheduleItem::new("Talk", hm(9, 0), Some(hm(9, 20))),
            ScheduleItem::new("Panel", hm(9, 30), None),
        ])
    }

    fn session_at(
        hour: u32,
        minute: u32,
        schedule: Schedule,
    ) -> (TimerSession, ManualTimeSource, Arc<AtomicUsize>) {
        let manual = ManualTimeSource::at(2026, 6, 15, hour, minute, 0);
        let cues = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&cues);
        let session = TimerSession::new(
            schedule,
            SimulatedClock::new(Box::new(manual.clone())),
            OvertimeNotifier::new(Box::new(move || {
                seen.fetch_add(1, Ordering::SeqCst);
            })),
            ResolveOptions::default(),
        );
        (session, manual, cues)
    }

    #[test]
    fn ticking_across_the_end_fires_once() {
        let (mut session, manual, cues) = session_at(9, 19, two_items());
        assert!(!session.tick().state.is_overtime);

        let mut fired = 0;
        for _ in 0..180 {
            manual.advance_ms(1_000);
            if session.tick().overtime_fired {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
        assert_eq!(cues.load(Ordering::SeqCst), 1);
        assert_eq!(session.overtime_cues_fired(), 1);
        assert_eq!(session.state().status, SegmentStatus::Overtime);
    }

    #[test]
    fn time_travel_rearms_and_refires() {
        let (mut session, _manual, cues) = session_at(9, 25, two_items());
        assert!(session.tick().overtime_fired);

        let talk = session.schedule().items()[0].id.clone();
        let outcome = session.jump_to_item_start(&talk).expect("item exists");
        assert!(!outcome.state.is_overtime);
        assert_eq!(outcome.state.progress, 0.0);

        let outcome = session.adjust_by(21);
        assert!(outcome.overtime_fired);
        assert_eq!(cues.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn near_end_jump_resolves_five_seconds_left() {
        let (mut session, _manual, _cues) = session_at(12, 0, two_items());
        let panel = session.schedule().items()[1].id.clone();

        let outcome = session.jump_to_near_end(&panel).expect("item exists");
        assert_eq!(outcome.state.time_left_ms, 5_000);
        assert_eq!(
            outcome.state.active_item.map(|item| item.title),
            Some("Panel".to_string())
        );
    }

    #[test]
    fn active_near_end_requires_an_active_item() {
        let (mut session, _manual, _cues) = session_at(8, 0, two_items());
        session.tick();
        assert!(session.jump_active_to_near_end().is_none());

        let (mut session, _manual, _cues) = session_at(9, 5, two_items());
        session.tick();
        let outcome = session
            .jump_active_to_near_end()
            .expect("talk is active")
            .expect("talk is scheduled");
        assert_eq!(outcome.state.time_left_ms, 5_000);
    }

    #[test]
    fn failed_ingestion_keeps_previous_schedule() {
        let (mut session, _manual, _cues) = session_at(9, 5, two_items());
        session.tick();
        let generation = session.generation();

        let err = session
            .ingest(r#"[{ "startTime": "10:00", "type": "panel" }]"#)
            .expect_err("missing title should fail");
        assert!(matches!(err, IngestError::InvalidEntry { index: 0, .. }));
        assert_eq!(session.generation(), generation);
        assert_eq!(session.schedule().len(), 2);

        let outcome = session
            .ingest(r#"[{ "startTime": "09:00", "title": "Solo", "type": "other" }]"#)
            .expect("valid response");
        assert_eq!(session.generation(), generation + 1);
        assert_eq!(
            outcome.state.active_item.map(|item| item.title),
            Some("Solo".to_string())
        );
    }

    #[test]
    fn clearing_gives_the_zero_state() {
        let (mut session, _manual, _cues) = session_at(9, 5, two_items());
        session.tick();
        let outcome = session.clear_schedule();
        assert_eq!(outcome.state, SegmentState::empty());
    }

    #[test]
    fn unknown_item_jump_is_rejected() {
        let (mut session, _manual, _cues) = session_at(9, 5, two_items());
        let stale = session.schedule().items()[0].id.clone();
        session.replace_schedule(two_items());

        let err = session.jump_to_item_start(&stale).expect_err("stale id");
        assert_eq!(err, TimeTravelError::UnknownItem(stale));
        assert_eq!(session.clock().offset_ms(), 0);
    }

    #[test]
    fn publishes_snapshot_and_timeline() {
        let (session, _manual, _cues) = session_at(9, 10, two_items());
        let api_state = Arc::new(Mutex::new(ApiSharedState::default()));
        let mut session = session.with_api_state(Some(Arc::clone(&api_state)));
        session.adjust_by(1);

        let guard = api_state.lock().expect("state lock");
        assert_eq!(guard.runtime.offset_ms, 60_000);
        assert_eq!(guard.runtime.countdown, "09:00");
        assert_eq!(guard.runtime.headline, "Now Presenting");
        assert_eq!(guard.runtime.title, "Talk");
        assert_eq!(guard.runtime.source_label, "MANUAL");
        assert_eq!(guard.timeline.len(), 2);
        assert!(!guard.timeline[0].end_inferred);
        assert!(guard.timeline[1].end_inferred);
    }
}
