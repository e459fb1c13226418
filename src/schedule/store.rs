use std::sync::Arc;

use tracing::info;

use crate::schedule::model::Schedule;

/// Holds the current schedule as an immutable snapshot. Readers keep the `Arc`
/// they were handed, so a replacement never tears an in-flight resolution.
#[derive(Debug, Default)]
pub struct ScheduleStore {
    current: Arc<Schedule>,
    generation: u64,
}

impl ScheduleStore {
    pub fn new(schedule: Schedule) -> Self {
        Self {
            current: Arc::new(schedule),
            generation: 1,
        }
    }

    pub fn snapshot(&self) -> Arc<Schedule> {
        Arc::clone(&self.current)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn replace(&mut self, schedule: Schedule) {
        self.generation = self.generation.saturating_add(1);
        info!(
            items = schedule.len(),
            generation = self.generation,
            "schedule replaced"
        );
        self.current = Arc::new(schedule);
    }

    pub fn clear(&mut self) {
        self.replace(Schedule::default());
    }
}
