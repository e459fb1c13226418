use std::io::{self, Write};

use serde::Serialize;
use tracing::{info, warn};

/// Zero-argument side effect fired on the overtime edge.
pub trait OvertimeCue: Send {
    fn trigger(&mut self);
}

impl<F> OvertimeCue for F
where
    F: FnMut() + Send,
{
    fn trigger(&mut self) {
        self()
    }
}

/// Rings the terminal bell on stderr.
pub struct TerminalBell;

impl OvertimeCue for TerminalBell {
    fn trigger(&mut self) {
        let mut stderr = io::stderr().lock();
        if let Err(err) = stderr.write_all(b"\x07").and_then(|()| stderr.flush()) {
            warn!(error = %err, "unable to ring terminal bell");
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LatchState {
    #[default]
    Normal,
    Notified,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OvertimeLatch {
    state: LatchState,
}

impl OvertimeLatch {
    pub fn state(&self) -> LatchState {
        self.state
    }

    /// Feeds one observation of `is_overtime`. Returns true only on the
    /// `Normal -> Notified` edge.
    pub fn observe(&mut self, is_overtime: bool) -> bool {
        match (self.state, is_overtime) {
            (LatchState::Normal, true) => {
                self.state = LatchState::Notified;
                true
            }
            (LatchState::Notified, false) => {
                self.state = LatchState::Normal;
                false
            }
            _ => false,
        }
    }
}

pub struct OvertimeNotifier {
    latch: OvertimeLatch,
    cue: Box<dyn OvertimeCue>,
    fired: u64,
}

impl OvertimeNotifier {
    pub fn new(cue: Box<dyn OvertimeCue>) -> Self {
        Self {
            latch: OvertimeLatch::default(),
            cue,
            fired: 0,
        }
    }

    pub fn silent() -> Self {
        Self::new(Box::new(|| {}))
    }

    /// Returns true when this observation fired the cue.
    pub fn observe(&mut self, is_overtime: bool, title: Option<&str>) -> bool {
        if !self.latch.observe(is_overtime) {
            return false;
        }
        self.fired = self.fired.saturating_add(1);
        info!(item = title.unwrap_or("-"), fired = self.fired, "overtime reached");
        self.cue.trigger();
        true
    }

    pub fn latch_state(&self) -> LatchState {
        self.latch.state()
    }

    pub fn fired(&self) -> u64 {
        self.fired
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_notifier() -> (OvertimeNotifier, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let notifier = OvertimeNotifier::new(Box::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        (notifier, count)
    }

    #[test]
    fn latch_only_reports_the_rising_edge() {
        let mut latch = OvertimeLatch::default();
        assert!(!latch.observe(false));
        assert!(latch.observe(true));
        assert_eq!(latch.state(), LatchState::Notified);
        assert!(!latch.observe(true));
        assert!(!latch.observe(false));
        assert_eq!(latch.state(), LatchState::Normal);
        assert!(latch.observe(true));
    }

    #[test]
    fn steady_overtime_fires_once() {
        let (mut notifier, count) = counting_notifier();
        let ticks = [false, false, true, true, true, true];
        for is_overtime in ticks {
            notifier.observe(is_overtime, Some("Talk"));
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.fired(), 1);
    }

    #[test]
    fn leaving_overtime_rearms_the_cue() {
        let (mut notifier, count) = counting_notifier();
        for is_overtime in [true, true, false, false, true, true] {
            notifier.observe(is_overtime, None);
        }
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn changing_item_while_overtime_does_not_fire() {
        let (mut notifier, count) = counting_notifier();
        assert!(notifier.observe(true, Some("First")));
        assert!(!notifier.observe(true, Some("Second")));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.latch_state(), LatchState::Notified);
    }
}
