use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use tracing::debug;

pub const DEFAULT_TICK_MS: u64 = 1_000;

/// Sends a monotonically increasing tick number every `period` until dropped.
/// Missed deadlines are skipped rather than replayed in a burst.
pub struct Ticker {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn start(period: Duration) -> Result<(Self, Receiver<u64>)> {
        if period.is_zero() {
            bail!("tick period must be greater than zero");
        }
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let join = thread::Builder::new()
            .name("chronometer-ticker".to_string())
            .spawn(move || {
                let mut next = Instant::now() + period;
                let mut count = 0_u64;
                while !stop_for_thread.load(Ordering::Relaxed) {
                    let now = Instant::now();
                    if now < next {
                        thread::park_timeout(next - now);
                        continue;
                    }
                    count += 1;
                    if tx.send(count).is_err() {
                        break;
                    }
                    next += period;
                    if next <= now {
                        next = now + period;
                    }
                }
                debug!(ticks = count, "ticker stopped");
            })
            .context("failed to spawn tick thread")?;
        Ok((
            Self {
                stop,
                join: Some(join),
            },
            rx,
        ))
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            join.thread().unpark();
            let _ = join.join();
        }
    }
}
