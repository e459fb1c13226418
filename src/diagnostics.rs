use anyhow::Result;
use chrono::Local;

use crate::display::{
    countdown_caption, format_countdown, format_progress, headline, local_hh_mm, offset_label,
};
use crate::schedule::resolver::timeline;
use crate::session::TimerSession;

/// Prints one resolution of the loaded schedule and returns.
pub fn run_diagnostics(session: &mut TimerSession) -> Result<()> {
    let outcome = session.tick();
    let state = &outcome.state;
    let clock = session.clock();
    let now = clock.now();
    let schedule = session.schedule();

    println!("Chronometer diagnostics");
    println!("Timing source: {}", clock.source_label());
    println!("Simulated now: {}", now.format("%Y-%m-%d %H:%M:%S"));
    println!(
        "Clock offset: {}",
        offset_label(clock.offset_ms()).unwrap_or_else(|| "none".to_string())
    );
    println!(
        "Schedule: {} item(s), generation {}",
        schedule.len(),
        session.generation()
    );

    let segments = timeline(
        schedule.items(),
        now.date_naive(),
        &Local,
        session.options().default_duration,
    );
    for segment in &segments {
        let marker = if state
            .active_item
            .as_ref()
            .is_some_and(|active| active.id == segment.item.id)
        {
            ">"
        } else {
            " "
        };
        println!(
            "{marker} {} - {}{}  {} [{}]",
            local_hh_mm(segment.start_ms),
            local_hh_mm(segment.end_ms),
            if segment.end_inferred { "*" } else { " " },
            segment.item.title,
            segment.item.kind.label()
        );
    }

    let headline = headline(state, schedule.is_empty());
    println!("Status: {}", state.status.label());
    if let Some(label) = headline.label {
        println!("Headline: {label}");
    }
    println!("Title: {}", headline.title);
    println!(
        "Active: {}",
        state
            .active_item
            .as_ref()
            .map_or("-", |item| item.title.as_str())
    );
    println!(
        "Next: {}",
        state
            .next_item
            .as_ref()
            .map_or("-", |item| item.title.as_str())
    );
    if state.active_item.is_some() {
        println!(
            "{}: {}",
            countdown_caption(state.is_overtime),
            format_countdown(state.time_left_ms, state.is_overtime)
        );
        println!("Progress: {}", format_progress(state.progress));
    }
    Ok(())
}
