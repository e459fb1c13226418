use chrono::{Local, TimeZone};

use crate::schedule::resolver::SegmentState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Headline {
    pub label: Option<&'static str>,
    pub title: String,
    pub description: Option<String>,
}

/// Status line and main title for the countdown screen.
pub fn headline(state: &SegmentState, schedule_is_empty: bool) -> Headline {
    if let Some(active) = &state.active_item {
        return Headline {
            label: Some(if state.is_overtime {
                "Overtime"
            } else {
                "Now Presenting"
            }),
            title: active.title.clone(),
            description: active.description.clone(),
        };
    }

    let (label, title) = if state.next_item.is_some() {
        (Some("Up Next"), "Break / Transition")
    } else if schedule_is_empty {
        (None, "No schedule loaded")
    } else {
        (None, "End of Day")
    };
    Headline {
        label,
        title: title.to_string(),
        description: None,
    }
}

/// `MM:SS` of the magnitude of `time_left_ms`, floored to whole seconds.
/// Minutes are not wrapped into hours. Overtime gets a leading `+`.
pub fn format_countdown(time_left_ms: i64, is_overtime: bool) -> String {
    let total_seconds = time_left_ms.unsigned_abs() / 1_000;
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    let sign = if is_overtime { "+" } else { "" };
    format!("{sign}{minutes:02}:{seconds:02}")
}

pub fn countdown_caption(is_overtime: bool) -> &'static str {
    if is_overtime {
        "Past Schedule"
    } else {
        "Remaining"
    }
}

pub fn format_progress(progress: f64) -> String {
    format!("{:.1}%", progress * 100.0)
}

/// `+15m` style label for a non-zero clock offset.
pub fn offset_label(offset_ms: i64) -> Option<String> {
    if offset_ms == 0 {
        return None;
    }
    let minutes = (offset_ms as f64 / 60_000.0).round() as i64;
    let sign = if offset_ms > 0 { "+" } else { "-" };
    Some(format!("{sign}{}m", minutes.unsigned_abs()))
}

pub fn local_hh_mm(unix_ms: i64) -> String {
    Local
        .timestamp_millis_opt(unix_ms)
        .single()
        .map(|instant| instant.format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string())
}
