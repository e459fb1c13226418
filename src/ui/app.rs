use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Local;
use eframe::egui::{
    self, Align, Color32, Layout, ProgressBar, RichText, ScrollArea, TextEdit, TopBottomPanel, Ui,
};

use crate::display::{
    countdown_caption, format_countdown, format_progress, headline, local_hh_mm, offset_label,
};
use crate::schedule::model::{ItemId, SAMPLE_SCHEDULE_JSON};
use crate::schedule::resolver::{SegmentStatus, timeline};
use crate::session::{TickOutcome, TimerSession};

const STATUS_TTL: Duration = Duration::from_secs(3);

pub fn run_gui(
    session: TimerSession,
    tick_period: Duration,
    api_endpoint: Option<String>,
) -> Result<()> {
    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Chronometer")
            .with_inner_size([1200.0, 780.0])
            .with_min_inner_size([900.0, 600.0]),
        ..Default::default()
    };

    let app = ChronometerApp::new(session, tick_period, api_endpoint);

    eframe::run_native(
        "Chronometer",
        native_options,
        Box::new(move |cc| {
            configure_theme(&cc.egui_ctx);
            Ok(Box::new(app))
        }),
    )
    .map_err(|err| anyhow::anyhow!("failed to launch Chronometer GUI: {err}"))?;

    Ok(())
}

fn configure_theme(ctx: &egui::Context) {
    let mut visuals = egui::Visuals::light();
    visuals.override_text_color = Some(Color32::from_rgb(43, 33, 30));
    visuals.panel_fill = Color32::from_rgb(227, 218, 201);
    visuals.window_fill = Color32::from_rgb(235, 226, 210);
    visuals.widgets.inactive.bg_fill = Color32::from_rgb(214, 200, 180);
    visuals.widgets.hovered.bg_fill = Color32::from_rgb(191, 165, 150);
    visuals.widgets.active.bg_fill = Color32::from_rgb(140, 123, 112);
    visuals.selection.bg_fill = Color32::from_rgb(140, 63, 63);
    ctx.set_visuals(visuals);
}

const INK: Color32 = Color32::from_rgb(43, 33, 30);
const UMBER: Color32 = Color32::from_rgb(92, 75, 64);
const MUTED: Color32 = Color32::from_rgb(140, 123, 112);
const BRUISE: Color32 = Color32::from_rgb(140, 63, 63);

#[derive(Debug, Clone, PartialEq, Eq)]
enum IngestStatus {
    Idle,
    Parsing,
    Success(usize),
    Error(String),
}

struct ChronometerApp {
    session: TimerSession,
    tick_period: Duration,
    next_tick: Instant,
    status_message: Option<(String, Instant)>,
    editor_text: String,
    ingest_status: IngestStatus,
    api_endpoint: Option<String>,
}

impl ChronometerApp {
    fn new(mut session: TimerSession, tick_period: Duration, api_endpoint: Option<String>) -> Self {
        session.tick();
        Self {
            session,
            tick_period,
            next_tick: Instant::now() + tick_period,
            status_message: None,
            editor_text: SAMPLE_SCHEDULE_JSON.to_string(),
            ingest_status: IngestStatus::Idle,
            api_endpoint,
        }
    }

    fn set_status(&mut self, text: impl Into<String>) {
        self.status_message = Some((text.into(), Instant::now() + STATUS_TTL));
    }

    fn run_due_ticks(&mut self) {
        let now = Instant::now();
        if now < self.next_tick {
            return;
        }
        let outcome = self.session.tick();
        self.absorb(outcome);
        self.next_tick += self.tick_period;
        if self.next_tick <= now {
            self.next_tick = now + self.tick_period;
        }
    }

    fn absorb(&mut self, outcome: TickOutcome) {
        if outcome.overtime_fired {
            let title = outcome
                .state
                .active_item
                .map(|item| item.title)
                .unwrap_or_default();
            self.set_status(format!("Overtime: {title}"));
        }
    }

    fn jump_to_start(&mut self, id: &ItemId) {
        match self.session.jump_to_item_start(id) {
            Ok(outcome) => self.absorb(outcome),
            Err(err) => self.set_status(format!("Jump failed: {err}")),
        }
    }

    fn break_egg(&mut self) {
        match self.session.jump_active_to_near_end() {
            Some(Ok(outcome)) => self.absorb(outcome),
            Some(Err(err)) => self.set_status(format!("Jump failed: {err}")),
            None => self.set_status("Nothing is running."),
        }
    }

    fn run_pending_ingest(&mut self) {
        if self.ingest_status != IngestStatus::Parsing {
            return;
        }
        let text = self.editor_text.clone();
        self.ingest_status = match self.session.ingest(&text) {
            Ok(outcome) => {
                self.absorb(outcome);
                IngestStatus::Success(self.session.schedule().len())
            }
            Err(err) => IngestStatus::Error(err.to_string()),
        };
    }

    fn show_header(&mut self, ui: &mut Ui) {
        let clock = self.session.clock();
        let now = clock.now();
        let offset = offset_label(clock.offset_ms());
        let source = clock.source_label();

        ui.horizontal_wrapped(|ui| {
            ui.label(RichText::new("Chronometer").size(26.0).color(BRUISE).strong());
            ui.separator();
            ui.label(
                RichText::new(format!("Local Time: {}", now.format("%H:%M")))
                    .size(18.0)
                    .italics()
                    .color(MUTED),
            );
            if let Some(offset) = offset {
                ui.label(
                    RichText::new(format!("(Simulated: {offset})"))
                        .monospace()
                        .color(BRUISE),
                );
            }
            ui.separator();
            ui.label(RichText::new(format!("Timing: {source}")).color(UMBER));
        });

        if let Some((msg, _)) = &self.status_message {
            ui.label(RichText::new(msg).color(BRUISE).strong());
        }
    }

    fn show_timeline(&mut self, ui: &mut Ui) {
        let schedule = self.session.schedule();
        let state = self.session.state().clone();
        let now = self.session.clock().now();
        let segments = timeline(
            schedule.items(),
            now.date_naive(),
            &Local,
            self.session.options().default_duration,
        );

        ui.heading(RichText::new("Itinerary").color(UMBER).strong());
        ui.add_space(4.0);
        if segments.is_empty() {
            ui.label(RichText::new("No schedule loaded.").color(MUTED));
            return;
        }

        let mut jump: Option<ItemId> = None;
        ScrollArea::vertical()
            .id_salt("timeline_scroll")
            .show(ui, |ui| {
                for segment in &segments {
                    let is_active = state
                        .active_item
                        .as_ref()
                        .is_some_and(|active| active.id == segment.item.id);
                    let is_past = segment.end_ms <= now.timestamp_millis() && !is_active;
                    let color = if is_active {
                        BRUISE
                    } else if is_past {
                        MUTED
                    } else {
                        INK
                    };
                    let text = format!(
                        "{}  {}",
                        local_hh_mm(segment.start_ms),
                        segment.item.title
                    );
                    let response = ui
                        .selectable_label(is_active, RichText::new(text).color(color))
                        .on_hover_text(format!(
                            "{} until {}{}. Click to jump here.",
                            segment.item.kind.label(),
                            local_hh_mm(segment.end_ms),
                            if segment.end_inferred {
                                " (inferred)"
                            } else {
                                ""
                            }
                        ));
                    if response.clicked() {
                        jump = Some(segment.item.id.clone());
                    }
                }
            });

        if let Some(id) = jump {
            self.jump_to_start(&id);
        }
    }

    fn show_countdown(&mut self, ui: &mut Ui) {
        let state = self.session.state().clone();
        let headline = headline(&state, self.session.schedule().is_empty());

        ui.with_layout(Layout::top_down(Align::Center), |ui| {
            ui.add_space(24.0);
            if let Some(label) = headline.label {
                ui.label(
                    RichText::new(label.to_uppercase())
                        .size(20.0)
                        .italics()
                        .color(if state.active_item.is_some() {
                            BRUISE
                        } else {
                            UMBER
                        }),
                );
            }
            ui.label(RichText::new(&headline.title).size(44.0).color(INK).strong());
            if let Some(description) = &headline.description {
                ui.label(RichText::new(description).color(UMBER));
            }
            ui.add_space(16.0);

            if state.active_item.is_some() {
                ui.add(
                    ProgressBar::new(state.progress as f32)
                        .desired_width(420.0)
                        .fill(if state.is_overtime { BRUISE } else { UMBER })
                        .text(format_progress(state.progress)),
                );
                ui.add_space(12.0);
                ui.label(
                    RichText::new(format_countdown(state.time_left_ms, state.is_overtime))
                        .size(72.0)
                        .monospace()
                        .color(if state.is_overtime { BRUISE } else { INK })
                        .strong(),
                );
                ui.label(
                    RichText::new(countdown_caption(state.is_overtime).to_uppercase())
                        .color(MUTED),
                );
            }

            if let Some(next) = &state.next_item {
                ui.add_space(16.0);
                ui.label(
                    RichText::new(format!("Next: {} at {}", next.title, next.time_label()))
                        .color(UMBER),
                );
            }
            if state.status == SegmentStatus::Ended {
                ui.label(RichText::new("All items have finished.").color(MUTED));
            }
        });
    }

    fn show_controls(&mut self, ui: &mut Ui) {
        ui.heading(RichText::new("Time Machine").color(UMBER).strong());
        ui.separator();

        ui.horizontal_wrapped(|ui| {
            let mut adjust: Option<i64> = None;
            if ui.button("-5m").on_hover_text("Rewind 5m").clicked() {
                adjust = Some(-5);
            }
            if ui.button("+1m").clicked() {
                adjust = Some(1);
            }
            if ui.button("+15m").clicked() {
                adjust = Some(15);
            }
            if ui.button("+30m").on_hover_text("Fast Forward 30m").clicked() {
                adjust = Some(30);
            }
            if let Some(minutes) = adjust {
                let outcome = self.session.adjust_by(minutes);
                self.absorb(outcome);
            }
        });
        ui.horizontal(|ui| {
            if ui
                .button("Break the egg")
                .on_hover_text("Jump to 5 seconds before the current item ends")
                .clicked()
            {
                self.break_egg();
            }
            if ui.button("Reset").clicked() {
                let outcome = self.session.reset_offset();
                self.absorb(outcome);
            }
        });

        ui.add_space(12.0);
        ui.heading(RichText::new("New Schedule").color(UMBER).strong());
        ui.separator();
        ui.label(
            RichText::new("Paste a schedule response (JSON list of items).")
                .small()
                .color(MUTED),
        );
        ScrollArea::vertical()
            .id_salt("editor_scroll")
            .max_height(320.0)
            .show(ui, |ui| {
                ui.add(
                    TextEdit::multiline(&mut self.editor_text)
                        .code_editor()
                        .desired_rows(14)
                        .desired_width(f32::INFINITY),
                );
            });
        ui.horizontal(|ui| {
            let parsing = self.ingest_status == IngestStatus::Parsing;
            if ui
                .add_enabled(!parsing, egui::Button::new("Load Schedule"))
                .clicked()
            {
                self.ingest_status = IngestStatus::Parsing;
            }
            if ui.button("Sample").clicked() {
                self.editor_text = SAMPLE_SCHEDULE_JSON.to_string();
            }
            if ui.button("Clear").clicked() {
                let outcome = self.session.clear_schedule();
                self.absorb(outcome);
                self.ingest_status = IngestStatus::Idle;
            }
        });
        match &self.ingest_status {
            IngestStatus::Idle => {}
            IngestStatus::Parsing => {
                ui.label(RichText::new("Parsing...").color(MUTED));
            }
            IngestStatus::Success(count) => {
                ui.label(RichText::new(format!("Loaded {count} item(s).")).color(UMBER));
            }
            IngestStatus::Error(message) => {
                ui.label(
                    RichText::new(format!("Could not load schedule: {message}"))
                        .color(BRUISE)
                        .strong(),
                );
            }
        }
    }
}

impl eframe::App for ChronometerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if let Some((_, expires_at)) = &self.status_message
            && Instant::now() >= *expires_at
        {
            self.status_message = None;
        }

        self.run_pending_ingest();
        self.run_due_ticks();

        TopBottomPanel::top("header")
            .resizable(false)
            .show(ctx, |ui| self.show_header(ui));

        TopBottomPanel::bottom("footer")
            .resizable(false)
            .show(ctx, |ui| {
                ui.horizontal_wrapped(|ui| {
                    ui.label(
                        RichText::new(format!(
                            "Schedule generation {} | overtime cues {}",
                            self.session.generation(),
                            self.session.overtime_cues_fired()
                        ))
                        .color(MUTED),
                    );
                    if let Some(endpoint) = &self.api_endpoint {
                        ui.separator();
                        ui.label(
                            RichText::new(format!(
                                "API {endpoint}/v1 | state /v1/state | spec /openapi.yaml"
                            ))
                            .color(MUTED),
                        );
                    }
                });
            });

        egui::SidePanel::left("timeline_panel")
            .resizable(true)
            .min_width(240.0)
            .default_width(300.0)
            .show(ctx, |ui| self.show_timeline(ui));

        egui::SidePanel::right("controls_panel")
            .resizable(true)
            .min_width(300.0)
            .default_width(340.0)
            .show(ctx, |ui| self.show_controls(ui));

        egui::CentralPanel::default().show(ctx, |ui| self.show_countdown(ui));

        if self.ingest_status == IngestStatus::Parsing {
            ctx.request_repaint();
        } else {
            ctx.request_repaint_after(self.next_tick.saturating_duration_since(Instant::now()));
        }
    }
}
