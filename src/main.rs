mod api;
mod clock;
mod diagnostics;
mod display;
mod error;
mod overtime;
mod schedule;
mod session;
mod ticker;
mod time_travel;
mod ui;

use std::env;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::NaiveTime;
use clap::{ArgAction, Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::{ApiServer, ApiServerConfig, ApiSharedState};
use crate::clock::{SimulatedClock, TimingSourceKind, select_source};
use crate::display::{format_countdown, format_progress, headline};
use crate::overtime::{OvertimeNotifier, TerminalBell};
use crate::schedule::model::{
    SAMPLE_SCHEDULE_JSON, Schedule, load_schedule_file, parse_schedule_response, parse_time_of_day,
};
use crate::schedule::resolver::{DEFAULT_ITEM_DURATION_MINUTES, ResolveOptions};
use crate::session::TimerSession;
use crate::ticker::{DEFAULT_TICK_MS, Ticker};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliTimingSource {
    System,
    Frozen,
}

impl From<CliTimingSource> for TimingSourceKind {
    fn from(value: CliTimingSource) -> Self {
        match value {
            CliTimingSource::System => TimingSourceKind::System,
            CliTimingSource::Frozen => TimingSourceKind::Frozen,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "chronometer",
    version,
    about = "Agenda countdown timer with time travel for rehearsals"
)]
struct Cli {
    /// Schedule service response (JSON list of items) to load.
    #[arg(long, default_value = "schedule.json")]
    schedule: PathBuf,

    /// Load the built-in conference sample instead of --schedule.
    #[arg(long)]
    sample: bool,

    #[arg(long, value_enum)]
    timing_source: Option<CliTimingSource>,

    /// Pin the clock to HH:MM[:SS] today. Implies the frozen timing source.
    #[arg(long, value_parser = parse_frozen_at)]
    frozen_at: Option<NaiveTime>,

    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    offset_minutes: i64,

    #[arg(long, default_value_t = DEFAULT_TICK_MS)]
    tick_ms: u64,

    #[arg(long, default_value_t = DEFAULT_ITEM_DURATION_MINUTES)]
    default_duration_min: i64,

    /// Release an overrun item after this many minutes.
    #[arg(long)]
    overtime_hold_min: Option<i64>,

    #[arg(long)]
    diagnostics: bool,

    /// Print one status line per tick instead of opening the window.
    #[arg(long)]
    headless: bool,

    /// Stop headless mode after this many ticks.
    #[arg(long, requires = "headless")]
    ticks: Option<u64>,

    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    api_enabled: bool,

    #[arg(long, default_value = "0.0.0.0")]
    api_bind: String,

    #[arg(long, default_value_t = 8098)]
    api_port: u16,

    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    mdns_enabled: bool,

    #[arg(long, default_value = "chronometer")]
    mdns_instance: String,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    if cli.tick_ms == 0 {
        bail!("--tick-ms must be greater than zero");
    }
    if cli.default_duration_min <= 0 {
        bail!("--default-duration-min must be greater than zero");
    }
    if cli.overtime_hold_min.is_some_and(|minutes| minutes < 0) {
        bail!("--overtime-hold-min must not be negative");
    }

    let schedule = load_schedule(&cli)?;
    let kind = match (cli.timing_source, cli.frozen_at) {
        (Some(source), _) => TimingSourceKind::from(source),
        (None, Some(_)) => TimingSourceKind::Frozen,
        (None, None) => TimingSourceKind::System,
    };
    let clock = SimulatedClock::new(select_source(kind, cli.frozen_at)?);
    if cli.offset_minutes != 0 {
        time_travel::adjust_by(&clock, cli.offset_minutes);
    }
    let options = ResolveOptions {
        default_duration: chrono::Duration::minutes(cli.default_duration_min),
        overtime_hold: cli.overtime_hold_min.map(chrono::Duration::minutes),
    };

    if cli.diagnostics {
        let mut session = TimerSession::new(schedule, clock, OvertimeNotifier::silent(), options);
        return diagnostics::run_diagnostics(&mut session);
    }

    let api_server = if cli.api_enabled {
        let server = ApiServer::start(ApiServerConfig {
            bind_addr: cli.api_bind.clone(),
            port: cli.api_port,
            mdns_enabled: cli.mdns_enabled,
            mdns_instance: cli.mdns_instance.clone(),
        })
        .with_context(|| {
            format!(
                "failed to start local API at {}:{}",
                cli.api_bind, cli.api_port
            )
        })?;
        Some(server)
    } else {
        None
    };
    let api_state: Option<Arc<Mutex<ApiSharedState>>> = api_server
        .as_ref()
        .map(|server| Arc::clone(&server.state));

    let session = TimerSession::new(
        schedule,
        clock,
        OvertimeNotifier::new(Box::new(TerminalBell)),
        options,
    )
    .with_api_state(api_state);
    let tick_period = Duration::from_millis(cli.tick_ms);

    let result = if cli.headless {
        run_headless(session, tick_period, cli.ticks)
    } else {
        let endpoint = api_server
            .as_ref()
            .map(|_| format!("http://{}:{}", cli.api_bind, cli.api_port));
        ui::app::run_gui(session, tick_period, endpoint)
    };

    drop(api_server);
    result
}

fn init_logging() {
    let debug_enabled = env::var("CHRONOMETER_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_schedule(cli: &Cli) -> Result<Schedule> {
    if cli.sample {
        return parse_schedule_response(SAMPLE_SCHEDULE_JSON)
            .context("built-in sample schedule is invalid");
    }
    let schedule = load_schedule_file(&cli.schedule)
        .with_context(|| format!("failed to load {}", cli.schedule.display()))?;
    info!(
        items = schedule.len(),
        path = %cli.schedule.display(),
        "schedule loaded"
    );
    Ok(schedule)
}

fn run_headless(mut session: TimerSession, period: Duration, ticks: Option<u64>) -> Result<()> {
    print_status_line(&mut session);
    if ticks.is_some_and(|limit| limit <= 1) {
        return Ok(());
    }

    let (ticker, rx) = Ticker::start(period)?;
    for count in rx.iter() {
        print_status_line(&mut session);
        if ticks.is_some_and(|limit| count + 1 >= limit) {
            break;
        }
    }
    drop(ticker);
    Ok(())
}

fn print_status_line(session: &mut TimerSession) {
    let outcome = session.tick();
    let state = &outcome.state;
    let now = session.clock().now();
    let headline = headline(state, session.schedule().is_empty());
    let mut line = format!(
        "{} {:<8} {}",
        now.format("%H:%M:%S"),
        state.status.label(),
        headline.title
    );
    if state.active_item.is_some() {
        line.push_str(&format!(
            " {} {}",
            format_countdown(state.time_left_ms, state.is_overtime),
            format_progress(state.progress)
        ));
    }
    if let Some(next) = &state.next_item {
        line.push_str(&format!(" | next {} {}", next.time_label(), next.title));
    }
    println!("{line}");
}

fn parse_frozen_at(input: &str) -> Result<NaiveTime, String> {
    parse_time_of_day(input).ok_or_else(|| format!("expected HH:MM or HH:MM:SS, got '{input}'"))
}
