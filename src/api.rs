use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, UdpSocket};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use chrono::{Local, TimeZone};
use mdns_sd::{ServiceDaemon, ServiceInfo};
use serde::Serialize;
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, info, warn};

use crate::overtime::LatchState;
use crate::schedule::model::ScheduleItem;
use crate::schedule::resolver::{Segment, SegmentState};

pub const MDNS_SERVICE_TYPE: &str = "_chronometer._tcp.local.";
const OPENAPI_YAML: &str = include_str!("../openapi.yaml");

/// What the display feed reports for the latest tick.
#[derive(Debug, Clone, Serialize, Default)]
pub struct RuntimeSnapshot {
    pub simulated_iso_local: String,
    pub real_iso_local: String,
    pub offset_ms: i64,
    pub source_label: String,
    pub segment: SegmentState,
    pub countdown: String,
    pub headline: String,
    pub title: String,
    pub overtime_latch: LatchState,
    pub overtime_cues_fired: u64,
    pub schedule_generation: u64,
    pub updated_unix_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub item: ScheduleItem,
    pub start_iso_local: String,
    pub effective_end_iso_local: String,
    pub end_inferred: bool,
}

impl TimelineEntry {
    pub fn from_segment(segment: &Segment<'_>) -> Self {
        Self {
            item: segment.item.clone(),
            start_iso_local: iso_local_from_ms(segment.start_ms),
            effective_end_iso_local: iso_local_from_ms(segment.end_ms),
            end_inferred: segment.end_inferred,
        }
    }
}

#[derive(Debug)]
pub struct ApiSharedState {
    pub runtime: RuntimeSnapshot,
    pub timeline: Vec<TimelineEntry>,
    total_requests: u64,
    server_started_unix_ms: i64,
}

impl Default for ApiSharedState {
    fn default() -> Self {
        Self {
            runtime: RuntimeSnapshot::default(),
            timeline: Vec::new(),
            total_requests: 0,
            server_started_unix_ms: Local::now().timestamp_millis(),
        }
    }
}

impl ApiSharedState {
    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    pub fn server_started_unix_ms(&self) -> i64 {
        self.server_started_unix_ms
    }
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_addr: String,
    pub port: u16,
    pub mdns_enabled: bool,
    pub mdns_instance: String,
}

pub struct ApiServer {
    pub state: Arc<Mutex<ApiSharedState>>,
    stop: Arc<AtomicBool>,
    http_join: Option<JoinHandle<()>>,
    mdns: Option<ServiceDaemon>,
}

impl ApiServer {
    pub fn start(config: ApiServerConfig) -> Result<Self> {
        let bind = format!("{}:{}", config.bind_addr, config.port);
        let server = Server::http(&bind)
            .map_err(|err| anyhow::anyhow!("failed to start API server on {bind}: {err}"))?;
        info!(%bind, "display feed listening");
        let state = Arc::new(Mutex::new(ApiSharedState::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let state_for_thread = Arc::clone(&state);
        let stop_for_thread = Arc::clone(&stop);
        let http_join =
            thread::spawn(move || run_server_loop(server, state_for_thread, stop_for_thread));

        let mdns = if config.mdns_enabled {
            match start_mdns_advertisement(config.port, &config.mdns_instance) {
                Ok(daemon) => {
                    info!(service = MDNS_SERVICE_TYPE, "mDNS advertisement registered");
                    Some(daemon)
                }
                Err(err) => {
                    warn!(error = %err, "mDNS advertisement disabled");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            state,
            stop,
            http_join: Some(http_join),
            mdns,
        })
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.http_join.take() {
            let _ = join.join();
        }
        if let Some(mdns) = self.mdns.take() {
            let _ = mdns.shutdown();
        }
        debug!("display feed stopped");
    }
}

fn run_server_loop(server: Server, state: Arc<Mutex<ApiSharedState>>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        match server.recv_timeout(Duration::from_millis(200)) {
            Ok(Some(request)) => handle_request(request, &state),
            Ok(None) => continue,
            Err(err) => {
                debug!(error = %err, "display feed receive failed");
                continue;
            }
        }
    }
}

fn start_mdns_advertisement(api_port: u16, instance_prefix: &str) -> Result<ServiceDaemon> {
    let daemon = ServiceDaemon::new()
        .map_err(|err| anyhow::anyhow!("could not create mDNS daemon: {err}"))?;

    let hostname = detect_hostname();
    let instance = if instance_prefix.trim().is_empty() {
        hostname.clone()
    } else {
        format!("{}-{}", instance_prefix.trim(), hostname)
    };
    let host_name = format!("{hostname}.local.");
    let mut addresses = detect_mdns_addresses();
    if addresses.is_empty() {
        addresses.push(Ipv4Addr::LOCALHOST.into());
    }

    let service = ServiceInfo::new(
        MDNS_SERVICE_TYPE,
        &instance,
        &host_name,
        addresses.as_slice(),
        api_port,
        None,
    )
    .map_err(|err| anyhow::anyhow!("could not create mDNS service info: {err}"))?;
    daemon
        .register(service)
        .map_err(|err| anyhow::anyhow!("could not register mDNS service: {err}"))?;
    Ok(daemon)
}

fn detect_hostname() -> String {
    let candidate = std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .unwrap_or_default();
    sanitize_hostname(&candidate)
}

fn sanitize_hostname(candidate: &str) -> String {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return "chronometer".to_string();
    }
    trimmed
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' {
                ch.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

fn detect_mdns_addresses() -> Vec<IpAddr> {
    let mut addresses = Vec::<IpAddr>::new();
    if let Ok(socket) = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        && socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).is_ok()
        && let Ok(local) = socket.local_addr()
    {
        let ip = local.ip();
        if ip.is_ipv4() && !ip.is_loopback() {
            addresses.push(ip);
        }
    }
    addresses.sort();
    addresses.dedup();
    addresses
}

fn handle_request(request: tiny_http::Request, state: &Arc<Mutex<ApiSharedState>>) {
    if request.method() != &Method::Get {
        let _ = send_text(request, StatusCode(405), "method not allowed");
        return;
    }

    let Some(remote_addr) = request.remote_addr() else {
        let _ = send_text(request, StatusCode(400), "missing remote address");
        return;
    };
    let remote_ip = remote_addr.ip();
    if !is_local_network_ip(remote_ip) {
        debug!(%remote_ip, "rejected non-local request");
        let _ = send_text(request, StatusCode(403), "forbidden: local network only");
        return;
    }

    let url = request.url().to_string();
    let path = request_path(&url);
    let base_url = request_base_url(&request);

    let mut guard = match state.lock() {
        Ok(guard) => guard,
        Err(_) => {
            let _ = send_text(request, StatusCode(500), "internal state lock error");
            return;
        }
    };
    guard.total_requests = guard.total_requests.saturating_add(1);
    debug!(%remote_ip, path, "display feed request");

    let result = match path {
        "/v1" => {
            #[derive(Serialize)]
            struct ApiIndexResponse {
                api_base: String,
                state_url: String,
                schedule_url: String,
                health_url: String,
                openapi_url: String,
            }

            let payload = ApiIndexResponse {
                state_url: format!("{base_url}/v1/state"),
                schedule_url: format!("{base_url}/v1/schedule"),
                health_url: format!("{base_url}/healthz"),
                openapi_url: format!("{base_url}/openapi.yaml"),
                api_base: base_url,
            };
            send_json(request, StatusCode(200), &payload)
        }
        "/" | "/v1/state" => {
            #[derive(Serialize)]
            struct StateResponse {
                runtime: RuntimeSnapshot,
                total_requests: u64,
                server_started_unix_ms: i64,
                response_iso_local: String,
            }

            let payload = StateResponse {
                runtime: guard.runtime.clone(),
                total_requests: guard.total_requests(),
                server_started_unix_ms: guard.server_started_unix_ms(),
                response_iso_local: Local::now().to_rfc3339(),
            };
            send_json(request, StatusCode(200), &payload)
        }
        "/v1/schedule" => {
            #[derive(Serialize)]
            struct ScheduleResponse {
                generation: u64,
                count: usize,
                items: Vec<TimelineEntry>,
            }

            let payload = ScheduleResponse {
                generation: guard.runtime.schedule_generation,
                count: guard.timeline.len(),
                items: guard.timeline.clone(),
            };
            send_json(request, StatusCode(200), &payload)
        }
        "/healthz" => send_text(request, StatusCode(200), "ok"),
        "/openapi.yaml" => send_yaml(request, StatusCode(200), OPENAPI_YAML),
        _ => send_text(request, StatusCode(404), "not found"),
    };
    drop(guard);

    if let Err(err) = result {
        warn!(error = %err, path, "failed to send display feed response");
    }
}

fn send_json<T: Serialize>(
    request: tiny_http::Request,
    status: StatusCode,
    body: &T,
) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    respond(
        request,
        status,
        "application/json; charset=utf-8",
        payload,
    )
}

fn send_text(request: tiny_http::Request, status: StatusCode, body: &str) -> Result<()> {
    respond(
        request,
        status,
        "text/plain; charset=utf-8",
        body.as_bytes().to_vec(),
    )
}

fn send_yaml(request: tiny_http::Request, status: StatusCode, body: &str) -> Result<()> {
    respond(
        request,
        status,
        "application/yaml; charset=utf-8",
        body.as_bytes().to_vec(),
    )
}

fn respond(
    request: tiny_http::Request,
    status: StatusCode,
    content_type: &str,
    payload: Vec<u8>,
) -> Result<()> {
    let header = Header::from_str(&format!("Content-Type: {content_type}"))
        .map_err(|_| anyhow::anyhow!("failed to build content-type header"))?;
    request.respond(
        Response::from_data(payload)
            .with_status_code(status)
            .with_header(header),
    )?;
    Ok(())
}

fn request_path(url: &str) -> &str {
    match url.split_once('?') {
        Some((path, _query)) => path,
        None => url,
    }
}

fn request_base_url(request: &tiny_http::Request) -> String {
    for header in request.headers() {
        if header.field.equiv("Host") {
            let host = header.value.as_str().trim();
            if !host.is_empty() {
                return format!("http://{host}");
            }
        }
    }
    "http://127.0.0.1:8098".to_string()
}

pub fn iso_local_from_ms(unix_ms: i64) -> String {
    Local
        .timestamp_millis_opt(unix_ms)
        .single()
        .map(|instant| instant.to_rfc3339())
        .unwrap_or_default()
}

fn is_local_network_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || is_ipv4_mapped_local(v6)
        }
    }
}

fn is_ipv4_mapped_local(v6: Ipv6Addr) -> bool {
    match v6.to_ipv4_mapped() {
        Some(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        None => false,
    }
}
