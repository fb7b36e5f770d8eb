use crate::detect::VehicleDetector;
use crate::frame::{Frame, FrameLimits};
use crate::monitor::assess_frame;
use crate::occupancy::Zone;
use crate::storage::{CoordinateStore, DEFAULT_LAYOUT_NAME};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const MAX_HEADER_BYTES: usize = 8192;
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
const DRAIN_LIMIT_BYTES: usize = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_body_bytes: usize,
    /// Longest wait for a single read.
    pub read_timeout: Duration,
    /// Deadline for the whole request, however the bytes trickle in.
    pub request_timeout: Duration,
    /// Connections served at once. Further connections get 503.
    pub max_connections: usize,
    pub frame_limits: FrameLimits,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            read_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_connections: 8,
            frame_limits: FrameLimits::default(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

/// Request-independent state shared by every connection.
#[derive(Debug)]
struct ApiState {
    cfg: ApiConfig,
    detector: VehicleDetector,
    store: CoordinateStore,
}

pub struct ApiServer {
    cfg: ApiConfig,
    detector: VehicleDetector,
    store: CoordinateStore,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, detector: VehicleDetector, store: CoordinateStore) -> Self {
        Self {
            cfg,
            detector,
            store,
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let state = Arc::new(ApiState {
            cfg: self.cfg,
            detector: self.detector,
            store: self.store,
        });
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, state, shutdown_thread) {
                log::error!("parking api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    state: Arc<ApiState>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let active = Arc::new(AtomicUsize::new(0));
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let Some(permit) = ConnectionPermit::acquire(&active, state.cfg.max_connections)
                else {
                    log::warn!("parking api busy, rejecting connection from {}", peer);
                    if let Err(err) = reject_busy(stream) {
                        log::debug!("busy response to {} failed: {}", peer, err);
                    }
                    continue;
                };
                let state = state.clone();
                std::thread::spawn(move || {
                    let _permit = permit;
                    if let Err(err) = handle_connection(stream, &state) {
                        log::warn!("parking api request rejected: {}", err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Slot in the bounded set of connections being served.
struct ConnectionPermit {
    active: Arc<AtomicUsize>,
}

impl ConnectionPermit {
    fn acquire(active: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .ok()?;
        Some(Self {
            active: active.clone(),
        })
    }
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn reject_busy(mut stream: TcpStream) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(Duration::from_secs(1)))?;
    write_response(
        &mut stream,
        503,
        "application/json",
        &failure_body("server busy, retry later"),
    )?;
    stream.shutdown(Shutdown::Write)?;
    Ok(())
}

fn handle_connection(mut stream: TcpStream, state: &ApiState) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_response(&mut stream, 403, "application/json", &failure_body("forbidden"))?;
        return Ok(());
    }

    let request = match read_request(&mut stream, &state.cfg) {
        Ok(request) => request,
        Err(RequestError::TooLarge(len)) => {
            let body = failure_body("request body too large");
            write_response(&mut stream, 413, "application/json", &body)?;
            // Let the client read the response before the unread body resets the socket.
            stream.shutdown(Shutdown::Write)?;
            drain_unread(&mut stream, state.cfg.read_timeout);
            return Err(anyhow!("request body too large ({} bytes)", len));
        }
        Err(RequestError::TimedOut) => {
            write_response(
                &mut stream,
                408,
                "application/json",
                &failure_body("request timed out"),
            )?;
            stream.shutdown(Shutdown::Write)?;
            drain_unread(&mut stream, state.cfg.read_timeout);
            return Err(anyhow!("request from {} timed out", peer));
        }
        Err(RequestError::Malformed(err)) => {
            let body = failure_body(&err.to_string());
            write_response(&mut stream, 400, "application/json", &body)?;
            return Err(err);
        }
    };

    let (status, body) = route(&request, state);
    log::debug!("{} {} -> {}", request.method, request.path, status);
    write_response(&mut stream, status, "application/json", &body)?;
    Ok(())
}

fn route(request: &HttpRequest, state: &ApiState) -> (u16, Vec<u8>) {
    let path = request.path.as_str();
    let expected_method = match path {
        "/health" | "/coordinates" => "GET",
        "/detect" | "/save-coordinates" => "POST",
        _ if path.starts_with("/coordinates/") => "GET",
        _ => return (404, failure_body("not found")),
    };
    if request.method != expected_method {
        return (405, failure_body("method not allowed"));
    }

    match path {
        "/health" => (200, br#"{"status":"ok"}"#.to_vec()),
        "/detect" => handle_detect(&request.body, state),
        "/save-coordinates" => handle_save_coordinates(&request.body, state),
        "/coordinates" => handle_list_layouts(state),
        _ => handle_load_layout(&path["/coordinates/".len()..], state),
    }
}

#[derive(Debug, Deserialize)]
struct DetectRequest {
    #[serde(default)]
    image: String,
    #[serde(rename = "parkingZones", default)]
    parking_zones: Vec<Zone>,
}

#[derive(Debug, Deserialize)]
struct SaveCoordinatesRequest {
    #[serde(default)]
    coordinates: Vec<Zone>,
    filename: Option<String>,
}

#[derive(Serialize)]
struct Success<T: Serialize> {
    success: bool,
    #[serde(flatten)]
    payload: T,
}

#[derive(Serialize)]
struct Failure<'a> {
    success: bool,
    error: &'a str,
}

fn handle_detect(body: &[u8], state: &ApiState) -> (u16, Vec<u8>) {
    // Zones are validated before any decoding or inference runs.
    let request: DetectRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(err) => return (400, failure_body(&format!("invalid detect request: {err}"))),
    };
    let limits = &state.cfg.frame_limits;
    let frame = match Frame::from_data_url_with_limits(&request.image, limits) {
        Ok(frame) => frame,
        Err(err) => return (400, failure_body(&format!("{err:#}"))),
    };
    match assess_frame(&state.detector, &frame, &request.parking_zones) {
        Ok(report) => success_body(report),
        Err(err) => {
            log::error!("error in detection: {:#}", err);
            (500, failure_body(&format!("{err:#}")))
        }
    }
}

fn handle_save_coordinates(body: &[u8], state: &ApiState) -> (u16, Vec<u8>) {
    let request: SaveCoordinatesRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(err) => return (400, failure_body(&format!("invalid coordinates: {err}"))),
    };
    let name = request
        .filename
        .unwrap_or_else(|| DEFAULT_LAYOUT_NAME.to_string());
    match state.store.save(&name, &request.coordinates) {
        Ok(path) => {
            log::info!(
                "saved {} zones to {}",
                request.coordinates.len(),
                path.display()
            );
            success_body(serde_json::json!({ "filepath": path.display().to_string() }))
        }
        Err(err) => (400, failure_body(&format!("{err:#}"))),
    }
}

fn handle_list_layouts(state: &ApiState) -> (u16, Vec<u8>) {
    match state.store.list() {
        Ok(names) => success_body(serde_json::json!({ "layouts": names })),
        Err(err) => (500, failure_body(&format!("{err:#}"))),
    }
}

fn handle_load_layout(name: &str, state: &ApiState) -> (u16, Vec<u8>) {
    if !state.store.exists(name) {
        return (404, failure_body("layout not found"));
    }
    match state.store.load(name) {
        Ok(zones) => success_body(serde_json::json!({ "coordinates": zones })),
        Err(err) => (500, failure_body(&format!("{err:#}"))),
    }
}

fn success_body<T: Serialize>(payload: T) -> (u16, Vec<u8>) {
    match serde_json::to_vec(&Success {
        success: true,
        payload,
    }) {
        Ok(body) => (200, body),
        Err(err) => (500, failure_body(&err.to_string())),
    }
}

fn failure_body(error: &str) -> Vec<u8> {
    serde_json::to_vec(&Failure {
        success: false,
        error,
    })
    .unwrap_or_else(|_| br#"{"success":false}"#.to_vec())
}

#[derive(Debug)]
enum RequestError {
    TooLarge(usize),
    TimedOut,
    Malformed(anyhow::Error),
}

impl From<anyhow::Error> for RequestError {
    fn from(err: anyhow::Error) -> Self {
        RequestError::Malformed(err)
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                RequestError::TimedOut
            }
            _ => RequestError::Malformed(err.into()),
        }
    }
}

/// One read bounded by both the idle timeout and the request deadline.
fn read_before(
    stream: &mut TcpStream,
    buf: &mut [u8],
    deadline: Instant,
    idle: Duration,
) -> Result<usize, RequestError> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(RequestError::TimedOut);
    }
    stream.set_read_timeout(Some(remaining.min(idle)))?;
    Ok(stream.read(buf)?)
}

fn drain_unread(stream: &mut TcpStream, budget: Duration) {
    let deadline = Instant::now() + budget;
    let mut buf = [0u8; 4096];
    let mut drained = 0usize;
    while drained < DRAIN_LIMIT_BYTES {
        match read_before(stream, &mut buf, deadline, budget) {
            Ok(0) | Err(_) => break,
            Ok(n) => drained += n,
        }
    }
}

fn read_request(stream: &mut TcpStream, cfg: &ApiConfig) -> Result<HttpRequest, RequestError> {
    let deadline = Instant::now() + cfg.request_timeout;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large").into());
        }
        let n = read_before(stream, &mut buf, deadline, cfg.read_timeout)?;
        if n == 0 {
            return Err(anyhow!("connection closed before headers completed").into());
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    if content_length > cfg.max_body_bytes {
        return Err(RequestError::TooLarge(content_length));
    }

    let mut body = data.split_off(header_end + 4);
    if body.len() > content_length {
        body.truncate(content_length);
    }
    while body.len() < content_length {
        let n = read_before(stream, &mut buf, deadline, cfg.read_timeout)?;
        if n == 0 {
            return Err(anyhow!("connection closed before body completed").into());
        }
        let take = n.min(content_length - body.len());
        body.extend_from_slice(&buf[..take]);
    }

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        body,
    })
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        408 => "HTTP/1.1 408 Request Timeout",
        413 => "HTTP/1.1 413 Payload Too Large",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}
