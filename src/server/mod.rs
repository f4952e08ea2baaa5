//! HTTP surface: video feed, dashboard page, table polling and event hook.
//!
//! A hand-rolled HTTP/1.1 server on `std::net`. The accept loop runs on its
//! own thread against a non-blocking listener and polls a shutdown flag;
//! every accepted connection is served on a separate thread so that a
//! long-lived `/video_feed` never holds up dashboard polling. One request is
//! handled per connection.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::dashboard::DashboardView;
use crate::pipeline::Monitor;
use crate::stream::{self, MultipartStream};

pub const DEFAULT_ADDR: &str = "127.0.0.1:5001";

const MAX_HEAD_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 64 * 1024;
const ACCEPT_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: String,
    /// Serve `POST /event`. When false the route answers 404.
    pub events_enabled: bool,
    pub dashboard: DashboardView,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            events_enabled: true,
            dashboard: DashboardView::default(),
        }
    }
}

#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Stop accepting and wait for the accept loop to exit. Open video
    /// streams end at their next frame.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("http server thread panicked"))?;
        }
        Ok(())
    }

    /// True once the accept loop has exited, either after `stop` or because
    /// the listener failed.
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

pub struct Server {
    cfg: ServerConfig,
    monitor: Monitor,
}

impl Server {
    pub fn new(cfg: ServerConfig, monitor: Monitor) -> Self {
        Self { cfg, monitor }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid listen address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("failed to bind {}", configured_addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(Shared {
            cfg: self.cfg,
            monitor: self.monitor,
            shutdown: shutdown.clone(),
        });
        let join = std::thread::Builder::new()
            .name("lookout-http".into())
            .spawn(move || {
                if let Err(err) = run_server(listener, shared) {
                    log::error!("http server stopped: {:#}", err);
                }
            })?;

        log::info!("serving dashboard on http://{}", addr);
        Ok(ServerHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

struct Shared {
    cfg: ServerConfig,
    monitor: Monitor,
    shutdown: Arc<AtomicBool>,
}

fn run_server(listener: TcpListener, shared: Arc<Shared>) -> Result<()> {
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                let shared = shared.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &shared) {
                        log::warn!("request from {} failed: {:#}", peer, err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) if is_transient_accept_error(&err) => {
                log::warn!("accept failed, retrying: {}", err);
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Accept errors that concern one connection or a passing resource limit,
/// not the listener itself.
fn is_transient_accept_error(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    const EMFILE: i32 = 24;
    const ENFILE: i32 = 23;
    matches!(
        err.kind(),
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::Interrupted
    ) || matches!(err.raw_os_error(), Some(EMFILE) | Some(ENFILE))
}

// ----------------------------------------------------------------------------
// Routing
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Route {
    Index,
    VideoFeed,
    Table,
    TableCsv,
    Event,
    Health,
}

impl Route {
    fn resolve(path: &str, events_enabled: bool) -> Option<Self> {
        match path {
            "/" => Some(Route::Index),
            "/video_feed" => Some(Route::VideoFeed),
            "/dash/table" => Some(Route::Table),
            "/dash/table.csv" => Some(Route::TableCsv),
            "/event" if events_enabled => Some(Route::Event),
            "/health" => Some(Route::Health),
            _ => None,
        }
    }

    fn method(self) -> &'static str {
        match self {
            Route::Event => "POST",
            _ => "GET",
        }
    }
}

fn handle_connection(mut stream: TcpStream, shared: &Shared) -> Result<()> {
    let request = match read_request(&mut stream)? {
        Incoming::Request(request) => request,
        Incoming::TooLarge => {
            write_json_response(&mut stream, 413, r#"{"error":"request_too_large"}"#)?;
            // Closing with unread input would reset the connection before
            // the client sees the response.
            stream.shutdown(Shutdown::Write)?;
            drain(&mut stream);
            return Ok(());
        }
        Incoming::Malformed => {
            write_json_response(&mut stream, 400, r#"{"error":"bad_request"}"#)?;
            return Ok(());
        }
    };
    log::debug!("{} {}", request.method, request.path);

    let route = match Route::resolve(&request.path, shared.cfg.events_enabled) {
        Some(route) => route,
        None => {
            write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?;
            return Ok(());
        }
    };
    if request.method != route.method() {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }

    match route {
        Route::Index => {
            let page = shared.cfg.dashboard.page();
            write_response(&mut stream, 200, "text/html; charset=utf-8", page.as_bytes())
        }
        Route::VideoFeed => serve_video_feed(&mut stream, shared),
        Route::Table => {
            let table = shared.cfg.dashboard.render(shared.monitor.log())?;
            let payload = serde_json::to_vec(&table)?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        Route::TableCsv => {
            let table = shared.cfg.dashboard.render(shared.monitor.log())?;
            write_response(&mut stream, 200, "text/csv; charset=utf-8", table.to_csv().as_bytes())
        }
        Route::Event => {
            log::debug!("event received ({} bytes)", request.body.len());
            write_json_response(&mut stream, 200, r#"{"success":"event tracked"}"#)
        }
        Route::Health => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
    }
}

/// Stream annotated frames until the client leaves, the source runs dry,
/// the server stops, or the pipeline fails.
fn serve_video_feed(stream: &mut TcpStream, shared: &Shared) -> Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        stream::CONTENT_TYPE
    );
    stream.write_all(header.as_bytes())?;

    let parts = MultipartStream::new(shared.monitor.pipeline()).until(shared.shutdown.clone());
    for part in parts {
        let part = match part {
            Ok(part) => part,
            Err(err) => {
                // Drop the connection without a terminating chunk.
                log::warn!("video feed ended: {}", err);
                return Ok(());
            }
        };
        if let Err(err) = write_chunk(stream, &part) {
            log::debug!("video feed client went away: {}", err);
            return Ok(());
        }
    }
    stream.write_all(b"0\r\n\r\n")?;
    Ok(())
}

fn write_chunk(stream: &mut TcpStream, data: &[u8]) -> std::io::Result<()> {
    stream.write_all(format!("{:X}\r\n", data.len()).as_bytes())?;
    stream.write_all(data)?;
    stream.write_all(b"\r\n")?;
    stream.flush()
}

// ----------------------------------------------------------------------------
// Request parsing
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    fn content_length(&self) -> Option<usize> {
        self.headers
            .get("content-length")
            .and_then(|v| v.parse().ok())
    }
}

#[derive(Debug)]
enum Incoming {
    Request(HttpRequest),
    TooLarge,
    Malformed,
}

fn read_request(stream: &mut TcpStream) -> Result<Incoming> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let head_end = loop {
        if let Some(pos) = find_head_end(&data) {
            break pos;
        }
        if data.len() > MAX_HEAD_BYTES {
            return Ok(Incoming::TooLarge);
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Ok(Incoming::Malformed);
        }
        data.extend_from_slice(&buf[..n]);
    };
    if head_end > MAX_HEAD_BYTES {
        return Ok(Incoming::TooLarge);
    }

    let mut request = match parse_head(&data[..head_end]) {
        Some(request) => request,
        None => return Ok(Incoming::Malformed),
    };

    let expected = request.content_length().unwrap_or(0);
    if expected > MAX_BODY_BYTES {
        return Ok(Incoming::TooLarge);
    }
    let mut body = data.split_off(head_end + 4);
    while body.len() < expected {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(expected);
    request.body = body;
    Ok(Incoming::Request(request))
}

fn drain(stream: &mut TcpStream) {
    let mut buf = [0u8; 4096];
    let mut total = 0usize;
    while total < MAX_BODY_BYTES * 16 {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => total += n,
        }
    }
}

fn find_head_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_head(head: &[u8]) -> Option<HttpRequest> {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.split("\r\n");
    let mut parts = lines.next()?.split_whitespace();
    let method = parts.next()?;
    let raw_path = parts.next()?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Some(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        body: Vec::new(),
    })
}

// ----------------------------------------------------------------------------
// Responses
// ----------------------------------------------------------------------------

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line(status),
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

fn status_line(status: u16) -> &'static str {
    match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect;
    use crate::ingest::SourceGuard;
    use crate::observation::ObservationLog;
    use crate::pipeline::PipelineConfig;
    use crate::testing::{FixedDetector, ScriptedSource};
    use std::time::Instant;

    fn idle_monitor() -> Monitor {
        let guard = SourceGuard::new(Box::new(ScriptedSource::new(vec![])));
        Monitor::new(
            guard.shared(),
            detect::share(Box::new(FixedDetector::new(vec!["person"]))),
            Arc::new(ObservationLog::new()),
            PipelineConfig::default(),
        )
    }

    #[test]
    fn handle_reports_when_accept_loop_exits() -> Result<()> {
        let cfg = ServerConfig {
            addr: "127.0.0.1:0".into(),
            ..ServerConfig::default()
        };
        let handle = Server::new(cfg, idle_monitor()).spawn()?;
        assert!(!handle.is_finished());

        handle.shutdown.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(handle.is_finished());
        handle.stop()
    }

    #[test]
    fn per_connection_accept_errors_are_retried() {
        use std::io::{Error, ErrorKind};
        assert!(is_transient_accept_error(&Error::from(ErrorKind::ConnectionAborted)));
        assert!(is_transient_accept_error(&Error::from(ErrorKind::Interrupted)));
        assert!(is_transient_accept_error(&Error::from_raw_os_error(24)));
        assert!(!is_transient_accept_error(&Error::from(ErrorKind::PermissionDenied)));
        assert!(!is_transient_accept_error(&Error::from(ErrorKind::InvalidInput)));
    }

    #[test]
    fn routes_resolve_with_methods() {
        assert_eq!(Route::resolve("/", true), Some(Route::Index));
        assert_eq!(Route::resolve("/video_feed", true), Some(Route::VideoFeed));
        assert_eq!(Route::resolve("/dash/table", true), Some(Route::Table));
        assert_eq!(Route::resolve("/dash/table.csv", true), Some(Route::TableCsv));
        assert_eq!(Route::resolve("/event", true).map(Route::method), Some("POST"));
        assert_eq!(Route::resolve("/event", false), None);
        assert_eq!(Route::resolve("/events", true), None);
    }

    #[test]
    fn parse_head_strips_query_and_lowercases_headers() {
        let req = parse_head(b"POST /event?x=1 HTTP/1.1\r\nHost: a\r\nContent-Length: 12")
            .expect("request");
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/event");
        assert_eq!(req.content_length(), Some(12));
        assert_eq!(req.headers.get("host").map(String::as_str), Some("a"));
    }

    #[test]
    fn parse_head_rejects_missing_path() {
        assert!(parse_head(b"GET").is_none());
        assert!(parse_head(b"").is_none());
    }

    #[test]
    fn head_end_is_found() {
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n\r\nbody"), Some(14));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n"), None);
    }
}
