use anyhow::Result;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use lookout::dashboard::DashboardView;
use lookout::detect::{self, ColorKeyBackend};
use lookout::ingest::{FileConfig, FileSource, SourceGuard};
use lookout::observation::{Observation, ObservationLog};
use lookout::pipeline::{Monitor, PipelineConfig};
use lookout::server::{Server, ServerConfig, ServerHandle};

struct TestServer {
    _guard: SourceGuard,
    log: Arc<ObservationLog>,
    handle: Option<ServerHandle>,
}

impl TestServer {
    fn new(events_enabled: bool, frame_limit: u64) -> Result<Self> {
        let source = FileSource::new(FileConfig {
            path: "stub://clip".to_string(),
            play_realtime: false,
            frame_limit,
            ..FileConfig::default()
        })?;
        let guard = SourceGuard::new(Box::new(source));
        guard.start()?;

        let log = Arc::new(ObservationLog::new());
        let monitor = Monitor::new(
            guard.shared(),
            detect::share(Box::new(ColorKeyBackend::new())),
            log.clone(),
            PipelineConfig {
                idle_backoff: Duration::ZERO,
                ..PipelineConfig::default()
            },
        );
        let cfg = ServerConfig {
            addr: "127.0.0.1:0".to_string(),
            events_enabled,
            dashboard: DashboardView::new(Duration::from_millis(5_000), 10),
        };
        let handle = Server::new(cfg, monitor).spawn()?;
        Ok(Self {
            _guard: guard,
            log,
            handle: Some(handle),
        })
    }

    fn request(&self, raw: &str) -> Result<(String, Vec<u8>)> {
        let addr = self
            .handle
            .as_ref()
            .expect("test server handle should be initialized")
            .addr;
        let mut stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(Duration::from_secs(10)))?;
        stream.write_all(raw.as_bytes())?;
        let mut response = Vec::new();
        stream.read_to_end(&mut response)?;
        let split = response
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("response head");
        let headers = String::from_utf8_lossy(&response[..split]).to_string();
        Ok((headers, response[split + 4..].to_vec()))
    }

    fn get(&self, path: &str) -> Result<(String, Vec<u8>)> {
        self.request(&format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n"))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop().expect("failed to stop server");
        }
    }
}

fn decode_chunked(mut body: &[u8]) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    loop {
        let line_end = body
            .windows(2)
            .position(|w| w == b"\r\n")
            .expect("chunk size line");
        let size_text = std::str::from_utf8(&body[..line_end]).expect("chunk size");
        let size = usize::from_str_radix(size_text.trim(), 16).expect("hex chunk size");
        body = &body[line_end + 2..];
        if size == 0 {
            break;
        }
        chunks.push(body[..size].to_vec());
        assert_eq!(&body[size..size + 2], b"\r\n");
        body = &body[size + 2..];
    }
    chunks
}

#[test]
fn health_endpoint_reports_ok() -> Result<()> {
    let server = TestServer::new(true, 1)?;
    let (headers, body) = server.get("/health")?;
    assert!(headers.contains("200 OK"));
    assert_eq!(body, br#"{"status":"ok"}"#.to_vec());
    Ok(())
}

#[test]
fn index_page_embeds_feed_and_poll_settings() -> Result<()> {
    let server = TestServer::new(true, 1)?;
    let (headers, body) = server.get("/")?;
    assert!(headers.contains("200 OK"));
    assert!(headers.contains("text/html"));
    let page = String::from_utf8(body)?;
    assert!(page.contains(r#"src="/video_feed""#));
    assert!(page.contains("POLL_INTERVAL_MS = 5000;"));
    assert!(page.contains("PAGE_SIZE = 10;"));
    Ok(())
}

#[test]
fn empty_table_has_columns_and_no_rows() -> Result<()> {
    let server = TestServer::new(true, 1)?;
    let (headers, body) = server.get("/dash/table")?;
    assert!(headers.contains("200 OK"));
    let value: Value = serde_json::from_slice(&body)?;
    assert_eq!(value["columns"][0]["id"], "timestamp");
    assert_eq!(value["columns"][1]["name"], "labels");
    assert_eq!(value["data"].as_array().map(Vec::len), Some(0));
    Ok(())
}

#[test]
fn table_lists_newest_observations_first() -> Result<()> {
    let server = TestServer::new(true, 1)?;
    server.log.append(Observation::new("1", "dog"))?;
    server.log.append(Observation::new("12", "person"))?;

    let (_, body) = server.get("/dash/table")?;
    let value: Value = serde_json::from_slice(&body)?;
    assert_eq!(value["data"][0]["timestamp"], "12");
    assert_eq!(value["data"][1]["labels"], "dog");

    let (headers, body) = server.get("/dash/table.csv")?;
    assert!(headers.contains("text/csv"));
    assert_eq!(String::from_utf8(body)?, "timestamp,labels\r\n12,person\r\n1,dog\r\n");
    Ok(())
}

#[test]
fn event_hook_always_acknowledges() -> Result<()> {
    let server = TestServer::new(true, 1)?;
    let payload = r#"{"anything":"goes"}"#;
    let (headers, body) = server.request(&format!(
        "POST /event HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n{}",
        payload.len(),
        payload
    ))?;
    assert!(headers.contains("200 OK"));
    assert_eq!(body, br#"{"success":"event tracked"}"#.to_vec());

    let (headers, _) = server.request("POST /event HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("200 OK"));
    Ok(())
}

#[test]
fn disabled_event_hook_is_not_found() -> Result<()> {
    let server = TestServer::new(false, 1)?;
    let (headers, _) = server.request("POST /event HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("404 Not Found"));
    Ok(())
}

#[test]
fn unknown_paths_and_wrong_methods_are_rejected() -> Result<()> {
    let server = TestServer::new(true, 1)?;
    let (headers, _) = server.get("/nope")?;
    assert!(headers.contains("404 Not Found"));

    let (headers, _) = server.get("/event")?;
    assert!(headers.contains("405 Method Not Allowed"));

    let (headers, _) = server.request("DELETE /dash/table HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("405 Method Not Allowed"));
    Ok(())
}

#[test]
fn oversized_request_head_is_rejected() -> Result<()> {
    let server = TestServer::new(true, 1)?;
    let padding = "a".repeat(10_000);
    let (headers, _) = server.request(&format!(
        "GET /health HTTP/1.1\r\nX-Padding: {padding}\r\n\r\n"
    ))?;
    assert!(headers.contains("413"));
    Ok(())
}

#[test]
fn video_feed_streams_multipart_jpeg_parts() -> Result<()> {
    let server = TestServer::new(true, 3)?;
    let (headers, body) = server.get("/video_feed")?;
    assert!(headers.contains("200 OK"));
    assert!(headers.contains("Content-Type: multipart/x-mixed-replace; boundary=frame"));
    assert!(headers.contains("Transfer-Encoding: chunked"));

    let parts = decode_chunked(&body);
    assert_eq!(parts.len(), 3);
    let prefix = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    for part in &parts {
        assert!(part.starts_with(prefix));
        assert!(part.ends_with(b"\r\n\r\n"));
        let jpeg = &part[prefix.len()..part.len() - 4];
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(jpeg)?;
        assert_eq!((decoded.width(), decoded.height()), (800, 300));
    }

    // Frames within the same second collapse into one row.
    let rows = server.log.snapshot()?;
    assert!(!rows.is_empty() && rows.len() <= 3);
    assert!(rows.iter().all(|row| row.labels == "person"));
    Ok(())
}
