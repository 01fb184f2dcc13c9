//! Operator-facing HTTP layer.
//!
//! A small hand-rolled HTTP server on its own thread: flag toggles for
//! the control store, a JSON status endpoint, and an MJPEG stream that
//! registers with the frame broadcaster. Each stream viewer gets its own
//! thread; the accept loop never blocks on a slow viewer.

use anyhow::{anyhow, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::alert::AlertStats;
use crate::broadcast::FrameBroadcaster;
use crate::capture::CaptureStats;
use crate::control::{self, ControlStore};

const MAX_REQUEST_BYTES: usize = 8192;
const STREAM_BOUNDARY: &str = "homewatchframe";
/// A viewer with no frame for this long is sent away (camera idle).
const STREAM_WAIT: Duration = Duration::from_secs(30);
/// A viewer that cannot absorb a frame within this long is dropped;
/// without it a wedged peer would pin the push thread in `write_all`.
const STREAM_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared references the request handlers read from.
#[derive(Clone)]
pub struct ApiState {
    pub control: ControlStore,
    pub broadcaster: FrameBroadcaster,
    pub capture_stats: Arc<CaptureStats>,
    pub alert_stats: Arc<AlertStats>,
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

pub struct ApiServer {
    addr: String,
    state: ApiState,
}

impl ApiServer {
    pub fn new(addr: String, state: ApiState) -> Self {
        Self { addr, state }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let state = self.state;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, state, shutdown_thread) {
                log::error!("api server stopped: {}", err);
            }
        });

        log::info!("api listening on {}", addr);
        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, state: ApiState, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, &state) {
                    log::warn!("api request rejected: {}", err);
                }
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

fn handle_connection(mut stream: TcpStream, state: &ApiState) -> Result<()> {
    let request = read_request(&mut stream)?;

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        ("GET", "/status") => {
            let payload = serde_json::to_vec(&status_body(state))?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        ("GET", "/stream") => {
            // The viewer owns this connection from here on.
            let consumer_state = state.clone();
            std::thread::spawn(move || {
                if let Err(err) = serve_stream(stream, consumer_state) {
                    log::debug!("stream viewer disconnected: {}", err);
                }
            });
            Ok(())
        }
        ("POST", path) => match flag_for_path(path) {
            Some((key, value)) => {
                state.control.set_flag(key, value);
                log::info!("api: {} set to {}", key, value);
                write_json_response(&mut stream, 200, r#"{"ok":true}"#)
            }
            None => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
        },
        ("GET", _) => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
        _ => write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#),
    }
}

fn flag_for_path(path: &str) -> Option<(&'static str, bool)> {
    match path {
        "/camera/on" => Some((control::CAPTURE_ENABLED, true)),
        "/camera/off" => Some((control::CAPTURE_ENABLED, false)),
        "/notifications/on" => Some((control::NOTIFICATIONS_ENABLED, true)),
        "/notifications/off" => Some((control::NOTIFICATIONS_ENABLED, false)),
        "/saving/on" => Some((control::SAVING_ENABLED, true)),
        "/saving/off" => Some((control::SAVING_ENABLED, false)),
        "/training/on" => Some((control::TRAINING_ENABLED, true)),
        "/training/off" => Some((control::TRAINING_ENABLED, false)),
        "/sensors/on" => Some((control::SENSORS_ENABLED, true)),
        "/sensors/off" => Some((control::SENSORS_ENABLED, false)),
        "/autodetect/on" => Some((control::AUTO_DETECT_ENABLED, true)),
        "/autodetect/off" => Some((control::AUTO_DETECT_ENABLED, false)),
        _ => None,
    }
}

fn status_body(state: &ApiState) -> serde_json::Value {
    let flags: serde_json::Map<String, serde_json::Value> = state
        .control
        .flags_snapshot()
        .into_iter()
        .map(|(k, v)| (k, serde_json::Value::Bool(v)))
        .collect();
    serde_json::json!({
        "running": state.capture_stats.running.load(Ordering::Relaxed),
        "sessions": state.capture_stats.sessions.load(Ordering::Relaxed),
        "frames": state.capture_stats.frames.load(Ordering::Relaxed),
        "viewers": state.broadcaster.consumer_count(),
        "saves": state.alert_stats.saves.load(Ordering::Relaxed),
        "notifies": state.alert_stats.notifies.load(Ordering::Relaxed),
        "last_save_unix_ms": state.alert_stats.last_save_unix_ms.load(Ordering::Relaxed),
        "last_notify_unix_ms": state.alert_stats.last_notify_unix_ms.load(Ordering::Relaxed),
        "flags": flags,
    })
}

/// MJPEG push loop for one viewer. Registers with the broadcaster,
/// forwards each published frame, and ends on write failure or when no
/// frame arrives within the wait window.
fn serve_stream(mut stream: TcpStream, state: ApiState) -> Result<()> {
    let consumer = state.broadcaster.register();
    log::info!("stream viewer {} connected", consumer.id());

    stream.set_write_timeout(Some(STREAM_WRITE_TIMEOUT))?;
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nCache-Control: no-store\r\n\r\n",
        STREAM_BOUNDARY
    );
    stream.write_all(header.as_bytes())?;

    loop {
        let frame = match consumer.wait(STREAM_WAIT) {
            Some(frame) => frame,
            None => {
                log::info!("stream viewer {}: no frames, closing", consumer.id());
                return Ok(());
            }
        };
        consumer.acknowledge();

        let part = format!(
            "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            STREAM_BOUNDARY,
            frame.jpeg.len()
        );
        stream.write_all(part.as_bytes())?;
        stream.write_all(&frame.jpeg)?;
        stream.write_all(b"\r\n")?;
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}
