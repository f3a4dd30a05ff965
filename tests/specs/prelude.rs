//! Test helpers for behavioral specifications.
//!
//! Each test gets its own state directory and socket, passed to spawned
//! processes through the environment (never via process-global env vars),
//! so specs run in parallel without interfering.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tempfile::TempDir;

// Aggressive timeouts for fast tests.
const OBSERVE_WINDOW_MS: &str = "200";
const OBSERVE_POLL_MS: &str = "20";

pub const SPEC_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const SPEC_WAIT_MAX: Duration = Duration::from_secs(5);

/// Returns the path to a built binary.
///
/// Falls back to resolving relative to the test binary itself when
/// CARGO_MANIFEST_DIR is stale (e.g. a shared target directory).
pub fn binary_path(name: &str) -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));

    let standard = manifest_dir.join("target/debug").join(name);
    if standard.exists() {
        return standard;
    }

    // The test binary lives at target/debug/deps/specs-<hash>, so its
    // grandparent is target/debug/ where agnt and agntd are built.
    if let Ok(exe) = std::env::current_exe() {
        if let Some(debug_dir) = exe.parent().and_then(|d| d.parent()) {
            let fallback = debug_dir.join(name);
            if fallback.exists() {
                return fallback;
            }
        }
    }

    standard
}

/// An isolated daemon instance with its own state dir and socket.
pub struct Daemon {
    pub state: TempDir,
    pub socket: PathBuf,
    child: Option<Child>,
}

impl Daemon {
    /// Start `agntd` and wait until the socket accepts connections.
    pub fn start() -> Self {
        let state = TempDir::new().unwrap();
        let socket = state.path().join("agnt.sock");
        let mut daemon = Self {
            state,
            socket,
            child: None,
        };
        daemon.spawn();
        daemon
    }

    /// Spawn (or respawn after kill) the daemon on the same state dir.
    pub fn spawn(&mut self) {
        let child = Command::new(binary_path("agntd"))
            .args(["--socket"])
            .arg(&self.socket)
            .env("AGNT_STATE_DIR", self.state.path())
            .env("AGNT_OBSERVE_WINDOW_MS", OBSERVE_WINDOW_MS)
            .env("AGNT_OBSERVE_POLL_MS", OBSERVE_POLL_MS)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn agntd");
        self.child = Some(child);
        self.wait_ready();
    }

    fn wait_ready(&self) {
        let start = Instant::now();
        while start.elapsed() < SPEC_WAIT_MAX {
            if UnixStream::connect(&self.socket).is_ok() {
                return;
            }
            std::thread::sleep(SPEC_POLL_INTERVAL);
        }
        let log = std::fs::read_to_string(self.state.path().join("daemon.log"))
            .unwrap_or_default();
        panic!("daemon did not become ready; log:\n{log}");
    }

    /// Connect a raw protocol client.
    pub fn connect(&self) -> Conn {
        Conn::open(&self.socket)
    }

    /// Kill the daemon hard (crash simulation).
    pub fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    /// An `agnt` CLI command pointed at this daemon.
    pub fn cli(&self) -> Command {
        let mut cmd = Command::new(binary_path("agnt"));
        cmd.arg("--socket")
            .arg(&self.socket)
            .env("AGNT_STATE_DIR", self.state.path());
        cmd
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        self.kill();
    }
}

/// A parsed response frame.
#[derive(Debug, PartialEq)]
pub enum Frame {
    Ok(Option<String>),
    Err { code: String, message: String },
    Pong,
    Json(serde_json::Value),
    Chunks(Vec<Vec<u8>>),
}

impl Frame {
    pub fn json(&self) -> &serde_json::Value {
        match self {
            Frame::Json(value) => value,
            other => panic!("expected JSON frame, got {other:?}"),
        }
    }

    pub fn expect_ok(&self) {
        assert!(
            matches!(self, Frame::Ok(_) | Frame::Pong),
            "expected OK, got {self:?}"
        );
    }

    pub fn err_code(&self) -> &str {
        match self {
            Frame::Err { code, .. } => code,
            other => panic!("expected ERR frame, got {other:?}"),
        }
    }
}

/// Raw protocol connection.
pub struct Conn {
    reader: BufReader<UnixStream>,
}

impl Conn {
    pub fn open(socket: &Path) -> Self {
        let stream = UnixStream::connect(socket).expect("connect to daemon");
        stream
            .set_read_timeout(Some(SPEC_WAIT_MAX))
            .expect("set read timeout");
        Self {
            reader: BufReader::new(stream),
        }
    }

    /// Send one command line (plus optional payload) and parse the response.
    pub fn request(&mut self, line: &str) -> Frame {
        self.request_with_payload(line, None)
    }

    pub fn request_with_payload(&mut self, line: &str, payload: Option<&[u8]>) -> Frame {
        {
            let stream = self.reader.get_mut();
            match payload {
                Some(data) => {
                    write!(stream, "{line} -- {}\n", data.len()).unwrap();
                    stream.write_all(data).unwrap();
                }
                None => writeln!(stream, "{line}").unwrap(),
            }
            stream.flush().unwrap();
        }
        self.read_frame()
    }

    fn read_line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response");
        line.trim_end_matches(['\r', '\n']).to_string()
    }

    fn read_body(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).expect("read body");
        buf
    }

    fn read_frame(&mut self) -> Frame {
        let line = self.read_line();
        let (head, rest) = line.split_once(' ').unwrap_or((line.as_str(), ""));
        match head {
            "PONG" => Frame::Pong,
            "OK" => Frame::Ok(if rest.is_empty() {
                None
            } else {
                Some(rest.to_string())
            }),
            "ERR" => {
                let (code, message) = rest.split_once(' ').unwrap_or((rest, ""));
                Frame::Err {
                    code: code.to_string(),
                    message: message.to_string(),
                }
            }
            "JSON" => {
                let len: usize = rest.trim().parse().expect("body length");
                let body = self.read_body(len);
                Frame::Json(serde_json::from_slice(&body).expect("JSON body"))
            }
            "CHUNK" => {
                let mut chunks = vec![self.read_body(rest.trim().parse().expect("chunk length"))];
                loop {
                    let line = self.read_line();
                    if line == "END" {
                        return Frame::Chunks(chunks);
                    }
                    let len = line
                        .strip_prefix("CHUNK ")
                        .and_then(|l| l.trim().parse().ok())
                        .expect("chunk frame");
                    chunks.push(self.read_body(len));
                }
            }
            "END" => Frame::Chunks(Vec::new()),
            other => panic!("unknown frame: {other}"),
        }
    }
}

/// A fake overlay: accepts HTTP POSTs over a Unix socket and records the
/// delivered message bodies.
pub struct OverlayStub {
    pub socket: PathBuf,
    pub messages: Arc<Mutex<Vec<serde_json::Value>>>,
    _dir: TempDir,
}

impl OverlayStub {
    pub fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("overlay.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let messages = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&messages);
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || serve_overlay(stream, &sink));
            }
        });

        Self {
            socket,
            messages,
            _dir: dir,
        }
    }

    /// Texts delivered so far, in arrival order.
    pub fn texts(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| m["text"].as_str().map(String::from))
            .collect()
    }

    /// Wait until at least `count` messages arrived.
    pub fn wait_for(&self, count: usize, timeout: Duration) {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if self.messages.lock().unwrap().len() >= count {
                return;
            }
            std::thread::sleep(SPEC_POLL_INTERVAL);
        }
        panic!(
            "expected {count} overlay messages, got {:?}",
            self.texts()
        );
    }
}

fn serve_overlay(stream: UnixStream, sink: &Arc<Mutex<Vec<serde_json::Value>>>) {
    let mut reader = BufReader::new(stream);

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            return;
        }
        if let Some(len) = line
            .to_ascii_lowercase()
            .strip_prefix("content-length:")
            .and_then(|v| v.trim().parse::<usize>().ok())
        {
            content_length = len;
        }
        if line == "\r\n" {
            break;
        }
    }

    let mut body = vec![0u8; content_length];
    if reader.read_exact(&mut body).is_err() {
        return;
    }
    if let Ok(value) = serde_json::from_slice(&body) {
        sink.lock().unwrap().push(value);
    }

    let stream = reader.get_mut();
    let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
}

/// Poll until `check` passes or the wait cap runs out.
pub fn wait_until(description: &str, mut check: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < SPEC_WAIT_MAX {
        if check() {
            return;
        }
        std::thread::sleep(SPEC_POLL_INTERVAL);
    }
    panic!("timed out waiting for: {description}");
}
