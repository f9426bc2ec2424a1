//! Reference upload endpoint
//!
//! A small `tiny_http` server that stores uploaded log files:
//!
//! - `POST` with `Content-Disposition: attachment; filename=<name>` writes the
//!   body verbatim to `<upload_dir>/<name>` and answers
//!   `{"success": true, "response": "<name> of <size> uploaded"}` (200)
//! - missing header or file name answers 400, a failed write 500
//! - any other method echoes the query parameters with 200
//!
//! File names are reduced to a bare basename: `../` sequences and leading
//! slashes are stripped before the name touches the filesystem.
//!
//! ```rust,no_run
//! use wearlog_connectors::server::{RelayServer, ServerConfig};
//!
//! let server = RelayServer::bind(ServerConfig::new("0.0.0.0:8080", "uploads"))?;
//! server.serve();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fs;
use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use lazy_static::lazy_static;
use log::{debug, error, info, warn};
use regex::Regex;
use thiserror::Error;
use tiny_http::{Header, Method, Request, Response, Server};

use crate::UploadResponse;

lazy_static! {
    static ref FILENAME_RE: Regex =
        Regex::new(r#"filename(\*)?=(UTF-8'')?"?([^";]+)"?;?"#).expect("filename pattern is valid");
    static ref PARENT_DIR_RE: Regex = Regex::new(r"\.{2,}/").expect("parent dir pattern is valid");
    static ref LEADING_SLASH_RE: Regex = Regex::new(r"^/+").expect("leading slash pattern is valid");
}

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Cannot bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Upload directory {path}: {source}")]
    UploadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Server thread panicked")]
    Join,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: String,
    pub upload_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("0.0.0.0:8080", "uploads")
    }
}

impl ServerConfig {
    pub fn new(bind: impl Into<String>, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            bind: bind.into(),
            upload_dir: upload_dir.into(),
        }
    }
}

/// Bare file name from a `Content-Disposition` value
pub fn disposition_filename(header: &str) -> Option<String> {
    let caps = FILENAME_RE.captures(header)?;
    let raw = caps.get(3)?.as_str();
    Some(percent_decode(raw))
}

/// Strip parent-directory hops and leading slashes, keep the basename
pub fn sanitize_filename(name: &str) -> Option<String> {
    let cleaned = PARENT_DIR_RE.replace_all(name, "");
    let cleaned = LEADING_SLASH_RE.replace(&cleaned, "");
    let base = Path::new(cleaned.as_ref()).file_name()?.to_str()?;
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Some(base.to_string())
}

/// `application/x-www-form-urlencoded` decoding; malformed escapes are kept
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match hex {
                    Some(b) => {
                        out.push(b);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Human readable size in decimal units, two decimals at most
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "kB", "MB", "GB"];

    let mut pow = 0;
    let mut value = bytes as f64;
    while value >= 1000.0 && pow < UNITS.len() - 1 {
        value /= 1000.0;
        pow += 1;
    }

    let rounded = format!("{:.2}", value);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[pow])
}

/// Query parameters echoed back for non-POST requests
fn echo_params(url: &str) -> String {
    let mut out = String::from("GET Request\nParams: Array\n(\n");
    if let Some((_, query)) = url.split_once('?') {
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            out.push_str(&format!(
                "    [{}] => {}\n",
                percent_decode(key),
                percent_decode(value)
            ));
        }
    }
    out.push_str(")\n");
    out
}

fn json_header() -> Option<Header> {
    "Content-Type: application/json; charset=utf-8".parse::<Header>().ok()
}

/// Status and body for one upload request
fn store_upload(upload_dir: &Path, disposition: Option<&str>, body: &[u8]) -> (u16, UploadResponse) {
    let Some(disposition) = disposition else {
        return (400, UploadResponse::failed("Error: set Content-Disposition header"));
    };
    let Some(filename) = disposition_filename(disposition).and_then(|n| sanitize_filename(&n)) else {
        return (
            400,
            UploadResponse::failed("Error: set filename in Content-Disposition header"),
        );
    };

    let path = upload_dir.join(&filename);
    if let Err(e) = fs::write(&path, body) {
        error!("Failed to save {}: {}", path.display(), e);
        return (500, UploadResponse::failed("Error: failed to save the file"));
    }

    let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(body.len() as u64);
    info!("{} of {} uploaded", filename, format_bytes(size));
    (
        200,
        UploadResponse::ok(format!("{} of {} uploaded", filename, format_bytes(size))),
    )
}

/// Upload endpoint bound to a local address
pub struct RelayServer {
    server: Arc<Server>,
    addr: SocketAddr,
    upload_dir: PathBuf,
}

impl RelayServer {
    /// Bind and create the upload directory
    pub fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        fs::create_dir_all(&config.upload_dir).map_err(|source| ServerError::UploadDir {
            path: config.upload_dir.clone(),
            source,
        })?;

        let server = Server::http(config.bind.as_str()).map_err(|e| ServerError::Bind {
            addr: config.bind.clone(),
            reason: e.to_string(),
        })?;
        let addr = server.server_addr().to_ip().ok_or_else(|| ServerError::Bind {
            addr: config.bind.clone(),
            reason: "not an IP listener".into(),
        })?;
        info!("Upload server listening on {}", addr);

        Ok(Self {
            server: Arc::new(server),
            addr,
            upload_dir: config.upload_dir,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Serve requests until the listener is unblocked
    pub fn serve(&self) {
        for request in self.server.incoming_requests() {
            self.handle(request);
        }
    }

    /// Serve on a background thread
    pub fn spawn(self) -> ServerHandle {
        let server = Arc::clone(&self.server);
        let addr = self.addr;
        let stopping = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopping);

        let thread = std::thread::spawn(move || {
            while !flag.load(Ordering::SeqCst) {
                match self.server.recv() {
                    Ok(request) => self.handle(request),
                    Err(e) => {
                        if !flag.load(Ordering::SeqCst) {
                            warn!("Upload server receive failed: {}", e);
                        }
                        break;
                    }
                }
            }
            debug!("Upload server thread exiting");
        });

        ServerHandle {
            server,
            addr,
            stopping,
            thread: Some(thread),
        }
    }

    fn handle(&self, mut request: Request) {
        let is_post = *request.method() == Method::Post;
        let (status, body) = if is_post {
            let disposition = request
                .headers()
                .iter()
                .find(|h| h.field.equiv("Content-Disposition"))
                .map(|h| h.value.as_str().to_string());

            let mut data = Vec::new();
            match request.as_reader().read_to_end(&mut data) {
                Ok(_) => store_upload(&self.upload_dir, disposition.as_deref(), &data),
                Err(e) => {
                    warn!("Cannot read request body: {}", e);
                    (400, UploadResponse::failed(format!("Error: {}", e)))
                }
            }
        } else {
            (200, UploadResponse::ok(echo_params(request.url())))
        };

        let text = match serde_json::to_string(&body) {
            Ok(text) => text,
            Err(e) => {
                error!("Cannot encode response: {}", e);
                return;
            }
        };

        let mut response = Response::from_string(text).with_status_code(status);
        if let Some(header) = json_header() {
            response = response.with_header(header);
        }
        if let Err(e) = request.respond(response) {
            warn!("Cannot send response: {}", e);
        }
    }
}

/// Running server thread
pub struct ServerHandle {
    server: Arc<Server>,
    addr: SocketAddr,
    stopping: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL for clients, `http://<addr>`
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop accepting requests and join the thread
    pub fn shutdown(mut self) -> Result<(), ServerError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), ServerError> {
        self.stopping.store(true, Ordering::SeqCst);
        self.server.unblock();
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| ServerError::Join),
            None => Ok(()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
