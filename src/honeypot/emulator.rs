// shadowwall-core/src/honeypot/emulator.rs
//
// Decoy service emulators. One DecoyService per deployed instance: it owns
// the accept loop and a local interaction buffer; the protocol-specific
// exchange lives behind the ProtocolScript seam. None of the scripts
// implement the real service, they only play a plausible exchange and
// record what the remote side does.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, error, info};
use parking_lot::Mutex;
use rand::Rng;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;

use crate::common::{now_ts, HoneypotInteraction, ServiceType};
use crate::InstanceId;

const PROMPT_READ_TIMEOUT: Duration = Duration::from_secs(5);
const LINE_READ_TIMEOUT: Duration = Duration::from_secs(30);
const GENERIC_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// What one scripted session observed. The accept loop wraps this into a
/// HoneypotInteraction; scripts never touch the buffer directly.
pub struct SessionOutcome {
    pub interaction_type: &'static str,
    pub commands: Vec<String>,
    pub payloads: Vec<String>,
    pub session_data: serde_json::Value,
}

/// Protocol seam: each variant differs only in the scripted exchange.
///
/// `run_session` is infallible on purpose. A session that times out or
/// sends garbage is still an attempted interaction and must be recorded,
/// so wire errors are folded into the outcome instead of propagated.
#[async_trait]
pub trait ProtocolScript: Send + Sync {
    fn service(&self) -> ServiceType;
    async fn run_session(&self, stream: TcpStream, peer: SocketAddr) -> SessionOutcome;
}

/// Build the script for a service type. `config` is the opaque per-instance
/// configuration; only the generic script currently reads it.
pub fn script_for(service: ServiceType, config: &serde_json::Value) -> Arc<dyn ProtocolScript> {
    match service {
        ServiceType::Ssh => Arc::new(SshScript),
        ServiceType::Http => Arc::new(HttpScript),
        ServiceType::Ftp => Arc::new(FtpScript),
        ServiceType::Telnet => Arc::new(TelnetScript),
        ServiceType::Smtp => Arc::new(SmtpScript),
        ServiceType::Generic => Arc::new(GenericScript {
            banner: config
                .get("banner")
                .and_then(|b| b.as_str())
                .unwrap_or("220 service ready\r\n")
                .to_string(),
        }),
    }
}

// --- Decoy service core ---

pub struct DecoyService {
    instance_id: InstanceId,
    script: Arc<dyn ProtocolScript>,
    port: u16,
    buffer: Arc<Mutex<Vec<HoneypotInteraction>>>,
    accepting: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
}

impl DecoyService {
    pub fn new(instance_id: InstanceId, service: ServiceType, port: u16, config: &serde_json::Value) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            instance_id,
            script: script_for(service, config),
            port,
            buffer: Arc::new(Mutex::new(Vec::new())),
            accepting: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Begin accepting on an already-bound listener. The registry binds the
    /// listener inside its allocation critical section and hands it over,
    /// so there is no close-and-rebind window on the allocated port.
    pub fn start(&self, listener: TcpListener) {
        self.accepting.store(true, Ordering::SeqCst);

        let script = self.script.clone();
        let buffer = self.buffer.clone();
        let accepting = self.accepting.clone();
        let instance_id = self.instance_id.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!(
            "{} honeypot accepting on port {} ({})",
            script.service(),
            self.port,
            instance_id
        );

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                Self::spawn_session(
                                    script.clone(),
                                    buffer.clone(),
                                    instance_id.clone(),
                                    stream,
                                    peer,
                                );
                            }
                            Err(e) => {
                                error!("{}: accept failed: {}", instance_id, e);
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("{}: accept loop shutting down", instance_id);
                        break;
                    }
                }
            }
            accepting.store(false, Ordering::SeqCst);
        });
    }

    fn spawn_session(
        script: Arc<dyn ProtocolScript>,
        buffer: Arc<Mutex<Vec<HoneypotInteraction>>>,
        instance_id: InstanceId,
        stream: TcpStream,
        peer: SocketAddr,
    ) {
        // In-flight sessions are not cancelled on stop; they finish (or time
        // out) on their own and their record is picked up by the next drain.
        tokio::spawn(async move {
            let started = Instant::now();
            let ts = now_ts();
            let service = script.service();
            let outcome = script.run_session(stream, peer).await;

            // Always exactly one record per session, whatever happened.
            let record = HoneypotInteraction {
                timestamp: ts,
                instance_id,
                source_ip: peer.ip(),
                source_port: peer.port(),
                service,
                interaction_type: outcome.interaction_type.to_string(),
                duration: started.elapsed().as_secs_f64(),
                commands: outcome.commands,
                payloads: outcome.payloads,
                successful: false,
                session_data: outcome.session_data,
            };
            buffer.lock().push(record);
        });
    }

    /// Stop accepting. Idempotent; already-stopped services ignore it.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// Whether the accept loop is still alive. Used by the health monitor.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Atomically swap out the pending interaction buffer. A record arriving
    /// mid-drain lands in the fresh buffer and is picked up next cycle.
    pub fn drain(&self) -> Vec<HoneypotInteraction> {
        std::mem::take(&mut *self.buffer.lock())
    }
}

fn hex_encode(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for b in data {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// Bounded read of one chunk. None on timeout, EOF or error.
async fn read_chunk(stream: &mut TcpStream, buf: &mut [u8], limit: Duration) -> Option<usize> {
    match timeout(limit, stream.read(buf)).await {
        Ok(Ok(n)) if n > 0 => Some(n),
        _ => None,
    }
}

/// Bounded read of one CRLF-terminated line, minus the terminator. Buffered
/// framing: commands pipelined into one TCP segment come out one per call.
/// None on timeout, EOF or error.
async fn read_line<R>(reader: &mut R, limit: Duration) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    match timeout(limit, reader.read_line(&mut line)).await {
        Ok(Ok(n)) if n > 0 => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        _ => None,
    }
}

// --- SSH ---

struct SshScript;

#[async_trait]
impl ProtocolScript for SshScript {
    fn service(&self) -> ServiceType {
        ServiceType::Ssh
    }

    async fn run_session(&self, mut stream: TcpStream, _peer: SocketAddr) -> SessionOutcome {
        let mut commands = Vec::new();
        let mut payloads = Vec::new();
        let mut client_banner = String::new();

        if stream.write_all(b"SSH-2.0-OpenSSH_7.4\r\n").await.is_ok() {
            let mut buf = [0u8; 256];
            if let Some(n) = read_chunk(&mut stream, &mut buf, PROMPT_READ_TIMEOUT).await {
                client_banner = String::from_utf8_lossy(&buf[..n]).trim().to_string();
            }

            let prompts: [&[u8]; 4] = [
                b"login: ",
                b"Password: ",
                b"Permission denied, please try again.\r\n",
                b"Connection closed.\r\n",
            ];
            for prompt in prompts {
                if stream.write_all(prompt).await.is_err() {
                    break;
                }
                let mut chunk = [0u8; 1024];
                match read_chunk(&mut stream, &mut chunk, PROMPT_READ_TIMEOUT).await {
                    Some(n) => {
                        commands.push(String::from_utf8_lossy(&chunk[..n]).trim().to_string());
                        payloads.push(hex_encode(&chunk[..n]));
                    }
                    None => break,
                }
            }
        }

        SessionOutcome {
            interaction_type: "authentication_attempt",
            commands,
            payloads,
            session_data: json!({ "client_banner": client_banner, "successful": false }),
        }
    }
}

// --- HTTP ---

struct HttpScript;

const HTTP_PAGES: [&str; 4] = [
    "<!DOCTYPE html><html><head><title>Admin Login</title></head><body>\
     <h2>Administrator Login</h2><form method=\"post\">\
     <input type=\"text\" name=\"username\" placeholder=\"Username\"><br>\
     <input type=\"password\" name=\"password\" placeholder=\"Password\"><br>\
     <input type=\"submit\" value=\"Login\"></form></body></html>",
    "<!DOCTYPE html><html><head><title>System Administration</title></head><body>\
     <h1>System Control Panel</h1><p>Welcome to the administration interface</p>\
     <ul><li><a href=\"/users\">User Management</a></li>\
     <li><a href=\"/config\">Configuration</a></li>\
     <li><a href=\"/logs\">System Logs</a></li></ul></body></html>",
    "<!DOCTYPE html><html><head><title>Error 404</title></head><body>\
     <h1>404 - Not Found</h1><p>The requested resource was not found on this server.</p>\
     </body></html>",
    "<!DOCTYPE html><html><head><title>Welcome</title></head><body>\
     <h1>Welcome to our server</h1><p>This is the default page for this web server.</p>\
     </body></html>",
];

fn extract_user_agent(request: &str) -> String {
    request
        .lines()
        .find(|l| l.to_ascii_lowercase().starts_with("user-agent:"))
        .and_then(|l| l.splitn(2, ':').nth(1))
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

#[async_trait]
impl ProtocolScript for HttpScript {
    fn service(&self) -> ServiceType {
        ServiceType::Http
    }

    async fn run_session(&self, mut stream: TcpStream, _peer: SocketAddr) -> SessionOutcome {
        let mut commands = Vec::new();
        let mut payloads = Vec::new();
        let mut request = String::new();

        let mut buf = [0u8; 4096];
        if let Some(n) = read_chunk(&mut stream, &mut buf, GENERIC_READ_TIMEOUT).await {
            request = String::from_utf8_lossy(&buf[..n]).to_string();
            payloads.push(hex_encode(&buf[..n]));

            let request_line = request.lines().next().unwrap_or("").to_string();
            commands.push(request_line);

            let page = HTTP_PAGES[rand::thread_rng().gen_range(0..HTTP_PAGES.len())];
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nServer: Apache/2.4.41\r\n\r\n{}",
                page.len(),
                page
            );
            let _ = stream.write_all(response.as_bytes()).await;
        }

        let method = commands
            .first()
            .and_then(|l| l.split_whitespace().next())
            .unwrap_or("UNKNOWN")
            .to_string();

        SessionOutcome {
            interaction_type: "web_request",
            commands,
            payloads,
            session_data: json!({
                "user_agent": extract_user_agent(&request),
                "method": method,
            }),
        }
    }
}

// --- FTP ---

struct FtpScript;

#[async_trait]
impl ProtocolScript for FtpScript {
    fn service(&self) -> ServiceType {
        ServiceType::Ftp
    }

    async fn run_session(&self, stream: TcpStream, _peer: SocketAddr) -> SessionOutcome {
        let mut stream = BufReader::new(stream);
        let mut commands = Vec::new();

        if stream.write_all(b"220 Welcome to FTP server\r\n").await.is_ok() {
            loop {
                let line = match read_line(&mut stream, LINE_READ_TIMEOUT).await {
                    Some(l) => l,
                    None => break,
                };
                let upper = line.to_ascii_uppercase();
                commands.push(line);

                let response: &[u8] = if upper.starts_with("USER") {
                    b"331 Password required\r\n"
                } else if upper.starts_with("PASS") {
                    b"530 Login incorrect\r\n"
                } else if upper.starts_with("QUIT") {
                    let _ = stream.write_all(b"221 Goodbye\r\n").await;
                    break;
                } else {
                    b"500 Command not understood\r\n"
                };
                if stream.write_all(response).await.is_err() {
                    break;
                }
            }
        }

        SessionOutcome {
            interaction_type: "ftp_session",
            commands,
            payloads: Vec::new(),
            session_data: json!({ "successful_login": false }),
        }
    }
}

// --- Telnet ---

struct TelnetScript;

#[async_trait]
impl ProtocolScript for TelnetScript {
    fn service(&self) -> ServiceType {
        ServiceType::Telnet
    }

    async fn run_session(&self, mut stream: TcpStream, _peer: SocketAddr) -> SessionOutcome {
        let mut commands = Vec::new();
        let mut payloads = Vec::new();

        let prompts: [&[u8]; 3] = [
            b"Ubuntu 20.04.6 LTS\r\nlogin: ",
            b"Password: ",
            b"\r\nLogin incorrect\r\n",
        ];
        for prompt in prompts {
            if stream.write_all(prompt).await.is_err() {
                break;
            }
            let mut chunk = [0u8; 1024];
            match read_chunk(&mut stream, &mut chunk, PROMPT_READ_TIMEOUT).await {
                Some(n) => {
                    commands.push(String::from_utf8_lossy(&chunk[..n]).trim().to_string());
                    payloads.push(hex_encode(&chunk[..n]));
                }
                None => break,
            }
        }

        SessionOutcome {
            interaction_type: "login_attempt",
            commands,
            payloads,
            session_data: json!({ "successful": false }),
        }
    }
}

// --- SMTP ---

struct SmtpScript;

#[async_trait]
impl ProtocolScript for SmtpScript {
    fn service(&self) -> ServiceType {
        ServiceType::Smtp
    }

    async fn run_session(&self, stream: TcpStream, _peer: SocketAddr) -> SessionOutcome {
        let mut stream = BufReader::new(stream);
        let mut commands = Vec::new();

        if stream.write_all(b"220 mail.local ESMTP Postfix\r\n").await.is_ok() {
            loop {
                let line = match read_line(&mut stream, LINE_READ_TIMEOUT).await {
                    Some(l) => l,
                    None => break,
                };
                let upper = line.to_ascii_uppercase();
                commands.push(line);

                let response: &[u8] = if upper.starts_with("EHLO") || upper.starts_with("HELO") {
                    b"250 mail.local\r\n"
                } else if upper.starts_with("MAIL") || upper.starts_with("RCPT") {
                    b"250 Ok\r\n"
                } else if upper.starts_with("DATA") {
                    b"354 End data with <CR><LF>.<CR><LF>\r\n"
                } else if upper.starts_with("QUIT") {
                    let _ = stream.write_all(b"221 Bye\r\n").await;
                    break;
                } else {
                    b"502 Command not implemented\r\n"
                };
                if stream.write_all(response).await.is_err() {
                    break;
                }
            }
        }

        SessionOutcome {
            interaction_type: "smtp_session",
            commands,
            payloads: Vec::new(),
            session_data: json!({ "successful": false }),
        }
    }
}

// --- Generic ---

struct GenericScript {
    banner: String,
}

#[async_trait]
impl ProtocolScript for GenericScript {
    fn service(&self) -> ServiceType {
        ServiceType::Generic
    }

    async fn run_session(&self, mut stream: TcpStream, _peer: SocketAddr) -> SessionOutcome {
        let mut commands = Vec::new();
        let mut payloads = Vec::new();

        if stream.write_all(self.banner.as_bytes()).await.is_ok() {
            let mut buf = [0u8; 1024];
            if let Some(n) = read_chunk(&mut stream, &mut buf, GENERIC_READ_TIMEOUT).await {
                commands.push(String::from_utf8_lossy(&buf[..n]).trim().to_string());
                payloads.push(hex_encode(&buf[..n]));
            }
        }

        SessionOutcome {
            interaction_type: "connection",
            commands,
            payloads,
            session_data: json!({}),
        }
    }
}
