//! Inter-process communication for the daemon
//!
//! Unix domain socket server speaking newline-delimited JSON. A connection
//! stays open for any number of requests; consumers use it to drain records,
//! hook adapters use it to deliver value writes.
//!
//! Any local user may connect and read. Delivering notifications, reloading
//! and shutting down are limited to root and the daemon's own user, checked
//! against the peer credentials of the connection.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use uuid::Uuid;

use crate::channel::{ChannelError, ChannelHandle};
use crate::constants::MAX_READ_CAPACITY;
use crate::daemon::DaemonState;
use crate::models::SetValueNotification;
use crate::observer::ObserverStats;
use crate::queue::QueueStats;

/// Malformed or unparseable request
pub const ERROR_BAD_REQUEST: u32 = 400;
/// Peer is not allowed to send this request
pub const ERROR_FORBIDDEN: u32 = 403;
/// Configuration file failed to load or validate
pub const ERROR_INVALID_CONFIG: u32 = 422;
pub const ERROR_INTERNAL: u32 = 500;
/// The observer has shut down
pub const ERROR_NOT_RUNNING: u32 = 503;

/// IPC message types for daemon communication
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcMessage {
    /// Drain up to `capacity` bytes of whole records
    Read {
        request_id: String,
        capacity: usize,
    },
    /// Deliver a completed value write to the hook
    Notify {
        request_id: String,
        notification: SetValueNotification,
    },
    /// Reload configuration from file
    ReloadConfig {
        request_id: String,
    },
    /// Get current daemon status
    GetStatus {
        request_id: String,
    },
    /// Get daemon runtime statistics
    GetStats {
        request_id: String,
    },
    /// Shutdown daemon gracefully
    Shutdown {
        request_id: String,
    },
}

/// IPC response types
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum IpcResponse {
    /// Successful operation
    Success {
        request_id: String,
        data: Option<serde_json::Value>,
        message: Option<String>,
    },
    /// Operation failed
    Error {
        request_id: String,
        code: u32,
        message: String,
        details: Option<String>,
    },
}

impl IpcResponse {
    fn success(request_id: String, data: Option<serde_json::Value>, message: Option<&str>) -> Self {
        IpcResponse::Success {
            request_id,
            data,
            message: message.map(str::to_string),
        }
    }

    fn error(request_id: String, code: u32, message: &str, details: Option<String>) -> Self {
        IpcResponse::Error {
            request_id,
            code,
            message: message.to_string(),
            details,
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            IpcResponse::Success { request_id, .. } | IpcResponse::Error { request_id, .. } => request_id,
        }
    }
}

/// Payload of a successful Read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadData {
    /// Number of record bytes
    pub len: usize,
    /// Base64 of the concatenated records
    pub records: String,
}

impl ReadData {
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            len: bytes.len(),
            records: BASE64.encode(bytes),
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        let bytes = BASE64
            .decode(self.records.as_bytes())
            .context("Invalid base64 record data")?;
        if bytes.len() != self.len {
            bail!("Record data length {} does not match declared {}", bytes.len(), self.len);
        }
        Ok(bytes)
    }
}

/// Daemon status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Whether the observer is accepting reads
    pub running: bool,
    /// Process ID
    pub pid: u32,
    /// Uptime in seconds
    pub uptime_seconds: u64,
    /// Configuration file path, if one was given
    pub config_path: Option<PathBuf>,
    pub socket_path: PathBuf,
    pub protected_root: String,
    pub case_sensitive: bool,
    pub max_queue_len: usize,
    /// Connected clients
    pub open_handles: usize,
    /// Last configuration reload time
    pub last_config_reload: Option<chrono::DateTime<chrono::Utc>>,
}

/// Daemon runtime statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStats {
    pub queue: QueueStats,
    pub observer: ObserverStats,
}

/// IPC server for handling client connections
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    state: Arc<DaemonState>,
    daemon_uid: u32,
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        // Only remove the socket this server bound
        if self.listener.is_some() && self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

/// Handler for individual IPC connections
#[derive(Clone)]
struct IpcServerHandler {
    state: Arc<DaemonState>,
    daemon_uid: u32,
}

/// Credentials of the process on the other end of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Peer {
    uid: Option<u32>,
}

impl Peer {
    fn of(stream: &UnixStream) -> Self {
        Self {
            uid: stream.peer_cred().ok().map(|cred| cred.uid()),
        }
    }

    fn is_trusted(&self, daemon_uid: u32) -> bool {
        matches!(self.uid, Some(uid) if uid == 0 || uid == daemon_uid)
    }
}

impl IpcServer {
    pub fn new(socket_path: PathBuf, state: Arc<DaemonState>) -> Self {
        Self {
            socket_path,
            listener: None,
            state,
            daemon_uid: nix::unistd::geteuid().as_raw(),
        }
    }

    pub fn socket_path(&self) -> &std::path::Path {
        &self.socket_path
    }

    /// Bind the socket, replacing a stale socket file left by a dead daemon
    pub fn bind(&mut self) -> Result<()> {
        if self.socket_path.exists() {
            if std::os::unix::net::UnixStream::connect(&self.socket_path).is_ok() {
                bail!("Another daemon is already listening on {}", self.socket_path.display());
            }
            std::fs::remove_file(&self.socket_path)
                .with_context(|| format!("Failed to remove existing socket: {}", self.socket_path.display()))?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory: {}", parent.display()))?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind to socket: {}", self.socket_path.display()))?;
        // Consumers run unprivileged; privileged requests are checked per peer
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o666))
            .with_context(|| format!("Failed to set socket permissions: {}", self.socket_path.display()))?;
        self.listener = Some(listener);
        log::info!("IPC server listening on {}", self.socket_path.display());
        Ok(())
    }

    /// Accept connections until the listener fails
    pub async fn serve(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("IPC server is not bound")?;

        loop {
            let (stream, _) = listener.accept().await.context("Error accepting IPC connection")?;
            let handler = self.clone_for_handler();
            tokio::spawn(async move {
                if let Err(e) = handler.handle_connection(stream).await {
                    let _ = handler
                        .state
                        .logger()
                        .log_error(&format!("Error handling IPC connection: {}", e), None);
                }
            });
        }
    }

    fn clone_for_handler(&self) -> IpcServerHandler {
        IpcServerHandler {
            state: self.state.clone(),
            daemon_uid: self.daemon_uid,
        }
    }

    /// Generate unique request ID
    pub fn generate_request_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Stop the server and clean up socket file
    pub fn stop(&mut self) -> Result<()> {
        if self.listener.take().is_some() && self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .with_context(|| format!("Failed to remove socket file: {}", self.socket_path.display()))?;
        }
        Ok(())
    }
}

impl IpcServerHandler {
    /// Serve one client until it disconnects. The client's channel handle
    /// is closed however the connection ends.
    async fn handle_connection(&self, stream: UnixStream) -> Result<()> {
        let handle = self.state.channel().open().ok();
        if let Some(ref handle) = handle {
            self.state.logger().log_client(handle.id(), true)?;
        }

        let peer = Peer::of(&stream);
        let result = self.serve_requests(stream, handle.as_ref(), peer).await;

        if let Some(handle) = handle {
            self.state.logger().log_client(handle.id(), false)?;
            self.state.channel().close(handle);
        }
        result
    }

    async fn serve_requests(&self, stream: UnixStream, handle: Option<&ChannelHandle>, peer: Peer) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next_line().await.context("Failed to read from client")? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<IpcMessage>(line) {
                Ok(message) => match self.check_peer(&message, peer) {
                    Some(denied) => denied,
                    None => self.process_message(message, handle).await,
                },
                Err(e) => IpcResponse::error(
                    "unknown".to_string(),
                    ERROR_BAD_REQUEST,
                    "Failed to parse IPC message",
                    Some(e.to_string()),
                ),
            };

            let mut response_json = serde_json::to_string(&response).context("Failed to serialize response")?;
            response_json.push('\n');
            writer
                .write_all(response_json.as_bytes())
                .await
                .context("Failed to write response")?;
        }

        Ok(())
    }

    /// Reject requests that only root or the daemon's user may send
    fn check_peer(&self, message: &IpcMessage, peer: Peer) -> Option<IpcResponse> {
        let (request_id, kind) = match message {
            IpcMessage::Notify { request_id, .. } => (request_id, "Notify"),
            IpcMessage::ReloadConfig { request_id } => (request_id, "ReloadConfig"),
            IpcMessage::Shutdown { request_id } => (request_id, "Shutdown"),
            _ => return None,
        };
        if peer.is_trusted(self.daemon_uid) {
            return None;
        }

        let who = peer.uid.map_or_else(|| "unknown uid".to_string(), |uid| format!("uid {}", uid));
        let _ = self
            .state
            .logger()
            .log_warning(&format!("Rejected {} request", kind), Some(&who));
        Some(IpcResponse::error(
            request_id.clone(),
            ERROR_FORBIDDEN,
            "Permission denied",
            Some(format!("{} may not send {}", who, kind)),
        ))
    }

    /// Process an IPC message and generate appropriate response
    async fn process_message(&self, message: IpcMessage, handle: Option<&ChannelHandle>) -> IpcResponse {
        match message {
            IpcMessage::Read { request_id, capacity } => self.read(request_id, capacity, handle),
            IpcMessage::Notify {
                request_id,
                notification,
            } => match notification.into_post_operation() {
                Ok((key, operation)) => {
                    self.state.deliver(&key, operation);
                    IpcResponse::success(request_id, None, Some("Notification delivered"))
                }
                Err(e) => IpcResponse::error(request_id, ERROR_BAD_REQUEST, "Invalid notification", Some(e.to_string())),
            },
            IpcMessage::ReloadConfig { request_id } => match self.state.reload_config().await {
                Ok(summary) => {
                    let message = if summary.restart_required {
                        "Configuration reloaded; daemon settings apply after restart"
                    } else {
                        "Configuration reloaded"
                    };
                    IpcResponse::success(
                        request_id,
                        Some(serde_json::json!({ "filter_changed": summary.filter_changed })),
                        Some(message),
                    )
                }
                Err(e) => IpcResponse::error(
                    request_id,
                    ERROR_INVALID_CONFIG,
                    "Configuration reload failed",
                    Some(format!("{:#}", e)),
                ),
            },
            IpcMessage::GetStatus { request_id } => {
                let status = self.state.status().await;
                to_data(request_id, &status)
            }
            IpcMessage::GetStats { request_id } => to_data(request_id, &self.state.stats()),
            IpcMessage::Shutdown { request_id } => {
                self.state.request_shutdown();
                IpcResponse::success(request_id, None, Some("Shutdown requested"))
            }
        }
    }

    fn read(&self, request_id: String, capacity: usize, handle: Option<&ChannelHandle>) -> IpcResponse {
        let Some(handle) = handle else {
            return IpcResponse::error(request_id, ERROR_NOT_RUNNING, "Observer is not running", None);
        };

        match self.state.channel().read_to_vec(handle, capacity.min(MAX_READ_CAPACITY)) {
            Ok(bytes) => to_data(request_id, &ReadData::new(&bytes)),
            Err(ChannelError::NotRunning) => {
                IpcResponse::error(request_id, ERROR_NOT_RUNNING, "Observer is not running", None)
            }
            Err(e) => IpcResponse::error(request_id, ERROR_INTERNAL, "Read failed", Some(e.to_string())),
        }
    }
}

fn to_data<T: Serialize>(request_id: String, value: &T) -> IpcResponse {
    match serde_json::to_value(value) {
        Ok(data) => IpcResponse::success(request_id, Some(data), None),
        Err(e) => IpcResponse::error(request_id, ERROR_INTERNAL, "Failed to serialize response", Some(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_format() {
        let json = r#"{"type":"Read","request_id":"r1","capacity":4096}"#;
        match serde_json::from_str::<IpcMessage>(json).unwrap() {
            IpcMessage::Read { request_id, capacity } => {
                assert_eq!(request_id, "r1");
                assert_eq!(capacity, 4096);
            }
            other => panic!("unexpected message {:?}", other),
        }

        let shutdown = serde_json::to_string(&IpcMessage::Shutdown {
            request_id: "r2".to_string(),
        })
        .unwrap();
        assert_eq!(shutdown, r#"{"type":"Shutdown","request_id":"r2"}"#);
    }

    #[test]
    fn test_response_wire_format() {
        let response = IpcResponse::error("r3".to_string(), ERROR_NOT_RUNNING, "Observer is not running", None);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "Error");
        assert_eq!(value["code"], 503);
        assert_eq!(response.request_id(), "r3");
    }

    #[test]
    fn test_read_data_decode() {
        let data = ReadData::new(&[1, 2, 3, 4]);
        assert_eq!(data.len, 4);
        assert_eq!(data.decode().unwrap(), vec![1, 2, 3, 4]);

        let lying = ReadData {
            len: 10,
            records: data.records.clone(),
        };
        assert!(lying.decode().is_err());
    }

    fn handler() -> IpcServerHandler {
        let state = DaemonState::new(crate::daemon::config::DaemonConfiguration::default(), None).unwrap();
        IpcServerHandler {
            state: Arc::new(state),
            daemon_uid: 1000,
        }
    }

    fn notify_message() -> IpcMessage {
        IpcMessage::Notify {
            request_id: "n1".to_string(),
            notification: SetValueNotification::new(
                r"\REGISTRY\MACHINE\SOFTWARE\Run",
                "Forged",
                crate::models::ValueType::Sz,
                &[0, 0],
                1,
                1,
            ),
        }
    }

    #[test]
    fn test_peer_trust() {
        assert!(Peer { uid: Some(0) }.is_trusted(1000));
        assert!(Peer { uid: Some(1000) }.is_trusted(1000));
        assert!(!Peer { uid: Some(1001) }.is_trusted(1000));
        assert!(!Peer { uid: None }.is_trusted(1000));
    }

    #[tokio::test]
    async fn test_untrusted_peer_cannot_notify() {
        let handler = handler();
        let stranger = Peer { uid: Some(4242) };

        match handler.check_peer(&notify_message(), stranger) {
            Some(IpcResponse::Error { request_id, code, .. }) => {
                assert_eq!(request_id, "n1");
                assert_eq!(code, ERROR_FORBIDDEN);
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        let shutdown = IpcMessage::Shutdown {
            request_id: "s1".to_string(),
        };
        assert!(handler.check_peer(&shutdown, stranger).is_some());
        assert_eq!(handler.state.stats().observer.captured, 0);

        // Reading and status stay open to everyone
        let read = IpcMessage::Read {
            request_id: "r1".to_string(),
            capacity: 4096,
        };
        assert!(handler.check_peer(&read, stranger).is_none());
    }

    #[tokio::test]
    async fn test_trusted_peer_can_notify() {
        let handler = handler();
        let owner = Peer { uid: Some(1000) };
        let message = notify_message();
        assert!(handler.check_peer(&message, owner).is_none());

        match handler.process_message(message, None).await {
            IpcResponse::Success { .. } => {}
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(handler.state.stats().observer.captured, 1);
    }

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(IpcServer::generate_request_id(), IpcServer::generate_request_id());
    }
}
