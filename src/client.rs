//! Client side of the daemon socket
//!
//! Keeps one connection open and sends newline-delimited JSON requests,
//! matching each response to its request id.

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use crate::channel::ChannelError;
use crate::daemon::ipc::{DaemonStats, DaemonStatus, IpcMessage, IpcResponse, IpcServer, ReadData, ERROR_NOT_RUNNING};
use crate::models::SetValueNotification;

/// Connected consumer or hook adapter
pub struct ChannelClient {
    socket_path: PathBuf,
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl ChannelClient {
    /// Connect to the daemon. A missing or refused socket means the
    /// observer is not running.
    pub async fn connect(socket_path: &Path) -> Result<Self, ChannelError> {
        let stream = match UnixStream::connect(socket_path).await {
            Ok(stream) => stream,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
                ) =>
            {
                return Err(ChannelError::NotRunning)
            }
            Err(source) => {
                return Err(ChannelError::Connect {
                    path: socket_path.to_path_buf(),
                    source,
                })
            }
        };
        let (reader, writer) = stream.into_split();
        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Drain up to `capacity` bytes of whole records
    pub async fn read(&mut self, capacity: usize) -> Result<Vec<u8>, ChannelError> {
        let request_id = IpcServer::generate_request_id();
        let data: ReadData = self
            .request_data(IpcMessage::Read { request_id, capacity })
            .await?;
        data.decode().map_err(|e| ChannelError::Protocol(format!("{:#}", e)))
    }

    /// Deliver a completed value write
    pub async fn notify(&mut self, notification: SetValueNotification) -> Result<(), ChannelError> {
        let request_id = IpcServer::generate_request_id();
        self.request(IpcMessage::Notify {
            request_id,
            notification,
        })
        .await
        .map(|_| ())
    }

    pub async fn status(&mut self) -> Result<DaemonStatus, ChannelError> {
        let request_id = IpcServer::generate_request_id();
        self.request_data(IpcMessage::GetStatus { request_id }).await
    }

    pub async fn stats(&mut self) -> Result<DaemonStats, ChannelError> {
        let request_id = IpcServer::generate_request_id();
        self.request_data(IpcMessage::GetStats { request_id }).await
    }

    /// Returns the daemon's summary message
    pub async fn reload_config(&mut self) -> Result<String, ChannelError> {
        let request_id = IpcServer::generate_request_id();
        let (_, message) = self.request(IpcMessage::ReloadConfig { request_id }).await?;
        Ok(message.unwrap_or_default())
    }

    pub async fn shutdown(&mut self) -> Result<(), ChannelError> {
        let request_id = IpcServer::generate_request_id();
        self.request(IpcMessage::Shutdown { request_id }).await.map(|_| ())
    }

    async fn request_data<T: DeserializeOwned>(&mut self, message: IpcMessage) -> Result<T, ChannelError> {
        let (data, _) = self.request(message).await?;
        let data = data.ok_or_else(|| ChannelError::Protocol("response carried no data".to_string()))?;
        serde_json::from_value(data).map_err(|e| ChannelError::Protocol(e.to_string()))
    }

    /// Send one request and wait for its response
    async fn request(
        &mut self,
        message: IpcMessage,
    ) -> Result<(Option<serde_json::Value>, Option<String>), ChannelError> {
        let expected_id = request_id(&message).to_string();

        let mut line = serde_json::to_string(&message).map_err(|e| ChannelError::Protocol(e.to_string()))?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;

        let reply = self
            .lines
            .next_line()
            .await?
            .ok_or_else(|| ChannelError::Protocol("daemon closed the connection".to_string()))?;
        let response: IpcResponse =
            serde_json::from_str(reply.trim()).map_err(|e| ChannelError::Protocol(e.to_string()))?;

        if response.request_id() != expected_id {
            return Err(ChannelError::Protocol(format!(
                "response for {} does not match request {}",
                response.request_id(),
                expected_id
            )));
        }

        match response {
            IpcResponse::Success { data, message, .. } => Ok((data, message)),
            IpcResponse::Error { code, .. } if code == ERROR_NOT_RUNNING => Err(ChannelError::NotRunning),
            IpcResponse::Error {
                code, message, details, ..
            } => Err(ChannelError::Rejected {
                code,
                message: match details {
                    Some(details) => format!("{}: {}", message, details),
                    None => message,
                },
            }),
        }
    }
}

fn request_id(message: &IpcMessage) -> &str {
    match message {
        IpcMessage::Read { request_id, .. }
        | IpcMessage::Notify { request_id, .. }
        | IpcMessage::ReloadConfig { request_id }
        | IpcMessage::GetStatus { request_id }
        | IpcMessage::GetStats { request_id }
        | IpcMessage::Shutdown { request_id } => request_id,
    }
}
