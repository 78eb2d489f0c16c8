//! Control socket
//!
//! A Unix domain socket through which the CLI drives the running daemon:
//! grab/ungrab requests, status queries, simple modification edits and LED
//! pushes. One JSON request per line, one JSON response per line.

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nix::libc;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::device::{HidDevice, LedState};
use crate::key_code::KeyCode;
use crate::registry::DeviceStatus;
use crate::service::DeviceGrabberHandle;

const SOCKET_NAME: &str = "keyseize.sock";

// ============================================================================
// Message Types
// ============================================================================

/// Requests sent to the daemon, tagged by `type`:
/// - `{"type": "grab"}`
/// - `{"type": "add_simple_modification", "from": "caps_lock", "to": "escape"}`
/// - `{"type": "set_caps_lock_led", "on": true}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    Grab,
    Ungrab,
    Status,
    ConnectAck,
    AddSimpleModification {
        /// Source key name
        from: String,
        /// Replacement key name
        to: String,
    },
    ClearSimpleModifications,
    SetCapsLockLed {
        on: bool,
    },
}

/// Responses sent back by the daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    Success {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Status {
        grabbed: bool,
        available: bool,
        retry_count: u64,
        simple_modifications: Vec<SimpleModificationEntry>,
        devices: Vec<DeviceStatus>,
    },
    Error {
        message: String,
    },
}

/// One simple modification, by key name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimpleModificationEntry {
    pub from: String,
    pub to: String,
}

// ============================================================================
// Server
// ============================================================================

/// Control socket listener. The socket file is removed when dropped.
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl IpcServer {
    /// Bind at the default path (see [`default_socket_path`]).
    pub fn new() -> Result<Self> {
        Self::bind(default_socket_path())
    }

    /// Bind at `socket_path`, replacing a stale socket file.
    pub fn bind(socket_path: PathBuf) -> Result<Self> {
        if socket_path.exists() {
            tracing::debug!("Removing stale socket file: {}", socket_path.display());
            std::fs::remove_file(&socket_path).with_context(|| {
                format!("Failed to remove stale socket file: {}", socket_path.display())
            })?;
        }

        let listener = UnixListener::bind(&socket_path).with_context(|| {
            format!("Failed to create control socket at {}", socket_path.display())
        })?;

        tracing::info!("Control socket listening on {}", socket_path.display());

        Ok(Self {
            listener,
            socket_path,
        })
    }

    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .context("Failed to accept control connection")?;
        tracing::debug!("Accepted control connection");
        Ok(stream)
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Serve connections forever, each on its own task.
    pub async fn serve<D: HidDevice>(self, handle: DeviceGrabberHandle<D>) {
        loop {
            let stream = match self.accept().await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("{:#}", e);
                    continue;
                }
            };

            let handle = handle.clone();
            tokio::spawn(async move {
                let result =
                    handle_ipc_connection(stream, |request| dispatch(&handle, request)).await;
                if let Err(e) = result {
                    tracing::debug!("Control connection failed: {:#}", e);
                }
            });
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                tracing::warn!("Failed to remove control socket on shutdown: {}", e);
            } else {
                tracing::debug!("Removed control socket: {}", self.socket_path.display());
            }
        }
    }
}

/// `$XDG_RUNTIME_DIR/keyseize.sock`, or `/tmp/keyseize-$UID.sock` when the
/// runtime dir is not set.
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join(SOCKET_NAME)
    } else {
        tracing::warn!("XDG_RUNTIME_DIR not set, using fallback socket path in /tmp");
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/keyseize-{}.sock", uid))
    }
}

// ============================================================================
// Connection Handling
// ============================================================================

/// Read one request line, answer it through `handler`, write one response
/// line.
pub async fn handle_ipc_connection<F, Fut>(mut stream: UnixStream, handler: F) -> Result<()>
where
    F: FnOnce(IpcRequest) -> Fut,
    Fut: Future<Output = IpcResponse>,
{
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);

    let mut line = String::new();
    let bytes_read = reader
        .read_line(&mut line)
        .await
        .context("Failed to read control request")?;
    if bytes_read == 0 {
        tracing::debug!("Control connection closed without data");
        return Ok(());
    }

    let line = line.trim();
    tracing::debug!("Received control request: {}", line);

    let response = match serde_json::from_str::<IpcRequest>(line) {
        Ok(request) => handler(request).await,
        Err(e) => {
            tracing::warn!("Failed to parse control request: {}", e);
            IpcResponse::Error {
                message: format!("Invalid request: {}", e),
            }
        }
    };

    let response_json =
        serde_json::to_string(&response).context("Failed to serialize control response")?;
    tracing::debug!("Sending control response: {}", response_json);

    writer
        .write_all(response_json.as_bytes())
        .await
        .context("Failed to write control response")?;
    writer.write_all(b"\n").await.context("Failed to write newline")?;
    writer.flush().await.context("Failed to flush control response")?;

    Ok(())
}

/// Apply a request to the grabber.
pub async fn dispatch<D: HidDevice>(
    handle: &DeviceGrabberHandle<D>,
    request: IpcRequest,
) -> IpcResponse {
    match request {
        IpcRequest::Grab => {
            handle.grab_devices();
            success("grab requested")
        }
        IpcRequest::Ungrab => {
            handle.ungrab_devices();
            success("ungrab requested")
        }
        IpcRequest::ConnectAck => {
            handle.post_connect_ack();
            IpcResponse::Success { message: None }
        }
        IpcRequest::AddSimpleModification { from, to } => {
            let parsed = from
                .parse::<KeyCode>()
                .and_then(|from| to.parse::<KeyCode>().map(|to| (from, to)));
            match parsed {
                Ok((from_key, to_key)) => {
                    handle.add_simple_modification(from_key, to_key);
                    tracing::info!("Simple modification {} -> {}", from_key, to_key);
                    success(format!("{} -> {}", from_key, to_key))
                }
                Err(message) => IpcResponse::Error { message },
            }
        }
        IpcRequest::ClearSimpleModifications => {
            handle.clear_simple_modifications();
            tracing::info!("Cleared simple modifications");
            IpcResponse::Success { message: None }
        }
        IpcRequest::SetCapsLockLed { on } => {
            handle.set_caps_lock_led_state(LedState::from(on));
            IpcResponse::Success { message: None }
        }
        IpcRequest::Status => match handle.status().await {
            Ok(status) => IpcResponse::Status {
                grabbed: status.grabbed,
                available: status.available,
                retry_count: status.retry_count,
                simple_modifications: handle
                    .simple_modifications()
                    .snapshot()
                    .into_iter()
                    .map(|(from, to)| SimpleModificationEntry {
                        from: from.to_string(),
                        to: to.to_string(),
                    })
                    .collect(),
                devices: status.devices,
            },
            Err(e) => IpcResponse::Error {
                message: e.to_string(),
            },
        },
    }
}

fn success(message: impl Into<String>) -> IpcResponse {
    IpcResponse::Success {
        message: Some(message.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use super::*;
    use crate::grabber::GrabberOptions;
    use crate::simple_modifications::SimpleModifications;
    use crate::testing::{fake_clients, FakeDevice};

    fn spawn_grabber() -> DeviceGrabberHandle<FakeDevice> {
        let (clients, _) = fake_clients();
        let (handle, _task) = DeviceGrabberHandle::spawn(
            clients,
            GrabberOptions::default(),
            SimpleModifications::new(),
        );
        handle
    }

    async fn round_trip(socket_path: &Path, payload: &[u8]) -> IpcResponse {
        let mut client = UnixStream::connect(socket_path).await.unwrap();
        client.write_all(payload).await.unwrap();
        client.write_all(b"\n").await.unwrap();
        client.flush().await.unwrap();

        let (reader, _writer) = client.split();
        let mut reader = BufReader::new(reader);
        let mut response_line = String::new();
        reader.read_line(&mut response_line).await.unwrap();
        serde_json::from_str(response_line.trim()).unwrap()
    }

    // ========================================================================
    // Message Format Tests
    // ========================================================================

    #[test]
    fn test_request_wire_format() {
        let request = IpcRequest::AddSimpleModification {
            from: "caps_lock".to_string(),
            to: "escape".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"type":"add_simple_modification","from":"caps_lock","to":"escape"}"#
        );
        assert_eq!(
            serde_json::from_str::<IpcRequest>(r#"{"type":"set_caps_lock_led","on":true}"#)
                .unwrap(),
            IpcRequest::SetCapsLockLed { on: true }
        );
        assert_eq!(
            serde_json::from_str::<IpcRequest>(r#"{"type":"connect_ack"}"#).unwrap(),
            IpcRequest::ConnectAck
        );
    }

    #[test]
    fn test_success_without_message_omits_field() {
        let json = serde_json::to_string(&IpcResponse::Success { message: None }).unwrap();
        assert_eq!(json, r#"{"type":"success"}"#);
    }

    // ========================================================================
    // Dispatch Tests
    // ========================================================================

    #[tokio::test]
    async fn test_dispatch_add_simple_modification() {
        let handle = spawn_grabber();
        let response = dispatch(
            &handle,
            IpcRequest::AddSimpleModification {
                from: "caps_lock".to_string(),
                to: "left_control".to_string(),
            },
        )
        .await;

        assert!(matches!(response, IpcResponse::Success { .. }));
        assert_eq!(
            handle.simple_modifications().get(KeyCode::CAPS_LOCK),
            Some(KeyCode::LEFT_CONTROL)
        );
    }

    #[tokio::test]
    async fn test_dispatch_rejects_unknown_key() {
        let handle = spawn_grabber();
        let response = dispatch(
            &handle,
            IpcRequest::AddSimpleModification {
                from: "caps_lock".to_string(),
                to: "hyperdrive".to_string(),
            },
        )
        .await;

        match response {
            IpcResponse::Error { message } => assert!(message.contains("hyperdrive")),
            other => panic!("Expected Error response, got {:?}", other),
        }
        assert!(handle.simple_modifications().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_status_after_grab() {
        let handle = spawn_grabber();
        handle.device_arrived(FakeDevice::new(4).0);
        handle.add_simple_modification(KeyCode::CAPS_LOCK, KeyCode::ESCAPE);

        dispatch(&handle, IpcRequest::Grab).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        match dispatch(&handle, IpcRequest::Status).await {
            IpcResponse::Status {
                grabbed,
                available,
                simple_modifications,
                devices,
                ..
            } => {
                assert!(grabbed);
                assert!(available);
                assert_eq!(devices.len(), 1);
                assert_eq!(
                    simple_modifications,
                    vec![SimpleModificationEntry {
                        from: "caps_lock".to_string(),
                        to: "escape".to_string(),
                    }]
                );
            }
            other => panic!("Expected Status response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatch_clear_simple_modifications() {
        let handle = spawn_grabber();
        handle.add_simple_modification(KeyCode::A, KeyCode::ESCAPE);
        dispatch(&handle, IpcRequest::ClearSimpleModifications).await;
        assert!(handle.simple_modifications().is_empty());
    }

    // ========================================================================
    // Socket Tests
    // ========================================================================

    #[tokio::test]
    async fn test_server_removes_stale_socket_and_cleans_up() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join(SOCKET_NAME);
        std::fs::write(&socket_path, b"stale").unwrap();

        let server = IpcServer::bind(socket_path.clone()).unwrap();
        assert!(socket_path.exists());

        drop(server);
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_serve_answers_requests() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join(SOCKET_NAME);
        let server = IpcServer::bind(socket_path.clone()).unwrap();

        let handle = spawn_grabber();
        tokio::spawn(server.serve(handle.clone()));

        let response = round_trip(&socket_path, br#"{"type":"connect_ack"}"#).await;
        assert_eq!(response, IpcResponse::Success { message: None });

        let response = round_trip(&socket_path, br#"{"type":"status"}"#).await;
        assert!(matches!(response, IpcResponse::Status { grabbed: false, .. }));
    }

    #[tokio::test]
    async fn test_invalid_json_gets_error_response() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join(SOCKET_NAME);
        let server = IpcServer::bind(socket_path.clone()).unwrap();

        let handler_task = tokio::spawn(async move {
            let stream = server.accept().await.unwrap();
            handle_ipc_connection(stream, |_request| async {
                IpcResponse::Success { message: None }
            })
            .await
            .unwrap();
        });

        let response = round_trip(&socket_path, b"{ invalid json garbage }").await;
        match response {
            IpcResponse::Error { message } => assert!(message.contains("Invalid request")),
            other => panic!("Expected Error response, got {:?}", other),
        }

        handler_task.await.unwrap();
    }

    #[test]
    fn test_connection_to_missing_socket_fails() {
        use std::os::unix::net::UnixStream;

        let temp_dir = TempDir::new().unwrap();
        let result = UnixStream::connect(temp_dir.path().join(SOCKET_NAME));
        assert_eq!(result.unwrap_err().kind(), std::io::ErrorKind::NotFound);
    }
}
