// CDP connection management
//
// Handles the WebSocket handshake, command id allocation, and event loop startup

use crate::discovery::TargetInfo;
use crate::eventloop::{spawn_event_loop, EventLoopHandle};
use crate::protocol::*;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{connect_async, WebSocketStream};
use tracing::{debug, info};

/// Default wait for a single command's reply
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Tuning knobs for a connection
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Used by `send` and `evaluate`; the `_with_timeout` variants override it per call
    pub command_timeout: Duration,
    pub request_buffer: usize,
    /// Events beyond this many unread ones are dropped
    pub event_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            request_buffer: 32,
            event_buffer: 256,
        }
    }
}

impl ClientConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

/// A live session with one inspectable target. Clones share the socket.
#[derive(Debug, Clone)]
pub struct CdpConnection {
    event_loop: EventLoopHandle,
    next_id: Arc<AtomicU64>,
    config: ClientConfig,
}

impl CdpConnection {
    /// Connect to a target's `webSocketDebuggerUrl`
    pub async fn connect(ws_url: &str, config: ClientConfig) -> CdpResult<Self> {
        info!("Connecting to CDP at {}", ws_url);

        let (stream, response) = connect_async(ws_url).await?;
        debug!("WebSocket handshake status {}", response.status());

        info!("CDP connection established");
        Ok(Self::from_stream(stream, config))
    }

    /// Connect to a target returned by discovery
    pub async fn connect_to_target(target: &TargetInfo, config: ClientConfig) -> CdpResult<Self> {
        let ws_url = target.web_socket_debugger_url.as_deref().ok_or_else(|| {
            CdpError::Discovery(format!(
                "Target {} ({}) exposes no debugger URL",
                target.id, target.title
            ))
        })?;

        Self::connect(ws_url, config).await
    }

    /// Wrap an already established WebSocket
    pub fn from_stream<S>(stream: WebSocketStream<S>, config: ClientConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let event_loop = spawn_event_loop(stream, config.request_buffer, config.event_buffer);

        Self {
            event_loop,
            next_id: Arc::new(AtomicU64::new(1)),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send a command and wait for its reply using the configured timeout
    pub async fn send<P: Serialize>(&self, method: &str, params: P) -> CdpResult<Reply> {
        self.send_with_timeout(method, params, self.config.command_timeout)
            .await
    }

    /// Send a command and wait at most `timeout` for its reply
    pub async fn send_with_timeout<P: Serialize>(
        &self,
        method: &str,
        params: P,
        timeout: Duration,
    ) -> CdpResult<Reply> {
        let params = serde_json::to_value(params)?;
        let command = Command::new(self.next_id(), method, params);
        let frame = command.encode()?;

        debug!("Sending command id={} method={}", command.id, method);
        self.event_loop
            .send_command(command.id, frame, timeout)
            .await
    }

    /// Try to receive an event (non-blocking)
    pub async fn try_recv_event(&self) -> Option<Event> {
        self.event_loop.try_recv_event().await
    }

    /// Wait for the next event (blocking)
    pub async fn recv_event(&self) -> Option<Event> {
        self.event_loop.recv_event().await
    }

    /// Commands written but not yet answered or expired
    pub async fn pending_requests(&self) -> CdpResult<usize> {
        self.event_loop.pending_count().await
    }

    /// Generate next command ID
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}
