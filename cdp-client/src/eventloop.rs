// CDP Event Loop
//
// Owns the WebSocket and the table of in-flight commands. Every write goes
// through this task, and every inbound frame is routed from here to the
// waiter whose command id it carries.

use crate::protocol::{CdpError, CdpResult, Event, Frame, Reply};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

/// Give the target this long to take a Close frame on shutdown
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Encoded command waiting to be written
pub struct CommandRequest {
    pub id: u64,
    pub frame: String,
    /// Past this point nobody is waiting, so the write is abandoned
    pub deadline: tokio::time::Instant,
    pub reply_tx: oneshot::Sender<CdpResult<Reply>>,
}

/// Messages accepted by the loop task
pub enum LoopRequest {
    Command(CommandRequest),
    /// The waiter gave up; drop its entry if it is still there
    Expire(u64),
    PendingCount(oneshot::Sender<usize>),
}

/// Bookkeeping for a command that has been written but not yet answered
struct PendingEntry {
    reply_tx: oneshot::Sender<CdpResult<Reply>>,
    created: Instant,
}

/// Handle to the event loop for sending commands and receiving events
#[derive(Clone, Debug)]
pub struct EventLoopHandle {
    request_tx: mpsc::Sender<LoopRequest>,
    event_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Event>>>,
}

impl EventLoopHandle {
    /// Send an encoded command and wait for its reply, at most `timeout`
    pub async fn send_command(
        &self,
        id: u64,
        frame: String,
        timeout: Duration,
    ) -> CdpResult<Reply> {
        let deadline = tokio::time::Instant::now() + timeout;
        let (reply_tx, reply_rx) = oneshot::channel();

        let request = CommandRequest {
            id,
            frame,
            deadline,
            reply_tx,
        };

        // Queueing, writing and waiting all share one window
        let exchange = async {
            if self
                .request_tx
                .send(LoopRequest::Command(request))
                .await
                .is_err()
            {
                return Err(CdpError::ConnectionClosed);
            }

            match reply_rx.await {
                Ok(result) => result,
                Err(_) => Err(CdpError::ConnectionClosed),
            }
        };

        match tokio::time::timeout_at(deadline, exchange).await {
            Ok(result) => result,
            Err(_) => {
                debug!("Command id={} timed out after {:?}", id, timeout);
                // A full queue means the loop is stuck writing; it sweeps
                // abandoned entries itself once it gets going again
                self.request_tx.try_send(LoopRequest::Expire(id)).ok();
                Err(CdpError::Timeout { id, after: timeout })
            }
        }
    }

    /// Number of commands still waiting for a reply
    pub async fn pending_count(&self) -> CdpResult<usize> {
        let (tx, rx) = oneshot::channel();
        self.request_tx
            .send(LoopRequest::PendingCount(tx))
            .await
            .map_err(|_| CdpError::ConnectionClosed)?;
        rx.await.map_err(|_| CdpError::ConnectionClosed)
    }

    /// Try to receive an event (non-blocking)
    pub async fn try_recv_event(&self) -> Option<Event> {
        let mut rx = self.event_rx.lock().await;
        rx.try_recv().ok()
    }

    /// Wait for the next event (blocking)
    pub async fn recv_event(&self) -> Option<Event> {
        let mut rx = self.event_rx.lock().await;
        rx.recv().await
    }
}

/// Start the event loop task
pub fn spawn_event_loop<S>(
    stream: WebSocketStream<S>,
    request_buffer: usize,
    event_buffer: usize,
) -> EventLoopHandle
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (request_tx, request_rx) = mpsc::channel(request_buffer);
    let (event_tx, event_rx) = mpsc::channel(event_buffer);

    let (writer, reader) = stream.split();
    tokio::spawn(event_loop_task(reader, writer, request_rx, event_tx));

    EventLoopHandle {
        request_tx,
        event_rx: Arc::new(tokio::sync::Mutex::new(event_rx)),
    }
}

/// Main event loop task
async fn event_loop_task<S>(
    mut reader: SplitStream<WebSocketStream<S>>,
    mut writer: SplitSink<WebSocketStream<S>, Message>,
    mut request_rx: mpsc::Receiver<LoopRequest>,
    event_tx: mpsc::Sender<Event>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    info!("Event loop started");

    let mut pending: HashMap<u64, PendingEntry> = HashMap::new();
    let mut reader_open = true;

    loop {
        tokio::select! {
            // Handle requests from connection handles
            request = request_rx.recv() => {
                let Some(request) = request else {
                    debug!("All connection handles dropped");
                    break;
                };

                match request {
                    LoopRequest::Command(cmd) => {
                        if !reader_open {
                            cmd.reply_tx.send(Err(CdpError::ConnectionClosed)).ok();
                            continue;
                        }

                        if cmd.reply_tx.is_closed() {
                            debug!("Skipping command id={}, its waiter already gave up", cmd.id);
                            continue;
                        }

                        debug!("Sending command id={}", cmd.id);

                        let write = writer.send(Message::text(cmd.frame));
                        match tokio::time::timeout_at(cmd.deadline, write).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                error!("Failed to write command id={}: {}", cmd.id, e);
                                cmd.reply_tx.send(Err(CdpError::Transport(e.to_string()))).ok();
                                continue;
                            }
                            Err(_) => {
                                warn!("Target stopped reading; command id={} not written in time", cmd.id);
                                continue;
                            }
                        }

                        if pending.contains_key(&cmd.id) {
                            warn!("Command id={} reused while still pending", cmd.id);
                        }
                        pending.insert(
                            cmd.id,
                            PendingEntry {
                                reply_tx: cmd.reply_tx,
                                created: Instant::now(),
                            },
                        );
                        sweep_abandoned(&mut pending);
                    }
                    LoopRequest::Expire(id) => {
                        if let Some(entry) = pending.remove(&id) {
                            debug!(
                                "Dropped expired command id={} after {:?}",
                                id,
                                entry.created.elapsed()
                            );
                        }
                    }
                    LoopRequest::PendingCount(tx) => {
                        sweep_abandoned(&mut pending);
                        tx.send(pending.len()).ok();
                    }
                }
            }

            // Handle incoming frames
            message = reader.next(), if reader_open => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_frame(text.as_str(), &mut pending, &event_tx);
                    }
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => dispatch_frame(text, &mut pending, &event_tx),
                        Err(_) => warn!("Ignoring non UTF-8 binary frame, len={}", data.len()),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        info!("Target closed the connection: {:?}", frame);
                        reader_open = false;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("Failed to read frame: {}", e);
                        reader_open = false;
                    }
                    None => {
                        info!("Connection stream ended");
                        reader_open = false;
                    }
                }

                if !reader_open && !pending.is_empty() {
                    warn!("{} command(s) left to expire after connection loss", pending.len());
                }
            }
        }
    }

    if tokio::time::timeout(CLOSE_GRACE, writer.close()).await.is_err() {
        debug!("Target did not take the Close frame in time");
    }

    info!("Event loop shutting down");
}

/// Drop entries whose waiter timed out but whose Expire never made it in
fn sweep_abandoned(pending: &mut HashMap<u64, PendingEntry>) {
    pending.retain(|id, entry| {
        let alive = !entry.reply_tx.is_closed();
        if !alive {
            debug!(
                "Dropped abandoned command id={} after {:?}",
                id,
                entry.created.elapsed()
            );
        }
        alive
    });
}

/// Route one inbound frame to its waiter, or to the event channel
fn dispatch_frame(
    text: &str,
    pending: &mut HashMap<u64, PendingEntry>,
    event_tx: &mpsc::Sender<Event>,
) {
    match Frame::decode(text) {
        Ok(Frame::Reply(reply)) => {
            let id = reply.id;
            match pending.remove(&id) {
                Some(entry) => {
                    debug!(
                        "Received reply id={} after {:?}",
                        id,
                        entry.created.elapsed()
                    );
                    if entry.reply_tx.send(Ok(reply)).is_err() {
                        debug!("Waiter for id={} already gone", id);
                    }
                }
                None => {
                    debug!("Discarding reply for unknown command id={}", id);
                }
            }
        }
        Ok(Frame::Event(event)) => {
            debug!("Received event {}", event.method);

            match event_tx.try_send(event) {
                Ok(_) => {}
                Err(mpsc::error::TrySendError::Full(event)) => {
                    debug!("Event channel full, dropping {}", event.method);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        Err(e) => {
            warn!("Skipping malformed frame: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> (PendingEntry, oneshot::Receiver<CdpResult<Reply>>) {
        let (reply_tx, reply_rx) = oneshot::channel();
        (
            PendingEntry {
                reply_tx,
                created: Instant::now(),
            },
            reply_rx,
        )
    }

    #[test]
    fn test_dispatch_routes_by_id() {
        let (event_tx, _event_rx) = mpsc::channel(4);
        let mut pending = HashMap::new();
        let (first, mut first_rx) = entry();
        let (second, mut second_rx) = entry();
        pending.insert(1, first);
        pending.insert(2, second);

        dispatch_frame(r#"{"id":2,"result":{"n":"two"}}"#, &mut pending, &event_tx);

        assert!(first_rx.try_recv().is_err());
        let reply = second_rx.try_recv().unwrap().unwrap();
        assert_eq!(reply.id, 2);
        assert_eq!(reply.result()["n"], "two");
        assert_eq!(pending.len(), 1);
        assert!(pending.contains_key(&1));
    }

    #[test]
    fn test_dispatch_unknown_id_leaves_table_alone() {
        let (event_tx, _event_rx) = mpsc::channel(4);
        let mut pending = HashMap::new();
        let (first, mut first_rx) = entry();
        pending.insert(1, first);

        dispatch_frame(r#"{"id":99,"result":{}}"#, &mut pending, &event_tx);
        dispatch_frame("{garbage", &mut pending, &event_tx);

        assert_eq!(pending.len(), 1);
        assert!(first_rx.try_recv().is_err());
    }

    #[test]
    fn test_sweep_drops_only_abandoned_entries() {
        let mut pending = HashMap::new();
        let (live, _live_rx) = entry();
        let (abandoned, abandoned_rx) = entry();
        pending.insert(1, live);
        pending.insert(2, abandoned);
        drop(abandoned_rx);

        sweep_abandoned(&mut pending);

        assert_eq!(pending.len(), 1);
        assert!(pending.contains_key(&1));
    }

    #[test]
    fn test_dispatch_forwards_events() {
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let mut pending = HashMap::new();

        dispatch_frame(
            r#"{"method":"Network.responseReceived","params":{"requestId":"7"}}"#,
            &mut pending,
            &event_tx,
        );

        let event = event_rx.try_recv().unwrap();
        assert_eq!(event.method, "Network.responseReceived");
        assert_eq!(event.params["requestId"], "7");
    }

    #[test]
    fn test_dispatch_drops_events_when_full() {
        let (event_tx, mut event_rx) = mpsc::channel(1);
        let mut pending = HashMap::new();

        dispatch_frame(r#"{"method":"A.one"}"#, &mut pending, &event_tx);
        dispatch_frame(r#"{"method":"A.two"}"#, &mut pending, &event_tx);

        assert_eq!(event_rx.try_recv().unwrap().method, "A.one");
        assert!(event_rx.try_recv().is_err());
    }
}
