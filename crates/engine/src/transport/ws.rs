// Heapscope - Heap Origin Tracer
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Chrome DevTools Protocol client over WebSocket.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use super::{
    protocol::{IncomingFrame, RequestFrame},
    EventRouter, EventSink, SubscriptionId, Transport,
};
use crate::ProtocolError;

type Pending = Arc<DashMap<u64, (String, oneshot::Sender<Result<Value, ProtocolError>>)>>;
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport to a single debuggee target.
///
/// One background task owns the socket. Requests are correlated with their responses by id;
/// events are fanned out to subscribers before any response that follows them is resolved.
#[derive(Debug)]
pub struct WsTransport {
    url: String,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
    router: Arc<EventRouter>,
    next_id: AtomicU64,
    connected: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WsTransport {
    /// Connects to a target's `webSocketDebuggerUrl`.
    pub async fn attach(url: &str) -> Result<Self, ProtocolError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| ProtocolError::Transport(format!("failed to connect to {url}: {e}")))?;
        debug!(url, "Attached to debuggee");

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let pending: Pending = Arc::new(DashMap::new());
        let router = Arc::new(EventRouter::default());
        let connected = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(connection_loop(
            stream,
            outgoing_rx,
            pending.clone(),
            router.clone(),
            connected.clone(),
        ));

        Ok(Self {
            url: url.to_string(),
            outgoing,
            pending,
            router,
            next_id: AtomicU64::new(1),
            connected,
            task: Mutex::new(Some(task)),
        })
    }

    /// URL this transport is attached to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the socket is still open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Transport for WsTransport {
    async fn send(&self, method: &str, params: Value) -> Result<Value, ProtocolError> {
        if !self.is_connected() {
            return Err(ProtocolError::Disconnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_string(&RequestFrame { id, method, params: &params })
            .map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, (method.to_string(), tx));
        trace!(id, method, "Sending command");

        if self.outgoing.send(Message::Text(frame.into())).is_err() {
            self.pending.remove(&id);
            return Err(ProtocolError::Disconnected);
        }

        rx.await.map_err(|_| ProtocolError::Disconnected)?
    }

    fn subscribe(&self, event: &str, sink: EventSink) -> SubscriptionId {
        self.router.subscribe(event, sink)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.router.unsubscribe(id);
    }

    async fn detach(&self) -> Result<(), ProtocolError> {
        // A closed channel means the loop is already gone.
        let _ = self.outgoing.send(Message::Close(None));

        let task = self.task.lock().take();
        if let Some(task) = task {
            task.await.map_err(|e| ProtocolError::Transport(e.to_string()))?;
        }
        self.router.clear();
        debug!(url = %self.url, "Detached from debuggee");
        Ok(())
    }
}

async fn connection_loop(
    stream: WsStream,
    mut outgoing_rx: mpsc::UnboundedReceiver<Message>,
    pending: Pending,
    router: Arc<EventRouter>,
    connected: Arc<AtomicBool>,
) {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => handle_frame(text.as_str(), &pending, &router),
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => handle_frame(text, &pending, &router),
                        Err(e) => warn!("Dropping non UTF-8 binary frame: {e}"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if write.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error: {e}");
                        break;
                    }
                }
            }

            outgoing = outgoing_rx.recv() => {
                let Some(message) = outgoing else { break };
                let closing = matches!(message, Message::Close(_));
                if write.send(message).await.is_err() || closing {
                    break;
                }
            }
        }
    }

    // Refuse new requests before failing the in-flight ones.
    outgoing_rx.close();
    connected.store(false, Ordering::SeqCst);
    pending.clear();
    debug!("Connection loop terminated");
}

fn handle_frame(text: &str, pending: &Pending, router: &EventRouter) {
    let frame: IncomingFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Dropping malformed frame: {e}");
            return;
        }
    };

    if let Some(id) = frame.id {
        let Some((_, (method, tx))) = pending.remove(&id) else {
            trace!(id, "Response without pending request");
            return;
        };
        let reply = match frame.error {
            Some(error) => {
                Err(ProtocolError::Command { method, code: error.code, message: error.message })
            }
            None => Ok(frame.result.unwrap_or(Value::Null)),
        };
        // The caller may have given up waiting.
        let _ = tx.send(reply);
    } else if let Some(method) = frame.method {
        router.dispatch(&method, frame.params.unwrap_or(Value::Null));
    }
}
