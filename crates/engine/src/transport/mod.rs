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

//! Transport capability towards a debuggee.
//!
//! Everything above this module talks to the debuggee through the four operations of
//! [`Transport`]: send a command, subscribe to an event, unsubscribe and detach. Events are
//! delivered in arrival order per subscription through an unbounded channel.
//!
//! Two implementations ship with the engine:
//! - [`WsTransport`]: a Chrome DevTools Protocol client over WebSocket
//! - [`MockTransport`]: a scripted in-memory debuggee for tests

use std::{
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

use crate::ProtocolError;

mod discovery;
mod mock;
mod protocol;
mod ws;

pub use discovery::*;
pub use mock::*;
pub use protocol::*;
pub use ws::*;

/// An event pushed by the debuggee.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolEvent {
    /// Event name, e.g. `Debugger.paused`
    pub method: String,
    /// Event payload
    pub params: Value,
}

/// Receiving end of a subscription.
pub type EventSink = mpsc::UnboundedSender<ProtocolEvent>;

/// Handle returned by [`Transport::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// The capability the engine needs from a debuggee connection.
pub trait Transport: Send + Sync + 'static {
    /// Sends a command and resolves with its result object.
    fn send(
        &self,
        method: &str,
        params: Value,
    ) -> impl Future<Output = Result<Value, ProtocolError>> + Send;

    /// Delivers every future `event` to `sink` until unsubscribed.
    fn subscribe(&self, event: &str, sink: EventSink) -> SubscriptionId;

    /// Stops a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Closes the connection. Pending and later commands fail with
    /// [`ProtocolError::Disconnected`].
    fn detach(&self) -> impl Future<Output = Result<(), ProtocolError>> + Send;
}

/// Subscription table shared by the transport implementations.
#[derive(Debug, Default)]
pub(crate) struct EventRouter {
    next_id: AtomicU64,
    subscribers: DashMap<SubscriptionId, (String, EventSink)>,
}

impl EventRouter {
    pub(crate) fn subscribe(&self, event: &str, sink: EventSink) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.insert(id, (event.to_string(), sink));
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.remove(&id);
    }

    pub(crate) fn subscriber_count(&self, event: &str) -> usize {
        self.subscribers.iter().filter(|entry| entry.value().0 == event).count()
    }

    pub(crate) fn clear(&self) {
        self.subscribers.clear();
    }

    /// Fans an event out to its subscribers, dropping the ones whose receiver is gone.
    pub(crate) fn dispatch(&self, method: &str, params: Value) {
        let mut closed = Vec::new();
        for entry in self.subscribers.iter() {
            let (event, sink) = entry.value();
            if event != method {
                continue;
            }
            let event = ProtocolEvent { method: method.to_string(), params: params.clone() };
            if sink.send(event).is_err() {
                closed.push(*entry.key());
            }
        }

        for id in closed {
            trace!(?id, method, "Dropping closed subscription");
            self.subscribers.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_router_dispatches_by_event_name() {
        let router = EventRouter::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (other_tx, mut other_rx) = mpsc::unbounded_channel();
        router.subscribe("Debugger.paused", tx);
        router.subscribe("Debugger.resumed", other_tx);

        router.dispatch("Debugger.paused", json!({ "n": 1 }));
        router.dispatch("Debugger.paused", json!({ "n": 2 }));

        assert_eq!(rx.try_recv().unwrap().params, json!({ "n": 1 }));
        assert_eq!(rx.try_recv().unwrap().params, json!({ "n": 2 }));
        assert!(other_rx.try_recv().is_err());
    }

    #[test]
    fn test_router_unsubscribe_and_closed_sinks() {
        let router = EventRouter::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let (kept_tx, _kept_rx) = mpsc::unbounded_channel();
        router.subscribe("Debugger.paused", tx);
        let kept = router.subscribe("Debugger.paused", kept_tx);
        assert_eq!(router.subscriber_count("Debugger.paused"), 2);

        drop(rx);
        router.dispatch("Debugger.paused", Value::Null);
        assert_eq!(router.subscriber_count("Debugger.paused"), 1);

        router.unsubscribe(kept);
        assert_eq!(router.subscriber_count("Debugger.paused"), 0);
    }
}
