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

//! Scripted in-memory debuggee.
//!
//! Used by the engine's own tests and available to downstream crates. Every command is
//! recorded; replies come from per-method scripts:
//! - one-shot replies queued with [`MockTransport::respond_once`], consumed first
//! - failures set with [`MockTransport::fail`]
//! - a standing reply set with [`MockTransport::respond`]
//! - `{}` otherwise
//!
//! Events queued with [`MockTransport::react`] are emitted when the method is called, before
//! its reply is returned, the same order a real debuggee produces.

use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use serde_json::{json, Value};

use super::{EventRouter, EventSink, SubscriptionId, Transport};
use crate::ProtocolError;

/// A command recorded by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentCommand {
    /// Command method
    pub method: String,
    /// Command parameters
    pub params: Value,
}

#[derive(Debug, Default)]
struct Script {
    once: HashMap<String, VecDeque<Result<Value, (i64, String)>>>,
    standing: HashMap<String, Value>,
    failures: HashMap<String, (i64, String)>,
    reactions: HashMap<String, VecDeque<Vec<(String, Value)>>>,
}

/// In-memory [`Transport`] driven by a test script.
#[derive(Debug, Default)]
pub struct MockTransport {
    sent: Mutex<Vec<SentCommand>>,
    script: Mutex<Script>,
    router: EventRouter,
    detached: AtomicBool,
}

impl MockTransport {
    /// Creates a mock that answers every command with `{}`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every call of `method` with `result`.
    pub fn respond(&self, method: &str, result: Value) -> &Self {
        self.script.lock().standing.insert(method.to_string(), result);
        self
    }

    /// Answers the next call of `method` with `result`.
    pub fn respond_once(&self, method: &str, result: Value) -> &Self {
        self.script.lock().once.entry(method.to_string()).or_default().push_back(Ok(result));
        self
    }

    /// Fails the next call of `method` with a command error.
    pub fn fail_once(&self, method: &str, code: i64, message: &str) -> &Self {
        self.script
            .lock()
            .once
            .entry(method.to_string())
            .or_default()
            .push_back(Err((code, message.to_string())));
        self
    }

    /// Fails every call of `method` with a command error.
    pub fn fail(&self, method: &str, code: i64, message: &str) -> &Self {
        self.script.lock().failures.insert(method.to_string(), (code, message.to_string()));
        self
    }

    /// Emits `events` during the next call of `method`.
    pub fn react(&self, method: &str, events: Vec<(&str, Value)>) -> &Self {
        let events = events.into_iter().map(|(name, params)| (name.to_string(), params)).collect();
        self.script.lock().reactions.entry(method.to_string()).or_default().push_back(events);
        self
    }

    /// Pushes an event to the subscribers right away.
    pub fn emit(&self, event: &str, params: Value) {
        self.router.dispatch(event, params);
    }

    /// All commands sent so far.
    pub fn sent(&self) -> Vec<SentCommand> {
        self.sent.lock().clone()
    }

    /// Methods of all commands sent so far, in order.
    pub fn sent_methods(&self) -> Vec<String> {
        self.sent.lock().iter().map(|c| c.method.clone()).collect()
    }

    /// Commands with the given method.
    pub fn sent_with(&self, method: &str) -> Vec<SentCommand> {
        self.sent.lock().iter().filter(|c| c.method == method).cloned().collect()
    }

    /// Number of live subscriptions to `event`.
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.router.subscriber_count(event)
    }

    /// Whether [`Transport::detach`] was called.
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    fn reply(&self, method: &str, params: Value) -> Result<Value, ProtocolError> {
        self.sent.lock().push(SentCommand { method: method.to_string(), params });

        if self.is_detached() {
            return Err(ProtocolError::Disconnected);
        }

        let (reactions, reply) = {
            let mut script = self.script.lock();
            let reactions =
                script.reactions.get_mut(method).and_then(VecDeque::pop_front).unwrap_or_default();
            let reply = match script.once.get_mut(method).and_then(VecDeque::pop_front) {
                Some(reply) => reply,
                None => match script.failures.get(method) {
                    Some(failure) => Err(failure.clone()),
                    None => Ok(script.standing.get(method).cloned().unwrap_or_else(|| json!({}))),
                },
            };
            (reactions, reply)
        };

        for (event, params) in reactions {
            self.router.dispatch(&event, params);
        }

        reply.map_err(|(code, message)| ProtocolError::Command {
            method: method.to_string(),
            code,
            message,
        })
    }
}

impl Transport for MockTransport {
    async fn send(&self, method: &str, params: Value) -> Result<Value, ProtocolError> {
        self.reply(method, params)
    }

    fn subscribe(&self, event: &str, sink: EventSink) -> SubscriptionId {
        self.router.subscribe(event, sink)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.router.unsubscribe(id);
    }

    async fn detach(&self) -> Result<(), ProtocolError> {
        self.detached.store(true, Ordering::SeqCst);
        self.router.clear();
        Ok(())
    }
}
