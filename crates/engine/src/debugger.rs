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

//! Protocol-level debugger wrapper
//!
//! [`Debugger`] sits on top of a [`Transport`] and exposes the `Debugger` / `DOMDebugger`
//! operations the BDHS orchestrator needs. It also keeps two caches scoped to the wrapper:
//! the table of parsed scripts (with lazily fetched sources) and the set of blackbox patterns
//! built from vendor script URLs.
//!
//! Handlers for `paused`, `resumed` and `scriptParsed` are registered with [`Debugger::on`]
//! before [`Debugger::enable`]; registration while enabled is rejected.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use dashmap::DashMap;
use heapscope_common::{types::Breakpoint, DEFAULT_VENDOR_PATTERNS};
use itertools::Itertools;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, trace, warn};

use crate::{
    result_field, EventSink, HeapscopeError, ProtocolEvent, RemoteObject, Result,
    ScriptParsedEvent, SubscriptionId, Transport,
};

/// Debugger events a handler can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebuggerEvent {
    /// `Debugger.paused`
    Paused,
    /// `Debugger.resumed`
    Resumed,
    /// `Debugger.scriptParsed`, delivered after the script table is updated
    ScriptParsed,
}

impl DebuggerEvent {
    /// Protocol name of the event.
    pub fn method(self) -> &'static str {
        match self {
            Self::Paused => "Debugger.paused",
            Self::Resumed => "Debugger.resumed",
            Self::ScriptParsed => "Debugger.scriptParsed",
        }
    }
}

/// A script reported by `Debugger.scriptParsed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedScript {
    /// Script identifier
    pub script_id: String,
    /// Script URL, empty for inline code
    pub url: String,
    /// Source text, once fetched
    pub source: Option<String>,
}

#[derive(Debug, Default)]
struct Registration {
    handlers: HashMap<DebuggerEvent, EventSink>,
    subscriptions: Vec<SubscriptionId>,
    script_consumer: Option<JoinHandle<()>>,
}

/// Debugger operations over a transport.
#[derive(Debug)]
pub struct Debugger<T: Transport> {
    transport: Arc<T>,
    enabled: AtomicBool,
    registration: Mutex<Registration>,
    scripts: Arc<DashMap<String, ParsedScript>>,
    blackbox: Arc<Blackbox>,
}

impl<T: Transport> Debugger<T> {
    /// Creates a wrapper that blackboxes the default vendor libraries.
    pub fn new(transport: Arc<T>) -> Self {
        let vendors = DEFAULT_VENDOR_PATTERNS.iter().map(|p| p.to_string()).collect();
        Self::with_vendor_patterns(transport, vendors)
    }

    /// Creates a wrapper that blackboxes scripts whose URL contains one of `vendor_patterns`.
    pub fn with_vendor_patterns(transport: Arc<T>, vendor_patterns: Vec<String>) -> Self {
        Self {
            transport,
            enabled: AtomicBool::new(false),
            registration: Mutex::new(Registration::default()),
            scripts: Arc::new(DashMap::new()),
            blackbox: Arc::new(Blackbox::new(vendor_patterns)),
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Whether the debugger domain is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Registers `sink` for `event`, replacing any previous handler.
    pub fn on(&self, event: DebuggerEvent, sink: EventSink) -> Result<()> {
        if self.is_enabled() {
            return Err(HeapscopeError::config("cannot add event handlers while the debugger is enabled"));
        }
        self.registration.lock().handlers.insert(event, sink);
        Ok(())
    }

    /// Removes the handler for `event`.
    pub fn off(&self, event: DebuggerEvent) -> Result<()> {
        if self.is_enabled() {
            return Err(HeapscopeError::config("cannot remove event handlers while the debugger is enabled"));
        }
        self.registration.lock().handlers.remove(&event);
        Ok(())
    }

    /// Subscribes the registered handlers and enables the debugger domain. Idempotent.
    pub async fn enable(&self) -> Result<()> {
        if self.enabled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        {
            let mut registration = self.registration.lock();
            let mut subscriptions = Vec::new();
            for event in [DebuggerEvent::Paused, DebuggerEvent::Resumed] {
                if let Some(sink) = registration.handlers.get(&event) {
                    subscriptions.push(self.transport.subscribe(event.method(), sink.clone()));
                }
            }

            let (tx, rx) = mpsc::unbounded_channel();
            subscriptions.push(self.transport.subscribe(DebuggerEvent::ScriptParsed.method(), tx));
            let forward = registration.handlers.get(&DebuggerEvent::ScriptParsed).cloned();
            registration.script_consumer = Some(tokio::spawn(consume_parsed_scripts(
                self.transport.clone(),
                self.scripts.clone(),
                self.blackbox.clone(),
                rx,
                forward,
            )));
            registration.subscriptions = subscriptions;
        }

        if let Err(e) = self.transport.send("Debugger.enable", json!({})).await {
            self.release_subscriptions();
            self.enabled.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        debug!("Debugger enabled");
        Ok(())
    }

    /// Removes every subscription and disables the debugger domain.
    pub async fn disable(&self) -> Result<()> {
        self.release_subscriptions();
        let result = self.transport.send("Debugger.disable", json!({})).await;
        self.enabled.store(false, Ordering::SeqCst);
        result?;
        debug!("Debugger disabled");
        Ok(())
    }

    fn release_subscriptions(&self) {
        let mut registration = self.registration.lock();
        for id in registration.subscriptions.drain(..) {
            self.transport.unsubscribe(id);
        }
        if let Some(consumer) = registration.script_consumer.take() {
            consumer.abort();
        }
    }

    /// Resumes execution.
    pub async fn resume(&self) -> Result<()> {
        self.command("Debugger.resume", json!({})).await
    }

    /// Enables the debugger and requests a pause.
    pub async fn pause(&self) -> Result<()> {
        self.enable().await?;
        self.command("Debugger.pause", json!({})).await
    }

    /// Steps into the next call.
    pub async fn step_into(&self) -> Result<()> {
        self.command("Debugger.stepInto", json!({})).await
    }

    /// Steps over the current statement.
    pub async fn step_over(&self) -> Result<()> {
        self.command("Debugger.stepOver", json!({})).await
    }

    /// Runs until the current function returns.
    pub async fn step_out(&self) -> Result<()> {
        self.command("Debugger.stepOut", json!({})).await
    }

    /// Sets a source breakpoint and returns its id.
    pub async fn set_breakpoint(&self, breakpoint: &Breakpoint) -> Result<String> {
        let mut params = json!({ "location": breakpoint.location });
        if let Some(condition) = &breakpoint.condition {
            params["condition"] = Value::String(condition.clone());
        }
        let result = self.transport.send("Debugger.setBreakpoint", params).await?;
        Ok(result_field("Debugger.setBreakpoint", &result, "breakpointId")?)
    }

    /// Breaks on the next call of the function behind `object_id` and returns the breakpoint id.
    pub async fn set_breakpoint_on_function_call(&self, object_id: &str) -> Result<String> {
        let result = self
            .transport
            .send("Debugger.setBreakpointOnFunctionCall", json!({ "objectId": object_id }))
            .await?;
        Ok(result_field("Debugger.setBreakpointOnFunctionCall", &result, "breakpointId")?)
    }

    /// Removes a breakpoint.
    pub async fn remove_breakpoint(&self, breakpoint_id: &str) -> Result<()> {
        self.command("Debugger.removeBreakpoint", json!({ "breakpointId": breakpoint_id })).await
    }

    /// Installs or removes the capture breakpoint on every `click` listener.
    pub async fn set_dom_click_breakpoint(&self, enabled: bool) -> Result<()> {
        self.enable().await?;
        let method = if enabled {
            "DOMDebugger.setEventListenerBreakpoint"
        } else {
            "DOMDebugger.removeEventListenerBreakpoint"
        };
        self.command(method, json!({ "eventName": "click", "targetName": "*" })).await
    }

    /// Evaluates `expression` in the scope of a paused frame, returning a remote reference.
    pub async fn evaluate_on_call_frame(&self, call_frame_id: &str, expression: &str) -> Result<RemoteObject> {
        let result = self
            .transport
            .send(
                "Debugger.evaluateOnCallFrame",
                json!({ "callFrameId": call_frame_id, "expression": expression, "returnByValue": false }),
            )
            .await?;
        Ok(result_field("Debugger.evaluateOnCallFrame", &result, "result")?)
    }

    /// Calls `declaration` with `this` bound to the remote object.
    pub async fn call_function_on(
        &self,
        object_id: &str,
        declaration: &str,
        return_by_value: bool,
    ) -> Result<RemoteObject> {
        let result = self
            .transport
            .send(
                "Runtime.callFunctionOn",
                json!({
                    "objectId": object_id,
                    "functionDeclaration": declaration,
                    "returnByValue": return_by_value,
                }),
            )
            .await?;
        Ok(result_field("Runtime.callFunctionOn", &result, "result")?)
    }

    /// URL of a parsed script.
    pub fn script_url(&self, script_id: &str) -> Option<String> {
        self.scripts.get(script_id).map(|s| s.url.clone())
    }

    /// Source of a script, fetched once and cached.
    pub async fn script_source(&self, script_id: &str) -> Result<String> {
        let cached = self.scripts.get(script_id).and_then(|s| s.source.clone());
        if let Some(source) = cached {
            return Ok(source);
        }

        let result = self.transport.send("Debugger.getScriptSource", json!({ "scriptId": script_id })).await?;
        let source: String = result_field("Debugger.getScriptSource", &result, "scriptSource")?;
        self.scripts
            .entry(script_id.to_string())
            .or_insert_with(|| ParsedScript {
                script_id: script_id.to_string(),
                url: String::new(),
                source: None,
            })
            .source = Some(source.clone());
        Ok(source)
    }

    /// Every script seen since the wrapper was created.
    pub fn parsed_scripts(&self) -> Vec<ParsedScript> {
        self.scripts
            .iter()
            .map(|s| s.value().clone())
            .sorted_by(|a, b| a.script_id.cmp(&b.script_id))
            .collect()
    }

    /// Blackbox patterns submitted so far, in insertion order.
    pub fn blackbox_patterns(&self) -> Vec<String> {
        self.blackbox.patterns.lock().clone()
    }

    async fn command(&self, method: &str, params: Value) -> Result<()> {
        self.transport.send(method, params).await?;
        Ok(())
    }
}

#[derive(Debug)]
struct Blackbox {
    vendors: Vec<String>,
    patterns: Mutex<Vec<String>>,
}

impl Blackbox {
    fn new(vendors: Vec<String>) -> Self {
        Self {
            vendors: vendors.into_iter().map(|v| v.to_lowercase()).filter(|v| !v.is_empty()).collect(),
            patterns: Mutex::new(Vec::new()),
        }
    }

    fn is_vendor(&self, url: &str) -> bool {
        if url.is_empty() || url.starts_with("eval") || url.starts_with("extensions::") {
            return false;
        }
        let lower = url.to_lowercase();
        self.vendors.iter().any(|v| lower.contains(v.as_str()))
    }

    /// Adds the anchored pattern for `url`; returns the full set when it grew.
    fn admit(&self, url: &str) -> Option<Vec<String>> {
        if !self.is_vendor(url) {
            return None;
        }
        let pattern = format!("^{}$", regex::escape(url));
        let mut patterns = self.patterns.lock();
        if patterns.contains(&pattern) {
            return None;
        }
        patterns.push(pattern);
        Some(patterns.clone())
    }
}

async fn consume_parsed_scripts<T: Transport>(
    transport: Arc<T>,
    scripts: Arc<DashMap<String, ParsedScript>>,
    blackbox: Arc<Blackbox>,
    mut rx: mpsc::UnboundedReceiver<ProtocolEvent>,
    forward: Option<EventSink>,
) {
    while let Some(event) = rx.recv().await {
        let parsed: ScriptParsedEvent = match serde_json::from_value(event.params.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Ignoring malformed scriptParsed event: {e}");
                continue;
            }
        };
        trace!(script_id = %parsed.script_id, url = %parsed.url, "Script parsed");

        scripts
            .entry(parsed.script_id.clone())
            .and_modify(|s| s.url = parsed.url.clone())
            .or_insert_with(|| ParsedScript {
                script_id: parsed.script_id.clone(),
                url: parsed.url.clone(),
                source: None,
            });

        if let Some(patterns) = blackbox.admit(&parsed.url) {
            debug!(url = %parsed.url, total = patterns.len(), "Blackboxing vendor script");
            if let Err(e) = transport.send("Debugger.setBlackboxPatterns", json!({ "patterns": patterns })).await {
                warn!("Failed to update blackbox patterns: {e}");
            }
        }

        if let Some(forward) = &forward {
            let _ = forward.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_detection() {
        let blackbox = Blackbox::new(vec!["React".to_string(), "zone.js".to_string()]);
        assert!(blackbox.is_vendor("https://cdn.test/react.production.min.js"));
        assert!(blackbox.is_vendor("https://app.test/ZONE.JS"));
        assert!(!blackbox.is_vendor("https://app.test/main.js"));
        assert!(!blackbox.is_vendor(""));
        assert!(!blackbox.is_vendor("eval at react"));
        assert!(!blackbox.is_vendor("extensions::react"));
    }

    #[test]
    fn test_admit_escapes_and_dedups() {
        let blackbox = Blackbox::new(vec!["vue".to_string()]);
        let patterns = blackbox.admit("https://cdn.test/vue@3.4/vue.js?v=1").unwrap();
        assert_eq!(patterns, vec![r"^https://cdn\.test/vue@3\.4/vue\.js\?v=1$".to_string()]);
        assert!(blackbox.admit("https://cdn.test/vue@3.4/vue.js?v=1").is_none());

        let grown = blackbox.admit("https://cdn.test/vue-router.js").unwrap();
        assert_eq!(grown.len(), 2);
    }

    #[test]
    fn test_event_methods() {
        assert_eq!(DebuggerEvent::Paused.method(), "Debugger.paused");
        assert_eq!(DebuggerEvent::ScriptParsed.method(), "Debugger.scriptParsed");
    }
}
