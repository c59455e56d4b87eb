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

//! One debugging session per debuggee.
//!
//! A [`Session`] owns the transport, the debugger wrapper, the latest decoded snapshot and the
//! active BDHS run. Snapshots are replaced wholesale by every capture.

use std::sync::Arc;

use futures::FutureExt;
use heapscope_common::Config;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    capture_and_decode, is_identifier, materialize, result_field, BdhsExecutor, BdhsHandle,
    BdhsOptions, BdhsOutcome, BdhsSearch, BdhsSignal, DecodedSnapshot, Debugger, HeapscopeError,
    PropertyDescriptor, ProtocolError, RemoteObject, Result, SearchCriterion, SearchResultItem,
    Transport, WsTransport,
};

/// Size of the captured snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    /// Decoded nodes
    pub node_count: usize,
    /// Entries of the string table
    pub string_count: usize,
}

/// Snapshot search request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSearchRequest {
    /// What to look for
    #[serde(flatten)]
    pub criterion: SearchCriterion,
    /// Result cap; the configured default when absent
    #[serde(default)]
    pub max_results: Option<usize>,
}

/// Snapshot search results.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchReport {
    /// Materialized matches
    pub results: Vec<SearchResultItem>,
    /// Number of matches
    pub total_matches: usize,
}

/// Live-object search request. Empty or absent terms are inactive; any active term matching
/// selects the object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSearchRequest {
    /// Substring of an own property name
    #[serde(default)]
    pub property: Option<String>,
    /// Substring of an own property value
    #[serde(default)]
    pub value: Option<String>,
    /// Substring of the class name
    #[serde(default)]
    pub class_name: Option<String>,
    /// Result cap
    #[serde(default = "default_live_max_results")]
    pub max_results: usize,
}

fn default_live_max_results() -> usize {
    100
}

impl Default for LiveSearchRequest {
    fn default() -> Self {
        Self { property: None, value: None, class_name: None, max_results: default_live_max_results() }
    }
}

/// A live object selected by [`Session::search_live_objects`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveObject {
    /// Own properties, primitives by value and objects by description
    pub object: Map<String, Value>,
    /// Constructor name
    pub class_name: Option<String>,
    /// Remote handle, usable with [`Session::expose_object`]
    pub object_id: String,
}

/// BDHS run request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BdhsRequest {
    /// What identifies the target in the heap
    #[serde(flatten)]
    pub criterion: SearchCriterion,
    /// History entries reported before the first match
    #[serde(default)]
    pub tolerance_before: Option<usize>,
    /// Steps the target may persist after its first appearance
    #[serde(default)]
    pub tolerance_after: Option<usize>,
    /// Pause budget
    #[serde(default)]
    pub max_steps: Option<usize>,
}

/// What to expose to the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExposeTarget {
    /// A remote object handle
    Remote(String),
    /// A heap snapshot node id
    HeapNode(u64),
}

/// A debugging session.
#[derive(Debug)]
pub struct Session<T: Transport> {
    transport: Arc<T>,
    debugger: Arc<Debugger<T>>,
    config: Config,
    snapshot: RwLock<Option<Arc<DecodedSnapshot>>>,
    bdhs: Mutex<RunSlot>,
}

/// BDHS run slot of a session. `Starting` reserves the slot while the run is being armed.
#[derive(Debug, Default)]
enum RunSlot {
    #[default]
    Empty,
    Starting,
    Active(BdhsHandle),
}

impl RunSlot {
    fn is_busy(&self) -> bool {
        match self {
            Self::Empty => false,
            Self::Starting => true,
            Self::Active(run) => !run.is_finished(),
        }
    }
}

/// Releases a `Starting` reservation unless a handle took its place.
struct Reservation<'a> {
    slot: &'a Mutex<RunSlot>,
}

impl Reservation<'_> {
    fn fill(self, handle: BdhsHandle) {
        *self.slot.lock() = RunSlot::Active(handle);
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if matches!(*slot, RunSlot::Starting) {
            *slot = RunSlot::Empty;
        }
    }
}

impl Session<WsTransport> {
    /// Connects to a debuggee WebSocket endpoint.
    pub async fn attach(url: &str, config: Config) -> Result<Self> {
        let transport = WsTransport::attach(url).await?;
        info!(url, "Attached to debuggee");
        Ok(Self::new(Arc::new(transport), config))
    }
}

impl<T: Transport> Session<T> {
    /// Creates a session over an attached transport.
    pub fn new(transport: Arc<T>, config: Config) -> Self {
        let debugger = Arc::new(Debugger::with_vendor_patterns(
            transport.clone(),
            config.debugger.vendor_patterns.clone(),
        ));
        Self { transport, debugger, config, snapshot: RwLock::new(None), bdhs: Mutex::new(RunSlot::Empty) }
    }

    /// The session's transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// The session's debugger wrapper.
    pub fn debugger(&self) -> &Arc<Debugger<T>> {
        &self.debugger
    }

    /// The session's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The latest decoded snapshot, if any.
    pub fn snapshot(&self) -> Option<Arc<DecodedSnapshot>> {
        self.snapshot.read().clone()
    }

    /// Takes and decodes a heap snapshot, replacing the cached one.
    pub async fn capture_snapshot(&self) -> Result<SnapshotSummary> {
        let graph = Arc::new(capture_and_decode(self.transport.as_ref()).await?);
        let summary = SnapshotSummary { node_count: graph.len(), string_count: graph.string_count() };
        *self.snapshot.write() = Some(graph);
        info!(nodes = summary.node_count, strings = summary.string_count, "Snapshot captured");
        Ok(summary)
    }

    /// Searches the cached snapshot, capturing one first if there is none.
    pub async fn search_snapshot(&self, request: &SnapshotSearchRequest) -> Result<SearchReport> {
        let compiled = request.criterion.compile()?.with_max_depth(self.config.inspect.max_depth);

        let graph = match self.snapshot() {
            Some(graph) => graph,
            None => {
                self.capture_snapshot().await?;
                self.snapshot().ok_or_else(|| HeapscopeError::config("snapshot capture left no snapshot"))?
            }
        };

        let max_results = request.max_results.unwrap_or(self.config.search.max_results);
        let hits = compiled.scan(&graph, max_results);
        let results = materialize(&graph, hits, compiled.max_depth());
        Ok(SearchReport { total_matches: results.len(), results })
    }

    /// Searches objects alive in the debuggee through the runtime domain.
    pub async fn search_live_objects(&self, request: &LiveSearchRequest) -> Result<Vec<LiveObject>> {
        let terms = LiveTerms::new(request);

        let prototype = self
            .transport
            .send("Runtime.evaluate", json!({ "expression": "Object.prototype", "returnByValue": false }))
            .await?;
        let prototype: RemoteObject = result_field("Runtime.evaluate", &prototype, "result")?;
        let prototype_id = prototype
            .object_id
            .ok_or_else(|| ProtocolError::UnexpectedResponse {
                method: "Runtime.evaluate".to_string(),
                field: "result.objectId",
            })?;

        let queried = self.transport.send("Runtime.queryObjects", json!({ "prototypeObjectId": prototype_id })).await?;
        let objects: RemoteObject = result_field("Runtime.queryObjects", &queried, "objects")?;
        let Some(array_id) = objects.object_id else {
            return Ok(Vec::new());
        };

        let listed = self
            .transport
            .send("Runtime.getProperties", json!({ "objectId": array_id, "ownProperties": true }))
            .await;
        let candidates = match listed {
            Ok(listed) => result_field::<Vec<PropertyDescriptor>>("Runtime.getProperties", &listed, "result"),
            Err(e) => Err(e),
        };

        let mut results = Vec::new();
        if let Ok(candidates) = &candidates {
            for candidate in candidates {
                if candidate.name == "length" {
                    continue;
                }
                let Some(remote) = &candidate.value else { continue };
                let Some(object_id) = &remote.object_id else { continue };
                if results.len() >= request.max_results {
                    break;
                }

                match self.inspect_live_object(object_id, remote, &terms).await {
                    Ok(Some(object)) => results.push(object),
                    Ok(None) => {}
                    Err(e) => debug!(%object_id, "Skipping live object: {e}"),
                }
            }
        }

        if let Err(e) = self.transport.send("Runtime.releaseObject", json!({ "objectId": array_id })).await {
            warn!("Failed to release query result: {e}");
        }
        candidates?;

        debug!(results = results.len(), "Live object search finished");
        Ok(results)
    }

    async fn inspect_live_object(
        &self,
        object_id: &str,
        remote: &RemoteObject,
        terms: &LiveTerms,
    ) -> Result<Option<LiveObject>> {
        let result = self
            .transport
            .send(
                "Runtime.getProperties",
                json!({ "objectId": object_id, "ownProperties": true, "generatePreview": true }),
            )
            .await?;
        let properties: Vec<PropertyDescriptor> = result_field("Runtime.getProperties", &result, "result")?;

        let mut object = Map::new();
        let mut matches = terms.is_empty();
        for property in properties {
            if property.name.starts_with("__") || property.name == "constructor" {
                continue;
            }
            let value = match &property.value {
                Some(RemoteObject { value: Some(v), .. }) if !v.is_null() => v.clone(),
                Some(RemoteObject { description: Some(d), .. }) => Value::String(d.clone()),
                _ => Value::Null,
            };

            matches |= terms.property.as_deref().is_some_and(|p| contains_ignore_case(&property.name, p));
            matches |= terms.value.as_deref().is_some_and(|v| contains_ignore_case(&value_text(&value), v));
            object.insert(property.name, value);
        }

        let class_name = remote.class_name.clone();
        matches |= terms
            .class_name
            .as_deref()
            .is_some_and(|c| contains_ignore_case(class_name.as_deref().unwrap_or_default(), c));

        Ok(matches.then(|| LiveObject { object, class_name, object_id: object_id.to_string() }))
    }

    /// Starts a BDHS run and returns its signal stream.
    ///
    /// Only one run may be active per session.
    pub async fn start_bdhs(&self, request: &BdhsRequest) -> Result<mpsc::UnboundedReceiver<BdhsSignal>> {
        let compiled = Arc::new(request.criterion.compile()?.with_max_depth(self.config.inspect.max_depth));

        let reservation = {
            let mut slot = self.bdhs.lock();
            if slot.is_busy() {
                return Err(HeapscopeError::config("BDHS already running"));
            }
            *slot = RunSlot::Starting;
            Reservation { slot: &self.bdhs }
        };

        let mut options = BdhsOptions::from(&self.config.bdhs);
        options.tolerance_before = request.tolerance_before.unwrap_or(options.tolerance_before);
        options.tolerance_after = request.tolerance_after.unwrap_or(options.tolerance_after);
        options.max_steps = request.max_steps.unwrap_or(options.max_steps);

        let transport = self.transport.clone();
        let max_results = self.config.search.bdhs_max_results;
        let search: BdhsSearch = Arc::new(move || {
            let transport = transport.clone();
            let compiled = compiled.clone();
            async move {
                let graph = capture_and_decode(transport.as_ref()).await?;
                let hits = compiled.scan(&graph, max_results);
                Ok(materialize(&graph, hits, compiled.max_depth()))
            }
            .boxed()
        });

        let (handle, signals) = BdhsExecutor::new(self.debugger.clone(), options, search).start().await?;
        reservation.fill(handle);
        Ok(signals)
    }

    fn take_run(&self) -> Option<BdhsHandle> {
        let mut slot = self.bdhs.lock();
        match std::mem::take(&mut *slot) {
            RunSlot::Active(handle) => Some(handle),
            other => {
                *slot = other;
                None
            }
        }
    }

    /// Aborts the active run and waits for it to end.
    pub async fn stop_bdhs(&self) -> Result<BdhsOutcome> {
        let mut handle = self.take_run().ok_or_else(|| HeapscopeError::config("BDHS not running"))?;
        handle.abort();
        handle.wait().await
    }

    /// Waits for the active run to end on its own.
    pub async fn wait_bdhs(&self) -> Result<BdhsOutcome> {
        let handle = self.take_run().ok_or_else(|| HeapscopeError::config("BDHS not running"))?;
        handle.wait().await
    }

    /// Whether a run is in progress.
    pub fn is_bdhs_running(&self) -> bool {
        self.bdhs.lock().is_busy()
    }

    /// Makes an object reachable from the page as `window[name]`.
    pub async fn expose_object(&self, target: &ExposeTarget, name: &str) -> Result<String> {
        if !is_identifier(name) {
            return Err(HeapscopeError::config(format!("`{name}` is not a valid identifier")));
        }

        let object_id = match target {
            ExposeTarget::Remote(object_id) => object_id.clone(),
            ExposeTarget::HeapNode(node_id) => {
                self.transport.send("HeapProfiler.enable", json!({})).await?;
                let result = self
                    .transport
                    .send("HeapProfiler.getObjectByHeapObjectId", json!({ "objectId": node_id.to_string() }))
                    .await?;
                let remote: RemoteObject = result_field("HeapProfiler.getObjectByHeapObjectId", &result, "result")?;
                remote.object_id.ok_or_else(|| {
                    HeapscopeError::config(format!("heap node {node_id} has no live object"))
                })?
            }
        };

        let declaration = format!("function() {{ window['{name}'] = this; return this; }}");
        self.debugger.call_function_on(&object_id, &declaration, false).await?;
        info!(name, "Exposed object");
        Ok(name.to_string())
    }

    /// Aborts any active run and closes the transport.
    pub async fn detach(&self) -> Result<()> {
        if let Some(mut handle) = self.take_run() {
            handle.abort();
            if let Err(e) = handle.wait().await {
                warn!("BDHS run ended with an error during detach: {e}");
            }
        }
        self.transport.detach().await?;
        info!("Detached from debuggee");
        Ok(())
    }
}

struct LiveTerms {
    property: Option<String>,
    value: Option<String>,
    class_name: Option<String>,
}

impl LiveTerms {
    fn new(request: &LiveSearchRequest) -> Self {
        let active = |term: &Option<String>| term.as_ref().filter(|t| !t.is_empty()).map(|t| t.to_lowercase());
        Self {
            property: active(&request.property),
            value: active(&request.value),
            class_name: active(&request.class_name),
        }
    }

    fn is_empty(&self) -> bool {
        self.property.is_none() && self.value.is_none() && self.class_name.is_none()
    }
}

/// `needle` must already be lowercase.
fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
