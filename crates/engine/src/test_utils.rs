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

//! Synthetic heap snapshots for tests.
//!
//! [`SnapshotBuilder`] lays out nodes and edges the way V8 does (same field order and kind
//! enumerations), so the resulting [`RawHeapSnapshot`] goes through the real decoder.

use std::collections::HashMap;

use serde_json::json;

use crate::{decode, DecodeError, DecodedSnapshot, RawHeapSnapshot, RawSnapshotHeader, SnapshotMeta};

/// Node kind enumeration in V8 order.
pub const NODE_KINDS: &[&str] = &[
    "hidden",
    "array",
    "string",
    "object",
    "code",
    "closure",
    "regexp",
    "number",
    "native",
    "synthetic",
    "concatenated string",
    "sliced string",
    "symbol",
    "bigint",
    "object shape",
];

/// Edge kind enumeration in V8 order.
pub const EDGE_KINDS: &[&str] = &["context", "element", "property", "internal", "hidden", "shortcut", "weak"];

const NODE_FIELDS: &[&str] = &["type", "name", "id", "self_size", "edge_count", "trace_node_id", "detachedness"];
const EDGE_FIELDS: &[&str] = &["type", "name_or_index", "to_node"];

#[derive(Debug, Clone)]
struct PendingEdge {
    kind: usize,
    name_or_index: u64,
    target: usize,
}

#[derive(Debug, Clone)]
struct PendingNode {
    kind: usize,
    name: u64,
    id: u64,
    edges: Vec<PendingEdge>,
}

/// Builds V8-shaped heap snapshots node by node.
#[derive(Debug, Clone, Default)]
pub struct SnapshotBuilder {
    nodes: Vec<PendingNode>,
    strings: Vec<String>,
    string_ids: HashMap<String, u64>,
}

impl SnapshotBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node of `kind` labelled `name` and returns its index.
    ///
    /// Unknown kinds fall back to `hidden`.
    pub fn node(&mut self, kind: &str, name: &str) -> usize {
        let kind = NODE_KINDS.iter().position(|k| *k == kind).unwrap_or(0);
        let name = self.intern(name);
        let index = self.nodes.len();
        self.nodes.push(PendingNode { kind, name, id: index as u64 * 2 + 1, edges: Vec::new() });
        index
    }

    /// Adds an object of class `class_name`.
    pub fn object(&mut self, class_name: &str) -> usize {
        self.node("object", class_name)
    }

    /// Adds a string.
    pub fn string(&mut self, text: &str) -> usize {
        self.node("string", text)
    }

    /// Adds a heap number whose value is given by `text`, the way V8 records captured numeric
    /// values: an internal `value` edge to a string.
    pub fn number(&mut self, text: &str) -> usize {
        let number = self.node("number", "heap number");
        let value = self.string(text);
        self.internal(number, "value", value);
        number
    }

    /// Adds a `true`, `false`, `null` or `undefined` literal.
    pub fn literal(&mut self, name: &str) -> usize {
        self.node("hidden", name)
    }

    /// Adds a closure named `name`.
    pub fn closure(&mut self, name: &str) -> usize {
        self.node("closure", name)
    }

    /// Adds an edge. Element and hidden edges take a numeric `label`.
    pub fn edge(&mut self, from: usize, kind: &str, label: &str, to: usize) -> &mut Self {
        let kind = EDGE_KINDS.iter().position(|k| *k == kind).unwrap_or(2);
        let name_or_index = match EDGE_KINDS[kind] {
            "element" | "hidden" => label.parse().unwrap_or(0),
            _ => self.intern(label),
        };
        if let Some(node) = self.nodes.get_mut(from) {
            node.edges.push(PendingEdge { kind, name_or_index, target: to });
        }
        self
    }

    /// Adds a property edge.
    pub fn property(&mut self, from: usize, name: &str, to: usize) -> &mut Self {
        self.edge(from, "property", name, to)
    }

    /// Adds an element edge.
    pub fn element(&mut self, from: usize, index: usize, to: usize) -> &mut Self {
        self.edge(from, "element", &index.to_string(), to)
    }

    /// Adds an internal edge.
    pub fn internal(&mut self, from: usize, name: &str, to: usize) -> &mut Self {
        self.edge(from, "internal", name, to)
    }

    /// Adds a context edge.
    pub fn context(&mut self, from: usize, name: &str, to: usize) -> &mut Self {
        self.edge(from, "context", name, to)
    }

    /// Snapshot object id given to the node at `index`.
    pub fn stable_id(&self, index: usize) -> Option<u64> {
        self.nodes.get(index).map(|n| n.id)
    }

    /// Produces the raw snapshot.
    pub fn build(&self) -> RawHeapSnapshot {
        let node_width = NODE_FIELDS.len() as u64;
        let mut nodes = Vec::with_capacity(self.nodes.len() * NODE_FIELDS.len());
        let mut edges = Vec::new();

        for node in &self.nodes {
            nodes.extend([node.kind as u64, node.name, node.id, 16, node.edges.len() as u64, 0, 0]);
            for edge in &node.edges {
                edges.extend([edge.kind as u64, edge.name_or_index, edge.target as u64 * node_width]);
            }
        }

        RawHeapSnapshot {
            snapshot: RawSnapshotHeader {
                meta: SnapshotMeta {
                    node_fields: NODE_FIELDS.iter().map(|f| f.to_string()).collect(),
                    node_types: vec![
                        json!(NODE_KINDS),
                        json!("string"),
                        json!("number"),
                        json!("number"),
                        json!("number"),
                        json!("number"),
                        json!("number"),
                    ],
                    edge_fields: EDGE_FIELDS.iter().map(|f| f.to_string()).collect(),
                    edge_types: vec![json!(EDGE_KINDS), json!("string_or_number"), json!("node")],
                },
                node_count: Some(self.nodes.len()),
                edge_count: Some(edges.len() / EDGE_FIELDS.len()),
            },
            nodes,
            edges,
            strings: self.strings.clone(),
        }
    }

    /// Produces the snapshot as JSON text, as streamed by the debuggee.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.build()).unwrap_or_default()
    }

    /// Builds and decodes the snapshot.
    pub fn decode(&self) -> Result<DecodedSnapshot, DecodeError> {
        decode(&self.build())
    }

    fn intern(&mut self, text: &str) -> u64 {
        if let Some(id) = self.string_ids.get(text) {
            return *id;
        }
        let id = self.strings.len() as u64;
        self.strings.push(text.to_string());
        self.string_ids.insert(text.to_string(), id);
        id
    }
}
