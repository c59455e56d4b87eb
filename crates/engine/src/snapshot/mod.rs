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

//! Heap snapshot model.
//!
//! A V8 heap snapshot arrives as flat integer arrays described by a metadata block. The
//! [`decode`] function turns it into a node arena ([`DecodedSnapshot`]) where nodes are
//! addressed by their decode index and edges store the index of their target.

use std::{fmt, path::Path};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{format_js_number, DecodeError, ReverseEdgeIndex};

mod capture;
mod decoder;

pub use capture::*;
pub use decoder::*;

/// Snapshot as produced by `HeapProfiler.takeHeapSnapshot`.
///
/// Unknown top-level sections (allocation traces, samples, locations) are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawHeapSnapshot {
    /// Header with the field layout
    pub snapshot: RawSnapshotHeader,
    /// Flat node records
    pub nodes: Vec<u64>,
    /// Flat edge records
    pub edges: Vec<u64>,
    /// String table
    pub strings: Vec<String>,
}

/// Header of a raw snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSnapshotHeader {
    /// Field layout
    pub meta: SnapshotMeta,
    /// Declared number of nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_count: Option<usize>,
    /// Declared number of edges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_count: Option<usize>,
}

/// Field layout of the flat arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Names of the fields of a node record
    pub node_fields: Vec<String>,
    /// Per-field type; the entry of the `type` field is the node kind enumeration
    pub node_types: Vec<Value>,
    /// Names of the fields of an edge record
    pub edge_fields: Vec<String>,
    /// Per-field type; the entry of the `type` field is the edge kind enumeration
    pub edge_types: Vec<Value>,
}

impl RawHeapSnapshot {
    /// Parses snapshot JSON text.
    pub fn from_json(text: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads a `.heapsnapshot` file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DecodeError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

/// Kind of a heap node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Internal VM object; also `true`, `false`, `null` and `undefined`
    Hidden,
    /// Internal array
    Array,
    /// String
    String,
    /// JS object
    Object,
    /// Compiled code
    Code,
    /// Function closure
    Closure,
    /// Regular expression
    RegExp,
    /// Heap number
    Number,
    /// Native object
    Native,
    /// Synthetic root
    Synthetic,
    /// Concatenated string
    ConcatenatedString,
    /// Sliced string
    SlicedString,
    /// Symbol
    Symbol,
    /// BigInt
    BigInt,
    /// Object shape (map)
    ObjectShape,
    /// Kind name this decoder does not know
    Other(String),
}

impl NodeKind {
    /// Maps a kind name of the snapshot's enumeration.
    pub fn from_name(name: &str) -> Self {
        match name {
            "hidden" => Self::Hidden,
            "array" => Self::Array,
            "string" => Self::String,
            "object" => Self::Object,
            "code" => Self::Code,
            "closure" => Self::Closure,
            "regexp" => Self::RegExp,
            "number" => Self::Number,
            "native" => Self::Native,
            "synthetic" => Self::Synthetic,
            "concatenated string" => Self::ConcatenatedString,
            "sliced string" => Self::SlicedString,
            "symbol" => Self::Symbol,
            "bigint" => Self::BigInt,
            "object shape" => Self::ObjectShape,
            other => Self::Other(other.to_string()),
        }
    }

    /// Name as used in the snapshot.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Hidden => "hidden",
            Self::Array => "array",
            Self::String => "string",
            Self::Object => "object",
            Self::Code => "code",
            Self::Closure => "closure",
            Self::RegExp => "regexp",
            Self::Number => "number",
            Self::Native => "native",
            Self::Synthetic => "synthetic",
            Self::ConcatenatedString => "concatenated string",
            Self::SlicedString => "sliced string",
            Self::Symbol => "symbol",
            Self::BigInt => "bigint",
            Self::ObjectShape => "object shape",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a heap edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Variable captured in a function context
    Context,
    /// Indexed element
    Element,
    /// Named property
    Property,
    /// Internal slot
    Internal,
    /// Hidden link, labelled by index
    Hidden,
    /// Shortcut skipping intermediate objects
    Shortcut,
    /// Weak reference
    Weak,
    /// Kind name this decoder does not know
    Other(String),
}

impl EdgeKind {
    /// Maps a kind name of the snapshot's enumeration.
    pub fn from_name(name: &str) -> Self {
        match name {
            "context" => Self::Context,
            "element" => Self::Element,
            "property" => Self::Property,
            "internal" => Self::Internal,
            "hidden" => Self::Hidden,
            "shortcut" => Self::Shortcut,
            "weak" => Self::Weak,
            other => Self::Other(other.to_string()),
        }
    }

    /// Name as used in the snapshot.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Context => "context",
            Self::Element => "element",
            Self::Property => "property",
            Self::Internal => "internal",
            Self::Hidden => "hidden",
            Self::Shortcut => "shortcut",
            Self::Weak => "weak",
            Self::Other(name) => name,
        }
    }

    /// Whether the `name_or_index` field holds a literal index instead of a string id.
    pub fn is_indexed(&self) -> bool {
        matches!(self, Self::Element | Self::Hidden)
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded value of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    /// The node's name from the string table
    Label(String),
    /// Resolved numeric value
    Number(f64),
    /// Resolved bigint: decimal digits, or the raw text suffixed with `n`
    BigInt(String),
    /// `true` / `false`
    Bool(bool),
    /// `null`
    Null,
    /// `undefined`
    Undefined,
    /// A number whose text could not be parsed
    Absent,
}

impl fmt::Display for NodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Label(s) | Self::BigInt(s) => f.write_str(s),
            Self::Number(n) => f.write_str(&format_js_number(*n)),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Null => f.write_str("null"),
            Self::Undefined | Self::Absent => f.write_str("undefined"),
        }
    }
}

/// A directed edge of the heap graph.
#[derive(Debug, Clone, PartialEq)]
pub struct HeapEdge {
    /// Edge kind
    pub kind: EdgeKind,
    /// Property name, element index or internal slot tag
    pub label: String,
    /// Index of the target node
    pub target: usize,
}

/// A node of the heap graph.
#[derive(Debug, Clone, PartialEq)]
pub struct HeapNode {
    /// Position in decode order
    pub index: usize,
    /// Node kind
    pub kind: NodeKind,
    /// Decoded value
    pub value: NodeValue,
    /// Snapshot object id, stable across snapshots of the same debuggee
    pub stable_id: u64,
    /// Outgoing edges
    pub edges: Vec<HeapEdge>,
}

impl HeapNode {
    /// The node's label, empty when the value is a decoded literal.
    pub fn name(&self) -> &str {
        match &self.value {
            NodeValue::Label(s) => s,
            _ => "",
        }
    }
}

/// Field names and kind enumerations of a decoded snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldLayout {
    /// Node record fields
    pub node_fields: Vec<String>,
    /// Edge record fields
    pub edge_fields: Vec<String>,
    /// Node kind enumeration
    pub node_kinds: Vec<String>,
    /// Edge kind enumeration
    pub edge_kinds: Vec<String>,
}

/// A decoded, read-only heap graph.
#[derive(Debug)]
pub struct DecodedSnapshot {
    nodes: Vec<HeapNode>,
    layout: FieldLayout,
    string_count: usize,
    reverse: OnceCell<ReverseEdgeIndex>,
}

impl DecodedSnapshot {
    pub(crate) fn new(nodes: Vec<HeapNode>, layout: FieldLayout, string_count: usize) -> Self {
        Self { nodes, layout, string_count, reverse: OnceCell::new() }
    }

    /// All nodes in decode order.
    pub fn nodes(&self) -> &[HeapNode] {
        &self.nodes
    }

    /// Node at `index`.
    pub fn node(&self, index: usize) -> Option<&HeapNode> {
        self.nodes.get(index)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the snapshot has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Field layout the snapshot was decoded with.
    pub fn layout(&self) -> &FieldLayout {
        &self.layout
    }

    /// Size of the string table.
    pub fn string_count(&self) -> usize {
        self.string_count
    }

    /// Node with the given snapshot object id.
    pub fn find_by_stable_id(&self, stable_id: u64) -> Option<&HeapNode> {
        self.nodes.iter().find(|n| n.stable_id == stable_id)
    }

    /// Reverse adjacency, built on first use and dropped with the snapshot.
    pub fn reverse_index(&self) -> &ReverseEdgeIndex {
        self.reverse.get_or_init(|| ReverseEdgeIndex::build(self))
    }
}
