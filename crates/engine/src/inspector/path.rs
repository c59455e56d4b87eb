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

use crate::{DecodedSnapshot, EdgeKind, HeapEdge, HeapNode, NodeKind};

/// An edge seen from its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReverseEdge {
    /// Index of the node owning the edge
    pub source: usize,
    /// Position of the edge in the source's edge list
    pub edge: usize,
}

impl ReverseEdge {
    /// The forward edge this entry mirrors.
    pub fn resolve<'a>(&self, graph: &'a DecodedSnapshot) -> Option<&'a HeapEdge> {
        graph.node(self.source).and_then(|n| n.edges.get(self.edge))
    }
}

/// For each node, the edges pointing at it, in source order.
#[derive(Debug, Clone, Default)]
pub struct ReverseEdgeIndex {
    parents: Vec<Vec<ReverseEdge>>,
}

impl ReverseEdgeIndex {
    /// Builds the index in one pass over all edges.
    pub fn build(graph: &DecodedSnapshot) -> Self {
        let mut parents = vec![Vec::new(); graph.len()];
        for node in graph.nodes() {
            for (position, edge) in node.edges.iter().enumerate() {
                parents[edge.target].push(ReverseEdge { source: node.index, edge: position });
            }
        }
        Self { parents }
    }

    /// Edges pointing at `index`.
    pub fn parents(&self, index: usize) -> &[ReverseEdge] {
        self.parents.get(index).map_or(&[], Vec::as_slice)
    }
}

/// Edge labels walked through without contributing to the path.
const TRANSPARENT_LABELS: &[&str] = &["__proto__", "constructor", "prototype", "context", "extension"];

/// Slot of the first entry key in a small `OrderedHashMap` backing store.
const MAP_FIRST_KEY_SLOT: usize = 5;
/// Width of an `OrderedHashMap` entry: key, value, chain.
const MAP_ENTRY_WIDTH: usize = 3;

struct Frame {
    node: usize,
    came_from: Option<ReverseEdge>,
    next_parent: usize,
    pushed: usize,
}

/// Renders a JavaScript expression reaching `target` from a global root.
///
/// Depth-first over the reverse edges with an explicit stack; the first path found wins. The
/// result is not necessarily the shortest. Returns `None` when no root is reachable.
pub fn build_path(graph: &DecodedSnapshot, reverse: &ReverseEdgeIndex, target: usize) -> Option<String> {
    let node = graph.node(target)?;
    if let Some(root) = root_label(node) {
        return Some(root);
    }

    let mut visited = vec![false; graph.len()];
    visited[target] = true;

    // Segments from the target outwards; rendered in reverse.
    let mut segments: Vec<String> = Vec::new();
    let mut stack = vec![Frame { node: target, came_from: None, next_parent: 0, pushed: 0 }];

    while let Some(frame) = stack.last_mut() {
        let parents = reverse.parents(frame.node);
        let Some(&parent) = parents.get(frame.next_parent) else {
            let pushed = frame.pushed;
            stack.pop();
            segments.truncate(segments.len() - pushed);
            continue;
        };
        frame.next_parent += 1;

        if visited[parent.source] {
            continue;
        }
        let (Some(current), Some(edge), Some(source)) =
            (graph.node(frame.node), parent.resolve(graph), graph.node(parent.source))
        else {
            continue;
        };

        let mut pushed = 0;
        if let Some(get) = map_get_segment(graph, source, current, edge, frame.came_from) {
            segments.push(get);
            pushed += 1;
        }
        if let Some(segment) = edge_segment(edge) {
            segments.push(segment);
            pushed += 1;
        }

        visited[parent.source] = true;
        if let Some(root) = root_label(source) {
            let mut expr = root;
            for segment in segments.iter().rev() {
                expr.push_str(segment);
            }
            return Some(expr);
        }

        stack.push(Frame { node: parent.source, came_from: Some(parent), next_parent: 0, pushed });
    }

    None
}

fn root_label(node: &HeapNode) -> Option<String> {
    let name = node.name();
    match node.kind {
        NodeKind::Object if is_named(name, "Window") => Some("window".to_string()),
        NodeKind::Object if is_named(name, "global") => Some("globalThis".to_string()),
        NodeKind::Closure => Some(format!("<lexical {name}>")),
        NodeKind::Object
            if name.contains("Script") || name.contains("Context") || name.contains("Module") =>
        {
            Some(format!("<lexical {name}>"))
        }
        _ => None,
    }
}

/// `Window` and `Window / https://...` both name the global object.
fn is_named(name: &str, root: &str) -> bool {
    name == root || name.strip_prefix(root).is_some_and(|rest| rest.starts_with(" / "))
}

fn edge_segment(edge: &HeapEdge) -> Option<String> {
    if TRANSPARENT_LABELS.contains(&edge.label.as_str()) {
        return None;
    }
    match edge.kind {
        EdgeKind::Property | EdgeKind::Context => Some(property_segment(&edge.label)),
        EdgeKind::Element => Some(format!("[{}]", edge.label)),
        _ => None,
    }
}

/// Whether `name` is an ASCII JavaScript identifier.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn property_segment(name: &str) -> String {
    if is_identifier(name) {
        format!(".{name}")
    } else {
        format!("[{}]", quote(name))
    }
}

fn quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("\"{text}\""))
}

/// `.get(key)` for the hop from a `Map` into its backing table.
///
/// `current` is the table, reached from `source` through the internal `table` edge; the walk
/// arrived at the table through `came_from`, an internal value slot of an entry.
fn map_get_segment(
    graph: &DecodedSnapshot,
    source: &HeapNode,
    current: &HeapNode,
    edge: &HeapEdge,
    came_from: Option<ReverseEdge>,
) -> Option<String> {
    if source.name() != "Map"
        || current.kind != NodeKind::Array
        || edge.kind != EdgeKind::Internal
        || edge.label != "table"
    {
        return None;
    }

    let slot_edge = came_from?.resolve(graph)?;
    if slot_edge.kind != EdgeKind::Internal {
        return None;
    }
    let value_slot = slot_edge.label.parse::<usize>().ok()?;
    if value_slot <= MAP_FIRST_KEY_SLOT || (value_slot - MAP_FIRST_KEY_SLOT) % MAP_ENTRY_WIDTH != 1 {
        return None;
    }
    let key_label = (value_slot - 1).to_string();

    let key = current
        .edges
        .iter()
        .find(|e| e.kind == EdgeKind::Internal && e.label == key_label)
        .and_then(|e| graph.node(e.target))
        .map(|key| match key.kind {
            NodeKind::String => quote(&key.value.to_string()),
            _ => key.value.to_string(),
        });

    Some(format!(".get({})", key.as_deref().unwrap_or("/*unknownKey*/")))
}
