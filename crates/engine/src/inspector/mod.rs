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

//! Object materialization and access path reconstruction.
//!
//! [`inspect`] turns the subgraph reachable from a node into a plain [`JsValue`], bounded by a
//! depth limit and guarded by a visited set. [`build_path`] walks the reverse edges from a node
//! back to a global root and renders a JavaScript expression that reaches it.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::{bigint_value, parse_js_number, DecodedSnapshot, EdgeKind, HeapNode, JsValue, NodeKind, NodeValue};

mod path;

pub use path::*;

/// Default materialization depth.
pub const DEFAULT_MAX_DEPTH: usize = 15;

/// Path of the inspected node itself in annotations.
pub const ROOT_PATH: &str = "root";

/// Class recorded for a materialized object that is not a plain `Object`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassAnnotation {
    /// Access path below the inspected node, e.g. `root.user.address`
    pub field: String,
    /// Constructor name
    #[serde(rename = "class")]
    pub class_name: String,
}

/// Result of [`inspect`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectedObject {
    /// Materialized value
    pub value: JsValue,
    /// Class of the root: its constructor name, `Object` for plain objects and arrays, empty
    /// for anything that is not an object
    pub class_name: String,
    /// Classes found along the way
    pub class_annotations: Vec<ClassAnnotation>,
}

/// Materializes the node at `index`.
pub fn inspect(graph: &DecodedSnapshot, index: usize, max_depth: usize) -> InspectedObject {
    let mut visited = HashSet::new();
    inspect_with(graph, index, max_depth, &mut visited, ROOT_PATH)
}

/// Materializes the node at `index` with a caller-provided visited set and base path.
///
/// Nodes already in `visited` render as circular markers.
pub fn inspect_with(
    graph: &DecodedSnapshot,
    index: usize,
    max_depth: usize,
    visited: &mut HashSet<usize>,
    path: &str,
) -> InspectedObject {
    let mut class_annotations = Vec::new();
    let value = materialize(graph, index, max_depth, visited, path, &mut class_annotations);

    let class_name = match graph.node(index) {
        Some(node) if node.kind == NodeKind::Object => root_class_label(node).to_string(),
        _ => String::new(),
    };

    InspectedObject { value, class_name, class_annotations }
}

/// Class label of an object node without materializing it.
pub fn root_class_label(node: &HeapNode) -> &str {
    match node.name() {
        "" | "Object" | "Array" => "Object",
        name => name,
    }
}

fn materialize(
    graph: &DecodedSnapshot,
    index: usize,
    depth: usize,
    visited: &mut HashSet<usize>,
    path: &str,
    annotations: &mut Vec<ClassAnnotation>,
) -> JsValue {
    let Some(node) = graph.node(index) else {
        return JsValue::Null;
    };

    if let Some(primitive) = primitive_value(node) {
        return primitive;
    }

    if !visited.insert(index) {
        return JsValue::String(circular_label(node));
    }

    if depth == 0 {
        return JsValue::String(format!("[Max depth reached {}]", node.value));
    }

    if node.kind != NodeKind::Object {
        return JsValue::String(node.value.to_string());
    }

    let is_array = node.name() == "Array";
    if !is_array && !node.name().is_empty() && node.name() != "Object" {
        annotations.push(ClassAnnotation { field: path.to_string(), class_name: node.name().to_string() });
    }

    let children = node
        .edges
        .iter()
        .filter(|e| !e.label.is_empty() && matches!(e.kind, EdgeKind::Property | EdgeKind::Element));

    if is_array {
        let mut items = Vec::new();
        for edge in children {
            let Ok(position) = edge.label.parse::<usize>() else { continue };
            let child_path = format!("{path}[{}]", edge.label);
            let value = materialize(graph, edge.target, depth - 1, visited, &child_path, annotations);
            items.push((position, value));
        }
        JsValue::Array(place_elements(items))
    } else {
        let mut map = BTreeMap::new();
        for edge in children {
            let child_path = format!("{path}.{}", edge.label);
            let value = materialize(graph, edge.target, depth - 1, visited, &child_path, annotations);
            map.insert(edge.label.clone(), value);
        }
        JsValue::Object(map)
    }
}

/// Places elements at their index, holes as `undefined`. Very sparse arrays are compacted.
fn place_elements(mut items: Vec<(usize, JsValue)>) -> Vec<JsValue> {
    items.sort_by_key(|(position, _)| *position);
    let span = match items.last() {
        Some((position, _)) => position.checked_add(1),
        None => Some(0),
    };

    let span = match span {
        Some(span) if span <= items.len() * 2 + 16 => span,
        _ => return items.into_iter().map(|(_, value)| value).collect(),
    };

    let mut array = vec![JsValue::Undefined; span];
    for (position, value) in items {
        array[position] = value;
    }
    array
}

fn primitive_value(node: &HeapNode) -> Option<JsValue> {
    let value = match (&node.kind, &node.value) {
        (NodeKind::Hidden, NodeValue::Bool(b)) => JsValue::Bool(*b),
        (NodeKind::Hidden, NodeValue::Null) => JsValue::Null,
        (NodeKind::Hidden, NodeValue::Undefined) => JsValue::Undefined,
        (NodeKind::Hidden, _) => return None,

        (NodeKind::String | NodeKind::Symbol, value) => JsValue::String(value.to_string()),

        (NodeKind::Number, NodeValue::Number(n)) => JsValue::Number(*n),
        (NodeKind::Number, NodeValue::Absent | NodeValue::Undefined) => JsValue::Undefined,
        (NodeKind::Number, NodeValue::Bool(b)) => JsValue::Bool(*b),
        (NodeKind::Number, NodeValue::Null) => JsValue::Null,
        (NodeKind::Number, value) => {
            JsValue::Number(parse_js_number(&value.to_string()).unwrap_or(f64::NAN))
        }

        (NodeKind::BigInt, value) => {
            let text = value.to_string();
            match bigint_value(text.strip_suffix('n').unwrap_or(&text)) {
                NodeValue::BigInt(digits) if !digits.ends_with('n') => JsValue::BigInt(digits),
                _ => JsValue::String(format!("error -> bigint:{text}")),
            }
        }

        _ => return None,
    };
    Some(value)
}

fn circular_label(node: &HeapNode) -> String {
    match node.kind {
        NodeKind::Object => format!("[Circular Object:{}]", node.value),
        NodeKind::Array => "[Circular Array]".to_string(),
        NodeKind::String => format!("[Circular String:\"{}\"]", node.value),
        NodeKind::Number => format!("[Circular Number:{}]", node.value),
        NodeKind::RegExp => format!("[Circular RegExp:{}]", node.value),
        ref kind => format!("[Circular {kind}]"),
    }
}
