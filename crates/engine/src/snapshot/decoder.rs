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

use serde_json::Value;
use tracing::debug;

use super::{
    DecodedSnapshot, EdgeKind, FieldLayout, HeapEdge, HeapNode, NodeKind, NodeValue,
    RawHeapSnapshot,
};
use crate::{parse_js_number, DecodeError};

/// Offsets of the fields the decoder reads, looked up from the metadata.
#[derive(Debug, Clone, Copy)]
struct Offsets {
    node_width: usize,
    node_type: usize,
    node_name: usize,
    node_id: usize,
    node_edge_count: usize,
    edge_width: usize,
    edge_type: usize,
    edge_name: usize,
    edge_to: usize,
}

impl Offsets {
    fn resolve(node_fields: &[String], edge_fields: &[String]) -> Result<Self, DecodeError> {
        let find = |fields: &[String], name: &str, missing: &'static str| {
            fields.iter().position(|f| f == name).ok_or(DecodeError::MissingField(missing))
        };

        let offsets = Self {
            node_width: node_fields.len(),
            node_type: find(node_fields, "type", "node_fields.type")?,
            node_name: find(node_fields, "name", "node_fields.name")?,
            node_id: find(node_fields, "id", "node_fields.id")?,
            node_edge_count: find(node_fields, "edge_count", "node_fields.edge_count")?,
            edge_width: edge_fields.len(),
            edge_type: find(edge_fields, "type", "edge_fields.type")?,
            edge_name: find(edge_fields, "name_or_index", "edge_fields.name_or_index")?,
            edge_to: find(edge_fields, "to_node", "edge_fields.to_node")?,
        };
        Ok(offsets)
    }
}

/// Decodes a raw snapshot into a node arena.
///
/// Runs in one linear pass over the node and edge arrays plus a pass resolving the values of
/// number and bigint nodes. Any structural inconsistency fails the whole decode.
pub fn decode(raw: &RawHeapSnapshot) -> Result<DecodedSnapshot, DecodeError> {
    let meta = &raw.snapshot.meta;
    let offsets = Offsets::resolve(&meta.node_fields, &meta.edge_fields)?;
    let node_kinds = kind_enumeration(&meta.node_types, offsets.node_type, "node_types")?;
    let edge_kinds = kind_enumeration(&meta.edge_types, offsets.edge_type, "edge_types")?;

    if raw.nodes.len() % offsets.node_width != 0 {
        return Err(DecodeError::Layout(format!(
            "node array length {} is not a multiple of the record width {}",
            raw.nodes.len(),
            offsets.node_width
        )));
    }
    if raw.edges.len() % offsets.edge_width != 0 {
        return Err(DecodeError::Layout(format!(
            "edge array length {} is not a multiple of the record width {}",
            raw.edges.len(),
            offsets.edge_width
        )));
    }

    let node_total = raw.nodes.len() / offsets.node_width;
    let edge_total = raw.edges.len() / offsets.edge_width;
    check_declared("node_count", raw.snapshot.node_count, node_total)?;
    check_declared("edge_count", raw.snapshot.edge_count, edge_total)?;

    let node_kinds_parsed: Vec<NodeKind> = node_kinds.iter().map(|k| NodeKind::from_name(k)).collect();
    let edge_kinds_parsed: Vec<EdgeKind> = edge_kinds.iter().map(|k| EdgeKind::from_name(k)).collect();

    let mut nodes = Vec::with_capacity(node_total);
    let mut edge_cursor = 0usize;

    for (index, record) in raw.nodes.chunks_exact(offsets.node_width).enumerate() {
        let kind = lookup(&node_kinds_parsed, record[offsets.node_type], "node_types")?.clone();
        let name = lookup(&raw.strings, record[offsets.node_name], "strings")?;
        let edge_count = usize::try_from(record[offsets.node_edge_count]).map_err(|_| {
            DecodeError::Layout(format!("edge count of node {index} does not fit in memory"))
        })?;

        let edge_end = edge_cursor.checked_add(edge_count).filter(|end| *end <= edge_total);
        let Some(edge_end) = edge_end else {
            return Err(DecodeError::Layout(format!(
                "edges of node {index} run past the end of the edge array"
            )));
        };

        let mut edges = Vec::with_capacity(edge_count);
        for e in edge_cursor..edge_end {
            let start = e * offsets.edge_width;
            let record = &raw.edges[start..start + offsets.edge_width];
            edges.push(decode_edge(record, &offsets, &edge_kinds_parsed, &raw.strings, node_total)?);
        }
        edge_cursor = edge_end;

        let value = match kind {
            NodeKind::Hidden => literal_value(name),
            _ => NodeValue::Label(name.to_string()),
        };

        nodes.push(HeapNode { index, kind, value, stable_id: record[offsets.node_id], edges });
    }

    if edge_cursor != edge_total {
        return Err(DecodeError::Layout(format!(
            "{} edges are not owned by any node",
            edge_total - edge_cursor
        )));
    }

    resolve_numeric_values(&mut nodes);

    debug!(nodes = nodes.len(), edges = edge_total, strings = raw.strings.len(), "Decoded heap snapshot");

    let layout = FieldLayout {
        node_fields: meta.node_fields.clone(),
        edge_fields: meta.edge_fields.clone(),
        node_kinds,
        edge_kinds,
    };
    Ok(DecodedSnapshot::new(nodes, layout, raw.strings.len()))
}

fn decode_edge(
    record: &[u64],
    offsets: &Offsets,
    edge_kinds: &[EdgeKind],
    strings: &[String],
    node_total: usize,
) -> Result<HeapEdge, DecodeError> {
    let kind = lookup(edge_kinds, record[offsets.edge_type], "edge_types")?.clone();
    let name_or_index = record[offsets.edge_name];
    let label = if kind.is_indexed() {
        name_or_index.to_string()
    } else {
        lookup(strings, name_or_index, "strings")?.clone()
    };

    let to_node = record[offsets.edge_to];
    let width = offsets.node_width as u64;
    if to_node % width != 0 {
        return Err(DecodeError::Layout(format!(
            "edge target offset {to_node} is not aligned to the node record width {width}"
        )));
    }
    let target = (to_node / width) as usize;
    if target >= node_total {
        return Err(DecodeError::IndexOutOfRange { table: "nodes", index: target as u64, len: node_total });
    }

    Ok(HeapEdge { kind, label, target })
}

fn kind_enumeration(
    types: &[Value],
    offset: usize,
    missing: &'static str,
) -> Result<Vec<String>, DecodeError> {
    let values = types.get(offset).and_then(Value::as_array).ok_or(DecodeError::MissingField(missing))?;
    values
        .iter()
        .map(|v| v.as_str().map(str::to_string).ok_or(DecodeError::MissingField(missing)))
        .collect()
}

fn check_declared(field: &str, declared: Option<usize>, actual: usize) -> Result<(), DecodeError> {
    match declared {
        Some(declared) if declared != actual => Err(DecodeError::Layout(format!(
            "declared {field} {declared} does not match the {actual} records present"
        ))),
        _ => Ok(()),
    }
}

fn lookup<'a, T>(table: &'a [T], index: u64, name: &'static str) -> Result<&'a T, DecodeError> {
    usize::try_from(index)
        .ok()
        .and_then(|i| table.get(i))
        .ok_or(DecodeError::IndexOutOfRange { table: name, index, len: table.len() })
}

fn literal_value(name: &str) -> NodeValue {
    match name {
        "true" => NodeValue::Bool(true),
        "false" => NodeValue::Bool(false),
        "null" => NodeValue::Null,
        "undefined" => NodeValue::Undefined,
        other => NodeValue::Label(other.to_string()),
    }
}

/// Replaces the labels of number and bigint nodes by the value their `value` edge points at.
fn resolve_numeric_values(nodes: &mut [HeapNode]) {
    let resolved: Vec<(usize, NodeValue)> = nodes
        .iter()
        .filter(|node| matches!(node.kind, NodeKind::Number | NodeKind::BigInt))
        .filter_map(|node| {
            let edge = node
                .edges
                .iter()
                .find(|e| {
                    e.label == "value" && matches!(e.kind, EdgeKind::Internal | EdgeKind::Shortcut)
                })
                .or_else(|| node.edges.iter().find(|e| e.label == "value"))?;
            let text = match &nodes[edge.target] {
                target if target.kind == NodeKind::String => target.name(),
                _ => return None,
            };

            let value = match node.kind {
                NodeKind::Number => number_value(text),
                _ => bigint_value(text),
            };
            Some((node.index, value))
        })
        .collect();

    for (index, value) in resolved {
        nodes[index].value = value;
    }
}

fn number_value(text: &str) -> NodeValue {
    match text {
        "NaN" => NodeValue::Number(f64::NAN),
        "Infinity" => NodeValue::Number(f64::INFINITY),
        "-Infinity" => NodeValue::Number(f64::NEG_INFINITY),
        other => parse_js_number(other).map_or(NodeValue::Absent, NodeValue::Number),
    }
}

pub(crate) fn bigint_value(text: &str) -> NodeValue {
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    if !digits.bytes().all(|b| b.is_ascii_digit()) || (digits.is_empty() && trimmed != digits) {
        return NodeValue::BigInt(format!("{text}n"));
    }

    let canonical = digits.trim_start_matches('0');
    if canonical.is_empty() {
        NodeValue::BigInt("0".to_string())
    } else if negative {
        NodeValue::BigInt(format!("-{canonical}"))
    } else {
        NodeValue::BigInt(canonical.to_string())
    }
}
