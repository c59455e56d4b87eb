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

//! Wire frames and the subset of Chrome DevTools Protocol payloads the engine consumes.

use heapscope_common::types::ScriptLocation;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtocolError;

/// Command frame sent to the debuggee.
#[derive(Debug, Serialize)]
pub(crate) struct RequestFrame<'a> {
    pub id: u64,
    pub method: &'a str,
    pub params: &'a Value,
}

/// Any frame received from the debuggee: a command response or an event.
#[derive(Debug, Deserialize)]
pub(crate) struct IncomingFrame {
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<ErrorObject>,
    pub method: Option<String>,
    pub params: Option<Value>,
}

/// Error object of a failed command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Protocol error code
    pub code: i64,
    /// Human readable message
    pub message: String,
    /// Optional detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A frame of the paused call stack (`Debugger.CallFrame`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    /// Identifier usable with `Debugger.evaluateOnCallFrame`
    pub call_frame_id: String,
    /// Name of the executing function, empty for anonymous ones
    #[serde(default)]
    pub function_name: String,
    /// Start of the executing function
    #[serde(default)]
    pub function_location: Option<ScriptLocation>,
    /// Current position
    pub location: ScriptLocation,
    /// Script URL
    #[serde(default)]
    pub url: String,
}

impl CallFrame {
    /// Location used for origin reporting: the function start when known.
    pub fn origin_location(&self) -> &ScriptLocation {
        self.function_location.as_ref().unwrap_or(&self.location)
    }
}

/// Payload of `Debugger.paused`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PausedEvent {
    /// Call stack, innermost frame first
    pub call_frames: Vec<CallFrame>,
    /// Pause reason
    #[serde(default)]
    pub reason: String,
    /// Breakpoints that caused the pause
    #[serde(default)]
    pub hit_breakpoints: Vec<String>,
}

/// Payload of `Debugger.scriptParsed`, reduced to what the engine uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptParsedEvent {
    /// Script identifier
    pub script_id: String,
    /// Script URL, empty for inline and evaluated code
    #[serde(default)]
    pub url: String,
}

/// Mirror object referencing a debuggee value (`Runtime.RemoteObject`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    /// Value type (`object`, `function`, `string`, ...)
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Object subtype hint (`array`, `null`, `node`, ...)
    #[serde(default)]
    pub subtype: Option<String>,
    /// Constructor name for objects
    #[serde(default)]
    pub class_name: Option<String>,
    /// Primitive value
    #[serde(default)]
    pub value: Option<Value>,
    /// String representation
    #[serde(default)]
    pub description: Option<String>,
    /// Handle for further calls, absent for primitives
    #[serde(default)]
    pub object_id: Option<String>,
}

impl RemoteObject {
    /// Text used for matching: the primitive value, else the description.
    pub fn display_text(&self) -> String {
        match &self.value {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => self.description.clone().unwrap_or_default(),
        }
    }
}

/// Entry of `Runtime.getProperties`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    /// Property name
    pub name: String,
    /// Property value, absent for accessors
    #[serde(default)]
    pub value: Option<RemoteObject>,
}

/// Deserializes one field of a command result.
pub(crate) fn result_field<T: serde::de::DeserializeOwned>(
    method: &str,
    result: &Value,
    field: &'static str,
) -> Result<T, ProtocolError> {
    let value = result
        .get(field)
        .cloned()
        .ok_or_else(|| ProtocolError::UnexpectedResponse { method: method.to_string(), field })?;
    serde_json::from_value(value)
        .map_err(|e| ProtocolError::MalformedFrame(format!("{method}.{field}: {e}")))
}
