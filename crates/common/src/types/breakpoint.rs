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

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// A source breakpoint in a debuggee script with an optional condition.
/// The condition is a script expression evaluated by the debuggee on every hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Breakpoint {
    /// The location where the breakpoint is set.
    pub location: ScriptLocation,
    /// Optional condition expression that must evaluate to true for the breakpoint to trigger.
    pub condition: Option<String>,
}

impl Display for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.location)?;
        if let Some(cond) = &self.condition {
            write!(f, " if {cond}")?;
        }
        Ok(())
    }
}

impl Breakpoint {
    /// Creates a new breakpoint with the given location and optional condition.
    pub fn new(location: ScriptLocation, condition: Option<String>) -> Self {
        Self { location, condition }
    }
}

/// A position inside a parsed script, in the protocol's `Debugger.Location` shape.
///
/// Line and column numbers are 0-based on the wire. [`Display`] renders them 1-based, like
/// every editor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ScriptLocation {
    /// Identifier of the script as reported by `Debugger.scriptParsed`.
    pub script_id: String,
    /// 0-based line number.
    pub line_number: u32,
    /// 0-based column number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u32>,
}

impl ScriptLocation {
    /// Creates a location from 0-based coordinates.
    pub fn new(script_id: impl Into<String>, line_number: u32, column_number: Option<u32>) -> Self {
        Self { script_id: script_id.into(), line_number, column_number }
    }

    /// 1-based line number for display.
    pub fn display_line(&self) -> u32 {
        self.line_number.saturating_add(1)
    }

    /// 1-based column number for display.
    pub fn display_column(&self) -> Option<u32> {
        self.column_number.map(|c| c.saturating_add(1))
    }
}

impl Display for ScriptLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.script_id, self.display_line())?;
        if let Some(column) = self.display_column() {
            write!(f, ":{column}")?;
        }
        Ok(())
    }
}
