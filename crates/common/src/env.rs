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

//! Environment variable name constants for heapscope configuration.
//!
//! These constants are the single source of truth for environment variable names.
//!
//! # Environment Variables
//!
//! - [`HEAPSCOPE_CONFIG`] - Overrides the configuration file location
//! - [`HEAPSCOPE_WS_URL`] - Default WebSocket debugger URL of the debuggee

/// Environment variable for specifying the configuration file.
///
/// When not set, heapscope reads `~/.heapscope.toml` and writes a default file there
/// if it does not exist yet.
///
/// # Examples
///
/// ```bash
/// HEAPSCOPE_CONFIG=/tmp/heapscope.toml heapscope capture
/// ```
pub const HEAPSCOPE_CONFIG: &str = "HEAPSCOPE_CONFIG";

/// Environment variable holding the WebSocket debugger URL of the debuggee.
///
/// This is the `webSocketDebuggerUrl` reported by the target list endpoint of a browser
/// started with `--remote-debugging-port`.
///
/// # Related
///
/// Also available as the `--ws-url` CLI argument, which takes precedence.
pub const HEAPSCOPE_WS_URL: &str = "HEAPSCOPE_WS_URL";
