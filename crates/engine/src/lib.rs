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

//! Heapscope engine - heap snapshot analysis and breakpoint-driven heap search
//!
//! The engine talks to a JavaScript debuggee over the Chrome DevTools Protocol. It decodes heap
//! snapshots into a node arena, materializes and searches objects in them, reconstructs access
//! paths, scores structural similarity, and drives the debugger to find the code location where
//! a value first appears in the heap.

/// Error types of the engine
pub mod error;
pub use error::*;

/// JavaScript value model used for materialized objects
pub mod value;
pub use value::*;

/// Transport capability, WebSocket client, target discovery and the mock debuggee
pub mod transport;
pub use transport::*;

/// Heap snapshot model, decoder and capture
pub mod snapshot;
pub use snapshot::*;

/// Object materialization and access path reconstruction
pub mod inspector;
pub use inspector::*;

/// SimHash and key-overlap similarity
pub mod similarity;
pub use similarity::*;

/// Heap search
pub mod search;
pub use search::*;

/// Protocol-level debugger wrapper
pub mod debugger;
pub use debugger::*;

/// Breakpoint-driven heap search
pub mod bdhs;
pub use bdhs::*;

/// Debugging session
pub mod session;
pub use session::*;

/// Synthetic snapshots for tests
pub mod test_utils;
