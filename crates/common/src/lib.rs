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

//! Heapscope Common - Shared functionality for heapscope components
//!
//! This crate provides shared utilities used by both the heapscope binary
//! and the engine crate, including logging, configuration and breakpoint types.

/// Common types shared between the engine and its front ends
pub mod types;

/// Configuration file handling for search, BDHS and debugger defaults
pub mod config;
/// Environment variable names recognised by heapscope
pub mod env;
/// Logging setup and utilities for consistent logging across heapscope components
pub mod logging;

pub use config::*;
pub use logging::*;
