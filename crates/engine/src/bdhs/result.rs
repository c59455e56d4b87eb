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

use serde::Serialize;
use tracing::warn;

use super::StepTracker;
use crate::{Debugger, SearchResultItem, Transport};

/// A unique code location in the reported window.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginFrame {
    /// Executing function, empty for anonymous ones
    pub function_name: String,
    /// 1-based line of the function start (or of the pause when unknown)
    pub line_number: u32,
    /// 1-based column
    pub column_number: u32,
    /// Script identifier
    pub script_id: String,
    /// Script URL when the script was seen
    pub file: Option<String>,
    /// Script source when it could be fetched
    pub script_source: Option<String>,
    /// This is the step where the target first appeared
    pub is_first_match: bool,
    /// Heap matches at this step
    pub heap_matches: Vec<SearchResultItem>,
}

/// Outcome payload of a successful run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BdhsResult {
    /// Unique locations, newest first
    pub frames: Vec<OriginFrame>,
    /// History index of the first match
    pub first_match_index: Option<usize>,
    /// Pauses handled
    pub steps: usize,
}

/// Builds the result from the newest `before + after + 1` history entries.
pub async fn assemble_result<T: Transport>(debugger: &Debugger<T>, tracker: &StepTracker) -> BdhsResult {
    let mut frames: Vec<OriginFrame> = Vec::new();

    for (index, entry) in tracker.window() {
        let Some(top) = entry.call_frames.first() else { continue };
        let location = top.origin_location();
        let line_number = location.line_number + 1;
        let column_number = location.column_number.unwrap_or(0) + 1;
        let file = debugger.script_url(&location.script_id);

        if frames
            .iter()
            .any(|f| f.line_number == line_number && f.column_number == column_number && f.file == file)
        {
            continue;
        }

        let script_source = match debugger.script_source(&location.script_id).await {
            Ok(source) => Some(source),
            Err(e) => {
                warn!(script_id = %location.script_id, "Failed to fetch script source: {e}");
                None
            }
        };

        frames.push(OriginFrame {
            function_name: top.function_name.clone(),
            line_number,
            column_number,
            script_id: location.script_id.clone(),
            file,
            script_source,
            is_first_match: tracker.first_match_index() == Some(index),
            heap_matches: entry.matches.clone(),
        });
    }

    BdhsResult { frames, first_match_index: tracker.first_match_index(), steps: tracker.step() }
}
