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

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{decode, DecodedSnapshot, RawHeapSnapshot};
use crate::{Result, Transport};

const CHUNK_EVENT: &str = "HeapProfiler.addHeapSnapshotChunk";

/// Takes a heap snapshot of the debuggee and returns its JSON text.
///
/// Chunks are pushed as events before the command's response, so they are all buffered in
/// the subscription by the time `takeHeapSnapshot` resolves.
pub async fn capture_snapshot_text<T: Transport>(transport: &T) -> Result<String> {
    transport.send("HeapProfiler.enable", json!({})).await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = transport.subscribe(CHUNK_EVENT, tx);
    let taken = transport
        .send(
            "HeapProfiler.takeHeapSnapshot",
            json!({ "reportProgress": false, "captureNumericValue": true }),
        )
        .await;
    transport.unsubscribe(subscription);
    taken?;

    let mut text = String::new();
    let mut chunks = 0usize;
    while let Ok(event) = rx.try_recv() {
        match event.params.get("chunk").and_then(|c| c.as_str()) {
            Some(chunk) => text.push_str(chunk),
            None => warn!("Snapshot chunk event without chunk text"),
        }
        chunks += 1;
    }

    transport.send("HeapProfiler.disable", json!({})).await?;
    debug!(chunks, bytes = text.len(), "Captured heap snapshot");
    Ok(text)
}

/// Takes a heap snapshot of the debuggee and parses it.
pub async fn capture_snapshot<T: Transport>(transport: &T) -> Result<RawHeapSnapshot> {
    let text = capture_snapshot_text(transport).await?;
    Ok(RawHeapSnapshot::from_json(&text)?)
}

/// Takes a heap snapshot of the debuggee and decodes it.
pub async fn capture_and_decode<T: Transport>(transport: &T) -> Result<DecodedSnapshot> {
    let raw = capture_snapshot(transport).await?;
    Ok(decode(&raw)?)
}
