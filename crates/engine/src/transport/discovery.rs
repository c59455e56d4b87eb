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

//! Target discovery through the debuggee's HTTP endpoint (`/json/list`).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ProtocolError;

/// A debuggable target as listed by the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    /// Target identifier
    pub id: String,
    /// Target type (`page`, `service_worker`, `iframe`, ...)
    #[serde(rename = "type")]
    pub kind: String,
    /// Document title
    #[serde(default)]
    pub title: String,
    /// Document URL
    #[serde(default)]
    pub url: String,
    /// WebSocket URL to attach to; absent while another client is attached
    #[serde(default)]
    pub web_socket_debugger_url: Option<String>,
}

impl TargetInfo {
    /// Whether the target is a page that can be attached to.
    pub fn is_attachable_page(&self) -> bool {
        self.kind == "page" && self.web_socket_debugger_url.is_some()
    }
}

/// Lists the targets of a browser started with `--remote-debugging-port`.
///
/// `endpoint` is `host:port` or a full `http://` URL.
pub async fn discover_targets(endpoint: &str) -> Result<Vec<TargetInfo>, ProtocolError> {
    let url = list_url(endpoint);
    debug!(%url, "Listing debuggee targets");

    let response = reqwest::get(&url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| ProtocolError::Transport(format!("failed to query {url}: {e}")))?;

    response
        .json::<Vec<TargetInfo>>()
        .await
        .map_err(|e| ProtocolError::MalformedFrame(format!("invalid target list: {e}")))
}

/// First attachable page target, if any.
pub fn first_page(targets: &[TargetInfo]) -> Option<&TargetInfo> {
    targets.iter().find(|t| t.is_attachable_page())
}

fn list_url(endpoint: &str) -> String {
    let base = endpoint.trim_end_matches('/');
    if base.starts_with("http://") || base.starts_with("https://") {
        format!("{base}/json/list")
    } else {
        format!("http://{base}/json/list")
    }
}
