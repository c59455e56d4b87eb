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

//! Command modules for the heapscope CLI

use eyre::{eyre, Result};
use heapscope_common::Config;
use heapscope_engine::{discover_targets, first_page, Session, WsTransport};
use serde::Serialize;
use tracing::info;

use crate::Cli;

pub mod capture;
pub mod expose;
pub mod live;
pub mod search;
pub mod targets;
pub mod trace;

pub use capture::{capture, CaptureArgs};
pub use expose::{expose, ExposeArgs};
pub use live::{live, LiveArgs};
pub use search::{search, SearchArgs};
pub use targets::list_targets;
pub use trace::{trace, TraceArgs};

/// Attaches to `--ws-url`, or to the first page listed by `--endpoint`.
pub async fn connect(cli: &Cli, config: Config) -> Result<Session<WsTransport>> {
    let url = match &cli.ws_url {
        Some(url) => url.clone(),
        None => {
            let targets = discover_targets(&cli.endpoint).await?;
            let page = first_page(&targets)
                .ok_or_else(|| eyre!("No attachable page at {}; pass --ws-url", cli.endpoint))?;
            info!(title = %page.title, url = %page.url, "Using first page target");
            page.web_socket_debugger_url.clone().unwrap_or_default()
        }
    };
    Ok(Session::attach(&url, config).await?)
}

/// Prints `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
