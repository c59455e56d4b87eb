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

//! Snapshot capture command

use std::path::PathBuf;

use clap::Args;
use eyre::Result;
use heapscope_common::Config;
use heapscope_engine::{capture_snapshot_text, decode, RawHeapSnapshot, SnapshotSummary};
use tracing::info;

use super::{connect, print_json};
use crate::Cli;

/// Arguments of `capture`
#[derive(Debug, Args)]
pub struct CaptureArgs {
    /// Write the snapshot JSON to this file
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

/// Takes a heap snapshot and prints its size
pub async fn capture(cli: &Cli, config: Config, args: &CaptureArgs) -> Result<()> {
    let session = connect(cli, config).await?;

    let summary = match &args.output {
        Some(path) => {
            let text = capture_snapshot_text(session.transport().as_ref()).await?;
            std::fs::write(path, &text)?;
            info!("Snapshot written to {}", path.display());
            let graph = decode(&RawHeapSnapshot::from_json(&text)?)?;
            SnapshotSummary { node_count: graph.len(), string_count: graph.string_count() }
        }
        None => session.capture_snapshot().await?,
    };

    session.detach().await?;
    print_json(&summary)
}
