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

//! Expose command

use clap::{ArgGroup, Args};
use eyre::Result;
use heapscope_common::Config;
use heapscope_engine::ExposeTarget;

use super::connect;
use crate::Cli;

/// Arguments of `expose`
#[derive(Debug, Args)]
#[command(group(ArgGroup::new("target").required(true).args(["object_id", "node_id"])))]
pub struct ExposeArgs {
    /// Remote object id, as printed by `live`
    #[arg(long)]
    pub object_id: Option<String>,

    /// Heap snapshot node id, as printed by `search`
    #[arg(long)]
    pub node_id: Option<u64>,

    /// Global variable name
    #[arg(long, default_value = "temp1")]
    pub name: String,
}

/// Assigns an object to `window[name]` in the page
pub async fn expose(cli: &Cli, config: Config, args: &ExposeArgs) -> Result<()> {
    let target = match (&args.object_id, args.node_id) {
        (Some(object_id), _) => ExposeTarget::Remote(object_id.clone()),
        (None, Some(node_id)) => ExposeTarget::HeapNode(node_id),
        (None, None) => eyre::bail!("either --object-id or --node-id is required"),
    };

    let session = connect(cli, config).await?;
    let exposed = session.expose_object(&target, &args.name).await;
    session.detach().await?;
    println!("window.{}", exposed?);
    Ok(())
}
