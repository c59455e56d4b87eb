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

//! Live-object search command

use clap::Args;
use eyre::Result;
use heapscope_common::Config;
use heapscope_engine::LiveSearchRequest;

use super::{connect, print_json};
use crate::Cli;

/// Arguments of `live`
#[derive(Debug, Args)]
pub struct LiveArgs {
    /// Substring of an own property name
    #[arg(long)]
    pub property: Option<String>,

    /// Substring of an own property value
    #[arg(long)]
    pub value: Option<String>,

    /// Substring of the class name
    #[arg(long = "class")]
    pub class_name: Option<String>,

    /// Maximum number of results
    #[arg(long, default_value_t = 100)]
    pub max_results: usize,
}

/// Searches the objects alive in the page
pub async fn live(cli: &Cli, config: Config, args: &LiveArgs) -> Result<()> {
    let request = LiveSearchRequest {
        property: args.property.clone(),
        value: args.value.clone(),
        class_name: args.class_name.clone(),
        max_results: args.max_results,
    };

    let session = connect(cli, config).await?;
    let objects = session.search_live_objects(&request).await;
    session.detach().await?;
    print_json(&objects?)
}
