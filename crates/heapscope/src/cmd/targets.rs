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

//! Target listing command

use eyre::Result;
use heapscope_engine::discover_targets;

use super::print_json;
use crate::Cli;

/// Lists the targets of `--endpoint`
pub async fn list_targets(cli: &Cli) -> Result<()> {
    tracing::info!("Listing targets of {}", cli.endpoint);
    let targets = discover_targets(&cli.endpoint).await?;
    print_json(&targets)
}
