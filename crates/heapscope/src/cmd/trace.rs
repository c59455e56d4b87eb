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

//! Breakpoint-driven heap search command
//!
//! Arms the click breakpoint, then streams the run's signals as JSON lines until the run ends
//! or Ctrl-C aborts it.

use clap::Args;
use eyre::Result;
use heapscope_common::Config;
use heapscope_engine::{BdhsOutcome, BdhsRequest, BdhsSignal};
use tracing::{info, warn};

use super::{connect, print_json, search::CriterionArgs};
use crate::Cli;

/// Arguments of `trace`
#[derive(Debug, Args)]
pub struct TraceArgs {
    #[command(flatten)]
    pub criterion: CriterionArgs,

    /// History entries reported before the first match (default from config)
    #[arg(long)]
    pub before: Option<usize>,

    /// Steps the target may persist after it first appears (default from config)
    #[arg(long)]
    pub after: Option<usize>,

    /// Pause budget of the run (default from config)
    #[arg(long)]
    pub max_steps: Option<usize>,
}

/// Runs BDHS against the debuggee
pub async fn trace(cli: &Cli, config: Config, args: &TraceArgs) -> Result<()> {
    let request = BdhsRequest {
        criterion: args.criterion.to_criterion(&config)?,
        tolerance_before: args.before,
        tolerance_after: args.after,
        max_steps: args.max_steps,
    };

    let session = connect(cli, config).await?;
    let mut signals = session.start_bdhs(&request).await?;
    eprintln!("Armed. Click in the page to start tracing (Ctrl-C to abort).");

    let mut interrupted = false;
    loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                Some(signal) => {
                    println!("{}", serde_json::to_string(&signal)?);
                    if matches!(signal, BdhsSignal::Completed { .. }) {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, aborting the run");
                interrupted = true;
                break;
            }
        }
    }

    let outcome = if interrupted { session.stop_bdhs().await } else { session.wait_bdhs().await };
    session.detach().await?;

    match outcome {
        Ok(outcome) => {
            if matches!(outcome, BdhsOutcome::NotFound) {
                warn!("The target never appeared in the heap");
            }
            print_json(&outcome)
        }
        Err(e) => Err(e.into()),
    }
}
