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

//! Heapscope - Heap Origin Tracer
//!
//! Attaches to a JavaScript debuggee over the Chrome DevTools Protocol, searches its heap and
//! traces the code location where a value first appears.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::Result;
use heapscope_common::{init_logging, Config};

mod cmd;

/// Command-line interface for heapscope
#[derive(Debug, Parser)]
#[command(name = "heapscope")]
#[command(about = "Heapscope - trace where a value first appears in a JavaScript heap")]
#[command(version)]
pub struct Cli {
    /// WebSocket debugger URL of the debuggee (defaults to the first page of --endpoint)
    #[arg(long, env = "HEAPSCOPE_WS_URL", global = true)]
    pub ws_url: Option<String>,

    /// HTTP endpoint of a browser started with --remote-debugging-port
    #[arg(long, default_value = "localhost:9222", global = true)]
    pub endpoint: String,

    /// Configuration file (default: $HEAPSCOPE_CONFIG or ~/.heapscope.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level (repeat for more: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the debuggable targets of the browser endpoint
    Targets,
    /// Take a heap snapshot
    Capture(cmd::CaptureArgs),
    /// Search the heap snapshot
    Search(cmd::SearchArgs),
    /// Search objects alive in the page
    Live(cmd::LiveArgs),
    /// Trace the code location where a value first appears (breakpoint-driven heap search)
    Trace(cmd::TraceArgs),
    /// Expose an object to the page as a global variable
    Expose(cmd::ExposeArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    // Set RUST_LOG based on verbosity
    if std::env::var("RUST_LOG").is_err() {
        let level = match cli.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        std::env::set_var("RUST_LOG", level);
    }
    init_logging("heapscope", false)?;

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match &cli.command {
        Commands::Targets => cmd::list_targets(&cli).await,
        Commands::Capture(args) => cmd::capture(&cli, config, args).await,
        Commands::Search(args) => cmd::search(&cli, config, args).await,
        Commands::Live(args) => cmd::live(&cli, config, args).await,
        Commands::Trace(args) => cmd::trace(&cli, config, args).await,
        Commands::Expose(args) => cmd::expose(&cli, config, args).await,
    }
}
