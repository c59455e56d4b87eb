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

//! Snapshot search command

use std::path::{Path, PathBuf};

use clap::Args;
use eyre::Result;
use heapscope_common::Config;
use heapscope_engine::{
    decode, materialize, RawHeapSnapshot, SearchCriterion, SearchReport, SimilaritySpec, SnapshotSearchRequest,
    TextQuery,
};
use tracing::info;

use super::{connect, print_json};
use crate::Cli;

/// Heap search criterion flags, shared by `search` and `trace`
#[derive(Debug, Clone, Args)]
pub struct CriterionArgs {
    /// Pattern matched against property names
    #[arg(long)]
    pub property: Option<String>,

    /// Pattern matched against property values and strings
    #[arg(long)]
    pub value: Option<String>,

    /// Pattern matched against class names
    #[arg(long = "class")]
    pub class_name: Option<String>,

    /// Interpret the patterns as regular expressions
    #[arg(long)]
    pub regex: bool,

    /// Match case
    #[arg(long)]
    pub case_sensitive: bool,

    /// Reference JSON value for structural similarity
    #[arg(long)]
    pub similar: Option<String>,

    /// Minimum similarity in [0, 1] (default from config)
    #[arg(long, requires = "similar")]
    pub threshold: Option<f64>,

    /// SimHash weight in [0, 1] (default from config)
    #[arg(long, requires = "similar")]
    pub alpha: Option<f64>,

    /// Let leading value text take part in similarity features
    #[arg(long, requires = "similar")]
    pub include_values: bool,
}

impl CriterionArgs {
    /// Builds the engine criterion, filling similarity defaults from `config`.
    pub fn to_criterion(&self, config: &Config) -> Result<SearchCriterion> {
        let query = |pattern: &Option<String>| {
            pattern.as_ref().map(|p| TextQuery {
                pattern: p.clone(),
                regex: self.regex,
                case_sensitive: self.case_sensitive,
            })
        };

        let similarity = self
            .similar
            .as_deref()
            .map(|text| {
                SimilaritySpec::from_json_text(
                    text,
                    self.threshold.unwrap_or(config.search.similarity_threshold),
                    self.alpha.unwrap_or(config.search.similarity_alpha),
                    self.include_values,
                )
            })
            .transpose()?;

        Ok(SearchCriterion {
            property: query(&self.property),
            value: query(&self.value),
            class_name: query(&self.class_name),
            similarity,
        })
    }
}

/// Arguments of `search`
#[derive(Debug, Args)]
pub struct SearchArgs {
    #[command(flatten)]
    pub criterion: CriterionArgs,

    /// Maximum number of results (default from config)
    #[arg(long)]
    pub max_results: Option<usize>,

    /// Search a saved snapshot file instead of the debuggee
    #[arg(long)]
    pub snapshot: Option<PathBuf>,
}

/// Searches a saved snapshot, or a fresh one from the debuggee
pub async fn search(cli: &Cli, config: Config, args: &SearchArgs) -> Result<()> {
    let criterion = args.criterion.to_criterion(&config)?;

    let report = match &args.snapshot {
        Some(path) => search_file(path, &criterion, args.max_results, &config)?,
        None => {
            let session = connect(cli, config).await?;
            let request = SnapshotSearchRequest { criterion, max_results: args.max_results };
            let report = session.search_snapshot(&request).await;
            session.detach().await?;
            report?
        }
    };

    info!("{} matches", report.total_matches);
    print_json(&report)
}

fn search_file(
    path: &Path,
    criterion: &SearchCriterion,
    max_results: Option<usize>,
    config: &Config,
) -> Result<SearchReport> {
    let compiled = criterion.compile()?.with_max_depth(config.inspect.max_depth);

    info!("Loading snapshot from {}", path.display());
    let graph = decode(&RawHeapSnapshot::from_path(path)?)?;

    let hits = compiled.scan(&graph, max_results.unwrap_or(config.search.max_results));
    let results = materialize(&graph, hits, compiled.max_depth());
    Ok(SearchReport { total_matches: results.len(), results })
}
