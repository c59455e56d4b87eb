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

//! Heap search by property, value, class and structural similarity.
//!
//! A [`SearchCriterion`] is compiled before the scan starts, so invalid patterns and
//! similarity parameters are reported without touching the graph. The scan is a single pass
//! over the node arena in decode order that stops at the result cap.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    build_path, inspect, root_class_label, ClassAnnotation, DecodedSnapshot, HeapscopeError,
    InspectedObject, JsValue, NodeKind, ObjectSimilarity, Result, DEFAULT_MAX_DEPTH,
};

/// A text query. An empty pattern matches everything and is treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextQuery {
    /// Substring or regular expression
    pub pattern: String,
    /// Interpret `pattern` as a regular expression
    #[serde(default)]
    pub regex: bool,
    /// Match case
    #[serde(default)]
    pub case_sensitive: bool,
}

impl TextQuery {
    /// Case-insensitive substring query.
    pub fn substring(pattern: impl Into<String>) -> Self {
        Self { pattern: pattern.into(), regex: false, case_sensitive: false }
    }

    /// Case-insensitive regular expression query.
    pub fn regex(pattern: impl Into<String>) -> Self {
        Self { pattern: pattern.into(), regex: true, case_sensitive: false }
    }

    /// Same query, matching case.
    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }

    fn compile(&self) -> Result<Option<TextMatcher>> {
        if self.pattern.is_empty() {
            return Ok(None);
        }

        let matcher = if self.regex {
            let regex = RegexBuilder::new(&self.pattern)
                .case_insensitive(!self.case_sensitive)
                .build()
                .map_err(|source| HeapscopeError::InvalidPattern { pattern: self.pattern.clone(), source })?;
            TextMatcher::Regex(regex)
        } else if self.case_sensitive {
            TextMatcher::Substring(self.pattern.clone())
        } else {
            TextMatcher::SubstringIgnoreCase(self.pattern.to_lowercase())
        };
        Ok(Some(matcher))
    }
}

#[derive(Debug, Clone)]
enum TextMatcher {
    Substring(String),
    SubstringIgnoreCase(String),
    Regex(Regex),
}

impl TextMatcher {
    fn matches(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        match self {
            Self::Substring(needle) => text.contains(needle.as_str()),
            Self::SubstringIgnoreCase(needle) => text.to_lowercase().contains(needle.as_str()),
            Self::Regex(regex) => regex.is_match(text),
        }
    }
}

/// Structural similarity criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilaritySpec {
    /// Reference value, as JSON
    pub reference: serde_json::Value,
    /// Minimum hybrid similarity in `[0, 1]`
    pub threshold: f64,
    /// SimHash weight in `[0, 1]`
    pub alpha: f64,
    /// Whether leading value text takes part in the features
    #[serde(default)]
    pub include_values: bool,
}

impl SimilaritySpec {
    /// Builds a criterion from reference JSON text.
    pub fn from_json_text(text: &str, threshold: f64, alpha: f64, include_values: bool) -> Result<Self> {
        let reference = serde_json::from_str(text)
            .map_err(|e| HeapscopeError::SimilaritySpec(format!("reference is not valid JSON: {e}")))?;
        Ok(Self { reference, threshold, alpha, include_values })
    }

    fn compile(&self) -> Result<CompiledSimilarity> {
        for (name, value) in [("threshold", self.threshold), ("alpha", self.alpha)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(HeapscopeError::SimilaritySpec(format!("{name} must be within [0, 1], got {value}")));
            }
        }
        Ok(CompiledSimilarity {
            reference: JsValue::from(self.reference.clone()),
            threshold: self.threshold,
            alpha: self.alpha,
            scorer: ObjectSimilarity::new(self.include_values),
        })
    }
}

#[derive(Debug, Clone)]
struct CompiledSimilarity {
    reference: JsValue,
    threshold: f64,
    alpha: f64,
    scorer: ObjectSimilarity,
}

/// What to look for. Every active part must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCriterion {
    /// Matches the label of an outgoing edge
    #[serde(default)]
    pub property: Option<TextQuery>,
    /// Matches the rendered value of a direct child, or a string node's text
    #[serde(default)]
    pub value: Option<TextQuery>,
    /// Matches the object's class label
    #[serde(default)]
    pub class_name: Option<TextQuery>,
    /// Structural similarity to a reference value
    #[serde(default)]
    pub similarity: Option<SimilaritySpec>,
}

impl SearchCriterion {
    /// Validates and compiles the criterion.
    pub fn compile(&self) -> Result<CompiledCriterion> {
        let compile = |q: &Option<TextQuery>| q.as_ref().map(TextQuery::compile).transpose().map(Option::flatten);
        Ok(CompiledCriterion {
            property: compile(&self.property)?,
            value: compile(&self.value)?,
            class_name: compile(&self.class_name)?,
            similarity: self.similarity.as_ref().map(SimilaritySpec::compile).transpose()?,
            max_depth: DEFAULT_MAX_DEPTH,
        })
    }
}

/// A validated criterion, ready to scan snapshots.
#[derive(Debug, Clone)]
pub struct CompiledCriterion {
    property: Option<TextMatcher>,
    value: Option<TextMatcher>,
    class_name: Option<TextMatcher>,
    similarity: Option<CompiledSimilarity>,
    max_depth: usize,
}

/// A node satisfying a criterion.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// Index of the node
    pub index: usize,
    /// Similarity score when similarity was requested
    pub similarity: Option<f64>,
    /// Materialization computed for similarity scoring, reused for the result payload
    pub inspected: Option<InspectedObject>,
}

/// Search result payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultItem {
    /// Materialized value
    pub value: JsValue,
    /// Class of the value
    pub class_name: String,
    /// Classes of nested objects
    pub class_annotations: Vec<ClassAnnotation>,
    /// Expression reaching the value from a global root
    pub path: Option<String>,
    /// Similarity score when similarity was requested
    pub similarity: Option<f64>,
    /// Snapshot object id of the node
    pub node_id: u64,
}

impl CompiledCriterion {
    /// Overrides the materialization depth used for similarity scoring.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Materialization depth used by this criterion.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Scans `graph` and returns at most `max_results` hits in decode order.
    pub fn scan(&self, graph: &DecodedSnapshot, max_results: usize) -> Vec<SearchHit> {
        let mut hits = Vec::new();
        if max_results == 0 {
            return hits;
        }

        for node in graph.nodes() {
            let hit = match node.kind {
                NodeKind::String => self
                    .value
                    .as_ref()
                    .filter(|v| v.matches(node.name()))
                    .map(|_| SearchHit { index: node.index, similarity: None, inspected: None }),
                NodeKind::Object => self.match_object(graph, node.index),
                _ => None,
            };

            if let Some(hit) = hit {
                hits.push(hit);
                if hits.len() >= max_results {
                    break;
                }
            }
        }

        debug!(hits = hits.len(), max_results, "Snapshot scan finished");
        hits
    }

    fn match_object(&self, graph: &DecodedSnapshot, index: usize) -> Option<SearchHit> {
        let node = graph.node(index)?;

        if let Some(class_name) = &self.class_name {
            if !class_name.matches(root_class_label(node)) {
                return None;
            }
        }

        let mut key_match = self.property.is_none();
        let mut value_match = self.value.is_none();
        for edge in &node.edges {
            if !key_match {
                key_match = self.property.as_ref().is_some_and(|p| p.matches(&edge.label));
            }
            if !value_match {
                value_match = match (&self.value, graph.node(edge.target)) {
                    (Some(v), Some(child)) => v.matches(&child.value.to_string()),
                    _ => false,
                };
            }
            if key_match && value_match {
                break;
            }
        }
        if !(key_match && value_match) {
            return None;
        }

        let Some(similarity) = &self.similarity else {
            return Some(SearchHit { index, similarity: None, inspected: None });
        };

        let inspected = inspect(graph, index, self.max_depth);
        let score = similarity.scorer.hybrid_similarity(&inspected.value, &similarity.reference, similarity.alpha);
        (score >= similarity.threshold).then_some(SearchHit {
            index,
            similarity: Some(score),
            inspected: Some(inspected),
        })
    }
}

/// Compiles `criterion` and scans `graph`.
pub fn search(graph: &DecodedSnapshot, criterion: &SearchCriterion, max_results: usize) -> Result<Vec<SearchHit>> {
    Ok(criterion.compile()?.scan(graph, max_results))
}

/// Builds result payloads for `hits`: value, classes, access path, score and node id.
pub fn materialize(graph: &DecodedSnapshot, hits: Vec<SearchHit>, max_depth: usize) -> Vec<SearchResultItem> {
    let reverse = graph.reverse_index();
    hits.into_iter()
        .filter_map(|hit| {
            let node = graph.node(hit.index)?;
            let inspected = hit.inspected.unwrap_or_else(|| inspect(graph, hit.index, max_depth));
            Some(SearchResultItem {
                value: inspected.value,
                class_name: inspected.class_name,
                class_annotations: inspected.class_annotations,
                path: build_path(graph, reverse, hit.index),
                similarity: hit.similarity,
                node_id: node.stable_id,
            })
        })
        .collect()
}
