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

//! Structural similarity between materialized values.
//!
//! Two signals are blended:
//! - a 64-bit SimHash over structural features (type tags, key names, array lengths and,
//!   optionally, leading value text), compared by Hamming distance
//! - the Jaccard index of the top-level key sets
//!
//! Small objects lean on the key overlap, since a handful of features makes the SimHash noisy.

use crate::JsValue;

/// Width of the fingerprint.
pub const HASH_BITS: u32 = 64;

/// Default depth limit of feature extraction.
pub const DEFAULT_FEATURE_DEPTH: usize = 8;

const ARRAY_SAMPLE: usize = 5;
const VALUE_PREFIX_CHARS: usize = 50;
const SMALL_OBJECT_KEYS: f64 = 5.0;

/// Similarity scorer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectSimilarity {
    /// Whether leading value text takes part in the features
    pub include_values: bool,
}

impl ObjectSimilarity {
    /// Creates a scorer.
    pub fn new(include_values: bool) -> Self {
        Self { include_values }
    }

    /// Feature strings describing `value` under `prefix`.
    pub fn extract_features(&self, value: &JsValue, prefix: &str, depth: usize, max_depth: usize) -> Vec<String> {
        let mut features = Vec::new();
        self.collect_features(value, prefix, depth, max_depth, &mut features);
        features
    }

    fn collect_features(
        &self,
        value: &JsValue,
        prefix: &str,
        depth: usize,
        max_depth: usize,
        features: &mut Vec<String>,
    ) {
        if depth > max_depth {
            return;
        }

        match value {
            JsValue::Null | JsValue::Undefined => features.push(format!("{prefix}:null")),
            JsValue::String(_) | JsValue::Number(_) | JsValue::Bool(_) => {
                features.push(format!("{prefix}:{}", value.type_name()));
                if self.include_values {
                    let text: String = value.to_string().chars().take(VALUE_PREFIX_CHARS).collect();
                    features.push(format!("{prefix}={text}"));
                }
            }
            JsValue::Array(items) => {
                features.push(format!("{prefix}:array"));
                features.push(format!("{prefix}:array:len{}", items.len()));
                let element_prefix = format!("{prefix}[*]");
                for item in items.iter().take(ARRAY_SAMPLE) {
                    self.collect_features(item, &element_prefix, depth + 1, max_depth, features);
                }
            }
            JsValue::Object(entries) => {
                features.push(format!("{prefix}:object"));
                features.push(format!("{prefix}:keys:{}", entries.len()));
                for (key, child) in entries {
                    let key_prefix = format!("{prefix}.{key}");
                    features.push(key_prefix.clone());
                    self.collect_features(child, &key_prefix, depth + 1, max_depth, features);
                }
            }
            JsValue::BigInt(_) => features.push(format!("{prefix}:{}", value.type_name())),
        }
    }

    /// 32-bit shift-subtract string hash over UTF-16 code units.
    pub fn hash(feature: &str) -> u32 {
        feature
            .encode_utf16()
            .fold(0u32, |h, unit| (h << 5).wrapping_sub(h).wrapping_add(u32::from(unit)))
    }

    /// 64-bit SimHash of a feature list. Bit `i` votes with hash bit `i mod 32`.
    pub fn simhash(features: &[String]) -> u64 {
        let mut votes = [0i64; HASH_BITS as usize];
        for feature in features {
            let h = Self::hash(feature);
            for (i, vote) in votes.iter_mut().enumerate() {
                if (h >> (i % 32)) & 1 == 1 {
                    *vote += 1;
                } else {
                    *vote -= 1;
                }
            }
        }

        votes
            .iter()
            .enumerate()
            .filter(|(_, vote)| **vote > 0)
            .fold(0u64, |hash, (i, _)| hash | (1u64 << i))
    }

    /// Number of differing bits.
    pub fn hamming_distance(a: u64, b: u64) -> u32 {
        (a ^ b).count_ones()
    }

    /// SimHash agreement in `[0, 1]`.
    pub fn simhash_similarity(&self, a: &JsValue, b: &JsValue) -> f64 {
        let fa = self.extract_features(a, "", 0, DEFAULT_FEATURE_DEPTH);
        let fb = self.extract_features(b, "", 0, DEFAULT_FEATURE_DEPTH);

        match (fa.is_empty(), fb.is_empty()) {
            (true, true) => 1.0,
            (true, false) | (false, true) => 0.0,
            (false, false) => {
                let distance = Self::hamming_distance(Self::simhash(&fa), Self::simhash(&fb));
                1.0 - f64::from(distance) / f64::from(HASH_BITS)
            }
        }
    }

    /// Jaccard index of the top-level key sets.
    pub fn structural_similarity(&self, a: &JsValue, b: &JsValue) -> f64 {
        if matches!(a, JsValue::Null) || matches!(b, JsValue::Null) {
            return if matches!((a, b), (JsValue::Null, JsValue::Null)) { 1.0 } else { 0.0 };
        }
        let (Some(ka), Some(kb)) = (a.keys(), b.keys()) else {
            return 0.0;
        };
        if ka.is_empty() && kb.is_empty() {
            return 1.0;
        }

        let ka: std::collections::HashSet<String> = ka.into_iter().collect();
        let kb: std::collections::HashSet<String> = kb.into_iter().collect();
        let intersection = ka.intersection(&kb).count();
        let union = ka.union(&kb).count();
        intersection as f64 / union as f64
    }

    /// Blend of SimHash and key overlap; symmetric in `a` and `b`.
    ///
    /// `alpha` weighs the SimHash part. It is lowered by 0.3 (floor 0.2) when the two values
    /// average fewer than five keys. Values that are deeply identical score 1.
    pub fn hybrid_similarity(&self, a: &JsValue, b: &JsValue, alpha: f64) -> f64 {
        if a.same_value(b) {
            return 1.0;
        }

        let simhash = self.simhash_similarity(a, b);
        let structural = self.structural_similarity(a, b);

        let average_keys = (a.key_count() + b.key_count()) as f64 / 2.0;
        let alpha = if average_keys < SMALL_OBJECT_KEYS { (alpha - 0.3).max(0.2) } else { alpha };

        alpha * simhash + (1.0 - alpha) * structural
    }

    /// SimHash fingerprint of a single value.
    pub fn simhash_value(&self, value: &JsValue) -> u64 {
        Self::simhash(&self.extract_features(value, "", 0, DEFAULT_FEATURE_DEPTH))
    }
}
