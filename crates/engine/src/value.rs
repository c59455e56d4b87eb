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

//! Plain values materialized out of the heap graph.
//!
//! [`JsValue`] mirrors the debuggee's value domain closely enough for similarity scoring and
//! for printing search results: it keeps `undefined`, non-finite numbers and bigints apart from
//! their JSON approximations. Objects keep their keys sorted.

use std::{collections::BTreeMap, fmt};

use serde::{ser::SerializeMap, ser::SerializeSeq, Serialize, Serializer};

/// A materialized debuggee value.
#[derive(Debug, Clone)]
pub enum JsValue {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// A boolean
    Bool(bool),
    /// A number, non-finite values included
    Number(f64),
    /// A bigint as decimal digits (with an optional leading minus)
    BigInt(String),
    /// A string
    String(String),
    /// An array
    Array(Vec<JsValue>),
    /// A plain object
    Object(BTreeMap<String, JsValue>),
}

impl JsValue {
    /// `typeof`-like name used for feature extraction.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null | Self::Array(_) | Self::Object(_) => "object",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::BigInt(_) => "bigint",
            Self::String(_) => "string",
        }
    }

    /// Whether the value is `null` or `undefined`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Null | Self::Undefined)
    }

    /// Whether the value is an array or an object.
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Array(_) | Self::Object(_))
    }

    /// Own enumerable keys, `None` for non-composite values. Array keys are their indices.
    pub fn keys(&self) -> Option<Vec<String>> {
        match self {
            Self::Array(items) => Some((0..items.len()).map(|i| i.to_string()).collect()),
            Self::Object(map) => Some(map.keys().cloned().collect()),
            _ => None,
        }
    }

    /// Number of own keys, zero for non-composite values.
    pub fn key_count(&self) -> usize {
        match self {
            Self::Array(items) => items.len(),
            Self::Object(map) => map.len(),
            _ => 0,
        }
    }

    /// Deep equality where numbers compare with `Object.is` semantics.
    pub fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => {
                (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits()
            }
            (Self::BigInt(a), Self::BigInt(b)) | (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_value(y))
            }
            (Self::Object(a), Self::Object(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|((ka, va), (kb, vb))| ka == kb && va.same_value(vb))
            }
            _ => false,
        }
    }

    /// Parses JSON text into a value.
    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<serde_json::Value>(text).map(Self::from)
    }
}

impl From<serde_json::Value> for JsValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

/// `String(value)` rendering.
impl fmt::Display for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => f.write_str(&format_js_number(*n)),
            Self::BigInt(digits) => f.write_str(digits),
            Self::String(s) => f.write_str(s),
            Self::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    if !item.is_nullish() {
                        write!(f, "{item}")?;
                    }
                }
                Ok(())
            }
            Self::Object(_) => f.write_str("[object Object]"),
        }
    }
}

impl Serialize for JsValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Undefined | Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) if !n.is_finite() => serializer.serialize_str(&format_js_number(*n)),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < MAX_SAFE_INTEGER => {
                serializer.serialize_i64(*n as i64)
            }
            Self::Number(n) => serializer.serialize_f64(*n),
            Self::BigInt(digits) => serializer.serialize_str(digits),
            Self::String(s) => serializer.serialize_str(s),
            Self::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Object(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Converts text to a number the way `Number(text)` does, `None` where that yields `NaN`.
pub fn parse_js_number(text: &str) -> Option<f64> {
    let t = text.trim();
    if t.is_empty() {
        return Some(0.0);
    }

    match t {
        "Infinity" | "+Infinity" => return Some(f64::INFINITY),
        "-Infinity" => return Some(f64::NEG_INFINITY),
        _ => {}
    }

    let radix = match t.get(..2) {
        Some("0x" | "0X") => Some(16),
        Some("0o" | "0O") => Some(8),
        Some("0b" | "0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        let digits = &t[2..];
        if digits.is_empty() {
            return None;
        }
        return digits.chars().try_fold(0f64, |acc, c| {
            c.to_digit(radix).map(|d| acc * f64::from(radix) + f64::from(d))
        });
    }

    // Rust accepts `inf` and `nan` spellings that Number() rejects.
    if t.bytes().any(|b| b.is_ascii_alphabetic() && b != b'e' && b != b'E') {
        return None;
    }
    t.parse::<f64>().ok()
}

/// Renders a number the way `String(number)` does.
pub fn format_js_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }

    let abs = n.abs();
    if (1e-6..1e21).contains(&abs) {
        if n.fract() == 0.0 {
            format!("{n:.0}")
        } else {
            format!("{n}")
        }
    } else {
        let exp = format!("{n:e}");
        match exp.split_once('e') {
            Some((mantissa, power)) if !power.starts_with('-') => format!("{mantissa}e+{power}"),
            _ => exp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_js_number() {
        assert_eq!(parse_js_number(""), Some(0.0));
        assert_eq!(parse_js_number("  42 "), Some(42.0));
        assert_eq!(parse_js_number("-1.5e3"), Some(-1500.0));
        assert_eq!(parse_js_number(".5"), Some(0.5));
        assert_eq!(parse_js_number("0x1F"), Some(31.0));
        assert_eq!(parse_js_number("0b101"), Some(5.0));
        assert_eq!(parse_js_number("Infinity"), Some(f64::INFINITY));
        assert_eq!(parse_js_number("inf"), None);
        assert_eq!(parse_js_number("nan"), None);
        assert_eq!(parse_js_number("12px"), None);
        assert_eq!(parse_js_number("0x"), None);
    }

    #[test]
    fn test_format_js_number() {
        assert_eq!(format_js_number(1.0), "1");
        assert_eq!(format_js_number(-0.0), "0");
        assert_eq!(format_js_number(0.25), "0.25");
        assert_eq!(format_js_number(f64::NAN), "NaN");
        assert_eq!(format_js_number(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_js_number(1e21), "1e+21");
        assert_eq!(format_js_number(1e-7), "1e-7");
    }

    #[test]
    fn test_same_value() {
        assert!(JsValue::Number(f64::NAN).same_value(&JsValue::Number(f64::NAN)));
        assert!(!JsValue::Number(0.0).same_value(&JsValue::Number(-0.0)));
        assert!(!JsValue::Null.same_value(&JsValue::Undefined));

        let a = JsValue::from_json_str(r#"{"a":[1,2],"b":{"c":"x"}}"#).unwrap();
        let b = JsValue::from_json_str(r#"{"b":{"c":"x"},"a":[1,2]}"#).unwrap();
        assert!(a.same_value(&b));
    }

    #[test]
    fn test_serialize() {
        let mut map = BTreeMap::new();
        map.insert("n".to_string(), JsValue::Number(3.0));
        map.insert("inf".to_string(), JsValue::Number(f64::INFINITY));
        map.insert("u".to_string(), JsValue::Undefined);
        map.insert("big".to_string(), JsValue::BigInt("123".to_string()));
        let json = serde_json::to_value(JsValue::Object(map)).unwrap();

        assert_eq!(
            json,
            serde_json::json!({ "n": 3, "inf": "Infinity", "u": null, "big": "123" })
        );
    }

    #[test]
    fn test_display() {
        let value = JsValue::from_json_str(r#"[1, null, "a"]"#).unwrap();
        assert_eq!(value.to_string(), "1,,a");
        assert_eq!(JsValue::from_json_str("{}").unwrap().to_string(), "[object Object]");
    }
}
