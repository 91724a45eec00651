// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Transactions filter model and rendering of the target-chain search query.
//!
//! A TX query carries its filter as a JSON array of `{field, op, value}`
//! clauses. The relayer renders them into the target chain's search grammar,
//! `field<op>value` clauses joined with ` AND `, and always appends a
//! `tx.height > watermark` clause so only unprocessed heights are searched.

use std::fmt::Display;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// The field used to constrain a search to heights above the watermark.
pub const TX_HEIGHT_FIELD: &str = "tx.height";

/// Comparison operator of a filter clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    /// Equality, rendered as `=`.
    Eq,
    /// Strictly greater, rendered as `>`.
    Gt,
    /// Greater or equal, rendered as `>=`.
    Gte,
    /// Strictly less, rendered as `<`.
    Lt,
    /// Less or equal, rendered as `<=`.
    Lte,
}

impl FilterOp {
    /// The sign this operator renders to in a search query.
    pub fn sign(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
        }
    }
}

impl FromStr for FilterOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "eq" => Ok(FilterOp::Eq),
            "gt" => Ok(FilterOp::Gt),
            "gte" => Ok(FilterOp::Gte),
            "lt" => Ok(FilterOp::Lt),
            "lte" => Ok(FilterOp::Lte),
            other => Err(Error::UnsupportedOperator(other.to_string())),
        }
    }
}

impl Display for FilterOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for FilterOp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for FilterOp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// A filter clause value. The contract admits exactly strings, unsigned
/// integers, and floats losslessly representable as a u64; anything else is
/// rejected at decode time rather than silently coerced.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// A string value, rendered single-quoted.
    Text(String),
    /// A numeric value, rendered as a bare decimal.
    Number(u64),
}

impl Serialize for FilterValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FilterValue::Text(s) => serializer.serialize_str(s),
            FilterValue::Number(n) => serializer.serialize_u64(*n),
        }
    }
}

impl<'de> Deserialize<'de> for FilterValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::String(s) => Ok(FilterValue::Text(s)),
            serde_json::Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    return Ok(FilterValue::Number(u));
                }
                // floats are accepted only when they carry an exact u64
                match n.as_f64() {
                    Some(f)
                        if f.fract() == 0.0
                            && f >= 0.0
                            && f < u64::MAX as f64 =>
                    {
                        Ok(FilterValue::Number(f as u64))
                    }
                    _ => Err(D::Error::custom(format!(
                        "filter value {n} is not representable as an unsigned 64-bit integer"
                    ))),
                }
            }
            other => Err(D::Error::custom(format!(
                "filter value must be a string or an unsigned number, got {other}"
            ))),
        }
    }
}

/// A single `{field, op, value}` clause of a transactions filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterClause {
    /// The event attribute the clause matches on, e.g. `transfer.recipient`.
    pub field: String,
    /// Comparison operator.
    pub op: FilterOp,
    /// The value compared against.
    pub value: FilterValue,
}

/// An ordered sequence of filter clauses, combined with AND.
pub type TransactionsFilter = Vec<FilterClause>;

/// Decodes a raw JSON transactions filter.
pub fn parse_filter(raw: &str) -> crate::Result<TransactionsFilter> {
    serde_json::from_str(raw).map_err(|e| Error::MalformedFilter(e.to_string()))
}

/// Renders a filter into the target chain's search grammar:
/// `key1{=,>,>=,<,<=}value1 AND key2{=,>,>=,<,<=}value2 AND ...`
pub fn render_query(filter: &[FilterClause]) -> String {
    let clauses: Vec<String> = filter
        .iter()
        .map(|clause| match &clause.value {
            FilterValue::Text(s) => {
                format!("{}{}'{}'", clause.field, clause.op.sign(), s)
            }
            FilterValue::Number(n) => {
                format!("{}{}{}", clause.field, clause.op.sign(), n)
            }
        })
        .collect();
    clauses.join(" AND ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_string_and_numeric_clauses() {
        let filter = vec![
            FilterClause {
                field: "transfer.recipient".into(),
                op: FilterOp::Eq,
                value: FilterValue::Text("alice".into()),
            },
            FilterClause {
                field: TX_HEIGHT_FIELD.into(),
                op: FilterOp::Gt,
                value: FilterValue::Number(0),
            },
        ];
        assert_eq!(
            render_query(&filter),
            "transfer.recipient='alice' AND tx.height>0"
        );
    }

    #[test]
    fn op_signs_are_bijective() {
        let ops = [
            FilterOp::Eq,
            FilterOp::Gt,
            FilterOp::Gte,
            FilterOp::Lt,
            FilterOp::Lte,
        ];
        let signs: std::collections::HashSet<_> =
            ops.iter().map(|op| op.sign()).collect();
        assert_eq!(signs.len(), ops.len());
        for op in ops {
            assert_eq!(op.name().parse::<FilterOp>().unwrap(), op);
        }
    }

    #[test]
    fn parse_render_round_trip() {
        let raw = r#"[
            {"field":"wasm.action","op":"eq","value":"burn"},
            {"field":"tx.height","op":"gte","value":2470},
            {"field":"reward.amount","op":"lt","value":100.0}
        ]"#;
        let filter = parse_filter(raw).unwrap();
        assert_eq!(
            render_query(&filter),
            "wasm.action='burn' AND tx.height>=2470 AND reward.amount<100"
        );
        // rendering then re-encoding the model is the identity
        let encoded = serde_json::to_string(&filter).unwrap();
        assert_eq!(parse_filter(&encoded).unwrap(), filter);
    }

    #[test]
    fn rejects_unsupported_operator() {
        let raw = r#"[{"field":"a","op":"neq","value":"b"}]"#;
        let err = parse_filter(raw).unwrap_err();
        assert!(err.to_string().contains("unsupported filter operator"));
    }

    #[test]
    fn rejects_lossy_and_negative_numbers() {
        for raw in [
            r#"[{"field":"a","op":"eq","value":1.5}]"#,
            r#"[{"field":"a","op":"eq","value":-3}]"#,
            r#"[{"field":"a","op":"eq","value":{"nested":true}}]"#,
            r#"[{"field":"a","op":"eq","value":null}]"#,
        ] {
            assert!(parse_filter(raw).is_err(), "accepted {raw}");
        }
    }

    #[test]
    fn case_insensitive_operators() {
        let raw = r#"[{"field":"a","op":"GTE","value":7}]"#;
        let filter = parse_filter(raw).unwrap();
        assert_eq!(filter[0].op, FilterOp::Gte);
    }
}
