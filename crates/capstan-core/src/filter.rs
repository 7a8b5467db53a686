// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row filters for the relational store contract.
//!
//! A filter is a conjunction of column predicates. It is built from the JSON
//! `where` object of a data-store action: a bare value means equality, and an
//! object with a single operator key (`eq`, `ne`, `gt`, `gte`, `lt`, `lte`,
//! `in`) selects a comparison.

use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::error::CapstanError;

/// A record as exchanged with the relational store.
pub type Row = serde_json::Map<String, Value>;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Predicate {
    pub fn matches(&self, row: &Row) -> bool {
        let actual = row.get(&self.column).unwrap_or(&Value::Null);
        match self.op {
            FilterOp::Eq => values_equal(actual, &self.value),
            FilterOp::Ne => !values_equal(actual, &self.value),
            FilterOp::Gt => compare_values(actual, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::Lt => compare_values(actual, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::In => match &self.value {
                Value::Array(items) => items.iter().any(|v| values_equal(actual, v)),
                _ => false,
            },
        }
    }
}

/// A conjunction of predicates. The empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A filter with a single equality predicate.
    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self::new().and(column, FilterOp::Eq, value)
    }

    pub fn and(mut self, column: impl Into<String>, op: FilterOp, value: Value) -> Self {
        self.predicates.push(Predicate {
            column: column.into(),
            op,
            value,
        });
        self
    }

    /// Parses a JSON `where` object.
    pub fn from_json(value: &Value) -> Result<Self, CapstanError> {
        let Value::Object(map) = value else {
            return Err(CapstanError::Validation(
                "where clause must be an object".into(),
            ));
        };
        let mut filter = Self::new();
        for (column, v) in map {
            let (op, operand) = match v {
                Value::Object(inner) if inner.len() == 1 => inner
                    .iter()
                    .next()
                    .and_then(|(k, o)| FilterOp::from_str(k).ok().map(|op| (op, o.clone())))
                    .unwrap_or_else(|| (FilterOp::Eq, v.clone())),
                other => (FilterOp::Eq, other.clone()),
            };
            if op == FilterOp::In && !operand.is_array() {
                return Err(CapstanError::Validation(format!(
                    "'in' operand for column '{column}' must be an array"
                )));
            }
            filter = filter.and(column.clone(), op, operand);
        }
        Ok(filter)
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.predicates.iter().all(|p| p.matches(row))
    }

    /// Equality value for `column`, if the filter pins it.
    pub fn equality(&self, column: &str) -> Option<&Value> {
        self.predicates
            .iter()
            .find(|p| p.column == column && p.op == FilterOp::Eq)
            .map(|p| &p.value)
    }
}

/// Ordering for `select`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }

    /// Parses `"col"`, `"col desc"`, or `{"column": .., "descending": ..}`.
    pub fn from_json(value: &Value) -> Result<Self, CapstanError> {
        match value {
            Value::String(s) => {
                let mut parts = s.split_whitespace();
                let column = parts.next().unwrap_or_default();
                if column.is_empty() {
                    return Err(CapstanError::Validation("orderBy column is empty".into()));
                }
                let descending = parts.next().is_some_and(|d| d.eq_ignore_ascii_case("desc"));
                Ok(Self {
                    column: column.to_string(),
                    descending,
                })
            }
            Value::Object(_) => Ok(serde_json::from_value(value.clone())?),
            _ => Err(CapstanError::Validation(
                "orderBy must be a string or object".into(),
            )),
        }
    }

    /// Compares two rows by this ordering's column.
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        let left = a.get(&self.column).unwrap_or(&Value::Null);
        let right = b.get(&self.column).unwrap_or(&Value::Null);
        let ord = compare_values(left, right).unwrap_or(Ordering::Equal);
        if self.descending { ord.reverse() } else { ord }
    }
}

/// JSON equality with numbers compared by value (`1` equals `1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Orders two JSON scalars of the same kind. Mixed kinds do not compare.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}
