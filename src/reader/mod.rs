// Copyright (c) 2025 ADBC Drivers Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Result decoding for `JSON` format responses.
//!
//! This module provides:
//! - `TypeRegistry`: maps server type names to parse rules
//! - `decode`: turns column metadata plus raw JSON rows into typed [`Row`]s
//! - `ResultSet`: decoded rows plus the statistics the server reported

pub mod registry;
pub mod type_name;

use crate::error::Result;
use crate::types::{ColumnMeta, QueryResponse, QueryStatistics, Value};
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value as JsonValue;
use std::ops::Index;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

pub use registry::{DataType, TargetKind, TypeRegistry};
pub use type_name::base_type_name;

/// Decode raw rows against their column metadata.
///
/// A cell that is `null` or missing from its row object decodes to
/// [`Value::Null`]. Every non-null cell goes through the registry entry for
/// its column's base type; an unknown type fails the whole decode even when
/// the result has no rows.
pub fn decode(
    registry: &TypeRegistry,
    columns: &[ColumnMeta],
    rows: &[serde_json::Map<String, JsonValue>],
) -> Result<Vec<Row>> {
    let types = columns
        .iter()
        .map(|column| {
            let data_type = registry.resolve(&column.type_name)?;
            trace!(
                "Column '{}' of type {} resolved to {:?}",
                column.name,
                column.type_name,
                data_type.target()
            );
            Ok(data_type)
        })
        .collect::<Result<Vec<_>>>()?;

    let names: Arc<[String]> = columns.iter().map(|c| c.name.clone()).collect();

    rows.iter()
        .map(|raw| {
            let values = columns
                .iter()
                .zip(&types)
                .map(|(column, data_type)| match raw.get(&column.name) {
                    Some(node) => data_type.decode(&column.type_name, node),
                    None => Ok(Value::Null),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Row {
                columns: names.clone(),
                values,
            })
        })
        .collect()
}

/// Decode a parsed response body into a [`ResultSet`].
pub fn decode_response(registry: &TypeRegistry, response: QueryResponse) -> Result<ResultSet> {
    let rows = decode(registry, &response.meta, &response.data)?;
    Ok(ResultSet {
        columns: response.meta,
        rows,
        statistics: response.statistics,
        row_count: response.rows,
        rows_before_limit_at_least: response.rows_before_limit_at_least,
    })
}

/// Decode a raw `JSON` format body. An empty body is an empty result.
pub fn decode_body(registry: &TypeRegistry, body: &str) -> Result<ResultSet> {
    if body.trim().is_empty() {
        return Ok(ResultSet::empty());
    }
    let response: QueryResponse = serde_json::from_str(body)?;
    decode_response(registry, response)
}

/// One decoded row. Values are kept in column declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Value of the named column, or `None` if the result has no such column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.position(column).map(|i| &self.values[i])
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `(column, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(Value::as_i64)
    }

    pub fn get_u64(&self, column: &str) -> Option<u64> {
        self.get(column).and_then(Value::as_u64)
    }

    pub fn get_f64(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(Value::as_f64)
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Value::as_str)
    }

    pub fn get_bool(&self, column: &str) -> Option<bool> {
        self.get(column).and_then(Value::as_bool)
    }

    pub fn get_decimal(&self, column: &str) -> Option<&BigDecimal> {
        self.get(column).and_then(Value::as_decimal)
    }

    pub fn get_date(&self, column: &str) -> Option<NaiveDate> {
        self.get(column).and_then(Value::as_date)
    }

    pub fn get_datetime(&self, column: &str) -> Option<NaiveDateTime> {
        self.get(column).and_then(Value::as_datetime)
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }
}

impl Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

/// Decoded result of a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    columns: Vec<ColumnMeta>,
    rows: Vec<Row>,
    statistics: Option<QueryStatistics>,
    row_count: u64,
    rows_before_limit_at_least: Option<u64>,
}

impl ResultSet {
    /// Result of a statement that produced no body.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn row(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    /// Row count as reported by the server.
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Lower bound on the number of rows the query would have returned
    /// without its `LIMIT`.
    pub fn rows_before_limit_at_least(&self) -> Option<u64> {
        self.rows_before_limit_at_least
    }

    pub fn statistics(&self) -> Option<&QueryStatistics> {
        self.statistics.as_ref()
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.statistics.as_ref().map(QueryStatistics::elapsed)
    }

    pub fn rows_read(&self) -> Option<u64> {
        self.statistics.as_ref().map(|s| s.rows_read)
    }

    pub fn bytes_read(&self) -> Option<u64> {
        self.statistics.as_ref().map(|s| s.bytes_read)
    }
}

impl IntoIterator for ResultSet {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;
    use std::str::FromStr;

    fn rows(values: JsonValue) -> Vec<serde_json::Map<String, JsonValue>> {
        serde_json::from_value(values).unwrap()
    }

    #[test]
    fn test_decode_preserves_column_order() {
        let columns = vec![
            ColumnMeta::new("z", "UInt8"),
            ColumnMeta::new("a", "Nullable(String)"),
            ColumnMeta::new("m", "Date"),
        ];
        let data = rows(json!([
            {"a": "x", "m": "2010-01-31", "z": 1},
            {"z": 2, "a": null, "m": "2011-02-01"}
        ]));
        let decoded = decode(&TypeRegistry::builtin(), &columns, &data).unwrap();

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].columns(), ["z", "a", "m"]);
        let names: Vec<&str> = decoded[0].iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["z", "a", "m"]);
        assert_eq!(decoded[0][0], Value::UInt8(1));
        assert_eq!(decoded[0].get_str("a"), Some("x"));
        assert_eq!(decoded[1].get("a"), Some(&Value::Null));
        assert_eq!(
            decoded[1].get_date("m"),
            NaiveDate::from_ymd_opt(2011, 2, 1)
        );
        assert!(decoded[1].get("missing").is_none());
    }

    #[test]
    fn test_missing_cell_is_null() {
        let columns = vec![ColumnMeta::new("a", "Int32"), ColumnMeta::new("b", "Int32")];
        let data = rows(json!([{"a": 1}]));
        let decoded = decode(&TypeRegistry::builtin(), &columns, &data).unwrap();
        assert_eq!(decoded[0].values(), [Value::Int32(1), Value::Null]);
    }

    #[test]
    fn test_unknown_column_type_fails_without_rows() {
        let columns = vec![ColumnMeta::new("p", "Point")];
        let err = decode(&TypeRegistry::builtin(), &columns, &[]).unwrap_err();
        assert!(matches!(err, Error::UnknownType { .. }));
    }

    #[test]
    fn test_conversion_error_names_column_type() {
        let columns = vec![ColumnMeta::new("d", "Nullable(Date)")];
        let data = rows(json!([{"d": "2010-01-32"}]));
        match decode(&TypeRegistry::builtin(), &columns, &data).unwrap_err() {
            Error::TypeConversion {
                type_name, input, ..
            } => {
                assert_eq!(type_name, "Nullable(Date)");
                assert_eq!(input, "2010-01-32");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_decode_response_carries_statistics() {
        let response: QueryResponse = serde_json::from_value(json!({
            "meta": [{"name": "n", "type": "UInt64"}],
            "data": [{"n": "4"}, {"n": "12"}, {"n": "989"}],
            "rows": 3,
            "rows_before_limit_at_least": 3,
            "statistics": {"elapsed": 0.5, "rows_read": 1000, "bytes_read": 8000}
        }))
        .unwrap();
        let result = decode_response(&TypeRegistry::builtin(), response).unwrap();

        assert_eq!(result.len(), 3);
        assert_eq!(result.row_count(), 3);
        assert_eq!(result.rows_before_limit_at_least(), Some(3));
        assert_eq!(result.rows_read(), Some(1000));
        assert_eq!(result.bytes_read(), Some(8000));
        assert_eq!(result.elapsed(), Some(Duration::from_millis(500)));
        let ids: Vec<u64> = result.iter().filter_map(|r| r.get_u64("n")).collect();
        assert_eq!(ids, [4, 12, 989]);
    }

    #[test]
    fn test_decode_body() {
        let registry = TypeRegistry::builtin();
        assert!(decode_body(&registry, "  \n").unwrap().is_empty());
        let result = decode_body(
            &registry,
            r#"{"meta":[{"name":"x","type":"Int32"}],"data":[{"x":1}],"rows":1}"#,
        )
        .unwrap();
        assert_eq!(result.row(0).and_then(|r| r.get_i64("x")), Some(1));
        assert!(matches!(
            decode_body(&registry, "Ok.").unwrap_err(),
            Error::Json(_)
        ));
    }

    #[test]
    fn test_wide_decimal_keeps_every_digit() {
        let result = decode_body(
            &TypeRegistry::builtin(),
            r#"{"meta":[{"name":"d","type":"Decimal(38, 20)"}],
                "data":[{"d":12345678901234567.89012345678901234567}],"rows":1}"#,
        )
        .unwrap();
        let expected = BigDecimal::from_str("12345678901234567.89012345678901234567").unwrap();
        assert_eq!(
            result.row(0).and_then(|r| r.get("d")),
            Some(&Value::Decimal(expected))
        );
    }

    #[test]
    fn test_map_cell_keeps_server_key_order() {
        let result = decode_body(
            &TypeRegistry::builtin(),
            r#"{"meta":[{"name":"m","type":"Map(String, UInt8)"}],
                "data":[{"m":{"b":1,"a":2}}],"rows":1}"#,
        )
        .unwrap();
        match result.row(0).and_then(|r| r.get("m")) {
            Some(Value::Map(entries)) => {
                let keys: Vec<&str> = entries.keys().map(String::as_str).collect();
                assert_eq!(keys, ["b", "a"]);
            }
            other => panic!("unexpected cell: {other:?}"),
        }
    }

    #[test]
    fn test_empty_result_set() {
        let result = ResultSet::empty();
        assert!(result.is_empty());
        assert!(result.statistics().is_none());
        assert_eq!(result.into_iter().count(), 0);
    }
}
