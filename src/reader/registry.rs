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

//! Type registry: server type name → parse rule.
//!
//! The registry starts from a fixed built-in table and can be extended or
//! overridden at runtime. Clones share the same underlying table, so an
//! entry registered through one handle is visible to every connection that
//! holds another.

use crate::error::{Error, Result};
use crate::reader::type_name::base_type_name;
use crate::types::Value;
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use dashmap::DashMap;
use num_bigint::{BigInt, Sign};
use serde_json::Value as JsonValue;
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

const DATE_FORMAT: &str = "%Y-%m-%d";
/// Second precision, with an optional fractional part for `DateTime64`.
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Kind of value a registered type decodes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Int128,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    UInt128,
    BigInt,
    Float32,
    Float64,
    Decimal,
    String,
    Uuid,
    Date,
    DateTime,
    Ipv4,
    Ipv6,
    Array,
    Map,
}

type ParseFn = Arc<dyn Fn(&JsonValue) -> std::result::Result<Value, String> + Send + Sync>;

/// One registry entry.
#[derive(Clone)]
pub struct DataType {
    name: String,
    target: TargetKind,
    parse: ParseFn,
}

impl DataType {
    /// Entry for base type `name`. `parse` never sees a JSON `null`; null
    /// cells decode to [`Value::Null`] before the parser is consulted.
    pub fn new<F>(name: impl Into<String>, target: TargetKind, parse: F) -> Self
    where
        F: Fn(&JsonValue) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            target,
            parse: Arc::new(parse),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> TargetKind {
        self.target
    }

    /// Decode one cell of a column declared as `column_type`.
    pub fn decode(&self, column_type: &str, node: &JsonValue) -> Result<Value> {
        if node.is_null() {
            return Ok(Value::Null);
        }
        (self.parse)(node).map_err(|reason| Error::TypeConversion {
            type_name: column_type.to_string(),
            input: node_text(node).into_owned(),
            target: self.target,
            reason,
        })
    }
}

impl fmt::Debug for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataType")
            .field("name", &self.name)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Shared, concurrently readable map of base type names to [`DataType`]s.
#[derive(Clone)]
pub struct TypeRegistry {
    types: Arc<DashMap<String, DataType>>,
}

impl TypeRegistry {
    /// Registry without any entries.
    pub fn empty() -> Self {
        Self {
            types: Arc::new(DashMap::new()),
        }
    }

    /// Registry holding the built-in types.
    pub fn builtin() -> Self {
        let registry = Self::empty();
        for data_type in builtin_types() {
            registry.register(data_type);
        }
        registry
    }

    /// Add or replace an entry. The last registration for a name wins; the
    /// replaced entry is returned.
    pub fn register(&self, data_type: DataType) -> Option<DataType> {
        self.types.insert(data_type.name.clone(), data_type)
    }

    /// Entry for an exact base type name.
    pub fn get(&self, name: &str) -> Option<DataType> {
        self.types.get(name).map(|entry| entry.value().clone())
    }

    /// Entry for a full column type string such as `Nullable(Int32)`.
    pub fn resolve(&self, type_name: &str) -> Result<DataType> {
        self.get(base_type_name(type_name))
            .ok_or_else(|| Error::UnknownType {
                type_name: type_name.to_string(),
            })
    }

    /// Decode a single cell of a column declared as `type_name`.
    pub fn decode(&self, type_name: &str, node: &JsonValue) -> Result<Value> {
        if node.is_null() {
            return Ok(Value::Null);
        }
        self.resolve(type_name)?.decode(type_name, node)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Registered base type names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.types.len())
            .finish()
    }
}

/// Text form of a JSON node as the server would print it.
///
/// 64-bit and wider integers arrive quoted, smaller ones as plain numbers;
/// both end up as the same text here.
fn node_text(node: &JsonValue) -> Cow<'_, str> {
    match node {
        JsonValue::String(s) => Cow::Borrowed(s.as_str()),
        JsonValue::Number(n) => Cow::Owned(n.to_string()),
        JsonValue::Bool(b) => Cow::Owned(b.to_string()),
        other => Cow::Owned(other.to_string()),
    }
}

fn from_text<T, F>(wrap: F) -> impl Fn(&JsonValue) -> std::result::Result<Value, String>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(T) -> Value,
{
    move |node: &JsonValue| {
        node_text(node)
            .trim()
            .parse::<T>()
            .map(&wrap)
            .map_err(|e| e.to_string())
    }
}

fn parse_bool(node: &JsonValue) -> std::result::Result<Value, String> {
    match node_text(node).trim() {
        "true" | "1" => Ok(Value::Bool(true)),
        "false" | "0" => Ok(Value::Bool(false)),
        other => Err(format!("'{}' is not a boolean", other)),
    }
}

fn parse_unsigned_big(node: &JsonValue) -> std::result::Result<Value, String> {
    let n = BigInt::from_str(node_text(node).trim()).map_err(|e| e.to_string())?;
    if n.sign() == Sign::Minus {
        return Err("negative value for an unsigned type".to_string());
    }
    Ok(Value::BigInt(n))
}

fn parse_string(node: &JsonValue) -> std::result::Result<Value, String> {
    Ok(Value::String(node_text(node).into_owned()))
}

fn parse_date(node: &JsonValue) -> std::result::Result<Value, String> {
    NaiveDate::parse_from_str(node_text(node).trim(), DATE_FORMAT)
        .map(Value::Date)
        .map_err(|e| e.to_string())
}

fn parse_datetime(node: &JsonValue) -> std::result::Result<Value, String> {
    NaiveDateTime::parse_from_str(node_text(node).trim(), DATETIME_FORMAT)
        .map(Value::DateTime)
        .map_err(|e| e.to_string())
}

fn parse_uuid(node: &JsonValue) -> std::result::Result<Value, String> {
    Uuid::parse_str(node_text(node).trim())
        .map(Value::Uuid)
        .map_err(|e| e.to_string())
}

fn parse_array(node: &JsonValue) -> std::result::Result<Value, String> {
    node.as_array()
        .map(|items| Value::Array(items.clone()))
        .ok_or_else(|| "expected a JSON array".to_string())
}

fn parse_map(node: &JsonValue) -> std::result::Result<Value, String> {
    node.as_object()
        .map(|entries| Value::Map(entries.clone()))
        .ok_or_else(|| "expected a JSON object".to_string())
}

fn builtin_types() -> Vec<DataType> {
    use TargetKind as K;

    let mut types = vec![
        DataType::new("Bool", K::Bool, parse_bool),
        DataType::new("Int8", K::Int8, from_text(Value::Int8)),
        DataType::new("Int16", K::Int16, from_text(Value::Int16)),
        DataType::new("Int32", K::Int32, from_text(Value::Int32)),
        DataType::new("Int64", K::Int64, from_text(Value::Int64)),
        DataType::new("Int128", K::Int128, from_text(Value::Int128)),
        DataType::new("Int256", K::BigInt, from_text(Value::BigInt)),
        DataType::new("UInt8", K::UInt8, from_text(Value::UInt8)),
        DataType::new("UInt16", K::UInt16, from_text(Value::UInt16)),
        DataType::new("UInt32", K::UInt32, from_text(Value::UInt32)),
        DataType::new("UInt64", K::UInt64, from_text(Value::UInt64)),
        DataType::new("UInt128", K::UInt128, from_text(Value::UInt128)),
        DataType::new("UInt256", K::BigInt, parse_unsigned_big),
        DataType::new("Float32", K::Float32, from_text(Value::Float32)),
        DataType::new("Float64", K::Float64, from_text(Value::Float64)),
        DataType::new("UUID", K::Uuid, parse_uuid),
        DataType::new("Date", K::Date, parse_date),
        DataType::new("Date32", K::Date, parse_date),
        DataType::new("DateTime", K::DateTime, parse_datetime),
        DataType::new("DateTime64", K::DateTime, parse_datetime),
        DataType::new("IPv4", K::Ipv4, from_text(Value::Ipv4)),
        DataType::new("IPv6", K::Ipv6, from_text(Value::Ipv6)),
        DataType::new("Array", K::Array, parse_array),
        DataType::new("Map", K::Map, parse_map),
    ];

    for name in ["Decimal", "Decimal32", "Decimal64", "Decimal128", "Decimal256"] {
        types.push(DataType::new(name, K::Decimal, from_text(Value::Decimal)));
    }
    for name in ["String", "FixedString", "Enum", "Enum8", "Enum16"] {
        types.push(DataType::new(name, K::String, parse_string));
    }

    types
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::Ipv4Addr;

    fn decode(type_name: &str, node: JsonValue) -> Result<Value> {
        TypeRegistry::builtin().decode(type_name, &node)
    }

    #[test]
    fn test_date() {
        assert_eq!(
            decode("Date", json!("2010-01-31")).unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2010, 1, 31).unwrap())
        );
        let err = decode("Date", json!("2010-01-32")).unwrap_err();
        match err {
            Error::TypeConversion {
                type_name,
                input,
                target,
                ..
            } => {
                assert_eq!(type_name, "Date");
                assert_eq!(input, "2010-01-32");
                assert_eq!(target, TargetKind::Date);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_datetime_precisions() {
        let expected = NaiveDate::from_ymd_opt(2010, 1, 31)
            .unwrap()
            .and_hms_opt(2, 3, 4)
            .unwrap();
        assert_eq!(
            decode("DateTime", json!("2010-01-31 02:03:04")).unwrap(),
            Value::DateTime(expected)
        );
        assert_eq!(
            decode("DateTime('UTC')", json!("2010-01-31 02:03:04")).unwrap(),
            Value::DateTime(expected)
        );
        let with_millis = NaiveDate::from_ymd_opt(2010, 1, 31)
            .unwrap()
            .and_hms_milli_opt(2, 3, 4, 567)
            .unwrap();
        assert_eq!(
            decode("DateTime64(3)", json!("2010-01-31 02:03:04.567")).unwrap(),
            Value::DateTime(with_millis)
        );
        assert!(decode("DateTime", json!("2010-01-31T02:03:04")).is_err());
    }

    #[test]
    fn test_wrapped_and_parameterized_strings() {
        assert_eq!(
            decode("LowCardinality(Nullable(String))", json!("urn:foo:bar")).unwrap(),
            Value::String("urn:foo:bar".to_string())
        );
        assert_eq!(
            decode("Enum8('OBSERVE'=1,'ADD'=2)", json!("OBSERVE")).unwrap(),
            Value::String("OBSERVE".to_string())
        );
        assert_eq!(
            decode("FixedString(3)", json!("abc")).unwrap(),
            Value::String("abc".to_string())
        );
    }

    #[test]
    fn test_null_decodes_to_absent_for_any_type() {
        for type_name in ["Nullable(Int32)", "Date", "Array(String)", "NoSuchType"] {
            assert_eq!(decode(type_name, JsonValue::Null).unwrap(), Value::Null);
        }
    }

    #[test]
    fn test_integers() {
        assert_eq!(decode("Int8", json!(-5)).unwrap(), Value::Int8(-5));
        assert_eq!(decode("UInt32", json!(7)).unwrap(), Value::UInt32(7));
        assert_eq!(
            decode("UInt64", json!("18446744073709551615")).unwrap(),
            Value::UInt64(u64::MAX)
        );
        assert_eq!(
            decode("Int128", json!("-170141183460469231731687303715884105728")).unwrap(),
            Value::Int128(i128::MIN)
        );
        assert_eq!(
            decode("UInt256", json!("115792089237316195423570985008687907853269984665640564039457584007913129639935"))
                .unwrap()
                .as_u64(),
            None
        );
        assert!(decode("UInt256", json!("-1")).is_err());
        assert!(decode("UInt8", json!(256)).is_err());
        assert!(decode("Int32", json!("abc")).is_err());
    }

    #[test]
    fn test_decimal_float_bool() {
        assert_eq!(
            decode("Decimal(10, 2)", json!("123.45")).unwrap(),
            Value::Decimal(BigDecimal::from_str("123.45").unwrap())
        );
        assert_eq!(
            decode("Decimal64(2)", json!(1.5)).unwrap(),
            Value::Decimal(BigDecimal::from_str("1.5").unwrap())
        );
        assert_eq!(decode("Float64", json!(2.25)).unwrap(), Value::Float64(2.25));
        assert_eq!(decode("Float32", json!(0.5)).unwrap(), Value::Float32(0.5));
        assert_eq!(decode("Bool", json!(true)).unwrap(), Value::Bool(true));
        assert_eq!(decode("Bool", json!("0")).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_addresses_and_uuid() {
        assert_eq!(
            decode("IPv4", json!("116.253.40.133")).unwrap(),
            Value::Ipv4(Ipv4Addr::new(116, 253, 40, 133))
        );
        assert_eq!(
            decode("IPv6", json!("2a02:aa08:e000:3100::2")).unwrap(),
            Value::Ipv6("2a02:aa08:e000:3100::2".parse().unwrap())
        );
        assert!(decode("IPv4", json!("300.1.1.1")).is_err());
        let id = "61f0c404-5cb3-11e7-907b-a6006ad3dba0";
        assert_eq!(
            decode("UUID", json!(id)).unwrap(),
            Value::Uuid(Uuid::parse_str(id).unwrap())
        );
    }

    #[test]
    fn test_containers_pass_through() {
        assert_eq!(
            decode("Array(UInt64)", json!(["4", "12"])).unwrap(),
            Value::Array(vec![json!("4"), json!("12")])
        );
        let map = decode("Map(String, UInt8)", json!({"a": 1})).unwrap();
        assert_eq!(map.as_map().unwrap().get("a"), Some(&json!(1)));
        assert!(decode("Array(String)", json!("[1]")).is_err());
        assert!(decode("Map(String, String)", json!([])).is_err());
    }

    #[test]
    fn test_unknown_type_names_full_string() {
        let err = decode("Nullable(Polygon)", json!("x")).unwrap_err();
        match err {
            Error::UnknownType { type_name } => assert_eq!(type_name, "Nullable(Polygon)"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_register_overrides_and_is_shared() {
        let registry = TypeRegistry::builtin();
        let handle = registry.clone();
        let previous = handle.register(DataType::new("Date", TargetKind::String, |node| {
            Ok(Value::String(format!("raw:{}", node_text(node))))
        }));
        assert!(previous.is_some());
        assert_eq!(
            registry.decode("Date", &json!("2010-01-32")).unwrap(),
            Value::String("raw:2010-01-32".to_string())
        );

        registry.register(DataType::new("Point", TargetKind::Array, parse_array));
        assert!(handle.get("Point").is_some());
        assert!(registry.names().contains(&"Point".to_string()));
    }
}
