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

//! Named, typed query parameters.
//!
//! A [`QueryParam`] never ends up inside the query text. The template only
//! references it as `{name:Type}`; the value travels separately as a
//! `param_<name>` request field rendered in the server's text format.

use crate::error::{Error, Result};
use chrono::{NaiveDate, NaiveDateTime};
use std::net::{Ipv4Addr, Ipv6Addr};
use uuid::Uuid;

/// Text sent for a null parameter value.
pub const NULL_MARKER: &str = "\\N";

/// A parameter value in a form that can be rendered as a server literal.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Uuid(Uuid),
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Array(Vec<ParamValue>),
    Map(Vec<(ParamValue, ParamValue)>),
}

impl ParamValue {
    /// Render the value as the text of a `param_<name>` field.
    pub fn to_wire_text(&self) -> String {
        match self {
            ParamValue::Null => NULL_MARKER.to_string(),
            ParamValue::String(s) => escape_field(s),
            other => other.render_literal(false),
        }
    }

    /// Render as a literal. Inside containers, text-like values are quoted.
    fn render_literal(&self, nested: bool) -> String {
        match self {
            ParamValue::Null => {
                if nested {
                    "NULL".to_string()
                } else {
                    NULL_MARKER.to_string()
                }
            }
            ParamValue::Bool(b) => b.to_string(),
            ParamValue::Int(i) => i.to_string(),
            ParamValue::UInt(u) => u.to_string(),
            ParamValue::Float(f) => float_literal(*f),
            ParamValue::String(s) => quote_if(nested, s),
            ParamValue::Date(d) => quote_if(nested, &d.format("%Y-%m-%d").to_string()),
            ParamValue::DateTime(dt) => {
                quote_if(nested, &dt.format("%Y-%m-%d %H:%M:%S%.f").to_string())
            }
            ParamValue::Uuid(u) => quote_if(nested, &u.hyphenated().to_string()),
            ParamValue::Ipv4(ip) => quote_if(nested, &ip.to_string()),
            ParamValue::Ipv6(ip) => quote_if(nested, &ip.to_string()),
            ParamValue::Array(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.render_literal(true)).collect();
                format!("[{}]", parts.join(","))
            }
            ParamValue::Map(entries) => {
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}:{}", k.render_literal(true), v.render_literal(true)))
                    .collect();
                format!("{{{}}}", parts.join(","))
            }
        }
    }

    /// Best-effort server type tag for a value whose Rust type was erased.
    pub fn infer_type(&self) -> Option<String> {
        let tag = match self {
            ParamValue::Null => return None,
            ParamValue::Bool(_) => "Bool".to_string(),
            ParamValue::Int(_) => "Int64".to_string(),
            ParamValue::UInt(_) => "UInt64".to_string(),
            ParamValue::Float(_) => "Float64".to_string(),
            ParamValue::String(_) => "String".to_string(),
            ParamValue::Date(_) => "Date".to_string(),
            ParamValue::DateTime(_) => "DateTime".to_string(),
            ParamValue::Uuid(_) => "UUID".to_string(),
            ParamValue::Ipv4(_) => "IPv4".to_string(),
            ParamValue::Ipv6(_) => "IPv6".to_string(),
            ParamValue::Array(items) => {
                let elem = items.iter().find_map(ParamValue::infer_type)?;
                format!("Array({})", elem)
            }
            ParamValue::Map(entries) => {
                let key = entries.iter().find_map(|(k, _)| k.infer_type())?;
                let value = entries.iter().find_map(|(_, v)| v.infer_type())?;
                format!("Map({}, {})", key, value)
            }
        };
        Some(tag)
    }
}

/// Float literal in the server's spelling of the non-finite values.
fn float_literal(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f == f64::INFINITY {
        "inf".to_string()
    } else if f == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        f.to_string()
    }
}

fn quote_if(nested: bool, s: &str) -> String {
    if nested {
        quote(s)
    } else {
        escape_field(s)
    }
}

/// Single-quoted string literal with backslash escaping.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Escaping for a top-level field value (TSV escaped format).
fn escape_field(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

/// Rust types with a fixed server type tag.
pub trait ToParam: Into<ParamValue> {
    fn type_tag() -> String;
}

macro_rules! impl_to_param {
    ($($ty:ty => $tag:literal, $variant:ident as $conv:ty;)*) => {
        $(
            impl From<$ty> for ParamValue {
                fn from(v: $ty) -> Self {
                    ParamValue::$variant(v as $conv)
                }
            }

            impl ToParam for $ty {
                fn type_tag() -> String {
                    $tag.to_string()
                }
            }
        )*
    };
}

impl_to_param! {
    i8 => "Int8", Int as i64;
    i16 => "Int16", Int as i64;
    i32 => "Int32", Int as i64;
    i64 => "Int64", Int as i64;
    u8 => "UInt8", UInt as u64;
    u16 => "UInt16", UInt as u64;
    u32 => "UInt32", UInt as u64;
    u64 => "UInt64", UInt as u64;
    f32 => "Float32", Float as f64;
    f64 => "Float64", Float as f64;
}

macro_rules! impl_to_param_direct {
    ($($ty:ty => $tag:literal, $variant:ident;)*) => {
        $(
            impl From<$ty> for ParamValue {
                fn from(v: $ty) -> Self {
                    ParamValue::$variant(v)
                }
            }

            impl ToParam for $ty {
                fn type_tag() -> String {
                    $tag.to_string()
                }
            }
        )*
    };
}

impl_to_param_direct! {
    bool => "Bool", Bool;
    String => "String", String;
    NaiveDate => "Date", Date;
    NaiveDateTime => "DateTime", DateTime;
    Uuid => "UUID", Uuid;
    Ipv4Addr => "IPv4", Ipv4;
    Ipv6Addr => "IPv6", Ipv6;
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

impl ToParam for &str {
    fn type_tag() -> String {
        "String".to_string()
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(ParamValue::Null, Into::into)
    }
}

impl<T: ToParam> ToParam for Option<T> {
    fn type_tag() -> String {
        format!("Nullable({})", T::type_tag())
    }
}

/// A named query parameter with its server-side type tag.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryParam {
    name: String,
    type_name: String,
    value: ParamValue,
}

impl QueryParam {
    /// Parameter with an explicit type tag.
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        value: impl Into<ParamValue>,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            value: value.into(),
        }
    }

    /// Parameter whose type tag follows from the Rust type of `value`.
    pub fn of<T: ToParam>(name: impl Into<String>, value: T) -> Self {
        Self::new(name, T::type_tag(), value)
    }

    /// `Array(T)` parameter.
    pub fn array<T, I>(name: impl Into<String>, values: I) -> Self
    where
        T: ToParam,
        I: IntoIterator<Item = T>,
    {
        let items = values.into_iter().map(Into::into).collect();
        Self::new(
            name,
            format!("Array({})", T::type_tag()),
            ParamValue::Array(items),
        )
    }

    /// `Map(K, V)` parameter. Entry order is preserved.
    pub fn map<K, V, I>(name: impl Into<String>, entries: I) -> Self
    where
        K: ToParam,
        V: ToParam,
        I: IntoIterator<Item = (K, V)>,
    {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::new(
            name,
            format!("Map({}, {})", K::type_tag(), V::type_tag()),
            ParamValue::Map(entries),
        )
    }

    /// Explicit null of the given type.
    pub fn null(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::new(name, type_name, ParamValue::Null)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The value, or `None` for a null parameter.
    pub fn value(&self) -> Option<&ParamValue> {
        match self.value {
            ParamValue::Null => None,
            ref v => Some(v),
        }
    }

    /// Text for the out-of-band `param_<name>` field.
    pub fn wire_value(&self) -> String {
        self.value.to_wire_text()
    }
}

/// Build parameters from loosely typed pairs, inferring each type tag.
pub fn params_from_pairs<K, I>(pairs: I) -> Result<Vec<QueryParam>>
where
    K: Into<String>,
    I: IntoIterator<Item = (K, ParamValue)>,
{
    pairs
        .into_iter()
        .map(|(name, value)| {
            let name = name.into();
            let type_name = value.infer_type().ok_or_else(|| {
                Error::invalid_options(format!("cannot infer a type for parameter '{}'", name))
            })?;
            Ok(QueryParam::new(name, type_name, value))
        })
        .collect()
}
