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

//! Column type string handling.
//!
//! The server reports types such as `LowCardinality(Nullable(String))` or
//! `Decimal(10, 2)`. Registry lookups use the bare base name.

const LOW_CARDINALITY: &str = "LowCardinality(";
const NULLABLE: &str = "Nullable(";

/// Reduce a column type string to the name used for registry lookup.
///
/// Strips, in order, a `LowCardinality(...)` wrapper, a `Nullable(...)`
/// wrapper and any parameter list.
pub fn base_type_name(type_name: &str) -> &str {
    let mut name = type_name.trim();
    name = unwrap(name, LOW_CARDINALITY);
    name = unwrap(name, NULLABLE);

    let end = name
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
        .map(|(i, _)| i)
        .unwrap_or(name.len());
    &name[..end]
}

/// Whether the column may hold nulls according to its declared type.
pub fn is_nullable(type_name: &str) -> bool {
    unwrap(type_name.trim(), LOW_CARDINALITY).starts_with(NULLABLE)
}

fn unwrap<'a>(name: &'a str, wrapper: &str) -> &'a str {
    match name.strip_prefix(wrapper).and_then(|s| s.strip_suffix(')')) {
        Some(inner) => inner.trim(),
        None => name,
    }
}
