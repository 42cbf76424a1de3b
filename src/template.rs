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

//! Query template rewriting.
//!
//! Rewrites `:name` placeholders into the server's typed parameter syntax
//! `{name:Type}`. Values are never inlined; they are sent as separate
//! `param_<name>` fields, so the query text only ever contains what the
//! caller wrote.
//!
//! Placeholders inside single- or double-quoted literals are left alone, as
//! are `::` casts and colons directly following an identifier (which is how
//! already-rewritten `{name:Type}` references look).

use crate::error::{Error, Result};
use crate::types::QueryParam;

/// Rewrite every placeholder in `query` using the matching parameter.
///
/// Fails with [`Error::MissingParameter`] for a placeholder without a
/// parameter of the same (case-sensitive) name.
pub fn format(query: &str, params: &[QueryParam]) -> Result<String> {
    let chars: Vec<char> = query.chars().collect();
    let mut out = String::with_capacity(query.len() + 16);
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if let Some(q) = quote {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        match c {
            '\'' | '"' => {
                quote = Some(c);
                out.push(c);
                i += 1;
            }
            ':' if starts_placeholder(&chars, i) => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_ident_char(chars[end]) {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                let param = params
                    .iter()
                    .find(|p| p.name() == name)
                    .ok_or_else(|| Error::MissingParameter { name: name.clone() })?;
                out.push('{');
                out.push_str(param.name());
                out.push(':');
                out.push_str(param.type_name());
                out.push('}');
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    Ok(out)
}

/// Names of all placeholders in `query`, in order of appearance.
pub fn placeholders(query: &str) -> Vec<String> {
    let chars: Vec<char> = query.chars().collect();
    let mut names = Vec::new();
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == '\\' {
                i += 2;
                continue;
            }
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        if c == '\'' || c == '"' {
            quote = Some(c);
            i += 1;
        } else if c == ':' && starts_placeholder(&chars, i) {
            let start = i + 1;
            let mut end = start;
            while end < chars.len() && is_ident_char(chars[end]) {
                end += 1;
            }
            names.push(chars[start..end].iter().collect());
            i = end;
        } else {
            i += 1;
        }
    }

    names
}

fn starts_placeholder(chars: &[char], colon: usize) -> bool {
    let next_ok = chars
        .get(colon + 1)
        .map(|&c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    let prev_ok = match colon.checked_sub(1).map(|p| chars[p]) {
        Some(p) => p != ':' && !is_ident_char(p),
        None => true,
    };
    next_ok && prev_ok
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_replaced_with_type_tag() {
        let query = format(
            "select * from foo where bar = :bar",
            &[QueryParam::of("bar", 123i32)],
        )
        .unwrap();
        assert_eq!(query, "select * from foo where bar = {bar:Int32}");
    }

    #[test]
    fn test_placeholder_like_text_in_quotes_untouched() {
        let query = format("select * from foo where bar = ':bar'", &[]).unwrap();
        assert_eq!(query, "select * from foo where bar = ':bar'");

        let query = format(r#"select ":bar", 'it\'s :bar' where x = :x"#, &[QueryParam::of("x", 1u8)])
            .unwrap();
        assert_eq!(query, r#"select ":bar", 'it\'s :bar' where x = {x:UInt8}"#);
    }

    #[test]
    fn test_no_placeholders_returned_unchanged() {
        let params = [QueryParam::of("unused", "x")];
        for q in ["", "SELECT 1", "SELECT 'a:b' AS c", "SELECT x::UInt8 FROM t"] {
            assert_eq!(format(q, &[]).unwrap(), q);
            assert_eq!(format(q, &params).unwrap(), q);
        }
    }

    #[test]
    fn test_missing_parameter_named() {
        let err = format("select :a, :b", &[QueryParam::of("a", 1i32)]).unwrap_err();
        match err {
            Error::MissingParameter { name } => assert_eq!(name, "b"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_names_are_case_sensitive() {
        let err = format("select :Foo", &[QueryParam::of("foo", 1i32)]).unwrap_err();
        assert!(matches!(err, Error::MissingParameter { .. }));
    }

    #[test]
    fn test_multiline_query_with_containers() {
        let params = [
            QueryParam::of("organization_alias", "acme"),
            QueryParam::array("list", vec!["a", "b", "c"]),
        ];
        let query = format(
            "SELECT sum(c) AS `count`\nFROM events te WHERE 1=1\nAND te.organization_alias = :organization_alias\nAND hasAny(:list, list)",
            &params,
        )
        .unwrap();
        assert_eq!(
            query,
            "SELECT sum(c) AS `count`\nFROM events te WHERE 1=1\nAND te.organization_alias = {organization_alias:String}\nAND hasAny({list:Array(String)}, list)"
        );
    }

    #[test]
    fn test_repeated_placeholder_and_in_list() {
        let params = [QueryParam::array("ids", vec![4u64, 12, 989])];
        let query = format("SELECT n FROM t WHERE n IN (:ids) OR m IN (:ids)", &params).unwrap();
        assert_eq!(
            query,
            "SELECT n FROM t WHERE n IN ({ids:Array(UInt64)}) OR m IN ({ids:Array(UInt64)})"
        );
    }

    #[test]
    fn test_already_rewritten_reference_is_stable() {
        let params = [QueryParam::of("bar", 1i32)];
        let once = format("x = :bar", &params).unwrap();
        assert_eq!(format(&once, &params).unwrap(), once);
    }

    #[test]
    fn test_placeholders_listed_in_order() {
        assert_eq!(
            placeholders("select :a, ':b', :c_1 from t where x::Int8 = :a"),
            vec!["a", "c_1", "a"]
        );
    }
}
