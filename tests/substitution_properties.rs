//! Property-based tests for query template substitution
//!
//! These tests check that:
//! - Substitution is deterministic for a given template and scope
//! - A literal value can never change the structure of the statement
//! - Identifiers survive quoting unchanged
//! - Geometry values survive an encode/store/decode cycle

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use sqlcell::core::db::{execute_blocking, ConnectionHandle, DecodePolicy};
    use sqlcell::{Scope, SqlcellError, Value};
    use sqlparser::dialect::SQLiteDialect;
    use sqlparser::tokenizer::{Token, Tokenizer};

    // Test infrastructure

    fn handle() -> ConnectionHandle {
        ConnectionHandle::open_in_memory().unwrap()
    }

    /// Any text, embedded NULs included
    fn arb_text() -> impl Strategy<Value = String> {
        proptest::collection::vec(any::<char>(), 0..40).prop_map(String::from_iter)
    }

    fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            (-1.0e12f64..1.0e12).prop_map(Value::Real),
            arb_text().prop_map(Value::Text),
            proptest::collection::vec(any::<u8>(), 0..16).prop_map(Value::Blob),
        ]
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            3 => arb_scalar(),
            1 => proptest::collection::vec(arb_scalar(), 0..5).prop_map(Value::List),
        ]
    }

    fn non_whitespace_tokens(sql: &str) -> Vec<Token> {
        let dialect = SQLiteDialect {};
        Tokenizer::new(&dialect, sql)
            .tokenize()
            .unwrap()
            .into_iter()
            .filter(|t| !matches!(t, Token::Whitespace(_)))
            .collect()
    }

    proptest! {
        #[test]
        fn substitution_is_deterministic(value in arb_value()) {
            let db = handle();
            let scope = Scope::new().with("v", value);
            let first = db.substitute("SELECT {v}, {v:l} FROM t WHERE x IN {v}", &scope).unwrap();
            let second = db.substitute("SELECT {v}, {v:l} FROM t WHERE x IN {v}", &scope).unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn text_literal_is_a_single_token(text in arb_text()) {
            let db = handle();
            let scope = Scope::new().with("v", text.as_str());
            let sql = db.substitute("SELECT {v}", &scope).unwrap();

            if text.contains('\0') {
                // rendered as a hex blob cast back to text
                let hex = sql
                    .strip_prefix("SELECT CAST(X'")
                    .and_then(|rest| rest.strip_suffix("' AS TEXT)"));
                prop_assert!(matches!(hex, Some(h) if h.len() == text.len() * 2
                    && h.chars().all(|c| c.is_ascii_hexdigit())));
            } else {
                let tokens = non_whitespace_tokens(&sql);
                prop_assert_eq!(tokens.len(), 2);
                prop_assert!(matches!(&tokens[1], Token::SingleQuotedString(s) if *s == text));
            }
        }

        #[test]
        fn text_literal_reads_back_unchanged(text in arb_text()) {
            let db = handle();
            let scope = Scope::new().with("v", text.as_str());
            let sql = db.substitute("SELECT {v} AS v", &scope).unwrap();

            let result = execute_blocking(&db, &sql, DecodePolicy::Collect).unwrap();
            prop_assert_eq!(result.row_count, 1);
            prop_assert_eq!(result.first_row_value(), Value::Text(text));
        }

        #[test]
        fn identifier_reads_back_unchanged(name in "[^\u{0}.]{1,20}") {
            let db = handle();
            let scope = Scope::new().with("col", name.as_str());
            let sql = db.substitute("SELECT 1 AS {col:i}", &scope).unwrap();

            let result = execute_blocking(&db, &sql, DecodePolicy::Collect).unwrap();
            prop_assert_eq!(result.column_names(), vec![name.as_str()]);
        }

        #[test]
        fn missing_variable_never_renders(name in "[a-z_][a-z0-9_]{0,10}") {
            let db = handle();
            let result = db.substitute(&format!("SELECT {{{}}}", name), &Scope::new());
            prop_assert!(
                matches!(result, Err(SqlcellError::UnresolvedVariable(ref missing)) if *missing == name)
            );
        }
    }

    #[cfg(feature = "geo")]
    proptest! {
        #[test]
        fn point_survives_storage(x in -1.0e6f64..1.0e6, y in -1.0e6f64..1.0e6, srid in proptest::option::of(1i32..100_000)) {
            use sqlcell::geometry::{default_adapter, Geometry};

            let db = handle();
            db.register_geometry(default_adapter()).unwrap();
            execute_blocking(&db, "CREATE TABLE places (location GEOMETRY)", DecodePolicy::Collect).unwrap();

            let mut point = Geometry::new(geo_types::Point::new(x, y));
            if let Some(srid) = srid {
                point = point.with_srid(srid);
            }
            let scope = Scope::new().with("p", point.clone());
            let insert = db.substitute("INSERT INTO places VALUES ({p})", &scope).unwrap();
            execute_blocking(&db, &insert, DecodePolicy::FailFast).unwrap();

            let result = execute_blocking(&db, "SELECT location FROM places", DecodePolicy::FailFast).unwrap();
            prop_assert_eq!(result.first_row_value(), Value::Geometry(point));
        }
    }
}
