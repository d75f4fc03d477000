//! Query template substitution.
//!
//! A template is SQL text with `{name}` placeholders. Each placeholder is
//! replaced by the value bound to `name` in a [`Scope`], rendered as an SQL
//! literal by the database's own quoting routine so that value content can
//! never change the statement's structure.
//!
//! Placeholder forms:
//!
//! - `{name}` or `{name:l}`: the value as a literal (`42`, `'O''Brien'`,
//!   `X'CAFE'`, `NULL`); lists render as a tuple `(1, 2, 3)`, an empty list as
//!   `(NULL)`; geometries are encoded to text first and quoted as a string.
//! - `{name:i}`: a text value quoted as an identifier; dots split qualified
//!   names, so `main.users` renders as `"main"."users"`.
//!
//! Braces that are not placeholders must be doubled: `{{` renders `{` and
//! `}}` renders `}`. Any other brace is a template error, which keeps JSON
//! literals and similar text unambiguous.

use crate::core::{Result, SqlcellError};
use crate::geometry::GeometryAdapter;
use crate::scope::{is_valid_identifier, Scope};
use crate::value::Value;
use rusqlite::Connection;
use std::collections::BTreeSet;

/// How a placeholder's value is written into the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Render {
    Literal,
    Identifier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder<'a> {
    pub name: &'a str,
    pub render: Render,
    /// Byte offset of the opening brace
    pub position: usize,
}

impl<'a> Placeholder<'a> {
    fn parse(inner: &'a str, position: usize) -> Result<Self> {
        let (name, format) = match inner.split_once(':') {
            Some((name, format)) => (name, Some(format)),
            None => (inner, None),
        };
        if !is_valid_identifier(name) {
            return Err(SqlcellError::template(
                position,
                format!("invalid placeholder '{{{}}}' (write '{{{{' for a literal brace)", inner),
            ));
        }
        let render = match format {
            None | Some("l") => Render::Literal,
            Some("i") => Render::Identifier,
            Some(other) => {
                return Err(SqlcellError::template(
                    position,
                    format!("unknown placeholder format ':{}' (expected ':l' or ':i')", other),
                ))
            }
        };
        Ok(Placeholder {
            name,
            render,
            position,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Placeholder(Placeholder<'a>),
}

/// The database's literal and identifier quoting routines.
pub trait Quote {
    /// Quotes a scalar value as an SQL literal.
    fn quote_literal(&self, value: &Value) -> Result<String>;

    /// Quotes a single (unqualified) identifier.
    fn quote_identifier(&self, ident: &str) -> Result<String>;
}

impl Quote for Connection {
    fn quote_literal(&self, value: &Value) -> Result<String> {
        let mut stmt = self.prepare_cached("SELECT quote(?1)")?;
        match value {
            // quote() stops at the first NUL; go through a blob literal instead
            Value::Text(text) if text.contains('\0') => {
                let blob = Value::Blob(text.as_bytes().to_vec());
                let hex = stmt.query_row([&blob], |row| row.get::<_, String>(0))?;
                Ok(format!("CAST({} AS TEXT)", hex))
            }
            _ => Ok(stmt.query_row([value], |row| row.get::<_, String>(0))?),
        }
    }

    fn quote_identifier(&self, ident: &str) -> Result<String> {
        let mut stmt = self.prepare_cached("SELECT printf('\"%w\"', ?1)")?;
        Ok(stmt.query_row([ident], |row| row.get::<_, String>(0))?)
    }
}

/// A parsed query template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template<'a> {
    source: &'a str,
    segments: Vec<Segment<'a>>,
}

impl<'a> Template<'a> {
    pub fn parse(source: &'a str) -> Result<Self> {
        let bytes = source.as_bytes();
        let mut segments = Vec::new();
        let mut text_start = 0;
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'{' if bytes.get(i + 1) == Some(&b'{') => {
                    push_text(&mut segments, source, text_start, i);
                    segments.push(Segment::Text("{"));
                    i += 2;
                    text_start = i;
                }
                b'{' => {
                    let close = source[i + 1..]
                        .find('}')
                        .map(|offset| i + 1 + offset)
                        .ok_or_else(|| SqlcellError::template(i, "unterminated placeholder"))?;
                    let placeholder = Placeholder::parse(&source[i + 1..close], i)?;
                    push_text(&mut segments, source, text_start, i);
                    segments.push(Segment::Placeholder(placeholder));
                    i = close + 1;
                    text_start = i;
                }
                b'}' if bytes.get(i + 1) == Some(&b'}') => {
                    push_text(&mut segments, source, text_start, i);
                    segments.push(Segment::Text("}"));
                    i += 2;
                    text_start = i;
                }
                b'}' => {
                    return Err(SqlcellError::template(
                        i,
                        "unmatched '}' (write '}}' for a literal brace)",
                    ))
                }
                _ => i += 1,
            }
        }
        push_text(&mut segments, source, text_start, bytes.len());

        Ok(Template { source, segments })
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    pub fn segments(&self) -> &[Segment<'a>] {
        &self.segments
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &Placeholder<'a>> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(p) => Some(p),
            Segment::Text(_) => None,
        })
    }

    /// Distinct variable names referenced by the template.
    pub fn names(&self) -> BTreeSet<&'a str> {
        self.placeholders().map(|p| p.name).collect()
    }

    /// Renders the template against `scope`.
    ///
    /// Every name is resolved before the quoter is consulted, so an
    /// unresolved variable fails without touching the database.
    pub fn render<Q>(&self, scope: &Scope, quoter: &Q, encoder: &dyn GeometryAdapter) -> Result<String>
    where
        Q: Quote + ?Sized,
    {
        if let Some(missing) = self.placeholders().find(|p| !scope.contains(p.name)) {
            return Err(SqlcellError::UnresolvedVariable(missing.name.to_string()));
        }

        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Placeholder(p) => {
                    let value = scope
                        .get(p.name)
                        .ok_or_else(|| SqlcellError::UnresolvedVariable(p.name.to_string()))?;
                    let rendered = match p.render {
                        Render::Literal => render_literal(value, quoter, encoder)?,
                        Render::Identifier => render_identifier(p, value, quoter)?,
                    };
                    out.push_str(&rendered);
                }
            }
        }
        Ok(out)
    }
}

fn push_text<'a>(segments: &mut Vec<Segment<'a>>, source: &'a str, from: usize, to: usize) {
    if to > from {
        segments.push(Segment::Text(&source[from..to]));
    }
}

/// Parses `template` and renders it against `scope`.
pub fn substitute<Q>(template: &str, scope: &Scope, quoter: &Q, encoder: &dyn GeometryAdapter) -> Result<String>
where
    Q: Quote + ?Sized,
{
    Template::parse(template)?.render(scope, quoter, encoder)
}

fn render_literal<Q>(value: &Value, quoter: &Q, encoder: &dyn GeometryAdapter) -> Result<String>
where
    Q: Quote + ?Sized,
{
    match value {
        Value::List(items) if items.is_empty() => Ok("(NULL)".to_string()),
        Value::List(items) => {
            let parts = items
                .iter()
                .map(|item| render_literal(item, quoter, encoder))
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("({})", parts.join(", ")))
        }
        Value::Geometry(g) => quoter.quote_literal(&Value::Text(encoder.encode(g)?)),
        scalar => quoter.quote_literal(scalar),
    }
}

fn render_identifier<Q>(p: &Placeholder<'_>, value: &Value, quoter: &Q) -> Result<String>
where
    Q: Quote + ?Sized,
{
    let name = value.as_text().ok_or_else(|| {
        SqlcellError::template(
            p.position,
            format!(
                "'{{{}:i}}' needs a text value, got {}",
                p.name,
                value.type_name()
            ),
        )
    })?;
    let parts = name
        .split('.')
        .map(|part| {
            if part.is_empty() || part.contains('\0') {
                Err(SqlcellError::template(
                    p.position,
                    format!("'{}' is not a valid qualified name", name.escape_debug()),
                ))
            } else {
                quoter.quote_identifier(part)
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{default_adapter, OpaqueAdapter};
    use std::cell::Cell;

    /// Counts quoting calls so tests can assert no database access happened.
    struct CountingQuoter {
        conn: Connection,
        calls: Cell<usize>,
    }

    impl CountingQuoter {
        fn new() -> Self {
            CountingQuoter {
                conn: Connection::open_in_memory().unwrap(),
                calls: Cell::new(0),
            }
        }
    }

    impl Quote for CountingQuoter {
        fn quote_literal(&self, value: &Value) -> Result<String> {
            self.calls.set(self.calls.get() + 1);
            self.conn.quote_literal(value)
        }

        fn quote_identifier(&self, ident: &str) -> Result<String> {
            self.calls.set(self.calls.get() + 1);
            self.conn.quote_identifier(ident)
        }
    }

    fn render(template: &str, scope: &Scope) -> Result<String> {
        let conn = Connection::open_in_memory().unwrap();
        substitute(template, scope, &conn, default_adapter().as_ref())
    }

    #[test]
    fn test_parse_segments() {
        let tpl = Template::parse("SELECT * FROM t WHERE id = {id} AND name = {name:l}").unwrap();
        let names: Vec<&str> = tpl.names().into_iter().collect();
        assert_eq!(names, vec!["id", "name"]);
        assert_eq!(tpl.placeholders().count(), 2);
        assert_eq!(tpl.placeholders().next().unwrap().position, 27);
    }

    #[test]
    fn test_integer_substitution() {
        let scope = Scope::new().with("id", 42i64);
        assert_eq!(
            render("SELECT * FROM t WHERE id = {id}", &scope).unwrap(),
            "SELECT * FROM t WHERE id = 42"
        );
    }

    #[test]
    fn test_repeated_placeholder() {
        let scope = Scope::new().with("x", 7i64);
        assert_eq!(
            render("SELECT {x}, {x} + {x}", &scope).unwrap(),
            "SELECT 7, 7 + 7"
        );
    }

    #[test]
    fn test_scalar_literals() {
        let scope = Scope::new()
            .with("s", "O'Brien")
            .with("r", 1.5)
            .with("n", Value::Null)
            .with("b", true)
            .with("blob", vec![0xCAu8, 0xFE]);
        assert_eq!(
            render("{s} {r} {n} {b} {blob}", &scope).unwrap(),
            "'O''Brien' 1.5 NULL 1 X'CAFE'"
        );
    }

    #[test]
    fn test_list_renders_as_tuple() {
        let ids: Value = vec![1i64, 2, 3].into_iter().collect();
        let names: Value = vec!["a", "b'c"].into_iter().collect();
        let scope = Scope::new()
            .with("ids", ids)
            .with("names", names)
            .with("none", Value::List(vec![]));
        assert_eq!(
            render("id IN {ids} OR name IN {names} OR id IN {none}", &scope).unwrap(),
            "id IN (1, 2, 3) OR name IN ('a', 'b''c') OR id IN (NULL)"
        );
    }

    #[test]
    fn test_identifier_placeholder() {
        let scope = Scope::new()
            .with("tbl", "main.odd\"name")
            .with("num", 3i64);
        assert_eq!(
            render("SELECT * FROM {tbl:i}", &scope).unwrap(),
            "SELECT * FROM \"main\".\"odd\"\"name\""
        );
        assert!(matches!(
            render("SELECT * FROM {num:i}", &scope),
            Err(SqlcellError::Template { .. })
        ));
        let scope = Scope::new().with("tbl", "main..x");
        assert!(render("SELECT * FROM {tbl:i}", &scope).is_err());
    }

    #[test]
    fn test_text_with_nul_survives_quoting() {
        let conn = Connection::open_in_memory().unwrap();
        let text = "abc\u{0}def";
        let scope = Scope::new().with("s", text);
        let sql = substitute("SELECT {s}", &scope, &conn, &OpaqueAdapter).unwrap();
        assert_eq!(sql, "SELECT CAST(X'61626300646566' AS TEXT)");

        let back: String = conn.query_row(&sql, [], |row| row.get(0)).unwrap();
        assert_eq!(back, text);

        let scope = Scope::new().with("tbl", "odd\u{0}name");
        assert!(matches!(
            substitute("SELECT * FROM {tbl:i}", &scope, &conn, &OpaqueAdapter),
            Err(SqlcellError::Template { .. })
        ));
    }

    #[test]
    fn test_escaped_braces_pass_through() {
        let scope = Scope::new().with("id", 1i64);
        assert_eq!(
            render("SELECT json_extract('{{\"a\": {{\"b\": 2}}}}', '$.a.b'), {id}", &scope).unwrap(),
            "SELECT json_extract('{\"a\": {\"b\": 2}}', '$.a.b'), 1"
        );
        assert_eq!(render("SELECT '{{'", &Scope::new()).unwrap(), "SELECT '{'");
    }

    #[test]
    fn test_malformed_templates() {
        for (bad, position) in [
            ("SELECT {id", 7),
            ("SELECT }", 7),
            ("SELECT {}", 7),
            ("SELECT {\"a\": 1}", 7),
            ("SELECT {id:x}", 7),
            ("SELECT { id }", 7),
        ] {
            match Template::parse(bad) {
                Err(SqlcellError::Template { position: p, .. }) => assert_eq!(p, position, "{}", bad),
                other => panic!("expected template error for {:?}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_unresolved_variable_does_no_quoting() {
        let quoter = CountingQuoter::new();
        let scope = Scope::new().with("a", 1i64);
        let result = substitute("SELECT {a}, {b}", &scope, &quoter, &OpaqueAdapter);
        match result {
            Err(SqlcellError::UnresolvedVariable(name)) => assert_eq!(name, "b"),
            other => panic!("expected unresolved variable, got {:?}", other),
        }
        assert_eq!(quoter.calls.get(), 0);
    }

    #[test]
    fn test_substitution_leaves_scope_untouched() {
        let scope = Scope::new().with("id", 5i64).with("name", "x");
        let before = scope.clone();
        let first = render("SELECT {id}, {name}", &scope).unwrap();
        let second = render("SELECT {id}, {name}", &scope).unwrap();
        assert_eq!(first, second);
        assert_eq!(scope, before);
    }

    #[test]
    fn test_opaque_geometry_is_quoted_as_text() {
        let scope = Scope::new().with(
            "g",
            crate::geometry::Geometry::Opaque("POINT(1 2)".to_string()),
        );
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(
            substitute("SELECT {g}", &scope, &conn, &OpaqueAdapter).unwrap(),
            "SELECT 'POINT(1 2)'"
        );
    }

    #[cfg(feature = "geo")]
    #[test]
    fn test_geometry_is_encoded_then_quoted() {
        use crate::geometry::{Geometry, WktAdapter};
        use geo_types::point;

        let scope = Scope::new().with("p", Geometry::new(point!(x: 1.5, y: 2.5)).with_srid(4326));
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(
            substitute("SELECT {p}", &scope, &conn, &WktAdapter).unwrap(),
            "SELECT 'SRID=4326;POINT(1.5 2.5)'"
        );
    }
}
