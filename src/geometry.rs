/*
 * Geometry Adaptation Module
 *
 * Converts between the textual geometry representation stored in the
 * database (WKT, optionally prefixed with an SRID as EWKT) and an in-memory
 * geometry object model.
 *
 * Features:
 * - Pluggable decode/encode strategy (`GeometryAdapter`)
 * - WKT/EWKT adapter backed by `geo-types` + `wkt` (feature `geo`)
 * - Opaque passthrough adapter when the geometry library is unavailable
 * - Registry mapping declared column types to adapters
 * - `ToSql`/`FromSql` so geometries bind directly as statement parameters
 */

use crate::core::{Result, SqlcellError};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Declared column types treated as geometry when geometry support is on.
pub const GEOMETRY_TYPE_NAMES: &[&str] = &[
    "GEOMETRY",
    "GEOGRAPHY",
    "POINT",
    "LINESTRING",
    "POLYGON",
    "MULTIPOINT",
    "MULTILINESTRING",
    "MULTIPOLYGON",
    "GEOMETRYCOLLECTION",
];

/// A geospatial value held by a result row or a scope variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// Decoded geometry with its optional spatial reference id
    #[cfg(feature = "geo")]
    Shape {
        srid: Option<i32>,
        shape: geo_types::Geometry<f64>,
    },
    /// Raw database text, kept as-is when no geometry library decodes it
    Opaque(String),
}

impl Geometry {
    /// Wraps a shape. `Line`, `Rect` and `Triangle` are stored as the
    /// `LineString`/`Polygon` they are written as in WKT.
    #[cfg(feature = "geo")]
    pub fn new(shape: impl Into<geo_types::Geometry<f64>>) -> Self {
        Geometry::Shape {
            srid: None,
            shape: normalize(shape.into()),
        }
    }

    #[cfg(feature = "geo")]
    pub fn with_srid(self, srid: i32) -> Self {
        match self {
            Geometry::Shape { shape, .. } => Geometry::Shape {
                srid: Some(srid),
                shape,
            },
            opaque => opaque,
        }
    }

    #[cfg(feature = "geo")]
    pub fn shape(&self) -> Option<&geo_types::Geometry<f64>> {
        match self {
            Geometry::Shape { shape, .. } => Some(shape),
            Geometry::Opaque(_) => None,
        }
    }

    pub fn srid(&self) -> Option<i32> {
        match self {
            #[cfg(feature = "geo")]
            Geometry::Shape { srid, .. } => *srid,
            Geometry::Opaque(_) => None,
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, Geometry::Opaque(_))
    }

    /// Geometry kind name, `"Opaque"` for undecoded text.
    pub fn kind(&self) -> &'static str {
        match self {
            #[cfg(feature = "geo")]
            Geometry::Shape { shape, .. } => match shape {
                geo_types::Geometry::Point(_) => "Point",
                geo_types::Geometry::Line(_) | geo_types::Geometry::LineString(_) => "LineString",
                geo_types::Geometry::Polygon(_)
                | geo_types::Geometry::Rect(_)
                | geo_types::Geometry::Triangle(_) => "Polygon",
                geo_types::Geometry::MultiPoint(_) => "MultiPoint",
                geo_types::Geometry::MultiLineString(_) => "MultiLineString",
                geo_types::Geometry::MultiPolygon(_) => "MultiPolygon",
                geo_types::Geometry::GeometryCollection(_) => "GeometryCollection",
            },
            Geometry::Opaque(_) => "Opaque",
        }
    }

    /// Database text form: EWKT when an SRID is set, plain WKT otherwise.
    pub fn to_text(&self) -> String {
        match self {
            #[cfg(feature = "geo")]
            Geometry::Shape { srid, shape } => {
                use wkt::ToWkt;
                match srid {
                    Some(srid) => format!("SRID={};{}", srid, shape.wkt_string()),
                    None => shape.wkt_string(),
                }
            }
            Geometry::Opaque(raw) => raw.clone(),
        }
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

#[cfg(feature = "geo")]
fn normalize(shape: geo_types::Geometry<f64>) -> geo_types::Geometry<f64> {
    use geo_types::Geometry as G;
    match shape {
        G::Line(line) => G::LineString(geo_types::LineString::from(vec![line.start, line.end])),
        G::Rect(rect) => G::Polygon(rect.to_polygon()),
        G::Triangle(triangle) => G::Polygon(triangle.to_polygon()),
        G::GeometryCollection(collection) => G::GeometryCollection(geo_types::GeometryCollection(
            collection.0.into_iter().map(normalize).collect(),
        )),
        other => other,
    }
}

#[cfg(feature = "geo")]
impl From<geo_types::Geometry<f64>> for Geometry {
    fn from(shape: geo_types::Geometry<f64>) -> Self {
        Geometry::new(shape)
    }
}

/// Decode/encode strategy for geometry column values.
pub trait GeometryAdapter: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Parses database text into a geometry. Malformed input is an error,
    /// never a degenerate geometry.
    fn decode(&self, raw: &str) -> Result<Geometry>;

    /// Produces the text literal the database accepts for `geometry`.
    fn encode(&self, geometry: &Geometry) -> Result<String>;
}

/// WKT/EWKT adapter backed by `geo-types` and `wkt`.
#[cfg(feature = "geo")]
#[derive(Debug, Default, Clone, Copy)]
pub struct WktAdapter;

#[cfg(feature = "geo")]
impl GeometryAdapter for WktAdapter {
    fn name(&self) -> &'static str {
        "wkt"
    }

    fn decode(&self, raw: &str) -> Result<Geometry> {
        use std::str::FromStr;

        let (srid, body) = split_srid(raw)?;
        if body.is_empty() {
            return Err(SqlcellError::GeometryDecode("empty geometry text".to_string()));
        }
        let parsed = wkt::Wkt::<f64>::from_str(body)
            .map_err(|e| SqlcellError::GeometryDecode(format!("{}: {}", e, truncate(body))))?;
        let shape = geo_types::Geometry::<f64>::try_from(parsed)
            .map_err(|e| SqlcellError::GeometryDecode(format!("{}: {}", e, truncate(body))))?;
        Ok(Geometry::Shape { srid, shape })
    }

    fn encode(&self, geometry: &Geometry) -> Result<String> {
        match geometry {
            Geometry::Shape { .. } => Ok(geometry.to_text()),
            // Validate foreign text before it is embedded in a statement
            Geometry::Opaque(raw) => Ok(self.decode(raw)?.to_text()),
        }
    }
}

/// Passthrough adapter: geometry columns stay raw text.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpaqueAdapter;

impl GeometryAdapter for OpaqueAdapter {
    fn name(&self) -> &'static str {
        "opaque"
    }

    fn decode(&self, raw: &str) -> Result<Geometry> {
        Ok(Geometry::Opaque(raw.to_string()))
    }

    fn encode(&self, geometry: &Geometry) -> Result<String> {
        Ok(geometry.to_text())
    }
}

/// The best adapter this build supports.
pub fn default_adapter() -> Arc<dyn GeometryAdapter> {
    #[cfg(feature = "geo")]
    {
        Arc::new(WktAdapter)
    }
    #[cfg(not(feature = "geo"))]
    {
        Arc::new(OpaqueAdapter)
    }
}

/// Splits an optional `SRID=<n>;` prefix off geometry text.
fn split_srid(raw: &str) -> Result<(Option<i32>, &str)> {
    let trimmed = raw.trim();
    if let Some((head, body)) = trimmed.split_once(';') {
        let head = head.trim();
        if head.get(..5).map_or(false, |p| p.eq_ignore_ascii_case("SRID=")) {
            let srid = head[5..].trim().parse::<i32>().map_err(|_| {
                SqlcellError::GeometryDecode(format!("invalid SRID prefix '{}'", head))
            })?;
            return Ok((Some(srid), body.trim()));
        }
    }
    Ok((None, trimmed))
}

#[cfg(feature = "geo")]
fn truncate(text: &str) -> String {
    const MAX: usize = 60;
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Maps declared column types to the adapter that decodes their values.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    adapters: HashMap<String, Arc<dyn GeometryAdapter>>,
    geometry: Option<Arc<dyn GeometryAdapter>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with geometry support through `adapter`.
    pub fn with_geometry(adapter: Arc<dyn GeometryAdapter>) -> Self {
        let mut registry = Self::new();
        registry.register_geometry(adapter);
        registry
    }

    /// Registers `adapter` for one declared type name.
    pub fn register(&mut self, type_name: &str, adapter: Arc<dyn GeometryAdapter>) {
        self.adapters.insert(normalize_type_name(type_name), adapter);
    }

    /// Registers `adapter` for every geometry type name and as the encoder
    /// used for geometry scope variables.
    pub fn register_geometry(&mut self, adapter: Arc<dyn GeometryAdapter>) {
        for name in GEOMETRY_TYPE_NAMES {
            self.register(name, Arc::clone(&adapter));
        }
        self.geometry = Some(adapter);
    }

    /// Removes geometry decoding; geometry text then comes back as plain text.
    pub fn unregister_geometry(&mut self) {
        for name in GEOMETRY_TYPE_NAMES {
            self.adapters.remove(*name);
        }
        self.geometry = None;
    }

    pub fn has_geometry(&self) -> bool {
        self.geometry.is_some()
    }

    /// Adapter for a column's declared type, if one is registered.
    pub fn lookup(&self, decl_type: &str) -> Option<&Arc<dyn GeometryAdapter>> {
        self.adapters.get(&normalize_type_name(decl_type))
    }

    /// Encoder for geometry values; opaque passthrough when none is registered.
    pub fn encoder(&self) -> Arc<dyn GeometryAdapter> {
        self.geometry
            .clone()
            .unwrap_or_else(|| Arc::new(OpaqueAdapter))
    }
}

/// `geometry(Point, 4326)` -> `GEOMETRY`
fn normalize_type_name(name: &str) -> String {
    name.split('(').next().unwrap_or("").trim().to_ascii_uppercase()
}

impl ToSql for Geometry {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Geometry::Opaque(raw) => ToSqlOutput::Borrowed(ValueRef::Text(raw.as_bytes())),
            #[cfg(feature = "geo")]
            Geometry::Shape { .. } => ToSqlOutput::Owned(SqlValue::Text(self.to_text())),
        })
    }
}

impl FromSql for Geometry {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        default_adapter()
            .decode(text)
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}
