//! Planar geometry values and the spatial predicates used by filters.
//!
//! Geometries arrive either as WKT (filter literals, `geography'POINT(1 2)'`)
//! or as GeoJSON (location and feature documents). Predicates are evaluated
//! on the plane, matching what the store computes on SRID 4326 geometries.
//! Multi-part geometries and collections are treated as the union of their
//! parts.

use crate::error::{QueryError, Result};
use serde_json::{json, Value as JsonValue};
use std::fmt;

const EPSILON: f64 = 1e-12;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

impl Coord {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn distance(self, other: Coord) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    fn same(self, other: Coord) -> bool {
        (self.x - other.x).abs() < EPSILON && (self.y - other.y).abs() < EPSILON
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Geometry {
    Point(Coord),
    LineString(Vec<Coord>),
    /// Exterior ring first, then holes. Rings are closed.
    Polygon(Vec<Vec<Coord>>),
    MultiPoint(Vec<Coord>),
    MultiLineString(Vec<Vec<Coord>>),
    MultiPolygon(Vec<Vec<Vec<Coord>>>),
    GeometryCollection(Vec<Geometry>),
}

/// Where a point lies relative to a geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
    Interior,
    Boundary,
    Exterior,
}

// --- Reading and writing ---

impl Geometry {
    /// Parse WKT, optionally prefixed with `SRID=n;`.
    pub fn from_wkt(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let body = match trimmed.split_once(';') {
            Some((srid, rest)) if srid.trim().to_ascii_uppercase().starts_with("SRID=") => {
                rest.trim()
            }
            _ => trimmed,
        };
        parse_wkt_body(text, body)
    }

    /// Read a GeoJSON geometry, or the geometry of a GeoJSON Feature.
    pub fn from_geojson(value: &JsonValue) -> Result<Self> {
        let invalid = |msg: &str| QueryError::parse(value.to_string(), msg.to_string());
        let kind = value
            .get("type")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| invalid("GeoJSON without type"))?;
        match kind {
            "Feature" => {
                let geometry = value
                    .get("geometry")
                    .ok_or_else(|| invalid("Feature without geometry"))?;
                return Self::from_geojson(geometry);
            }
            "GeometryCollection" => {
                let members = value
                    .get("geometries")
                    .and_then(JsonValue::as_array)
                    .ok_or_else(|| invalid("GeometryCollection without geometries"))?;
                return members
                    .iter()
                    .map(Self::from_geojson)
                    .collect::<Result<Vec<_>>>()
                    .map(Geometry::GeometryCollection);
            }
            _ => {}
        }
        let coordinates = value
            .get("coordinates")
            .ok_or_else(|| invalid("GeoJSON without coordinates"))?;
        let source = value.to_string();
        match kind {
            "Point" => Ok(Geometry::Point(
                json_coord(coordinates).ok_or_else(|| invalid("bad Point coordinates"))?,
            )),
            "LineString" => {
                let coords = json_coords(coordinates).ok_or_else(|| invalid("bad coordinates"))?;
                line(&source, coords).map(Geometry::LineString)
            }
            "Polygon" => json_polygon(&source, coordinates).map(Geometry::Polygon),
            "MultiPoint" => json_coords(coordinates)
                .map(Geometry::MultiPoint)
                .ok_or_else(|| invalid("bad MultiPoint coordinates")),
            "MultiLineString" => json_array(coordinates)
                .ok_or_else(|| invalid("bad MultiLineString coordinates"))?
                .iter()
                .map(|part| {
                    let coords = json_coords(part).ok_or_else(|| invalid("bad coordinates"))?;
                    line(&source, coords)
                })
                .collect::<Result<Vec<_>>>()
                .map(Geometry::MultiLineString),
            "MultiPolygon" => json_array(coordinates)
                .ok_or_else(|| invalid("bad MultiPolygon coordinates"))?
                .iter()
                .map(|part| json_polygon(&source, part))
                .collect::<Result<Vec<_>>>()
                .map(Geometry::MultiPolygon),
            other => Err(invalid(&format!("unsupported GeoJSON type '{}'", other))),
        }
    }

    pub fn to_wkt(&self) -> String {
        fn list(coords: &[Coord]) -> String {
            coords
                .iter()
                .map(|c| format!("{} {}", c.x, c.y))
                .collect::<Vec<_>>()
                .join(", ")
        }
        fn rings(rings: &[Vec<Coord>]) -> String {
            rings
                .iter()
                .map(|r| format!("({})", list(r)))
                .collect::<Vec<_>>()
                .join(", ")
        }
        fn tagged(tag: &str, parts: Vec<String>) -> String {
            if parts.is_empty() {
                format!("{} EMPTY", tag)
            } else {
                format!("{} ({})", tag, parts.join(", "))
            }
        }
        match self {
            Geometry::Point(c) => format!("POINT ({} {})", c.x, c.y),
            Geometry::LineString(coords) => format!("LINESTRING ({})", list(coords)),
            Geometry::Polygon(parts) => format!("POLYGON ({})", rings(parts)),
            Geometry::MultiPoint(points) => tagged(
                "MULTIPOINT",
                points.iter().map(|c| format!("({} {})", c.x, c.y)).collect(),
            ),
            Geometry::MultiLineString(lines) => tagged(
                "MULTILINESTRING",
                lines.iter().map(|l| format!("({})", list(l))).collect(),
            ),
            Geometry::MultiPolygon(polygons) => tagged(
                "MULTIPOLYGON",
                polygons.iter().map(|p| format!("({})", rings(p))).collect(),
            ),
            Geometry::GeometryCollection(members) => tagged(
                "GEOMETRYCOLLECTION",
                members.iter().map(Geometry::to_wkt).collect(),
            ),
        }
    }

    pub fn to_geojson(&self) -> JsonValue {
        fn pair(c: &Coord) -> JsonValue {
            json!([c.x, c.y])
        }
        fn list(coords: &[Coord]) -> Vec<JsonValue> {
            coords.iter().map(pair).collect()
        }
        fn rings(rings: &[Vec<Coord>]) -> Vec<Vec<JsonValue>> {
            rings.iter().map(|r| list(r)).collect()
        }
        match self {
            Geometry::Point(c) => json!({"type": "Point", "coordinates": pair(c)}),
            Geometry::LineString(coords) => json!({"type": "LineString", "coordinates": list(coords)}),
            Geometry::Polygon(parts) => json!({"type": "Polygon", "coordinates": rings(parts)}),
            Geometry::MultiPoint(points) => json!({"type": "MultiPoint", "coordinates": list(points)}),
            Geometry::MultiLineString(lines) => {
                json!({"type": "MultiLineString", "coordinates": rings(lines)})
            }
            Geometry::MultiPolygon(polygons) => json!({
                "type": "MultiPolygon",
                "coordinates": polygons.iter().map(|p| rings(p)).collect::<Vec<_>>(),
            }),
            Geometry::GeometryCollection(members) => json!({
                "type": "GeometryCollection",
                "geometries": members.iter().map(Geometry::to_geojson).collect::<Vec<_>>(),
            }),
        }
    }

    /// Topological dimension; the highest of the parts for a collection.
    fn dimension(&self) -> u8 {
        match self {
            Geometry::Point(_) | Geometry::MultiPoint(_) => 0,
            Geometry::LineString(_) | Geometry::MultiLineString(_) => 1,
            Geometry::Polygon(_) | Geometry::MultiPolygon(_) => 2,
            Geometry::GeometryCollection(members) => {
                members.iter().map(Geometry::dimension).max().unwrap_or(0)
            }
        }
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wkt())
    }
}

fn parse_wkt_body(source: &str, body: &str) -> Result<Geometry> {
    let body = body.trim();
    let upper = body.to_ascii_uppercase();
    if let Some(tag) = upper.strip_suffix("EMPTY") {
        return match tag.trim() {
            "MULTIPOINT" => Ok(Geometry::MultiPoint(Vec::new())),
            "MULTILINESTRING" => Ok(Geometry::MultiLineString(Vec::new())),
            "MULTIPOLYGON" => Ok(Geometry::MultiPolygon(Vec::new())),
            "GEOMETRYCOLLECTION" => Ok(Geometry::GeometryCollection(Vec::new())),
            other => Err(QueryError::parse(
                source,
                format!("empty {} is not supported", other),
            )),
        };
    }
    let open = body
        .find('(')
        .ok_or_else(|| QueryError::parse(source, "missing '(' in WKT"))?;
    if !body.ends_with(')') {
        return Err(QueryError::parse(source, "missing ')' in WKT"));
    }
    let tag = upper[..open].trim().to_string();
    let inner = &body[open + 1..body.len() - 1];
    match tag.as_str() {
        "POINT" => {
            let coords = parse_coord_list(source, inner)?;
            match coords.as_slice() {
                [c] => Ok(Geometry::Point(*c)),
                _ => Err(QueryError::parse(source, "POINT takes one coordinate")),
            }
        }
        "LINESTRING" => line(source, parse_coord_list(source, inner)?).map(Geometry::LineString),
        "POLYGON" => wkt_polygon(source, inner).map(Geometry::Polygon),
        "MULTIPOINT" => {
            // Both `((1 2), (3 4))` and `(1 2, 3 4)` are accepted.
            if inner.contains('(') {
                split_rings(source, inner)?
                    .into_iter()
                    .map(|part| match parse_coord_list(source, part)?.as_slice() {
                        [c] => Ok(*c),
                        _ => Err(QueryError::parse(source, "MULTIPOINT member takes one coordinate")),
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(Geometry::MultiPoint)
            } else {
                parse_coord_list(source, inner).map(Geometry::MultiPoint)
            }
        }
        "MULTILINESTRING" => split_rings(source, inner)?
            .into_iter()
            .map(|part| line(source, parse_coord_list(source, part)?))
            .collect::<Result<Vec<_>>>()
            .map(Geometry::MultiLineString),
        "MULTIPOLYGON" => split_rings(source, inner)?
            .into_iter()
            .map(|part| wkt_polygon(source, part))
            .collect::<Result<Vec<_>>>()
            .map(Geometry::MultiPolygon),
        "GEOMETRYCOLLECTION" => split_members(source, inner)?
            .into_iter()
            .map(|member| parse_wkt_body(source, member))
            .collect::<Result<Vec<_>>>()
            .map(Geometry::GeometryCollection),
        other => Err(QueryError::parse(
            source,
            format!("unsupported geometry type '{}'", other),
        )),
    }
}

fn line(source: &str, coords: Vec<Coord>) -> Result<Vec<Coord>> {
    if coords.len() < 2 {
        return Err(QueryError::parse(source, "line needs two coordinates"));
    }
    Ok(coords)
}

fn wkt_polygon(source: &str, inner: &str) -> Result<Vec<Vec<Coord>>> {
    let rings = split_rings(source, inner)?
        .into_iter()
        .map(|ring| parse_coord_list(source, ring).and_then(|c| close_ring(source, c)))
        .collect::<Result<Vec<_>>>()?;
    if rings.is_empty() {
        return Err(QueryError::parse(source, "polygon needs a ring"));
    }
    Ok(rings)
}

fn parse_coord_list(source: &str, text: &str) -> Result<Vec<Coord>> {
    text.split(',')
        .map(|pair| {
            let mut parts = pair.split_whitespace().map(str::parse::<f64>);
            match (parts.next(), parts.next()) {
                (Some(Ok(x)), Some(Ok(y))) => Ok(Coord::new(x, y)),
                _ => Err(QueryError::parse(
                    source,
                    format!("bad coordinate '{}'", pair.trim()),
                )),
            }
        })
        .collect()
}

/// Contents of each top-level parenthesised group.
fn split_rings<'a>(source: &str, text: &'a str) -> Result<Vec<&'a str>> {
    let mut rings = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, ch) in text.char_indices() {
        match ch {
            '(' => {
                if depth == 0 {
                    start = i + 1;
                }
                depth += 1;
            }
            ')' => {
                if depth == 0 {
                    return Err(QueryError::parse(source, "unbalanced ')' in WKT"));
                }
                depth -= 1;
                if depth == 0 {
                    rings.push(&text[start..i]);
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(QueryError::parse(source, "unbalanced '(' in WKT"));
    }
    Ok(rings)
}

/// Split on commas outside parentheses.
fn split_members<'a>(source: &str, text: &'a str) -> Result<Vec<&'a str>> {
    let mut members = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, ch) in text.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| QueryError::parse(source, "unbalanced ')' in WKT"))?;
            }
            ',' if depth == 0 => {
                members.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(QueryError::parse(source, "unbalanced '(' in WKT"));
    }
    members.push(&text[start..]);
    Ok(members)
}

fn close_ring(source: &str, mut ring: Vec<Coord>) -> Result<Vec<Coord>> {
    if ring.len() < 3 {
        return Err(QueryError::parse(source, "polygon ring needs three coordinates"));
    }
    if let (Some(first), Some(last)) = (ring.first().copied(), ring.last().copied()) {
        if !first.same(last) {
            ring.push(first);
        }
    }
    Ok(ring)
}

fn json_coord(value: &JsonValue) -> Option<Coord> {
    let array = value.as_array()?;
    Some(Coord::new(array.first()?.as_f64()?, array.get(1)?.as_f64()?))
}

fn json_coords(value: &JsonValue) -> Option<Vec<Coord>> {
    value.as_array()?.iter().map(json_coord).collect()
}

fn json_array(value: &JsonValue) -> Option<&Vec<JsonValue>> {
    value.as_array()
}

fn json_polygon(source: &str, value: &JsonValue) -> Result<Vec<Vec<Coord>>> {
    let rings = json_array(value)
        .ok_or_else(|| QueryError::parse(source, "bad Polygon coordinates"))?
        .iter()
        .map(|ring| {
            let coords = json_coords(ring).ok_or_else(|| QueryError::parse(source, "bad ring"))?;
            close_ring(source, coords)
        })
        .collect::<Result<Vec<_>>>()?;
    if rings.is_empty() {
        return Err(QueryError::parse(source, "Polygon needs a ring"));
    }
    Ok(rings)
}

// --- Primitive helpers ---

fn orientation(a: Coord, b: Coord, c: Coord) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn on_segment(p: Coord, a: Coord, b: Coord) -> bool {
    orientation(a, b, p).abs() < EPSILON
        && p.x >= a.x.min(b.x) - EPSILON
        && p.x <= a.x.max(b.x) + EPSILON
        && p.y >= a.y.min(b.y) - EPSILON
        && p.y <= a.y.max(b.y) + EPSILON
}

fn segments_intersect(p1: Coord, p2: Coord, q1: Coord, q2: Coord) -> bool {
    segments_cross(p1, p2, q1, q2)
        || on_segment(p1, q1, q2)
        || on_segment(p2, q1, q2)
        || on_segment(q1, p1, p2)
        || on_segment(q2, p1, p2)
}

/// Crossing at a single point interior to both segments.
fn segments_cross(p1: Coord, p2: Coord, q1: Coord, q2: Coord) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);
    ((d1 > EPSILON && d2 < -EPSILON) || (d1 < -EPSILON && d2 > EPSILON))
        && ((d3 > EPSILON && d4 < -EPSILON) || (d3 < -EPSILON && d4 > EPSILON))
}

fn any_crossing(mine: &[(Coord, Coord)], theirs: &[(Coord, Coord)]) -> bool {
    mine.iter()
        .any(|(a, b)| theirs.iter().any(|(c, d)| segments_cross(*a, *b, *c, *d)))
}

fn point_segment_distance(p: Coord, a: Coord, b: Coord) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len2 = dx * dx + dy * dy;
    if len2 < EPSILON {
        return p.distance(a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len2).clamp(0.0, 1.0);
    p.distance(Coord::new(a.x + t * dx, a.y + t * dy))
}

fn ring_location(p: Coord, ring: &[Coord]) -> Location {
    let mut inside = false;
    for w in ring.windows(2) {
        let (a, b) = (w[0], w[1]);
        if on_segment(p, a, b) {
            return Location::Boundary;
        }
        if (a.y > p.y) != (b.y > p.y) {
            let x = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
            if p.x < x {
                inside = !inside;
            }
        }
    }
    if inside {
        Location::Interior
    } else {
        Location::Exterior
    }
}

fn polygon_location(p: Coord, rings: &[Vec<Coord>]) -> Location {
    let mut iter = rings.iter();
    let outer = match iter.next() {
        Some(r) => ring_location(p, r),
        None => return Location::Exterior,
    };
    if outer != Location::Interior {
        return outer;
    }
    for hole in iter {
        match ring_location(p, hole) {
            Location::Interior => return Location::Exterior,
            Location::Boundary => return Location::Boundary,
            Location::Exterior => {}
        }
    }
    Location::Interior
}

/// Endpoints shared by an odd number of open lines (the mod-2 rule).
fn line_boundary(lines: &[Vec<Coord>]) -> Vec<Coord> {
    let endpoints: Vec<Coord> = lines
        .iter()
        .filter_map(|l| match (l.first(), l.last()) {
            (Some(a), Some(b)) if !a.same(*b) => Some([*a, *b]),
            _ => None,
        })
        .flatten()
        .collect();
    let mut boundary: Vec<Coord> = Vec::new();
    for p in &endpoints {
        let count = endpoints.iter().filter(|q| q.same(*p)).count();
        if count % 2 == 1 && !boundary.iter().any(|q| q.same(*p)) {
            boundary.push(*p);
        }
    }
    boundary
}

fn lines_location(p: Coord, lines: &[Vec<Coord>]) -> Location {
    if line_boundary(lines).iter().any(|q| q.same(p)) {
        return Location::Boundary;
    }
    if lines
        .iter()
        .any(|l| l.windows(2).any(|w| on_segment(p, w[0], w[1])))
    {
        Location::Interior
    } else {
        Location::Exterior
    }
}

/// Union rule: interior to any part wins, then boundary of any part.
fn union_location(locations: impl Iterator<Item = Location>) -> Location {
    let mut out = Location::Exterior;
    for location in locations {
        match location {
            Location::Interior => return Location::Interior,
            Location::Boundary => out = Location::Boundary,
            Location::Exterior => {}
        }
    }
    out
}

fn ring_segments(rings: &[Vec<Coord>]) -> impl Iterator<Item = (Coord, Coord)> + '_ {
    rings
        .iter()
        .flat_map(|r| r.windows(2).map(|w| (w[0], w[1])))
}

impl Geometry {
    fn segments(&self) -> Vec<(Coord, Coord)> {
        match self {
            Geometry::Point(_) | Geometry::MultiPoint(_) => Vec::new(),
            Geometry::LineString(coords) => coords.windows(2).map(|w| (w[0], w[1])).collect(),
            Geometry::Polygon(rings) | Geometry::MultiLineString(rings) => {
                ring_segments(rings).collect()
            }
            Geometry::MultiPolygon(polygons) => {
                polygons.iter().flat_map(|p| ring_segments(p)).collect()
            }
            Geometry::GeometryCollection(members) => {
                members.iter().flat_map(Geometry::segments).collect()
            }
        }
    }

    /// Boundary segments of the areal parts.
    fn area_segments(&self) -> Vec<(Coord, Coord)> {
        match self {
            Geometry::Polygon(_) | Geometry::MultiPolygon(_) => self.segments(),
            Geometry::GeometryCollection(members) => {
                members.iter().flat_map(Geometry::area_segments).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Isolated points of the geometry.
    fn points(&self) -> Vec<Coord> {
        match self {
            Geometry::Point(c) => vec![*c],
            Geometry::MultiPoint(points) => points.clone(),
            Geometry::GeometryCollection(members) => {
                members.iter().flat_map(Geometry::points).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Vertices plus segment midpoints, and every isolated point.
    fn samples(&self) -> Vec<Coord> {
        let mut out = self.points();
        for (a, b) in self.segments() {
            out.push(a);
            out.push(Coord::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0));
            out.push(b);
        }
        out
    }

    /// Whether every part is an area.
    fn is_areal(&self) -> bool {
        match self {
            Geometry::Polygon(_) | Geometry::MultiPolygon(_) => true,
            Geometry::GeometryCollection(members) => {
                !members.is_empty() && members.iter().all(Geometry::is_areal)
            }
            _ => false,
        }
    }

    /// Dimension of the boundary, `None` when it is empty.
    fn boundary_dimension(&self) -> Option<u8> {
        match self {
            Geometry::Point(_) | Geometry::MultiPoint(_) => None,
            Geometry::LineString(coords) => {
                (!line_boundary(std::slice::from_ref(coords)).is_empty()).then_some(0)
            }
            Geometry::MultiLineString(lines) => (!line_boundary(lines).is_empty()).then_some(0),
            Geometry::Polygon(_) => Some(1),
            Geometry::MultiPolygon(polygons) => (!polygons.is_empty()).then_some(1),
            Geometry::GeometryCollection(members) => {
                members.iter().filter_map(Geometry::boundary_dimension).max()
            }
        }
    }

    pub fn locate(&self, p: Coord) -> Location {
        match self {
            Geometry::Point(c) => point_location(p, *c),
            Geometry::MultiPoint(points) => {
                union_location(points.iter().map(|c| point_location(p, *c)))
            }
            Geometry::LineString(coords) => lines_location(p, std::slice::from_ref(coords)),
            Geometry::MultiLineString(lines) => lines_location(p, lines),
            Geometry::Polygon(rings) => polygon_location(p, rings),
            Geometry::MultiPolygon(polygons) => {
                union_location(polygons.iter().map(|rings| polygon_location(p, rings)))
            }
            Geometry::GeometryCollection(members) => {
                union_location(members.iter().map(|g| g.locate(p)))
            }
        }
    }

    fn any_crossing(&self, other: &Geometry) -> bool {
        any_crossing(&self.segments(), &other.segments())
    }
}

fn point_location(p: Coord, c: Coord) -> Location {
    if c.same(p) {
        Location::Interior
    } else {
        Location::Exterior
    }
}

// --- Predicates ---

impl Geometry {
    pub fn intersects(&self, other: &Geometry) -> bool {
        if self
            .samples()
            .iter()
            .any(|p| other.locate(*p) != Location::Exterior)
            || other
                .samples()
                .iter()
                .any(|p| self.locate(*p) != Location::Exterior)
        {
            return true;
        }
        let theirs = other.segments();
        self.segments()
            .iter()
            .any(|(a, b)| theirs.iter().any(|(c, d)| segments_intersect(*a, *b, *c, *d)))
    }

    pub fn disjoint(&self, other: &Geometry) -> bool {
        !self.intersects(other)
    }

    pub fn contains(&self, other: &Geometry) -> bool {
        let samples = other.samples();
        if samples.is_empty() || samples.iter().any(|p| self.locate(*p) == Location::Exterior) {
            return false;
        }
        if any_crossing(&self.area_segments(), &other.segments()) {
            return false;
        }
        // A covered area boundary with no crossing puts the area inside.
        if self.is_areal() && other.is_areal() {
            return true;
        }
        samples.iter().any(|p| self.locate(*p) == Location::Interior)
    }

    pub fn within(&self, other: &Geometry) -> bool {
        other.contains(self)
    }

    pub fn equals(&self, other: &Geometry) -> bool {
        match (self, other) {
            (Geometry::Point(a), Geometry::Point(b)) => a.same(*b),
            _ => {
                self.dimension() == other.dimension()
                    && self.contains(other)
                    && other.contains(self)
            }
        }
    }

    pub fn touches(&self, other: &Geometry) -> bool {
        if !self.intersects(other) {
            return false;
        }
        // Points have no boundary to touch with.
        if self.dimension() == 0 && other.dimension() == 0 {
            return false;
        }
        let interior_hit = self
            .samples()
            .iter()
            .any(|p| other.locate(*p) == Location::Interior && self.locate(*p) == Location::Interior)
            || other
                .samples()
                .iter()
                .any(|p| self.locate(*p) == Location::Interior && other.locate(*p) == Location::Interior);
        !interior_hit && !self.any_crossing(other)
    }

    pub fn crosses(&self, other: &Geometry) -> bool {
        match (self.dimension(), other.dimension()) {
            (0, d) if d > 0 => points_cross(self, other),
            (d, 0) if d > 0 => points_cross(other, self),
            (1, 1) => self.any_crossing(other),
            (1, 2) => line_crosses_area(self, other),
            (2, 1) => line_crosses_area(other, self),
            _ => false,
        }
    }

    pub fn overlaps(&self, other: &Geometry) -> bool {
        if self.dimension() != other.dimension() {
            return false;
        }
        if self.dimension() == 0 {
            let (mine, theirs) = (self.points(), other.points());
            let shared = mine.iter().any(|p| theirs.iter().any(|q| q.same(*p)));
            let only_mine = mine.iter().any(|p| !theirs.iter().any(|q| q.same(*p)));
            let only_theirs = theirs.iter().any(|q| !mine.iter().any(|p| p.same(*q)));
            return shared && only_mine && only_theirs;
        }
        if !self.intersects(other) || self.contains(other) || other.contains(self) {
            return false;
        }
        self.samples()
            .iter()
            .any(|p| other.locate(*p) == Location::Interior)
            || other
                .samples()
                .iter()
                .any(|p| self.locate(*p) == Location::Interior)
            || (self.dimension() == 2 && self.any_crossing(other))
    }

    pub fn distance(&self, other: &Geometry) -> f64 {
        if self.intersects(other) {
            return 0.0;
        }
        let mut best = f64::INFINITY;
        let (mine, theirs) = (self.segments(), other.segments());
        let their_points = other.points();
        for p in self.samples() {
            for (a, b) in &theirs {
                best = best.min(point_segment_distance(p, *a, *b));
            }
            for q in &their_points {
                best = best.min(p.distance(*q));
            }
        }
        for p in other.samples() {
            for (a, b) in &mine {
                best = best.min(point_segment_distance(p, *a, *b));
            }
        }
        best
    }

    /// Length of the linear parts; zero for points and areas.
    pub fn length(&self) -> f64 {
        fn line_length(coords: &[Coord]) -> f64 {
            coords.windows(2).map(|w| w[0].distance(w[1])).sum()
        }
        match self {
            Geometry::LineString(coords) => line_length(coords),
            Geometry::MultiLineString(lines) => lines.iter().map(|l| line_length(l)).sum(),
            Geometry::GeometryCollection(members) => members.iter().map(Geometry::length).sum(),
            _ => 0.0,
        }
    }

    /// DE-9IM pattern test. Only relations involving a point are computed.
    pub fn relate(&self, other: &Geometry, pattern: &str) -> Result<bool> {
        let pattern: Vec<char> = pattern.trim().to_ascii_uppercase().chars().collect();
        if pattern.len() != 9 {
            return Err(QueryError::InvalidArgument(format!(
                "intersection pattern must have 9 characters, got {}",
                pattern.len()
            )));
        }
        let matrix = match (self, other) {
            (Geometry::Point(p), g) => point_matrix(*p, g),
            (g, Geometry::Point(p)) => transpose(point_matrix(*p, g)),
            _ => {
                return Err(QueryError::Unsupported(
                    "st_relate between two non-point geometries".to_string(),
                ))
            }
        };
        for (cell, want) in matrix.iter().zip(pattern.iter()) {
            let ok = match want {
                '*' => true,
                'T' => *cell != 'F',
                'F' | '0' | '1' | '2' => cell == want,
                other => {
                    return Err(QueryError::InvalidArgument(format!(
                        "invalid intersection pattern character '{}'",
                        other
                    )))
                }
            };
            if !ok {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Some of the points lie inside the other geometry and some outside it.
fn points_cross(points: &Geometry, other: &Geometry) -> bool {
    let points = points.points();
    points.iter().any(|p| other.locate(*p) == Location::Interior)
        && points.iter().any(|p| other.locate(*p) == Location::Exterior)
}

fn line_crosses_area(line: &Geometry, area: &Geometry) -> bool {
    let samples = line.samples();
    samples.iter().any(|p| area.locate(*p) == Location::Interior)
        && samples.iter().any(|p| area.locate(*p) == Location::Exterior)
}

fn point_matrix(p: Coord, g: &Geometry) -> [char; 9] {
    let dim = |d: u8| char::from(b'0' + d);
    let mut m = ['F'; 9];
    match g.locate(p) {
        Location::Interior => m[0] = '0',
        Location::Boundary => m[1] = '0',
        Location::Exterior => m[2] = '0',
    }
    let samples = g.samples();
    let covers_all = g.dimension() == 0 && samples.iter().all(|q| q.same(p));
    m[6] = if covers_all || samples.is_empty() { 'F' } else { dim(g.dimension()) };
    m[7] = g.boundary_dimension().map(dim).unwrap_or('F');
    m[8] = '2';
    m
}

fn transpose(m: [char; 9]) -> [char; 9] {
    [m[0], m[3], m[6], m[1], m[4], m[7], m[2], m[5], m[8]]
}
