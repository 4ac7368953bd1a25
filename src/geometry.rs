//! Opaque feature geometry and the optional centroid reduction.
//!
//! The reconciliation core never looks inside a [`Geometry`]; it only moves it
//! from the base row to the merged row. [`centroid`] is the one place that
//! parses coordinates, and only for WKT input.

use std::sync::OnceLock;

use log::debug;
use regex::Regex;

use crate::model::FeatureTable;

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Wkt(String),
    Wkb(Vec<u8>),
}

impl Geometry {
    pub fn as_wkt(&self) -> Option<&str> {
        match self {
            Geometry::Wkt(text) => Some(text.as_str()),
            Geometry::Wkb(_) => None,
        }
    }
}

type Coord = (f64, f64);
type Ring = Vec<Coord>;

#[derive(Debug, Default)]
struct Accumulator {
    // (weighted x, weighted y, total weight) per dimension: points, lines, areas.
    points: (f64, f64, f64),
    lines: (f64, f64, f64),
    areas: (f64, f64, f64),
}

impl Accumulator {
    fn add_point(&mut self, (x, y): Coord) {
        self.points.0 += x;
        self.points.1 += y;
        self.points.2 += 1.0;
    }

    fn add_line(&mut self, line: &[Coord]) {
        for pair in line.windows(2) {
            let (x0, y0) = pair[0];
            let (x1, y1) = pair[1];
            let length = ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
            self.lines.0 += length * (x0 + x1) / 2.0;
            self.lines.1 += length * (y0 + y1) / 2.0;
            self.lines.2 += length;
        }
        if let Some(first) = line.first() {
            // Degenerate lines still count as points.
            self.add_point(*first);
        }
    }

    fn add_polygon(&mut self, rings: &[Ring]) {
        for (idx, ring) in rings.iter().enumerate() {
            let (area, cx, cy) = ring_moments(ring);
            // Holes subtract regardless of their winding order.
            let sign = if idx == 0 { 1.0 } else { -1.0 };
            let area = sign * area.abs();
            self.areas.0 += area * cx;
            self.areas.1 += area * cy;
            self.areas.2 += area;
            self.add_line(ring);
        }
    }

    fn finish(&self) -> Option<Coord> {
        [self.areas, self.lines, self.points]
            .into_iter()
            .find(|(_, _, weight)| weight.abs() > f64::EPSILON)
            .map(|(x, y, weight)| (x / weight, y / weight))
    }
}

fn ring_moments(ring: &[Coord]) -> (f64, f64, f64) {
    let mut twice_area = 0.0;
    let mut cx = 0.0;
    let mut cy = 0.0;
    for pair in ring.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        let cross = x0 * y1 - x1 * y0;
        twice_area += cross;
        cx += (x0 + x1) * cross;
        cy += (y0 + y1) * cross;
    }
    if twice_area.abs() <= f64::EPSILON {
        return (0.0, 0.0, 0.0);
    }
    let area = twice_area / 2.0;
    (area, cx / (6.0 * area), cy / (6.0 * area))
}

fn tagged_wkt() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?is)^\s*(?:SRID=\d+;)?\s*([A-Z]+)\s*(?:ZM|Z|M)?\s*(EMPTY|\(.*\))\s*$")
            .expect("static WKT pattern compiles")
    })
}

/// Splits `((a), (b))` into its top-level groups `(a)` and `(b)`.
fn split_groups(body: &str) -> Option<Vec<&str>> {
    let body = body.trim();
    let inner = body.strip_prefix('(')?.strip_suffix(')')?;
    let mut groups = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, ch) in inner.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => {
                groups.push(inner[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    groups.push(inner[start..].trim());
    Some(groups)
}

fn parse_coord(text: &str) -> Option<Coord> {
    let text = text.trim().trim_start_matches('(').trim_end_matches(')');
    let mut parts = text.split_whitespace();
    let x = parts.next()?.parse::<f64>().ok()?;
    let y = parts.next()?.parse::<f64>().ok()?;
    Some((x, y))
}

fn parse_ring(body: &str) -> Option<Ring> {
    let body = body.trim();
    let inner = body.strip_prefix('(')?.strip_suffix(')')?;
    inner.split(',').map(parse_coord).collect()
}

fn accumulate(kind: &str, body: &str, acc: &mut Accumulator) -> Option<()> {
    match kind {
        "POINT" => acc.add_point(parse_coord(body)?),
        "MULTIPOINT" => {
            for group in split_groups(body)? {
                acc.add_point(parse_coord(group)?);
            }
        }
        "LINESTRING" => acc.add_line(&parse_ring(body)?),
        "MULTILINESTRING" => {
            for group in split_groups(body)? {
                acc.add_line(&parse_ring(group)?);
            }
        }
        "POLYGON" => {
            let rings = split_groups(body)?
                .into_iter()
                .map(parse_ring)
                .collect::<Option<Vec<_>>>()?;
            acc.add_polygon(&rings);
        }
        "MULTIPOLYGON" => {
            for polygon in split_groups(body)? {
                let rings = split_groups(polygon)?
                    .into_iter()
                    .map(parse_ring)
                    .collect::<Option<Vec<_>>>()?;
                acc.add_polygon(&rings);
            }
        }
        _ => return None,
    }
    Some(())
}

/// Centroid of a WKT geometry as a WKT `POINT`. The highest-dimension parts
/// dominate: polygons by area, lines by length, points by mean position.
pub fn centroid(geometry: &Geometry) -> Option<Geometry> {
    let wkt = geometry.as_wkt()?;
    let captures = tagged_wkt().captures(wkt)?;
    let kind = captures.get(1)?.as_str().to_ascii_uppercase();
    let body = captures.get(2)?.as_str();
    if body.eq_ignore_ascii_case("EMPTY") {
        return None;
    }
    let mut acc = Accumulator::default();
    accumulate(&kind, body, &mut acc)?;
    let (x, y) = acc.finish()?;
    Some(Geometry::Wkt(format!("POINT ({x} {y})")))
}

/// Replaces every geometry that has a centroid; the rest are kept as they are.
pub fn reduce_to_centroids(table: &FeatureTable) -> FeatureTable {
    let mut reduced = table.clone();
    let mut skipped = 0usize;
    for geometry in reduced.geometries.iter_mut() {
        let Some(current) = geometry.as_ref() else {
            continue;
        };
        match centroid(current) {
            Some(point) => *geometry = Some(point),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!("Kept {skipped} geometry value(s) without a computable centroid");
    }
    reduced
}
