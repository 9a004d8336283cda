//! Raster-to-vector conversion of change masks.
//!
//! Each 4-connected region of changed pixels becomes one polygon. Rings are
//! traced along pixel edges, straight runs are collapsed to their end points,
//! and the result is mapped through the affine transform and oriented per
//! RFC 7946 (exterior counter-clockwise, holes clockwise).

use crate::core::mask::label_components;
use crate::types::{ChangeMask, GeoTransform, DEFAULT_CRS};
use geo::algorithm::orient::{Direction, Orient};
use geo::{Coord, LineString, Polygon};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

type Vertex = (i64, i64);

/// Mask value that vectorization extracts
pub const CHANGED_VALUE: u8 = 1;

/// One vectorized region together with the mask value it came from
#[derive(Debug, Clone, PartialEq)]
pub struct ChangePolygon {
    pub value: u8,
    pub polygon: Polygon<f64>,
}

/// Ordered polygons in a single coordinate reference
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonSet {
    pub crs: String,
    pub polygons: Vec<ChangePolygon>,
}

impl PolygonSet {
    pub fn empty(crs: impl Into<String>) -> Self {
        Self {
            crs: crs.into(),
            polygons: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    /// Standard feature-collection representation
    pub fn to_feature_collection(&self) -> FeatureCollection {
        let features = self
            .polygons
            .iter()
            .enumerate()
            .map(|(idx, p)| Feature {
                id: idx.to_string(),
                kind: "Feature".to_string(),
                properties: serde_json::Map::new(),
                geometry: PolygonGeometry::from(&p.polygon),
            })
            .collect();

        FeatureCollection {
            kind: "FeatureCollection".to_string(),
            features,
        }
    }
}

/// GeoJSON `FeatureCollection`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: String,
    pub features: Vec<Feature>,
}

/// GeoJSON `Feature` with an empty property set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: serde_json::Map<String, serde_json::Value>,
    pub geometry: PolygonGeometry,
}

/// GeoJSON `Polygon` geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<Vec<[f64; 2]>>,
}

impl From<&Polygon<f64>> for PolygonGeometry {
    fn from(polygon: &Polygon<f64>) -> Self {
        let ring = |ls: &LineString<f64>| ls.coords().map(|c| [c.x, c.y]).collect::<Vec<_>>();
        let mut coordinates = vec![ring(polygon.exterior())];
        coordinates.extend(polygon.interiors().iter().map(ring));
        Self {
            kind: "Polygon".to_string(),
            coordinates,
        }
    }
}

/// Whether a coordinate reference string can be used to tag output geometry
#[cfg(feature = "gdal")]
pub fn is_usable_crs(crs: &str) -> bool {
    gdal::spatial_ref::SpatialRef::from_definition(crs).is_ok()
}

/// Whether a coordinate reference string can be used to tag output geometry
#[cfg(not(feature = "gdal"))]
pub fn is_usable_crs(crs: &str) -> bool {
    use regex::Regex;
    use std::sync::OnceLock;

    static CRS_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = CRS_PATTERN.get_or_init(|| {
        Regex::new(
            r"(?is)^(?:(?:EPSG|ESRI|OGC|IGNF|IAU_\d+):[A-Za-z0-9_.]+|\+proj=.+|(?:GEOGCS|PROJCS|GEOCCS|COMPD_CS|GEOGCRS|GEODCRS|PROJCRS|COMPOUNDCRS|BOUNDCRS)\s*\[.+\])$",
        )
        .ok()
    });
    pattern.as_ref().is_some_and(|re| re.is_match(crs.trim()))
}

/// Converts binary change masks into geographic polygons
#[derive(Debug, Clone, Default)]
pub struct Vectorizer;

impl Vectorizer {
    pub fn new() -> Self {
        Self
    }

    pub fn vectorize(&self, mask: &ChangeMask, transform: &GeoTransform, crs: &str) -> PolygonSet {
        let crs = if is_usable_crs(crs) {
            crs.to_string()
        } else {
            log::warn!(
                "Coordinate reference '{}' is unusable, falling back to {}",
                crs,
                DEFAULT_CRS
            );
            DEFAULT_CRS.to_string()
        };

        let changed = mask.mapv(|v| u8::from(v == CHANGED_VALUE));
        let (labels, count) = label_components(&changed);
        if count == 0 {
            log::info!("No changed pixels, emitting empty feature collection");
            return PolygonSet::empty(crs);
        }

        let mut members: Vec<Vec<(usize, usize)>> = vec![Vec::new(); count];
        for ((r, c), &l) in labels.indexed_iter() {
            if l != 0 {
                members[l as usize - 1].push((r, c));
            }
        }

        let mut polygons = Vec::with_capacity(count);
        for (idx, pixels) in members.iter().enumerate() {
            let rings = trace_component(&labels, idx as u32 + 1, pixels);
            if let Some(polygon) = assemble_polygon(rings, transform) {
                polygons.push(ChangePolygon {
                    value: CHANGED_VALUE,
                    polygon,
                });
            }
        }

        log::info!("Vectorized {} change regions in {}", polygons.len(), crs);
        PolygonSet { crs, polygons }
    }
}

/// Trace every boundary ring of one labelled component in pixel-corner space.
///
/// Edges run with the component on their right (y grows downward), so outer
/// rings have positive shoelace area and holes negative.
fn trace_component(
    labels: &ndarray::Array2<u32>,
    label: u32,
    pixels: &[(usize, usize)],
) -> Vec<Vec<Vertex>> {
    let (h, w) = labels.dim();
    let inside = |r: i64, c: i64| -> bool {
        r >= 0 && c >= 0 && (r as usize) < h && (c as usize) < w && labels[[r as usize, c as usize]] == label
    };

    let mut edges: Vec<(Vertex, Vertex)> = Vec::new();
    for &(r, c) in pixels {
        let (r, c) = (r as i64, c as i64);
        if !inside(r - 1, c) {
            edges.push(((c, r), (c + 1, r)));
        }
        if !inside(r, c + 1) {
            edges.push(((c + 1, r), (c + 1, r + 1)));
        }
        if !inside(r + 1, c) {
            edges.push(((c + 1, r + 1), (c, r + 1)));
        }
        if !inside(r, c - 1) {
            edges.push(((c, r + 1), (c, r)));
        }
    }

    let mut outgoing: HashMap<Vertex, Vec<usize>> = HashMap::new();
    for (idx, (start, _)) in edges.iter().enumerate() {
        outgoing.entry(*start).or_default().push(idx);
    }

    let mut used = vec![false; edges.len()];
    let mut rings = Vec::new();

    for first in 0..edges.len() {
        if used[first] {
            continue;
        }
        used[first] = true;
        let mut ring = vec![edges[first].0];
        let mut current = first;

        loop {
            let (from, to) = edges[current];
            let heading = (to.0 - from.0, to.1 - from.1);
            let Some(next) = pick_next_edge(&edges, &outgoing, to, heading) else {
                break;
            };
            if next == first || used[next] {
                break;
            }
            used[next] = true;
            ring.push(to);
            current = next;
        }

        rings.push(simplify_ring(ring));
    }

    rings
}

/// Choose the continuation at a vertex, preferring left, then straight, then
/// right. At a pinch vertex this keeps diagonal pixels of the same region on
/// one ring and leaves enclosed background as a separate hole.
fn pick_next_edge(
    edges: &[(Vertex, Vertex)],
    outgoing: &HashMap<Vertex, Vec<usize>>,
    at: Vertex,
    heading: (i64, i64),
) -> Option<usize> {
    let candidates = outgoing.get(&at)?;
    if candidates.len() == 1 {
        return candidates.first().copied();
    }

    let (dx, dy) = heading;
    let preference = [(dy, -dx), (dx, dy), (-dy, dx)];
    preference.iter().find_map(|want| {
        candidates.iter().copied().find(|&idx| {
            let (from, to) = edges[idx];
            (to.0 - from.0, to.1 - from.1) == *want
        })
    })
}

/// Drop vertices in the middle of straight runs
fn simplify_ring(ring: Vec<Vertex>) -> Vec<Vertex> {
    let n = ring.len();
    if n < 4 {
        return ring;
    }
    (0..n)
        .filter(|&i| {
            let prev = ring[(i + n - 1) % n];
            let here = ring[i];
            let next = ring[(i + 1) % n];
            let d1 = ((here.0 - prev.0).signum(), (here.1 - prev.1).signum());
            let d2 = ((next.0 - here.0).signum(), (next.1 - here.1).signum());
            d1 != d2
        })
        .map(|i| ring[i])
        .collect()
}

fn signed_area(ring: &[Vertex]) -> i64 {
    let n = ring.len();
    let twice: i64 = (0..n)
        .map(|i| {
            let (x1, y1) = ring[i];
            let (x2, y2) = ring[(i + 1) % n];
            x1 * y2 - x2 * y1
        })
        .sum();
    twice / 2
}

fn assemble_polygon(rings: Vec<Vec<Vertex>>, transform: &GeoTransform) -> Option<Polygon<f64>> {
    let mut rings: Vec<(i64, Vec<Vertex>)> = rings
        .into_iter()
        .filter(|r| r.len() >= 4)
        .map(|r| (signed_area(&r), r))
        .collect();
    if rings.is_empty() {
        return None;
    }
    rings.sort_by(|a, b| b.0.cmp(&a.0));

    let to_geo = |ring: &[Vertex]| -> LineString<f64> {
        let mut coords: Vec<Coord<f64>> = ring
            .iter()
            .map(|&(x, y)| {
                let (gx, gy) = transform.apply(x as f64, y as f64);
                Coord { x: gx, y: gy }
            })
            .collect();
        if let Some(&first) = coords.first() {
            coords.push(first);
        }
        LineString::new(coords)
    };

    let mut iter = rings.into_iter();
    let (_, exterior) = iter.next()?;
    let holes: Vec<LineString<f64>> = iter.map(|(_, r)| to_geo(&r)).collect();

    Some(Polygon::new(to_geo(&exterior), holes).orient(Direction::Default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::Area;
    use ndarray::Array2;

    fn mask_from(rows: &[&str]) -> ChangeMask {
        Array2::from_shape_fn((rows.len(), rows[0].len()), |(i, j)| {
            u8::from(rows[i].as_bytes()[j] == b'#')
        })
    }

    #[test]
    fn test_single_pixel_square() {
        let mask = mask_from(&["...", ".#.", "..."]);
        let set = Vectorizer::new().vectorize(&mask, &GeoTransform::from_origin(0.0, 3.0, 1.0, 1.0), "EPSG:4326");
        assert_eq!(set.len(), 1);
        let poly = &set.polygons[0].polygon;
        assert_eq!(poly.exterior().0.len(), 5);
        assert_relative_eq!(poly.unsigned_area(), 1.0);
        assert_relative_eq!(poly.signed_area(), 1.0);
    }

    #[test]
    fn test_l_shape_collapses_straight_runs() {
        let mask = mask_from(&["##.", "#..", "#.."]);
        let set = Vectorizer::new().vectorize(&mask, &GeoTransform::from_origin(0.0, 0.0, 1.0, 1.0), "EPSG:4326");
        assert_eq!(set.len(), 1);
        // Six corners plus closing vertex
        assert_eq!(set.polygons[0].polygon.exterior().0.len(), 7);
        assert_relative_eq!(set.polygons[0].polygon.unsigned_area(), 4.0);
    }

    #[test]
    fn test_ring_with_hole() {
        let mask = mask_from(&[
            "#####", //
            "#...#", //
            "#####",
        ]);
        let set = Vectorizer::new().vectorize(&mask, &GeoTransform::from_origin(0.0, 0.0, 1.0, 1.0), "EPSG:4326");
        assert_eq!(set.len(), 1);
        let poly = &set.polygons[0].polygon;
        assert_eq!(poly.interiors().len(), 1);
        assert_relative_eq!(poly.unsigned_area(), 12.0);
    }

    #[test]
    fn test_diagonal_pixels_are_separate_regions() {
        let mask = mask_from(&["#.", ".#"]);
        let set = Vectorizer::new().vectorize(&mask, &GeoTransform::from_origin(0.0, 0.0, 1.0, 1.0), "EPSG:4326");
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_unusable_crs_falls_back() {
        let mask = mask_from(&["##", "##"]);
        let set = Vectorizer::new().vectorize(&mask, &GeoTransform::synthetic(), "not a crs");
        assert_eq!(set.crs, DEFAULT_CRS);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_feature_collection_shape() {
        let mask = mask_from(&["#.", ".."]);
        let set = Vectorizer::new().vectorize(&mask, &GeoTransform::synthetic(), "EPSG:4326");
        let json = serde_json::to_value(set.to_feature_collection()).unwrap();
        assert_eq!(json["type"], "FeatureCollection");
        assert_eq!(json["features"][0]["type"], "Feature");
        assert_eq!(json["features"][0]["geometry"]["type"], "Polygon");
        assert!(json["features"][0]["properties"].as_object().unwrap().is_empty());
    }
}
