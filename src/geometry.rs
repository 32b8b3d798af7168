//! タイルジオメトリ（GeoJSON）の解析と外接矩形

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::IngestParseError;
use crate::types::Position;

#[derive(Debug, Deserialize)]
struct GeoJsonGeometry {
    #[serde(rename = "type")]
    ty: String,
    coordinates: serde_json::Value,
}

/// GeoJSONジオメトリ文字列からポリゴンの外周リングを取り出す
///
/// `Polygon` は最初のリング、`MultiPolygon` は最初のポリゴンの最初のリングを使う。
/// 閉じていないリングは先頭頂点を末尾に追加して閉じる。
pub fn parse_polygon(raw: &str) -> Result<Vec<Position>, IngestParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(IngestParseError::Empty);
    }

    let geometry: GeoJsonGeometry = serde_json::from_str(raw)?;
    let ring = match geometry.ty.as_str() {
        "Polygon" => geometry.coordinates.get(0),
        "MultiPolygon" => geometry.coordinates.get(0).and_then(|p| p.get(0)),
        other => return Err(IngestParseError::UnsupportedType(other.to_string())),
    };
    let ring = ring.and_then(|r| r.as_array()).ok_or_else(|| {
        IngestParseError::InvalidCoordinate("リングが配列ではありません".to_string())
    })?;

    let mut positions = ring
        .iter()
        .map(parse_position)
        .collect::<Result<Vec<_>, _>>()?;

    if positions.first() != positions.last() {
        if let Some(first) = positions.first().copied() {
            positions.push(first);
        }
    }

    // 閉じる頂点を除いた異なる頂点が3つ未満なら面にならない
    let distinct = distinct_vertices(&positions);
    if distinct < 3 {
        return Err(IngestParseError::DegenerateRing(distinct));
    }

    Ok(positions)
}

fn distinct_vertices(ring: &[Position]) -> usize {
    let open = ring.split_last().map(|(_, rest)| rest).unwrap_or_default();
    open.iter()
        .map(|[lon, lat]| [lon.to_bits(), lat.to_bits()])
        .collect::<HashSet<_>>()
        .len()
}

fn parse_position(value: &serde_json::Value) -> Result<Position, IngestParseError> {
    let pair = value
        .as_array()
        .filter(|p| p.len() >= 2)
        .ok_or_else(|| IngestParseError::InvalidCoordinate(value.to_string()))?;

    let lon = pair[0].as_f64();
    let lat = pair[1].as_f64();
    match (lon, lat) {
        (Some(lon), Some(lat)) if lon.is_finite() && lat.is_finite() => Ok([lon, lat]),
        _ => Err(IngestParseError::InvalidCoordinate(value.to_string())),
    }
}

/// 経緯度の外接矩形
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// 頂点が1つもなければ None
    pub fn from_positions<'a, I>(positions: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Position>,
    {
        positions.into_iter().fold(None::<BoundingBox>, |acc, &[lon, lat]| {
            Some(match acc {
                None => BoundingBox {
                    min_lon: lon,
                    min_lat: lat,
                    max_lon: lon,
                    max_lat: lat,
                },
                Some(b) => BoundingBox {
                    min_lon: b.min_lon.min(lon),
                    min_lat: b.min_lat.min(lat),
                    max_lon: b.max_lon.max(lon),
                    max_lat: b.max_lat.max(lat),
                },
            })
        })
    }

    /// MapLibre の `fitBounds` 形式 `[[west, south], [east, north]]`
    pub fn to_corners(&self) -> [Position; 2] {
        [[self.min_lon, self.min_lat], [self.max_lon, self.max_lat]]
    }
}
