//! 地図レイヤーの同期
//!
//! データセットの内容を描画面（Tauri のフロントエンド、またはメモリ上のレジストリ）へ
//! 反映する。タイル識別子をレイヤーIDとし、前回描画したレイヤーとの差分で更新する。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::color_scale::{color_for, Color};
use crate::dataset::bounds_of;
use crate::geometry::BoundingBox;
use crate::model::MapSettings;
use crate::session::PipelineSnapshot;
use crate::types::{Position, ScoreRange, TileRecord};

/// 1タイル分の描画内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub id: String,
    pub ring: Arc<[Position]>,
    pub fill: Color,
    pub fill_opacity: f32,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    /// `[lon, lat]`
    pub center: Position,
    pub zoom: f64,
}

/// レイヤーを描画できる面
pub trait RenderSurface {
    fn upsert_layer(&mut self, layer: &LayerSpec);
    fn remove_layer(&mut self, id: &str);
    fn fit_bounds(&mut self, bounds: &BoundingBox);
    fn set_view(&mut self, view: &ViewState);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerStyle {
    pub predicted_opacity: f32,
    pub pending_opacity: f32,
}

impl From<&MapSettings> for LayerStyle {
    fn from(settings: &MapSettings) -> Self {
        Self {
            predicted_opacity: settings.predicted_opacity,
            pending_opacity: settings.pending_opacity,
        }
    }
}

impl Default for LayerStyle {
    fn default() -> Self {
        Self::from(&MapSettings::default())
    }
}

/// 1回の同期で行った操作の件数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub upserted: usize,
    pub removed: usize,
    pub skipped: usize,
}

#[derive(Debug, Default)]
pub struct MapLayerSync {
    style: LayerStyle,
    rendered: BTreeSet<String>,
    fitted_generation: Option<u64>,
}

impl MapLayerSync {
    pub fn new(style: LayerStyle) -> Self {
        Self {
            style,
            rendered: BTreeSet::new(),
            fitted_generation: None,
        }
    }

    pub fn layer_for(&self, record: &TileRecord, range: &ScoreRange) -> LayerSpec {
        let fill_opacity = if record.is_predicted() {
            self.style.predicted_opacity
        } else {
            self.style.pending_opacity
        };
        LayerSpec {
            id: record.id.clone(),
            ring: record.polygon.clone(),
            fill: color_for(record.score, range),
            fill_opacity,
            score: record.score,
        }
    }

    /// レコード一覧を描画面に反映する
    ///
    /// 新しい一覧にないレイヤーを先に削除してから追加・更新する。
    /// ポリゴンが空のタイルは描画しない。
    pub fn sync<R: RenderSurface + ?Sized>(
        &mut self,
        records: &[TileRecord],
        range: &ScoreRange,
        surface: &mut R,
    ) -> SyncReport {
        let mut report = SyncReport::default();
        let wanted: BTreeSet<&str> = records
            .iter()
            .filter(|r| r.has_geometry())
            .map(|r| r.id.as_str())
            .collect();

        let stale: Vec<String> = self
            .rendered
            .iter()
            .filter(|id| !wanted.contains(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            surface.remove_layer(&id);
            self.rendered.remove(&id);
            report.removed += 1;
        }

        for record in records {
            if !record.has_geometry() {
                report.skipped += 1;
                continue;
            }
            surface.upsert_layer(&self.layer_for(record, range));
            self.rendered.insert(record.id.clone());
            report.upserted += 1;
        }

        tracing::debug!(
            "[MapLayerSync] 追加・更新 {}, 削除 {}, ジオメトリなし {}",
            report.upserted,
            report.removed,
            report.skipped
        );
        report
    }

    /// スナップショットを反映する。新しい世代を初めて見たときは表示範囲も合わせる
    pub fn apply_snapshot<R: RenderSurface + ?Sized>(
        &mut self,
        snapshot: &PipelineSnapshot,
        surface: &mut R,
    ) -> SyncReport {
        let report = self.sync(&snapshot.records, &snapshot.range, surface);
        if self.fitted_generation != Some(snapshot.generation) {
            self.fitted_generation = Some(snapshot.generation);
            fit_viewport(&snapshot.records, surface);
        }
        report
    }

    pub fn rendered(&self) -> impl Iterator<Item = &str> {
        self.rendered.iter().map(String::as_str)
    }
}

/// 全タイルの外接矩形に表示範囲を合わせる。ジオメトリが1つもなければ何もしない
pub fn fit_viewport<R: RenderSurface + ?Sized>(
    records: &[TileRecord],
    surface: &mut R,
) -> Option<BoundingBox> {
    let bounds = bounds_of(records)?;
    surface.fit_bounds(&bounds);
    Some(bounds)
}

/// 「全体表示」「初期位置に戻す」の操作
#[derive(Debug, Clone, Copy)]
pub struct ViewController {
    initial: ViewState,
}

impl ViewController {
    pub fn new(initial: ViewState) -> Self {
        Self { initial }
    }

    pub fn zoom_to_focus<R: RenderSurface + ?Sized>(
        &self,
        records: &[TileRecord],
        surface: &mut R,
    ) -> Option<BoundingBox> {
        fit_viewport(records, surface)
    }

    pub fn reset_view<R: RenderSurface + ?Sized>(&self, surface: &mut R) -> ViewState {
        surface.set_view(&self.initial);
        self.initial
    }
}

impl From<&MapSettings> for ViewController {
    fn from(settings: &MapSettings) -> Self {
        Self::new(ViewState {
            center: settings.initial_center,
            zoom: settings.initial_zoom,
        })
    }
}

/// メモリ上の描画面
#[derive(Debug, Clone, Default)]
pub struct LayerRegistry {
    layers: BTreeMap<String, LayerSpec>,
    order: Vec<String>,
    pub bounds: Option<BoundingBox>,
    pub view: Option<ViewState>,
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&LayerSpec> {
        self.layers.get(id)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// 追加された順のレイヤー
    pub fn layers(&self) -> impl Iterator<Item = &LayerSpec> {
        self.order.iter().filter_map(|id| self.layers.get(id))
    }

    /// 描画中のレイヤーを GeoJSON の FeatureCollection として書き出す
    pub fn to_geojson(&self) -> Value {
        let features: Vec<Value> = self
            .layers()
            .map(|layer| {
                json!({
                    "type": "Feature",
                    "id": layer.id,
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [layer.ring],
                    },
                    "properties": {
                        "tile_id": layer.id,
                        "score": layer.score,
                        "fill": layer.fill.to_css(),
                        "fill_opacity": layer.fill_opacity,
                    },
                })
            })
            .collect();
        json!({
            "type": "FeatureCollection",
            "features": features,
        })
    }
}

impl RenderSurface for LayerRegistry {
    fn upsert_layer(&mut self, layer: &LayerSpec) {
        if self.layers.insert(layer.id.clone(), layer.clone()).is_none() {
            self.order.push(layer.id.clone());
        }
    }

    fn remove_layer(&mut self, id: &str) {
        if self.layers.remove(id).is_some() {
            self.order.retain(|existing| existing != id);
        }
    }

    fn fit_bounds(&mut self, bounds: &BoundingBox) {
        self.bounds = Some(*bounds);
    }

    fn set_view(&mut self, view: &ViewState) {
        self.view = Some(*view);
    }
}
