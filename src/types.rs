use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// 経度・緯度の組 `[lon, lat]`
pub type Position = [f64; 2];

/// データセット内の1タイル
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    pub id: String,
    /// 閉じたリング（先頭 == 末尾）。ジオメトリが解析できなかった場合は空
    ///
    /// スナップショットや地図レイヤーと共有する。
    pub polygon: Arc<[Position]>,
    /// 予測スコア。未予測・失敗時は None
    pub score: Option<f64>,
}

impl TileRecord {
    pub fn has_geometry(&self) -> bool {
        !self.polygon.is_empty()
    }

    pub fn is_predicted(&self) -> bool {
        self.score.is_some()
    }
}

/// CSVから読み込んだ生の特徴量カラム（すべて文字列のまま保持）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow(pub HashMap<String, String>);

impl FeatureRow {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// 指定順に特徴量を数値化する。数値でない値は NaN のまま渡す
    pub fn numeric_values(&self, names: &[String]) -> Vec<(String, f64)> {
        names
            .iter()
            .map(|name| {
                let value = self
                    .get(name)
                    .and_then(|raw| raw.trim().parse::<f64>().ok())
                    .unwrap_or(f64::NAN);
                (name.clone(), value)
            })
            .collect()
    }
}

/// 取り込み前の1行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRow {
    pub id: String,
    /// GeoJSONジオメトリ文字列（未解析）
    pub geometry: String,
    pub features: FeatureRow,
}

impl TileRow {
    /// 空白のみの識別子はタイルとして扱わない
    pub fn has_id(&self) -> bool {
        !self.id.trim().is_empty()
    }
}

/// 色の正規化に使うスコア範囲
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
}

impl ScoreRange {
    /// 予測が1件もない間に使う固定範囲
    pub const FALLBACK: ScoreRange = ScoreRange { min: -2.0, max: 2.0 };

    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// 有限値のみから範囲を求める。1件もなければ None
    pub fn from_scores<I: IntoIterator<Item = f64>>(scores: I) -> Option<Self> {
        scores
            .into_iter()
            .filter(|s| s.is_finite())
            .fold(None, |acc: Option<ScoreRange>, s| match acc {
                None => Some(ScoreRange::new(s, s)),
                Some(r) => Some(ScoreRange::new(r.min.min(s), r.max.max(s))),
            })
    }

    pub fn is_degenerate(&self) -> bool {
        self.min == self.max
    }
}

impl Default for ScoreRange {
    fn default() -> Self {
        Self::FALLBACK
    }
}

/// バッチ推論の進捗
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub current: usize,
    pub total: usize,
    pub running: bool,
}

impl BatchProgress {
    pub fn started(total: usize) -> Self {
        Self {
            current: 0,
            total,
            running: true,
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.running && self.current == self.total
    }
}

/// タイル単位の失敗種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileFailureKind {
    /// 対応する画像が見つからない
    MissingAsset,
    /// 画像ファイルを読み込めない
    UnreadableAsset,
    /// 推論サービスの呼び出し・応答解析の失敗
    InferenceCall,
}

impl std::fmt::Display for TileFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TileFailureKind::MissingAsset => write!(f, "MissingAsset"),
            TileFailureKind::UnreadableAsset => write!(f, "UnreadableAsset"),
            TileFailureKind::InferenceCall => write!(f, "InferenceCallFailure"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileFailure {
    pub tile_id: String,
    pub kind: TileFailureKind,
    pub reason: String,
}

impl TileFailure {
    pub fn new(
        tile_id: impl Into<String>,
        kind: TileFailureKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            tile_id: tile_id.into(),
            kind,
            reason: reason.into(),
        }
    }
}

/// 画面に表示する直近のエラー（次の失敗で上書きされる）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub tile_id: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl From<&TileFailure> for ErrorNotice {
    fn from(failure: &TileFailure) -> Self {
        Self {
            tile_id: failure.tile_id.clone(),
            message: format!("タイル {}: {}", failure.tile_id, failure.reason),
            occurred_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_values_keep_declared_order_and_nan() {
        let mut row = FeatureRow::default();
        row.insert("slope", "3.5");
        row.insert("elevation", " 1200 ");
        row.insert("mean_ndvi", "n/a");

        let names: Vec<String> = ["elevation", "mean_ndvi", "slope", "nighttime_light"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let values = row.numeric_values(&names);

        assert_eq!(values.len(), 4);
        assert_eq!(values[0], ("elevation".to_string(), 1200.0));
        assert!(values[1].1.is_nan());
        assert_eq!(values[2], ("slope".to_string(), 3.5));
        assert!(values[3].1.is_nan());
    }

    #[test]
    fn test_score_range_from_scores() {
        assert_eq!(ScoreRange::from_scores(Vec::<f64>::new()), None);
        let range = ScoreRange::from_scores(vec![0.5, -1.0, f64::NAN, 2.5]).unwrap();
        assert_eq!(range, ScoreRange::new(-1.0, 2.5));
        assert!(ScoreRange::new(1.0, 1.0).is_degenerate());
    }

    #[test]
    fn test_progress_lifecycle() {
        let mut progress = BatchProgress::started(2);
        assert!(progress.running);
        assert!(!progress.is_complete());
        progress.current = 2;
        progress.running = false;
        assert!(progress.is_complete());
    }
}
