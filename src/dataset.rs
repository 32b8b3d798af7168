//! タイルデータセット（予測スコアの唯一の保持先）

use std::collections::HashMap;

use crate::geometry::{parse_polygon, BoundingBox};
use crate::types::{ScoreRange, TileRecord, TileRow};

#[derive(Debug, Clone, Default)]
pub struct TileDataset {
    records: Vec<TileRecord>,
    index: HashMap<String, usize>,
}

impl TileDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// 生の行からデータセットを作る。スコアはすべて未予測
    ///
    /// 識別子が空の行は捨てる。ジオメトリを解析できない行はポリゴンを空にして残す。
    /// 同じ識別子が複数あれば最初の位置を保ち、後の行の内容で上書きする。
    pub fn ingest(rows: &[TileRow]) -> Self {
        let mut dataset = Self::new();
        let mut invalid_geometry = 0usize;

        for row in rows.iter().filter(|row| row.has_id()) {
            let polygon = match parse_polygon(&row.geometry) {
                Ok(polygon) => polygon,
                Err(e) => {
                    tracing::debug!("タイル {} のジオメトリを解析できません: {}", row.id, e);
                    invalid_geometry += 1;
                    Vec::new()
                }
            };
            let record = TileRecord {
                id: row.id.clone(),
                polygon: polygon.into(),
                score: None,
            };

            match dataset.index.get(&row.id) {
                Some(&position) => {
                    tracing::warn!(
                        "タイル識別子 {} が重複しています。後の行で上書きします",
                        row.id
                    );
                    dataset.records[position] = record;
                }
                None => {
                    dataset.index.insert(row.id.clone(), dataset.records.len());
                    dataset.records.push(record);
                }
            }
        }

        if invalid_geometry > 0 {
            tracing::warn!("ジオメトリを解析できなかったタイル: {}件", invalid_geometry);
        }
        dataset
    }

    /// 1タイルのスコアをその場で更新する。他のレコードと順序は変わらない
    ///
    /// 有限値でないスコアは未予測として扱う。
    pub fn set_score(&mut self, id: &str, score: Option<f64>) -> bool {
        match self.index.get(id) {
            Some(&position) => {
                self.records[position].score = score.filter(|s| s.is_finite());
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&TileRecord> {
        self.index.get(id).map(|&position| &self.records[position])
    }

    pub fn records(&self) -> &[TileRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TileRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 予測済みスコア
    pub fn scores(&self) -> impl Iterator<Item = f64> + '_ {
        self.records.iter().filter_map(|r| r.score)
    }

    /// 観測されたスコア範囲。予測が1件もなければ fallback
    pub fn score_range(&self, fallback: ScoreRange) -> ScoreRange {
        ScoreRange::from_scores(self.scores()).unwrap_or(fallback)
    }

    /// ジオメトリを持つ全タイルの外接矩形
    pub fn bounds(&self) -> Option<BoundingBox> {
        bounds_of(&self.records)
    }
}

/// 空ポリゴンのタイルは含めない
pub fn bounds_of(records: &[TileRecord]) -> Option<BoundingBox> {
    BoundingBox::from_positions(records.iter().flat_map(|r| r.polygon.iter()))
}

impl<'a> IntoIterator for &'a TileDataset {
    type Item = &'a TileRecord;
    type IntoIter = std::slice::Iter<'a, TileRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
