//! テスト用の共通ヘルパー

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::error::InferenceError;
use crate::inference::{FeaturePayload, InferenceService};
use crate::types::{FeatureRow, TileRow};

/// 0.01度四方の正方形ポリゴン（GeoJSON文字列）
pub fn square(x: f64, y: f64) -> String {
    format!(
        r#"{{"type":"Polygon","coordinates":[[[{x},{y}],[{x1},{y}],[{x1},{y1}],[{x},{y1}],[{x},{y}]]]}}"#,
        x1 = x + 0.01,
        y1 = y + 0.01,
    )
}

pub fn row(id: &str, geometry: &str) -> TileRow {
    TileRow {
        id: id.to_string(),
        geometry: geometry.to_string(),
        features: FeatureRow::default(),
    }
}

/// 呼び出しを記録し、固定スコアを返す推論サービス
pub struct StubService {
    pub score: f64,
    pub failing: HashSet<String>,
    pub calls: Mutex<Vec<(String, usize, FeaturePayload)>>,
}

impl StubService {
    pub fn returning(score: f64) -> Self {
        Self {
            score,
            failing: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_for(mut self, ids: &[&str]) -> Self {
        self.failing = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn called_ids(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(id, _, _)| id.clone()).collect()
    }
}

impl InferenceService for StubService {
    async fn predict(
        &self,
        tile_id: &str,
        image: Vec<u8>,
        features: &FeaturePayload,
    ) -> Result<f64, InferenceError> {
        tokio::task::yield_now().await;
        self.calls
            .lock()
            .push((tile_id.to_string(), image.len(), features.clone()));
        if self.failing.contains(tile_id) {
            return Err(InferenceError::Status {
                status: 500,
                message: "stub failure".to_string(),
            });
        }
        Ok(self.score)
    }
}
