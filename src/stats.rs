//! 予測スコアの集計

use serde::{Deserialize, Serialize};

use crate::dataset::TileDataset;

/// データセットの集計値
///
/// `avg`/`min`/`max` は予測済みタイルのみが対象。予測が1件もなければ 0。
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TileStats {
    pub total: usize,
    pub predicted: usize,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

impl TileStats {
    pub fn compute(dataset: &TileDataset) -> Self {
        let mut stats = TileStats {
            total: dataset.len(),
            ..Default::default()
        };

        let mut sum = 0.0;
        for score in dataset.scores() {
            if stats.predicted == 0 {
                stats.min = score;
                stats.max = score;
            } else {
                stats.min = stats.min.min(score);
                stats.max = stats.max.max(score);
            }
            sum += score;
            stats.predicted += 1;
        }

        if stats.predicted > 0 {
            // 丸め誤差で min/max をはみ出さないようにする
            stats.avg = (sum / stats.predicted as f64).clamp(stats.min, stats.max);
        }
        stats
    }

    pub fn pending(&self) -> usize {
        self.total - self.predicted
    }
}
