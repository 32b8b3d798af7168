//! パイプラインの共有状態
//!
//! データセット・画像対応表・進捗・エラー表示を1つのロックで保持し、変更のたびに
//! 集計値とスコア範囲を再計算したスナップショットを `watch` チャネルへ流す。
//! ロックは await をまたいで保持しない。

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use crate::dataset::TileDataset;
use crate::error::PipelineError;
use crate::image_index::ImageAssetIndex;
use crate::stats::TileStats;
use crate::types::{BatchProgress, ErrorNotice, ScoreRange, TileFailure, TileRecord, TileRow};

/// ある時点のパイプライン状態（不変）
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineSnapshot {
    /// 取り込みのたびに増える
    pub generation: u64,
    pub records: Vec<TileRecord>,
    pub stats: TileStats,
    pub range: ScoreRange,
    pub progress: BatchProgress,
    pub notice: Option<ErrorNotice>,
    pub failures: Vec<TileFailure>,
}

#[derive(Debug)]
struct SessionState {
    generation: u64,
    rows: Arc<[TileRow]>,
    dataset: TileDataset,
    images: Arc<ImageAssetIndex>,
    progress: BatchProgress,
    notice: Option<ErrorNotice>,
    failures: Vec<TileFailure>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            generation: 0,
            rows: Arc::from(Vec::new()),
            dataset: TileDataset::default(),
            images: Arc::new(ImageAssetIndex::default()),
            progress: BatchProgress::default(),
            notice: None,
            failures: Vec::new(),
        }
    }
}

/// バッチ実行に必要な入力（開始時点で固定）
pub(crate) struct RunPlan {
    pub rows: Arc<[TileRow]>,
    pub images: Arc<ImageAssetIndex>,
}

pub struct TileSession {
    state: Mutex<SessionState>,
    snapshots: watch::Sender<Arc<PipelineSnapshot>>,
    fallback_range: ScoreRange,
}

impl TileSession {
    pub fn new(fallback_range: ScoreRange) -> Self {
        let (snapshots, _) = watch::channel(Arc::new(PipelineSnapshot {
            range: fallback_range,
            ..Default::default()
        }));
        Self {
            state: Mutex::new(SessionState::default()),
            snapshots,
            fallback_range,
        }
    }

    /// データセットを丸ごと置き換える。バッチ実行中は拒否する
    pub fn ingest(&self, rows: Vec<TileRow>) -> Result<usize, PipelineError> {
        let mut state = self.state.lock();
        if state.progress.running {
            tracing::warn!("バッチ推論の実行中に取り込みが要求されました。拒否します");
            return Err(PipelineError::IngestRejected);
        }

        let rows: Vec<TileRow> = rows.into_iter().filter(TileRow::has_id).collect();
        state.dataset = TileDataset::ingest(&rows);
        state.rows = rows.into();
        state.generation += 1;
        state.progress = BatchProgress::default();
        state.notice = None;
        state.failures.clear();

        let count = state.dataset.len();
        tracing::info!("[ingest] {}タイルを取り込みました (世代 {})", count, state.generation);
        self.publish(&state);
        Ok(count)
    }

    /// 画像対応表を置き換える。実行中のバッチは開始時点の対応表を使い続ける
    pub fn set_images(&self, images: ImageAssetIndex) -> usize {
        let mut state = self.state.lock();
        let count = images.len();
        state.images = Arc::new(images);
        self.publish(&state);
        count
    }

    pub fn snapshot(&self) -> Arc<PipelineSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<PipelineSnapshot>> {
        self.snapshots.subscribe()
    }

    pub fn progress(&self) -> BatchProgress {
        self.state.lock().progress
    }

    pub fn is_running(&self) -> bool {
        self.progress().running
    }

    pub fn fallback_range(&self) -> ScoreRange {
        self.fallback_range
    }

    /// データセットの複製（結果一覧の書き出し用）
    pub fn dataset(&self) -> TileDataset {
        self.state.lock().dataset.clone()
    }

    pub(crate) fn begin_run(&self) -> Result<RunPlan, PipelineError> {
        let mut state = self.state.lock();
        if state.progress.running {
            return Err(PipelineError::Reentrancy);
        }

        state.progress = BatchProgress::started(state.rows.len());
        state.notice = None;
        state.failures.clear();
        let plan = RunPlan {
            rows: state.rows.clone(),
            images: state.images.clone(),
        };
        self.publish(&state);
        Ok(plan)
    }

    /// 1行分の結果を書き込み、進捗を1つ進める
    ///
    /// 失敗時はスコアを未予測に戻し、失敗一覧と直近のエラー表示を更新する。
    pub(crate) fn complete_row(
        &self,
        tile_id: &str,
        outcome: Result<f64, TileFailure>,
    ) -> BatchProgress {
        let mut state = self.state.lock();
        let score = match outcome {
            Ok(score) => Some(score),
            Err(failure) => {
                state.notice = Some(ErrorNotice::from(&failure));
                state.failures.push(failure);
                None
            }
        };
        if !state.dataset.set_score(tile_id, score) {
            tracing::warn!("タイル {} はデータセットに存在しません", tile_id);
        }
        state.progress.current = (state.progress.current + 1).min(state.progress.total);
        let progress = state.progress;
        self.publish(&state);
        progress
    }

    pub(crate) fn finish_run(&self) -> BatchProgress {
        let mut state = self.state.lock();
        state.progress.running = false;
        let progress = state.progress;
        self.publish(&state);
        progress
    }

    fn publish(&self, state: &SessionState) {
        let snapshot = PipelineSnapshot {
            generation: state.generation,
            records: state.dataset.records().to_vec(),
            stats: TileStats::compute(&state.dataset),
            range: state.dataset.score_range(self.fallback_range),
            progress: state.progress,
            notice: state.notice.clone(),
            failures: state.failures.clone(),
        };
        self.snapshots.send_replace(Arc::new(snapshot));
    }
}

impl Default for TileSession {
    fn default() -> Self {
        Self::new(ScoreRange::FALLBACK)
    }
}
