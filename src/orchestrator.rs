//! バッチ推論
//!
//! 行の順に1タイルずつ推論し、結果をその都度セッションへ書き込む。
//! 1行の失敗はそのタイルを未予測にして記録するだけで、次の行へ進む。

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::image_index::ImageAssetIndex;
use crate::inference::{FeaturePayload, InferenceService};
use crate::session::TileSession;
use crate::types::{BatchProgress, TileFailure, TileFailureKind, TileRow};

/// 1回のバッチ実行の結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct BatchPredictionOrchestrator<S> {
    session: Arc<TileSession>,
    service: S,
    feature_names: Vec<String>,
}

/// 途中で future が破棄されても実行中フラグを必ず下ろす
struct RunGuard<'a> {
    session: &'a TileSession,
    finished: bool,
}

impl RunGuard<'_> {
    fn finish(mut self) -> BatchProgress {
        self.finished = true;
        self.session.finish_run()
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("バッチ推論が途中で中断されました");
            self.session.finish_run();
        }
    }
}

impl<S: InferenceService + Sync> BatchPredictionOrchestrator<S> {
    pub fn new(session: Arc<TileSession>, service: S, feature_names: Vec<String>) -> Self {
        Self {
            session,
            service,
            feature_names,
        }
    }

    pub fn session(&self) -> &Arc<TileSession> {
        &self.session
    }

    /// 取り込み済みの全行を推論する
    ///
    /// 進捗は開始時、各行の完了時、終了時に `on_progress` へ通知する。
    /// 実行中に呼ばれた場合は `PipelineError::Reentrancy` を返し、状態は変えない。
    pub async fn run<F>(&self, mut on_progress: F) -> Result<BatchSummary, PipelineError>
    where
        F: FnMut(&BatchProgress),
    {
        let plan = self.session.begin_run()?;
        let guard = RunGuard {
            session: &self.session,
            finished: false,
        };

        let total = plan.rows.len();
        let started = Instant::now();
        tracing::info!("[run] バッチ推論を開始します: {}タイル", total);
        on_progress(&BatchProgress::started(total));

        let mut summary = BatchSummary {
            total,
            ..Default::default()
        };
        for row in plan.rows.iter() {
            let outcome = self.predict_row(row, &plan.images).await;
            match &outcome {
                Ok(score) => {
                    tracing::debug!("[run] {} = {}", row.id, score);
                    summary.succeeded += 1;
                }
                Err(failure) => {
                    tracing::warn!("[run] {} ({}): {}", row.id, failure.kind, failure.reason);
                    summary.failed += 1;
                }
            }
            let progress = self.session.complete_row(&row.id, outcome);
            tracing::debug!("[run] 進捗 {}/{}", progress.current, progress.total);
            on_progress(&progress);
        }

        let progress = guard.finish();
        on_progress(&progress);
        tracing::info!(
            "[run] バッチ推論が完了しました: 成功 {}, 失敗 {} ({:.1}秒)",
            summary.succeeded,
            summary.failed,
            started.elapsed().as_secs_f64()
        );
        Ok(summary)
    }

    async fn predict_row(
        &self,
        row: &TileRow,
        images: &ImageAssetIndex,
    ) -> Result<f64, TileFailure> {
        let handle = images.lookup(&row.id).ok_or_else(|| {
            TileFailure::new(&row.id, TileFailureKind::MissingAsset, "対応する画像がありません")
        })?;
        let image = handle.load().await.map_err(|e| {
            TileFailure::new(
                &row.id,
                TileFailureKind::UnreadableAsset,
                format!("画像を読み込めません: {}", e),
            )
        })?;

        let features = FeaturePayload::from_row(&row.features, &self.feature_names);
        let score = self
            .service
            .predict(&row.id, image, &features)
            .await
            .map_err(|e| TileFailure::new(&row.id, TileFailureKind::InferenceCall, e.to_string()))?;

        if !score.is_finite() {
            return Err(TileFailure::new(
                &row.id,
                TileFailureKind::InferenceCall,
                format!("有限でないスコアが返されました: {}", score),
            ));
        }
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_index::ImageHandle;
    use crate::model::DEFAULT_FEATURE_NAMES;
    use crate::test_support::{row, square, StubService};
    use std::future::Future;
    use std::pin::Pin;
    use std::task::Poll;

    fn feature_names() -> Vec<String> {
        DEFAULT_FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
    }

    fn setup(
        ids: &[&str],
        with_images: &[&str],
        service: StubService,
    ) -> BatchPredictionOrchestrator<StubService> {
        let session = Arc::new(TileSession::default());
        let rows = ids
            .iter()
            .enumerate()
            .map(|(i, id)| row(id, &square(i as f64 * 0.01, 0.0)))
            .collect();
        session.ingest(rows).unwrap();
        let images = ImageAssetIndex::build(
            with_images
                .iter()
                .map(|id| (format!("{id}.png"), ImageHandle::from(vec![0u8; 4]))),
            ".png",
        );
        session.set_images(images);
        BatchPredictionOrchestrator::new(session, service, feature_names())
    }

    #[tokio::test]
    async fn test_missing_images_leave_tiles_absent() {
        let orchestrator = setup(&["A", "B", "C"], &["B"], StubService::returning(1.0));

        let summary = orchestrator.run(|_| {}).await.unwrap();
        assert_eq!(summary, BatchSummary { total: 3, succeeded: 1, failed: 2 });

        let snapshot = orchestrator.session().snapshot();
        let scores: Vec<Option<f64>> = snapshot.records.iter().map(|r| r.score).collect();
        assert_eq!(scores, [None, Some(1.0), None]);
        assert_eq!(snapshot.stats.predicted, 1);
        assert_eq!(snapshot.stats.total, 3);
        assert_eq!(snapshot.progress, BatchProgress { current: 3, total: 3, running: false });
        assert_eq!(snapshot.failures.len(), 2);
        assert!(snapshot
            .failures
            .iter()
            .all(|f| f.kind == TileFailureKind::MissingAsset));
        assert_eq!(snapshot.notice.as_ref().unwrap().tile_id, "C");
        assert_eq!(orchestrator.service.called_ids(), ["B"]);
    }

    #[tokio::test]
    async fn test_progress_increments_by_one() {
        let orchestrator = setup(&["A", "B", "C", "D"], &["A", "C"], StubService::returning(0.5));

        let mut seen = Vec::new();
        orchestrator.run(|p| seen.push(*p)).await.unwrap();

        assert_eq!(seen.first(), Some(&BatchProgress::started(4)));
        assert_eq!(seen.last(), Some(&BatchProgress { current: 4, total: 4, running: false }));
        for pair in seen.windows(2).take(4) {
            assert_eq!(pair[1].current, pair[0].current + 1);
            assert!(pair[1].running);
        }
        assert!(seen.last().unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_rows_are_processed_in_order() {
        let ids = ["t3", "t1", "t2", "t0"];
        let orchestrator = setup(&ids, &ids, StubService::returning(0.1));

        orchestrator.run(|_| {}).await.unwrap();
        assert_eq!(orchestrator.service.called_ids(), ids);

        orchestrator.run(|_| {}).await.unwrap();
        assert_eq!(orchestrator.service.called_ids(), [ids, ids].concat());
    }

    #[tokio::test]
    async fn test_inference_failure_is_isolated() {
        let service = StubService::returning(2.0).failing_for(&["B"]);
        let orchestrator = setup(&["A", "B", "C"], &["A", "B", "C"], service);

        let summary = orchestrator.run(|_| {}).await.unwrap();
        assert_eq!(summary.failed, 1);

        let snapshot = orchestrator.session().snapshot();
        let scores: Vec<Option<f64>> = snapshot.records.iter().map(|r| r.score).collect();
        assert_eq!(scores, [Some(2.0), None, Some(2.0)]);
        assert_eq!(snapshot.failures[0].kind, TileFailureKind::InferenceCall);
        assert!(snapshot.failures[0].reason.contains("stub failure"));
        assert_eq!(orchestrator.service.called_ids(), ["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_unreadable_image_file() {
        let session = Arc::new(TileSession::default());
        session.ingest(vec![row("A", &square(0.0, 0.0))]).unwrap();
        let mut images = ImageAssetIndex::new();
        images.insert("A.png", ImageHandle::File("/definitely/not/here/A.png".into()), ".png");
        session.set_images(images);
        let orchestrator =
            BatchPredictionOrchestrator::new(session, StubService::returning(1.0), feature_names());

        orchestrator.run(|_| {}).await.unwrap();
        let snapshot = orchestrator.session().snapshot();
        assert_eq!(snapshot.failures[0].kind, TileFailureKind::UnreadableAsset);
        assert!(orchestrator.service.called_ids().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_run_is_rejected() {
        let orchestrator = setup(&["A", "B"], &["A", "B"], StubService::returning(1.0));

        let (first, second) = tokio::join!(orchestrator.run(|_| {}), orchestrator.run(|_| {}));
        assert!(first.is_ok());
        assert!(matches!(second, Err(PipelineError::Reentrancy)));
        // 拒否された側はサービスを呼ばない
        assert_eq!(orchestrator.service.called_ids(), ["A", "B"]);
        assert!(!orchestrator.session().is_running());
    }

    #[tokio::test]
    async fn test_ingest_rejected_during_run() {
        let orchestrator = setup(&["A", "B", "C"], &["A"], StubService::returning(1.0));
        let session = orchestrator.session().clone();

        let mut rejected = 0;
        orchestrator
            .run(|progress| {
                if progress.running {
                    let result = session.ingest(vec![row("X", &square(5.0, 5.0))]);
                    assert!(matches!(result, Err(PipelineError::IngestRejected)));
                    rejected += 1;
                }
            })
            .await
            .unwrap();

        assert_eq!(rejected, 4);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.records.len(), 3);
        assert_eq!(snapshot.generation, 1);
    }

    #[tokio::test]
    async fn test_features_follow_declared_order() {
        let session = Arc::new(TileSession::default());
        let mut tile = row("A", &square(0.0, 0.0));
        tile.features.insert("slope", "4.5");
        tile.features.insert("elevation", "abc");
        tile.features.insert("unrelated", "9");
        session.ingest(vec![tile]).unwrap();
        session.set_images(ImageAssetIndex::build(
            vec![("A.png", ImageHandle::from(vec![1u8, 2]))],
            ".png",
        ));
        let orchestrator =
            BatchPredictionOrchestrator::new(session, StubService::returning(1.0), feature_names());

        orchestrator.run(|_| {}).await.unwrap();
        let calls = orchestrator.service.calls.lock();
        let (id, image_len, payload) = &calls[0];
        assert_eq!(id, "A");
        assert_eq!(*image_len, 2);
        let names: Vec<&str> = payload.entries().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, DEFAULT_FEATURE_NAMES);
        let slope = payload.entries().iter().find(|(n, _)| n == "slope").unwrap().1;
        assert_eq!(slope, 4.5);
        assert!(payload.entries()[0].1.is_nan());
    }

    #[tokio::test]
    async fn test_non_finite_score_is_failure() {
        let orchestrator = setup(&["A"], &["A"], StubService::returning(f64::INFINITY));
        let summary = orchestrator.run(|_| {}).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(orchestrator.session().snapshot().records[0].score, None);
    }

    #[tokio::test]
    async fn test_dropped_run_clears_running() {
        let orchestrator = setup(&["A", "B"], &["A", "B"], StubService::returning(1.0));
        {
            let run = orchestrator.run(|_| {});
            tokio::pin!(run);
            // 1回だけポーリングしてから破棄する
            assert!(poll_once(run.as_mut()).await.is_none());
            assert!(orchestrator.session().is_running());
        }
        assert!(!orchestrator.session().is_running());
        assert!(orchestrator.run(|_| {}).await.is_ok());
    }

    async fn poll_once<F: Future + Unpin>(mut fut: F) -> Option<F::Output> {
        std::future::poll_fn(|cx| {
            Poll::Ready(match Pin::new(&mut fut).poll(cx) {
                Poll::Ready(output) => Some(output),
                Poll::Pending => None,
            })
        })
        .await
    }
}
