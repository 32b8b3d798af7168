//! デスクトップシェル（Tauri）のコマンドとイベント
//!
//! 地図の描画はフロントエンド（MapLibre）側で行う。バックエンドはレイヤー操作を
//! イベントとして送り、フロントエンドはそれをそのまま地図に適用する。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tauri::ipc::Channel;
use tauri::{AppHandle, Emitter, Manager, State};

use crate::csv_loader::{load_tile_rows, write_results_csv};
use crate::geometry::BoundingBox;
use crate::image_index::ImageAssetIndex;
use crate::inference::HttpInferenceClient;
use crate::map_sync::{
    LayerSpec, LayerStyle, MapLayerSync, RenderSurface, ViewController, ViewState,
};
use crate::model::AppConfig;
use crate::orchestrator::{BatchPredictionOrchestrator, BatchSummary};
use crate::session::{PipelineSnapshot, TileSession};
use crate::types::BatchProgress;

pub const EVENT_LAYER_UPSERT: &str = "map-layer-upsert";
pub const EVENT_LAYER_REMOVE: &str = "map-layer-remove";
pub const EVENT_FIT_BOUNDS: &str = "map-fit-bounds";
pub const EVENT_SET_VIEW: &str = "map-set-view";
pub const EVENT_SNAPSHOT: &str = "pipeline-snapshot";

pub struct AppState {
    session: Arc<TileSession>,
    config: Mutex<AppConfig>,
    config_path: PathBuf,
    view: ViewController,
}

impl AppState {
    fn new(config: AppConfig, config_path: PathBuf) -> Self {
        Self {
            session: Arc::new(TileSession::new(config.map.fallback_range)),
            view: ViewController::from(&config.map),
            config: Mutex::new(config),
            config_path,
        }
    }

    /// 設定を更新して保存する
    fn remember(&self, update: impl FnOnce(&mut AppConfig)) {
        let mut config = self.config.lock();
        update(&mut config);
        if let Err(e) = config.save(&self.config_path) {
            tracing::warn!("設定の保存に失敗: {:#}", e);
        }
    }

    // 読み込みの間は設定のロックを持たない
    fn load_tile_csv(&self, path: &str) -> Result<usize, String> {
        let settings = self.config.lock().dataset.clone();

        let rows = load_tile_rows(Path::new(path), &settings)
            .map_err(|e| format!("CSV読み込みエラー: {}", e))?;
        let count = self.session.ingest(rows).map_err(|e| e.to_string())?;

        self.remember(|config| config.update_last_csv_path(path));
        Ok(count)
    }

    fn load_image_folder(&self, path: &str) -> Result<usize, String> {
        let extension = self.config.lock().dataset.image_extension.clone();

        let index = ImageAssetIndex::from_directory(Path::new(path), &extension)
            .map_err(|e| format!("画像フォルダの読み込みエラー: {}", e))?;
        let count = self.session.set_images(index);

        self.remember(|config| config.update_last_image_dir(path));
        Ok(count)
    }
}

/// レイヤー操作をフロントエンドへのイベントとして送る描画面
struct EventSurface {
    app: AppHandle,
}

impl EventSurface {
    fn emit<S: serde::Serialize + Clone>(&self, event: &str, payload: S) {
        if let Err(e) = self.app.emit(event, payload) {
            tracing::warn!("イベント {} の送信に失敗: {}", event, e);
        }
    }
}

impl RenderSurface for EventSurface {
    fn upsert_layer(&mut self, layer: &LayerSpec) {
        self.emit(EVENT_LAYER_UPSERT, layer);
    }

    fn remove_layer(&mut self, id: &str) {
        self.emit(EVENT_LAYER_REMOVE, id);
    }

    fn fit_bounds(&mut self, bounds: &BoundingBox) {
        self.emit(EVENT_FIT_BOUNDS, bounds.to_corners());
    }

    fn set_view(&mut self, view: &ViewState) {
        self.emit(EVENT_SET_VIEW, view);
    }
}

/// タイルCSVを読み込み、データセットを置き換える
#[tauri::command]
fn load_tile_csv(path: String, state: State<AppState>) -> Result<usize, String> {
    tracing::info!("[load_tile_csv] 開始 - パス: {}", path);
    state.load_tile_csv(&path)
}

/// 画像フォルダを走査して画像対応表を置き換える
#[tauri::command]
fn load_image_folder(path: String, state: State<AppState>) -> Result<usize, String> {
    tracing::info!("[load_image_folder] 開始 - フォルダ: {}", path);
    state.load_image_folder(&path)
}

/// バッチ推論を実行し、進捗を Channel でフロントエンドに通知する
#[tauri::command]
async fn run_batch_prediction(
    on_progress: Channel<BatchProgress>,
    state: State<'_, AppState>,
) -> Result<BatchSummary, String> {
    let (client, feature_names) = {
        let config = state.config.lock();
        let client = HttpInferenceClient::new(&config.inference, &config.dataset.image_extension)
            .map_err(|e| format!("推論クライアントの初期化エラー: {}", e))?;
        (client, config.dataset.feature_names.clone())
    };

    let orchestrator =
        BatchPredictionOrchestrator::new(state.session.clone(), client, feature_names);
    orchestrator
        .run(|progress| {
            on_progress.send(*progress).ok();
        })
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
fn get_pipeline_snapshot(state: State<AppState>) -> PipelineSnapshot {
    state.session.snapshot().as_ref().clone()
}

/// 結果一覧（tile_id, score, status）をCSVに書き出す
#[tauri::command]
fn export_results(path: String, state: State<AppState>) -> Result<usize, String> {
    write_results_csv(Path::new(&path), &state.session.dataset())
        .map_err(|e| format!("結果の書き出しエラー: {}", e))
}

#[tauri::command]
fn zoom_to_focus(app: AppHandle, state: State<AppState>) -> Option<BoundingBox> {
    let snapshot = state.session.snapshot();
    state
        .view
        .zoom_to_focus(&snapshot.records, &mut EventSurface { app })
}

#[tauri::command]
fn reset_view(app: AppHandle, state: State<AppState>) -> ViewState {
    state.view.reset_view(&mut EventSurface { app })
}

/// スナップショットの更新を地図レイヤーとフロントエンドへ転送する
fn spawn_snapshot_forwarder(app: AppHandle, session: &TileSession, style: LayerStyle) {
    let mut rx = session.subscribe();
    tauri::async_runtime::spawn(async move {
        let mut sync = MapLayerSync::new(style);
        let mut surface = EventSurface { app };
        loop {
            let snapshot = rx.borrow_and_update().clone();
            sync.apply_snapshot(&snapshot, &mut surface);
            surface.emit(EVENT_SNAPSHOT, snapshot.as_ref());
            if rx.changed().await.is_err() {
                break;
            }
        }
        tracing::debug!("スナップショットの転送を終了します");
    });
}

pub fn run() {
    crate::logging::init();
    let config = AppConfig::load_or_default();
    let style = LayerStyle::from(&config.map);
    let app_state = AppState::new(config, AppConfig::default_path());

    tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .setup(move |app| {
            let state: State<AppState> = app.state();
            spawn_snapshot_forwarder(app.handle().clone(), &state.session, style);
            Ok(())
        })
        .manage(app_state)
        .invoke_handler(tauri::generate_handler![
            load_tile_csv,
            load_image_folder,
            run_batch_prediction,
            get_pipeline_snapshot,
            export_results,
            zoom_to_focus,
            reset_view,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
