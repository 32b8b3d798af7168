//! タイルデータセットのバッチ推論と地図表示
//!
//! CSVで与えられたタイル（識別子・ポリゴン・特徴量）ごとに画像と特徴量を推論サービスへ送り、
//! 返ってきたスコアを色分けして地図レイヤーに反映する。

pub mod color_scale;
pub mod csv_loader;
pub mod dataset;
pub mod error;
pub mod geometry;
pub mod image_index;
pub mod inference;
pub mod logging;
pub mod map_sync;
pub mod model;
pub mod orchestrator;
pub mod session;
pub mod stats;
pub mod types;

#[cfg(feature = "desktop")]
mod commands;

#[cfg(test)]
mod test_support;

pub use dataset::TileDataset;
pub use error::{InferenceError, IngestParseError, PipelineError};
pub use image_index::{ImageAssetIndex, ImageHandle};
pub use inference::{FeaturePayload, HttpInferenceClient, InferenceService};
pub use map_sync::{LayerRegistry, MapLayerSync, RenderSurface, ViewController};
pub use model::AppConfig;
pub use orchestrator::{BatchPredictionOrchestrator, BatchSummary};
pub use session::{PipelineSnapshot, TileSession};
pub use stats::TileStats;
pub use types::{BatchProgress, ScoreRange, TileFailure, TileFailureKind, TileRecord, TileRow};

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    commands::run()
}
