//! アプリケーション設定管理モジュール
//!
//! 推論サービスの接続先、CSVのカラム構成、地図表示の設定をJSON形式で保存・読み込みします。

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::{Position, ScoreRange};

/// 推論サービスが受け付ける特徴量（この順序で送信する）
pub const DEFAULT_FEATURE_NAMES: [&str; 6] = [
    "elevation",
    "land_cover_class",
    "mean_distance_to_water",
    "mean_ndvi",
    "nighttime_light",
    "slope",
];

/// 推論サービス設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceSettings {
    /// 予測エンドポイントのURL
    pub endpoint: String,
    /// 1リクエストあたりのタイムアウト（秒）
    pub timeout_secs: u64,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8000/predict/".to_string(),
            timeout_secs: 60,
        }
    }
}

impl InferenceSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// タイルCSVと画像フォルダの構成
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSettings {
    /// タイル識別子のカラム名
    pub id_column: String,
    /// ジオメトリのカラム候補（ヘッダーに最初に現れたものを使う）
    pub geometry_columns: Vec<String>,
    /// 推論に渡す特徴量カラム（順序が意味を持つ）
    pub feature_names: Vec<String>,
    /// 画像ファイル名から取り除く拡張子（大文字小文字を区別しない）
    pub image_extension: String,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            id_column: "tile_id".to_string(),
            geometry_columns: vec![".geo".to_string(), "geo".to_string()],
            feature_names: DEFAULT_FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            image_extension: ".png".to_string(),
        }
    }
}

/// 地図表示設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapSettings {
    /// 予測が1件もない間の色範囲
    pub fallback_range: ScoreRange,
    /// 予測済みタイルの塗り不透明度
    pub predicted_opacity: f32,
    /// 未予測タイルの塗り不透明度（輪郭が見える程度に残す）
    pub pending_opacity: f32,
    /// 初期表示の中心 `[lon, lat]`
    pub initial_center: Position,
    /// 初期表示のズーム
    pub initial_zoom: f64,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            fallback_range: ScoreRange::FALLBACK,
            predicted_opacity: 0.85,
            pending_opacity: 0.25,
            initial_center: [34.11, 0.005],
            initial_zoom: 12.0,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub inference: InferenceSettings,
    #[serde(default)]
    pub dataset: DatasetSettings,
    #[serde(default)]
    pub map: MapSettings,
    /// 最後に読み込んだCSVのパス
    #[serde(default)]
    pub last_csv_path: Option<String>,
    /// 最後に読み込んだ画像フォルダ
    #[serde(default)]
    pub last_image_dir: Option<String>,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("設定ファイルを読み込めません: {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("設定ファイルの解析に失敗しました: {}", path.display()))?;
        Ok(config)
    }

    /// 指定パスから設定を読み込む、存在しない・壊れている場合はデフォルト設定を返す
    pub fn load_or_default_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("設定ファイルが存在しません。デフォルト設定を使用します");
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => {
                tracing::info!("設定ファイルを読み込みました: {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!("{:#}。デフォルト設定を使用します", e);
                Self::default()
            }
        }
    }

    /// デフォルトパスから設定を読み込む
    pub fn load_or_default() -> Self {
        Self::load_or_default_from(Self::default_path())
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("設定ファイルを書き込めません: {}", path.as_ref().display()))?;
        Ok(())
    }

    /// デフォルトパスに設定を保存する
    pub fn save_default(&self) -> anyhow::Result<()> {
        let path = Self::default_path();
        self.save(&path)?;
        tracing::info!("設定ファイルを保存しました: {}", path.display());
        Ok(())
    }

    /// 最後に使用したCSVのパスを更新
    pub fn update_last_csv_path<P: AsRef<Path>>(&mut self, path: P) {
        self.last_csv_path = Some(path.as_ref().to_string_lossy().to_string());
    }

    /// 最後に使用した画像フォルダを更新
    pub fn update_last_image_dir<P: AsRef<Path>>(&mut self, path: P) {
        self.last_image_dir = Some(path.as_ref().to_string_lossy().to_string());
    }
}
