//! タイルCSVと画像フォルダからバッチ推論を実行するコマンドラインツール
//!
//! デスクトップシェルなしで同じパイプラインを動かし、結果を GeoJSON と CSV に書き出す。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use tile_score_map_lib::color_scale::legend_stops;
use tile_score_map_lib::csv_loader::{load_tile_rows, write_results_csv};
use tile_score_map_lib::map_sync::{LayerStyle, ViewController};
use tile_score_map_lib::{
    logging, AppConfig, BatchPredictionOrchestrator, HttpInferenceClient, ImageAssetIndex,
    LayerRegistry, MapLayerSync, TileSession,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// タイルCSV（tile_id, .geo, 特徴量カラム）
    #[arg(long)]
    csv: PathBuf,

    /// タイル画像のフォルダ（`<tile_id>.png`）
    #[arg(long)]
    images: PathBuf,

    /// 推論サービスのURL。未指定なら設定ファイルの値
    #[arg(long, env = "TILE_INFERENCE_ENDPOINT")]
    endpoint: Option<String>,

    /// リクエストごとのタイムアウト（秒）
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// 設定ファイル
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// 描画レイヤーの GeoJSON 出力先
    #[arg(long)]
    layers_out: Option<PathBuf>,

    /// 結果一覧（tile_id, score, status）の CSV 出力先
    #[arg(long)]
    results_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let args = Args::parse();

    let mut config = AppConfig::load_or_default_from(&args.config);
    if let Some(endpoint) = args.endpoint {
        config.inference.endpoint = endpoint;
    }
    if let Some(timeout) = args.timeout_secs {
        config.inference.timeout_secs = timeout;
    }

    let session = Arc::new(TileSession::new(config.map.fallback_range));
    let rows = load_tile_rows(&args.csv, &config.dataset)
        .with_context(|| format!("タイルCSVを読み込めません: {}", args.csv.display()))?;
    session.ingest(rows)?;

    let images = ImageAssetIndex::from_directory(&args.images, &config.dataset.image_extension)
        .with_context(|| format!("画像フォルダを読み込めません: {}", args.images.display()))?;
    session.set_images(images);

    let client = HttpInferenceClient::new(&config.inference, &config.dataset.image_extension)
        .context("推論クライアントを初期化できません")?;
    tracing::info!("推論サービス: {}", client.endpoint());

    let orchestrator = BatchPredictionOrchestrator::new(
        session.clone(),
        client,
        config.dataset.feature_names.clone(),
    );
    let summary = orchestrator
        .run(|progress| {
            if progress.running && progress.current > 0 {
                println!("[{}/{}]", progress.current, progress.total);
            }
        })
        .await?;

    let snapshot = session.snapshot();
    let mut registry = LayerRegistry::new();
    let mut sync = MapLayerSync::new(LayerStyle::from(&config.map));
    sync.apply_snapshot(&snapshot, &mut registry);
    if registry.bounds.is_none() {
        ViewController::from(&config.map).reset_view(&mut registry);
    }

    if let Some(path) = &args.layers_out {
        let geojson = serde_json::to_string_pretty(&registry.to_geojson())?;
        std::fs::write(path, geojson)
            .with_context(|| format!("書き込みに失敗: {}", path.display()))?;
        println!("レイヤー: {} ({}件)", path.display(), registry.len());
    }
    if let Some(path) = &args.results_out {
        let written = write_results_csv(path, &session.dataset())?;
        println!("結果一覧: {} ({}件)", path.display(), written);
    }

    let stats = snapshot.stats;
    println!();
    println!("タイル数: {}", stats.total);
    println!("予測済み: {} (失敗 {})", stats.predicted, summary.failed);
    if stats.predicted > 0 {
        println!("平均: {:.4}  最小: {:.4}  最大: {:.4}", stats.avg, stats.min, stats.max);
    }
    let legend: Vec<String> = legend_stops(&snapshot.range, 5)
        .iter()
        .map(|(score, color)| format!("{:.2}={}", score, color.to_css()))
        .collect();
    println!("凡例 (Low → High): {}", legend.join("  "));

    for failure in &snapshot.failures {
        eprintln!("✗ {} [{}] {}", failure.tile_id, failure.kind, failure.reason);
    }
    Ok(())
}
