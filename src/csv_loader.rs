use crate::dataset::TileDataset;
use crate::error::PipelineError;
use crate::model::DatasetSettings;
use crate::types::{FeatureRow, TileRow};
use csv::ReaderBuilder;
use std::io::Read;
use std::path::Path;

/// タイルCSVを読み込む
///
/// 識別子が空の行は黙って捨てる。ジオメトリはここでは解析せず文字列のまま保持する。
pub fn load_tile_rows(
    path: &Path,
    settings: &DatasetSettings,
) -> Result<Vec<TileRow>, PipelineError> {
    let file = std::fs::File::open(path).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let rows = read_tile_rows(file, settings)?;
    tracing::info!("[load_tile_rows] {} - {}行", path.display(), rows.len());
    Ok(rows)
}

pub fn read_tile_rows<R: Read>(
    input: R,
    settings: &DatasetSettings,
) -> Result<Vec<TileRow>, PipelineError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(input);

    let headers = reader.headers()?.clone();
    let id_index = headers
        .iter()
        .position(|h| h.trim() == settings.id_column)
        .ok_or_else(|| PipelineError::MissingColumn(settings.id_column.clone()))?;
    let geometry_index = settings
        .geometry_columns
        .iter()
        .find_map(|name| headers.iter().position(|h| h.trim() == name));
    if geometry_index.is_none() {
        tracing::warn!(
            "ジオメトリカラム {:?} がありません。全タイルのジオメトリは空になります",
            settings.geometry_columns
        );
    }

    let mut rows = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = result?;

        let id = record.get(id_index).map(str::trim).unwrap_or_default();
        if id.is_empty() {
            tracing::debug!("識別子のない行をスキップしました (データ行 {})", line + 1);
            continue;
        }

        let geometry = geometry_index
            .and_then(|i| record.get(i))
            .unwrap_or_default()
            .to_string();

        // 識別子・ジオメトリ以外のカラムはすべて生の特徴量として保持する
        let mut features = FeatureRow::default();
        for (i, header) in headers.iter().enumerate() {
            if i == id_index || Some(i) == geometry_index {
                continue;
            }
            if let Some(value) = record.get(i) {
                features.insert(header.trim(), value);
            }
        }

        rows.push(TileRow {
            id: id.to_string(),
            geometry,
            features,
        });
    }

    Ok(rows)
}

/// 予測結果の一覧をCSVに書き出す（データセットの順序のまま）
pub fn write_results_csv(path: &Path, dataset: &TileDataset) -> Result<usize, PipelineError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["tile_id", "score", "status"])?;

    for record in dataset.records() {
        let (score, status) = match record.score {
            Some(score) => (score.to_string(), "predicted"),
            None => (String::new(), "pending"),
        };
        writer.write_record([record.id.as_str(), score.as_str(), status])?;
    }

    writer.flush().map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(dataset.len())
}
