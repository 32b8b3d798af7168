//! パイプラインのエラー種別

use std::path::PathBuf;

/// 1行分のジオメトリ・識別子を解析できなかった
///
/// 取り込み処理内で回復される（ジオメトリは空になる）ため、呼び出し元には返らない。
#[derive(Debug, thiserror::Error)]
pub enum IngestParseError {
    #[error("ジオメトリが空です")]
    Empty,
    #[error("ジオメトリのJSON解析に失敗しました: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("未対応のジオメトリ種別です: {0}")]
    UnsupportedType(String),
    #[error("リングの異なる頂点が不足しています ({0}頂点)")]
    DegenerateRing(usize),
    #[error("座標が不正です: {0}")]
    InvalidCoordinate(String),
}

/// 推論サービス呼び出しの失敗（通信・応答解析を区別しない）
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("推論エンドポイントが不正です: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
    #[error("通信エラー: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("特徴量のシリアライズに失敗しました: {0}")]
    Payload(serde_json::Error),
    #[error("推論サービスがエラーを返しました (HTTP {status}): {message}")]
    Status { status: u16, message: String },
    #[error("推論結果の解析に失敗しました: {0}")]
    Decode(serde_json::Error),
    #[error("推論結果が有限値ではありません: {0}")]
    NonFiniteScore(f64),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 実行中のバッチがあるのに再度開始しようとした
    #[error("バッチ推論はすでに実行中です")]
    Reentrancy,
    /// 実行中にデータセットを置き換えようとした
    #[error("バッチ推論の実行中はデータセットを置き換えられません")]
    IngestRejected,
    #[error("必須カラム `{0}` がありません")]
    MissingColumn(String),
    #[error("CSVの読み込みに失敗しました: {0}")]
    Csv(#[from] csv::Error),
    #[error("ファイルにアクセスできません {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}
