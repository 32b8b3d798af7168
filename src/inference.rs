//! 推論サービス呼び出し
//!
//! 推論モデル自体はリモートの不透明なサービスとして扱う。1タイルにつき1リクエストで、
//! 画像と特徴量（固定順序）を `multipart/form-data` で送り、`predicted_score` を受け取る。

use std::future::Future;

use reqwest::multipart::{Form, Part};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use url::Url;

use crate::error::InferenceError;
use crate::model::InferenceSettings;
use crate::types::FeatureRow;

/// 推論サービスに送る特徴量（宣言順を保つ）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeaturePayload(Vec<(String, f64)>);

impl FeaturePayload {
    /// 行から認識済みの特徴量だけを取り出す。数値でない値は NaN のまま
    pub fn from_row(row: &FeatureRow, names: &[String]) -> Self {
        Self(row.numeric_values(names))
    }

    pub fn entries(&self) -> &[(String, f64)] {
        &self.0
    }

    pub fn to_json(&self) -> Result<String, InferenceError> {
        serde_json::to_string(self).map_err(InferenceError::Payload)
    }
}

/// JSONオブジェクトとして宣言順に書き出す。NaN は serde_json により null になる
impl Serialize for FeaturePayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// 1タイル分の推論を行うサービス
pub trait InferenceService {
    fn predict(
        &self,
        tile_id: &str,
        image: Vec<u8>,
        features: &FeaturePayload,
    ) -> impl Future<Output = Result<f64, InferenceError>> + Send;
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    predicted_score: f64,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// HTTP経由の推論クライアント
#[derive(Debug, Clone)]
pub struct HttpInferenceClient {
    client: reqwest::Client,
    endpoint: Url,
    image_extension: String,
}

impl HttpInferenceClient {
    pub fn new(
        settings: &InferenceSettings,
        image_extension: &str,
    ) -> Result<Self, InferenceError> {
        let endpoint = Url::parse(&settings.endpoint)?;
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()?;
        Ok(Self {
            client,
            endpoint,
            image_extension: image_extension.to_string(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn image_part(&self, tile_id: &str, image: Vec<u8>) -> Result<Part, InferenceError> {
        let mime = image::guess_format(&image)
            .map(|format| format.to_mime_type())
            .unwrap_or("application/octet-stream");
        let part = Part::bytes(image)
            .file_name(format!("{}{}", tile_id, self.image_extension))
            .mime_str(mime)?;
        Ok(part)
    }
}

impl InferenceService for HttpInferenceClient {
    async fn predict(
        &self,
        tile_id: &str,
        image: Vec<u8>,
        features: &FeaturePayload,
    ) -> Result<f64, InferenceError> {
        let form = Form::new()
            .part("image", self.image_part(tile_id, image)?)
            .text("features", features.to_json()?);

        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).trim().to_string());
            return Err(InferenceError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: PredictionResponse =
            serde_json::from_slice(&body).map_err(InferenceError::Decode)?;
        if !parsed.predicted_score.is_finite() {
            return Err(InferenceError::NonFiniteScore(parsed.predicted_score));
        }

        tracing::debug!("[predict] {} -> {}", tile_id, parsed.predicted_score);
        Ok(parsed.predicted_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    async fn spawn_stub(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/predict/")
    }

    fn client_for(endpoint: String) -> HttpInferenceClient {
        let settings = InferenceSettings {
            endpoint,
            timeout_secs: 5,
        };
        HttpInferenceClient::new(&settings, ".png").unwrap()
    }

    fn payload() -> FeaturePayload {
        let mut row = FeatureRow::default();
        row.insert("elevation", "1200");
        row.insert("slope", "steep");
        FeaturePayload::from_row(&row, &["elevation".to_string(), "slope".to_string()])
    }

    #[test]
    fn test_payload_json_keeps_order_and_nulls_nan() {
        assert_eq!(payload().to_json().unwrap(), r#"{"elevation":1200.0,"slope":null}"#);
    }

    #[tokio::test]
    async fn test_predict_sends_multipart_request() {
        let router = Router::new().route(
            "/predict/",
            post(|headers: HeaderMap, body: Bytes| async move {
                let content_type = headers
                    .get("content-type")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let body = String::from_utf8_lossy(&body).to_string();
                let valid = content_type.starts_with("multipart/form-data")
                    && body.contains(r#"filename="A.png""#)
                    && body.contains("image/png")
                    && body.contains(r#"name="features""#)
                    && body.contains(r#"{"elevation":1200.0,"slope":null}"#);
                if valid {
                    (StatusCode::OK, Json(json!({ "predicted_score": 0.42 })))
                } else {
                    (StatusCode::BAD_REQUEST, Json(json!({ "error": "unexpected request" })))
                }
            }),
        );
        let client = client_for(spawn_stub(router).await);

        let score = client.predict("A", PNG_MAGIC.to_vec(), &payload()).await.unwrap();
        assert_eq!(score, 0.42);
    }

    #[tokio::test]
    async fn test_error_status_carries_service_message() {
        let router = Router::new().route(
            "/predict/",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "Missing feature: 'slope'" })),
                )
            }),
        );
        let client = client_for(spawn_stub(router).await);

        let err = client.predict("A", vec![1, 2, 3], &payload()).await.unwrap_err();
        match err {
            InferenceError::Status { status, message } => {
                assert_eq!(status, 400);
                assert!(message.contains("Missing feature"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_response_is_decode_error() {
        let router = Router::new().route("/predict/", post(|| async { "not json" }));
        let client = client_for(spawn_stub(router).await);

        let err = client.predict("A", vec![0], &payload()).await.unwrap_err();
        assert!(matches!(err, InferenceError::Decode(_)));

        let router = Router::new().route(
            "/predict/",
            post(|| async { Json(json!({ "score": 1.0 })) }),
        );
        let client = client_for(spawn_stub(router).await);
        let err = client.predict("A", vec![0], &payload()).await.unwrap_err();
        assert!(matches!(err, InferenceError::Decode(_)));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client_for(format!("http://{addr}/predict/"));
        let err = client.predict("A", vec![0], &payload()).await.unwrap_err();
        assert!(matches!(err, InferenceError::Transport(_)));
    }

    #[test]
    fn test_invalid_endpoint() {
        let settings = InferenceSettings {
            endpoint: "not a url".to_string(),
            timeout_secs: 1,
        };
        let err = HttpInferenceClient::new(&settings, ".png").unwrap_err();
        assert!(matches!(err, InferenceError::InvalidEndpoint(_)));
    }

    #[test]
    fn test_response_value_shape() {
        let value: Value = json!({ "predicted_score": -0.25 });
        let parsed: PredictionResponse = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.predicted_score, -0.25);
    }
}
