//! HTTP handlers.

use std::path::Path;

use axum::Json;
use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path as UrlPath, State};
use axum::http::StatusCode;
use churn_training::{FeatureRecord, TrainingJobId, TrainingJobSpec, TrainingManifest};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::AppState;
use crate::error::ApiError;
use crate::queue::JobRecord;

/// Multipart field carrying the dataset.
pub const FILE_FIELD: &str = "file";

/// Name used when the client sends no usable filename.
const FALLBACK_FILENAME: &str = "dataset.csv";

#[derive(Debug, Serialize, Deserialize)]
pub struct TrainAccepted {
    pub task_id: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub predictions: Vec<f64>,
}

/// Last path component of a client-supplied filename.
fn upload_filename(raw: Option<&str>) -> String {
    raw.and_then(|name| Path::new(name).file_name())
        .and_then(|name| name.to_str())
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(FALLBACK_FILENAME)
        .to_string()
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::InvalidData(e.body_text())
    }
}

/// `POST /train`: store the uploaded CSV and enqueue a training job.
pub async fn train(
    State(state): State<AppState>,
    multipart: Option<Multipart>,
) -> Result<(StatusCode, Json<TrainAccepted>), ApiError> {
    let Some(mut multipart) = multipart else {
        return Err(ApiError::NoFile);
    };

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        // plain form values named `file` are not uploads
        if field.name() != Some(FILE_FIELD) || field.file_name().is_none() {
            continue;
        }
        let filename = upload_filename(field.file_name());
        let bytes = field.bytes().await.map_err(multipart_error)?;

        // each job reads its own copy; re-uploading a filename never touches an in-flight dataset
        let job_id = TrainingJobId::new();
        let dir = state.uploads_dir.join(&job_id.0);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(&filename);
        tokio::fs::write(&path, &bytes).await?;
        debug!(job_id = %job_id, path = %path.display(), bytes = bytes.len(), "Saved upload");

        let spec = TrainingJobSpec::with_id(job_id, path).with_hyperparams(state.hyperparams.clone());
        let job_id = state.queue.enqueue(spec).await?;
        info!(job_id = %job_id, filename = %filename, "Training job accepted");

        return Ok((
            StatusCode::ACCEPTED,
            Json(TrainAccepted { task_id: job_id.0, message: "Training started".to_string() }),
        ));
    }

    Err(ApiError::NoFile)
}

/// Empty, zero, or missing values count as "no data".
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

fn parse_records(body: &[u8]) -> Result<Vec<FeatureRecord>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::NoData);
    }
    let payload: Value = serde_json::from_slice(body).map_err(|e| ApiError::InvalidData(e.to_string()))?;
    let data = payload.get("data").cloned().unwrap_or(Value::Null);
    if is_blank(&data) {
        return Err(ApiError::NoData);
    }
    serde_json::from_value(data).map_err(|e| ApiError::InvalidData(e.to_string()))
}

/// `POST /predict`: score records with the current model.
pub async fn predict(State(state): State<AppState>, body: Bytes) -> Result<Json<PredictResponse>, ApiError> {
    let registry = state.registry.clone();
    let published = tokio::task::spawn_blocking(move || registry.load_latest())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    let Some(published) = published else {
        return Err(ApiError::ModelNotTrained);
    };

    let records = parse_records(&body)?;
    let predictions = published.model.predict_churn_proba(&records);
    debug!(model_id = %published.manifest.model_id, records = records.len(), "Scored records");
    Ok(Json(PredictResponse { predictions }))
}

/// `GET /jobs/:id`
pub async fn job_status(
    State(state): State<AppState>,
    UrlPath(job_id): UrlPath<String>,
) -> Result<Json<JobRecord>, ApiError> {
    state.queue.status(&TrainingJobId(job_id)).await?.map(Json).ok_or(ApiError::JobNotFound)
}

/// `GET /models/latest`
pub async fn latest_model(State(state): State<AppState>) -> Result<Json<TrainingManifest>, ApiError> {
    let registry = state.registry.clone();
    tokio::task::spawn_blocking(move || registry.latest_manifest())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??
        .map(Json)
        .ok_or(ApiError::NoPublishedModel)
}

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_filename_strips_directories() {
        assert_eq!(upload_filename(Some("customers.csv")), "customers.csv");
        assert_eq!(upload_filename(Some("../../etc/passwd")), "passwd");
        assert_eq!(upload_filename(Some("dir/sub/data.csv")), "data.csv");
    }

    #[test]
    fn test_upload_filename_falls_back() {
        assert_eq!(upload_filename(None), FALLBACK_FILENAME);
        assert_eq!(upload_filename(Some("")), FALLBACK_FILENAME);
        assert_eq!(upload_filename(Some("..")), FALLBACK_FILENAME);
    }

    #[test]
    fn test_parse_records_no_data_cases() {
        for body in ["", "  ", "{}", r#"{"data": null}"#, r#"{"data": []}"#, r#"{"data": ""}"#] {
            assert!(matches!(parse_records(body.as_bytes()), Err(ApiError::NoData)), "body: {body:?}");
        }
    }

    #[test]
    fn test_parse_records_invalid_payloads() {
        assert!(matches!(parse_records(b"not json"), Err(ApiError::InvalidData(_))));
        let missing_feature = br#"{"data": [{"tenure": 3, "usage_freq": 1}]}"#;
        assert!(matches!(parse_records(missing_feature), Err(ApiError::InvalidData(_))));
    }

    #[test]
    fn test_parse_records_accepts_integer_features() {
        let body = br#"{"data": [{"tenure": 3, "usage_freq": 1.5, "complaints": 0, "plan": "gold"}]}"#;
        let records = parse_records(body).unwrap();
        assert_eq!(records, vec![FeatureRecord { tenure: 3.0, usage_freq: 1.5, complaints: 0.0 }]);
    }
}
