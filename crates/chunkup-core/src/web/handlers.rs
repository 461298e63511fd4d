//! HTTP endpoint handlers for the upload API.

#![allow(clippy::missing_errors_doc)]

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use axum_extra::extract::Multipart;
use serde::Serialize;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::catalog::CompletedUpload;
use crate::protocol::{
    AbortRequest, AbortResponse, ChunkReceipt, ChunkRequest, UploadResource, FIELD_CHECKSUM,
    FIELD_CHUNK, FIELD_CHUNK_INDEX, FIELD_FILE_IDENTIFIER, FIELD_ORIGINAL_NAME,
    FIELD_TOTAL_CHUNKS,
};

use super::error::{ApiError, ApiResult};
use super::state::SharedState;

/// Delete response.
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    /// Status message
    message: String,
}

/// POST /upload/chunk - Accept one chunk.
pub async fn upload_chunk(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ChunkReceipt>> {
    let mut payload = None;
    let mut chunk_index = None;
    let mut total_chunks = None;
    let mut original_name = None;
    let mut upload_id = None;
    let mut checksum = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to read multipart field: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if name == FIELD_CHUNK {
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("Failed to read chunk data: {e}")))?;
            payload = Some(data.to_vec());
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read field '{name}': {e}")))?;

        match name.as_str() {
            FIELD_CHUNK_INDEX => chunk_index = Some(parse_field::<u64>(&name, &value)?),
            FIELD_TOTAL_CHUNKS => total_chunks = Some(parse_field::<u64>(&name, &value)?),
            FIELD_ORIGINAL_NAME => original_name = Some(value),
            FIELD_FILE_IDENTIFIER => upload_id = Some(value),
            FIELD_CHECKSUM if !value.trim().is_empty() => checksum = Some(value),
            _ => tracing::debug!(field = %name, "Ignoring unknown multipart field"),
        }
    }

    let request = ChunkRequest {
        upload_id: required(upload_id, FIELD_FILE_IDENTIFIER)?,
        chunk_index: required(chunk_index, FIELD_CHUNK_INDEX)?,
        total_chunks: required(total_chunks, FIELD_TOTAL_CHUNKS)?,
        original_name: required(original_name, FIELD_ORIGINAL_NAME)?,
        payload: required(payload, FIELD_CHUNK)?,
        checksum,
    };

    // Runs to completion even if the client disconnects mid-request.
    let outcome = Arc::clone(&state.receiver)
        .receive_detached(request)
        .await?;
    Ok(Json(ChunkReceipt::from(&outcome)))
}

fn parse_field<T: FromStr>(name: &str, value: &str) -> ApiResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Field '{name}' is not a valid number")))
}

fn required<T>(value: Option<T>, name: &str) -> ApiResult<T> {
    value.ok_or_else(|| ApiError::bad_request(format!("Missing field '{name}'")))
}

/// POST /upload/abort - Discard an upload's partial data.
pub async fn abort_upload(
    State(state): State<SharedState>,
    body: Result<Json<AbortRequest>, JsonRejection>,
) -> ApiResult<Json<AbortResponse>> {
    let Json(request) = body?;
    state.receiver.abort(&request.file_identifier).await?;
    Ok(Json(AbortResponse::default()))
}

/// GET /uploads - List completed uploads, newest first.
pub async fn list_uploads(State(state): State<SharedState>) -> Json<Vec<UploadResource>> {
    let uploads = state.receiver.catalog().list().await;
    Json(uploads.iter().map(UploadResource::from).collect())
}

/// GET /upload/{id} - Get one completed upload.
pub async fn get_upload(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<UploadResource>> {
    let upload = find_upload(&state, &id).await?;
    Ok(Json(UploadResource::from(&upload)))
}

/// GET /upload/{id}/download - Stream a completed upload's file.
pub async fn download_upload(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let upload = find_upload(&state, &id).await?;

    let file = state
        .receiver
        .storage()
        .open(&upload.file_path)
        .await
        .map_err(|_| ApiError::not_found(format!("File for upload '{id}' is missing")))?;

    let body = Body::from_stream(ReaderStream::new(file));
    let content_type = upload
        .mime_type
        .as_deref()
        .unwrap_or("application/octet-stream");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", upload.name),
        )
        .header(header::CONTENT_LENGTH, upload.file_size)
        .body(body)
        .map_err(|e| ApiError::internal(format!("Failed to build response: {e}")))
}

/// DELETE /upload/{id} - Delete a completed upload and its file.
pub async fn delete_upload(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    let uuid = parse_id(&id)?;
    state.receiver.catalog().delete(uuid).await?;
    Ok(Json(DeleteResponse {
        message: "Upload deleted".to_string(),
    }))
}

async fn find_upload(state: &SharedState, id: &str) -> ApiResult<CompletedUpload> {
    let uuid = parse_id(id)?;
    state
        .receiver
        .catalog()
        .get(uuid)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Upload '{id}' not found")))
}

fn parse_id(id: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(id).map_err(|_| ApiError::not_found(format!("Upload '{id}' not found")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field() {
        assert_eq!(parse_field::<u64>("chunkIndex", " 7 ").unwrap(), 7);
        let err = parse_field::<u64>("chunkIndex", "seven").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_required() {
        assert_eq!(required(Some(1), "x").unwrap(), 1);
        let err = required::<u64>(None, "totalChunks").unwrap_err();
        assert!(err.message.contains("totalChunks"));
    }

    #[test]
    fn test_parse_id_not_found() {
        let err = parse_id("not-a-uuid").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(parse_id(&Uuid::new_v4().to_string()).is_ok());
    }
}
