use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State, multipart::MultipartError, multipart::MultipartRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::IntoResponse,
};
use bytes::{Bytes, BytesMut};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use fileswap_types::{
    FileDescriptor, MAX_FILE_SIZE, SwapStatus, SwapUploadResponse, SwapView,
    UploadResponse,
};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::blob::{BlobError, BlobSink, discard_blob, discard_record_blobs};
use crate::engine::{SwapEngine, SwapError};
use crate::error::ApiError;

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SwapEngine>,
    pub blobs: Arc<dyn BlobSink>,
}

// ── Multipart form ──────────────────────────────────────────────────────

struct UploadedFile {
    name: String,
    data: Bytes,
}

#[derive(Default)]
struct UploadForm {
    file: Option<UploadedFile>,
    swap_id: Option<String>,
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::TooLarge
    } else {
        ApiError::Multipart(err.body_text())
    }
}

/// Read the `file` and `swapId` fields. The file is buffered chunk by chunk
/// and refused as soon as it passes `MAX_FILE_SIZE`.
async fn read_form(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<UploadForm, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::Multipart(e.body_text()))?;
    let mut form = UploadForm::default();

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let mut buf = BytesMut::new();
                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    if (buf.len() + chunk.len()) as u64 > MAX_FILE_SIZE {
                        warn!("Rejected upload {}: larger than {} bytes", name, MAX_FILE_SIZE);
                        return Err(ApiError::TooLarge);
                    }
                    buf.extend_from_slice(&chunk);
                }
                // Browsers send an empty, unnamed part when no file was picked.
                if name.is_empty() && buf.is_empty() {
                    continue;
                }
                form.file = Some(UploadedFile {
                    name: if name.is_empty() { "file".to_string() } else { name },
                    data: buf.freeze(),
                });
            }
            Some("swapId") => {
                let text = field.text().await.map_err(multipart_error)?;
                let text = text.trim();
                if !text.is_empty() {
                    form.swap_id = Some(text.to_string());
                }
            }
            _ => {}
        }
    }

    Ok(form)
}

/// Put the bytes in the blob sink under a fresh key.
async fn store_blob(state: &AppState, file: &UploadedFile) -> Result<FileDescriptor, ApiError> {
    let key = Uuid::new_v4().simple().to_string();
    let locator = state.blobs.store(&key, &file.name, file.data.clone()).await?;
    Ok(FileDescriptor {
        locator,
        display_name: file.name.clone(),
        size_bytes: file.data.len() as u64,
    })
}

// ── Handlers ────────────────────────────────────────────────────────────

/// POST /upload: store the first file and open a new swap.
pub async fn upload_file(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let form = read_form(multipart).await?;
    let file = form.file.ok_or(ApiError::MissingField("No file provided"))?;
    info!("Upload: {} ({} bytes)", file.name, file.data.len());

    let descriptor = store_blob(&state, &file).await?;
    let locator = descriptor.locator.clone();

    let record = match state.engine.open_swap(descriptor).await {
        Ok(record) => record,
        Err(e) => {
            discard_blob(state.blobs.as_ref(), &locator).await;
            return Err(e.into());
        }
    };

    Ok(Json(UploadResponse {
        swap_id: record.id,
        file_id: locator,
        filename: file.name,
    }))
}

/// POST /swap/upload: store the second file of an existing swap.
pub async fn upload_second_file(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<SwapUploadResponse>, ApiError> {
    let form = read_form(multipart).await?;
    let (Some(file), Some(swap_id)) = (form.file, form.swap_id) else {
        return Err(ApiError::MissingField("Missing file or swapId"));
    };

    match state.engine.swap_status(&swap_id).await? {
        SwapStatus::WaitingForFile2 => {}
        SwapStatus::Expired => return Err(ApiError::Gone),
        status => {
            return Err(SwapError::InvalidState { id: swap_id, status }.into());
        }
    }
    info!("Swap {}: second upload {} ({} bytes)", swap_id, file.name, file.data.len());

    let descriptor = store_blob(&state, &file).await?;
    let locator = descriptor.locator.clone();

    let record = match state.engine.attach_file2(&swap_id, descriptor).await {
        Ok(record) => record,
        Err(e) => {
            discard_blob(state.blobs.as_ref(), &locator).await;
            return Err(e.into());
        }
    };
    let status = state.engine.status(&record);

    Ok(Json(SwapUploadResponse {
        swap_id,
        file_id: locator,
        filename: file.name,
        swap: SwapView::new(record, status),
    }))
}

/// GET /swap/{id}: the swap record plus its derived status.
pub async fn get_swap(
    State(state): State<AppState>,
    Path(swap_id): Path<String>,
) -> Result<Json<SwapView>, ApiError> {
    let record = state.engine.get_swap(&swap_id).await?;
    let status = state.engine.status(&record);
    Ok(Json(SwapView::new(record, status)))
}

/// DELETE /swap/{id}: drop a swap and its blobs. Unknown ids succeed.
pub async fn delete_swap(
    State(state): State<AppState>,
    Path(swap_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let existing = match state.engine.get_swap(&swap_id).await {
        Ok(record) => Some(record),
        Err(SwapError::NotFound(_)) => None,
        Err(e) => return Err(e.into()),
    };

    state.engine.delete_swap(&swap_id).await?;
    if let Some(record) = existing {
        discard_record_blobs(state.blobs.as_ref(), &record).await;
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    #[serde(rename = "fileId")]
    pub file_id: Option<String>,
    pub filename: Option<String>,
}

/// GET /download?fileId=...&filename=...: stream a blob as an attachment.
pub async fn download(
    State(state): State<AppState>,
    Query(params): Query<DownloadParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(file_id), Some(filename)) = (
        params.file_id.filter(|s| !s.is_empty()),
        params.filename.filter(|s| !s.is_empty()),
    ) else {
        return Err(ApiError::MissingField("Missing fileId or filename"));
    };

    let blob = state.blobs.open(&file_id).await.map_err(|e| {
        match &e {
            BlobError::NotFound(_) | BlobError::InvalidLocator(_) => {
                warn!("Download of {} refused: {}", file_id, e)
            }
            _ => warn!("Download of {} failed: {}", file_id, e),
        }
        ApiError::FileNotFound
    })?;

    let content_type = blob
        .content_type
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_DISPOSITION, content_disposition(&filename));
    if let Some(len) = blob.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }

    Ok((StatusCode::OK, headers, Body::from_stream(blob.stream)))
}

/// GET /health
pub async fn health() -> &'static str {
    "ok"
}

/// RFC 5987 `attr-char` leaves alphanumerics and these marks unescaped.
const FILENAME_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// `attachment` disposition with an ASCII fallback name and, when the name
/// is not plain ASCII, an RFC 5987 `filename*` parameter.
fn content_disposition(filename: &str) -> HeaderValue {
    let fallback: String = filename
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();

    let mut value = format!("attachment; filename=\"{}\"", fallback);
    if !filename.is_ascii() {
        value.push_str("; filename*=UTF-8''");
        value.extend(utf8_percent_encode(filename, FILENAME_ESCAPE));
    }

    HeaderValue::from_str(&value)
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_for_plain_name() {
        assert_eq!(
            content_disposition("report.pdf"),
            "attachment; filename=\"report.pdf\""
        );
    }

    #[test]
    fn disposition_strips_quotes_and_controls() {
        assert_eq!(
            content_disposition("a\"b\r\nc.txt"),
            "attachment; filename=\"abc.txt\""
        );
    }

    #[test]
    fn disposition_encodes_unicode() {
        assert_eq!(
            content_disposition("ñ é.txt"),
            "attachment; filename=\"_ _.txt\"; filename*=UTF-8''%C3%B1%20%C3%A9.txt"
        );
    }

    #[test]
    fn disposition_escapes_separators_in_extended_name() {
        assert_eq!(
            content_disposition("résumé (v2);\"x\"~1.pdf"),
            "attachment; filename=\"r_sum_ (v2);x~1.pdf\"; \
             filename*=UTF-8''r%C3%A9sum%C3%A9%20%28v2%29%3B%22x%22~1.pdf"
        );
    }
}
