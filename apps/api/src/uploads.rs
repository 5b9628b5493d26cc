//! Multipart file intake shared by CV and skill-proof uploads.

use axum::extract::Multipart;
use bytes::Bytes;

use crate::errors::AppError;

/// Uploads above this size are refused by the router before reaching a handler.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

/// Reads the first multipart field named `file`. Other fields are skipped.
pub async fn read_file_field(multipart: &mut Multipart) -> Result<UploadedFile, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("could not read upload: {e}")))?;
        if data.is_empty() {
            return Err(AppError::Validation("uploaded file is empty".to_string()));
        }
        return Ok(UploadedFile {
            file_name,
            content_type,
            data,
        });
    }
    Err(AppError::Validation(
        "multipart field 'file' is required".to_string(),
    ))
}

/// Keeps object keys predictable: ASCII alphanumerics, dot, dash and underscore only.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.chars().take(100).collect()
    }
}
