//! リクエストから画像バイト列を取り出す
//!
//! 受け付ける形式:
//! - `multipart/form-data` の `image` フィールド
//! - `application/json` の `{"image": "<base64>"}`（data URL の接頭辞も可）
//! - それ以外は本文をそのまま画像として扱う

use axum::{
    extract::{FromRequest, Multipart, Request},
    http::header::CONTENT_TYPE,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use thiserror::Error;

/// 画像フィールド名
pub const IMAGE_FIELD: &str = "image";

/// 入力エラー（400 で返す）
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageInputError {
    #[error("No image provided")]
    Missing,

    #[error("Invalid request body: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize)]
struct ImagePayload {
    image: Option<String>,
}

/// base64 文字列をデコード（`data:image/png;base64,` の接頭辞を許容）
pub fn decode_base64_image(encoded: &str) -> Result<Vec<u8>, ImageInputError> {
    let data = match encoded.split_once(',') {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    let data: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(data.as_bytes())
        .map_err(|e| ImageInputError::Invalid(format!("image is not valid base64: {e}")))
}

fn non_empty(bytes: Vec<u8>) -> Result<Vec<u8>, ImageInputError> {
    if bytes.is_empty() {
        Err(ImageInputError::Missing)
    } else {
        Ok(bytes)
    }
}

/// リクエストから画像を取り出す
pub async fn image_from_request(request: Request, limit: usize) -> Result<Vec<u8>, ImageInputError> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| ImageInputError::Invalid(e.body_text()))?;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ImageInputError::Invalid(e.body_text()))?
        {
            if field.name() == Some(IMAGE_FIELD) {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ImageInputError::Invalid(e.body_text()))?;
                return non_empty(bytes.to_vec());
            }
        }
        return Err(ImageInputError::Missing);
    }

    let body = axum::body::to_bytes(request.into_body(), limit)
        .await
        .map_err(|e| ImageInputError::Invalid(e.to_string()))?;

    if content_type.starts_with("application/json") {
        let payload: ImagePayload = serde_json::from_slice(&body)
            .map_err(|e| ImageInputError::Invalid(format!("malformed JSON: {e}")))?;
        let encoded = payload
            .image
            .filter(|s| !s.trim().is_empty())
            .ok_or(ImageInputError::Missing)?;
        return non_empty(decode_base64_image(&encoded)?);
    }

    non_empty(body.to_vec())
}
