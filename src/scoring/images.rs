//! Image retrieval for vision comparisons.

use base64::Engine;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use super::ScoreError;

const FALLBACK_MIME: &str = "image/jpeg";

/// An image ready to embed in a model request.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineImage {
    pub mime: String,
    /// Standard base64 of the raw bytes.
    pub data: String,
}

impl InlineImage {
    pub fn from_bytes(mime: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime: mime.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// `data:` URI form accepted by OpenAI-compatible `image_url` parts.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.data)
    }
}

/// Download an image and base64-encode it.
///
/// Fails on non-2xx responses, empty bodies, bodies larger than
/// `max_bytes` (declared or streamed), and responses whose `Content-Type`
/// is clearly not an image.
/// A missing or generic content type is treated as JPEG.
pub async fn fetch_image(
    client: &Client,
    url: &str,
    max_bytes: usize,
) -> Result<InlineImage, ScoreError> {
    let fail = |reason: String| ScoreError::ImageFetch {
        url: url.to_string(),
        reason,
    };

    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|e| fail(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(fail(format!("HTTP {}", status)));
    }

    if let Some(len) = response.content_length() {
        if len > max_bytes as u64 {
            return Err(fail(format!("{} bytes exceeds limit of {}", len, max_bytes)));
        }
    }

    let mime = match response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
    {
        None => FALLBACK_MIME.to_string(),
        Some(m) if m.starts_with("image/") => m,
        Some(m) if m == "application/octet-stream" => FALLBACK_MIME.to_string(),
        Some(m) => return Err(fail(format!("unexpected content type {}", m))),
    };

    // Content-Length is optional (chunked bodies), so the cap is enforced
    // while reading.
    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|e| fail(e.to_string()))? {
        if bytes.len() + chunk.len() > max_bytes {
            return Err(fail(format!("body exceeds limit of {} bytes", max_bytes)));
        }
        bytes.extend_from_slice(&chunk);
    }

    if bytes.is_empty() {
        return Err(fail("empty body".to_string()));
    }

    Ok(InlineImage::from_bytes(mime, &bytes))
}
