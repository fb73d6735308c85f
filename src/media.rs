//! Replacement image handling
//!
//! Optionally fetches the replacement creative over HTTP and inlines it as a
//! base64 data URI, so the injected image still renders if the portal blocks
//! third-party image loads.

use base64::Engine;
use tracing::{info, warn};

/// 1x1 transparent PNG used when the replacement image cannot be fetched
pub const FALLBACK_PIXEL: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8BQDwAEhQGAhKmMIQAAAABJRU5ErkJggg==";

/// Build a data URI from raw bytes and their content type
pub fn data_uri(content_type: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        content_type,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Fetch an image over HTTP and convert it to a data URI.
///
/// Never fails the run: on any fetch error the transparent fallback pixel is
/// returned and a warning logged.
pub async fn fetch_data_uri(url: &str) -> String {
    match try_fetch(url).await {
        Ok(uri) => {
            info!("Replacement image inlined ({} chars)", uri.len());
            uri
        }
        Err(e) => {
            warn!("Failed to fetch replacement image, using fallback pixel: {}", e);
            FALLBACK_PIXEL.to_string()
        }
    }
}

async fn try_fetch(url: &str) -> Result<String, reqwest::Error> {
    let response = reqwest::get(url).await?.error_for_status()?;
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("image/png")
        .to_string();
    let bytes = response.bytes().await?;
    Ok(data_uri(&content_type, &bytes))
}
