use reqwest::Response;

use crate::error::{CensusError, Result};

/// Extension trait to add simd-json parsing support to reqwest responses
pub trait ResponseSimdJsonExt {
    /// Parse response body as JSON using simd-json
    async fn simd_json<T>(self) -> Result<T>
    where
        T: serde::de::DeserializeOwned;
}

impl ResponseSimdJsonExt for Response {
    async fn simd_json<T>(self) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = self.url().to_string();
        let bytes = self.bytes().await?;
        parse_json_bytes(bytes.to_vec()).map_err(|e| {
            CensusError::Upstream(format!("unexpected response body from {url}: {e}"))
        })
    }
}

/// Parse an owned JSON buffer with simd-json (which mutates its input).
pub fn parse_json_bytes<T>(mut bytes: Vec<u8>) -> std::result::Result<T, simd_json::Error>
where
    T: serde::de::DeserializeOwned,
{
    simd_json::from_slice(&mut bytes)
}
