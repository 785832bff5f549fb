//! Responses returned by the request pipeline

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::cache::CacheEntry;
use crate::errors::Result;

/// Where a response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Network,
    /// A fresh cache entry
    Cache,
    /// An expired cache entry served because the network failed
    Stale,
}

/// Successful API response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    /// Header names are lower-case
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub source: ResponseSource,
}

impl ApiResponse {
    /// Rebuild a response from a cache entry
    pub fn from_cache(entry: &Arc<CacheEntry>, source: ResponseSource) -> Self {
        let mut headers = BTreeMap::new();
        if let Some(content_type) = &entry.content_type {
            headers.insert("content-type".to_string(), content_type.clone());
        }
        Self { status: entry.status, headers, body: entry.payload.clone(), source }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn is_stale(&self) -> bool {
        self.source == ResponseSource::Stale
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Body as UTF-8 text (lossy)
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    #[test]
    fn cached_response_keeps_status_and_content_type() {
        let entry = Arc::new(CacheEntry {
            key: "/profile".into(),
            payload: br#"{"name":"Ada"}"#.to_vec(),
            status: 200,
            content_type: Some("application/json".into()),
            stored_at_epoch_millis: 0,
            ttl_millis: 1,
        });

        let response = ApiResponse::from_cache(&entry, ResponseSource::Stale);
        let body: Value = response.json().expect("json body");

        assert!(response.is_stale());
        assert_eq!(response.header("Content-Type"), Some("application/json"));
        assert_eq!(body["name"], "Ada");
    }

    #[test]
    fn invalid_json_is_a_serialization_error() {
        let response = ApiResponse {
            status: 200,
            headers: BTreeMap::new(),
            body: b"not json".to_vec(),
            source: ResponseSource::Network,
        };

        let err = response.json::<Value>().expect_err("should fail");
        assert!(matches!(err, crate::SessionError::Serialization(_)));
        assert_eq!(response.text(), "not json");
    }
}
