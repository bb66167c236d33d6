//! Client for the backing key-value store.
//!
//! The store is addressed by a location string under a configured base URL
//! and a bearer-style credential. The contract is narrow: GET returns a JSON
//! object of string values (a Vault-style `{"data": {...}}` wrapper is
//! unwrapped when present), POST writes the full object back. A 404 on fetch
//! means the location was never provisioned and reads as an empty set.
//!
//! The read-merge-write in [`merge`] is not transactional against concurrent
//! writers of the same location; last-write-wins at the field level is the
//! accepted, documented behavior.
//!
//! [`merge`]: ExternalStoreClient::merge

use reqwest::Client;
use std::collections::HashMap;

use crate::error::EngineError;

/// The set of key-value pairs stored at one location.
pub type KeyValueSet = HashMap<String, String>;

pub struct ExternalStoreClient {
    client: Client,
    base_url: String,
}

impl ExternalStoreClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn location_url(&self, location: &str) -> String {
        format!("{}/{}", self.base_url, location.trim_matches('/'))
    }

    /// Fetch the current contents of a location. 404 reads as empty.
    pub async fn fetch(
        &self,
        location: &str,
        credential: &str,
    ) -> Result<KeyValueSet, EngineError> {
        let resp = self
            .client
            .get(self.location_url(location))
            .header("Authorization", format!("Bearer {}", credential))
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            // First-time provisioning: the location does not exist yet
            return Ok(KeyValueSet::new());
        }
        let body = resp.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(EngineError::StoreUnavailable {
                status: status.as_u16(),
                body,
            });
        }

        parse_key_value_set(&body).ok_or_else(|| EngineError::StoreUnavailable {
            status: status.as_u16(),
            body,
        })
    }

    /// Read, overlay `updates` (later keys overwrite earlier), write back the
    /// union. Returns the merged set as written.
    pub async fn merge(
        &self,
        location: &str,
        credential: &str,
        updates: KeyValueSet,
    ) -> Result<KeyValueSet, EngineError> {
        let mut merged = self.fetch(location, credential).await?;
        merged.extend(updates);

        let resp = self
            .client
            .post(self.location_url(location))
            .header("Authorization", format!("Bearer {}", credential))
            .json(&serde_json::json!({ "data": &merged }))
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::StoreUnavailable {
                status: status.as_u16(),
                body,
            });
        }

        Ok(merged)
    }

    /// Merge a single key into the location.
    pub async fn update_single_key(
        &self,
        location: &str,
        credential: &str,
        key: &str,
        value: &str,
    ) -> Result<KeyValueSet, EngineError> {
        let mut updates = KeyValueSet::new();
        updates.insert(key.to_string(), value.to_string());
        self.merge(location, credential, updates).await
    }
}

fn transport_error(e: reqwest::Error) -> EngineError {
    // Status 0 marks a transport-level failure (no HTTP response)
    EngineError::StoreUnavailable {
        status: e.status().map(|s| s.as_u16()).unwrap_or(0),
        body: e.to_string(),
    }
}

/// Parse a store response body into a key-value set, unwrapping a Vault-style
/// `data` envelope when present. Non-string values are ignored.
fn parse_key_value_set(body: &str) -> Option<KeyValueSet> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let object = match value.get("data") {
        Some(serde_json::Value::Object(data)) => data.clone(),
        _ => value.as_object()?.clone(),
    };

    let mut set = KeyValueSet::new();
    for (k, v) in object {
        if let serde_json::Value::String(s) = v {
            set.insert(k, s);
        }
    }
    Some(set)
}
