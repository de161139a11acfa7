//! Remote image metadata lookup.
//!
//! Inline image tags only carry a numeric id. When the export's image subtree does
//! not know the id, the resolver can ask the World Anvil API. The lookup is
//! best-effort: every failure simply leaves the image unresolved.

use crate::config::ImageApiConfig;
use crate::models::ImageRef;
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LookupError {
    /// The service answered that the image does not exist. Not retried.
    #[error("image {0} not found")]
    NotFound(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
}

/// Something that can fetch image metadata by id.
///
/// `Ok(None)` means the call succeeded but the payload held no usable record.
pub trait ImageSource {
    fn fetch(&self, image_id: &str) -> Result<Option<ImageRef>, LookupError>;
}

/// Blocking HTTP client for the image metadata endpoint.
///
/// Must be created and dropped outside of a tokio runtime.
pub struct HttpImageApi {
    client: Client,
    url_template: String,
    auth_header: String,
    api_key: String,
    world_id: Option<String>,
}

impl HttpImageApi {
    pub fn new(config: &ImageApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build image API client")?;

        Ok(Self {
            client,
            url_template: config.url_template.clone(),
            auth_header: config.auth_header.clone(),
            api_key: config.api_key.clone(),
            world_id: Some(config.world_id.clone()).filter(|w| !w.is_empty()),
        })
    }

    fn request_url(&self, image_id: &str) -> String {
        self.url_template.replace("{image_id}", image_id)
    }
}

impl ImageSource for HttpImageApi {
    fn fetch(&self, image_id: &str) -> Result<Option<ImageRef>, LookupError> {
        let mut request = self
            .client
            .get(self.request_url(image_id))
            .header(self.auth_header.as_str(), self.api_key.as_str());
        if let Some(world) = &self.world_id {
            request = request.query(&[("world", world.as_str())]);
        }

        let response = request.send()?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(LookupError::NotFound(image_id.to_string()));
        }
        if !status.is_success() {
            return Err(LookupError::Status(status.as_u16()));
        }

        let payload: Value = response.json()?;
        Ok(parse_payload(&payload, image_id))
    }
}

/// Finds the image record for `expected_id` in an API payload. The record may sit
/// at the top level or under `data`, `image` or `result` (object or list).
pub fn parse_payload(payload: &Value, expected_id: &str) -> Option<ImageRef> {
    let mut candidates: Vec<&Value> = Vec::new();
    match payload {
        Value::Object(map) => {
            candidates.push(payload);
            for key in ["data", "image", "result"] {
                match map.get(key) {
                    Some(nested @ Value::Object(_)) => candidates.push(nested),
                    Some(Value::Array(items)) => {
                        candidates.extend(items.iter().filter(|item| item.is_object()))
                    }
                    _ => {}
                }
            }
        }
        Value::Array(items) => candidates.extend(items.iter().filter(|item| item.is_object())),
        _ => {}
    }

    candidates
        .into_iter()
        .filter_map(ImageRef::from_record)
        .find(|image| image.id == expected_id)
}
