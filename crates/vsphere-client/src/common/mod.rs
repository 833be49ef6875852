//! Common utilities for the vSphere API client
//!
//! Shared HTTP plumbing for the Automation REST API and VI/JSON. Both
//! surfaces authenticate with the same `vmware-api-session-id` header.

use crate::error::VSphereError;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// Header carrying the vCenter session token
pub const SESSION_HEADER: &str = "vmware-api-session-id";

/// HTTP client wrapper bound to one vCenter endpoint
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Create a REST session with basic auth (POST /api/session)
    pub async fn create_session(&self, username: &str, password: &str) -> Result<String, VSphereError> {
        let url = self.build_url("/api/session");
        debug!("POST {}", url);

        let response = self.client
            .post(&url)
            .basic_auth(username, Some(password))
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(VSphereError::Authentication(format!(
                "vCenter rejected credentials for {}",
                username
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VSphereError::Api(format!("Login failed: {} - {}", status, body)));
        }

        // The session id is returned as a bare JSON string
        let token: String = response.json().await?;
        Ok(token)
    }

    /// Delete a REST session (DELETE /api/session)
    pub async fn delete_session(&self, token: &str) -> Result<(), VSphereError> {
        self.delete(token, "/api/session").await
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, token: &str, path: &str) -> Result<T, VSphereError> {
        let url = self.build_url(path);
        debug!("GET {}", url);

        let response = self.client
            .get(&url)
            .header(SESSION_HEADER, token)
            .header("Accept", "application/json")
            .send()
            .await?;

        let response = check_status("GET", path, response).await?;
        parse_body(response).await
    }

    /// Make a GET request where 404 means absent
    pub async fn get_optional<T: DeserializeOwned>(&self, token: &str, path: &str) -> Result<Option<T>, VSphereError> {
        match self.get(token, path).await {
            Ok(value) => Ok(Some(value)),
            Err(VSphereError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Make a POST request
    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
        body: &B,
    ) -> Result<T, VSphereError> {
        let url = self.build_url(path);
        debug!("POST {}", url);

        let response = self.client
            .post(&url)
            .header(SESSION_HEADER, token)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;

        let response = check_status("POST", path, response).await?;
        parse_body(response).await
    }

    /// Make a POST request whose response carries no body
    pub async fn post_no_content<B: Serialize + ?Sized>(
        &self,
        token: &str,
        path: &str,
        body: &B,
    ) -> Result<(), VSphereError> {
        let url = self.build_url(path);
        debug!("POST {}", url);

        let response = self.client
            .post(&url)
            .header(SESSION_HEADER, token)
            .json(body)
            .send()
            .await?;

        check_status("POST", path, response).await?;
        Ok(())
    }

    /// Make a DELETE request
    pub async fn delete(&self, token: &str, path: &str) -> Result<(), VSphereError> {
        let url = self.build_url(path);
        debug!("DELETE {}", url);

        let response = self.client
            .delete(&url)
            .header(SESSION_HEADER, token)
            .send()
            .await?;

        check_status("DELETE", path, response).await?;
        Ok(())
    }

    /// Build query string from filters
    pub fn build_query_string(&self, filters: &[(&str, &str)]) -> String {
        filters
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Map non-success statuses onto client errors
async fn check_status(method: &str, path: &str, response: Response) -> Result<Response, VSphereError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(VSphereError::Authentication(format!(
            "{} {}: {} - {}",
            method, path, status, body
        ))),
        StatusCode::NOT_FOUND => Err(VSphereError::NotFound {
            kind: crate::models::ObjectKind::from_path(path),
            name: path.to_string(),
        }),
        _ => Err(VSphereError::Api(format!("{} {} failed: {} - {}", method, path, status, body))),
    }
}

/// Decode a JSON body, treating an empty body as JSON null
async fn parse_body<T: DeserializeOwned>(response: Response) -> Result<T, VSphereError> {
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(serde_json::from_str("null")?);
    }
    serde_json::from_str(&text).map_err(|e| {
        VSphereError::Api(format!(
            "error decoding response body: {} - Response (first 500 chars): {}",
            e,
            text.chars().take(500).collect::<String>()
        ))
    })
}
