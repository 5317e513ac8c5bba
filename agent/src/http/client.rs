//! HTTP client implementation

use std::time::Duration;

use reqwest::{header, Client, Method, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::errors::AgentError;
use crate::utils::version_info;

/// Request timeout applied to every call
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client bound to one controller endpoint
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: SecretString,
}

impl HttpClient {
    /// Create a client for `base_url`, authenticating with a target token
    pub fn new(base_url: &str, token: SecretString) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(version_info().user_agent())
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);

        self.client.request(method, &url).header(
            header::AUTHORIZATION,
            format!("TargetToken {}", self.token.expose_secret()),
        )
    }

    async fn check(method: &str, response: Response) -> Result<Response, AgentError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        error!("HTTP {} failed: {} - {}", method, status, body);
        Err(AgentError::ServerError {
            status: status.as_u16(),
            body,
        })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, AgentError> {
        let response = self
            .request(Method::GET, path)
            .header(header::ACCEPT, "application/hal+json")
            .send()
            .await?;
        let body = Self::check("GET", response).await?.json().await?;
        Ok(body)
    }

    /// Make a POST request, ignoring the response body
    pub async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<(), AgentError> {
        let response = self.request(Method::POST, path).json(body).send().await?;
        Self::check("POST", response).await?;
        Ok(())
    }

    /// Make a PUT request, ignoring the response body
    pub async fn put<B: Serialize>(&self, path: &str, body: &B) -> Result<(), AgentError> {
        let response = self.request(Method::PUT, path).json(body).send().await?;
        Self::check("PUT", response).await?;
        Ok(())
    }
}
