use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use feedline::FeedlineConfig;
use feedline_api::{ApiError, ItemId, Page, Result};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::models::{LoginRequest, LoginResponse, TokenResponse, TwoFactorRequest};

/// Longest response body kept in an error message
const MAX_ERROR_BODY: usize = 500;

pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            token: RwLock::new(None),
        })
    }

    pub fn from_config(config: &FeedlineConfig) -> Result<Self> {
        Self::new(config.api.base_url.clone(), config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Bearer token sent with every request, `None` to sign out.
    pub fn set_token(&self, token: Option<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    pub fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json");
        match self.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send `request` and return the body of a successful response.
    async fn send(&self, request: RequestBuilder, url: &str, operation: &str) -> Result<String> {
        let response = request.send().await.map_err(|e| {
            let err = format_reqwest_error(e, url, operation);
            debug!("[ApiClient] {}", err);
            err
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format_reqwest_error(e, url, "read response body"))?;

        if !status.is_success() {
            return Err(error_for_status(status, url, &body));
        }
        Ok(body)
    }

    async fn send_json<R: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        url: &str,
        operation: &str,
    ) -> Result<R> {
        let body = self.send(request, url, operation).await?;
        serde_json::from_str(&body).map_err(|e| ApiError::Decode {
            message: format!(
                "Failed to {} for {}: unexpected response format: {} - Response: {}",
                operation,
                url,
                e,
                truncate(&body, 200)
            ),
        })
    }

    /// `GET /<path>?page=N`
    pub async fn fetch_page<T: DeserializeOwned>(&self, path: &str, page: u32) -> Result<Page<T>> {
        let url = self.url(path);
        debug!("[ApiClient] Fetching {} page {}", url, page);
        let request = self.request(Method::GET, &url).query(&[("page", page)]);
        self.send_json(request, &url, "fetch page").await
    }

    /// `POST /<path>/:id/like`
    pub async fn like(&self, path: &str, id: &ItemId) -> Result<()> {
        let url = self.url(&format!("{}/{}/like", path.trim_end_matches('/'), id));
        self.send(self.request(Method::POST, &url), &url, "like")
            .await
            .map(drop)
    }

    /// `DELETE /<path>/:id/like`
    pub async fn unlike(&self, path: &str, id: &ItemId) -> Result<()> {
        let url = self.url(&format!("{}/{}/like", path.trim_end_matches('/'), id));
        self.send(self.request(Method::DELETE, &url), &url, "unlike")
            .await
            .map(drop)
    }

    /// `DELETE /<path>/:id`
    pub async fn delete(&self, path: &str, id: &ItemId) -> Result<()> {
        let url = self.url(&format!("{}/{}", path.trim_end_matches('/'), id));
        self.send(self.request(Method::DELETE, &url), &url, "delete")
            .await
            .map(drop)
    }

    /// `POST /login`. Does not store the returned token.
    pub async fn login(&self, credentials: &LoginRequest) -> Result<LoginResponse> {
        let url = self.url("login");
        info!("[ApiClient] Logging in as {}", credentials.email);
        let request = self.request(Method::POST, &url).json(credentials);
        self.send_json(request, &url, "log in").await
    }

    /// `POST /two-factor/verify`
    pub async fn verify_two_factor(&self, verification: &TwoFactorRequest) -> Result<TokenResponse> {
        let url = self.url("two-factor/verify");
        let request = self.request(Method::POST, &url).json(verification);
        self.send_json(request, &url, "verify two-factor code").await
    }

    /// `POST /logout`
    pub async fn logout(&self) -> Result<()> {
        let url = self.url("logout");
        self.send(self.request(Method::POST, &url), &url, "log out")
            .await
            .map(drop)
    }
}

/// Map a transport failure to an `ApiError` with a hint about the likely cause.
fn format_reqwest_error(e: reqwest::Error, url: &str, operation: &str) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout {
            message: format!(
                "Failed to {} for {}: request took too long (check network or increase api.timeout_secs)",
                operation, url
            ),
        }
    } else if e.is_connect() {
        ApiError::network(format!(
            "Failed to {} for {}: connection error - check network connectivity and DNS resolution. Error: {}",
            operation, url, e
        ))
    } else if e.is_decode() {
        ApiError::Decode {
            message: format!(
                "Failed to {} for {}: unexpected response format. Error: {}",
                operation, url, e
            ),
        }
    } else if e.is_builder() {
        ApiError::InvalidOperation {
            message: format!(
                "Failed to {} for {}: invalid URL or request parameters. Error: {}",
                operation, url, e
            ),
        }
    } else {
        ApiError::network(format!("Failed to {} for {}: {:?}", operation, url, e))
    }
}

fn error_for_status(status: StatusCode, url: &str, body: &str) -> ApiError {
    if status == StatusCode::UNAUTHORIZED {
        return ApiError::Unauthorized {
            message: format!("{} rejected the credentials", url),
        };
    }
    ApiError::Http {
        status: status.as_u16(),
        body: truncate(body, MAX_ERROR_BODY),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}... (truncated)", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}
