use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::models::product::{ProductData, ProductKey};

/// Where fresh product data comes from.
///
/// Keys the source does not know are simply absent from the result.
#[async_trait]
pub trait ProductSource: Send + Sync {
    async fn fetch(&self, keys: &[ProductKey]) -> Result<HashMap<ProductKey, ProductData>, FetchError>;
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Product API returned status {0}")]
    Status(u16),

    #[error("Product API is throttling requests (retry after {retry_after:?}s)")]
    Throttled { retry_after: Option<u64> },

    #[error("Failed to decode product data: {0}")]
    Decode(String),
}

impl FetchError {
    /// The source cannot take more work right now; stop processing.
    pub fn is_suspend(&self) -> bool {
        matches!(self, FetchError::Throttled { .. })
    }
}

#[derive(Deserialize)]
struct ProductsResponse {
    products: HashMap<String, ProductData>,
}

/// Client for the JSON product data API:
/// `GET {base_url}/products?keys=K1,K2` → `{"products": {"K1": {...}}}`.
pub struct HttpProductSource {
    http: Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpProductSource {
    pub fn new(base_url: &str, api_token: Option<String>, timeout: Duration) -> Result<Self, FetchError> {
        let http = Client::builder()
            .user_agent(concat!("product-renewal/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }
}

/// Map a non-success HTTP status to the matching fetch error.
fn status_error(status: StatusCode, retry_after: Option<u64>) -> FetchError {
    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            FetchError::Throttled { retry_after }
        }
        other => FetchError::Status(other.as_u16()),
    }
}

#[async_trait]
impl ProductSource for HttpProductSource {
    async fn fetch(&self, keys: &[ProductKey]) -> Result<HashMap<ProductKey, ProductData>, FetchError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let joined = keys.iter().map(ProductKey::as_str).collect::<Vec<_>>().join(",");
        let mut request = self
            .http
            .get(format!("{}/products", self.base_url))
            .query(&[("keys", joined)]);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            tracing::warn!(status = status.as_u16(), retry_after, "Product API request rejected");
            return Err(status_error(status, retry_after));
        }

        let body: ProductsResponse = response.json().await?;

        let mut products = HashMap::with_capacity(body.products.len());
        for (raw, data) in body.products {
            let key = ProductKey::parse(&raw).map_err(|e| FetchError::Decode(e.to_string()))?;
            products.insert(key, data);
        }
        Ok(products)
    }
}
