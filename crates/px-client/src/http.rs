//! GET requests against the price service's routes.

use px_core::PxError;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::ClientConfig;

/// Shared HTTP client bound to one exchange of the service.
#[derive(Clone)]
pub struct ServiceHttp {
    http: reqwest::Client,
    host: String,
    exchange: String,
}

impl ServiceHttp {
    pub fn new(config: &ClientConfig) -> Result<Self, PxError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| PxError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            host: config.host.clone(),
            exchange: config.exchange.to_lowercase(),
        })
    }

    /// `ws://` address of the price stream of `symbol`.
    pub fn stream_url(&self, symbol: &str) -> String {
        format!("ws://{}/{}/priceStream/{symbol}", self.host, self.exchange)
    }

    /// GET `/{exchange}/{route}/{symbol}` and return the body.
    ///
    /// A 404 is [`PxError::SymbolNotFound`], any other non-200 status is
    /// [`PxError::Exchange`], and transport failures are [`PxError::Upstream`].
    pub async fn get_bytes(
        &self,
        route: &str,
        symbol: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<u8>, PxError> {
        let url = format!("http://{}/{}/{route}/{symbol}", self.host, self.exchange);
        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| PxError::Upstream(format!("GET {route}/{symbol}: {e}")))?;

        match resp.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(PxError::SymbolNotFound(symbol.to_string())),
            status => {
                debug!("[client] GET {url} -> {status}");
                return Err(PxError::Exchange(format!("GET {route}/{symbol}: HTTP {status}")));
            }
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| PxError::Upstream(format!("GET {route}/{symbol} body: {e}")))?;
        Ok(body.to_vec())
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        route: &str,
        symbol: &str,
    ) -> Result<T, PxError> {
        let body = self.get_bytes(route, symbol, &[]).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}
