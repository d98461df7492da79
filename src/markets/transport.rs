// src/markets/transport.rs
//! HTTP seam for the market adapters.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use super::fixtures;
use super::Platform;
use crate::error::FetchError;

const USER_AGENT: &str = "bet-scraper/0.1 (+market recommendations)";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("HTTP {0}")]
    Status(u16),
    #[error("{0}")]
    Io(String),
    #[error("invalid JSON: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn into_fetch(self, platform: Platform) -> FetchError {
        match self {
            TransportError::Status(s) => FetchError::status(platform.name(), s),
            TransportError::Io(m) => FetchError::transport(platform.name(), m),
            TransportError::Decode(m) => FetchError::parse(platform.name(), m),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_json(
        &self,
        url: &str,
        query: &[(String, String)],
        bearer: Option<&str>,
    ) -> Result<Value, TransportError>;

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, TransportError>;
}

pub type SharedTransport = Arc<dyn Transport>;

/// Live transport over `reqwest`.
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_timeouts(Duration::from_secs(4), Duration::from_secs(10))
    }

    pub fn with_timeouts(connect: Duration, request: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(connect)
            .timeout(request)
            .build()?;
        Ok(Self { http })
    }

    async fn read(resp: reqwest::Response) -> Result<Value, TransportError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_json(
        &self,
        url: &str,
        query: &[(String, String)],
        bearer: Option<&str>,
    ) -> Result<Value, TransportError> {
        let mut req = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(query);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Self::read(resp).await
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, TransportError> {
        let resp = self
            .http
            .post(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Self::read(resp).await
    }
}

/// Offline transport serving the built-in sample listings in each vendor's
/// raw shape. Routes on the path suffix only, so any base URL works.
#[derive(Debug, Clone, Copy)]
pub struct FixtureTransport {
    platform: Platform,
}

impl FixtureTransport {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    fn raw_markets(&self) -> Vec<Value> {
        match self.platform {
            Platform::Polymarket => fixtures::polymarket_raw(),
            Platform::Kalshi => fixtures::kalshi_raw(),
        }
    }

    fn find(&self, id: &str) -> Option<Value> {
        self.raw_markets().into_iter().find(|m| {
            ["id", "ticker", "slug"]
                .iter()
                .any(|k| m.get(*k).and_then(Value::as_str) == Some(id))
        })
    }
}

#[async_trait]
impl Transport for FixtureTransport {
    async fn get_json(
        &self,
        url: &str,
        _query: &[(String, String)],
        _bearer: Option<&str>,
    ) -> Result<Value, TransportError> {
        let path = url.split('?').next().unwrap_or(url).trim_end_matches('/');
        let tail: Vec<&str> = path.rsplit('/').take(3).collect();

        match (self.platform, tail.as_slice()) {
            (Platform::Polymarket, ["markets", ..]) => Ok(Value::Array(self.raw_markets())),
            (Platform::Kalshi, ["markets", ..]) => {
                Ok(serde_json::json!({ "markets": self.raw_markets() }))
            }
            (Platform::Kalshi, ["orderbook", _ticker, "markets"]) => {
                Ok(serde_json::json!({ "orderbook": { "yes": [], "no": [] } }))
            }
            (Platform::Polymarket, [id, "markets", ..]) => {
                self.find(id).ok_or(TransportError::Status(404))
            }
            (Platform::Kalshi, [ticker, "markets", ..]) => self
                .find(ticker)
                .map(|m| serde_json::json!({ "market": m }))
                .ok_or(TransportError::Status(404)),
            _ => Err(TransportError::Status(404)),
        }
    }

    async fn post_json(&self, url: &str, _body: &Value) -> Result<Value, TransportError> {
        if url.ends_with("/login") {
            return Ok(serde_json::json!({ "token": "fixture-token" }));
        }
        Err(TransportError::Status(404))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixture_routes_by_path() {
        let k = FixtureTransport::new(Platform::Kalshi);
        let list = k
            .get_json("http://x/trade-api/v2/markets", &[], None)
            .await
            .unwrap();
        assert_eq!(list["markets"].as_array().map(Vec::len), Some(3));

        let one = k
            .get_json("http://x/trade-api/v2/markets/FED-DEC24", &[], None)
            .await
            .unwrap();
        assert_eq!(one["market"]["ticker"], "FED-DEC24");

        let missing = k.get_json("http://x/markets/NOPE", &[], None).await;
        assert_eq!(missing, Err(TransportError::Status(404)));

        let p = FixtureTransport::new(Platform::Polymarket);
        let arr = p.get_json("http://x/markets", &[], None).await.unwrap();
        assert!(arr.is_array());
    }

    #[test]
    fn transport_errors_map_to_fetch_errors() {
        let e = TransportError::Status(503).into_fetch(Platform::Kalshi);
        assert_eq!(e.http_status(), Some(503));
        let e = TransportError::Decode("eof".into()).into_fetch(Platform::Polymarket);
        assert!(matches!(e, FetchError::Parse { .. }));
    }
}
