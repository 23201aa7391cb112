//! JSON client for the broker gateway service.

use super::{BrokerAdapter, BrokerError, BrokerFill, BrokerHolding, OrderAck, OrderRequest, UnfilledOrder};
use crate::domain::TimeMs;
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

/// Broker adapter speaking to the gateway over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBroker {
    client: Client,
    base_url: String,
}

impl HttpBroker {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn backoff() -> ExponentialBackoff {
        ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        }
    }

    /// GET with retry: 429 and 5xx are transient, other failures permanent.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, BrokerError> {
        retry(Self::backoff(), || async {
            let response = self.client.get(url).send().await.map_err(|e| {
                backoff::Error::transient(BrokerError::NetworkError(e.to_string()))
            })?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(BrokerError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(BrokerError::HttpError {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(BrokerError::HttpError {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<T>()
                .await
                .map_err(|e| backoff::Error::permanent(BrokerError::ParseError(e.to_string())))
        })
        .await
    }
}

#[async_trait]
impl BrokerAdapter for HttpBroker {
    /// Only connection failures are retried: once the request may have
    /// reached the gateway a retry could place a second order.
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, BrokerError> {
        let url = self.url("/orders");
        debug!(
            symbol = %request.symbol,
            qty = request.qty,
            client_ref = %request.client_ref,
            "Submitting order"
        );

        let response = retry(Self::backoff(), || async {
            self.client.post(&url).json(request).send().await.map_err(|e| {
                if e.is_connect() {
                    backoff::Error::transient(BrokerError::NetworkError(e.to_string()))
                } else {
                    backoff::Error::permanent(BrokerError::NetworkError(e.to_string()))
                }
            })
        })
        .await?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::Rejected(format!("{}: {}", status.as_u16(), body)));
        }
        if !status.is_success() {
            return Err(BrokerError::HttpError {
                status: status.as_u16(),
                message: "Order submission failed".to_string(),
            });
        }

        response
            .json::<OrderAck>()
            .await
            .map_err(|e| BrokerError::ParseError(format!("Invalid order ack: {}", e)))
    }

    async fn get_unfilled_orders(&self, account_id: &str) -> Result<Vec<UnfilledOrder>, BrokerError> {
        self.get_json(&self.url(&format!("/accounts/{}/unfilled-orders", account_id)))
            .await
    }

    async fn get_fills(&self, account_id: &str, since: TimeMs) -> Result<Vec<BrokerFill>, BrokerError> {
        let raw: Vec<serde_json::Value> = self
            .get_json(&self.url(&format!(
                "/accounts/{}/fills?since={}",
                account_id,
                since.as_i64()
            )))
            .await?;
        parse_all(raw, "fill")
    }

    async fn get_fills_for_order(&self, order_id: &str) -> Result<Vec<BrokerFill>, BrokerError> {
        let raw: Vec<serde_json::Value> = self
            .get_json(&self.url(&format!("/orders/{}/fills", order_id)))
            .await?;
        parse_all(raw, "fill")
    }

    async fn get_holdings(&self, account_id: &str) -> Result<Vec<BrokerHolding>, BrokerError> {
        let raw: Vec<serde_json::Value> = self
            .get_json(&self.url(&format!("/accounts/{}/holdings", account_id)))
            .await?;
        parse_all(raw, "holding")
    }
}

/// Decode every element or fail the whole response. Callers diff these
/// lists against local state, so a dropped record would read as a missing
/// holding or a lost execution.
fn parse_all<T: DeserializeOwned>(raw: Vec<serde_json::Value>, kind: &str) -> Result<Vec<T>, BrokerError> {
    raw.into_iter()
        .enumerate()
        .map(|(index, value)| {
            serde_json::from_value::<T>(value).map_err(|e| {
                warn!(kind = kind, index = index, error = %e, "Failed to parse broker record");
                BrokerError::ParseError(format!("{} #{}: {}", kind, index, e))
            })
        })
        .collect()
}
