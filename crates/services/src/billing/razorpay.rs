use super::ports::{
    BillingProviderGateway, ProviderSubscription, ProviderSubscriptionItem, RefundSpeed,
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

/// Bound on any single provider call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport-level failures (connect/timeout) are retried with backoff;
/// HTTP-level errors are not, since the request may have been processed.
const MAX_RETRIES: u32 = 2;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Razorpay REST API adapter. Authenticates with basic auth and speaks the
/// subscriptions/payments endpoints the workflow needs.
pub struct RazorpayGateway {
    http: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

#[derive(Debug, Deserialize)]
struct SubscriptionResponse {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct ListSubscriptionsResponse {
    items: Vec<SubscriptionItemResponse>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItemResponse {
    id: String,
    plan_id: String,
    status: String,
    start_at: Option<i64>,
}

fn notify_flag(customer_notify: bool) -> u8 {
    if customer_notify {
        1
    } else {
        0
    }
}

fn start_at_to_datetime(start_at: Option<i64>) -> Option<DateTime<Utc>> {
    start_at.and_then(|secs| DateTime::from_timestamp(secs, 0))
}

async fn into_api_result(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    anyhow::bail!("Razorpay API returned {}: {}", status, body)
}

impl RazorpayGateway {
    pub fn new(key_id: String, key_secret: String, base_url: String) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build Razorpay HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            key_id,
            key_secret,
        })
    }

    async fn send_with_retry<F>(&self, make_request: F) -> anyhow::Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            match make_request().send().await {
                Ok(response) => return Ok(response),
                Err(err) if attempt < MAX_RETRIES && (err.is_connect() || err.is_timeout()) => {
                    attempt += 1;
                    let backoff = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        error = ?err,
                        "Razorpay request failed, retrying in {:?} (attempt {}/{})",
                        backoff,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

#[async_trait]
impl BillingProviderGateway for RazorpayGateway {
    async fn create_subscription(
        &self,
        plan_id: &str,
        total_count: u32,
        customer_notify: bool,
    ) -> anyhow::Result<ProviderSubscription> {
        let url = format!("{}/subscriptions", self.base_url);
        let body = serde_json::json!({
            "plan_id": plan_id,
            "total_count": total_count,
            "customer_notify": notify_flag(customer_notify),
        });

        let response = self
            .send_with_retry(|| {
                self.http
                    .post(&url)
                    .basic_auth(&self.key_id, Some(&self.key_secret))
                    .json(&body)
            })
            .await?;
        let response = into_api_result(response).await?;

        let subscription: SubscriptionResponse = response
            .json()
            .await
            .context("Failed to parse Razorpay subscription response")?;
        let status = subscription
            .status
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;

        Ok(ProviderSubscription {
            id: subscription.id,
            status,
        })
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> anyhow::Result<ProviderSubscription> {
        let url = format!("{}/subscriptions/{}/cancel", self.base_url, subscription_id);

        let response = self
            .send_with_retry(|| {
                self.http
                    .post(&url)
                    .basic_auth(&self.key_id, Some(&self.key_secret))
                    .json(&serde_json::json!({}))
            })
            .await?;
        let response = into_api_result(response).await?;

        let subscription: SubscriptionResponse = response
            .json()
            .await
            .context("Failed to parse Razorpay cancellation response")?;
        let status = subscription
            .status
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;

        Ok(ProviderSubscription {
            id: subscription.id,
            status,
        })
    }

    async fn refund_payment(&self, payment_id: &str, speed: RefundSpeed) -> anyhow::Result<()> {
        let url = format!("{}/payments/{}/refund", self.base_url, payment_id);
        let body = serde_json::json!({ "speed": speed.as_str() });

        let response = self
            .send_with_retry(|| {
                self.http
                    .post(&url)
                    .basic_auth(&self.key_id, Some(&self.key_secret))
                    .json(&body)
            })
            .await?;
        into_api_result(response).await?;

        Ok(())
    }

    async fn list_subscriptions(
        &self,
        count: u32,
        skip: u32,
    ) -> anyhow::Result<Vec<ProviderSubscriptionItem>> {
        let url = format!("{}/subscriptions", self.base_url);

        let response = self
            .send_with_retry(|| {
                self.http
                    .get(&url)
                    .basic_auth(&self.key_id, Some(&self.key_secret))
                    .query(&[("count", count), ("skip", skip)])
            })
            .await?;
        let response = into_api_result(response).await?;

        let list: ListSubscriptionsResponse = response
            .json()
            .await
            .context("Failed to parse Razorpay subscription list")?;

        Ok(list
            .items
            .into_iter()
            .map(|item| ProviderSubscriptionItem {
                id: item.id,
                plan_id: item.plan_id,
                status: item.status,
                start_at: start_at_to_datetime(item.start_at),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_notify_flag() {
        assert_eq!(notify_flag(true), 1);
        assert_eq!(notify_flag(false), 0);
    }

    #[test]
    fn test_start_at_conversion() {
        assert_eq!(start_at_to_datetime(None), None);
        let dt = start_at_to_datetime(Some(1_700_000_000)).unwrap();
        assert_eq!(dt.year(), 2023);
        assert_eq!(dt.month(), 11);
    }
}
