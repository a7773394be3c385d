//! HTTP implementations of the collaborator boundaries.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use service_core::observability::TracedClientExt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::RatingError;
use crate::models::{Invoice, PeriodUsage, Subscription, ThresholdCrossing, UsageThreshold};
use crate::services::collaborators::{
    InvoiceCreationError, InvoiceCreator, UsageAggregator, UsageThresholdNotifier,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Usage aggregation service client.
pub struct HttpUsageAggregator {
    base_url: String,
    client: Client,
}

impl HttpUsageAggregator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl UsageAggregator for HttpUsageAggregator {
    async fn compute_current_usage(
        &self,
        subscription: &Subscription,
        as_of: DateTime<Utc>,
    ) -> Result<PeriodUsage, RatingError> {
        let url = format!(
            "{}/v1/subscriptions/{}/current_usage",
            self.base_url, subscription.subscription_id
        );

        let response = self
            .client
            .traced_get(&url)
            .query(&[("as_of", as_of.to_rfc3339())])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                RatingError::Collaborator(anyhow!("Failed to reach usage aggregation: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RatingError::Collaborator(anyhow!(
                "Usage aggregation returned error status {}: {}",
                status,
                body
            )));
        }

        response.json::<PeriodUsage>().await.map_err(|e| {
            RatingError::Collaborator(anyhow!("Failed to parse current usage: {}", e))
        })
    }
}

#[derive(Debug, Serialize)]
struct ProgressiveInvoiceRequest<'a> {
    subscription_id: Uuid,
    crossings: Vec<CrossingPayload<'a>>,
}

#[derive(Debug, Serialize)]
struct CrossingPayload<'a> {
    usage_threshold_id: Uuid,
    threshold_display_name: Option<&'a str>,
    amount_cents: i64,
    recurring: bool,
    target_amount_cents: i64,
}

#[derive(Debug, Deserialize)]
struct InvoicingErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    invoice_id: Option<Uuid>,
}

/// Invoicing service client.
pub struct HttpInvoiceCreator {
    base_url: String,
    client: Client,
}

impl HttpInvoiceCreator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl InvoiceCreator for HttpInvoiceCreator {
    async fn create_progressive_invoice(
        &self,
        subscription: &Subscription,
        crossings: &[ThresholdCrossing],
    ) -> Result<Invoice, InvoiceCreationError> {
        let url = format!(
            "{}/v1/subscriptions/{}/progressive_invoices",
            self.base_url, subscription.subscription_id
        );
        let request = ProgressiveInvoiceRequest {
            subscription_id: subscription.subscription_id,
            crossings: crossings
                .iter()
                .map(|c| CrossingPayload {
                    usage_threshold_id: c.usage_threshold.usage_threshold_id,
                    threshold_display_name: c.usage_threshold.threshold_display_name.as_deref(),
                    amount_cents: c.usage_threshold.amount_cents,
                    recurring: c.usage_threshold.recurring,
                    target_amount_cents: c.target_amount_cents,
                })
                .collect(),
        };

        let response = self
            .client
            .traced_post(&url)
            .json(&request)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to reach invoicing: {}", e))?;

        let status = response.status();
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_unprocessable(&body));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Invoicing returned error status {}: {}", status, body).into());
        }

        response
            .json::<Invoice>()
            .await
            .map_err(|e| anyhow!("Failed to parse invoice: {}", e).into())
    }
}

/// A 422 carrying `code = "tax_error"` is the retriable tax failure; any
/// other validation failure is fatal.
fn classify_unprocessable(body: &str) -> InvoiceCreationError {
    match serde_json::from_str::<InvoicingErrorBody>(body) {
        Ok(InvoicingErrorBody {
            code: Some(code),
            message,
            invoice_id,
        }) if code == "tax_error" => InvoiceCreationError::Tax {
            invoice_id,
            message: message.unwrap_or_else(|| "tax computation failed".to_string()),
        },
        _ => InvoiceCreationError::Other(anyhow!("Invoicing rejected the request: {}", body)),
    }
}

#[derive(Debug, Serialize)]
struct ThresholdReachedEvent<'a> {
    event_type: &'static str,
    subscription_id: Uuid,
    external_subscription_id: &'a str,
    usage_threshold_id: Uuid,
    amount_cents: i64,
    recurring: bool,
    invoice_id: Uuid,
}

/// Notification service client.
pub struct HttpThresholdNotifier {
    base_url: String,
    client: Client,
}

impl HttpThresholdNotifier {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl UsageThresholdNotifier for HttpThresholdNotifier {
    async fn usage_threshold_reached(
        &self,
        subscription: &Subscription,
        threshold: &UsageThreshold,
        invoice_id: Uuid,
    ) -> Result<(), RatingError> {
        let url = format!("{}/v1/events", self.base_url);
        let event = ThresholdReachedEvent {
            event_type: "usage_threshold_reached",
            subscription_id: subscription.subscription_id,
            external_subscription_id: &subscription.external_id,
            usage_threshold_id: threshold.usage_threshold_id,
            amount_cents: threshold.amount_cents,
            recurring: threshold.recurring,
            invoice_id,
        };

        let response = self
            .client
            .traced_post(&url)
            .json(&event)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| RatingError::Collaborator(anyhow!("Failed to reach notification: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(RatingError::Collaborator(anyhow!(
                "Notification returned error status {}",
                status
            )));
        }

        tracing::info!(
            subscription_id = %subscription.subscription_id,
            usage_threshold_id = %threshold.usage_threshold_id,
            "Usage threshold notification sent"
        );

        Ok(())
    }
}
