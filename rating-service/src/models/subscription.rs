//! Subscription read model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Terminated,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Terminated => "terminated",
            SubscriptionStatus::Canceled => "canceled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "active" => SubscriptionStatus::Active,
            "terminated" => SubscriptionStatus::Terminated,
            "canceled" => SubscriptionStatus::Canceled,
            _ => SubscriptionStatus::Pending,
        }
    }
}

/// Subscription.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub external_id: String,
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    pub status: String,
    pub subscription_at: DateTime<Utc>,
    pub currency: String,
    /// IANA timezone of the customer.
    pub timezone: String,
    /// Applicable tax rate, in percent.
    pub tax_rate: Decimal,
}

impl Subscription {
    pub fn parsed_status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_string(&self.status)
    }

    pub fn is_active(&self) -> bool {
        self.parsed_status() == SubscriptionStatus::Active
    }

    /// Renewals and plan changes keep the external id and subscription date.
    pub fn lineage(&self) -> SubscriptionLineage {
        SubscriptionLineage {
            external_id: self.external_id.clone(),
            subscription_at: self.subscription_at,
        }
    }
}

/// Identity shared by every subscription in a renewal chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionLineage {
    pub external_id: String,
    pub subscription_at: DateTime<Utc>,
}
