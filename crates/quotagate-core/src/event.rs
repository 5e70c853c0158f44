//! Billing lifecycle events.
//!
//! The payment processor notifies the application of subscription lifecycle
//! changes; the (out-of-scope) receiver verifies authenticity and hands each
//! notification to the reconciler as a `BillingEvent`. This module defines
//! the event shapes and the translation from raw processor payloads.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::entitlement::{Plan, PlanStatus};
use crate::TenantId;

/// A billing lifecycle event consumed by the reconciler.
///
/// Events other than checkout are keyed by the processor's own identifiers
/// (customer / subscription references), because that is how notifications
/// arrive. Checkout carries the tenant id directly: it is the moment the
/// external references are first learned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BillingEvent {
    /// A new paid plan was activated through checkout.
    CheckoutCompleted {
        /// The tenant that completed checkout (the processor's client
        /// reference).
        tenant_id: TenantId,
        /// The plan that was purchased.
        plan: Plan,
        /// Processor customer reference to record.
        customer_ref: String,
        /// Processor subscription reference to record.
        subscription_ref: String,
    },

    /// The subscription changed plan, status, or period mid-cycle.
    SubscriptionUpdated {
        /// Processor subscription reference identifying the tenant.
        subscription_ref: String,
        /// The plan after the change.
        plan: Plan,
        /// The status after the change.
        status: PlanStatus,
        /// The new period boundary, if the processor reported one.
        current_period_end: Option<DateTime<Utc>>,
    },

    /// The subscription was canceled.
    SubscriptionCanceled {
        /// Processor subscription reference identifying the tenant.
        subscription_ref: String,
    },

    /// An invoice was paid as a billing-cycle renewal.
    RenewalPaid {
        /// Processor customer reference identifying the tenant.
        customer_ref: String,
    },

    /// An invoice payment failed.
    PaymentFailed {
        /// Processor customer reference identifying the tenant.
        customer_ref: String,
    },
}

impl BillingEvent {
    /// Translate a raw processor notification into a `BillingEvent`.
    ///
    /// `event_type` is the processor's event-type string and `object` the
    /// event's data object. Returns `Ok(None)` for event types this engine
    /// does not consume, for unpaid checkout sessions, and for invoices that
    /// are not cycle renewals (a creation invoice is already covered by
    /// checkout).
    ///
    /// # Errors
    ///
    /// Returns an error when a handled event type is missing a required
    /// field or carries an unknown plan or status code.
    pub fn from_processor(
        event_type: &str,
        object: &serde_json::Value,
    ) -> Result<Option<Self>, EventError> {
        match event_type {
            "checkout.session.completed" => {
                let payment_status = str_field(object, "payment_status").unwrap_or("unknown");
                if payment_status != "paid" {
                    return Ok(None);
                }

                let tenant_id = require_str(object, "client_reference_id")?
                    .parse()
                    .map_err(|_| EventError::InvalidTenantRef)?;
                let plan = object
                    .get("metadata")
                    .and_then(|m| m.get("plan"))
                    .and_then(serde_json::Value::as_str)
                    .ok_or(EventError::MissingField("metadata.plan"))?
                    .parse()
                    .map_err(EventError::UnknownPlan)?;

                Ok(Some(Self::CheckoutCompleted {
                    tenant_id,
                    plan,
                    customer_ref: require_str(object, "customer")?.to_string(),
                    subscription_ref: require_str(object, "subscription")?.to_string(),
                }))
            }

            "customer.subscription.updated" => {
                let plan = object
                    .get("metadata")
                    .and_then(|m| m.get("plan"))
                    .and_then(serde_json::Value::as_str)
                    .ok_or(EventError::MissingField("metadata.plan"))?
                    .parse()
                    .map_err(EventError::UnknownPlan)?;
                let status = require_str(object, "status")?
                    .parse()
                    .map_err(EventError::UnknownStatus)?;
                let current_period_end = object
                    .get("current_period_end")
                    .and_then(serde_json::Value::as_i64)
                    .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

                Ok(Some(Self::SubscriptionUpdated {
                    subscription_ref: require_str(object, "id")?.to_string(),
                    plan,
                    status,
                    current_period_end,
                }))
            }

            "customer.subscription.deleted" => Ok(Some(Self::SubscriptionCanceled {
                subscription_ref: require_str(object, "id")?.to_string(),
            })),

            "invoice.paid" => {
                let billing_reason = str_field(object, "billing_reason").unwrap_or("unknown");
                if billing_reason != "subscription_cycle" {
                    return Ok(None);
                }

                Ok(Some(Self::RenewalPaid {
                    customer_ref: require_str(object, "customer")?.to_string(),
                }))
            }

            "invoice.payment_failed" => Ok(Some(Self::PaymentFailed {
                customer_ref: require_str(object, "customer")?.to_string(),
            })),

            _ => Ok(None),
        }
    }
}

fn str_field<'a>(object: &'a serde_json::Value, field: &str) -> Option<&'a str> {
    object.get(field).and_then(serde_json::Value::as_str)
}

fn require_str<'a>(
    object: &'a serde_json::Value,
    field: &'static str,
) -> Result<&'a str, EventError> {
    str_field(object, field).ok_or(EventError::MissingField(field))
}

/// Errors that can occur when translating a processor payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// A required payload field was absent or not a string.
    #[error("missing field in processor payload: {0}")]
    MissingField(&'static str),

    /// The payload's client reference is not a valid tenant id.
    #[error("client reference is not a valid tenant id")]
    InvalidTenantRef,

    /// The payload carried an unrecognized plan code.
    #[error(transparent)]
    UnknownPlan(#[from] crate::entitlement::UnknownPlan),

    /// The payload carried an unrecognized status code.
    #[error(transparent)]
    UnknownStatus(#[from] crate::entitlement::UnknownStatus),
}
