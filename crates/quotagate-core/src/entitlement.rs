//! Entitlement types for quotagate.
//!
//! This module defines the per-tenant entitlement record: plan, status,
//! remaining credits, and the current billing-period boundary.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::TenantId;

// ============================================================================
// Constants
// ============================================================================

/// Length of a billing period in days.
pub const BILLING_PERIOD_DAYS: i64 = 30;

/// Free plan credit ceiling per billing period.
pub const FREE_PLAN_CREDITS: i64 = 10;

/// Pro plan credit ceiling per billing period.
pub const PRO_PLAN_CREDITS: i64 = 75;

/// Business plan credit ceiling per billing period.
pub const BUSINESS_PLAN_CREDITS: i64 = 250;

/// Returns one billing period as a `chrono::Duration`.
#[must_use]
pub fn billing_period() -> Duration {
    Duration::days(BILLING_PERIOD_DAYS)
}

// ============================================================================
// Plans
// ============================================================================

/// Available billing plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    /// Free tier: 10 credits per period, no paid subscription.
    Free,

    /// Pro plan: 75 credits per period.
    Pro,

    /// Business plan: 250 credits per period.
    Business,
}

impl Plan {
    /// Get the credit ceiling for this plan.
    ///
    /// The ceiling is a pure function of the plan. It is never stored next
    /// to the balance, so the two cannot drift.
    #[must_use]
    pub const fn credit_ceiling(&self) -> i64 {
        match self {
            Self::Free => FREE_PLAN_CREDITS,
            Self::Pro => PRO_PLAN_CREDITS,
            Self::Business => BUSINESS_PLAN_CREDITS,
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Pro => write!(f, "pro"),
            Self::Business => write!(f, "business"),
        }
    }
}

impl FromStr for Plan {
    type Err = UnknownPlan;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "pro" => Ok(Self::Pro),
            "business" => Ok(Self::Business),
            other => Err(UnknownPlan(other.to_string())),
        }
    }
}

/// Error returned when a plan code is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown plan: {0}")]
pub struct UnknownPlan(pub String);

// ============================================================================
// Status
// ============================================================================

/// Status of a tenant's billing relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Subscription (or free tier) in good standing.
    Active,

    /// Payment failed; tenant keeps the existing balance until canceled.
    PastDue,

    /// Subscription canceled.
    Canceled,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::PastDue => write!(f, "past_due"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

impl FromStr for PlanStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Processor vocabulary: "unpaid" is terminal, same as canceled.
        match s {
            "active" | "trialing" => Ok(Self::Active),
            "past_due" => Ok(Self::PastDue),
            "canceled" | "unpaid" => Ok(Self::Canceled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Error returned when a processor status string is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown subscription status: {0}")]
pub struct UnknownStatus(pub String);

// ============================================================================
// Entitlement record
// ============================================================================

/// The durable entitlement record for one tenant.
///
/// Exactly one record exists per tenant once first touched. It is created
/// lazily on the first deduction attempt (free plan, fresh period) or by the
/// reconciler on first checkout, mutated by deductions and lifecycle events,
/// and never deleted by this engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entitlement {
    /// The tenant this record belongs to.
    pub tenant_id: TenantId,

    /// Current billing plan; determines the credit ceiling.
    pub plan: Plan,

    /// Current billing status.
    pub status: PlanStatus,

    /// Consumable credit balance. Never negative after a successful
    /// deduction.
    pub credits_remaining: i64,

    /// End of the current billing period. `None` only on legacy records;
    /// backfilled with one period from now on the next deduction.
    pub current_period_end: Option<DateTime<Utc>>,

    /// Payment processor's customer object reference, once one exists.
    pub customer_ref: Option<String>,

    /// Payment processor's subscription object reference, once one exists.
    pub subscription_ref: Option<String>,

    /// When the record was created.
    pub created_at: DateTime<Utc>,

    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Entitlement {
    /// Create a default entitlement: free plan, full free ceiling, one fresh
    /// period from `now`.
    #[must_use]
    pub fn new_default(tenant_id: TenantId, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id,
            plan: Plan::Free,
            status: PlanStatus::Active,
            credits_remaining: Plan::Free.credit_ceiling(),
            current_period_end: Some(now + billing_period()),
            customer_ref: None,
            subscription_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check whether the balance covers a deduction of `amount` credits.
    #[must_use]
    pub fn has_sufficient_credits(&self, amount: i64) -> bool {
        self.credits_remaining >= amount
    }

    /// Check whether the billing relationship is in good standing.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == PlanStatus::Active
    }
}
