//! The credit deduction service.
//!
//! The request-time gate: checks sufficient balance, applies a lazy period
//! rollover when due, deducts atomically via the store's conditional update,
//! retries once on contention, and fails closed otherwise.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use quotagate_core::{resolve_rollover, TenantId, UsageRecord};
use quotagate_store::{Store, StoreError};

/// Number of deduction attempts: the initial try plus exactly one retry.
///
/// Bounding the retry caps worst-case latency and avoids contention storms;
/// under rare persistent contention a legitimate request is denied and must
/// be retried at the application layer rather than risk a negative balance.
const MAX_ATTEMPTS: u32 = 2;

/// Outcome of a deduction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeductOutcome {
    /// The deduction committed; the action may proceed.
    Granted {
        /// Balance remaining after the deduction.
        remaining: i64,
    },

    /// The deduction was denied; the action must not proceed.
    Denied(DenialReason),
}

impl DeductOutcome {
    /// Check whether the deduction was granted.
    #[must_use]
    pub const fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }
}

/// Why a deduction was denied.
///
/// The two reasons are deliberately distinguishable so the caller can render
/// "upgrade your plan" versus "try again"; quota exhaustion is never
/// conflated with an internal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenialReason {
    /// The balance does not cover the requested amount. Recoverable: the
    /// tenant upgrades or waits for rollover.
    InsufficientCredits {
        /// The current balance, so the caller can show "N left".
        remaining: i64,
    },

    /// Fail-closed catch-all: a store error, a creation failure, or
    /// persistent contention after the single retry.
    CreditCheckFailed,
}

/// Result of a single optimistic deduction attempt.
enum Attempt {
    Granted { remaining: i64 },
    Insufficient { remaining: i64 },
    LostRace,
}

/// The request-time credit gate.
///
/// One instance is shared across request-handling contexts; it owns no
/// mutable state of its own.
pub struct CreditGate<S> {
    store: Arc<S>,
}

impl<S> Clone for CreditGate<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store + 'static> CreditGate<S> {
    /// Create a new gate over the given entitlement store.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Deduct `amount` credits from `tenant_id` for the named billable
    /// action.
    ///
    /// Never returns an error: every internal failure is caught at this
    /// boundary and converted to [`DenialReason::CreditCheckFailed`], so a
    /// failing check can never silently grant free usage.
    pub async fn deduct(&self, tenant_id: TenantId, amount: i64, action: &str) -> DeductOutcome {
        if amount <= 0 {
            tracing::warn!(tenant_id = %tenant_id, amount, "rejected non-positive deduction amount");
            return DeductOutcome::Denied(DenialReason::CreditCheckFailed);
        }

        for attempt in 1..=MAX_ATTEMPTS {
            match self.attempt_deduct(tenant_id, amount) {
                Ok(Attempt::Granted { remaining }) => {
                    tracing::info!(
                        tenant_id = %tenant_id,
                        action = %action,
                        credits_used = amount,
                        remaining,
                        "deduction granted"
                    );
                    self.record_usage(tenant_id, action, amount);
                    return DeductOutcome::Granted { remaining };
                }
                Ok(Attempt::Insufficient { remaining }) => {
                    tracing::warn!(
                        tenant_id = %tenant_id,
                        action = %action,
                        requested = amount,
                        remaining,
                        "deduction denied: insufficient credits"
                    );
                    return DeductOutcome::Denied(DenialReason::InsufficientCredits { remaining });
                }
                Ok(Attempt::LostRace) => {
                    tracing::debug!(
                        tenant_id = %tenant_id,
                        attempt,
                        "deduction lost conditional update race"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        tenant_id = %tenant_id,
                        action = %action,
                        error = %e,
                        "deduction failed closed on store error"
                    );
                    return DeductOutcome::Denied(DenialReason::CreditCheckFailed);
                }
            }
        }

        tracing::warn!(
            tenant_id = %tenant_id,
            action = %action,
            "deduction failed closed after retry under contention"
        );
        DeductOutcome::Denied(DenialReason::CreditCheckFailed)
    }

    /// One read-compute-conditionally-write pass.
    fn attempt_deduct(&self, tenant_id: TenantId, amount: i64) -> Result<Attempt, StoreError> {
        let now = Utc::now();

        // Lazily create the record on a tenant's first deduction attempt.
        let entitlement = match self.store.get(&tenant_id)? {
            Some(entitlement) => entitlement,
            None => self.store.create_default(&tenant_id, now)?,
        };

        // Lazy rollover, conditional on the boundary this caller observed:
        // when concurrent deductions see the same lapsed period, only the
        // first reset applies and the rest get the already-reset record back.
        let entitlement = match resolve_rollover(now, &entitlement) {
            Some(reset) => {
                tracing::info!(
                    tenant_id = %tenant_id,
                    plan = %entitlement.plan,
                    credits_remaining = reset.credits_remaining,
                    "billing period lapsed, applying rollover"
                );
                self.store.apply_rollover(
                    &tenant_id,
                    entitlement.current_period_end,
                    reset.credits_remaining,
                    reset.current_period_end,
                )?
            }
            None => entitlement,
        };

        if !entitlement.has_sufficient_credits(amount) {
            return Ok(Attempt::Insufficient {
                remaining: entitlement.credits_remaining,
            });
        }

        let observed = entitlement.credits_remaining;
        match self
            .store
            .update_credits_if(&tenant_id, observed, observed - amount)?
        {
            Some(updated) => Ok(Attempt::Granted {
                remaining: updated.credits_remaining,
            }),
            None => Ok(Attempt::LostRace),
        }
    }

    /// Append a usage ledger entry on a detached task.
    ///
    /// The ledger is observability, not balance-of-record: a failed write is
    /// logged and never affects the deduction's result.
    fn record_usage(&self, tenant_id: TenantId, action: &str, credits_used: i64) {
        let store = Arc::clone(&self.store);
        let record = UsageRecord::new(tenant_id, action, credits_used, serde_json::Value::Null);

        tokio::spawn(async move {
            if let Err(e) = store.append_usage(&record) {
                tracing::warn!(
                    tenant_id = %record.tenant_id,
                    record_id = %record.id,
                    error = %e,
                    "failed to append usage ledger entry"
                );
            }
        });
    }
}
