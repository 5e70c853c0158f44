//! Plan transition reconciliation.
//!
//! Applies billing lifecycle events to the entitlement record: checkout,
//! plan changes, cancellation, cycle renewal, and payment failure.

use std::sync::Arc;

use chrono::Utc;

use quotagate_core::{billing_period, BillingEvent, Entitlement, Plan, PlanStatus, TenantId};
use quotagate_store::{Store, StoreError};

/// Errors surfaced when a lifecycle event cannot be applied.
///
/// Unknown references are kept distinct from storage failures so the event
/// receiver can decide whether to drop the notification or retry it.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// No entitlement carries the event's customer reference.
    #[error("no tenant found for customer ref {customer_ref}")]
    UnknownCustomer {
        /// The unmatched processor customer reference.
        customer_ref: String,
    },

    /// No entitlement carries the event's subscription reference.
    #[error("no tenant found for subscription ref {subscription_ref}")]
    UnknownSubscription {
        /// The unmatched processor subscription reference.
        subscription_ref: String,
    },

    /// The underlying store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Applies billing lifecycle events to entitlement records.
///
/// Reconciliation is last-write-wins: each event is applied against the
/// current record without optimistic concurrency, since processor events for
/// one subscription arrive effectively serialized.
pub struct Reconciler<S> {
    store: Arc<S>,
}

impl<S> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store> Reconciler<S> {
    /// Create a new reconciler over the given entitlement store.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Apply one billing lifecycle event.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::UnknownCustomer`] or
    /// [`ReconcileError::UnknownSubscription`] when the event references a
    /// tenant this store has never seen, and [`ReconcileError::Store`] on
    /// storage failure.
    pub async fn reconcile(&self, event: BillingEvent) -> Result<(), ReconcileError> {
        match event {
            BillingEvent::CheckoutCompleted {
                tenant_id,
                plan,
                customer_ref,
                subscription_ref,
            } => self.handle_checkout(tenant_id, plan, customer_ref, subscription_ref),
            BillingEvent::SubscriptionUpdated {
                subscription_ref,
                plan,
                status,
                current_period_end,
            } => self.handle_subscription_updated(&subscription_ref, plan, status, current_period_end),
            BillingEvent::SubscriptionCanceled { subscription_ref } => {
                self.handle_canceled(&subscription_ref)
            }
            BillingEvent::RenewalPaid { customer_ref } => self.handle_renewal(&customer_ref),
            BillingEvent::PaymentFailed { customer_ref } => self.handle_payment_failed(&customer_ref),
        }
    }

    /// Checkout is the authoritative reset: whatever the prior state, the
    /// tenant now holds the purchased plan's full ceiling and a fresh period.
    fn handle_checkout(
        &self,
        tenant_id: TenantId,
        plan: Plan,
        customer_ref: String,
        subscription_ref: String,
    ) -> Result<(), ReconcileError> {
        let now = Utc::now();
        let mut entitlement = match self.store.get(&tenant_id)? {
            Some(entitlement) => entitlement,
            None => Entitlement::new_default(tenant_id, now),
        };

        entitlement.plan = plan;
        entitlement.status = PlanStatus::Active;
        entitlement.credits_remaining = plan.credit_ceiling();
        entitlement.current_period_end = Some(now + billing_period());
        entitlement.customer_ref = Some(customer_ref);
        entitlement.subscription_ref = Some(subscription_ref);
        entitlement.updated_at = now;
        self.store.put(&entitlement)?;

        tracing::info!(
            tenant_id = %tenant_id,
            plan = %plan,
            credits_remaining = entitlement.credits_remaining,
            "checkout completed, entitlement reset to purchased plan"
        );
        Ok(())
    }

    /// Mid-cycle plan change. Upgrades add the ceiling difference to the
    /// current balance (already-consumed credits stay consumed); downgrades
    /// cap the balance at the new ceiling; a same-plan update touches only
    /// status and period.
    fn handle_subscription_updated(
        &self,
        subscription_ref: &str,
        plan: Plan,
        status: PlanStatus,
        current_period_end: Option<chrono::DateTime<Utc>>,
    ) -> Result<(), ReconcileError> {
        let mut entitlement = self.require_by_subscription(subscription_ref)?;

        let old_ceiling = entitlement.plan.credit_ceiling();
        let new_ceiling = plan.credit_ceiling();
        if new_ceiling > old_ceiling {
            entitlement.credits_remaining += new_ceiling - old_ceiling;
        } else if new_ceiling < old_ceiling {
            entitlement.credits_remaining = entitlement.credits_remaining.min(new_ceiling);
        }

        entitlement.plan = plan;
        entitlement.status = status;
        if let Some(period_end) = current_period_end {
            entitlement.current_period_end = Some(period_end);
        }
        entitlement.updated_at = Utc::now();
        self.store.put(&entitlement)?;

        tracing::info!(
            tenant_id = %entitlement.tenant_id,
            plan = %plan,
            status = %status,
            credits_remaining = entitlement.credits_remaining,
            "subscription updated"
        );
        Ok(())
    }

    /// Cancellation drops the tenant to the free tier with a full free
    /// ceiling and clears the subscription reference. The customer reference
    /// stays: the processor keeps the customer object alive and may send
    /// invoice events against it.
    fn handle_canceled(&self, subscription_ref: &str) -> Result<(), ReconcileError> {
        let mut entitlement = self.require_by_subscription(subscription_ref)?;

        entitlement.plan = Plan::Free;
        entitlement.status = PlanStatus::Canceled;
        entitlement.credits_remaining = Plan::Free.credit_ceiling();
        entitlement.subscription_ref = None;
        entitlement.updated_at = Utc::now();
        self.store.put(&entitlement)?;

        tracing::info!(
            tenant_id = %entitlement.tenant_id,
            "subscription canceled, entitlement reverted to free tier"
        );
        Ok(())
    }

    /// A paid cycle invoice restores the full ceiling and advances the
    /// period, the proactive counterpart of the lazy rollover on the
    /// deduction path. Status is left alone: a concurrent status change has
    /// its own event.
    fn handle_renewal(&self, customer_ref: &str) -> Result<(), ReconcileError> {
        let entitlement = self.require_by_customer(customer_ref)?;

        let now = Utc::now();
        let updated = self.store.apply_rollover(
            &entitlement.tenant_id,
            entitlement.current_period_end,
            entitlement.plan.credit_ceiling(),
            now + billing_period(),
        )?;

        tracing::info!(
            tenant_id = %updated.tenant_id,
            plan = %updated.plan,
            credits_remaining = updated.credits_remaining,
            "renewal paid, credits reset for new period"
        );
        Ok(())
    }

    /// Payment failure marks the tenant past due and nothing else: the
    /// remaining balance stays spendable until the processor escalates to
    /// cancellation.
    fn handle_payment_failed(&self, customer_ref: &str) -> Result<(), ReconcileError> {
        let mut entitlement = self.require_by_customer(customer_ref)?;

        entitlement.status = PlanStatus::PastDue;
        entitlement.updated_at = Utc::now();
        self.store.put(&entitlement)?;

        tracing::warn!(
            tenant_id = %entitlement.tenant_id,
            "payment failed, entitlement marked past due"
        );
        Ok(())
    }

    fn require_by_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<Entitlement, ReconcileError> {
        self.store
            .find_by_subscription_ref(subscription_ref)?
            .ok_or_else(|| ReconcileError::UnknownSubscription {
                subscription_ref: subscription_ref.to_string(),
            })
    }

    fn require_by_customer(&self, customer_ref: &str) -> Result<Entitlement, ReconcileError> {
        self.store
            .find_by_customer_ref(customer_ref)?
            .ok_or_else(|| ReconcileError::UnknownCustomer {
                customer_ref: customer_ref.to_string(),
            })
    }
}
