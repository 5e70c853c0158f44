//! Period rollover resolution.
//!
//! Pure logic deciding whether a tenant's billing period has lapsed and, if
//! so, what the reset state looks like. No I/O; the deduction service applies
//! the result to the store.

use chrono::{DateTime, Utc};

use crate::entitlement::{billing_period, Entitlement};

/// The reset state computed when a billing period has lapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloverReset {
    /// New credit balance: the plan's full ceiling, unless this is a
    /// backfill of a legacy record, in which case the balance is untouched.
    pub credits_remaining: i64,

    /// New period boundary: one period from `now`, never caught up
    /// retroactively beyond one period.
    pub current_period_end: DateTime<Utc>,
}

/// Determine whether `entitlement`'s billing period has lapsed at `now`.
///
/// Returns `None` if the period is still running. Otherwise returns the
/// reset state: the plan's full ceiling and a fresh period anchored at `now`.
/// A tenant who returns after months of inactivity gets exactly one fresh
/// period, not a backlog of skipped resets.
///
/// A legacy record with no period end is backfilled with one period from
/// `now` without resetting the balance.
#[must_use]
pub fn resolve_rollover(now: DateTime<Utc>, entitlement: &Entitlement) -> Option<RolloverReset> {
    match entitlement.current_period_end {
        Some(period_end) if now < period_end => None,
        Some(_) => Some(RolloverReset {
            credits_remaining: entitlement.plan.credit_ceiling(),
            current_period_end: now + billing_period(),
        }),
        None => Some(RolloverReset {
            credits_remaining: entitlement.credits_remaining,
            current_period_end: now + billing_period(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlement::Plan;
    use crate::TenantId;
    use chrono::Duration;

    fn entitlement_with(
        plan: Plan,
        credits: i64,
        period_end: Option<DateTime<Utc>>,
    ) -> Entitlement {
        let mut ent = Entitlement::new_default(TenantId::generate(), Utc::now());
        ent.plan = plan;
        ent.credits_remaining = credits;
        ent.current_period_end = period_end;
        ent
    }

    #[test]
    fn no_reset_while_period_running() {
        let now = Utc::now();
        let ent = entitlement_with(Plan::Pro, 3, Some(now + Duration::hours(1)));

        assert_eq!(resolve_rollover(now, &ent), None);
    }

    #[test]
    fn reset_at_exact_boundary() {
        let now = Utc::now();
        let ent = entitlement_with(Plan::Pro, 3, Some(now));

        let reset = resolve_rollover(now, &ent).unwrap();
        assert_eq!(reset.credits_remaining, Plan::Pro.credit_ceiling());
        assert_eq!(reset.current_period_end, now + billing_period());
    }

    #[test]
    fn lapsed_period_resets_to_ceiling() {
        let now = Utc::now();
        let ent = entitlement_with(Plan::Free, 0, Some(now - Duration::days(2)));

        let reset = resolve_rollover(now, &ent).unwrap();
        assert_eq!(reset.credits_remaining, Plan::Free.credit_ceiling());
        assert_eq!(reset.current_period_end, now + billing_period());
    }

    #[test]
    fn months_of_inactivity_yield_one_fresh_period() {
        let now = Utc::now();
        let ent = entitlement_with(Plan::Pro, 12, Some(now - Duration::days(200)));

        // One reset anchored at now, not a backlog of six.
        let reset = resolve_rollover(now, &ent).unwrap();
        assert_eq!(reset.current_period_end, now + billing_period());
    }

    #[test]
    fn legacy_record_backfills_without_resetting_credits() {
        let now = Utc::now();
        let ent = entitlement_with(Plan::Pro, 7, None);

        let reset = resolve_rollover(now, &ent).unwrap();
        assert_eq!(reset.credits_remaining, 7);
        assert_eq!(reset.current_period_end, now + billing_period());
    }
}
